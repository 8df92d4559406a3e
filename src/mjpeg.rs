//! HTTP MJPEG server: multipart/x-mixed-replace streaming of JPEG frames
//!
//! Each accepted connection runs an independent pull loop over the frame
//! broadcast channel, so a slow viewer only ever delays itself and always
//! receives the freshest frame.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::FrameReceiver;

const BOUNDARY: &str = "frame";

static INDEX_PAGE: Lazy<String> = Lazy::new(|| {
    let body = concat!(
        "<html>\n",
        "  <body>\n",
        "    <img src=\"/mjpeg\" />\n",
        "  </body>\n",
        "</html>\n"
    );
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
});

const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const STREAM_HEADER: &str = concat!(
    "HTTP/1.1 200 OK\r\n",
    "Content-Type: multipart/x-mixed-replace; boundary=frame\r\n",
    "Cache-Control: no-cache\r\n",
    "Connection: close\r\n",
    "\r\n"
);

/// HTTP server streaming the latest JPEG frames.
pub struct MjpegServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    shutdown: CancellationToken,
    viewers: Arc<AtomicUsize>,
}

impl MjpegServer {
    /// Binds the listener and starts the accept loop. Failing to bind is the
    /// only fatal error; everything after is per-connection.
    pub async fn bind(
        addr: &str,
        frames: FrameReceiver,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let viewers = Arc::new(AtomicUsize::new(0));

        info!(addr = %local_addr, "MJPEG server listening");

        let accept_task = tokio::spawn(accept_loop(
            listener,
            frames,
            shutdown.clone(),
            Arc::clone(&viewers),
        ));

        Ok(Self {
            local_addr,
            accept_task,
            shutdown,
            viewers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Currently connected stream viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }

    /// Stops the accept loop and all connection tasks.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    frames: FrameReceiver,
    shutdown: CancellationToken,
    viewers: Arc<AtomicUsize>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "HTTP accept failed");
                    continue;
                }
            },
        };

        let frames = frames.clone();
        let shutdown = shutdown.clone();
        let viewers = Arc::clone(&viewers);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, frames, shutdown, viewers).await {
                debug!(peer = %peer, error = %e, "HTTP connection closed");
            }
        });
    }
    debug!("MJPEG accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    frames: FrameReceiver,
    shutdown: CancellationToken,
    viewers: Arc<AtomicUsize>,
) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let path = match parse_request_path(&request_line) {
        Some(path) => path,
        None => {
            writer.write_all(NOT_FOUND.as_bytes()).await?;
            writer.flush().await?;
            return Ok(());
        }
    };

    // Drain headers; nothing in them changes the response.
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    match path.as_str() {
        "/" => {
            writer.write_all(INDEX_PAGE.as_bytes()).await?;
            writer.flush().await?;
            Ok(())
        }
        "/mjpeg" => {
            info!(peer = %peer, "MJPEG viewer connected");
            viewers.fetch_add(1, Ordering::Relaxed);
            let result = stream_frames(&mut writer, frames, shutdown).await;
            viewers.fetch_sub(1, Ordering::Relaxed);
            info!(peer = %peer, "MJPEG viewer disconnected");
            result
        }
        _ => {
            writer.write_all(NOT_FOUND.as_bytes()).await?;
            writer.flush().await?;
            Ok(())
        }
    }
}

/// Pull loop for one viewer: take the latest frame, write one multipart
/// part, flush. The `take()` await is the sole suspension point; a write
/// failure (client gone) or shutdown ends the loop.
async fn stream_frames<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    mut frames: FrameReceiver,
    shutdown: CancellationToken,
) -> io::Result<()> {
    writer.write_all(STREAM_HEADER.as_bytes()).await?;
    writer.flush().await?;

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.take() => match frame {
                Some(frame) => frame,
                // Channel closed: the pipeline stopped.
                None => break,
            },
        };

        let part_header = format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        );
        writer.write_all(part_header.as_bytes()).await?;
        writer.write_all(&frame).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

fn parse_request_path(request_line: &str) -> Option<String> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    if method != "GET" {
        return None;
    }
    Some(path.to_string())
}
