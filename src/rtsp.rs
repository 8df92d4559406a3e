//! Minimal RTSP session server: OPTIONS/DESCRIBE/SETUP/PLAY/TEARDOWN
//!
//! Line-based text protocol over TCP, one task per client. The server
//! enforces no method ordering; every response echoes the request's CSeq.
//! The negotiated transport is interleaved RTP over the control connection;
//! actual RTP/AVP packetization (including FU-A fragmentation of over-MTU
//! NAL units) is an extension point, see [`RtspNalSink::deliver`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::nalu::{CodecConfigCell, NalUnit};

/// Fixed session identifier, matching the single-session server model.
const SESSION_ID: &str = "12345678";
/// Interleaved channel pair offered in SETUP (RTP data, RTCP control).
const INTERLEAVED: &str = "0-1";

/// Delivery hook for extracted NAL units.
///
/// Bookkeeping only: units are counted against playing sessions, in
/// timestamp order. Packetizing them into RTP/AVP frames on the interleaved
/// channel is the documented extension point and is intentionally not
/// implemented here.
#[derive(Debug, Default, Clone)]
pub struct RtspNalSink {
    playing: Arc<AtomicUsize>,
    delivered: Arc<AtomicU64>,
}

impl RtspNalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a NAL unit to the playing session, if any.
    pub fn deliver(&self, nal: &NalUnit<'_>) {
        if self.playing.load(Ordering::Relaxed) > 0 {
            // Extension point: RTP packetization over the interleaved
            // channel would happen here.
            self.delivered.fetch_add(1, Ordering::Relaxed);
            let _ = nal;
        }
    }

    pub fn playing_sessions(&self) -> usize {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn delivered_units(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// RTSP listener serving one H.264 video description.
pub struct RtspSessionServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    shutdown: CancellationToken,
    sink: RtspNalSink,
}

impl RtspSessionServer {
    pub async fn bind(
        addr: &str,
        path: String,
        codec_config: CodecConfigCell,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let sink = RtspNalSink::new();

        info!(addr = %local_addr, path = %path, "RTSP server listening");

        let accept_task = tokio::spawn(accept_loop(
            listener,
            path,
            codec_config,
            shutdown.clone(),
            sink.clone(),
        ));

        Ok(Self {
            local_addr,
            accept_task,
            shutdown,
            sink,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for routing extracted NAL units to this server.
    pub fn nal_sink(&self) -> RtspNalSink {
        self.sink.clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    path: String,
    codec_config: CodecConfigCell,
    shutdown: CancellationToken,
    sink: RtspNalSink,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "RTSP accept failed");
                    continue;
                }
            },
        };

        info!(peer = %peer, "RTSP client connected");
        let path = path.clone();
        let codec_config = codec_config.clone();
        let shutdown = shutdown.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            let session = RtspSession::new(path, codec_config, sink);
            if let Err(e) = session.run(stream, shutdown).await {
                debug!(peer = %peer, error = %e, "RTSP session I/O error");
            }
            info!(peer = %peer, "RTSP client disconnected");
        });
    }
    debug!("RTSP accept loop stopped");
}

/// Per-connection protocol state.
struct RtspSession {
    path: String,
    codec_config: CodecConfigCell,
    sink: RtspNalSink,
    playing: bool,
}

/// A parsed request: method, URI and the CSeq to echo.
#[derive(Debug, PartialEq, Eq)]
struct Request {
    method: String,
    uri: String,
    cseq: Option<String>,
}

impl RtspSession {
    fn new(path: String, codec_config: CodecConfigCell, sink: RtspNalSink) -> Self {
        Self {
            path,
            codec_config,
            sink,
            playing: false,
        }
    }

    async fn run(mut self, stream: TcpStream, shutdown: CancellationToken) -> io::Result<()> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        let result = loop {
            let mut line = String::new();
            let read = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                read = reader.read_line(&mut line) => read?,
            };
            if read == 0 {
                break Ok(()); // client closed
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                continue;
            }

            let Some((method, uri)) = parse_request_line(trimmed) else {
                // Unparseable request line: ignore it, keep the session.
                debug!(line = %trimmed, "Ignoring unparseable RTSP request line");
                continue;
            };

            let cseq = read_headers_cseq(&mut reader).await?;
            let request = Request { method, uri, cseq };
            let teardown = self.respond(&mut writer, &request).await?;
            if teardown {
                break Ok(());
            }
        };

        if self.playing {
            self.sink.playing.fetch_sub(1, Ordering::Relaxed);
            self.playing = false;
        }
        result
    }

    /// Handles one request. Returns true when the session should close.
    async fn respond(&mut self, writer: &mut OwnedWriteHalf, req: &Request) -> io::Result<bool> {
        debug!(method = %req.method, uri = %req.uri, "RTSP request");
        let cseq = req.cseq.as_deref();

        match req.method.as_str() {
            "OPTIONS" => {
                let headers = "Public: OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY\r\n";
                write_response(writer, 200, cseq, headers, None).await?;
            }
            "DESCRIBE" => {
                let sdp = self.build_sdp();
                let headers = "Content-Type: application/sdp\r\n";
                write_response(writer, 200, cseq, headers, Some(&sdp)).await?;
            }
            "SETUP" => {
                let headers = format!(
                    "Transport: RTP/AVP/TCP;unicast;interleaved={INTERLEAVED}\r\nSession: {SESSION_ID}\r\n"
                );
                write_response(writer, 200, cseq, &headers, None).await?;
            }
            "PLAY" => {
                let headers = format!("Range: npt=0.000-\r\nSession: {SESSION_ID}\r\n");
                write_response(writer, 200, cseq, &headers, None).await?;
                if !self.playing {
                    self.playing = true;
                    self.sink.playing.fetch_add(1, Ordering::Relaxed);
                }
            }
            "TEARDOWN" => {
                let headers = format!("Session: {SESSION_ID}\r\n");
                write_response(writer, 200, cseq, &headers, None).await?;
                return Ok(true);
            }
            _ => {
                write_response(writer, 501, cseq, "", None).await?;
            }
        }
        Ok(false)
    }

    fn build_sdp(&self) -> String {
        let mut sdp = String::new();
        sdp.push_str("v=0\r\n");
        sdp.push_str("o=- 0 0 IN IP4 0.0.0.0\r\n");
        sdp.push_str("s=camcast\r\n");
        sdp.push_str("t=0 0\r\n");
        sdp.push_str("m=video 0 RTP/AVP 96\r\n");
        sdp.push_str("a=rtpmap:96 H264/90000\r\n");
        sdp.push_str(&format!("a=control:{}\r\n", self.path));
        if let Some(config) = self.codec_config.get() {
            sdp.push_str(&format!(
                "a=fmtp:96 packetization-mode=1;sprop-parameter-sets={},{}\r\n",
                BASE64.encode(&config.sps),
                BASE64.encode(&config.pps),
            ));
        }
        sdp
    }
}

/// Splits an RTSP request line into method and URI.
fn parse_request_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let uri = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() || !version.starts_with("RTSP/") {
        return None;
    }
    if !method.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
        return None;
    }
    Some((method.to_string(), uri.to_string()))
}

/// Consumes headers up to the blank line, returning the CSeq value if
/// present. Malformed header lines are skipped.
async fn read_headers_cseq<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> io::Result<Option<String>> {
    let mut cseq = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(cseq); // EOF mid-headers
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(cseq);
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("cseq") {
                cseq = Some(value.trim().to_string());
            }
        }
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    status: u16,
    cseq: Option<&str>,
    extra_headers: &str,
    body: Option<&str>,
) -> io::Result<()> {
    let status_text = match status {
        200 => "OK",
        501 => "Not Implemented",
        _ => "Error",
    };

    let mut response = format!("RTSP/1.0 {status} {status_text}\r\n");
    if let Some(cseq) = cseq {
        response.push_str(&format!("CSeq: {cseq}\r\n"));
    }
    response.push_str(extra_headers);
    if let Some(body) = body {
        response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        response.push_str(body);
    } else {
        response.push_str("\r\n");
    }

    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nalu::CodecConfig;

    #[test]
    fn request_line_parsing() {
        assert_eq!(
            parse_request_line("OPTIONS rtsp://host:8554/live RTSP/1.0"),
            Some(("OPTIONS".to_string(), "rtsp://host:8554/live".to_string()))
        );
        assert!(parse_request_line("garbage").is_none());
        assert!(parse_request_line("GET /x HTTP/1.1").is_none());
        assert!(parse_request_line("options rtsp://h/ RTSP/1.0").is_none());
    }

    #[test]
    fn sdp_without_codec_config_has_no_fmtp() {
        let session = RtspSession::new(
            "/live".to_string(),
            CodecConfigCell::new(),
            RtspNalSink::new(),
        );
        let sdp = session.build_sdp();
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(!sdp.contains("sprop-parameter-sets"));
    }

    #[test]
    fn sdp_with_codec_config_carries_base64_parameter_sets() {
        let cell = CodecConfigCell::new();
        cell.publish(CodecConfig {
            sps: vec![0x67, 0x42, 0x00, 0x1F],
            pps: vec![0x68, 0xCE, 0x3C, 0x80],
        });
        let session = RtspSession::new("/live".to_string(), cell, RtspNalSink::new());
        let sdp = session.build_sdp();

        let sps_b64 = BASE64.encode([0x67, 0x42, 0x00, 0x1F]);
        let pps_b64 = BASE64.encode([0x68, 0xCE, 0x3C, 0x80]);
        assert!(sdp.contains(&format!(
            "a=fmtp:96 packetization-mode=1;sprop-parameter-sets={sps_b64},{pps_b64}"
        )));
    }

    #[test]
    fn sink_counts_only_while_playing() {
        let sink = RtspNalSink::new();
        let nal = NalUnit {
            data: &[0x65, 1, 2],
            pts_us: 0,
            keyframe: true,
        };

        sink.deliver(&nal);
        assert_eq!(sink.delivered_units(), 0);

        sink.playing.fetch_add(1, Ordering::Relaxed);
        sink.deliver(&nal);
        assert_eq!(sink.delivered_units(), 1);
    }
}
