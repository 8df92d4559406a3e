//! Camera streaming CLI application
//!
//! Wires the frame pipeline to the HTTP MJPEG and RTSP listeners. Without a
//! physical capture device it feeds the pipeline a moving synthetic test
//! pattern at the configured frame rate.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use camcast::config::Config;
use camcast::convert::Rotation;
use camcast::frame::OwnedRawFrame;
use camcast::mjpeg::MjpegServer;
use camcast::nalu::CodecConfigCell;
use camcast::pipeline::{FrameSink, StreamService};
use camcast::rtsp::RtspSessionServer;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "camcast")]
#[command(about = "Camera streaming pipeline with MJPEG-over-HTTP and RTSP endpoints")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("camcast starting");

    let config = if Path::new(&cli.config).exists() {
        info!(config_path = %cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!(config_path = %cli.config, "Config file not found, using defaults");
        Config::default()
    };

    let control = camcast::config::StreamControlState::from_config(&config.video);
    let rotation = Rotation::from_degrees(config.video.rotation)?;
    let shutdown = CancellationToken::new();
    let codec_config = CodecConfigCell::new();

    let rtsp = RtspSessionServer::bind(
        &format!("{}:{}", config.server.bind, config.server.rtsp_port),
        config.server.rtsp_path.clone(),
        codec_config.clone(),
        shutdown.child_token(),
    )
    .await?;

    let mut service = StreamService::new(control.clone(), rotation, rtsp.nal_sink(), codec_config);
    let sink = service.start();

    let http = MjpegServer::bind(
        &format!("{}:{}", config.server.bind, config.server.http_port),
        service.channel().subscribe(),
        shutdown.child_token(),
    )
    .await?;

    info!(
        mjpeg = %format!("http://{}/", http.local_addr()),
        rtsp = %format!("rtsp://{}{}", rtsp.local_addr(), config.server.rtsp_path),
        "Streaming started, press Ctrl+C to stop"
    );

    let source = tokio::spawn(test_pattern_source(
        sink,
        control.clone(),
        shutdown.child_token(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown.cancel();
    let _ = source.await;
    service.stop().await;
    http.shutdown().await;
    rtsp.shutdown().await;

    let stats = service.stats().snapshot();
    info!(
        frames = %stats.frames_processed,
        skipped = %stats.frames_skipped,
        "Stopped"
    );
    Ok(())
}

/// Feeds the pipeline a moving gradient at the configured frame rate.
async fn test_pattern_source(
    sink: FrameSink,
    control: camcast::config::StreamControlState,
    shutdown: CancellationToken,
) {
    let mut tick = 0u32;
    loop {
        let v = control.snapshot();
        let period = Duration::from_secs(1) / v.target_fps.max(1);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        sink.offer(test_pattern_frame(v.width, v.height, tick));
        tick = tick.wrapping_add(1);
    }
}

/// Diagonal luma gradient scrolling with `tick`, neutral chroma bands.
fn test_pattern_frame(width: u32, height: u32, tick: u32) -> OwnedRawFrame {
    let (w, h) = (width as usize, height as usize);
    let shift = (tick * 2) as usize;

    let mut y = vec![0u8; w * h];
    for row in 0..h {
        for col in 0..w {
            y[row * w + col] = ((row + col + shift) & 0xFF) as u8;
        }
    }

    let (cw, ch) = (w / 2, h / 2);
    let mut u = vec![128u8; cw * ch];
    let mut v = vec![128u8; cw * ch];
    for row in 0..ch {
        let band = (((row + shift / 2) / 16) % 2) as u8;
        for col in 0..cw {
            u[row * cw + col] = 96 + band * 64;
            v[row * cw + col] = 160 - band * 64;
        }
    }

    OwnedRawFrame {
        width,
        height,
        y,
        u,
        v,
        chroma_pixel_stride: 1,
    }
}
