//! Frame pipeline: convert, compress, publish; service lifecycle
//!
//! A single producer worker owns the conversion and JPEG buffers, so their
//! reuse needs no locking. Frames are processed strictly in arrival order;
//! per-frame errors skip that frame and keep the pipeline running.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::FrameBroadcastChannel;
use crate::config::StreamControlState;
use crate::convert::{FrameConverter, Rotation};
use crate::frame::{FormatError, OwnedRawFrame, RawFrame};
use crate::jpeg::{EncodeError, JpegFrameEncoder};
use crate::nalu::{CodecConfigCell, NaluExtractor};
use crate::rtsp::RtspNalSink;
use crate::stats::{FpsTracker, PipelineStats};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Synchronous per-frame processing: plane conversion, rotation, crop, JPEG
/// compression, publish. Pure over its explicit buffers apart from the
/// control-state read and the channel publish.
pub struct FramePipeline {
    control: StreamControlState,
    rotation: Rotation,
    converter: FrameConverter,
    encoder: JpegFrameEncoder,
    channel: Arc<FrameBroadcastChannel>,
    stats: Arc<PipelineStats>,
    fps: FpsTracker,
}

impl FramePipeline {
    pub fn new(
        control: StreamControlState,
        rotation: Rotation,
        channel: Arc<FrameBroadcastChannel>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            control,
            rotation,
            converter: FrameConverter::new(),
            encoder: JpegFrameEncoder::new(),
            channel,
            stats,
            fps: FpsTracker::new(),
        }
    }

    /// Processes one raw frame. Quality is re-read from the control state
    /// every call, so quality changes apply without a restart.
    pub fn process(&mut self, raw: &RawFrame<'_>) -> Result<(), PipelineError> {
        let quality = self.control.snapshot().jpeg_quality;
        let (converted, crop) = self.converter.convert(raw, self.rotation)?;
        let jpeg = self.encoder.encode(converted, crop, quality)?;
        self.channel.publish(jpeg);

        self.stats.record_frame();
        if let Some(fps) = self.fps.tick() {
            self.stats.set_fps(fps);
            debug!(fps = %fps, "Pipeline frame rate");
        }
        Ok(())
    }
}

/// Control-plane commands processed by the worker only at frame boundaries.
#[derive(Debug)]
enum Command {
    Rebind { width: u32, height: u32 },
}

/// Handle the capture layer pushes frames through.
///
/// The bounded(1) channel keeps at most one frame in flight: offering while
/// one is pending drops the new frame at the boundary, so the pipeline is
/// never asked to catch up on a backlog.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<OwnedRawFrame>,
}

impl FrameSink {
    /// Hands a frame to the producer. Returns false if it was dropped
    /// (previous frame still pending, or pipeline stopped).
    pub fn offer(&self, frame: OwnedRawFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// Owns the producer worker and the shared pipeline resources.
///
/// `start()`/`stop()` are idempotent; stop closes the broadcast channel so
/// every blocked consumer wakes, then joins the worker.
pub struct StreamService {
    control: StreamControlState,
    rotation: Rotation,
    channel: Arc<FrameBroadcastChannel>,
    stats: Arc<PipelineStats>,
    extractor: NaluExtractor,
    nal_sink: RtspNalSink,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
    frame_tx: Option<FrameSink>,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
}

impl StreamService {
    pub fn new(
        control: StreamControlState,
        rotation: Rotation,
        nal_sink: RtspNalSink,
        codec_config: CodecConfigCell,
    ) -> Self {
        let extractor = NaluExtractor::new(codec_config);
        Self {
            control,
            rotation,
            channel: Arc::new(FrameBroadcastChannel::new()),
            stats: PipelineStats::new(),
            extractor,
            nal_sink,
            shutdown: CancellationToken::new(),
            worker: None,
            frame_tx: None,
            cmd_tx: None,
        }
    }

    pub fn channel(&self) -> &Arc<FrameBroadcastChannel> {
        &self.channel
    }

    pub fn codec_config(&self) -> crate::nalu::CodecConfigCell {
        self.extractor.codec_config().clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn control(&self) -> &StreamControlState {
        &self.control
    }

    /// Spawns the producer worker. Returns the capture-side sink.
    pub fn start(&mut self) -> FrameSink {
        if let Some(sink) = &self.frame_tx {
            return sink.clone();
        }

        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let pipeline = FramePipeline::new(
            self.control.clone(),
            self.rotation,
            Arc::clone(&self.channel),
            Arc::clone(&self.stats),
        );

        let worker = tokio::spawn(producer_loop(
            pipeline,
            frame_rx,
            cmd_rx,
            self.control.clone(),
            self.shutdown.clone(),
        ));

        info!("Stream pipeline started");
        self.worker = Some(worker);
        self.cmd_tx = Some(cmd_tx);
        let sink = FrameSink { tx: frame_tx };
        self.frame_tx = Some(sink.clone());
        sink
    }

    /// Requests a resolution change. The worker applies it strictly between
    /// frames; no frame ever mixes old and new dimensions.
    pub fn request_rebind(&self, width: u32, height: u32) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(Command::Rebind { width, height });
        } else {
            self.control.set_resolution(width, height);
        }
    }

    /// Entry point for encoder access units: splits them into NAL units and
    /// routes them to the RTSP side in timestamp order.
    pub fn on_access_unit(&self, buf: &[u8], pts_us: i64, keyframe: bool) {
        let mut count = 0u64;
        self.extractor.push_access_unit(buf, pts_us, keyframe, |nal| {
            self.nal_sink.deliver(&nal);
            count += 1;
        });
        self.stats.record_nal_units(count);
    }

    /// Entry point for encoder format changes.
    pub fn on_codec_config(&self, sps: &[u8], pps: &[u8]) {
        self.extractor.set_codec_config(sps, pps);
        info!("Codec config updated");
    }

    /// Stops the worker and closes the broadcast channel. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.frame_tx = None;
        self.cmd_tx = None;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Pipeline worker did not stop cleanly");
            }
        }
        self.channel.close();
        info!("Stream pipeline stopped");
    }
}

async fn producer_loop(
    mut pipeline: FramePipeline,
    mut frame_rx: mpsc::Receiver<OwnedRawFrame>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    control: StreamControlState,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            // Rebind commands take effect only here, between frames.
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Rebind { width, height }) => {
                    control.set_resolution(width, height);
                    info!(width = %width, height = %height, "Rebinding pipeline resolution");
                }
                None => break,
            },

            frame = frame_rx.recv() => match frame {
                Some(owned) => {
                    if let Err(e) = pipeline.process(&owned.as_raw()) {
                        // Per-frame errors are local: skip and continue.
                        pipeline.stats.record_skip();
                        debug!(error = %e, "Skipping frame");
                    }
                }
                None => break,
            },
        }
    }

    pipeline.channel.close();
    debug!("Producer worker stopped");
}
