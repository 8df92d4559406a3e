//! Camera streaming pipeline: planar YUV in, MJPEG over HTTP and H.264 NAL
//! units toward RTSP out
//!
//! The pipeline converts raw 4:2:0 frames to NV12, rotates and center-crops
//! them to 16:9, JPEG-compresses into reused buffers and publishes through a
//! latest-frame-only broadcast channel:
//! - Single-slot frame channel: slow viewers skip frames, never queue them
//! - Reusable conversion and JPEG buffers, reallocated only on resolution
//!   change
//! - Lock-free atomics for statistics
//! - `multipart/x-mixed-replace` HTTP streaming and a minimal RTSP session
//!   server
//!
//! # Example
//!
//! ```no_run
//! use camcast::config::StreamControlState;
//! use camcast::convert::Rotation;
//! use camcast::nalu::CodecConfigCell;
//! use camcast::pipeline::StreamService;
//! use camcast::rtsp::RtspNalSink;
//!
//! let control = StreamControlState::default();
//! let mut service = StreamService::new(
//!     control,
//!     Rotation::Deg90,
//!     RtspNalSink::new(),
//!     CodecConfigCell::new(),
//! );
//! // ... let sink = service.start(); feed capture frames through sink
//! ```

pub mod channel;
pub mod config;
pub mod convert;
pub mod frame;
pub mod jpeg;
pub mod mjpeg;
pub mod nalu;
pub mod pipeline;
pub mod rtsp;
pub mod stats;

// Re-exports for convenience
pub use channel::{FrameBroadcastChannel, FrameReceiver};
pub use config::{Config, StreamControlState};
pub use convert::{FrameConverter, Rotation};
pub use frame::{CropRect, OwnedRawFrame, Plane, RawFrame};
pub use jpeg::JpegFrameEncoder;
pub use mjpeg::MjpegServer;
pub use nalu::{CodecConfig, CodecConfigCell, NaluExtractor};
pub use pipeline::{FrameSink, StreamService};
pub use rtsp::{RtspNalSink, RtspSessionServer};
pub use stats::{FpsTracker, PipelineStats};
