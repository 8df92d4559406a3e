//! Configuration: TOML file settings and live-updating stream control state

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub video: VideoConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP port for the MJPEG endpoint
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// RTSP listener port
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,

    /// RTSP presentation path
    #[serde(default = "default_rtsp_path")]
    pub rtsp_path: String,

    /// Bind address for both listeners
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            rtsp_port: default_rtsp_port(),
            rtsp_path: default_rtsp_path(),
            bind: default_bind(),
        }
    }
}

/// Initial video pipeline settings. These seed the live control state and
/// can be changed at runtime through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Target frames per second (clamped to 5-120)
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// JPEG quality (clamped to 1-100)
    #[serde(default = "default_quality")]
    pub quality: u32,

    /// Rotation in degrees: 0, 90, 180 or 270
    #[serde(default)]
    pub rotation: u32,

    /// H.264 target bitrate in Mbps (clamped to 1-12)
    #[serde(default = "default_bitrate")]
    pub bitrate_mbps: u32,

    /// Lens selection: "front" or "back"
    #[serde(default)]
    pub lens: LensFacing,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            quality: default_quality(),
            rotation: 0,
            bitrate_mbps: default_bitrate(),
            lens: LensFacing::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    #[default]
    Front,
    Back,
}

fn default_http_port() -> u16 {
    8080
}
fn default_rtsp_port() -> u16 {
    8554
}
fn default_rtsp_path() -> String {
    "/live".to_string()
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_quality() -> u32 {
    50
}
fn default_bitrate() -> u32 {
    5
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.video;
        if v.width == 0 || v.height == 0 {
            return Err(ConfigError::Invalid(
                "width and height must be > 0".to_string(),
            ));
        }
        if v.width % 2 != 0 || v.height % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "width and height must be even for 4:2:0 chroma, got {}x{}",
                v.width, v.height
            )));
        }
        if !matches!(v.rotation % 360, 0 | 90 | 180 | 270) {
            return Err(ConfigError::Invalid(format!(
                "rotation must be one of 0/90/180/270, got {}",
                v.rotation
            )));
        }
        if !self.server.rtsp_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "rtsp_path must start with '/', got {:?}",
                self.server.rtsp_path
            )));
        }
        Ok(())
    }
}

/// One consistent view of the control values, cloned out as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlValues {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub target_fps: u32,
    pub lens: LensFacing,
    pub bitrate_mbps: u32,
    pub zoom: f32,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_quality() as u8,
            target_fps: default_fps(),
            lens: LensFacing::Front,
            bitrate_mbps: default_bitrate(),
            zoom: 1.0,
        }
    }
}

/// Process-wide mutable control state, written by the control layer and read
/// by the producer.
///
/// Reads are whole-value snapshots; writers clamp out-of-range values at the
/// boundary instead of rejecting them. Cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct StreamControlState {
    inner: Arc<RwLock<ControlValues>>,
}

impl StreamControlState {
    pub fn new(initial: ControlValues) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Seeds the control state from the file configuration, clamping as it
    /// goes.
    pub fn from_config(video: &VideoConfig) -> Self {
        let state = Self::default();
        {
            let mut v = state.inner.write().expect("control lock");
            v.width = video.width;
            v.height = video.height;
            v.jpeg_quality = video.quality.clamp(1, 100) as u8;
            v.target_fps = video.fps.clamp(5, 120);
            v.bitrate_mbps = video.bitrate_mbps.clamp(1, 12);
            v.lens = video.lens;
        }
        state
    }

    /// Atomic whole-value snapshot, never a partially updated view.
    pub fn snapshot(&self) -> ControlValues {
        self.inner.read().expect("control lock").clone()
    }

    pub fn set_resolution(&self, width: u32, height: u32) {
        let mut v = self.inner.write().expect("control lock");
        v.width = width;
        v.height = height;
    }

    /// Quality is clamped to 1-100.
    pub fn set_jpeg_quality(&self, quality: i32) {
        self.inner.write().expect("control lock").jpeg_quality = quality.clamp(1, 100) as u8;
    }

    /// Target fps is clamped to 5-120.
    pub fn set_target_fps(&self, fps: i32) {
        self.inner.write().expect("control lock").target_fps = fps.clamp(5, 120) as u32;
    }

    /// Bitrate is clamped to 1-12 Mbps.
    pub fn set_bitrate_mbps(&self, mbps: i32) {
        self.inner.write().expect("control lock").bitrate_mbps = mbps.clamp(1, 12) as u32;
    }

    pub fn set_lens(&self, lens: LensFacing) {
        self.inner.write().expect("control lock").lens = lens;
    }

    /// Zoom ratio, at least 1.0.
    pub fn set_zoom(&self, zoom: f32) {
        self.inner.write().expect("control lock").zoom = zoom.max(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.rtsp_port, 8554);
        assert_eq!(config.server.rtsp_path, "/live");
        assert_eq!(config.video.width, 640);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
[server]
http_port = 9090
rtsp_port = 9554
rtsp_path = "/cam"

[video]
width = 1280
height = 720
fps = 60
quality = 80
rotation = 90
bitrate_mbps = 8
lens = "back"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.http_port, 9090);
        assert_eq!(config.video.width, 1280);
        assert_eq!(config.video.rotation, 90);
        assert_eq!(config.video.lens, LensFacing::Back);
    }

    #[test]
    fn odd_dimensions_rejected() {
        let result = Config::parse("[video]\nwidth = 641\nheight = 480\n");
        assert!(result.is_err());
    }

    #[test]
    fn bad_rotation_rejected() {
        let result = Config::parse("[video]\nrotation = 45\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camcast.toml");
        std::fs::write(&path, "[server]\nhttp_port = 8088\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.http_port, 8088);
        assert_eq!(config.server.rtsp_port, 8554);
    }

    #[test]
    fn quality_clamps_at_boundary() {
        let control = StreamControlState::default();
        control.set_jpeg_quality(500);
        assert_eq!(control.snapshot().jpeg_quality, 100);
        control.set_jpeg_quality(-5);
        assert_eq!(control.snapshot().jpeg_quality, 1);
    }

    #[test]
    fn fps_and_bitrate_clamp() {
        let control = StreamControlState::default();
        control.set_target_fps(1000);
        control.set_bitrate_mbps(0);
        let v = control.snapshot();
        assert_eq!(v.target_fps, 120);
        assert_eq!(v.bitrate_mbps, 1);

        control.set_target_fps(1);
        control.set_bitrate_mbps(99);
        let v = control.snapshot();
        assert_eq!(v.target_fps, 5);
        assert_eq!(v.bitrate_mbps, 12);
    }

    #[test]
    fn snapshot_is_whole_value() {
        let control = StreamControlState::default();
        let before = control.snapshot();
        control.set_resolution(1920, 1080);
        control.set_jpeg_quality(90);
        let after = control.snapshot();

        // The earlier snapshot is unaffected by later writes.
        assert_eq!(before.width, 640);
        assert_eq!(after.width, 1920);
        assert_eq!(after.jpeg_quality, 90);
    }

    #[test]
    fn seeded_from_config_clamps() {
        let video = VideoConfig {
            quality: 300,
            fps: 2,
            bitrate_mbps: 50,
            ..VideoConfig::default()
        };
        let control = StreamControlState::from_config(&video);
        let v = control.snapshot();
        assert_eq!(v.jpeg_quality, 100);
        assert_eq!(v.target_fps, 5);
        assert_eq!(v.bitrate_mbps, 12);
    }
}
