pub mod capture;
pub mod encode;
pub mod endpoint;
pub mod pipeline;
pub mod session;
pub mod upload;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{Frame, FrameSource};
pub use encode::{EncodedPayload, EncodingError, FrameEncoder};
pub use endpoint::{EndpointConfig, EndpointStore};
pub use pipeline::{Admission, FrameGate, Pipeline, Step};
pub use session::Session;
pub use upload::{LivenessTracker, Outcome, UploadClient, UploadError};

/// Endpoint used when nothing has been persisted yet
pub const DEFAULT_ENDPOINT: &str = "http://192.168.125.160:5000/video_feed";

/// Configuration errors, raised at startup or on reconfiguration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("endpoint address is empty")]
    EmptyEndpoint,
    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("target fps must be greater than zero")]
    ZeroFps,
    #[error("jpeg quality {0} outside 1..=100")]
    Quality(u8),
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is malformed: {reason}")]
    State { path: PathBuf, reason: String },
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub encode: EncodeConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 device path, only used with the `v4l2` feature
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Target sampling rate; the gate admits at most this many frames per second
    pub fps: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// JPEG quality, 1..=100
    pub quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Used when the state file holds no endpoint
    pub default_endpoint: String,
    /// Where the last user-chosen endpoint is persisted
    pub state_file: PathBuf,
    pub worker_threads: usize,
    /// 0 leaves the transport default in place
    pub request_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 15,
            buffer_count: 4,
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_endpoint: DEFAULT_ENDPOINT.into(),
            state_file: PathBuf::from("uplink-state.toml"),
            worker_threads: 2,
            request_timeout_ms: 0,
        }
    }
}

impl Config {
    /// Layer defaults, an optional toml file and `UPLINK__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("UPLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.fps == 0 {
            return Err(ConfigError::ZeroFps);
        }
        if !(1..=100).contains(&self.encode.quality) {
            return Err(ConfigError::Quality(self.encode.quality));
        }
        Ok(())
    }
}

impl CaptureConfig {
    /// Minimum spacing between admitted frames, truncated to whole milliseconds
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

impl UploadConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}
