pub mod capture;
pub mod pipeline;
pub mod processor;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use color_eyre::Result;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSource, SessionState, SourceMode, SourceStatus};
pub use pipeline::ProcessingSession;

/// Prefix for environment overrides, e.g. `EDGEFRAME__CAPTURE__MODE=live`
pub const ENV_PREFIX: &str = "EDGEFRAME";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: SourceMode,
    /// Preferred camera resolution; mock frames use it too
    pub target_width: u32,
    pub target_height: u32,
    pub mock_period_ms: u64,
    /// Buffers held by the image reader
    pub max_images: usize,
    /// Upper bound on how long `close()` waits for the worker
    pub close_timeout_ms: u64,
    pub worker_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fps_window_ms: u64,
    /// Demo run length; 0 runs until interrupted
    pub run_for_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Mock,
            target_width: 640,
            target_height: 480,
            mock_period_ms: 100, // 10 fps
            max_images: 2,
            close_timeout_ms: 2000,
            worker_name: "CameraBackground".into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps_window_ms: 1000,
            run_for_secs: 0,
        }
    }
}

impl CaptureConfig {
    pub fn mock_period(&self) -> Duration {
        Duration::from_millis(self.mock_period_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn fps_window(&self) -> Duration {
        Duration::from_millis(self.fps_window_ms)
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then `EDGEFRAME__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
