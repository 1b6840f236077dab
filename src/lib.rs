pub mod capture;
pub mod pipeline;
pub mod server;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{FrameBuffer, PixelFormat};
pub use pipeline::{FramePool, LatestFrame};

/// Environment variable prefix, e.g. `RTSNAP__CAPTURE__URL`
pub const ENV_PREFIX: &str = "RTSNAP";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub url: String,
    pub retry: RetryConfig,
    pub read_timeout_ms: u64, // No frame for this long counts as a read failure
    pub latency_ms: u32,      // RTSP jitter buffer
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
    pub quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                url: "rtsp://rtsp.jeosgram.io:8554/video/camera".into(),
                retry: RetryConfig {
                    attempts: 10,
                    delay_ms: 2000,
                },
                read_timeout_ms: 5000,
                latency_ms: 200,
            },
            server: ServerConfig {
                addr: "0.0.0.0:8080".into(),
                quality: 90,
            },
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `RTSNAP__*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.url.trim().is_empty() {
            return Err(ConfigError::Invalid("capture.url must not be empty".into()));
        }
        if self.capture.retry.attempts == 0 {
            return Err(ConfigError::Invalid("capture.retry.attempts must be at least 1".into()));
        }
        if !(1..=100).contains(&self.server.quality) {
            return Err(ConfigError::Invalid(format!(
                "server.quality must be within 1..=100, got {}",
                self.server.quality
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
url = "pattern://320x240"

[capture.retry]
attempts = 3

[server]
addr = "127.0.0.1:9000"
quality = 75
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.url, "pattern://320x240");
        assert_eq!(config.capture.retry.attempts, 3);
        assert_eq!(config.capture.retry.delay_ms, 2000);
        assert_eq!(config.server.addr, "127.0.0.1:9000");
        assert_eq!(config.server.quality, 75);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.server.quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.retry.attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.url = "  ".into();
        assert!(config.validate().is_err());
    }
}
