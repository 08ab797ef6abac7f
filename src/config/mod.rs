//! Runtime configuration for the pipeline entry and its connection driver.
//!
//! Loaded from TOML or YAML via `serde`, layering typed wrapper structs
//! (`ByteSize`, `Duration`) over plain `Deserialize` fields instead of
//! raw integers.

mod byte_size;
mod duration;

pub use byte_size::ByteSize;
pub use duration::Duration;

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::errors::Error;

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:6432".parse().unwrap()
}

fn default_max_recompile_attempts() -> u32 {
    3
}

fn default_output_buffer_low_watermark() -> ByteSize {
    ByteSize::from_kb(8)
}

fn default_output_buffer_high_watermark() -> ByteSize {
    ByteSize::from_mb(1)
}

fn default_max_blob_size() -> ByteSize {
    ByteSize::from_mb(16)
}

/// The runtime-tunable knobs: recompile bound, output-buffer watermarks,
/// and the per-value blob size cap.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Bound on stale-plan recompile retries before giving up.
    #[serde(default = "default_max_recompile_attempts")]
    pub max_recompile_attempts: u32,

    /// Below this, the output buffer is considered safe to keep filling
    /// without a proactive flush.
    #[serde(default = "default_output_buffer_low_watermark")]
    pub output_buffer_low_watermark: ByteSize,

    /// Above this, any atomic write is refused until the buffer is flushed
    /// (`would_overflow`, `WireError::BufferOverflow`).
    #[serde(default = "default_output_buffer_high_watermark")]
    pub output_buffer_high_watermark: ByteSize,

    /// A single column value larger than this aborts the row.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: ByteSize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            listen_addr: default_listen_addr(),
            max_recompile_attempts: default_max_recompile_attempts(),
            output_buffer_low_watermark: default_output_buffer_low_watermark(),
            output_buffer_high_watermark: default_output_buffer_high_watermark(),
            max_blob_size: default_max_blob_size(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, Error> {
        serde_yaml::from_str(s).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("reading config {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PipelineConfig::default();
        assert!(cfg.max_recompile_attempts >= 1);
        assert!(cfg.output_buffer_high_watermark.as_bytes() > cfg.output_buffer_low_watermark.as_bytes());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = PipelineConfig::from_toml_str("max_recompile_attempts = 5\n").unwrap();
        assert_eq!(cfg.max_recompile_attempts, 5);
        assert_eq!(cfg.listen_addr, default_listen_addr());
    }
}
