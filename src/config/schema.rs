use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::media::ivf::DEFAULT_MAX_FRAME_SIZE;
use crate::pacing::VideoDurationPolicy;
use crate::webrtc::config::{VideoCodec, WebRtcConfig};

/// Main publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Signaling server base URL
    pub address: String,
    /// Stream name announced to the backend
    pub name: String,
    /// Source file prefix `P` (reads P240.ivf, P360.ivf, P480.ivf, P.ogg)
    pub file_prefix: PathBuf,
    /// Restart the whole cycle after it finishes
    pub loop_forever: bool,
    /// Stop after this many cycles (unbounded when unset)
    pub max_cycles: Option<u64>,
    /// Delay before retrying a failed cycle in loop mode
    pub retry_delay_ms: u64,
    /// Codec of the IVF sources
    pub video_codec: VideoCodec,
    /// What happens to sibling tasks when one fails
    pub failure_policy: FailurePolicy,
    /// Duration attached to video units
    pub video_duration: VideoDurationPolicy,
    /// Verify Ogg page checksums
    pub verify_ogg_checksum: bool,
    /// Largest accepted IVF frame
    pub max_frame_size: usize,
    /// WebRTC settings
    pub webrtc: WebRtcConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8080".to_string(),
            name: "test".to_string(),
            file_prefix: PathBuf::from("test/jing"),
            loop_forever: false,
            max_cycles: None,
            retry_delay_ms: 1000,
            video_codec: VideoCodec::VP8,
            failure_policy: FailurePolicy::Drain,
            video_duration: VideoDurationPolicy::default(),
            verify_ogg_checksum: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            webrtc: WebRtcConfig::default(),
        }
    }
}

impl PublishConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Reject settings that cannot produce a valid cycle
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(AppError::Config("address must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::Config("stream name must not be empty".to_string()));
        }
        if self.file_prefix.as_os_str().is_empty() {
            return Err(AppError::Config("file prefix must not be empty".to_string()));
        }
        if self.max_cycles == Some(0) {
            return Err(AppError::Config("max_cycles must be at least 1".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(AppError::Config("max_frame_size must be positive".to_string()));
        }
        Ok(())
    }
}

/// Reaction of a publish cycle to a failed task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Let the other tasks run to their own end
    #[default]
    Drain,
    /// Cancel the other tasks on the first failure
    FailFast,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PublishConfig::default();
        config.validate().unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Drain);
        assert_eq!(config.video_duration, VideoDurationPolicy::Constant { millis: 1000 });
        assert!(config.verify_ogg_checksum);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PublishConfig = serde_json::from_str(
            r#"{"name":"jing","loop_forever":true,"failure_policy":"fail-fast"}"#,
        )
        .unwrap();
        assert_eq!(config.name, "jing");
        assert!(config.loop_forever);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.file_prefix, PathBuf::from("test/jing"));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = PublishConfig {
            name: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_cycles() {
        let config = PublishConfig {
            max_cycles: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
