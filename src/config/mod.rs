//! Publisher configuration
//!
//! Settings come from [`PublishConfig::default`], optionally overlaid by a
//! JSON file; command line flags are applied on top by the binary.

mod schema;

pub use schema::{FailurePolicy, PublishConfig};

use std::path::Path;
use tracing::debug;

use crate::error::{AppError, Result};

/// Load a configuration file (JSON). Missing keys keep their defaults.
pub async fn load(path: &Path) -> Result<PublishConfig> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let config: PublishConfig = serde_json::from_str(&text)?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("publish.json");
        std::fs::write(
            &path,
            r#"{"address":"http://sfu:7000","video_duration":{"mode":"timebase"},"webrtc":{"stun_servers":["stun:stun.example.com:3478"]}}"#,
        )
        .unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config.address, "http://sfu:7000");
        assert_eq!(config.video_duration, crate::pacing::VideoDurationPolicy::Timebase);
        assert_eq!(config.webrtc.stun_servers.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
