//! Track descriptors and sample writers
//!
//! A [`SampleWriter`] is the write-only handle a pacing loop feeds. The
//! WebRTC implementation wraps `TrackLocalStaticSample`, whose built-in
//! payloader handles RTP packetization.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::config::VideoCodec;
use crate::error::{AppError, Result};
use crate::media::DecodedUnit;

/// Opus clock rate
pub const OPUS_CLOCK_RATE: u32 = 48000;
/// Video clock rate (always 90kHz)
pub const VIDEO_CLOCK_RATE: u32 = 90000;

/// Codec of a registered track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCodec {
    Opus,
    Video(VideoCodec),
}

impl TrackCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            TrackCodec::Opus => "audio/opus",
            TrackCodec::Video(codec) => codec.mime_type(),
        }
    }

    /// Create RTP codec capability
    pub fn capability(&self) -> RTCRtpCodecCapability {
        match self {
            TrackCodec::Opus => RTCRtpCodecCapability {
                mime_type: self.mime_type().to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            TrackCodec::Video(codec) => RTCRtpCodecCapability {
                mime_type: codec.mime_type().to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                channels: 0,
                sdp_fmtp_line: codec.sdp_fmtp().to_string(),
                rtcp_feedback: vec![],
            },
        }
    }
}

/// Everything the transport needs to create one local track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub codec: TrackCodec,
    /// Track ID (shared by all simulcast layers)
    pub track_id: String,
    /// Stream ID / media grouping
    pub stream_id: String,
    /// RTP stream ID, set for simulcast layers
    pub rid: Option<String>,
}

impl TrackDescriptor {
    pub fn audio(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            codec: TrackCodec::Opus,
            track_id: track_id.into(),
            stream_id: stream_id.into(),
            rid: None,
        }
    }

    pub fn simulcast_layer(
        codec: VideoCodec,
        track_id: impl Into<String>,
        stream_id: impl Into<String>,
        rid: impl Into<String>,
    ) -> Self {
        Self {
            codec: TrackCodec::Video(codec),
            track_id: track_id.into(),
            stream_id: stream_id.into(),
            rid: Some(rid.into()),
        }
    }

    /// Label for logs and errors: the RID when present, else the track ID
    pub fn label(&self) -> &str {
        self.rid.as_deref().unwrap_or(&self.track_id)
    }
}

/// Write-only handle for one physical stream
///
/// Implementations must be safe to call concurrently with writers of other
/// tracks or layers; one writer is only ever driven by one pacing loop.
#[async_trait]
pub trait SampleWriter: Send + Sync {
    /// Label used in logs and errors (track ID or RID)
    fn label(&self) -> &str;

    /// Hand one unit to the transport
    async fn write_unit(&self, unit: &DecodedUnit) -> Result<()>;
}

/// `TrackLocalStaticSample` backed writer
pub struct LocalSampleTrack {
    track: Arc<TrackLocalStaticSample>,
    label: String,
}

impl LocalSampleTrack {
    /// Create a new local track from its descriptor
    pub fn new(descriptor: &TrackDescriptor) -> Self {
        let capability = descriptor.codec.capability();

        let track = match &descriptor.rid {
            Some(rid) => TrackLocalStaticSample::new_with_rid(
                capability,
                descriptor.track_id.clone(),
                rid.clone(),
                descriptor.stream_id.clone(),
            ),
            None => TrackLocalStaticSample::new(
                capability,
                descriptor.track_id.clone(),
                descriptor.stream_id.clone(),
            ),
        };

        Self {
            track: Arc::new(track),
            label: descriptor.label().to_string(),
        }
    }

    /// Get track as TrackLocal for peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }
}

#[async_trait]
impl SampleWriter for LocalSampleTrack {
    fn label(&self) -> &str {
        &self.label
    }

    async fn write_unit(&self, unit: &DecodedUnit) -> Result<()> {
        let sample = Sample {
            data: unit.payload.clone(),
            duration: unit.duration,
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AppError::TransportWrite {
                track: self.label.clone(),
                reason: e.to_string(),
            })?;

        trace!("{}: wrote {} bytes", self.label, unit.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_audio_capability() {
        let cap = TrackCodec::Opus.capability();
        assert_eq!(cap.mime_type, "audio/opus");
        assert_eq!(cap.clock_rate, 48000);
        assert_eq!(cap.channels, 2);
    }

    #[test]
    fn test_video_capability() {
        let cap = TrackCodec::Video(VideoCodec::VP8).capability();
        assert_eq!(cap.mime_type, "video/VP8");
        assert_eq!(cap.clock_rate, 90000);
        assert!(cap.sdp_fmtp_line.is_empty());
    }

    #[test]
    fn test_descriptor_label() {
        let audio = TrackDescriptor::audio("tid-audio-x", "sid-audio-x");
        assert_eq!(audio.label(), "tid-audio-x");

        let layer = TrackDescriptor::simulcast_layer(VideoCodec::VP8, "video-x", "sid-video-x", "rid-l-x");
        assert_eq!(layer.label(), "rid-l-x");
    }

    #[tokio::test]
    async fn test_unbound_local_track_accepts_samples() {
        // Without a bound peer the static sample track drops samples silently
        let track = LocalSampleTrack::new(&TrackDescriptor::audio("tid", "sid"));
        assert_eq!(track.label(), "tid");
        let unit = DecodedUnit::new(Bytes::from_static(b"opus"), Duration::from_millis(20));
        track.write_unit(&unit).await.unwrap();
    }
}
