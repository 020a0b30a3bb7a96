//! Publish session setup: naming, source files and track registration

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::webrtc::config::VideoCodec;
use crate::webrtc::simulcast::{SimulcastLayerHandle, SimulcastTrack};
use crate::webrtc::track::{SampleWriter, TrackDescriptor};
use crate::webrtc::transport::{SessionBootstrap, TransportConnection};

/// Simulcast video layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoLayer {
    Low,
    Mid,
    High,
}

impl VideoLayer {
    /// Registration order; the first entry is the primary layer
    pub const ALL: [VideoLayer; 3] = [VideoLayer::Low, VideoLayer::Mid, VideoLayer::High];

    /// Name of the pacing task feeding this layer
    pub fn task_name(&self) -> &'static str {
        match self {
            VideoLayer::Low => "video-low",
            VideoLayer::Mid => "video-mid",
            VideoLayer::High => "video-high",
        }
    }

    fn rid_prefix(&self) -> &'static str {
        match self {
            VideoLayer::Low => "rid-l-",
            VideoLayer::Mid => "rid-m-",
            VideoLayer::High => "rid-h-",
        }
    }

    /// Source file suffix (vertical resolution)
    fn file_suffix(&self) -> &'static str {
        match self {
            VideoLayer::Low => "240.ivf",
            VideoLayer::Mid => "360.ivf",
            VideoLayer::High => "480.ivf",
        }
    }
}

/// Task name of the audio loop
pub const AUDIO_TASK: &str = "audio";

/// Track, stream and layer identifiers derived from the stream name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNames {
    pub name: String,
    pub audio_stream_id: String,
    pub audio_track_id: String,
    pub video_stream_id: String,
    pub video_track_id: String,
}

impl StreamNames {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            audio_stream_id: format!("sid-audio-{}", name),
            audio_track_id: format!("tid-audio-{}", name),
            video_stream_id: format!("sid-video-{}", name),
            video_track_id: format!("video-{}", name),
        }
    }

    /// RID of a simulcast layer
    pub fn rid(&self, layer: VideoLayer) -> String {
        format!("{}{}", layer.rid_prefix(), self.name)
    }

    /// Sub-stream IDs announced on publish (audio first)
    pub fn stream_ids(&self) -> Vec<String> {
        vec![self.audio_stream_id.clone(), self.video_stream_id.clone()]
    }
}

/// Source files for one cycle, derived from a path prefix `P`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFiles {
    /// `P.ogg`
    pub audio: PathBuf,
    /// `P240.ivf`, `P360.ivf`, `P480.ivf`
    pub video: [PathBuf; 3],
}

impl SourceFiles {
    pub fn from_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut path = OsString::from(prefix.as_os_str());
            path.push(suffix);
            PathBuf::from(path)
        };

        Self {
            audio: with_suffix(".ogg"),
            video: VideoLayer::ALL.map(|layer| with_suffix(layer.file_suffix())),
        }
    }

    pub fn video(&self, layer: VideoLayer) -> &Path {
        let index = match layer {
            VideoLayer::Low => 0,
            VideoLayer::Mid => 1,
            VideoLayer::High => 2,
        };
        &self.video[index]
    }
}

/// One negotiated connection with its audio track and simulcast video track
pub struct PublishSession {
    connection: Arc<dyn TransportConnection>,
    audio: Arc<dyn SampleWriter>,
    video: SimulcastTrack,
}

impl PublishSession {
    /// Connect, publish, register every track and negotiate
    pub async fn establish<B: SessionBootstrap>(
        bootstrap: &B,
        address: &str,
        names: &StreamNames,
        codec: VideoCodec,
    ) -> Result<Self> {
        let session = bootstrap.connect(address).await?;
        let connection = bootstrap
            .publish(&session, &names.name, &names.stream_ids())
            .await?;
        info!("Publishing stream '{}' via {}", names.name, address);

        match Self::register(connection.clone(), names, codec).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!("Failed to close connection after setup error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn register(
        connection: Arc<dyn TransportConnection>,
        names: &StreamNames,
        codec: VideoCodec,
    ) -> Result<Self> {
        let audio = connection
            .add_track(&TrackDescriptor::audio(
                names.audio_track_id.clone(),
                names.audio_stream_id.clone(),
            ))
            .await?
            .writer;

        let [primary, rest @ ..] = VideoLayer::ALL;
        let mut video = SimulcastTrack::register_primary_layer(
            connection.as_ref(),
            codec,
            names.video_track_id.clone(),
            names.video_stream_id.clone(),
            names.rid(primary),
        )
        .await?;
        for layer in rest {
            video.add_layer(names.rid(layer)).await?;
        }

        connection.negotiate().await?;
        debug!(
            "Session ready: audio {}, video {} with {} layers",
            audio.label(),
            video.track_id(),
            video.layer_count()
        );

        Ok(Self {
            connection,
            audio,
            video,
        })
    }

    pub fn audio(&self) -> Arc<dyn SampleWriter> {
        self.audio.clone()
    }

    pub fn video(&self) -> &SimulcastTrack {
        &self.video
    }

    /// Write handle of one video layer
    pub fn layer(&self, names: &StreamNames, layer: VideoLayer) -> Result<SimulcastLayerHandle> {
        let rid = names.rid(layer);
        self.video.layer(&rid).ok_or(AppError::UnknownLayer(rid))
    }

    /// Write handles of every video layer, in [`VideoLayer::ALL`] order
    pub fn layer_handles(&self, names: &StreamNames) -> Result<Vec<(VideoLayer, SimulcastLayerHandle)>> {
        VideoLayer::ALL
            .into_iter()
            .map(|layer| Ok((layer, self.layer(names, layer)?)))
            .collect()
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}
