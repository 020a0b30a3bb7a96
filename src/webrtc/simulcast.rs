//! Simulcast video track
//!
//! One logical video track (one track ID, one stream ID) backed by an
//! ordered set of encoding layers. Each layer has its own write handle, so
//! pacing loops for different layers never contend with each other.
//!
//! ```text
//! video-low  loop ──> handle(rid-l) ──┐
//! video-mid  loop ──> handle(rid-m) ──┼──> RTCRtpSender (one m-line)
//! video-high loop ──> handle(rid-h) ──┘
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::VideoCodec;
use super::track::{SampleWriter, TrackDescriptor};
use super::transport::{TrackSender, TransportConnection};
use crate::error::{AppError, Result};
use crate::media::DecodedUnit;

/// Per-layer counters
#[derive(Debug, Default)]
pub struct LayerStats {
    units: AtomicU64,
    bytes: AtomicU64,
}

impl LayerStats {
    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Write handle for a single simulcast layer
///
/// Cheap to clone; every clone writes to the same layer.
#[derive(Clone)]
pub struct SimulcastLayerHandle {
    layer_id: Arc<str>,
    writer: Arc<dyn SampleWriter>,
    stats: Arc<LayerStats>,
}

impl SimulcastLayerHandle {
    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn stats(&self) -> &LayerStats {
        &self.stats
    }
}

#[async_trait]
impl SampleWriter for SimulcastLayerHandle {
    fn label(&self) -> &str {
        &self.layer_id
    }

    async fn write_unit(&self, unit: &DecodedUnit) -> Result<()> {
        self.writer.write_unit(unit).await?;
        self.stats.units.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes.fetch_add(unit.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Logical video track with multiple encoding layers
pub struct SimulcastTrack {
    codec: VideoCodec,
    track_id: String,
    stream_id: String,
    sender: Arc<dyn TrackSender>,
    /// Primary layer first, then layers in the order they were added
    layers: Vec<SimulcastLayerHandle>,
}

impl SimulcastTrack {
    /// Create the track on `connection` with its primary layer
    pub async fn register_primary_layer(
        connection: &dyn TransportConnection,
        codec: VideoCodec,
        track_id: impl Into<String>,
        stream_id: impl Into<String>,
        layer_id: impl Into<String>,
    ) -> Result<Self> {
        let descriptor =
            TrackDescriptor::simulcast_layer(codec, track_id, stream_id, layer_id);
        let registration = connection.add_track(&descriptor).await?;

        info!(
            "{} simulcast track {} registered (primary layer {})",
            codec,
            descriptor.track_id,
            descriptor.label()
        );

        let primary = SimulcastLayerHandle {
            layer_id: descriptor.label().into(),
            writer: registration.writer,
            stats: Arc::new(LayerStats::default()),
        };

        Ok(Self {
            codec,
            track_id: descriptor.track_id,
            stream_id: descriptor.stream_id,
            sender: registration.sender,
            layers: vec![primary],
        })
    }

    /// Attach another encoding layer to the primary sender
    pub async fn add_layer(&mut self, layer_id: impl Into<String>) -> Result<SimulcastLayerHandle> {
        let layer_id = layer_id.into();
        if self.layer(&layer_id).is_some() {
            return Err(AppError::DuplicateLayer(layer_id));
        }

        let descriptor = TrackDescriptor::simulcast_layer(
            self.codec,
            self.track_id.clone(),
            self.stream_id.clone(),
            layer_id,
        );
        let writer = self.sender.add_encoding_layer(&descriptor).await?;

        debug!(
            "Simulcast track {}: added layer {} ({} layers)",
            self.track_id,
            descriptor.label(),
            self.layers.len() + 1
        );

        let handle = SimulcastLayerHandle {
            layer_id: descriptor.label().into(),
            writer,
            stats: Arc::new(LayerStats::default()),
        };
        self.layers.push(handle.clone());
        Ok(handle)
    }

    /// Get the handle of a layer
    pub fn layer(&self, layer_id: &str) -> Option<SimulcastLayerHandle> {
        self.layers
            .iter()
            .find(|l| &*l.layer_id == layer_id)
            .cloned()
    }

    /// Handle of the layer established at creation
    pub fn primary(&self) -> SimulcastLayerHandle {
        self.layers[0].clone()
    }

    /// Layer handles, primary first
    pub fn layers(&self) -> &[SimulcastLayerHandle] {
        &self.layers
    }

    /// Layer identifiers, primary first
    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.layer_id())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Write a unit to one layer
    pub async fn write(&self, layer_id: &str, unit: &DecodedUnit) -> Result<()> {
        let layer = self
            .layers
            .iter()
            .find(|l| &*l.layer_id == layer_id)
            .ok_or_else(|| AppError::UnknownLayer(layer_id.to_string()))?;
        layer.write_unit(unit).await
    }
}
