//! Transport seams
//!
//! The orchestrator only talks to these traits. The shipped implementations
//! are [`WebRtcConnection`](super::peer::WebRtcConnection) and
//! [`HttpSignalingBootstrap`](super::signaling::HttpSignalingBootstrap).

use async_trait::async_trait;
use std::sync::Arc;

use super::track::{SampleWriter, TrackDescriptor};
use crate::error::Result;

/// Result of registering a track on a connection
#[derive(Clone)]
pub struct TrackRegistration {
    /// Sender owning the track; more encodings can be attached to it
    pub sender: Arc<dyn TrackSender>,
    /// Write handle of the track itself
    pub writer: Arc<dyn SampleWriter>,
}

/// A negotiated (or negotiable) transport connection
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Create a local track from the descriptor and attach it to the connection
    async fn add_track(&self, descriptor: &TrackDescriptor) -> Result<TrackRegistration>;

    /// Run the offer/answer exchange once every track is registered
    async fn negotiate(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Sender of a registered track
#[async_trait]
pub trait TrackSender: Send + Sync {
    /// Attach an additional encoding (simulcast layer) to this sender
    async fn add_encoding_layer(&self, descriptor: &TrackDescriptor) -> Result<Arc<dyn SampleWriter>>;
}

/// Session negotiation collaborator
#[async_trait]
pub trait SessionBootstrap: Send + Sync {
    type Session: Send + Sync;

    /// Open a session with the backend at `address`
    async fn connect(&self, address: &str) -> Result<Self::Session>;

    /// Start publishing `stream_name` with the given sub-stream IDs
    async fn publish(
        &self,
        session: &Self::Session,
        stream_name: &str,
        stream_ids: &[String],
    ) -> Result<Arc<dyn TransportConnection>>;
}
