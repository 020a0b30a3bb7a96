//! WebRTC transport for the publisher
//!
//! This module provides:
//! - Opus audio track and VP8/VP9/H264 simulcast video track
//! - Transport seams (`TransportConnection`, `TrackSender`, `SessionBootstrap`)
//! - HTTP offer/answer signaling
//!
//! Architecture:
//! ```text
//! pacing loops (audio, video-low, video-mid, video-high)
//!        |
//!        v
//! SampleWriter handles (audio track, SimulcastTrack layers)
//!        |
//!        v
//! TrackLocalStaticSample (RTP packetization)
//!        |
//!        v
//! WebRTC PeerConnection
//!        |
//! Backend / SFU <------ SDP Exchange (POST /publish) ------ HttpSignalingBootstrap
//! ```

pub mod config;
pub mod peer;
pub mod signaling;
pub mod simulcast;
pub mod track;
pub mod transport;

pub use config::{TurnServer, VideoCodec, WebRtcConfig};
pub use peer::{WebRtcConnection, WebRtcSender};
pub use signaling::{
    ConnectionState, HttpOfferExchange, HttpSignalingBootstrap, OfferExchange, SdpAnswer,
    SdpOffer, SignalingSession,
};
pub use simulcast::{LayerStats, SimulcastLayerHandle, SimulcastTrack};
pub use track::{LocalSampleTrack, SampleWriter, TrackCodec, TrackDescriptor};
pub use transport::{SessionBootstrap, TrackRegistration, TrackSender, TransportConnection};
