//! WebRTC peer connection for publishing

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpHeaderExtensionCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::sdp::extmap::{SDES_MID_URI, SDES_RTP_STREAM_ID_URI};

use super::config::WebRtcConfig;
use super::signaling::{ConnectionState, OfferExchange, SdpOffer};
use super::track::{LocalSampleTrack, SampleWriter, TrackDescriptor};
use super::transport::{TrackRegistration, TrackSender, TransportConnection};
use crate::error::{AppError, Result};

/// Publishing peer connection
pub struct WebRtcConnection {
    /// Connection ID (logs only)
    connection_id: String,
    /// WebRTC peer connection
    pc: Arc<RTCPeerConnection>,
    /// State receiver
    state_rx: watch::Receiver<ConnectionState>,
    /// Offer/answer exchange with the backend
    exchange: Arc<dyn OfferExchange>,
}

impl WebRtcConnection {
    /// Create a new peer connection
    pub async fn new(
        config: &WebRtcConfig,
        connection_id: String,
        exchange: Arc<dyn OfferExchange>,
    ) -> Result<Self> {
        // Create media engine
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        register_simulcast_extensions(&mut media_engine)?;

        // Create interceptor registry
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let state_tx = Arc::new(state_tx);

        let id = connection_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            let id = id.clone();

            Box::pin(async move {
                let new_state = match s {
                    RTCPeerConnectionState::New => ConnectionState::New,
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    _ => return,
                };

                if new_state == ConnectionState::Failed {
                    warn!("Peer {} connection state: {}", id, new_state);
                } else {
                    info!("Peer {} connection state: {}", id, new_state);
                }
                let _ = state_tx.send(new_state);
            })
        }));

        debug!("Peer {} created", connection_id);

        Ok(Self {
            connection_id,
            pc,
            state_rx,
            exchange,
        })
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

/// MID and RID header extensions; without them simulcast packets carry no RID
fn register_simulcast_extensions(media_engine: &mut MediaEngine) -> Result<()> {
    let extensions = [
        (SDES_MID_URI, RTPCodecType::Audio),
        (SDES_MID_URI, RTPCodecType::Video),
        (SDES_RTP_STREAM_ID_URI, RTPCodecType::Video),
    ];

    for (uri, kind) in extensions {
        media_engine
            .register_header_extension(
                RTCRtpHeaderExtensionCapability {
                    uri: uri.to_string(),
                },
                kind,
                None,
            )
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to register header extension {}: {}", uri, e))
            })?;
    }
    Ok(())
}

/// Read and discard RTCP so the interceptors (NACK, reports) keep running
fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>, label: String) {
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while sender.read(&mut rtcp_buf).await.is_ok() {}
        debug!("RTCP reader for {} stopped", label);
    });
}

#[async_trait]
impl TransportConnection for WebRtcConnection {
    async fn add_track(&self, descriptor: &TrackDescriptor) -> Result<TrackRegistration> {
        let track = LocalSampleTrack::new(descriptor);

        let sender = self
            .pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!(
                    "Failed to add track {}: {}",
                    descriptor.label(),
                    e
                ))
            })?;

        spawn_rtcp_drain(sender.clone(), descriptor.label().to_string());

        info!(
            "Peer {}: added {} track {} (stream {})",
            self.connection_id,
            descriptor.codec.mime_type(),
            descriptor.label(),
            descriptor.stream_id
        );

        Ok(TrackRegistration {
            sender: Arc::new(WebRtcSender { sender }),
            writer: Arc::new(track),
        })
    }

    async fn negotiate(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        // Gather every candidate up front, the exchange is a single request
        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::WebRtcError("No local description".to_string()))?;

        debug!(
            "Peer {}: offer ready ({} bytes)",
            self.connection_id,
            local.sdp.len()
        );

        let answer = self.exchange.exchange(SdpOffer::new(local.sdp)).await?;

        let remote = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| AppError::WebRtcError(format!("Invalid SDP answer: {}", e)))?;

        self.pc.set_remote_description(remote).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set remote description: {}", e))
        })?;

        info!(
            "Peer {}: negotiated (state {})",
            self.connection_id,
            self.state()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        info!("Peer {} closed", self.connection_id);
        Ok(())
    }
}

/// RTP sender of a registered track
pub struct WebRtcSender {
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl TrackSender for WebRtcSender {
    async fn add_encoding_layer(&self, descriptor: &TrackDescriptor) -> Result<Arc<dyn SampleWriter>> {
        let track = LocalSampleTrack::new(descriptor);

        self.sender
            .add_encoding(track.as_track_local())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!(
                    "Failed to add encoding {}: {}",
                    descriptor.label(),
                    e
                ))
            })?;

        debug!("Added encoding {} to track {}", descriptor.label(), descriptor.track_id);
        Ok(Arc::new(track))
    }
}
