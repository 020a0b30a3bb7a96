//! WebRTC configuration

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// WebRTC configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

impl WebRtcConfig {
    /// Build the ICE server list for a peer connection
    ///
    /// TURN entries without credentials are skipped (webrtc-rs requires them).
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.turn_servers {
            if turn.username.is_empty() || turn.credential.is_empty() {
                tracing::warn!(
                    "Skipping TURN server {:?} - credentials required but missing",
                    turn.urls
                );
                continue;
            }
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

/// Video codec carried by the IVF sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    VP8,
    VP9,
    H264,
}

impl VideoCodec {
    /// Get MIME type for SDP
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
            VideoCodec::H264 => "video/H264",
        }
    }

    /// Get SDP fmtp parameters
    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
        }
    }

    /// IVF FourCC written by encoders for this codec
    pub fn ivf_fourcc(&self) -> &'static str {
        match self {
            VideoCodec::VP8 => "VP80",
            VideoCodec::VP9 => "VP90",
            VideoCodec::H264 => "H264",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::VP8 => write!(f, "VP8"),
            VideoCodec::VP9 => write!(f, "VP9"),
            VideoCodec::H264 => write!(f, "H.264"),
        }
    }
}
