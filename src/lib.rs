//! synth-pub - Synthetic WebRTC publisher
//!
//! Replays pre-recorded IVF video and Ogg/Opus audio files into a WebRTC
//! session in real time, as a stand-in for a live encoder when testing a
//! streaming backend. Video is published as a three-layer simulcast track.

pub mod config;
pub mod error;
pub mod media;
pub mod pacing;
pub mod publish;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
