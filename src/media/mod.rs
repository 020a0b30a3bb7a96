//! Container readers
//!
//! Pure parsers that turn an async byte stream into timed units:
//! - IVF (chunked video container, one frame per record)
//! - Ogg/Opus (paged audio container, granule positions at 48 kHz)
//!
//! Readers report end of stream as `Ok(None)`; malformed data is an
//! [`AppError::Parse`](crate::error::AppError::Parse).

pub mod ivf;
pub mod ogg;

use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use ivf::{IvfFileHeader, IvfFrameHeader, IvfReader};
pub use ogg::{OggPageHeader, OggReader, OpusIdHeader};

/// One payload + presentation duration pair extracted from a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedUnit {
    /// Encoded frame or audio page
    pub payload: Bytes,
    /// Timeline duration (zero is legal)
    pub duration: Duration,
}

impl DecodedUnit {
    pub fn new(payload: Bytes, duration: Duration) -> Self {
        Self { payload, duration }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
///
/// Unlike `read_exact`, a short count is returned instead of an error so
/// callers can tell a clean boundary (0) from a truncated record.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
