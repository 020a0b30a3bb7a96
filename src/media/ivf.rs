//! IVF video container reader
//!
//! Layout (little-endian):
//!
//! ```text
//! file header (32 bytes)
//!   0  "DKIF"
//!   4  version (u16, always 0)
//!   6  header length (u16)
//!   8  FourCC ("VP80", "VP90", ...)
//!  12  width (u16), 14 height (u16)
//!  16  timebase denominator (u32)
//!  20  timebase numerator (u32)
//!  24  frame count (u32), 28 reserved
//! frame header (12 bytes)
//!   0  frame size (u32)
//!   4  timestamp (u64)
//! ```

use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::debug;

use super::read_full;
use crate::error::{AppError, Result};

const CONTAINER: &str = "ivf";

/// IVF file signature
pub const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
/// File header length in bytes
pub const IVF_FILE_HEADER_LEN: usize = 32;
/// Frame header length in bytes
pub const IVF_FRAME_HEADER_LEN: usize = 12;
/// Default guard for a single frame's size
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// IVF file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFileHeader {
    pub version: u16,
    pub header_len: u16,
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_denominator: u32,
    pub timebase_numerator: u32,
    pub frame_count: u32,
}

impl IvfFileHeader {
    /// FourCC as text (e.g. "VP80")
    pub fn fourcc_str(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).into_owned()
    }

    /// Nominal per-frame interval, `num / den` seconds
    pub fn frame_interval(&self) -> Duration {
        let nanos = 1_000_000_000u128 * self.timebase_numerator as u128
            / self.timebase_denominator.max(1) as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    fn parse(mut buf: &[u8]) -> Result<Self> {
        if &buf[..4] != IVF_SIGNATURE {
            return Err(AppError::parse(CONTAINER, "signature mismatch"));
        }
        buf.advance(4);

        let version = buf.get_u16_le();
        if version != 0 {
            return Err(AppError::parse(
                CONTAINER,
                format!("unknown IVF version {}", version),
            ));
        }

        let header_len = buf.get_u16_le();
        if (header_len as usize) < IVF_FILE_HEADER_LEN {
            return Err(AppError::parse(
                CONTAINER,
                format!("header length {} is shorter than {}", header_len, IVF_FILE_HEADER_LEN),
            ));
        }

        let mut fourcc = [0u8; 4];
        buf.copy_to_slice(&mut fourcc);
        let width = buf.get_u16_le();
        let height = buf.get_u16_le();
        let timebase_denominator = buf.get_u32_le();
        let timebase_numerator = buf.get_u32_le();
        let frame_count = buf.get_u32_le();

        if timebase_numerator == 0 || timebase_denominator == 0 {
            return Err(AppError::parse(
                CONTAINER,
                format!(
                    "invalid timebase {}/{}",
                    timebase_numerator, timebase_denominator
                ),
            ));
        }

        Ok(Self {
            version,
            header_len,
            fourcc,
            width,
            height,
            timebase_denominator,
            timebase_numerator,
            frame_count,
        })
    }
}

/// IVF frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfFrameHeader {
    pub frame_size: u32,
    pub timestamp: u64,
}

/// Forward-only IVF reader
pub struct IvfReader<R> {
    reader: R,
    max_frame_size: usize,
    frames_read: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin> IvfReader<R> {
    /// Parse the file header and return a reader positioned at the first frame
    pub async fn new(reader: R) -> Result<(Self, IvfFileHeader)> {
        Self::with_max_frame_size(reader, DEFAULT_MAX_FRAME_SIZE).await
    }

    pub async fn with_max_frame_size(
        mut reader: R,
        max_frame_size: usize,
    ) -> Result<(Self, IvfFileHeader)> {
        let mut buf = [0u8; IVF_FILE_HEADER_LEN];
        let n = read_full(&mut reader, &mut buf).await?;
        if n < IVF_FILE_HEADER_LEN {
            return Err(AppError::parse(
                CONTAINER,
                format!("incomplete file header ({} of {} bytes)", n, IVF_FILE_HEADER_LEN),
            ));
        }

        let header = IvfFileHeader::parse(&buf)?;

        // Some muxers write a longer header; skip the extension.
        let extra = header.header_len as usize - IVF_FILE_HEADER_LEN;
        if extra > 0 {
            let mut skip = vec![0u8; extra];
            let n = read_full(&mut reader, &mut skip).await?;
            if n < extra {
                return Err(AppError::parse(CONTAINER, "incomplete file header extension"));
            }
        }

        debug!(
            "IVF header: {} {}x{} timebase {}/{} ({} frames)",
            header.fourcc_str(),
            header.width,
            header.height,
            header.timebase_numerator,
            header.timebase_denominator,
            header.frame_count
        );

        Ok((
            Self {
                reader,
                max_frame_size,
                frames_read: 0,
                finished: false,
            },
            header,
        ))
    }

    /// Number of frames returned so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` once the stream ends on a frame boundary.
    pub async fn next_frame(&mut self) -> Result<Option<(Bytes, IvfFrameHeader)>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = [0u8; IVF_FRAME_HEADER_LEN];
        let n = read_full(&mut self.reader, &mut buf).await?;
        if n == 0 {
            self.finished = true;
            return Ok(None);
        }
        if n < IVF_FRAME_HEADER_LEN {
            return Err(AppError::parse(
                CONTAINER,
                format!(
                    "incomplete frame header after frame {} ({} of {} bytes)",
                    self.frames_read, n, IVF_FRAME_HEADER_LEN
                ),
            ));
        }

        let mut header_buf = &buf[..];
        let header = IvfFrameHeader {
            frame_size: header_buf.get_u32_le(),
            timestamp: header_buf.get_u64_le(),
        };

        let size = header.frame_size as usize;
        if size > self.max_frame_size {
            return Err(AppError::parse(
                CONTAINER,
                format!("frame size {} exceeds limit {}", size, self.max_frame_size),
            ));
        }

        let mut payload = BytesMut::zeroed(size);
        let n = read_full(&mut self.reader, &mut payload).await?;
        if n < size {
            return Err(AppError::parse(
                CONTAINER,
                format!("incomplete frame data ({} of {} bytes)", n, size),
            ));
        }

        self.frames_read += 1;
        Ok(Some((payload.freeze(), header)))
    }

    /// Consume the reader, returning the underlying stream
    pub fn into_inner(self) -> R {
        self.reader
    }
}
