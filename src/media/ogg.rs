//! Ogg/Opus audio container reader
//!
//! An Ogg stream is a sequence of self-describing pages:
//!
//! ```text
//!   0  "OggS"
//!   4  version (u8, always 0)
//!   5  header type (u8; 0x02 = beginning of stream)
//!   6  granule position (u64)
//!  14  bitstream serial (u32)
//!  18  page sequence (u32)
//!  22  CRC-32 (u32, computed with this field zeroed)
//!  26  segment count (u8)
//!  27  segment table, then sum(segments) bytes of payload
//! ```
//!
//! The first page carries the `OpusHead` identification header. Granule
//! positions of the following pages count 48 kHz samples.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncRead;
use tracing::debug;

use super::read_full;
use crate::error::{AppError, Result};

const CONTAINER: &str = "ogg";

/// Page capture pattern
pub const OGG_CAPTURE_PATTERN: &[u8; 4] = b"OggS";
/// Fixed part of the page header
pub const OGG_PAGE_HEADER_LEN: usize = 27;
/// Header type flag for the first page of a logical bitstream
pub const PAGE_TYPE_BEGINNING_OF_STREAM: u8 = 0x02;
/// Opus always counts granules at 48 kHz
pub const OPUS_GRANULE_RATE: u64 = 48_000;
/// Granule position of a page on which no packet completes
pub const GRANULE_UNSET: u64 = u64::MAX;

const OPUS_HEAD_SIGNATURE: &[u8; 8] = b"OpusHead";
const OPUS_HEAD_LEN: usize = 19;
const CHECKSUM_OFFSET: usize = 22;

/// Parsed Ogg page header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OggPageHeader {
    pub version: u8,
    pub header_type: u8,
    pub granule_position: u64,
    pub serial: u32,
    pub sequence: u32,
    pub checksum: u32,
    pub segment_count: u8,
}

impl OggPageHeader {
    fn parse(mut buf: &[u8]) -> Result<Self> {
        if &buf[..4] != OGG_CAPTURE_PATTERN {
            return Err(AppError::parse(CONTAINER, "bad capture pattern"));
        }
        buf.advance(4);

        let version = buf.get_u8();
        if version != 0 {
            return Err(AppError::parse(
                CONTAINER,
                format!("unsupported stream structure version {}", version),
            ));
        }

        Ok(Self {
            version,
            header_type: buf.get_u8(),
            granule_position: buf.get_u64_le(),
            serial: buf.get_u32_le(),
            sequence: buf.get_u32_le(),
            checksum: buf.get_u32_le(),
            segment_count: buf.get_u8(),
        })
    }

    pub fn is_beginning_of_stream(&self) -> bool {
        self.header_type & PAGE_TYPE_BEGINNING_OF_STREAM != 0
    }
}

/// Opus identification header (first page payload)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusIdHeader {
    pub version: u8,
    pub channels: u8,
    pub pre_skip: u16,
    pub sample_rate: u32,
    pub output_gain: u16,
    pub channel_map: u8,
}

impl OpusIdHeader {
    fn parse(header: &OggPageHeader, payload: &[u8]) -> Result<Self> {
        if !header.is_beginning_of_stream() {
            return Err(AppError::parse(
                CONTAINER,
                format!("ID page has header type {:#04x}", header.header_type),
            ));
        }
        if payload.len() != OPUS_HEAD_LEN {
            return Err(AppError::parse(
                CONTAINER,
                format!("ID page payload is {} bytes, expected {}", payload.len(), OPUS_HEAD_LEN),
            ));
        }
        if &payload[..8] != OPUS_HEAD_SIGNATURE {
            return Err(AppError::parse(CONTAINER, "ID page is not an OpusHead"));
        }

        let mut buf = &payload[8..];
        Ok(Self {
            version: buf.get_u8(),
            channels: buf.get_u8(),
            pre_skip: buf.get_u16_le(),
            sample_rate: buf.get_u32_le(),
            output_gain: buf.get_u16_le(),
            channel_map: buf.get_u8(),
        })
    }
}

/// Forward-only Ogg page reader
pub struct OggReader<R> {
    reader: R,
    verify_checksum: bool,
    pages_read: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin> OggReader<R> {
    /// Read the identification page and return a reader positioned after it
    pub async fn new(reader: R, verify_checksum: bool) -> Result<(Self, OpusIdHeader)> {
        let mut ogg = Self {
            reader,
            verify_checksum,
            pages_read: 0,
            finished: false,
        };

        let (payload, header) = ogg
            .next_page()
            .await?
            .ok_or_else(|| AppError::parse(CONTAINER, "stream has no ID page"))?;
        let id = OpusIdHeader::parse(&header, &payload)?;

        debug!(
            "Opus ID header: {} channel(s), input rate {} Hz, pre-skip {}",
            id.channels, id.sample_rate, id.pre_skip
        );

        Ok((ogg, id))
    }

    /// Number of pages returned so far (including the ID page)
    pub fn pages_read(&self) -> u64 {
        self.pages_read
    }

    /// Read the next page payload and header
    ///
    /// Returns `Ok(None)` once the stream ends on a page boundary.
    pub async fn next_page(&mut self) -> Result<Option<(Bytes, OggPageHeader)>> {
        if self.finished {
            return Ok(None);
        }

        let mut raw = [0u8; OGG_PAGE_HEADER_LEN];
        let n = read_full(&mut self.reader, &mut raw).await?;
        if n == 0 {
            self.finished = true;
            return Ok(None);
        }
        if n < OGG_PAGE_HEADER_LEN {
            return Err(AppError::parse(
                CONTAINER,
                format!("incomplete page header ({} of {} bytes)", n, OGG_PAGE_HEADER_LEN),
            ));
        }

        let header = OggPageHeader::parse(&raw)?;

        let mut segments = vec![0u8; header.segment_count as usize];
        if read_full(&mut self.reader, &mut segments).await? < segments.len() {
            return Err(AppError::parse(CONTAINER, "incomplete segment table"));
        }

        let size: usize = segments.iter().map(|&s| s as usize).sum();
        let mut payload = BytesMut::zeroed(size);
        let n = read_full(&mut self.reader, &mut payload).await?;
        if n < size {
            return Err(AppError::parse(
                CONTAINER,
                format!("incomplete page payload ({} of {} bytes)", n, size),
            ));
        }

        if self.verify_checksum {
            let mut crc = 0u32;
            let mut zeroed = raw;
            zeroed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].fill(0);
            crc = crc_update(crc, &zeroed);
            crc = crc_update(crc, &segments);
            crc = crc_update(crc, &payload);
            if crc != header.checksum {
                return Err(AppError::parse(
                    CONTAINER,
                    format!(
                        "checksum mismatch on page {} (expected {:#010x}, got {:#010x})",
                        header.sequence, header.checksum, crc
                    ),
                ));
            }
        }

        self.pages_read += 1;
        Ok(Some((payload.freeze(), header)))
    }
}

/// Ogg CRC-32: polynomial 0x04C11DB7, no reflection, zero init and xor-out
pub fn page_checksum(page: &[u8]) -> u32 {
    crc_update(0, page)
}

fn crc_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = (crc << 8) ^ CRC_TABLE[((crc >> 24) as u8 ^ byte) as usize];
    }
    crc
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::OggBuilder;
    use std::io::Cursor;

    #[test]
    fn test_crc_table() {
        assert_eq!(CRC_TABLE[0], 0);
        assert_eq!(CRC_TABLE[1], 0x04C1_1DB7);
        // Ogg CRC of "123456789" (CRC-32/MPEG-2 without init/xorout)
        assert_eq!(page_checksum(b"123456789"), 0x89A1_897F);
    }

    #[tokio::test]
    async fn test_reads_pages_after_id_header() {
        let data = OggBuilder::new().pages(100, 960).build();
        let (mut reader, id) = OggReader::new(Cursor::new(data), true).await.unwrap();

        assert_eq!(id.channels, 2);
        assert_eq!(id.sample_rate, 48000);

        let mut granules = Vec::new();
        while let Some((payload, header)) = reader.next_page().await.unwrap() {
            assert!(!payload.is_empty());
            granules.push(header.granule_position);
        }
        assert_eq!(granules.len(), 100);
        assert_eq!(granules[0], 960);
        assert_eq!(granules[99], 96_000);
        assert_eq!(reader.pages_read(), 101);
        assert!(reader.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_large_page_spans_segments() {
        let payload = vec![7u8; 600];
        let data = OggBuilder::new().page(&payload, 960).build();
        let (mut reader, _) = OggReader::new(Cursor::new(data), true).await.unwrap();
        let (page, header) = reader.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 600);
        assert_eq!(header.segment_count, 3);
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let mut data = OggBuilder::new().page(b"opus-frame", 960).build();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let (mut reader, _) = OggReader::new(Cursor::new(data.clone()), true)
            .await
            .unwrap();
        let err = reader.next_page().await.unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));

        // Same bytes pass when verification is disabled
        let (mut reader, _) = OggReader::new(Cursor::new(data), false).await.unwrap();
        assert!(reader.next_page().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bad_capture_pattern() {
        let mut data = OggBuilder::new().build();
        data[0] = b'X';
        let err = OggReader::new(Cursor::new(data), true).await.err().unwrap();
        assert!(matches!(err, AppError::Parse { container: "ogg", .. }));
    }

    #[tokio::test]
    async fn test_empty_stream_has_no_id_page() {
        let err = OggReader::new(Cursor::new(Vec::new()), true)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no ID page"));
    }

    #[tokio::test]
    async fn test_id_page_must_be_opus_head() {
        let data = OggBuilder::raw_page(PAGE_TYPE_BEGINNING_OF_STREAM, 0, 0, b"OpusTags-not-a-head");
        let err = OggReader::new(Cursor::new(data), true).await.err().unwrap();
        assert!(err.to_string().contains("not an OpusHead"));
    }

    #[tokio::test]
    async fn test_id_page_must_be_bos() {
        let mut head = Vec::from(&b"OpusHead"[..]);
        head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0]);
        let data = OggBuilder::raw_page(0, 0, 0, &head);
        let err = OggReader::new(Cursor::new(data), true).await.err().unwrap();
        assert!(err.to_string().contains("header type"));
    }

    #[tokio::test]
    async fn test_truncated_page_is_parse_error() {
        let mut data = OggBuilder::new().page(b"abcdef", 960).build();
        data.truncate(data.len() - 3);
        let (mut reader, _) = OggReader::new(Cursor::new(data), false).await.unwrap();
        let err = reader.next_page().await.unwrap_err();
        assert!(err.to_string().contains("incomplete page payload"));
    }

    #[tokio::test]
    async fn test_partial_reads() {
        let data = OggBuilder::new().pages(3, 960).build();
        let mut builder = tokio_test::io::Builder::new();
        for chunk in data.chunks(5) {
            builder.read(chunk);
        }
        let (mut reader, _) = OggReader::new(builder.build(), true).await.unwrap();
        let mut count = 0;
        while reader.next_page().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
