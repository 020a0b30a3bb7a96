//! Timed unit sources
//!
//! A source owns one open container reader (and with it the file handle and
//! parse cursor) and turns container records into [`DecodedUnit`]s with a
//! presentation duration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, trace, warn};

use crate::error::{AppError, Result};
use crate::media::ivf::IvfReader;
use crate::media::ogg::{OggReader, GRANULE_UNSET, OPUS_GRANULE_RATE};
use crate::media::DecodedUnit;

/// Each Ogg page is paced at Opus frame granularity
pub const OGG_PAGE_INTERVAL: Duration = Duration::from_millis(20);

/// Duration attached to every video unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum VideoDurationPolicy {
    /// Fixed duration regardless of container timing
    Constant {
        #[serde(default = "default_constant_ms")]
        millis: u64,
    },
    /// The header frame interval (`num / den` seconds)
    Timebase,
}

fn default_constant_ms() -> u64 {
    1000
}

impl Default for VideoDurationPolicy {
    fn default() -> Self {
        Self::Constant {
            millis: default_constant_ms(),
        }
    }
}

impl VideoDurationPolicy {
    pub fn duration(&self, frame_interval: Duration) -> Duration {
        match self {
            VideoDurationPolicy::Constant { millis } => Duration::from_millis(*millis),
            VideoDurationPolicy::Timebase => frame_interval,
        }
    }
}

/// A paced sequence of units
#[async_trait]
pub trait UnitSource: Send {
    /// Fixed tick interval for this source
    fn interval(&self) -> Duration;

    /// Next unit, `Ok(None)` at end of stream
    async fn next_unit(&mut self) -> Result<Option<DecodedUnit>>;
}

async fn open_file(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).await.map_err(|source| AppError::SourceOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// IVF video source
pub struct IvfSource<R> {
    reader: IvfReader<R>,
    fourcc: String,
    interval: Duration,
    duration: Duration,
}

impl IvfSource<BufReader<File>> {
    /// Open an IVF file and parse its header
    pub async fn open(
        path: &Path,
        policy: VideoDurationPolicy,
        max_frame_size: usize,
    ) -> Result<Self> {
        let file = open_file(path).await?;
        let source = Self::from_reader(file, policy, max_frame_size).await?;
        debug!("Opened {} (interval {:?})", path.display(), source.interval);
        Ok(source)
    }
}

impl<R: AsyncRead + Unpin + Send> IvfSource<R> {
    pub async fn from_reader(
        reader: R,
        policy: VideoDurationPolicy,
        max_frame_size: usize,
    ) -> Result<Self> {
        let (reader, header) = IvfReader::with_max_frame_size(reader, max_frame_size).await?;
        let interval = header.frame_interval();
        if interval.is_zero() {
            return Err(AppError::parse(
                "ivf",
                format!(
                    "timebase {}/{} yields a zero frame interval",
                    header.timebase_numerator, header.timebase_denominator
                ),
            ));
        }
        Ok(Self {
            reader,
            fourcc: header.fourcc_str(),
            interval,
            duration: policy.duration(interval),
        })
    }

    /// FourCC from the file header
    pub fn fourcc(&self) -> &str {
        &self.fourcc
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> UnitSource for IvfSource<R> {
    fn interval(&self) -> Duration {
        self.interval
    }

    async fn next_unit(&mut self) -> Result<Option<DecodedUnit>> {
        Ok(self
            .reader
            .next_frame()
            .await?
            .map(|(payload, _)| DecodedUnit::new(payload, self.duration)))
    }
}

/// Ogg/Opus audio source
///
/// Page durations come from granule deltas: `(g[i] - g[i-1]) / 48000 s`.
pub struct OggSource<R> {
    reader: OggReader<R>,
    last_granule: u64,
}

impl OggSource<BufReader<File>> {
    /// Open an Ogg file and parse its identification page
    pub async fn open(path: &Path, verify_checksum: bool) -> Result<Self> {
        let file = open_file(path).await?;
        let source = Self::from_reader(file, verify_checksum).await?;
        debug!("Opened {}", path.display());
        Ok(source)
    }
}

impl<R: AsyncRead + Unpin + Send> OggSource<R> {
    pub async fn from_reader(reader: R, verify_checksum: bool) -> Result<Self> {
        let (reader, _id) = OggReader::new(reader, verify_checksum).await?;
        Ok(Self {
            reader,
            last_granule: 0,
        })
    }
}

/// Duration of `samples` at the Opus granule rate
pub fn granule_duration(samples: u64) -> Duration {
    let nanos = samples as u128 * 1_000_000_000 / OPUS_GRANULE_RATE as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> UnitSource for OggSource<R> {
    fn interval(&self) -> Duration {
        OGG_PAGE_INTERVAL
    }

    async fn next_unit(&mut self) -> Result<Option<DecodedUnit>> {
        let Some((payload, header)) = self.reader.next_page().await? else {
            return Ok(None);
        };

        let granule = header.granule_position;
        if granule == GRANULE_UNSET {
            // Continuation page, the next complete packet carries the position
            trace!("Page {} has no granule position", header.sequence);
            return Ok(Some(DecodedUnit::new(payload, Duration::ZERO)));
        }
        if granule < self.last_granule {
            warn!(
                "Granule went backwards on page {} ({} < {})",
                header.sequence, granule, self.last_granule
            );
        }
        let samples = granule.saturating_sub(self.last_granule);
        self.last_granule = granule;

        Ok(Some(DecodedUnit::new(payload, granule_duration(samples))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{IvfBuilder, OggBuilder};
    use std::io::Cursor;

    #[test]
    fn test_granule_duration() {
        assert_eq!(granule_duration(960), Duration::from_millis(20));
        assert_eq!(granule_duration(48000), Duration::from_secs(1));
        assert_eq!(granule_duration(0), Duration::ZERO);
        assert_eq!(granule_duration(1), Duration::from_nanos(20_833));
    }

    #[tokio::test]
    async fn test_ogg_durations_follow_granule_deltas() {
        let granules = [960u64, 1920, 1920, 4800, 5760];
        let mut builder = OggBuilder::new();
        for (i, &g) in granules.iter().enumerate() {
            builder = builder.page_at(&[i as u8], g);
        }

        let mut source = OggSource::from_reader(Cursor::new(builder.build()), true)
            .await
            .unwrap();
        assert_eq!(source.interval(), Duration::from_millis(20));

        let mut previous = 0;
        for &g in &granules {
            let unit = source.next_unit().await.unwrap().unwrap();
            assert_eq!(unit.duration, granule_duration(g - previous));
            previous = g;
        }
        assert!(source.next_unit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ogg_zero_delta_page_is_emitted() {
        // OpusTags style page with granule 0
        let data = OggBuilder::new().page(b"OpusTags", 0).page(b"audio", 960).build();
        let mut source = OggSource::from_reader(Cursor::new(data), true).await.unwrap();

        let tags = source.next_unit().await.unwrap().unwrap();
        assert_eq!(tags.duration, Duration::ZERO);
        assert_eq!(&tags.payload[..], b"OpusTags");
        let audio = source.next_unit().await.unwrap().unwrap();
        assert_eq!(audio.duration, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_ogg_unset_granule_keeps_previous_position() {
        let data = OggBuilder::new()
            .page_at(b"a", 960)
            .page_at(b"b", GRANULE_UNSET)
            .page_at(b"c", 1920)
            .build();
        let mut source = OggSource::from_reader(Cursor::new(data), true).await.unwrap();

        let durations = [
            Duration::from_millis(20),
            Duration::ZERO,
            Duration::from_millis(20),
        ];
        for expected in durations {
            assert_eq!(source.next_unit().await.unwrap().unwrap().duration, expected);
        }
        assert_eq!(source.last_granule, 1920);
    }

    #[tokio::test]
    async fn test_ogg_backwards_granule_saturates() {
        let data = OggBuilder::new()
            .page_at(b"a", 9600)
            .page_at(b"b", 960)
            .build();
        let mut source = OggSource::from_reader(Cursor::new(data), true).await.unwrap();
        assert_eq!(
            source.next_unit().await.unwrap().unwrap().duration,
            Duration::from_millis(200)
        );
        assert_eq!(source.next_unit().await.unwrap().unwrap().duration, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_ivf_constant_duration_policy() {
        let data = IvfBuilder::new(1, 25).frames(3, 10).build();
        let mut source = IvfSource::from_reader(
            Cursor::new(data),
            VideoDurationPolicy::default(),
            1024,
        )
        .await
        .unwrap();

        assert_eq!(source.interval(), Duration::from_millis(40));
        assert_eq!(source.fourcc(), "VP80");
        let unit = source.next_unit().await.unwrap().unwrap();
        assert_eq!(unit.duration, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ivf_timebase_duration_policy() {
        let data = IvfBuilder::new(1, 25).frames(3, 10).build();
        let mut source = IvfSource::from_reader(Cursor::new(data), VideoDurationPolicy::Timebase, 1024)
            .await
            .unwrap();

        let mut count = 0;
        while let Some(unit) = source.next_unit().await.unwrap() {
            assert_eq!(unit.duration, Duration::from_millis(40));
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_source_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.ogg");
        let err = OggSource::open(&path, true).await.err().unwrap();
        assert!(matches!(err, AppError::SourceOpen { .. }));
        assert!(err.to_string().contains("absent.ogg"));
    }

    #[test]
    fn test_duration_policy_serde() {
        let policy: VideoDurationPolicy = serde_json::from_str(r#"{"mode":"timebase"}"#).unwrap();
        assert_eq!(policy, VideoDurationPolicy::Timebase);
        let policy: VideoDurationPolicy = serde_json::from_str(r#"{"mode":"constant"}"#).unwrap();
        assert_eq!(policy, VideoDurationPolicy::Constant { millis: 1000 });
    }
}
