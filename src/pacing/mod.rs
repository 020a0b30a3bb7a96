//! Real-time pacing loop
//!
//! One loop per physical stream. Each loop ticks on a fixed interval taken
//! from its container header and emits at most one unit per tick:
//!
//! ```text
//! interval tick ──> source.next_unit() ──> writer.write_unit()
//!      ^                  |
//!      └── end of stream / error / cancel terminates the loop
//! ```
//!
//! A recurring timer is used instead of sleeping after every unit: the tick
//! schedule is anchored to the start instant, so time spent parsing and
//! writing does not accumulate as drift.
//!
//! The first tick fires immediately for video as well as audio, so the
//! first unit of every stream goes out at t=0.

pub mod source;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::error::Result;
use crate::webrtc::track::SampleWriter;

pub use source::{IvfSource, OggSource, UnitSource, VideoDurationPolicy, OGG_PAGE_INTERVAL};

/// Outcome of one pacing loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacingStats {
    /// Units written
    pub units: u64,
    /// Payload bytes written
    pub bytes: u64,
    /// Stopped by the cancellation token before end of stream
    pub cancelled: bool,
}

/// Drive `source` into `writer` until end of stream, error or cancellation
///
/// End of stream and cancellation return `Ok`; a parse or write error ends
/// the loop and is returned as is.
pub async fn run<S, W>(
    name: &str,
    source: &mut S,
    writer: &W,
    cancel: &CancellationToken,
) -> Result<PacingStats>
where
    S: UnitSource + ?Sized,
    W: SampleWriter + ?Sized,
{
    let period = source.interval();
    info!(
        "{}: start sending to {} (one unit per {:?})",
        name,
        writer.label(),
        period
    );

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut stats = PacingStats::default();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("{}: cancelled after {} units", name, stats.units);
                stats.cancelled = true;
                return Ok(stats);
            }

            _ = ticker.tick() => {}
        }

        let Some(unit) = source.next_unit().await? else {
            break;
        };

        writer.write_unit(&unit).await?;

        if stats.units == 0 {
            info!("{}: first unit sent ({} bytes)", name, unit.len());
        }
        stats.units += 1;
        stats.bytes += unit.len() as u64;
        trace!(
            "{}: unit #{} {} bytes, duration {:?}",
            name,
            stats.units,
            unit.len(),
            unit.duration
        );
    }

    info!(
        "{}: end of stream after {} units ({} bytes)",
        name, stats.units, stats.bytes
    );
    Ok(stats)
}
