//! Publish orchestration
//!
//! One cycle publishes every source file once:
//!
//! ```text
//! connect ─> publish ─> audio track ─> simulcast track (l, m, h) ─> negotiate
//!                                                                      |
//!        ┌──────────────┬───────────────┬───────────────┬─────────────┘
//!        v              v               v               v
//!      audio        video-low       video-mid       video-high      (JoinSet)
//!        |              |               |               |
//!        └──────────────┴───── join all ┴───────────────┘
//!                                  |
//!                        close ─> CycleReport / CycleFailed
//! ```
//!
//! Every task opens its own file, so each cycle reads from offset zero.
//! [`Publisher::run`] repeats cycles in loop mode.

mod session;

pub use session::{PublishSession, SourceFiles, StreamNames, VideoLayer, AUDIO_TASK};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FailurePolicy, PublishConfig};
use crate::error::{AppError, Result, TaskFailure, TaskFailures};
use crate::pacing::{self, IvfSource, OggSource, PacingStats};
use crate::webrtc::track::SampleWriter;
use crate::webrtc::transport::SessionBootstrap;

/// Outcome of one successful pacing task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: String,
    pub stats: PacingStats,
}

/// Units and bytes written to one simulcast layer during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    pub layer_id: String,
    pub units: u64,
    pub bytes: u64,
}

/// Outcome of one cycle in which no task failed
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Tasks in completion order
    pub tasks: Vec<TaskReport>,
    /// Simulcast layers, primary first
    pub layers: Vec<LayerReport>,
}

impl CycleReport {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn layer(&self, layer_id: &str) -> Option<&LayerReport> {
        self.layers.iter().find(|l| l.layer_id == layer_id)
    }

    pub fn total_units(&self) -> u64 {
        self.tasks.iter().map(|t| t.stats.units).sum()
    }

    /// Whether any task was stopped before end of stream
    pub fn cancelled(&self) -> bool {
        self.tasks.iter().any(|t| t.stats.cancelled)
    }
}

/// Publisher driving publish cycles through a session bootstrap
pub struct Publisher<B> {
    bootstrap: B,
    config: PublishConfig,
}

impl<B: SessionBootstrap> Publisher<B> {
    pub fn new(bootstrap: B, config: PublishConfig) -> Self {
        Self { bootstrap, config }
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn bootstrap(&self) -> &B {
        &self.bootstrap
    }

    /// Run one full cycle: set up the session, publish every source, tear down
    ///
    /// Cancelling `shutdown` stops the running loops at their next tick; the
    /// cycle then returns the partial report.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<CycleReport> {
        let names = StreamNames::new(&self.config.name);
        let files = SourceFiles::from_prefix(&self.config.file_prefix);

        let session = PublishSession::establish(
            &self.bootstrap,
            &self.config.address,
            &names,
            self.config.video_codec,
        )
        .await?;

        let layers = match session.layer_handles(&names) {
            Ok(layers) => layers,
            Err(e) => {
                error!("Video layer missing after setup: {}", e);
                if let Err(close_err) = session.close().await {
                    warn!("Failed to close session: {}", close_err);
                }
                return Err(e);
            }
        };

        let cancel = shutdown.child_token();
        let mut tasks = JoinSet::new();
        let mut task_names = HashMap::new();

        let audio = spawn_audio(
            &mut tasks,
            files.audio.clone(),
            self.config.verify_ogg_checksum,
            session.audio(),
            cancel.clone(),
        );
        task_names.insert(audio, AUDIO_TASK);

        for (layer, handle) in layers {
            let id = spawn_video(
                &mut tasks,
                layer.task_name(),
                files.video(layer).to_path_buf(),
                &self.config,
                Arc::new(handle),
                cancel.clone(),
            );
            task_names.insert(id, layer.task_name());
        }

        info!("Started {} publish tasks for '{}'", tasks.len(), names.name);

        let mut report = CycleReport::default();
        let mut failures = TaskFailures::default();

        while let Some(joined) = tasks.join_next_with_id().await {
            let (name, result) = match joined {
                Ok((id, result)) => (task_names.get(&id).copied().unwrap_or("unknown"), result),
                Err(e) => {
                    let name = task_names.get(&e.id()).copied().unwrap_or("unknown");
                    let reason = if e.is_panic() { "panicked" } else { "was aborted" };
                    let error = AppError::TaskAborted {
                        task: name.to_string(),
                        reason,
                    };
                    (name, Err(error))
                }
            };

            match result {
                Ok(stats) => {
                    debug!("Task {} finished: {} units", name, stats.units);
                    report.tasks.push(TaskReport {
                        name: name.to_string(),
                        stats,
                    });
                }
                Err(e) => {
                    error!("Task {} failed: {}", name, e);
                    if self.config.failure_policy == FailurePolicy::FailFast
                        && !cancel.is_cancelled()
                    {
                        warn!("Fail-fast: cancelling remaining tasks");
                        cancel.cancel();
                    }
                    failures.0.push(TaskFailure {
                        task: name.to_string(),
                        error: e,
                    });
                }
            }
        }

        for handle in session.video().layers() {
            let stats = handle.stats();
            info!(
                "Layer {}: {} units, {} bytes",
                handle.layer_id(),
                stats.units(),
                stats.bytes()
            );
            report.layers.push(LayerReport {
                layer_id: handle.layer_id().to_string(),
                units: stats.units(),
                bytes: stats.bytes(),
            });
        }

        if let Err(e) = session.close().await {
            warn!("Failed to close session: {}", e);
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(AppError::CycleFailed(failures))
        }
    }

    /// Run cycles until done, the cycle limit is hit or `shutdown` fires
    ///
    /// Without loop mode the first cycle's result is returned. In loop mode a
    /// failed cycle is logged and retried after the configured delay. Returns
    /// the number of cycles run.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<u64> {
        let mut cycles = 0u64;

        while !shutdown.is_cancelled() {
            cycles += 1;
            let cycle_id = uuid::Uuid::new_v4();
            let started = Instant::now();
            info!("Cycle {} ({}) starting", cycles, cycle_id);

            let result = self.run_cycle(&shutdown).await;
            let failed = result.is_err();

            match result {
                Ok(report) => info!(
                    "Cycle {} ({}) finished in {:.1}s: {} units over {} tasks{}",
                    cycles,
                    cycle_id,
                    started.elapsed().as_secs_f64(),
                    report.total_units(),
                    report.tasks.len(),
                    if report.cancelled() { " (cancelled)" } else { "" }
                ),
                Err(e) if !self.config.loop_forever => return Err(e),
                Err(e) => error!("Cycle {} ({}) failed: {}", cycles, cycle_id, e),
            }

            if !self.config.loop_forever {
                break;
            }
            if self.config.max_cycles.is_some_and(|max| cycles >= max) {
                info!("Reached cycle limit ({})", cycles);
                break;
            }

            if failed {
                let delay = self.config.retry_delay();
                info!("Retrying in {:?}", delay);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if shutdown.is_cancelled() {
            info!("Publisher stopped after {} cycles", cycles);
        }
        Ok(cycles)
    }
}

fn spawn_audio(
    tasks: &mut JoinSet<Result<PacingStats>>,
    path: PathBuf,
    verify_checksum: bool,
    writer: Arc<dyn SampleWriter>,
    cancel: CancellationToken,
) -> tokio::task::Id {
    tasks
        .spawn(async move {
            let mut source = OggSource::open(&path, verify_checksum).await?;
            pacing::run(AUDIO_TASK, &mut source, writer.as_ref(), &cancel).await
        })
        .id()
}

fn spawn_video(
    tasks: &mut JoinSet<Result<PacingStats>>,
    name: &'static str,
    path: PathBuf,
    config: &PublishConfig,
    writer: Arc<dyn SampleWriter>,
    cancel: CancellationToken,
) -> tokio::task::Id {
    let codec = config.video_codec;
    let policy = config.video_duration;
    let max_frame_size = config.max_frame_size;

    tasks
        .spawn(async move {
            let mut source = IvfSource::open(&path, policy, max_frame_size).await?;
            if source.fourcc() != codec.ivf_fourcc() {
                warn!(
                    "{}: {} has FourCC {}, publishing as {}",
                    name,
                    path.display(),
                    source.fourcc(),
                    codec
                );
            }
            pacing::run(name, &mut source, writer.as_ref(), &cancel).await
        })
        .id()
}
