//! Extraction dispatcher
//! Turns clip requests into background extraction jobs and guarantees at most
//! one job per clip id, ever.

use futures_util::future::join_all;
use log::{debug, error, info};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PickerError;
use crate::registry::ClipRegistry;
use crate::types::{frame_span, ClipId, ClipRecord, Framing, SubtitleCue};
use crate::video::{self, VideoSource};

/// Everything the external extraction tool needs for one clip
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionJob {
    pub id: ClipId,
    pub source: PathBuf,
    pub start: Duration,
    pub duration: Duration,
    pub output_pattern: PathBuf,
}

/// Produces the numbered image files for a job. Runs on a blocking worker thread.
pub trait FrameExtractor: Send + Sync + 'static {
    fn extract(&self, job: &ExtractionJob) -> anyhow::Result<()>;
}

pub struct FfmpegExtractor {
    ffmpeg_path: String,
}

impl FfmpegExtractor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn extract(&self, job: &ExtractionJob) -> anyhow::Result<()> {
        video::extract_frames(
            &self.ffmpeg_path,
            &job.source,
            job.start,
            job.duration,
            &job.output_pattern,
        )
    }
}

/// Result of a request, decided before any work is spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched(ClipId),
    AlreadyInFlight(ClipId),
    AlreadyPersisted(ClipId),
}

/// How a dispatched job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Persisted(ClipId),
    /// Another path stored the same id first
    Duplicate(ClipId),
    /// Extracted, but too short to keep
    Discarded { id: ClipId, frames: u64 },
    Failed { id: ClipId, reason: String },
    WriteFailed { id: ClipId, reason: String },
}

type InFlight = Arc<Mutex<HashSet<ClipId>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases an in-flight id when the job ends, however it ends
struct InFlightGuard {
    in_flight: InFlight,
    id: ClipId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.id);
    }
}

pub struct ExtractionDispatcher {
    extractor: Arc<dyn FrameExtractor>,
    registry: Arc<ClipRegistry>,
    in_flight: InFlight,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    reports: Option<mpsc::UnboundedSender<JobReport>>,
}

impl ExtractionDispatcher {
    pub fn new(extractor: Arc<dyn FrameExtractor>, registry: Arc<ClipRegistry>) -> Self {
        Self {
            extractor,
            registry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            jobs: Mutex::new(Vec::new()),
            reports: None,
        }
    }

    /// Send a [`JobReport`] for every finished job
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<JobReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Request extraction of a cue. Must be called from within a tokio runtime.
    pub fn request(
        &self,
        cue: &SubtitleCue,
        framerate: f64,
        source: &VideoSource,
        framing: Framing,
    ) -> DispatchOutcome {
        let id = source.clip_id(cue.start);

        {
            // Held across both checks so a finishing job cannot slip between them
            let mut in_flight = lock(&self.in_flight);
            if in_flight.contains(&id) {
                debug!("Clip {} is already being extracted", id);
                return DispatchOutcome::AlreadyInFlight(id);
            }
            if self.registry.contains(&id) {
                debug!("Clip {} is already recorded", id);
                return DispatchOutcome::AlreadyPersisted(id);
            }
            in_flight.insert(id.clone());
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            id: id.clone(),
        };
        let job = ExtractionJob {
            id: id.clone(),
            source: source.path.clone(),
            start: cue.start,
            duration: cue.duration,
            output_pattern: self.registry.output_pattern(&id),
        };
        info!(
            "Extracting clip {} ({:.3}s + {:.3}s) to {}",
            id,
            cue.start.as_secs_f64(),
            cue.duration.as_secs_f64(),
            job.output_pattern.display()
        );

        let extractor = Arc::clone(&self.extractor);
        let registry = Arc::clone(&self.registry);
        let reports = self.reports.clone();
        let cue = cue.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let report = run_job(extractor.as_ref(), &registry, &job, &cue, framerate, framing);
            drop(guard);
            if let Some(tx) = reports {
                let _ = tx.send(report);
            }
        });

        let mut jobs = lock(&self.jobs);
        jobs.retain(|job| !job.is_finished());
        jobs.push(handle);

        DispatchOutcome::Dispatched(id)
    }

    /// Wait for every dispatched job to finish
    pub async fn drain(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.jobs));
            if handles.is_empty() {
                break;
            }
            for result in join_all(handles).await {
                if let Err(e) = result {
                    error!("Extraction worker panicked: {}", e);
                }
            }
        }
    }
}

fn run_job(
    extractor: &dyn FrameExtractor,
    registry: &ClipRegistry,
    job: &ExtractionJob,
    cue: &SubtitleCue,
    framerate: f64,
    framing: Framing,
) -> JobReport {
    let id = job.id.clone();

    if let Err(e) = extractor.extract(job) {
        let err = PickerError::Extraction {
            id: id.clone(),
            reason: format!("{:#}", e),
        };
        error!("{}", err);
        return JobReport::Failed {
            id,
            reason: err.to_string(),
        };
    }

    let Some(record) = ClipRecord::from_cue(id.clone(), cue, framerate, framing) else {
        let (_, frames) = frame_span(cue.start, cue.duration, framerate);
        info!("Skipping clip {}: only {} frames", id, frames);
        return JobReport::Discarded { id, frames };
    };

    match registry.append(record) {
        Ok(true) => JobReport::Persisted(id),
        Ok(false) => JobReport::Duplicate(id),
        Err(e) => {
            error!("Failed to save clip {}: {}", id, e);
            JobReport::WriteFailed {
                id,
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;

    /// Extractor that counts calls and can be held open until released
    #[derive(Default)]
    pub struct CountingExtractor {
        calls: AtomicUsize,
        gate: Option<Mutex<Receiver<()>>>,
        fail: bool,
    }

    impl CountingExtractor {
        pub fn gated(gate: Receiver<()>) -> Self {
            Self {
                gate: Some(Mutex::new(gate)),
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FrameExtractor for CountingExtractor {
        fn extract(&self, _job: &ExtractionJob) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                lock(gate).recv().ok();
            }
            if self.fail {
                anyhow::bail!("ffmpeg exited with status 1");
            }
            Ok(())
        }
    }
}
