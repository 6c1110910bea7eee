//! Progress and notification store
//!
//! In-memory live state for import and export jobs, shared through `Arc`
//! by the orchestrators and the SSE endpoint. Subscribers are notified
//! with a snapshot after each change, throttled per job:
//! - the first change in a window is delivered immediately
//! - later changes inside the window collapse into one trailing delivery
//!   of the latest snapshot
//! - a terminal status is delivered immediately and drops any pending
//!   trailing delivery
//!
//! Callbacks run after the internal lock is released.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::models::{BatchDelta, JobProgress, JobStatus, ProgressPatch};

/// Receives a snapshot of the job after each (throttled) change
pub type ProgressCallback = Arc<dyn Fn(&JobProgress) + Send + Sync>;

pub type SubscriptionId = u64;

/// Error types for progress store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    Duplicate(String),

    #[error("Job {0} is already finished")]
    Finalized(String),

    #[error("Invalid progress update for job {id}: {reason}")]
    InvalidPatch { id: String, reason: String },
}

struct JobEntry {
    job: JobProgress,
    subscribers: Vec<(SubscriptionId, ProgressCallback)>,
    last_notified: Option<Instant>,
    flush_pending: bool,
    /// Bumped whenever a pending trailing flush becomes obsolete
    flush_generation: u64,
    cancelled: bool,
}

enum Notify {
    Skip,
    Now,
    Later { delay: Duration, generation: u64 },
}

struct Inner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    interval: Duration,
    next_subscription: AtomicU64,
}

/// Shared job progress table
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<Inner>,
}

impl ProgressStore {
    /// Create a store that delivers at most one leading and one trailing
    /// notification per job per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                interval,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new job
    pub fn create(&self, job: JobProgress) -> Result<(), ProgressError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&job.id) {
            return Err(ProgressError::Duplicate(job.id));
        }
        jobs.insert(
            job.id.clone(),
            JobEntry {
                job,
                subscribers: Vec::new(),
                last_notified: None,
                flush_pending: false,
                flush_generation: 0,
                cancelled: false,
            },
        );
        Ok(())
    }

    /// Current snapshot of a job
    pub fn get(&self, id: &str) -> Option<JobProgress> {
        self.jobs().get(id).map(|entry| entry.job.clone())
    }

    /// Merge a partial update into a job
    pub fn update(&self, id: &str, patch: &ProgressPatch) -> Result<JobProgress, ProgressError> {
        self.mutate(id, |job| {
            patch.apply_to(job);
            if job.status == JobStatus::Completed && job.processed_records != job.total_records {
                return Err(format!(
                    "completed with {} of {} records processed",
                    job.processed_records, job.total_records
                ));
            }
            Ok(())
        })
    }

    /// Add counter deltas and messages for one processed batch
    pub fn apply_batch(&self, id: &str, delta: &BatchDelta) -> Result<JobProgress, ProgressError> {
        self.mutate(id, |job| {
            delta.apply_to(job);
            Ok(())
        })
    }

    pub fn add_error(&self, id: &str, message: impl Into<String>) -> Result<(), ProgressError> {
        let message = message.into();
        self.mutate(id, move |job| {
            job.errors.push(message);
            Ok(())
        })
        .map(|_| ())
    }

    pub fn add_warning(&self, id: &str, message: impl Into<String>) -> Result<(), ProgressError> {
        let message = message.into();
        self.mutate(id, move |job| {
            job.warnings.push(message);
            Ok(())
        })
        .map(|_| ())
    }

    /// Register a callback for a job's changes
    pub fn subscribe(
        &self,
        id: &str,
        callback: ProgressCallback,
    ) -> Result<SubscriptionId, ProgressError> {
        let mut jobs = self.jobs();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| ProgressError::NotFound(id.to_string()))?;
        let subscription = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        entry.subscribers.push((subscription, callback));
        Ok(subscription)
    }

    pub fn unsubscribe(&self, id: &str, subscription: SubscriptionId) -> bool {
        let mut jobs = self.jobs();
        match jobs.get_mut(id) {
            Some(entry) => {
                let before = entry.subscribers.len();
                entry.subscribers.retain(|(sid, _)| *sid != subscription);
                entry.subscribers.len() != before
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self, id: &str) -> usize {
        self.jobs().get(id).map_or(0, |entry| entry.subscribers.len())
    }

    /// Ask a running job to stop; false if the job is unknown or finished
    pub fn request_cancel(&self, id: &str) -> bool {
        let mut jobs = self.jobs();
        match jobs.get_mut(id) {
            Some(entry) if !entry.job.is_finished() => {
                entry.cancelled = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.jobs().get(id).map_or(false, |entry| entry.cancelled)
    }

    /// Drop finished jobs completed more than `older_than` ago
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(age);
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, entry| match (entry.job.completed_at, cutoff) {
            (Some(done), Some(cutoff)) => done > cutoff,
            _ => true,
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `change` to a copy of the job, commit it if the counters stay
    /// consistent, then notify subscribers according to the throttle
    fn mutate<F>(&self, id: &str, change: F) -> Result<JobProgress, ProgressError>
    where
        F: FnOnce(&mut JobProgress) -> Result<(), String>,
    {
        let (snapshot, callbacks, notify) = {
            let mut jobs = self.jobs();
            let entry = jobs
                .get_mut(id)
                .ok_or_else(|| ProgressError::NotFound(id.to_string()))?;
            if entry.job.is_finished() {
                return Err(ProgressError::Finalized(id.to_string()));
            }

            let mut next = entry.job.clone();
            let invalid = |reason: String| ProgressError::InvalidPatch {
                id: id.to_string(),
                reason,
            };
            change(&mut next).map_err(invalid)?;
            if !next.counters_consistent() {
                return Err(invalid(format!(
                    "processed={} successful={} failed={} total={}",
                    next.processed_records,
                    next.successful_records,
                    next.failed_records,
                    next.total_records
                )));
            }
            entry.job = next;

            let notify = self.plan(entry);
            let callbacks: Vec<ProgressCallback> =
                entry.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (entry.job.clone(), callbacks, notify)
        };

        match notify {
            Notify::Skip => {}
            Notify::Now => deliver(&callbacks, &snapshot),
            Notify::Later { delay, generation } => {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let store = self.clone();
                        let id = id.to_string();
                        handle.spawn(async move {
                            tokio::time::sleep(delay).await;
                            store.flush(&id, generation);
                        });
                    }
                    // Without a runtime there is no timer; deliver directly
                    Err(_) => {
                        self.mark_flushed(id);
                        deliver(&callbacks, &snapshot);
                    }
                }
            }
        }

        Ok(snapshot)
    }

    /// Decide how to deliver the change just applied to `entry`
    fn plan(&self, entry: &mut JobEntry) -> Notify {
        let now = Instant::now();
        let window_open = entry
            .last_notified
            .map_or(false, |at| now.duration_since(at) < self.inner.interval);

        if entry.job.status.is_terminal() || !window_open {
            entry.last_notified = Some(now);
            entry.flush_pending = false;
            entry.flush_generation += 1;
            return Notify::Now;
        }
        if entry.flush_pending {
            return Notify::Skip;
        }

        entry.flush_pending = true;
        let elapsed = entry
            .last_notified
            .map_or(Duration::ZERO, |at| now.duration_since(at));
        Notify::Later {
            delay: self.inner.interval.saturating_sub(elapsed),
            generation: entry.flush_generation,
        }
    }

    fn mark_flushed(&self, id: &str) {
        if let Some(entry) = self.jobs().get_mut(id) {
            entry.flush_pending = false;
            entry.last_notified = Some(Instant::now());
        }
    }

    /// Trailing delivery of the latest snapshot, unless superseded
    fn flush(&self, id: &str, generation: u64) {
        let (snapshot, callbacks) = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            // Any immediate delivery after this trailer was scheduled bumped the
            // generation, so a stale snapshot never reaches a subscriber after a
            // newer one. Terminal deliveries always bump it.
            if !entry.flush_pending || entry.flush_generation != generation {
                return;
            }
            entry.flush_pending = false;
            entry.last_notified = Some(Instant::now());
            let callbacks: Vec<ProgressCallback> =
                entry.subscribers.iter().map(|(_, cb)| cb.clone()).collect();
            (entry.job.clone(), callbacks)
        };
        deliver(&callbacks, &snapshot);
    }
}

fn deliver(callbacks: &[ProgressCallback], snapshot: &JobProgress) {
    for callback in callbacks {
        callback(snapshot);
    }
}
