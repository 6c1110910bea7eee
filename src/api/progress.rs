//! Job progress endpoint
//!
//! `GET /api/v1/admin/import/progress/{id}` streams server-sent events when
//! the client accepts `text/event-stream`:
//! - `progress` for each (throttled) snapshot
//! - `heartbeat` every configured interval
//! - `close` once the job reaches a terminal state, then the stream ends
//!
//! Other clients get the current snapshot as JSON.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{DataType, JobKind, JobProgress, JobStatus};
use crate::services::progress::{ProgressStore, SubscriptionId};

/// Number of recent messages included in a snapshot
const RECENT_MESSAGES: usize = 5;

/// Progress snapshot as sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub id: String,
    pub kind: JobKind,
    pub data_type: DataType,
    pub status: JobStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub error_count: usize,
    pub warning_count: usize,
    pub recent_errors: Vec<String>,
    pub recent_warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobProgress> for ProgressView {
    fn from(job: &JobProgress) -> Self {
        Self {
            id: job.id.clone(),
            kind: job.kind,
            data_type: job.data_type,
            status: job.status,
            total_records: job.total_records,
            processed_records: job.processed_records,
            successful_records: job.successful_records,
            failed_records: job.failed_records,
            error_count: job.errors.len(),
            warning_count: job.warnings.len(),
            recent_errors: job.recent_errors(RECENT_MESSAGES).to_vec(),
            recent_warnings: job.recent_warnings(RECENT_MESSAGES).to_vec(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// GET /api/v1/admin/import/progress/{id}
pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    if !wants_stream {
        let job = state.import_service.status(&id).await?;
        return Ok(Json(ProgressView::from(&job)).into_response());
    }

    let stream = match progress_stream(&state.progress, &id, state.heartbeat) {
        Some(stream) => stream,
        // No live job: replay the durable state once and close
        None => {
            let job = state.import_service.status(&id).await?;
            ProgressStream::finished(&job)
        }
    };
    tracing::debug!("SSE subscriber attached to job {}", id);

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream.into_stream()),
    )
        .into_response())
}

/// Drops the store subscription when the client goes away
struct Subscription {
    store: ProgressStore,
    job_id: String,
    id: SubscriptionId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.job_id, self.id);
    }
}

/// Event source for one SSE connection
pub(crate) struct ProgressStream {
    updates: Option<mpsc::UnboundedReceiver<JobProgress>>,
    heartbeat: Option<Interval>,
    pending: VecDeque<Event>,
    closed: bool,
    _subscription: Option<Subscription>,
}

/// Subscribe to a live job; `None` when the store does not hold it
pub(crate) fn progress_stream(
    store: &ProgressStore,
    job_id: &str,
    heartbeat: Duration,
) -> Option<ProgressStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = Arc::new(move |job: &JobProgress| {
        let _ = tx.send(job.clone());
    });
    // Subscribe before reading the snapshot so no update falls in between
    let subscription = store.subscribe(job_id, callback).ok()?;
    let subscription = Subscription {
        store: store.clone(),
        job_id: job_id.to_string(),
        id: subscription,
    };
    let current = store.get(job_id)?;

    let mut stream = ProgressStream {
        updates: Some(rx),
        heartbeat: Some(interval_at(Instant::now() + heartbeat, heartbeat)),
        pending: VecDeque::new(),
        closed: false,
        _subscription: Some(subscription),
    };
    stream.push(&current);
    Some(stream)
}

impl ProgressStream {
    /// A stream that reports a finished job and closes
    fn finished(job: &JobProgress) -> Self {
        let mut stream = ProgressStream {
            updates: None,
            heartbeat: None,
            pending: VecDeque::new(),
            closed: false,
            _subscription: None,
        };
        stream.push(job);
        stream.closed = true;
        stream
    }

    fn push(&mut self, job: &JobProgress) {
        if self.closed {
            return;
        }
        let view = ProgressView::from(job);
        self.pending.push_back(json_event("progress", &view));
        if job.is_finished() {
            self.pending.push_back(json_event("close", &view));
            self.closed = true;
        }
    }

    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.closed {
                return None;
            }
            let (Some(updates), Some(heartbeat)) = (self.updates.as_mut(), self.heartbeat.as_mut())
            else {
                return None;
            };
            tokio::select! {
                update = updates.recv() => match update {
                    Some(job) => self.push(&job),
                    None => self.closed = true,
                },
                _ = heartbeat.tick() => {
                    let now = serde_json::json!({ "timestamp": Utc::now().to_rfc3339() });
                    self.pending.push_back(json_event("heartbeat", &now));
                }
            }
        }
    }

    pub(crate) fn into_stream(self) -> impl Stream<Item = Result<Event, Infallible>> {
        stream::unfold(self, |mut source| async move {
            source.next_event().await.map(|event| (Ok(event), source))
        })
    }
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchDelta, EntityType, ProgressPatch};
    use futures::StreamExt;

    fn store_with_job(total: u64) -> ProgressStore {
        let store = ProgressStore::new(Duration::from_millis(500));
        store
            .create(JobProgress::new(
                "job-1",
                JobKind::Import,
                DataType::Entity(EntityType::Tags),
                total,
            ))
            .unwrap();
        store
    }

    /// Rendered names of the next events, stopping at `close` or `limit`
    async fn event_names(stream: ProgressStream, limit: usize) -> Vec<String> {
        let events: Vec<_> = stream.into_stream().take(limit).collect().await;
        events
            .into_iter()
            .map(|e| {
                let rendered = format!("{:?}", e.unwrap());
                ["progress", "heartbeat", "close"]
                    .into_iter()
                    .find(|name| rendered.contains(&format!("event: {}", name)))
                    .unwrap_or("unknown")
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_view_keeps_last_five_messages() {
        let mut job = JobProgress::new("j", JobKind::Import, DataType::All, 10);
        job.errors = (0..8).map(|i| format!("e{}", i)).collect();
        let view = ProgressView::from(&job);
        assert_eq!(view.error_count, 8);
        assert_eq!(view.recent_errors, vec!["e3", "e4", "e5", "e6", "e7"]);
        assert_eq!(view.warning_count, 0);
    }

    #[tokio::test]
    async fn test_stream_closes_on_terminal_state() {
        let store = store_with_job(2);
        let stream = progress_stream(&store, "job-1", Duration::from_secs(30)).unwrap();
        assert_eq!(store.subscriber_count("job-1"), 1);

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .apply_batch(
                    "job-1",
                    &BatchDelta {
                        successful: 2,
                        ..BatchDelta::default()
                    },
                )
                .unwrap();
            writer
                .update("job-1", &ProgressPatch::status(JobStatus::Completed))
                .unwrap();
        });

        let names = event_names(stream, 10).await;
        assert_eq!(names.first().map(String::as_str), Some("progress"));
        assert_eq!(names.last().map(String::as_str), Some("close"));
        // Dropping the stream released the subscription
        assert_eq!(store.subscriber_count("job-1"), 0);
    }

    /// Render a stream through the SSE response body as (event, data) pairs
    async fn rendered_events(stream: ProgressStream) -> Vec<(String, serde_json::Value)> {
        let response = Sse::new(stream.into_stream()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .map(|block| {
                let mut name = String::new();
                let mut data = serde_json::Value::Null;
                for line in block.lines() {
                    if let Some(rest) = line.strip_prefix("event:") {
                        name = rest.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        data = serde_json::from_str(rest.trim()).unwrap();
                    }
                }
                (name, data)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rapid_updates_are_coalesced_on_the_wire() {
        let store = store_with_job(50);
        let stream = progress_stream(&store, "job-1", Duration::from_secs(30)).unwrap();

        let writer = store.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                writer
                    .apply_batch(
                        "job-1",
                        &BatchDelta {
                            successful: 1,
                            ..BatchDelta::default()
                        },
                    )
                    .unwrap();
            }
            writer
                .update("job-1", &ProgressPatch::status(JobStatus::Completed))
                .unwrap();
        });

        let events = rendered_events(stream).await;
        let progress: Vec<_> = events
            .iter()
            .filter(|(name, _)| name == "progress")
            .map(|(_, data)| data)
            .collect();
        assert!(progress.len() < 51, "{} progress events", progress.len());

        let (last_name, _) = events.last().unwrap();
        assert_eq!(last_name, "close");
        let final_state = progress.last().unwrap();
        assert_eq!(final_state["processedRecords"], 50);
        assert_eq!(final_state["totalRecords"], 50);
        assert_eq!(final_state["status"], "completed");
        assert_eq!(store.subscriber_count("job-1"), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_while_idle() {
        let store = store_with_job(5);
        let stream = progress_stream(&store, "job-1", Duration::from_millis(30)).unwrap();
        let names = event_names(stream, 3).await;
        assert_eq!(names, vec!["progress", "heartbeat", "heartbeat"]);
    }

    #[tokio::test]
    async fn test_finished_job_replays_and_closes() {
        let mut job = JobProgress::new("old", JobKind::Import, DataType::All, 0);
        ProgressPatch::status(JobStatus::Completed).apply_to(&mut job);
        let names = event_names(ProgressStream::finished(&job), 10).await;
        assert_eq!(names, vec!["progress", "close"]);
    }

    #[test]
    fn test_unknown_job_has_no_stream() {
        let store = ProgressStore::new(Duration::from_millis(500));
        assert!(progress_stream(&store, "missing", Duration::from_secs(1)).is_none());
    }
}
