//! Progress-callback trait for per-document pipeline events.
//!
//! Inject an `Arc<dyn ProgressSink>` into [`crate::orchestrator::Orchestrator::ingest`]
//! to receive real-time events as the pipeline advances a document through
//! its lifecycle.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database row,
//! or server-sent events — without the library knowing anything about how the
//! host application communicates. The trait is `Send + Sync` so it works
//! correctly when images are enriched concurrently via `buffer_unordered`.
//!
//! Invocations for a single document are serialised by the
//! orchestrating task and must not block the pipeline; implementations
//! that need to do slow work (write to a database) should hand off to a
//! background task themselves rather than block inside the callback.

use std::sync::Arc;
use uuid::Uuid;

/// A single lifecycle step a document has entered, matching the state
/// machine a document moves through during ingest and enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Created,
    LayoutDone,
    ImagesMaterialised,
    Enriched,
    Ready,
    Failed,
}

/// Called by the orchestrator as it advances a document through the
/// pipeline. Implementations must be `Send + Sync` since enrichment runs
/// many images concurrently. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ProgressSink: Send + Sync {
    /// Called once a document id has been assigned, before any stage runs.
    fn on_start(&self, document_id: Uuid) {
        let _ = document_id;
    }

    /// Called when a document enters a new lifecycle step.
    ///
    /// `percent` is a best-effort completion estimate in `0..=100`, `None`
    /// when the step has no meaningful fraction (e.g. `Created`).
    fn on_step(&self, document_id: Uuid, step: PipelineStep, log: String, percent: Option<u8>) {
        let _ = (document_id, step, log, percent);
    }

    /// Called once per image artifact after its enrichment attempt, whether
    /// it succeeded or failed.
    fn on_artifact_enriched(&self, document_id: Uuid, artifact_id: Uuid, ok: bool) {
        let _ = (document_id, artifact_id, ok);
    }

    /// Called once after the document reaches `Ready` or `Failed`.
    fn on_complete(&self, document_id: Uuid, step: PipelineStep) {
        let _ = (document_id, step);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {}

/// Convenience alias matching the type threaded through the orchestrator.
pub type ProgressCallback = Arc<dyn ProgressSink>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TrackingSink {
        steps: AtomicUsize,
        artifacts: AtomicUsize,
        last_log: Mutex<Option<String>>,
    }

    impl ProgressSink for TrackingSink {
        fn on_step(&self, _document_id: Uuid, _step: PipelineStep, log: String, _percent: Option<u8>) {
            self.steps.fetch_add(1, Ordering::SeqCst);
            *self.last_log.lock().unwrap() = Some(log);
        }

        fn on_artifact_enriched(&self, _document_id: Uuid, _artifact_id: Uuid, _ok: bool) {
            self.artifacts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = NoopProgressSink;
        let id = Uuid::new_v4();
        sink.on_start(id);
        sink.on_step(id, PipelineStep::LayoutDone, "layout done".into(), Some(40));
        sink.on_artifact_enriched(id, Uuid::new_v4(), true);
        sink.on_complete(id, PipelineStep::Ready);
    }

    #[test]
    fn tracking_sink_receives_events() {
        let tracker = TrackingSink {
            steps: AtomicUsize::new(0),
            artifacts: AtomicUsize::new(0),
            last_log: Mutex::new(None),
        };
        let id = Uuid::new_v4();
        tracker.on_step(id, PipelineStep::Created, "created".into(), Some(0));
        tracker.on_step(id, PipelineStep::LayoutDone, "layout done".into(), Some(30));
        tracker.on_artifact_enriched(id, Uuid::new_v4(), true);
        tracker.on_artifact_enriched(id, Uuid::new_v4(), false);

        assert_eq!(tracker.steps.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.artifacts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.last_log.lock().unwrap().as_deref(), Some("layout done"));
    }

    /// Regression-style check that `Arc<dyn ProgressSink>` is `Send` and can
    /// be moved into a `tokio::spawn`ed task, as the enrichment pool does.
    #[tokio::test]
    async fn arc_dyn_sink_is_send() {
        let sink: Arc<dyn ProgressSink> = Arc::new(NoopProgressSink);
        let id = Uuid::new_v4();
        tokio::spawn(async move {
            sink.on_step(id, PipelineStep::Enriched, "enriched".into(), Some(90));
        })
        .await
        .unwrap();
    }
}
