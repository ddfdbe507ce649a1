//! Queue types for the scheduler

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Outcome delivered to the submitter
pub type ScheduleResult = Result<CompletionResponse, LlmError>;

/// A submitted call waiting in (or cycling through) the queue
#[derive(Debug)]
pub struct PendingRequest {
    /// Short id for log lines
    pub id: String,
    pub request: CompletionRequest,
    pub sink: oneshot::Sender<ScheduleResult>,
    pub submitted_at: Instant,
    /// Dispatches so far
    pub attempts: u32,
}

impl PendingRequest {
    pub fn new(request: CompletionRequest, sink: oneshot::Sender<ScheduleResult>) -> Self {
        let id = uuid::Uuid::now_v7().simple().to_string();
        Self {
            id: id[id.len() - 8..].to_string(),
            request,
            sink,
            submitted_at: Instant::now(),
            attempts: 0,
        }
    }

    /// The submitter dropped its handle, nobody is waiting for this result
    pub fn is_abandoned(&self) -> bool {
        self.sink.is_closed()
    }

    /// Deliver the terminal outcome; a vanished receiver is ignored
    pub fn resolve(self, result: ScheduleResult) {
        let _ = self.sink.send(result);
    }
}

/// Future returned by `RequestScheduler::submit`
///
/// Resolves exactly once with the collaborator's response or its non-rate-limit
/// error. Dropping the handle before the request is dispatched withdraws it.
#[derive(Debug)]
pub struct ResponseHandle {
    id: String,
    rx: oneshot::Receiver<ScheduleResult>,
}

impl ResponseHandle {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<ScheduleResult>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for ResponseHandle {
    type Output = ScheduleResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(LlmError::SchedulerClosed)))
    }
}

/// What the drain loop is doing right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Queue empty, waiting for a submission
    #[default]
    Idle,
    /// A call is in flight
    Dispatching,
    /// Window budget spent, waiting for the oldest call to age out
    Throttled,
    /// Waiting after the API signalled a rate limit
    CoolingDown,
    /// Spacing out consecutive calls
    Pacing,
    /// Drain loop has exited
    Stopped,
}

/// Counters kept by the drain loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_rate_limited: u64,
    pub total_throttled: u64,
    pub total_cancelled: u64,
    pub peak_queue_depth: usize,
}

/// Snapshot of the scheduler published after every state change
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub phase: SchedulerPhase,
    /// Requests waiting in the queue (excludes the one in flight)
    pub queued: usize,
    /// Dispatches still counted against the current window
    pub in_window: usize,
    /// Length of the sleep the drain loop just entered, if any
    pub sleeping_for: Option<Duration>,
    pub stats: SchedulerStats,
}

impl QueueState {
    /// Every accepted request has reached a terminal outcome
    pub fn is_settled(&self) -> bool {
        let s = &self.stats;
        s.total_submitted == s.total_completed + s.total_failed + s.total_cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_resolves_with_sent_value() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest::new(CompletionRequest::single("s", "u", 10), tx);
        let handle = ResponseHandle::new(pending.id.clone(), rx);
        assert_eq!(handle.id().len(), 8);

        pending.resolve(Ok(CompletionResponse::text("done")));
        let resp = handle.await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_handle_reports_closed_scheduler() {
        let (tx, rx) = oneshot::channel::<ScheduleResult>();
        drop(tx);
        let err = ResponseHandle::new("x".to_string(), rx).await.unwrap_err();
        assert!(matches!(err, LlmError::SchedulerClosed));
    }

    #[test]
    fn test_dropped_handle_marks_request_abandoned() {
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest::new(CompletionRequest::single("s", "u", 10), tx);
        assert!(!pending.is_abandoned());
        drop(rx);
        assert!(pending.is_abandoned());
    }

    #[test]
    fn test_is_settled() {
        let mut state = QueueState::default();
        assert!(state.is_settled());
        state.stats.total_submitted = 3;
        state.stats.total_completed = 1;
        state.stats.total_failed = 1;
        assert!(!state.is_settled());
        state.stats.total_cancelled = 1;
        assert!(state.is_settled());
    }
}
