//! Scheduler implementation

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};

use super::config::SchedulerConfig;
use super::queue::{PendingRequest, QueueState, ResponseHandle, SchedulerPhase, SchedulerStats};
use super::window::RequestLog;

/// Messages from handles to the drain loop
#[derive(Debug)]
enum SchedulerCommand {
    Submit(PendingRequest),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to the request scheduler
///
/// Every outbound LLM call goes through one of these. Calls are queued without
/// bound and dispatched one at a time by a single drain loop, which keeps at
/// most `requests_per_window` dispatches inside any trailing window and
/// requeues rate-limited calls at the front of the queue. Cloning the handle
/// shares the same queue.
#[derive(Clone)]
pub struct RequestScheduler {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    state_rx: watch::Receiver<QueueState>,
}

impl RequestScheduler {
    /// Spawn the drain loop on the current tokio runtime
    ///
    /// Fails if the config has no budget to dispatch with.
    pub fn spawn(client: Arc<dyn LlmClient>, config: SchedulerConfig) -> Result<Self> {
        debug!(?config, "RequestScheduler::spawn: called");
        config.validate().context("Invalid scheduler config")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(QueueState::default());

        let drain = DrainLoop {
            log: RequestLog::new(config.window(), config.requests_per_window),
            client,
            config,
            queue: VecDeque::new(),
            rx,
            state_tx,
            stats: SchedulerStats::default(),
            phase: SchedulerPhase::Idle,
            closing: false,
            shutdown_replies: Vec::new(),
        };
        tokio::spawn(drain.run());

        info!("RequestScheduler spawned");
        Ok(Self { tx, state_rx })
    }

    /// Queue a call and return a handle to its eventual result
    ///
    /// Never blocks. If the drain loop has already stopped the handle resolves
    /// to `LlmError::SchedulerClosed`.
    pub fn submit(&self, request: CompletionRequest) -> ResponseHandle {
        let (sink, rx) = oneshot::channel();
        let pending = PendingRequest::new(request, sink);
        let handle = ResponseHandle::new(pending.id.clone(), rx);
        debug!(id = %pending.id, "submit: called");

        if self.tx.send(SchedulerCommand::Submit(pending)).is_err() {
            // The pending request (and its sink) is dropped with the error,
            // so the handle resolves to SchedulerClosed.
            warn!(id = %handle.id(), "submit: scheduler is not running");
        }
        handle
    }

    /// Latest published snapshot
    pub fn state(&self) -> QueueState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<QueueState> {
        self.state_rx.clone()
    }

    /// Stop accepting work once the queue is drained and wait for the loop to exit
    ///
    /// Everything submitted before this call still reaches its outcome.
    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        let (reply, done) = oneshot::channel();
        if self.tx.send(SchedulerCommand::Shutdown { reply }).is_err() {
            debug!("shutdown: drain loop already stopped");
            return;
        }
        let _ = done.await;
        info!("RequestScheduler stopped");
    }
}

#[async_trait]
impl LlmClient for RequestScheduler {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.submit(request).await
    }
}

/// State owned by the single drain task
struct DrainLoop {
    client: Arc<dyn LlmClient>,
    config: SchedulerConfig,
    queue: VecDeque<PendingRequest>,
    log: RequestLog,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    state_tx: watch::Sender<QueueState>,
    stats: SchedulerStats,
    phase: SchedulerPhase,
    closing: bool,
    shutdown_replies: Vec<oneshot::Sender<()>>,
}

impl DrainLoop {
    async fn run(mut self) {
        debug!("DrainLoop::run: started");

        loop {
            self.absorb_pending();

            if self.queue.is_empty() {
                if self.closing {
                    break;
                }
                self.set_phase(SchedulerPhase::Idle, None);
                match self.rx.recv().await {
                    Some(cmd) => self.accept(cmd),
                    None => {
                        debug!("DrainLoop::run: all handles dropped");
                        self.closing = true;
                    }
                }
                continue;
            }

            if let Some((phase, wait)) = self.dispatch_next().await {
                self.set_phase(phase, Some(wait));
                tokio::time::sleep(wait).await;
            }
        }

        self.finish();
    }

    /// Move everything already sent into the queue and drop withdrawn requests
    fn absorb_pending(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => self.accept(cmd),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closing = true;
                    break;
                }
            }
        }

        let before = self.queue.len();
        self.queue.retain(|p| {
            if p.is_abandoned() {
                debug!(id = %p.id, "absorb_pending: handle dropped, withdrawing request");
                false
            } else {
                true
            }
        });
        let withdrawn = before - self.queue.len();
        if withdrawn > 0 {
            self.stats.total_cancelled += withdrawn as u64;
            self.publish(None);
        }
    }

    fn accept(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Submit(pending) => {
                debug!(id = %pending.id, "accept: queued");
                self.queue.push_back(pending);
                self.stats.total_submitted += 1;
                self.stats.peak_queue_depth = self.stats.peak_queue_depth.max(self.queue.len());
                self.publish(None);
            }
            SchedulerCommand::Shutdown { reply } => {
                debug!(queued = self.queue.len(), "accept: shutdown requested");
                self.closing = true;
                self.shutdown_replies.push(reply);
            }
        }
    }

    /// Dispatch the head of the queue if the window allows it
    ///
    /// Returns how long to wait before the next iteration and what the loop is
    /// waiting on.
    async fn dispatch_next(&mut self) -> Option<(SchedulerPhase, Duration)> {
        let now = Instant::now();
        if let Some(wait) = self.log.delay_until_admit(now, self.config.guard_buffer()) {
            self.stats.total_throttled += 1;
            info!(
                queued = self.queue.len(),
                wait_ms = wait.as_millis() as u64,
                "Rate window full, waiting {:.1}s before next request",
                wait.as_secs_f64()
            );
            return Some((SchedulerPhase::Throttled, wait));
        }

        let mut pending = self.queue.pop_front()?;
        self.log.record(now);
        pending.attempts += 1;
        self.stats.total_dispatched += 1;
        self.set_phase(SchedulerPhase::Dispatching, None);
        debug!(
            id = %pending.id,
            attempt = pending.attempts,
            queued_ms = now.saturating_duration_since(pending.submitted_at).as_millis() as u64,
            "dispatch_next: calling client"
        );

        match self.client.complete(pending.request.clone()).await {
            Ok(response) => {
                debug!(id = %pending.id, "dispatch_next: success");
                self.stats.total_completed += 1;
                pending.resolve(Ok(response));
                Some((SchedulerPhase::Pacing, self.config.inter_request_delay()))
            }
            Err(e) if e.is_rate_limit() => {
                self.stats.total_rate_limited += 1;
                if let Some(max) = self.config.max_rate_limit_retries
                    && pending.attempts > max
                {
                    warn!(id = %pending.id, attempts = pending.attempts, "Rate limited too many times, giving up");
                    self.stats.total_failed += 1;
                    pending.resolve(Err(e));
                    return Some((SchedulerPhase::Pacing, self.config.inter_request_delay()));
                }

                let cooldown = self.config.rate_limit_cooldown();
                warn!(
                    id = %pending.id,
                    attempts = pending.attempts,
                    retry_after = ?e.retry_after(),
                    "Rate limited by API, retrying in {:.1}s",
                    cooldown.as_secs_f64()
                );
                self.queue.push_front(pending);
                Some((SchedulerPhase::CoolingDown, cooldown))
            }
            Err(e) => {
                debug!(id = %pending.id, error = %e, "dispatch_next: failed");
                self.stats.total_failed += 1;
                pending.resolve(Err(e));
                Some((SchedulerPhase::Pacing, self.config.inter_request_delay()))
            }
        }
    }

    /// Refuse late submissions and release shutdown waiters
    fn finish(mut self) {
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                SchedulerCommand::Submit(pending) => {
                    debug!(id = %pending.id, "finish: rejecting late submission");
                    self.stats.total_submitted += 1;
                    self.stats.total_failed += 1;
                    pending.resolve(Err(LlmError::SchedulerClosed));
                }
                SchedulerCommand::Shutdown { reply } => self.shutdown_replies.push(reply),
            }
        }

        self.set_phase(SchedulerPhase::Stopped, None);
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        debug!(stats = ?self.stats, "DrainLoop::finish: stopped");
    }

    fn set_phase(&mut self, phase: SchedulerPhase, sleeping_for: Option<Duration>) {
        self.phase = phase;
        self.publish(sleeping_for);
    }

    fn publish(&mut self, sleeping_for: Option<Duration>) {
        self.state_tx.send_replace(QueueState {
            phase: self.phase,
            queued: self.queue.len(),
            in_window: self.log.in_window(Instant::now()),
            sleeping_for,
            stats: self.stats.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::{MockLlmClient, MockOutcome};

    fn fast_config(requests_per_window: u32) -> SchedulerConfig {
        SchedulerConfig {
            requests_per_window,
            ..Default::default()
        }
    }

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest::single("system", prompt, 100)
    }

    fn since(start: Instant, at: Instant) -> Duration {
        at.duration_since(start)
    }

    fn assert_near(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_requests_three_per_window() {
        let client = Arc::new(MockLlmClient::echo());
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();

        let handles: Vec<_> = (0..5).map(|i| scheduler.submit(request(&format!("r{}", i)))).collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let resp = handle.await.unwrap();
            assert_eq!(resp.content, Some(format!("r{}", i)));
        }

        let calls = client.calls();
        assert_eq!(calls.len(), 5);
        let t0 = calls[0].at;
        assert_near(since(t0, calls[1].at), Duration::from_millis(500));
        assert_near(since(t0, calls[2].at), Duration::from_millis(1000));
        // Window full at 1.5s; oldest (0s) leaves at 60s, plus guard
        assert_near(since(t0, calls[3].at), Duration::from_millis(60_100));
        // By 60.6s the calls at 0s and 0.5s have aged out
        assert_near(since(t0, calls[4].at), Duration::from_millis(60_600));

        assert_eq!(client.prompts(), vec!["r0", "r1", "r2", "r3", "r4"]);
        let state = scheduler.state();
        assert_eq!(state.stats.total_completed, 5);
        assert!(state.stats.total_throttled >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_budget_never_exceeded() {
        let client = Arc::new(MockLlmClient::echo());
        let config = SchedulerConfig {
            requests_per_window: 2,
            window_secs: 10,
            inter_request_delay_ms: 0,
            ..Default::default()
        };
        let scheduler = RequestScheduler::spawn(client.clone(), config).unwrap();

        let handles: Vec<_> = (0..7).map(|i| scheduler.submit(request(&format!("r{}", i)))).collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let times: Vec<Instant> = client.calls().iter().map(|c| c.at).collect();
        for (i, t) in times.iter().enumerate() {
            let in_window = times[..=i]
                .iter()
                .filter(|earlier| t.duration_since(**earlier) < Duration::from_secs(10))
                .count();
            assert!(in_window <= 2, "call {} saw {} calls in window", i, in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_once_then_succeeds() {
        let client = Arc::new(MockLlmClient::new(vec![
            MockOutcome::RateLimited,
            MockOutcome::Reply("ok".to_string()),
        ]));
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();

        let resp = scheduler.submit(request("only")).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("ok"));

        let calls = client.calls();
        assert_eq!(calls.len(), 2);
        assert_near(since(calls[0].at, calls[1].at), Duration::from_secs(15));

        let stats = scheduler.state().stats;
        assert_eq!(stats.total_rate_limited, 1);
        assert_eq!(stats.total_dispatched, 2);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_rejected_without_retry() {
        let client = Arc::new(MockLlmClient::new(vec![MockOutcome::Fail("bad request".to_string())]));
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();

        let err = scheduler.submit(request("doomed")).await.unwrap_err();
        match err {
            LlmError::ApiError { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad request");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Give the loop every chance to (wrongly) retry
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(client.call_count(), 1);
        assert_eq!(scheduler.state().stats.total_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_request_keeps_its_place() {
        let client = Arc::new(MockLlmClient::new(vec![MockOutcome::RateLimited]));
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(10)).unwrap();

        let a = scheduler.submit(request("a"));
        let b = scheduler.submit(request("b"));
        let c = scheduler.submit(request("c"));

        assert_eq!(c.await.unwrap().content.as_deref(), Some("c"));
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());

        assert_eq!(client.prompts(), vec!["a", "a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_submission_order() {
        let client = Arc::new(MockLlmClient::echo());
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..6 {
            let handle = scheduler.submit(request(&format!("r{}", i)));
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                handle.await.unwrap();
                order.lock().unwrap().push(i);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submitters_no_duplicate_dispatch() {
        let client = Arc::new(MockLlmClient::echo());
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(50)).unwrap();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.submit(request(&format!("task-{}", i))).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let mut prompts = client.prompts();
        prompts.sort();
        prompts.dedup();
        assert_eq!(prompts.len(), 10);
        assert_eq!(client.call_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_is_never_dispatched() {
        let client = Arc::new(MockLlmClient::echo());
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();

        let a = scheduler.submit(request("a"));
        drop(scheduler.submit(request("b")));
        let c = scheduler.submit(request("c"));

        a.await.unwrap();
        c.await.unwrap();

        assert_eq!(client.prompts(), vec!["a", "c"]);
        let state = scheduler.state();
        assert_eq!(state.stats.total_cancelled, 1);
        assert_eq!(state.stats.total_dispatched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_surfaces_rate_limit() {
        let client = Arc::new(MockLlmClient::new(vec![
            MockOutcome::RateLimited,
            MockOutcome::RateLimited,
            MockOutcome::Reply("too late".to_string()),
        ]));
        let config = SchedulerConfig {
            max_rate_limit_retries: Some(1),
            ..Default::default()
        };
        let scheduler = RequestScheduler::spawn(client.clone(), config).unwrap();

        let err = scheduler.submit(request("capped")).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queue_then_refuses() {
        let client = Arc::new(MockLlmClient::echo());
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();

        let a = scheduler.submit(request("a"));
        let b = scheduler.submit(request("b"));
        scheduler.shutdown().await;

        assert!(a.await.is_ok());
        assert!(b.await.is_ok());
        assert_eq!(scheduler.state().phase, SchedulerPhase::Stopped);
        assert!(scheduler.state().is_settled());

        let late = scheduler.submit(request("late")).await.unwrap_err();
        assert!(matches!(late, LlmError::SchedulerClosed));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_is_an_llm_client() {
        let client = Arc::new(MockLlmClient::new(vec![
            MockOutcome::RateLimited,
            MockOutcome::Reply("wrapped".to_string()),
        ]));
        let scheduled: Arc<dyn LlmClient> = Arc::new(RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap());

        let resp = scheduled.complete(request("hello")).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("wrapped"));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_queue_drains() {
        let client = Arc::new(MockLlmClient::echo());
        let scheduler = RequestScheduler::spawn(client.clone(), fast_config(3)).unwrap();

        scheduler.submit(request("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let state = scheduler.state();
        assert_eq!(state.phase, SchedulerPhase::Idle);
        assert_eq!(state.queued, 0);
        assert_eq!(state.in_window, 1);
        assert!(state.is_settled());

        // A later submission wakes the loop again
        scheduler.submit(request("b")).await.unwrap();
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_spawn_refuses_config_without_budget() {
        let client = Arc::new(MockLlmClient::echo());

        let err = RequestScheduler::spawn(client.clone(), fast_config(0))
            .err()
            .expect("zero budget should be refused");
        assert!(format!("{:#}", err).contains("requests-per-window"));

        let zero_window = SchedulerConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert!(RequestScheduler::spawn(client.clone(), zero_window).is_err());
        assert_eq!(client.call_count(), 0);
    }
}
