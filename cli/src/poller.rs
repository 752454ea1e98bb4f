use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::GenerationService;
use crate::error::WorkflowError;
use crate::types::{GeneratedTrack, TaskHandle, TaskStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 900;

/// Monotonic generation counter shared by every poll started from one controller.
///
/// Starting or cancelling a poll advances the counter; a `PollTicket` captured
/// earlier then reports itself stale and its responses are dropped.
#[derive(Debug, Clone, Default)]
pub struct PollEpoch {
    current: Arc<AtomicU64>,
}

impl PollEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> PollTicket {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        PollTicket { epoch: self.current.clone(), generation }
    }

    pub fn cancel(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PollTicket {
    epoch: Arc<AtomicU64>,
    generation: u64,
}

impl PollTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls until a terminal status or cancellation.
    pub max_attempts: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { interval: DEFAULT_POLL_INTERVAL, max_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(Vec<GeneratedTrack>),
    Cancelled,
}

pub struct TaskPoller<S: ?Sized> {
    service: Arc<S>,
    settings: PollSettings,
}

impl<S> TaskPoller<S>
where
    S: GenerationService + ?Sized,
{
    pub fn new(service: Arc<S>, settings: PollSettings) -> Self {
        Self { service, settings }
    }

    /// Queries `handle` once per interval until it reaches a terminal status.
    ///
    /// Ticks never overlap: the next query waits for the previous one. Transport
    /// and decode errors are logged and polling carries on.
    pub async fn run(
        &self,
        handle: &TaskHandle,
        ticket: &PollTicket,
    ) -> Result<PollOutcome, WorkflowError> {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            ticker.tick().await;
            if !ticket.is_live() {
                debug!(task = %handle, "poll cancelled before query");
                return Ok(PollOutcome::Cancelled);
            }

            attempts = attempts.saturating_add(1);
            let status = self.service.query_task(handle).await;

            if !ticket.is_live() {
                debug!(task = %handle, attempts, "discarding response for cancelled poll");
                return Ok(PollOutcome::Cancelled);
            }

            match status {
                Ok(TaskStatus::Pending) => {}
                Ok(TaskStatus::Succeeded(payload)) => {
                    let tracks = parse_tracks(&payload)?;
                    info!(task = %handle, attempts, tracks = tracks.len(), "task succeeded");
                    return Ok(PollOutcome::Completed(tracks));
                }
                Ok(TaskStatus::Failed(reason)) => {
                    warn!(task = %handle, attempts, %reason, "task failed on server");
                    return Err(WorkflowError::TaskFailed(reason));
                }
                Err(err) => {
                    warn!(task = %handle, attempts, "status poll failed: {err}");
                }
            }

            if let Some(max) = self.settings.max_attempts {
                if attempts >= max {
                    warn!(task = %handle, attempts, "giving up on task");
                    return Err(WorkflowError::PollTimeout { attempts });
                }
            }
        }
    }
}

/// Decodes the JSON-encoded track array carried by a succeeded status.
pub fn parse_tracks(payload: &str) -> Result<Vec<GeneratedTrack>, WorkflowError> {
    serde_json::from_str::<Vec<GeneratedTrack>>(payload)
        .map_err(|err| WorkflowError::ResultParse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::testing::ScriptedService;

    fn succeeded(payload: &str) -> Result<TaskStatus, ApiError> {
        Ok(TaskStatus::Succeeded(payload.to_string()))
    }

    fn poller(service: &Arc<ScriptedService>) -> TaskPoller<ScriptedService> {
        TaskPoller::new(service.clone(), PollSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_success() {
        let service = Arc::new(ScriptedService::with_statuses(vec![
            Ok(TaskStatus::Pending),
            Ok(TaskStatus::Pending),
            Ok(TaskStatus::Pending),
            succeeded(r#"[{"url": "/files/a.wav"}, {"url": "/files/b.wav"}]"#),
            succeeded(r#"[{"url": "/files/late.wav"}]"#),
        ]));
        let epoch = PollEpoch::new();
        let ticket = epoch.begin();
        let started = Instant::now();

        let outcome = poller(&service).run(&TaskHandle::new("t1"), &ticket).await.unwrap();

        let PollOutcome::Completed(tracks) = outcome else { panic!("expected completion") };
        assert_eq!(tracks.len(), 2);
        assert_eq!(service.query_count(), 4);
        assert_eq!(started.elapsed(), DEFAULT_POLL_INTERVAL * 4);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 5).await;
        assert_eq!(service.query_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_server_failure_once() {
        let service = Arc::new(ScriptedService::with_statuses(vec![
            Ok(TaskStatus::Pending),
            Ok(TaskStatus::Failed("oom".into())),
        ]));
        let ticket = PollEpoch::new().begin();

        let err = poller(&service).run(&TaskHandle::new("t1"), &ticket).await.unwrap_err();

        assert_eq!(err, WorkflowError::TaskFailed("oom".into()));
        assert_eq!(service.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_through_transient_errors() {
        let service = Arc::new(ScriptedService::with_statuses(vec![
            Err(ScriptedService::unavailable()),
            Err(ScriptedService::unavailable()),
            succeeded("[]"),
        ]));
        let ticket = PollEpoch::new().begin();

        let outcome = poller(&service).run(&TaskHandle::new("t1"), &ticket).await.unwrap();

        assert_eq!(outcome, PollOutcome::Completed(Vec::new()));
        assert_eq!(service.query_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_result_is_surfaced() {
        let service = Arc::new(ScriptedService::with_statuses(vec![succeeded("{not json")]));
        let ticket = PollEpoch::new().begin();

        let err = poller(&service).run(&TaskHandle::new("t1"), &ticket).await.unwrap_err();

        assert!(matches!(err, WorkflowError::ResultParse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let service = Arc::new(ScriptedService::with_statuses(Vec::new()));
        let settings = PollSettings { interval: Duration::from_millis(500), max_attempts: Some(3) };
        let ticket = PollEpoch::new().begin();

        let err = TaskPoller::new(service.clone(), settings)
            .run(&TaskHandle::new("t1"), &ticket)
            .await
            .unwrap_err();

        assert_eq!(err, WorkflowError::PollTimeout { attempts: 3 });
        assert_eq!(service.query_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drops_response_that_lands_after_cancel() {
        let epoch = PollEpoch::new();
        let ticket = epoch.begin();
        let canceller = epoch.clone();
        let service = Arc::new(
            ScriptedService::with_statuses(vec![
                Ok(TaskStatus::Pending),
                succeeded(r#"[{"url": "/files/a.wav"}]"#),
            ])
            .on_query(move |n| {
                if n == 2 {
                    canceller.cancel();
                }
            }),
        );

        let outcome = poller(&service).run(&TaskHandle::new("t1"), &ticket).await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(service.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_ticket_never_queries() {
        let service = Arc::new(ScriptedService::with_statuses(vec![succeeded("[]")]));
        let epoch = PollEpoch::new();
        let ticket = epoch.begin();
        epoch.cancel();

        let outcome = poller(&service).run(&TaskHandle::new("t1"), &ticket).await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(service.query_count(), 0);
    }

    #[test]
    fn epoch_invalidates_older_tickets() {
        let epoch = PollEpoch::new();
        let first = epoch.begin();
        assert!(first.is_live());
        let second = epoch.begin();
        assert!(!first.is_live());
        assert!(second.is_live());
        assert!(second.generation() > first.generation());
        epoch.cancel();
        assert!(!second.is_live());
        assert_eq!(epoch.current(), second.generation() + 1);
    }

    #[test]
    fn parses_empty_and_populated_payloads() {
        assert!(parse_tracks("[]").unwrap().is_empty());
        let tracks = parse_tracks(r#"[{"url": "/files/a.wav", "caption": "x"}]"#).unwrap();
        assert_eq!(tracks[0].location(), Some("/files/a.wav"));
        assert!(parse_tracks("").is_err());
        assert!(parse_tracks(r#"{"url": "/files/a.wav"}"#).is_err());
    }
}
