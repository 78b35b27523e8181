//! Background shutdown of a backend process nobody has used for a while.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::history::HistoryStore;
use crate::outbox::{notify_best_effort, Outbox};
use crate::process::ManagedProcess;
use crate::types::{BackendKind, ChannelId};

/// Last confirmed successful round-trip to a backend. Dispatching a request does
/// not count; only a parsed, non-error response does.
#[derive(Debug, Default)]
pub struct BackendLiveness {
    last_success: Mutex<Option<Instant>>,
}

impl BackendLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_success.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_success(&self) {
        *self.lock() = Some(Instant::now());
    }

    pub fn last_success(&self) -> Option<Instant> {
        *self.lock()
    }

    pub fn forget(&self) {
        *self.lock() = None;
    }
}

pub fn should_shut_down(
    threshold: Option<Duration>,
    last_success: Option<Instant>,
    now: Instant,
    running: bool,
) -> bool {
    let (Some(threshold), Some(last)) = (threshold, last_success) else {
        return false;
    };
    running && now.saturating_duration_since(last) > threshold
}

pub struct IdleSupervisor {
    kind: BackendKind,
    liveness: Arc<BackendLiveness>,
    process: Arc<dyn ManagedProcess>,
    threshold: Option<Duration>,
    interval: Duration,
    outbox: Arc<dyn Outbox>,
    status_channel: Option<ChannelId>,
    notice: String,
    /// Set for the text backend only: its shutdown wipes every channel's history.
    history: Option<Arc<HistoryStore>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

pub struct IdleSupervisorParams {
    pub kind: BackendKind,
    pub liveness: Arc<BackendLiveness>,
    pub process: Arc<dyn ManagedProcess>,
    pub threshold: Option<Duration>,
    pub interval: Duration,
    pub outbox: Arc<dyn Outbox>,
    pub status_channel: Option<ChannelId>,
    pub notice: String,
    pub history: Option<Arc<HistoryStore>>,
}

impl IdleSupervisor {
    pub fn new(params: IdleSupervisorParams) -> Arc<Self> {
        Arc::new(Self {
            kind: params.kind,
            liveness: params.liveness,
            process: params.process,
            threshold: params.threshold,
            interval: params.interval,
            outbox: params.outbox,
            status_channel: params.status_channel,
            notice: params.notice,
            history: params.history,
            task: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_started(&self) -> bool {
        self.task_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the poll loop. Returns false when a loop is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.task_slot();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        if self.cancel.is_cancelled() {
            return false;
        }
        let this = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { this.run().await }));
        info!(
            "idle supervisor started: backend={} threshold={:?} interval={:?}",
            self.kind.name(),
            self.threshold,
            self.interval
        );
        true
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(err) = self.check_once().await {
                warn!(
                    "idle check failed: backend={} err={}",
                    self.kind.name(),
                    err
                );
            }
        }
        info!("idle supervisor stopped: backend={}", self.kind.name());
    }

    /// One poll iteration. Returns whether a shutdown was issued.
    pub async fn check_once(&self) -> Result<bool> {
        let Some(last) = self.liveness.last_success() else {
            return Ok(false);
        };
        if self.threshold.is_none() {
            return Ok(false);
        }
        let running = self.process.is_running().await;
        if !should_shut_down(self.threshold, Some(last), Instant::now(), running) {
            return Ok(false);
        }
        // another task may have recorded activity while is_running was polled
        if self.liveness.last_success() != Some(last) {
            return Ok(false);
        }

        info!(
            "idle shutdown: backend={} idle_for={:?}",
            self.kind.name(),
            last.elapsed()
        );
        if let Some(channel_id) = self.status_channel {
            notify_best_effort(self.outbox.as_ref(), channel_id, &self.notice, "idle_shutdown").await;
        }
        if self.liveness.last_success() != Some(last) {
            info!(
                "idle shutdown skipped: backend={} reason=used_while_notifying",
                self.kind.name()
            );
            return Ok(false);
        }
        let outcome = self.process.stop().await?;
        self.liveness.forget();
        if let Some(history) = &self.history {
            let cleared = history.clear_all();
            info!(
                "history cleared after idle shutdown: backend={} channels={}",
                self.kind.name(),
                cleared
            );
        }
        info!(
            "idle shutdown finished: backend={} outcome={:?}",
            self.kind.name(),
            outcome
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtelierError;
    use crate::process::StopOutcome;
    use crate::test_support::RecordingOutbox;
    use crate::types::Turn;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProcess {
        running: AtomicBool,
        stops: AtomicUsize,
        fail_stop: AtomicBool,
    }

    impl FakeProcess {
        fn running() -> Arc<Self> {
            let p = Self::default();
            p.running.store(true, Ordering::SeqCst);
            Arc::new(p)
        }
    }

    #[async_trait]
    impl ManagedProcess for FakeProcess {
        fn name(&self) -> &str {
            "fake"
        }

        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn stop(&self) -> Result<StopOutcome> {
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(AtelierError::unavailable("fake", "refused"));
            }
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            Ok(StopOutcome::Exited)
        }
    }

    struct Rig {
        supervisor: Arc<IdleSupervisor>,
        liveness: Arc<BackendLiveness>,
        process: Arc<FakeProcess>,
        outbox: Arc<RecordingOutbox>,
        history: Arc<HistoryStore>,
    }

    fn rig(threshold_minutes: i64, process: Arc<FakeProcess>) -> Rig {
        let liveness = Arc::new(BackendLiveness::new());
        let outbox = Arc::new(RecordingOutbox::default());
        let history = Arc::new(HistoryStore::new());
        let supervisor = IdleSupervisor::new(IdleSupervisorParams {
            kind: BackendKind::Text,
            liveness: liveness.clone(),
            process: process.clone(),
            threshold: crate::config::idle_threshold(threshold_minutes),
            interval: Duration::from_secs(60),
            outbox: outbox.clone(),
            status_channel: Some(77),
            notice: "IDLE".to_string(),
            history: Some(history.clone()),
        });
        Rig {
            supervisor,
            liveness,
            process,
            outbox,
            history,
        }
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_threshold_never_shuts_down() {
        let r = rig(0, FakeProcess::running());
        r.liveness.record_success();
        assert!(r.supervisor.start());
        sleep_secs(10 * 3600).await;
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 0);
        assert_eq!(r.outbox.texts_containing("IDLE"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_process_is_never_shut_down() {
        let r = rig(2, Arc::new(FakeProcess::default()));
        r.liveness.record_success();
        r.supervisor.start();
        sleep_secs(3600).await;
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_recorded_use_means_no_shutdown() {
        let r = rig(2, FakeProcess::running());
        r.supervisor.start();
        sleep_secs(3600).await;
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_backend_is_stopped_once_and_history_cleared() {
        let r = rig(2, FakeProcess::running());
        r.history.append(1, Turn::new("a", "hi"));
        r.history.append(2, Turn::new("b", "yo"));
        r.liveness.record_success();
        r.supervisor.start();

        sleep_secs(3 * 60 + 1).await;
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 1);
        assert!(r.history.get(1).is_empty());
        assert!(r.history.get(2).is_empty());
        assert_eq!(r.outbox.texts(), vec![(77, "IDLE".to_string())]);

        sleep_secs(3600).await;
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recent_activity_postpones_shutdown() {
        let r = rig(2, FakeProcess::running());
        r.liveness.record_success();
        r.supervisor.start();

        sleep_secs(90).await;
        r.liveness.record_success();
        sleep_secs(110).await; // t=200, last use at 90
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 0);

        sleep_secs(41).await; // check at t=240 sees 150s idle
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_noop_and_errors_do_not_kill_the_loop() {
        let process = FakeProcess::running();
        process.fail_stop.store(true, Ordering::SeqCst);
        let r = rig(1, process);
        r.liveness.record_success();
        assert!(r.supervisor.start());
        assert!(!r.supervisor.start());

        sleep_secs(5 * 60).await;
        assert!(r.supervisor.is_started());
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 0);

        r.process.fail_stop.store(false, Ordering::SeqCst);
        sleep_secs(61).await;
        assert_eq!(r.process.stops.load(Ordering::SeqCst), 1);

        r.supervisor.shutdown();
        sleep_secs(1).await;
        assert!(!r.supervisor.is_started());
    }

    /// Records backend activity in the middle of delivering the shutdown notice.
    struct BusyNotifier {
        liveness: Arc<BackendLiveness>,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl Outbox for BusyNotifier {
        async fn send_text(&self, _channel_id: ChannelId, _text: &str) -> Result<()> {
            sleep_secs(2).await;
            self.liveness.record_success();
            sleep_secs(3).await;
            self.texts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_attachment(
            &self,
            _channel_id: ChannelId,
            _attachment: crate::outbox::Attachment,
            _caption: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn use_during_the_notice_cancels_the_shutdown() {
        let liveness = Arc::new(BackendLiveness::new());
        let process = FakeProcess::running();
        let history = Arc::new(HistoryStore::new());
        let outbox = Arc::new(BusyNotifier {
            liveness: liveness.clone(),
            texts: AtomicUsize::new(0),
        });
        let supervisor = IdleSupervisor::new(IdleSupervisorParams {
            kind: BackendKind::Text,
            liveness: liveness.clone(),
            process: process.clone(),
            threshold: crate::config::idle_threshold(1),
            interval: Duration::from_secs(60),
            outbox: outbox.clone(),
            status_channel: Some(77),
            notice: "IDLE".to_string(),
            history: Some(history.clone()),
        });
        history.append(1, Turn::new("a", "hi"));
        liveness.record_success();

        sleep_secs(120).await;
        assert!(!supervisor.check_once().await.expect("check"));
        assert_eq!(outbox.texts.load(Ordering::SeqCst), 1);
        assert_eq!(process.stops.load(Ordering::SeqCst), 0);
        assert_eq!(history.len(1), 1);
        assert!(liveness.last_success().is_some());
    }

    #[test]
    fn decision_requires_threshold_use_and_running() {
        let used = Instant::now();
        let now = used + Duration::from_secs(3600);
        let limit = Some(Duration::from_secs(60));
        assert!(should_shut_down(limit, Some(used), now, true));
        assert!(!should_shut_down(limit, Some(used), now, false));
        assert!(!should_shut_down(None, Some(used), now, true));
        assert!(!should_shut_down(limit, None, now, true));
        assert!(!should_shut_down(limit, Some(now), now, true));
    }
}
