//! Per-channel listen mode: a time-boxed window in which bare mentions get a chat reply.
//!
//! Each activation or reset bumps a channel-local epoch and starts a fresh timer task.
//! A timer only acts when its epoch is still the one stored for the channel, so a
//! timer that lost a race with reset/stop does nothing, not even clear history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::history::HistoryStore;
use crate::outbox::{notify_best_effort, Outbox};
use crate::types::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Inactive,
    Active,
    WarningIssued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Started,
    Reset,
}

#[derive(Debug, Clone)]
pub struct ListenNotices {
    pub warning: String,
    pub deactivated: String,
    pub stopped: String,
}

struct Session {
    epoch: u64,
    warned: bool,
    cancel: CancellationToken,
}

pub struct ListenMode {
    sessions: Mutex<HashMap<ChannelId, Session>>,
    next_epoch: AtomicU64,
    warn_after: Duration,
    grace: Duration,
    history: Arc<HistoryStore>,
    outbox: Arc<dyn Outbox>,
    notices: ListenNotices,
}

impl ListenMode {
    pub fn new(
        warn_after: Duration,
        grace: Duration,
        history: Arc<HistoryStore>,
        outbox: Arc<dyn Outbox>,
        notices: ListenNotices,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            warn_after,
            grace,
            history,
            outbox,
            notices,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, channel_id: ChannelId) -> ListenState {
        match self.lock().get(&channel_id) {
            None => ListenState::Inactive,
            Some(session) if session.warned => ListenState::WarningIssued,
            Some(_) => ListenState::Active,
        }
    }

    pub fn is_active(&self, channel_id: ChannelId) -> bool {
        self.state(channel_id) != ListenState::Inactive
    }

    /// Direct chat invocation: starts listen mode or restarts its countdown.
    pub fn activate(self: &Arc<Self>, channel_id: ChannelId) -> Activation {
        let mut sessions = self.lock();
        let activation = match sessions.remove(&channel_id) {
            Some(old) => {
                old.cancel.cancel();
                Activation::Reset
            }
            None => Activation::Started,
        };
        let session = self.spawn_timer(channel_id);
        sessions.insert(channel_id, session);
        info!(
            "listen mode: channel_id={} action={:?}",
            channel_id, activation
        );
        activation
    }

    /// Explicit reset directive. No-op when the channel is not listening.
    pub fn reset(self: &Arc<Self>, channel_id: ChannelId) -> bool {
        let mut sessions = self.lock();
        let Some(old) = sessions.remove(&channel_id) else {
            return false;
        };
        old.cancel.cancel();
        let session = self.spawn_timer(channel_id);
        sessions.insert(channel_id, session);
        info!("listen mode: channel_id={} action=reset", channel_id);
        true
    }

    /// Explicit stop: cancels the countdown, clears history and confirms in the channel.
    pub async fn stop(&self, channel_id: ChannelId) -> bool {
        let removed = self.lock().remove(&channel_id);
        let Some(session) = removed else {
            return false;
        };
        session.cancel.cancel();
        self.history.clear(channel_id);
        info!("listen mode: channel_id={} action=stop", channel_id);
        notify_best_effort(
            self.outbox.as_ref(),
            channel_id,
            &self.notices.stopped,
            "listen_stopped",
        )
        .await;
        true
    }

    /// Cancels every countdown without side effects. Used on bot shutdown.
    pub fn shutdown(&self) {
        let mut sessions = self.lock();
        for (_, session) in sessions.drain() {
            session.cancel.cancel();
        }
    }

    // Called with the session map locked, so the new timer cannot observe the map
    // before its own session is inserted.
    fn spawn_timer(self: &Arc<Self>, channel_id: ChannelId) -> Session {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move {
            this.run_timer(channel_id, epoch, token).await;
        });
        Session {
            epoch,
            warned: false,
            cancel,
        }
    }

    async fn run_timer(&self, channel_id: ChannelId, epoch: u64, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.warn_after) => {}
        }
        if !self.mark_warned(channel_id, epoch) {
            return;
        }
        notify_best_effort(
            self.outbox.as_ref(),
            channel_id,
            &self.notices.warning,
            "listen_warning",
        )
        .await;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.grace) => {}
        }
        if !self.take_expired(channel_id, epoch) {
            return;
        }
        self.history.clear(channel_id);
        info!("listen mode: channel_id={} action=expired", channel_id);
        notify_best_effort(
            self.outbox.as_ref(),
            channel_id,
            &self.notices.deactivated,
            "listen_deactivated",
        )
        .await;
    }

    fn mark_warned(&self, channel_id: ChannelId, epoch: u64) -> bool {
        match self.lock().get_mut(&channel_id) {
            Some(session) if session.epoch == epoch && !session.cancel.is_cancelled() => {
                session.warned = true;
                true
            }
            _ => false,
        }
    }

    fn take_expired(&self, channel_id: ChannelId, epoch: u64) -> bool {
        let mut sessions = self.lock();
        let current = sessions
            .get(&channel_id)
            .is_some_and(|session| session.epoch == epoch && !session.cancel.is_cancelled());
        if current {
            sessions.remove(&channel_id);
        }
        current
    }
}
