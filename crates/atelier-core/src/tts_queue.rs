//! Bounded speech-synthesis queue with exactly one consumer.
//!
//! Capacity counts jobs waiting in the queue; the job currently being synthesized
//! has already left it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backends::SpeechBackend;
use crate::outbox::{notify_best_effort, Attachment, Outbox};
use crate::types::{ChannelId, TtsJob};

enum TtsMessage {
    Job(TtsJob),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct TtsNotices {
    pub timed_out: String,
    pub failed: String,
}

pub struct TtsQueue {
    tx: mpsc::Sender<TtsMessage>,
    capacity: usize,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Worker {
    synth: Arc<dyn SpeechBackend>,
    outbox: Arc<dyn Outbox>,
    job_timeout: Duration,
    notices: TtsNotices,
}

impl TtsQueue {
    pub fn spawn(
        capacity: usize,
        job_timeout: Duration,
        synth: Arc<dyn SpeechBackend>,
        outbox: Arc<dyn Outbox>,
        notices: TtsNotices,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Worker {
            synth,
            outbox,
            job_timeout,
            notices,
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            tx,
            capacity,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Admission control: never waits. Returns false when the queue is full or closed.
    pub fn enqueue(&self, job: TtsJob) -> bool {
        let channel_id = job.requester.channel_id;
        if self.closed.load(Ordering::SeqCst) {
            info!("tts job rejected: channel_id={} reason=shutting_down", channel_id);
            return false;
        }
        if self.capacity == 0 {
            info!("tts job rejected: channel_id={} reason=queue_disabled", channel_id);
            return false;
        }
        match self.tx.try_send(TtsMessage::Job(job)) {
            Ok(()) => {
                info!("tts job queued: channel_id={} depth={}", channel_id, self.depth());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!("tts job rejected: channel_id={} reason=queue_full", channel_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("tts job rejected: channel_id={} reason=worker_stopped", channel_id);
                false
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues the shutdown sentinel behind pending jobs and waits for the worker to drain.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.tx.send(TtsMessage::Shutdown).await.is_err() {
            return;
        }
        let handle = self.worker_slot().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("tts worker join failed: err={}", err);
            }
        }
    }
}

impl Worker {
    async fn timed_out(&self, channel_id: ChannelId) {
        notify_best_effort(
            self.outbox.as_ref(),
            channel_id,
            &self.notices.timed_out,
            "tts_timeout",
        )
        .await;
    }

    /// Upload gets its own bound so a stuck send cannot hold the worker.
    async fn deliver(&self, channel_id: ChannelId, path: PathBuf) {
        let attachment = Attachment::Audio { path };
        let send = self.outbox.send_attachment(channel_id, attachment, None);
        match tokio::time::timeout(self.job_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("tts delivery failed: channel_id={} err={}", channel_id, err);
            }
            Err(_) => {
                warn!(
                    "tts delivery timed out: channel_id={} timeout={:?}",
                    channel_id, self.job_timeout
                );
                self.timed_out(channel_id).await;
            }
        }
    }

    async fn run(self, mut rx: mpsc::Receiver<TtsMessage>) {
        info!("tts worker started");
        while let Some(message) = rx.recv().await {
            match message {
                TtsMessage::Shutdown => break,
                TtsMessage::Job(job) => self.process(job).await,
            }
        }
        info!("tts worker stopped");
    }

    async fn process(&self, job: TtsJob) {
        let channel_id = job.requester.channel_id;
        let synth = Arc::clone(&self.synth);
        let text = job.text;
        // a panicking backend surfaces as a JoinError instead of killing the worker
        let mut task = tokio::spawn(async move { synth.synthesize(&text).await });

        match tokio::time::timeout(self.job_timeout, &mut task).await {
            Ok(Ok(Ok(path))) => self.deliver(channel_id, path).await,
            Ok(Ok(Err(err))) => {
                warn!("tts job failed: channel_id={} err={}", channel_id, err);
                notify_best_effort(self.outbox.as_ref(), channel_id, &self.notices.failed, "tts_failed").await;
            }
            Ok(Err(join_err)) => {
                error!("tts job crashed: channel_id={} err={}", channel_id, join_err);
                notify_best_effort(self.outbox.as_ref(), channel_id, &self.notices.failed, "tts_failed").await;
            }
            Err(_) => {
                task.abort();
                warn!(
                    "tts job timed out: channel_id={} timeout={:?}",
                    channel_id, self.job_timeout
                );
                self.timed_out(channel_id).await;
            }
        }
    }
}
