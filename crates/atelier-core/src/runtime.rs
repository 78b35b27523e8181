//! The process-wide context: owns every store, timer, queue and backend handle,
//! and exposes one method per chat-facing operation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backends::forge::ForgeClient;
use crate::backends::kobold::KoboldClient;
use crate::backends::kokoro::KokoroSynth;
use crate::backends::search::WebSearch;
use crate::backends::{ImageBackend, SearchBackend, SpeechBackend, TextBackend};
use crate::config::{idle_threshold, AppConfig, Resolution};
use crate::conversation::{ChatReply, Conversation, ConversationParams};
use crate::error::{AtelierError, Result};
use crate::history::HistoryStore;
use crate::idle::{BackendLiveness, IdleSupervisor, IdleSupervisorParams};
use crate::imagegen::{build_payload, image_file_name, split_prompt};
use crate::listen::{Activation, ListenMode, ListenNotices};
use crate::outbox::{notify_best_effort, Outbox};
use crate::process::{
    wait_until_ready, LaunchSpec, ManagedProcess, ProcessManager, Readiness, StartOutcome, StopOutcome,
};
use crate::profiles::ProfileStore;
use crate::stats::GenerationStats;
use crate::tts_queue::{TtsNotices, TtsQueue};
use crate::types::{BackendKind, ChannelId, Requester, SearchHit, TtsJob, UserId};

const SUMMARY_PROMPT: &str = "Summarize the following web page content in a few short paragraphs. \
Keep names, numbers and dates exact.\n\n[PAGE]\n{page}\n[/PAGE]\n\nSummary:";

/// Channel-visible texts produced by background work. `{backend}` is substituted.
#[derive(Debug, Clone)]
pub struct Notices {
    pub listen: ListenNotices,
    pub tts: TtsNotices,
    pub idle_shutdown: String,
    pub backend_ready: String,
    pub backend_not_ready: String,
}

fn render_backend(template: &str, kind: BackendKind) -> String {
    template.replace("{backend}", kind.name())
}

pub struct Backends {
    pub image: Arc<dyn ImageBackend>,
    pub text: Arc<dyn TextBackend>,
    pub speech: Arc<dyn SpeechBackend>,
    pub search: Arc<dyn SearchBackend>,
}

impl Backends {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            image: Arc::new(ForgeClient::new(&config.image)?),
            text: Arc::new(KoboldClient::new(&config.text)?),
            speech: Arc::new(KokoroSynth::new(&config.tts)),
            search: Arc::new(WebSearch::new(&config.search)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub preset: String,
    pub resolution: Resolution,
    /// `None` when the counter could not be persisted.
    pub total_generations: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub running: bool,
    pub online: bool,
    pub pid: Option<u32>,
    pub idle_supervised: bool,
}

struct Managed {
    process: Arc<ProcessManager>,
    liveness: Arc<BackendLiveness>,
    idle: Arc<IdleSupervisor>,
}

pub struct Runtime {
    config: AppConfig,
    history: Arc<HistoryStore>,
    listen: Arc<ListenMode>,
    conversation: Conversation,
    tts: Arc<TtsQueue>,
    image: Arc<dyn ImageBackend>,
    text: Arc<dyn TextBackend>,
    search: Arc<dyn SearchBackend>,
    stats: GenerationStats,
    profiles: Arc<ProfileStore>,
    forge: Managed,
    kobold: Managed,
    resolutions: Mutex<HashMap<ChannelId, String>>,
    outbox: Arc<dyn Outbox>,
    notices: Notices,
    cancel: CancellationToken,
}

impl Runtime {
    /// Must be called inside a tokio runtime: the TTS worker is spawned here.
    pub fn new(
        config: AppConfig,
        persona: String,
        backends: Backends,
        outbox: Arc<dyn Outbox>,
        notices: Notices,
    ) -> Arc<Self> {
        let history = Arc::new(HistoryStore::new());
        let profiles = Arc::new(ProfileStore::new(&config.storage.profiles_dir));
        let stats = GenerationStats::new(&config.storage.stats_path);

        let listen = ListenMode::new(
            config.chat.listen_warn_after(),
            config.chat.listen_grace(),
            history.clone(),
            outbox.clone(),
            notices.listen.clone(),
        );
        let tts = Arc::new(TtsQueue::spawn(
            config.tts.queue_capacity,
            Duration::from_secs(config.tts.job_timeout_seconds),
            backends.speech.clone(),
            outbox.clone(),
            notices.tts.clone(),
        ));

        let stop_wait = Duration::from_secs(config.lifecycle.stop_wait_seconds);
        let idle_interval = Duration::from_secs(config.lifecycle.idle_check_interval_seconds.max(1));
        let managed = |kind: BackendKind, minutes: i64, clears: Option<Arc<HistoryStore>>| {
            let process = Arc::new(ProcessManager::new(kind.name(), stop_wait));
            let liveness = Arc::new(BackendLiveness::new());
            let idle = IdleSupervisor::new(IdleSupervisorParams {
                kind,
                liveness: liveness.clone(),
                process: process.clone(),
                threshold: idle_threshold(minutes),
                interval: idle_interval,
                outbox: outbox.clone(),
                status_channel: config.telegram.status_chat_id,
                notice: render_backend(&notices.idle_shutdown, kind),
                history: clears,
            });
            Managed {
                process,
                liveness,
                idle,
            }
        };
        let forge = managed(BackendKind::Image, config.image.idle_timeout_minutes, None);
        let kobold = managed(
            BackendKind::Text,
            config.text.idle_timeout_minutes,
            Some(history.clone()),
        );

        let conversation = Conversation::new(ConversationParams {
            history: history.clone(),
            text: backends.text.clone(),
            liveness: kobold.liveness.clone(),
            profiles: profiles.clone(),
            tts: config.chat.voice_replies.then(|| tts.clone()),
            persona,
            responder: config.telegram.bot_name.clone(),
            token_limit: config.chat.context_token_limit,
        });

        info!(
            "runtime ready: token_limit={} listen_window={}s tts_capacity={} voice_replies={}",
            config.chat.context_token_limit,
            config.chat.listen_window_seconds,
            config.tts.queue_capacity,
            config.chat.voice_replies
        );

        Arc::new(Self {
            history,
            listen,
            conversation,
            tts,
            image: backends.image,
            text: backends.text,
            search: backends.search,
            stats,
            profiles,
            forge,
            kobold,
            resolutions: Mutex::new(HashMap::new()),
            outbox,
            notices,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn listen(&self) -> &Arc<ListenMode> {
        &self.listen
    }

    fn managed(&self, kind: BackendKind) -> &Managed {
        match kind {
            BackendKind::Image => &self.forge,
            BackendKind::Text => &self.kobold,
        }
    }

    // ---- chat ----

    /// Explicit chat invocation: starts or resets listen mode, then replies.
    pub async fn direct_chat(
        &self,
        requester: Requester,
        speaker: &str,
        message: &str,
    ) -> (Activation, Result<ChatReply>) {
        let activation = self.listen.activate(requester.channel_id);
        let reply = self.conversation.reply(requester, speaker, message).await;
        (activation, reply)
    }

    /// Bare mention. `None` when the channel is not in listen mode.
    pub async fn mention_chat(
        &self,
        requester: Requester,
        speaker: &str,
        message: &str,
    ) -> Option<Result<ChatReply>> {
        if !self.listen.is_active(requester.channel_id) {
            return None;
        }
        Some(self.conversation.reply(requester, speaker, message).await)
    }

    pub fn listen_reset(&self, channel_id: ChannelId) -> bool {
        self.listen.reset(channel_id)
    }

    pub async fn listen_stop(&self, channel_id: ChannelId) -> bool {
        self.listen.stop(channel_id).await
    }

    pub fn clear_history(&self, channel_id: ChannelId) -> bool {
        let cleared = self.history.clear(channel_id);
        info!("history cleared: channel_id={} had_turns={}", channel_id, cleared);
        cleared
    }

    // ---- images ----

    fn resolution_slot(&self) -> MutexGuard<'_, HashMap<ChannelId, String>> {
        self.resolutions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn resolution_choices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.image.resolutions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn current_resolution(&self, channel_id: ChannelId) -> (String, Resolution) {
        let preset = self
            .resolution_slot()
            .get(&channel_id)
            .cloned()
            .unwrap_or_else(|| self.config.image.default_resolution.clone());
        match self.config.resolution(&preset) {
            Some(res) => (preset, res),
            None => (
                preset,
                Resolution {
                    width: 1024,
                    height: 1024,
                },
            ),
        }
    }

    pub fn set_resolution(&self, channel_id: ChannelId, preset: &str) -> Result<(String, Resolution)> {
        let name = preset.trim().to_ascii_lowercase();
        let Some(res) = self.config.resolution(&name) else {
            return Err(AtelierError::InvalidRequest(format!(
                "unknown resolution '{}', choices: {}",
                preset.trim(),
                self.resolution_choices().join(", ")
            )));
        };
        self.resolution_slot().insert(channel_id, name.clone());
        info!(
            "resolution set: channel_id={} preset={} size={}x{}",
            channel_id, name, res.width, res.height
        );
        Ok((name, res))
    }

    pub async fn generate_image(&self, requester: Requester, raw_prompt: &str) -> Result<ImageOutcome> {
        let request = split_prompt(raw_prompt)
            .ok_or_else(|| AtelierError::InvalidRequest("no prompt".to_string()))?;
        let (preset, resolution) = self.current_resolution(requester.channel_id);
        let payload = build_payload(&self.config.image, &request, resolution);
        info!(
            "image requested: channel_id={} user_id={} preset={} upscale={}",
            requester.channel_id, requester.user_id, preset, request.upscale
        );

        let image = self.image.generate(&payload).await?;
        self.forge.liveness.record_success();

        let total_generations = match self.stats.increment(requester.user_id).await {
            Ok(total) => Some(total),
            Err(err) => {
                warn!(
                    "stats update failed: user_id={} err={}",
                    requester.user_id, err
                );
                None
            }
        };
        Ok(ImageOutcome {
            file_name: image_file_name(),
            bytes: image.bytes,
            preset,
            resolution,
            total_generations,
        })
    }

    pub async fn generation_count(&self, user_id: UserId) -> Result<u64> {
        self.stats.count(user_id).await
    }

    // ---- backend lifecycle ----

    fn launch_spec(&self, kind: BackendKind, profile: Option<&str>) -> Result<LaunchSpec> {
        match kind {
            BackendKind::Image => {
                let script = self.config.image.launch_script.trim();
                if script.is_empty() {
                    return Err(AtelierError::Config("image.launch_script is not configured".to_string()));
                }
                Ok(LaunchSpec::new(script))
            }
            BackendKind::Text => {
                let exe = self.config.text.launch_executable.trim();
                if exe.is_empty() {
                    return Err(AtelierError::Config(
                        "text.launch_executable is not configured".to_string(),
                    ));
                }
                let name = profile.unwrap_or(&self.config.text.default_profile);
                let Some(profile_path) = self.config.text.profiles.get(name) else {
                    let mut known: Vec<&str> = self.config.text.profiles.keys().map(String::as_str).collect();
                    known.sort_unstable();
                    return Err(AtelierError::Config(format!(
                        "unknown text profile '{}', choices: {}",
                        name,
                        known.join(", ")
                    )));
                };
                if !Path::new(profile_path).exists() {
                    return Err(AtelierError::Config(format!(
                        "profile file for '{name}' not found: {profile_path}"
                    )));
                }
                Ok(LaunchSpec::new(exe).arg("--config").arg(profile_path.clone()))
            }
        }
    }

    /// Launches the backend and returns at once. Readiness is reported to
    /// `notify_channel` from a background task; the idle supervisor is started
    /// if it is not running yet.
    pub fn start_backend(
        self: &Arc<Self>,
        kind: BackendKind,
        profile: Option<&str>,
        notify_channel: Option<ChannelId>,
    ) -> Result<StartOutcome> {
        let spec = self.launch_spec(kind, profile)?;
        let managed = self.managed(kind);
        let outcome = managed.process.start(&spec)?;
        managed.idle.start();

        if matches!(outcome, StartOutcome::Spawned { .. }) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::select! {
                    _ = this.cancel.cancelled() => {}
                    _ = this.watch_readiness(kind, notify_channel) => {}
                }
            });
        }
        Ok(outcome)
    }

    async fn backend_online(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Image => self.image.is_online().await,
            BackendKind::Text => self.text.is_online().await,
        }
    }

    async fn watch_readiness(&self, kind: BackendKind, notify_channel: Option<ChannelId>) {
        let readiness = wait_until_ready(
            || self.backend_online(kind),
            Duration::from_secs(self.config.lifecycle.health_poll_interval_seconds),
            self.config.lifecycle.health_poll_attempts,
        )
        .await;
        let template = match readiness {
            Readiness::Ready { attempts } => {
                info!("backend ready: backend={} attempts={}", kind.name(), attempts);
                // a passing health probe is a confirmed round-trip
                self.managed(kind).liveness.record_success();
                &self.notices.backend_ready
            }
            Readiness::TimedOut { attempts } => {
                warn!(
                    "backend not responding yet: backend={} attempts={}",
                    kind.name(),
                    attempts
                );
                &self.notices.backend_not_ready
            }
        };
        if let Some(channel_id) = notify_channel {
            notify_best_effort(
                self.outbox.as_ref(),
                channel_id,
                &render_backend(template, kind),
                "backend_readiness",
            )
            .await;
        }
    }

    /// Stopping the text backend also clears every channel's history.
    pub async fn stop_backend(&self, kind: BackendKind) -> Result<StopOutcome> {
        let managed = self.managed(kind);
        let outcome = managed.process.stop().await?;
        managed.liveness.forget();
        if kind == BackendKind::Text {
            let cleared = self.history.clear_all();
            info!("history cleared after text backend stop: channels={}", cleared);
        }
        Ok(outcome)
    }

    pub async fn backend_status(&self, kind: BackendKind) -> BackendStatus {
        let managed = self.managed(kind);
        BackendStatus {
            running: managed.process.is_running().await,
            online: self.backend_online(kind).await,
            pid: managed.process.pid(),
            idle_supervised: managed.idle.is_started(),
        }
    }

    // ---- speech, vision, search ----

    /// Returns false when the speech queue is full.
    pub fn say(&self, requester: Requester, text: &str) -> bool {
        self.tts.enqueue(TtsJob {
            requester,
            text: text.to_string(),
        })
    }

    pub async fn caption(&self, image: &[u8]) -> Result<String> {
        let caption = self.text.interrogate(image).await?;
        self.kobold.liveness.record_success();
        Ok(caption)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search.search(query).await
    }

    pub async fn summarize(&self, url: &str) -> Result<String> {
        let page = self.search.scrape(url).await?;
        let excerpt: String = page.chars().take(self.config.search.scrape_max_chars).collect();
        let prompt = SUMMARY_PROMPT.replace("{page}", &excerpt);
        let summary = self.text.generate(&prompt).await?;
        self.kobold.liveness.record_success();
        Ok(summary.trim().to_string())
    }

    // ---- shutdown ----

    /// Stops timers and supervisors, drains the speech queue, then stops any
    /// backend process this runtime launched.
    pub async fn shutdown(&self) {
        info!("runtime shutting down");
        self.cancel.cancel();
        self.listen.shutdown();
        self.forge.idle.shutdown();
        self.kobold.idle.shutdown();
        self.tts.shutdown().await;
        for kind in [BackendKind::Image, BackendKind::Text] {
            if let Err(err) = self.managed(kind).process.stop().await {
                warn!("backend stop on shutdown failed: backend={} err={}", kind.name(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::test_support::{FakeImage, FakeSearch, InstantSpeech, RecordingOutbox, ScriptedText};
    use crate::types::Turn;

    struct Rig {
        runtime: Arc<Runtime>,
        image: Arc<FakeImage>,
        text: Arc<ScriptedText>,
        speech: Arc<InstantSpeech>,
        outbox: Arc<RecordingOutbox>,
        dir: tempfile::TempDir,
    }

    fn notices() -> Notices {
        Notices {
            listen: ListenNotices {
                warning: "WARN".to_string(),
                deactivated: "OFF".to_string(),
                stopped: "STOPPED".to_string(),
            },
            tts: TtsNotices {
                timed_out: "TTS_TIMEOUT".to_string(),
                failed: "TTS_FAILED".to_string(),
            },
            idle_shutdown: "{backend} idle".to_string(),
            backend_ready: "{backend} ready".to_string(),
            backend_not_ready: "{backend} not ready".to_string(),
        }
    }

    fn rig_with(edit: impl FnOnce(&mut AppConfig, &Path)) -> Rig {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.storage.stats_path = dir.path().join("stats.json").display().to_string();
        config.storage.profiles_dir = dir.path().join("profiles").display().to_string();
        config.search.scrape_max_chars = 40;
        edit(&mut config, dir.path());

        let image = Arc::new(FakeImage::default());
        let text = Arc::new(ScriptedText::default());
        let speech = Arc::new(InstantSpeech::default());
        let outbox = Arc::new(RecordingOutbox::default());
        let runtime = Runtime::new(
            config,
            "You are Atelier.".to_string(),
            Backends {
                image: image.clone(),
                text: text.clone(),
                speech: speech.clone(),
                search: Arc::new(FakeSearch),
            },
            outbox.clone(),
            notices(),
        );
        Rig {
            runtime,
            image,
            text,
            speech,
            outbox,
            dir,
        }
    }

    fn rig() -> Rig {
        rig_with(|_, _| {})
    }

    fn who() -> Requester {
        Requester {
            channel_id: 5,
            user_id: 77,
        }
    }

    #[tokio::test]
    async fn image_success_counts_and_records_use() {
        let r = rig();
        r.runtime.set_resolution(5, "Landscape").expect("preset");
        let out = r.runtime.generate_image(who(), "a lighthouse :: fog").await.expect("image");

        assert_eq!(out.preset, "landscape");
        assert_eq!(out.total_generations, Some(1));
        assert!(out.file_name.starts_with("generated_image_"));
        assert!(r.runtime.forge.liveness.last_success().is_some());
        let payload = r.image.payloads().pop().expect("payload");
        assert_eq!((payload.width, payload.height), (1520, 1024));
        assert!(payload.negative_prompt.starts_with("fog, "));
        assert_eq!(r.runtime.generation_count(77).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn image_failure_is_not_counted() {
        let r = rig();
        r.image.set_failing(true);
        let err = r.runtime.generate_image(who(), "a lighthouse").await.expect_err("must fail");
        assert!(err.is_backend_failure());
        assert_eq!(r.runtime.generation_count(77).await.expect("count"), 0);
        assert!(r.runtime.forge.liveness.last_success().is_none());

        let err = r.runtime.generate_image(who(), ":: only negative").await.expect_err("no prompt");
        assert!(matches!(err, AtelierError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unknown_resolution_lists_choices() {
        let r = rig();
        let err = r.runtime.set_resolution(5, "panorama").expect_err("must fail");
        assert!(err.to_string().contains("landscape, portrait, square"));
        assert_eq!(r.runtime.current_resolution(5).0, "portrait");
    }

    #[tokio::test]
    async fn mentions_only_answer_while_listening() {
        let r = rig();
        assert!(r.runtime.mention_chat(who(), "zoe", "hello?").await.is_none());

        let (activation, reply) = r.runtime.direct_chat(who(), "zoe", "hi").await;
        assert_eq!(activation, Activation::Started);
        assert_eq!(reply.expect("reply").text, "ok");

        let reply = r.runtime.mention_chat(who(), "zoe", "still there?").await;
        assert!(reply.expect("listening").is_ok());
        assert_eq!(r.runtime.history().len(5), 4);

        assert!(r.runtime.listen_stop(5).await);
        assert!(r.runtime.history().get(5).is_empty());
        assert!(r.runtime.mention_chat(who(), "zoe", "gone?").await.is_none());
    }

    #[tokio::test]
    async fn launch_misconfiguration_is_reported() {
        let r = rig_with(|cfg, dir| {
            cfg.text.launch_executable = dir.join("koboldcpp").display().to_string();
            cfg.text
                .profiles
                .insert("missing".to_string(), dir.join("nope.kcpps").display().to_string());
        });
        let err = r.runtime.start_backend(BackendKind::Image, None, None).expect_err("no script");
        assert!(matches!(err, AtelierError::Config(_)));

        let err = r
            .runtime
            .start_backend(BackendKind::Text, Some("ghost"), None)
            .expect_err("unknown profile");
        assert!(err.to_string().contains("missing"));

        let err = r
            .runtime
            .start_backend(BackendKind::Text, Some("missing"), None)
            .expect_err("missing file");
        assert!(matches!(err, AtelierError::Config(_)));

        let status = r.runtime.backend_status(BackendKind::Text).await;
        assert!(!status.running);
        assert!(!status.idle_supervised);
    }

    #[tokio::test]
    async fn stopping_text_backend_clears_all_history() {
        let r = rig();
        r.runtime.history().append(1, Turn::new("a", "x"));
        r.runtime.history().append(2, Turn::new("b", "y"));
        assert_eq!(
            r.runtime.stop_backend(BackendKind::Text).await.expect("stop"),
            StopOutcome::NotRunning
        );
        assert!(r.runtime.history().get(1).is_empty());
        assert!(r.runtime.history().get(2).is_empty());

        r.runtime.history().append(1, Turn::new("a", "x"));
        r.runtime.stop_backend(BackendKind::Image).await.expect("stop");
        assert_eq!(r.runtime.history().len(1), 1);
    }

    #[tokio::test]
    async fn summarize_sends_a_bounded_excerpt() {
        let r = rig();
        r.text.push_reply(Ok("  A page about words.  "));
        let summary = r.runtime.summarize("https://example.com").await.expect("summary");
        assert_eq!(summary, "A page about words.");
        let prompt = r.text.prompts().pop().expect("prompt");
        let page = prompt
            .split("[PAGE]\n")
            .nth(1)
            .and_then(|rest| rest.split("\n[/PAGE]").next())
            .expect("page block");
        assert_eq!(page.chars().count(), 40);

        assert!(r.runtime.summarize("https://broken.example").await.is_err());
    }

    #[tokio::test]
    async fn say_and_caption() {
        let r = rig();
        assert!(r.runtime.say(who(), "read this"));
        let caption = r.runtime.caption(b"jpegbytes").await.expect("caption");
        assert!(caption.contains("9 bytes"));
        assert!(r.runtime.kobold.liveness.last_success().is_some());
        r.runtime.shutdown().await;
        assert_eq!(r.speech.spoken(), vec!["read this".to_string()]);
        assert!(!r.runtime.say(who(), "too late"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn started_backend_reports_readiness_and_stops() {
        use std::os::unix::fs::PermissionsExt;

        let r = rig_with(|cfg, dir| {
            let script = dir.join("webui.sh");
            std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").expect("script");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
            cfg.image.launch_script = script.display().to_string();
            cfg.telegram.status_chat_id = None;
        });
        let outcome = r
            .runtime
            .start_backend(BackendKind::Image, None, Some(9))
            .expect("start");
        assert!(matches!(outcome, StartOutcome::Spawned { .. }));
        assert_eq!(
            r.runtime.start_backend(BackendKind::Image, None, Some(9)).expect("again"),
            StartOutcome::AlreadyRunning
        );

        let mut ready = false;
        for _ in 0..100 {
            if r.outbox.texts_containing("forge ready") == 1 {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ready);
        let status = r.runtime.backend_status(BackendKind::Image).await;
        assert!(status.running && status.online && status.idle_supervised);
        assert!(r.runtime.forge.liveness.last_success().is_some());

        assert_eq!(
            r.runtime.stop_backend(BackendKind::Image).await.expect("stop"),
            StopOutcome::Exited
        );
        assert!(!r.runtime.backend_status(BackendKind::Image).await.running);
        drop(r.dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_text_backend_is_reported_not_ready() {
        use std::os::unix::fs::PermissionsExt;

        let r = rig_with(|cfg, dir| {
            let exe = dir.join("koboldcpp");
            std::fs::write(&exe, "#!/bin/sh\nexec sleep 30\n").expect("exe");
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).expect("chmod");
            let profile = dir.join("small.kcpps");
            std::fs::write(&profile, "{}").expect("profile");
            cfg.text.launch_executable = exe.display().to_string();
            cfg.text
                .profiles
                .insert("small".to_string(), profile.display().to_string());
            cfg.lifecycle.health_poll_interval_seconds = 0;
            cfg.lifecycle.health_poll_attempts = 3;
        });
        r.text.set_offline(true);

        let outcome = r
            .runtime
            .start_backend(BackendKind::Text, Some("small"), Some(9))
            .expect("start");
        assert!(matches!(outcome, StartOutcome::Spawned { .. }));

        let mut reported = false;
        for _ in 0..100 {
            if r.outbox.texts_containing("koboldcpp not ready") == 1 {
                reported = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reported);
        assert!(r.runtime.kobold.liveness.last_success().is_none());

        r.runtime.shutdown().await;
        assert!(!r.runtime.backend_status(BackendKind::Text).await.running);
    }
}
