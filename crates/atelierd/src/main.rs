use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use atelier_core::backends::kokoro::clean_text;
use atelier_core::command::{classify, BackendAction, Command, Inbound, InboundContext, ProfileAction};
use atelier_core::config::AppConfig;
use atelier_core::error::AtelierError;
use atelier_core::listen::{Activation, ListenNotices};
use atelier_core::outbox::{Attachment, Outbox};
use atelier_core::process::{StartOutcome, StopOutcome};
use atelier_core::runtime::{Backends, Notices, Runtime};
use atelier_core::tts_queue::TtsNotices;
use atelier_core::types::{BackendKind, Requester};
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use teloxide::prelude::*;
use teloxide::requests::Requester as _;
use teloxide::types::{ChatAction, ChatId, InputFile, UserId};
use toml::Value as TomlValue;
use tracing::{debug, info, warn};

const CONFIG_PATH: &str = "configs/config.toml";
const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
const BUNDLED_PERSONA: &str = include_str!("../../../prompts/persona.md");
const BUNDLED_CATALOG: &str = include_str!("../../../configs/i18n/atelierd.en.toml");
const MAX_REPLY_CHARS: usize = 4000;

#[derive(Clone)]
struct BotState {
    admins: Arc<HashSet<i64>>,
    allowlist: Arc<HashSet<i64>>,
    allowed_chats: Arc<HashSet<i64>>,
    refused_chats: Arc<Mutex<HashSet<i64>>>,
    bot_username: String,
    bot_user_id: Option<UserId>,
    bot_token: String,
    client: Client,
    runtime: Arc<Runtime>,
    i18n: Arc<TextCatalog>,
}

#[derive(Debug, Clone)]
struct TextCatalog {
    current: HashMap<String, String>,
}

impl TextCatalog {
    fn parse(raw: &str, origin: &str) -> anyhow::Result<Self> {
        let value: TomlValue = toml::from_str(raw)?;
        let dict = value
            .get("dict")
            .and_then(|v| v.as_table())
            .ok_or_else(|| anyhow!("missing [dict] table in i18n file: {origin}"))?;

        let mut current = HashMap::new();
        for (k, v) in dict {
            if let Some(text) = v.as_str() {
                current.insert(k.to_string(), text.to_string());
            }
        }
        Ok(Self { current })
    }

    fn load(path: &str) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw, path)
    }

    /// The catalog compiled into the binary. Keys missing there render as the key itself.
    fn fallback() -> Self {
        Self::parse(BUNDLED_CATALOG, "bundled").unwrap_or_else(|_| Self {
            current: HashMap::new(),
        })
    }

    fn t(&self, key: &str) -> String {
        self.current
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn t_with(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let mut out = self.t(key);
        for (name, value) in vars {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }

    fn notices(&self) -> Notices {
        Notices {
            listen: ListenNotices {
                warning: self.t("atelier.notice.listen_warning"),
                deactivated: self.t("atelier.notice.listen_deactivated"),
                stopped: self.t("atelier.notice.listen_stopped"),
            },
            tts: TtsNotices {
                timed_out: self.t("atelier.notice.tts_timed_out"),
                failed: self.t("atelier.notice.tts_failed"),
            },
            idle_shutdown: self.t("atelier.notice.idle_shutdown"),
            backend_ready: self.t("atelier.notice.backend_ready"),
            backend_not_ready: self.t("atelier.notice.backend_not_ready"),
        }
    }
}

/// Delivers background notices and synthesized audio to Telegram chats.
struct TelegramOutbox {
    bot: Bot,
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send_text(&self, channel_id: i64, text: &str) -> atelier_core::Result<()> {
        self.bot
            .send_message(ChatId(channel_id), text)
            .await
            .map_err(|err| AtelierError::unavailable("telegram", err))?;
        Ok(())
    }

    async fn send_attachment(
        &self,
        channel_id: i64,
        attachment: Attachment,
        caption: Option<&str>,
    ) -> atelier_core::Result<()> {
        let chat_id = ChatId(channel_id);
        match attachment {
            Attachment::Image { file_name, bytes } => {
                let mut req = self
                    .bot
                    .send_photo(chat_id, InputFile::memory(bytes).file_name(file_name));
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                req.await
                    .map_err(|err| AtelierError::unavailable("telegram", err))?;
            }
            Attachment::Audio { path } => {
                if let Err(err) = self.bot.send_voice(chat_id, InputFile::file(path.clone())).await {
                    warn!("send_voice failed, retrying as document: path={} err={}", path.display(), err);
                    self.bot
                        .send_document(chat_id, InputFile::file(path))
                        .await
                        .map_err(|err| AtelierError::unavailable("telegram", err))?;
                }
            }
        }
        Ok(())
    }
}

fn load_persona(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => BUNDLED_PERSONA.to_string(),
        Err(err) => {
            warn!("load persona failed, using bundled persona: path={} err={}", path, err);
            BUNDLED_PERSONA.to_string()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(false)
        .compact()
        .init();

    let mut config = AppConfig::load(CONFIG_PATH).context("load configs/config.toml failed")?;
    if config.telegram.bot_token.trim().is_empty() {
        config.telegram.bot_token = std::env::var(TOKEN_ENV).unwrap_or_default();
    }
    if config.telegram.bot_token.trim().is_empty() {
        return Err(anyhow!(
            "telegram bot token missing: set telegram.bot_token or {TOKEN_ENV}"
        ));
    }

    let i18n = match TextCatalog::load(&config.telegram.i18n_path) {
        Ok(v) => Arc::new(v),
        Err(err) => {
            warn!(
                "load i18n file failed: path={} err={}",
                config.telegram.i18n_path, err
            );
            Arc::new(TextCatalog::fallback())
        }
    };
    let persona = load_persona(&config.chat.persona_path);

    let bot = Bot::new(config.telegram.bot_token.clone());
    let me = bot.get_me().await.context("telegram getMe failed")?;
    let bot_username = me.username().to_string();
    if let Err(err) = register_telegram_commands_and_menu(&config.telegram.bot_token, i18n.as_ref()).await {
        warn!("register Telegram menu failed: {err}");
    } else {
        info!("registered Telegram menu commands");
    }

    let mut allowlist = HashSet::new();
    for id in &config.telegram.allowlist {
        allowlist.insert(*id);
    }
    let mut admins = HashSet::new();
    for id in &config.telegram.admins {
        admins.insert(*id);
        if !allowlist.is_empty() {
            allowlist.insert(*id);
        }
    }
    let allowed_chats: HashSet<i64> = config.telegram.allowed_chats.iter().copied().collect();

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("build reqwest client failed")?;
    let backends = Backends::from_config(&config).context("build backend clients failed")?;
    let outbox = Arc::new(TelegramOutbox { bot: bot.clone() });
    let bot_token = config.telegram.bot_token.clone();
    let runtime = Runtime::new(config, persona, backends, outbox, i18n.notices());

    let state = BotState {
        admins: Arc::new(admins),
        allowlist: Arc::new(allowlist),
        allowed_chats: Arc::new(allowed_chats),
        refused_chats: Arc::new(Mutex::new(HashSet::new())),
        bot_username,
        bot_user_id: Some(me.id),
        bot_token,
        client,
        runtime: runtime.clone(),
        i18n,
    };

    let mut admins_list: Vec<i64> = state.admins.iter().copied().collect();
    admins_list.sort_unstable();
    info!(
        "atelierd started: bot=@{} admins={:?} allowlist_size={} allowed_chats={}",
        state.bot_username,
        admins_list,
        state.allowlist.len(),
        state.allowed_chats.len()
    );

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    runtime.shutdown().await;
    info!("atelierd stopped");
    Ok(())
}

async fn register_telegram_commands_and_menu(bot_token: &str, i18n: &TextCatalog) -> anyhow::Result<()> {
    let api_base = format!("https://api.telegram.org/bot{bot_token}");
    let client = Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("build telegram menu client failed")?;

    let commands: Vec<JsonValue> = [
        "start", "help", "chat", "reset", "stop", "clear", "imagine", "res", "forge", "kobold", "profile",
        "stats", "say", "caption", "search", "summarize",
    ]
    .iter()
    .map(|name| json!({ "command": name, "description": i18n.t(&format!("atelier.menu.{name}_desc")) }))
    .collect();
    let commands_payload = json!({ "commands": commands });

    let cmd_resp = client
        .post(format!("{api_base}/setMyCommands"))
        .json(&commands_payload)
        .send()
        .await
        .context("request setMyCommands failed")?;
    let cmd_status = cmd_resp.status();
    let cmd_body = cmd_resp
        .text()
        .await
        .context("read setMyCommands response failed")?;
    if !cmd_status.is_success() {
        return Err(anyhow!("setMyCommands http {}: {}", cmd_status, cmd_body));
    }
    let cmd_json: JsonValue = serde_json::from_str(&cmd_body).unwrap_or_else(|_| json!({"ok": false}));
    if !cmd_json.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
        return Err(anyhow!("setMyCommands returned not ok: {}", cmd_body));
    }
    Ok(())
}

fn sender_id(msg: &Message) -> i64 {
    msg.from
        .as_ref()
        .map(|u| i64::try_from(u.id.0).unwrap_or_default())
        .unwrap_or_default()
}

fn speaker_name(msg: &Message) -> String {
    msg.from
        .as_ref()
        .map(|u| match &u.username {
            Some(username) if u.first_name.trim().is_empty() => username.clone(),
            _ => u.first_name.clone(),
        })
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "someone".to_string())
}

fn is_reply_to_bot(msg: &Message, bot_user_id: Option<UserId>) -> bool {
    let Some(bot_id) = bot_user_id else {
        return false;
    };
    msg.reply_to_message()
        .and_then(|parent| parent.from.as_ref())
        .is_some_and(|author| author.id == bot_id)
}

/// True when the chat may be served. The first refusal per chat is announced.
async fn admit_chat(bot: &Bot, msg: &Message, state: &BotState) -> anyhow::Result<bool> {
    let chat_id = msg.chat.id.0;
    if state.allowed_chats.is_empty() || state.allowed_chats.contains(&chat_id) {
        return Ok(true);
    }
    let first_refusal = state
        .refused_chats
        .lock()
        .map_err(|_| anyhow!("refused chats lock poisoned"))?
        .insert(chat_id);
    if first_refusal {
        warn!("chat not allowed: chat_id={}", chat_id);
        bot.send_message(msg.chat.id, state.i18n.t("atelier.msg.chat_not_allowed"))
            .await
            .context("send chat refusal failed")?;
    }
    Ok(false)
}

async fn handle_message(bot: Bot, msg: Message, state: BotState) -> anyhow::Result<()> {
    if !admit_chat(&bot, &msg, &state).await? {
        return Ok(());
    }

    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let has_image =
        extract_image_attachment(&msg).is_some() || msg.reply_to_message().and_then(extract_image_attachment).is_some();
    let ctx = InboundContext {
        bot_username: &state.bot_username,
        reply_to_bot: is_reply_to_bot(&msg, state.bot_user_id),
        has_image,
    };
    let inbound = classify(text, &ctx);
    if inbound == Inbound::Ignored {
        return Ok(());
    }

    let user_id = sender_id(&msg);
    if !state.allowlist.is_empty() && !state.allowlist.contains(&user_id) {
        warn!("unauthorized user: user_id={} chat_id={}", user_id, msg.chat.id.0);
        bot.send_message(msg.chat.id, state.i18n.t("atelier.msg.unauthorized"))
            .await
            .context("send unauthorized message failed")?;
        return Ok(());
    }

    let requester = Requester {
        channel_id: msg.chat.id.0,
        user_id,
    };
    debug!(
        "handle_message: chat_id={} user_id={} inbound={:?}",
        requester.channel_id, user_id, inbound
    );

    match inbound {
        Inbound::Ignored => Ok(()),
        Inbound::Usage(name) => {
            let reply = state.i18n.t(&format!("atelier.usage.{name}"));
            send_text(&bot, msg.chat.id, &reply).await
        }
        Inbound::Mention(text) => {
            let speaker = speaker_name(&msg);
            match state.runtime.mention_chat(requester, &speaker, &text).await {
                None => Ok(()),
                Some(Ok(reply)) => send_text(&bot, msg.chat.id, &reply.text).await,
                Some(Err(err)) => send_text(&bot, msg.chat.id, &error_text(&state, &err)).await,
            }
        }
        Inbound::Command(cmd) => handle_command(&bot, &msg, &state, requester, cmd).await,
    }
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    requester: Requester,
    cmd: Command,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let runtime = &state.runtime;
    let i18n = &state.i18n;

    let reply = match cmd {
        Command::Start => i18n.t("atelier.msg.start"),
        Command::Help => i18n.t("atelier.msg.help"),
        Command::Chat(text) => {
            let speaker = speaker_name(msg);
            let (activation, result) = runtime.direct_chat(requester, &speaker, &text).await;
            if activation == Activation::Started {
                let minutes = (runtime.config().chat.listen_window_seconds / 60).to_string();
                send_text(
                    bot,
                    chat_id,
                    &i18n.t_with("atelier.msg.listen_started", &[("minutes", &minutes)]),
                )
                .await?;
            }
            match result {
                Ok(reply) => reply.text,
                Err(err) => error_text(state, &err),
            }
        }
        Command::ListenReset => {
            if runtime.listen_reset(requester.channel_id) {
                i18n.t("atelier.msg.listen_reset_ok")
            } else {
                i18n.t("atelier.msg.listen_not_active")
            }
        }
        Command::ListenStop => {
            // a successful stop posts its own notice
            if runtime.listen_stop(requester.channel_id).await {
                return Ok(());
            }
            i18n.t("atelier.msg.listen_not_active")
        }
        Command::ClearHistory => {
            if runtime.clear_history(requester.channel_id) {
                i18n.t("atelier.msg.clear_ok")
            } else {
                i18n.t("atelier.msg.clear_empty")
            }
        }
        Command::Generate(raw) => {
            let _ = bot.send_chat_action(chat_id, ChatAction::UploadPhoto).await;
            match runtime.generate_image(requester, &raw).await {
                Ok(out) => {
                    let total = out
                        .total_generations
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    let caption = i18n.t_with(
                        "atelier.msg.image_done",
                        &[
                            ("preset", &out.preset),
                            ("width", &out.resolution.width.to_string()),
                            ("height", &out.resolution.height.to_string()),
                            ("total", &total),
                        ],
                    );
                    bot.send_photo(chat_id, InputFile::memory(out.bytes).file_name(out.file_name))
                        .caption(caption)
                        .await
                        .context("send generated image failed")?;
                    return Ok(());
                }
                Err(AtelierError::InvalidRequest(_)) => i18n.t("atelier.msg.no_prompt"),
                Err(err) => error_text(state, &err),
            }
        }
        Command::SetResolution(preset) => match runtime.set_resolution(requester.channel_id, &preset) {
            Ok((name, res)) => i18n.t_with(
                "atelier.msg.res_set",
                &[
                    ("preset", &name),
                    ("width", &res.width.to_string()),
                    ("height", &res.height.to_string()),
                ],
            ),
            Err(_) => i18n.t_with(
                "atelier.msg.res_invalid",
                &[("choices", &runtime.resolution_choices().join(", "))],
            ),
        },
        Command::Backend { kind, action } => {
            if !state.admins.contains(&requester.user_id) {
                i18n.t("atelier.msg.admin_only")
            } else {
                backend_command(state, requester, kind, action).await
            }
        }
        Command::Profile(action) => profile_command(state, requester, action).await,
        Command::Stats => match runtime.generation_count(requester.user_id).await {
            Ok(count) => i18n.t_with("atelier.msg.stats", &[("count", &count.to_string())]),
            Err(err) => error_text(state, &err),
        },
        Command::Say(text) => {
            if clean_text(&text, runtime.config().tts.max_chars).is_empty() {
                i18n.t("atelier.usage.say")
            } else if runtime.say(requester, &text) {
                i18n.t("atelier.msg.say_queued")
            } else {
                i18n.t("atelier.msg.tts_busy")
            }
        }
        Command::Caption => match caption_image(bot, msg, state).await {
            Ok(caption) => i18n.t_with("atelier.msg.caption", &[("caption", &caption)]),
            Err(err) => {
                warn!("caption failed: chat_id={} err={:#}", chat_id.0, err);
                match err.downcast_ref::<AtelierError>() {
                    Some(core_err) => error_text(state, core_err),
                    None => i18n.t("atelier.msg.download_failed"),
                }
            }
        },
        Command::Search(query) => match runtime.search(&query).await {
            Ok(hits) if hits.is_empty() => i18n.t("atelier.msg.search_none"),
            Ok(hits) => hits
                .iter()
                .enumerate()
                .map(|(i, hit)| format!("{}. {} — {}", i + 1, hit.title, hit.link))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => error_text(state, &err),
        },
        Command::Summarize(url) => match runtime.summarize(&url).await {
            Ok(summary) => summary,
            Err(err) => error_text(state, &err),
        },
    };
    send_text(bot, chat_id, &reply).await
}

async fn backend_command(state: &BotState, requester: Requester, kind: BackendKind, action: BackendAction) -> String {
    let runtime = &state.runtime;
    let i18n = &state.i18n;
    let backend = kind.name();
    match action {
        BackendAction::Start(profile) => {
            match runtime.start_backend(kind, profile.as_deref(), Some(requester.channel_id)) {
                Ok(StartOutcome::AlreadyRunning) => {
                    i18n.t_with("atelier.msg.backend_already_running", &[("backend", backend)])
                }
                Ok(StartOutcome::Spawned { pid }) => {
                    let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
                    i18n.t_with("atelier.msg.backend_starting", &[("backend", backend), ("pid", &pid)])
                }
                Err(err) => error_text(state, &err),
            }
        }
        BackendAction::Stop => match runtime.stop_backend(kind).await {
            Ok(StopOutcome::NotRunning) => i18n.t_with("atelier.msg.backend_not_running", &[("backend", backend)]),
            Ok(StopOutcome::Exited) => i18n.t_with("atelier.msg.backend_stopped", &[("backend", backend)]),
            Ok(StopOutcome::Unconfirmed) => {
                i18n.t_with("atelier.msg.backend_stop_unconfirmed", &[("backend", backend)])
            }
            Err(err) => error_text(state, &err),
        },
        BackendAction::Status => {
            let status = runtime.backend_status(kind).await;
            let yes_no = |flag: bool| {
                if flag {
                    i18n.t("atelier.word.yes")
                } else {
                    i18n.t("atelier.word.no")
                }
            };
            let pid = status.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            i18n.t_with(
                "atelier.msg.backend_status",
                &[
                    ("backend", backend),
                    ("running", &yes_no(status.running)),
                    ("online", &yes_no(status.online)),
                    ("pid", &pid),
                    ("supervised", &yes_no(status.idle_supervised)),
                ],
            )
        }
    }
}

async fn profile_command(state: &BotState, requester: Requester, action: ProfileAction) -> String {
    let profiles = state.runtime.profiles();
    let i18n = &state.i18n;
    match action {
        ProfileAction::Set(text) => match profiles.set(requester.user_id, &text).await {
            Ok(()) => i18n.t("atelier.msg.profile_saved"),
            Err(err) => error_text(state, &err),
        },
        ProfileAction::Show => match profiles.get(requester.user_id).await {
            Ok(Some(profile)) => i18n.t_with("atelier.msg.profile_show", &[("profile", &profile)]),
            Ok(None) => i18n.t("atelier.msg.profile_none"),
            Err(err) => error_text(state, &err),
        },
        ProfileAction::Delete => match profiles.delete(requester.user_id).await {
            Ok(true) => i18n.t("atelier.msg.profile_deleted"),
            Ok(false) => i18n.t("atelier.msg.profile_none"),
            Err(err) => error_text(state, &err),
        },
    }
}

async fn caption_image(bot: &Bot, msg: &Message, state: &BotState) -> anyhow::Result<String> {
    let (file_id, _ext) = extract_image_attachment(msg)
        .or_else(|| msg.reply_to_message().and_then(extract_image_attachment))
        .ok_or_else(|| anyhow!("no image attached"))?;
    let bytes = download_telegram_file(state, bot, file_id).await?;
    let caption = state.runtime.caption(&bytes).await?;
    Ok(caption)
}

/// User-facing text for a failed operation. Backend-class failures stay generic.
fn error_text(state: &BotState, err: &AtelierError) -> String {
    warn!("request failed: err={}", err);
    let i18n = &state.i18n;
    match err {
        AtelierError::BackendUnavailable { backend, .. } | AtelierError::MalformedResponse { backend, .. } => {
            i18n.t_with("atelier.msg.backend_failed", &[("backend", backend)])
        }
        AtelierError::Timeout(what) => i18n.t_with("atelier.msg.backend_timeout", &[("backend", what)]),
        AtelierError::InvalidRequest(detail) => i18n.t_with("atelier.msg.invalid_request", &[("error", detail)]),
        AtelierError::Config(detail) => i18n.t_with("atelier.msg.config_error", &[("error", detail)]),
        AtelierError::Persistence(_) => i18n.t("atelier.msg.storage_failed"),
    }
}

async fn send_text(bot: &Bot, chat_id: ChatId, text: &str) -> anyhow::Result<()> {
    let text = if text.chars().count() > MAX_REPLY_CHARS {
        let mut cut: String = text.chars().take(MAX_REPLY_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_string()
    };
    bot.send_message(chat_id, text)
        .await
        .context("send text message failed")?;
    Ok(())
}

fn extract_image_attachment(msg: &Message) -> Option<(String, String)> {
    if let Some(photos) = msg.photo() {
        if let Some(photo) = photos.last() {
            return Some((photo.file.id.to_string(), "jpg".to_string()));
        }
    }
    if let Some(doc) = msg.document() {
        let file_name_ext = doc
            .file_name
            .as_deref()
            .and_then(extension_from_filename)
            .unwrap_or_default();
        let mime_is_image = doc
            .mime_type
            .as_ref()
            .map(|m| m.type_().as_str() == "image")
            .unwrap_or(false);
        if mime_is_image || is_image_ext(&file_name_ext) {
            let ext = if file_name_ext.is_empty() {
                "png".to_string()
            } else {
                file_name_ext
            };
            return Some((doc.file.id.to_string(), ext));
        }
    }
    None
}

async fn download_telegram_file(state: &BotState, bot: &Bot, file_id: String) -> anyhow::Result<Vec<u8>> {
    let file = bot.get_file(file_id).await.context("telegram get_file failed")?;
    let file_url = format!("https://api.telegram.org/file/bot{}/{}", state.bot_token, file.path);
    let resp = state
        .client
        .get(file_url)
        .send()
        .await
        .context("download telegram file request failed")?;
    if !resp.status().is_success() {
        return Err(anyhow!("download telegram file http {}", resp.status()));
    }
    let bytes = resp.bytes().await.context("read telegram file bytes failed")?;
    Ok(bytes.to_vec())
}

fn extension_from_filename(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_string_lossy().to_ascii_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

fn is_image_ext(ext: &str) -> bool {
    matches!(ext, "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif")
}
