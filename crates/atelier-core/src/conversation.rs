//! Freeform chat: assemble the bounded prompt, call the text backend, record the exchange.
//!
//! There is no per-channel mutual exclusion. Two messages for the same channel can
//! be in flight at once; each reads history before its own generation and appends
//! after it, so turns from overlapping requests may interleave.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backends::TextBackend;
use crate::context::{assemble, persona_preamble};
use crate::error::Result;
use crate::history::HistoryStore;
use crate::idle::BackendLiveness;
use crate::profiles::ProfileStore;
use crate::tts_queue::TtsQueue;
use crate::types::{Requester, TtsJob, Turn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub kept_turns: usize,
    pub dropped_turns: usize,
    pub voice_queued: bool,
}

pub struct Conversation {
    history: Arc<HistoryStore>,
    text: Arc<dyn TextBackend>,
    liveness: Arc<BackendLiveness>,
    profiles: Arc<ProfileStore>,
    tts: Option<Arc<TtsQueue>>,
    persona: String,
    responder: String,
    token_limit: usize,
}

pub struct ConversationParams {
    pub history: Arc<HistoryStore>,
    pub text: Arc<dyn TextBackend>,
    pub liveness: Arc<BackendLiveness>,
    pub profiles: Arc<ProfileStore>,
    /// Present when replies should also be spoken.
    pub tts: Option<Arc<TtsQueue>>,
    pub persona: String,
    pub responder: String,
    pub token_limit: usize,
}

impl Conversation {
    pub fn new(params: ConversationParams) -> Self {
        Self {
            history: params.history,
            text: params.text,
            liveness: params.liveness,
            profiles: params.profiles,
            tts: params.tts,
            persona: params.persona,
            responder: params.responder,
            token_limit: params.token_limit,
        }
    }

    pub fn responder(&self) -> &str {
        &self.responder
    }

    /// On failure nothing is appended to history and liveness is untouched.
    pub async fn reply(&self, requester: Requester, speaker: &str, message: &str) -> Result<ChatReply> {
        let channel_id = requester.channel_id;
        let profile = match self.profiles.get(requester.user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(
                    "profile read failed, chatting without it: user_id={} err={}",
                    requester.user_id, err
                );
                None
            }
        };
        let preamble = persona_preamble(&self.persona, profile.as_deref().map(|p| (speaker, p)));
        let current = Turn::new(speaker, message);
        let history = self.history.get(channel_id);
        let assembled = assemble(&preamble, &history, &current, &self.responder, self.token_limit);
        debug!(
            "prompt assembled: channel_id={} kept={} dropped={} tokens={}",
            channel_id, assembled.kept_turns, assembled.dropped_turns, assembled.used_tokens
        );

        let raw = self.text.generate(&assembled.prompt).await?;
        self.liveness.record_success();
        let text = trim_reply(&raw, &self.responder, speaker);

        self.history.append(channel_id, current);
        self.history.append(channel_id, Turn::new(self.responder.clone(), text.clone()));

        let voice_queued = match &self.tts {
            Some(queue) => queue.enqueue(TtsJob {
                requester,
                text: text.clone(),
            }),
            None => false,
        };
        info!(
            "chat reply: channel_id={} user_id={} chars={} voice_queued={}",
            channel_id,
            requester.user_id,
            text.chars().count(),
            voice_queued
        );
        Ok(ChatReply {
            text,
            kept_turns: assembled.kept_turns,
            dropped_turns: assembled.dropped_turns,
            voice_queued,
        })
    }
}

/// Completion models tend to keep writing the transcript. Keep only the responder's
/// own line(s): drop an echoed cue and stop where the speaker's next turn begins.
fn trim_reply(raw: &str, responder: &str, speaker: &str) -> String {
    let cue = format!("{responder}:");
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix(&cue) {
        text = rest.trim_start();
    }
    let next_turn = format!("\n{speaker}:");
    if let Some(idx) = text.find(&next_turn) {
        text = &text[..idx];
    }
    let text = text.trim();
    if text.is_empty() {
        raw.trim().to_string()
    } else {
        text.to_string()
    }
}
