use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backends::{ImageBackend, SearchBackend, SpeechBackend, TextBackend};
use crate::error::{AtelierError, Result};
use crate::imagegen::Txt2ImgPayload;
use crate::outbox::{Attachment, Outbox};
use crate::types::{ChannelId, GeneratedImage, SearchHit};

/// Outbox that records everything it is asked to deliver.
#[derive(Default)]
pub(crate) struct RecordingOutbox {
    texts: Mutex<Vec<(ChannelId, String)>>,
    attachments: Mutex<Vec<(ChannelId, Attachment)>>,
    fail_sends: bool,
}

impl RecordingOutbox {
    pub(crate) fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub(crate) fn texts(&self) -> Vec<(ChannelId, String)> {
        self.texts.lock().expect("outbox lock").clone()
    }

    pub(crate) fn texts_containing(&self, needle: &str) -> usize {
        self.texts()
            .iter()
            .filter(|(_, text)| text.contains(needle))
            .count()
    }

    pub(crate) fn attachments(&self) -> Vec<(ChannelId, Attachment)> {
        self.attachments.lock().expect("outbox lock").clone()
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send_text(&self, channel_id: ChannelId, text: &str) -> Result<()> {
        self.texts
            .lock()
            .expect("outbox lock")
            .push((channel_id, text.to_string()));
        if self.fail_sends {
            return Err(AtelierError::unavailable("telegram", "send refused"));
        }
        Ok(())
    }

    async fn send_attachment(
        &self,
        channel_id: ChannelId,
        attachment: Attachment,
        _caption: Option<&str>,
    ) -> Result<()> {
        self.attachments
            .lock()
            .expect("outbox lock")
            .push((channel_id, attachment));
        if self.fail_sends {
            return Err(AtelierError::unavailable("telegram", "send refused"));
        }
        Ok(())
    }
}

/// Text backend answering from a queue of scripted results. An empty queue
/// answers "ok".
#[derive(Default)]
pub(crate) struct ScriptedText {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl ScriptedText {
    pub(crate) fn push_reply(&self, reply: std::result::Result<&str, AtelierError>) {
        self.replies
            .lock()
            .expect("text lock")
            .push_back(reply.map(str::to_string));
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("text lock").clone()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextBackend for ScriptedText {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().expect("text lock").push(prompt.to_string());
        self.replies
            .lock()
            .expect("text lock")
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }

    async fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn interrogate(&self, image: &[u8]) -> Result<String> {
        if image.is_empty() {
            return Err(AtelierError::malformed("koboldcpp", "no caption in response"));
        }
        Ok(format!("an image of {} bytes", image.len()))
    }
}

#[derive(Default)]
pub(crate) struct InstantSpeech {
    spoken: Mutex<Vec<String>>,
}

impl InstantSpeech {
    pub(crate) fn spoken(&self) -> Vec<String> {
        self.spoken.lock().expect("speech lock").clone()
    }
}

#[async_trait]
impl SpeechBackend for InstantSpeech {
    async fn synthesize(&self, text: &str) -> Result<PathBuf> {
        self.spoken.lock().expect("speech lock").push(text.to_string());
        Ok(PathBuf::from("voice.wav"))
    }
}

#[derive(Default)]
pub(crate) struct FakeImage {
    payloads: Mutex<Vec<Txt2ImgPayload>>,
    fail: AtomicBool,
}

impl FakeImage {
    pub(crate) fn payloads(&self) -> Vec<Txt2ImgPayload> {
        self.payloads.lock().expect("image lock").clone()
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageBackend for FakeImage {
    async fn generate(&self, payload: &Txt2ImgPayload) -> Result<GeneratedImage> {
        self.payloads.lock().expect("image lock").push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AtelierError::unavailable("forge", "connection refused"));
        }
        Ok(GeneratedImage {
            bytes: b"\x89PNG".to_vec(),
            info: None,
        })
    }

    async fn is_online(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct FakeSearch;

#[async_trait]
impl SearchBackend for FakeSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        Ok(vec![SearchHit {
            title: format!("About {query}"),
            link: "https://example.com/a".to_string(),
        }])
    }

    async fn scrape(&self, url: &str) -> Result<String> {
        if url.contains("broken") {
            return Err(AtelierError::unavailable("search", "http 500"));
        }
        Ok("word ".repeat(100))
    }
}
