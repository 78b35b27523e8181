use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ChannelId = i64;
pub type UserId = i64;

/// One message in a channel conversation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker_id: String,
    pub text: String,
}

impl Turn {
    pub fn new(speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            text: text.into(),
        }
    }

    /// Wire form used inside the text-backend prompt.
    pub fn render(&self) -> String {
        format!("{}: {}\n", self.speaker_id, self.text)
    }
}

/// Who asked for a piece of work and where the answer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsJob {
    pub requester: Requester,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Image,
    Text,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Image => "forge",
            Self::Text => "koboldcpp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
}
