//! Kokoro TTS through the local Python wrapper script.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use super::SpeechBackend;
use crate::config::TtsConfig;
use crate::error::{AtelierError, Result};

const BACKEND: &str = "kokoro";

static MENTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:@[!&]?|#)\d+>").expect("hardcoded regex"));
static URLS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("hardcoded regex"));
// order matters: bold before italic
static EMPHASIS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\*\*(.*?)\*\*", r"\*(.*?)\*", r"__(.*?)__", r"`(.*?)`", r"~~(.*?)~~"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("hardcoded regex"))
        .collect()
});

/// Strips chat markup the synthesizer would read aloud, then bounds the length.
pub fn clean_text(text: &str, max_chars: usize) -> String {
    let mut out = MENTIONS.replace_all(text, "").into_owned();
    for pattern in EMPHASIS.iter() {
        out = pattern.replace_all(&out, "$1").into_owned();
    }
    out = URLS.replace_all(&out, "").into_owned();
    let out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    if out.chars().count() > max_chars {
        let head: String = out.chars().take(max_chars.saturating_sub(3)).collect();
        return format!("{head}...");
    }
    out
}

pub struct KokoroSynth {
    python_path: String,
    script_path: String,
    kokoro_path: Option<String>,
    output_file: PathBuf,
    voice: String,
    max_chars: usize,
    timeout: Duration,
}

impl KokoroSynth {
    pub fn new(cfg: &TtsConfig) -> Self {
        Self {
            python_path: cfg.python_path.clone(),
            script_path: cfg.script_path.clone(),
            kokoro_path: cfg.kokoro_path.clone().filter(|p| !p.trim().is_empty()),
            output_file: PathBuf::from(&cfg.output_file),
            voice: cfg.voice.clone(),
            max_chars: cfg.max_chars,
            timeout: Duration::from_secs(cfg.job_timeout_seconds),
        }
    }

    /// Arguments after the interpreter. The text travels base64-encoded so newlines
    /// and quotes survive the command line.
    pub fn wrapper_args(&self, cleaned: &str) -> Vec<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(cleaned.as_bytes());
        let mut args = vec![
            self.script_path.clone(),
            "--text".to_string(),
            encoded,
            "--voice".to_string(),
            self.voice.clone(),
            "--output".to_string(),
            self.output_file.display().to_string(),
            "--base64".to_string(),
        ];
        if let Some(path) = &self.kokoro_path {
            args.push("--kokoro-path".to_string());
            args.push(path.clone());
        }
        args
    }
}

#[async_trait]
impl SpeechBackend for KokoroSynth {
    async fn synthesize(&self, text: &str) -> Result<PathBuf> {
        let cleaned = clean_text(text, self.max_chars);
        if cleaned.is_empty() {
            return Err(AtelierError::InvalidRequest(
                "nothing left to speak after cleaning".to_string(),
            ));
        }

        if let Some(dir) = self.output_file.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        // a stale file from the previous job must not pass the output check
        match tokio::fs::remove_file(&self.output_file).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        info!(
            "tts synth start: chars={} voice={}",
            cleaned.chars().count(),
            self.voice
        );
        let child = Command::new(&self.python_path)
            .args(self.wrapper_args(&cleaned))
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AtelierError::unavailable(BACKEND, format!("spawn failed: {err}")))?;

        // dropping the wait future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AtelierError::Timeout("kokoro synthesis".to_string()))?
            .map_err(|err| AtelierError::unavailable(BACKEND, format!("wait failed: {err}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("tts stderr: {}", stderr.trim());
        }
        if !output.status.success() {
            return Err(AtelierError::unavailable(
                BACKEND,
                format!("wrapper exited with {}", output.status),
            ));
        }

        let size = tokio::fs::metadata(&self.output_file)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(AtelierError::malformed(BACKEND, "output file missing or empty"));
        }
        info!("tts synth done: bytes={}", size);
        Ok(self.output_file.clone())
    }
}
