use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::{build_client, join_url, post_json, probe_ok, TextBackend};
use crate::config::TextConfig;
use crate::error::{AtelierError, Result};

const BACKEND: &str = "koboldcpp";
const INTERROGATE_ENDPOINT: &str = "/sdapi/v1/interrogate";

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_length: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    min_p: f32,
    rep_pen: f32,
    quiet: bool,
}

pub struct KoboldClient {
    client: Client,
    probe_client: Client,
    base_url: String,
    generate_url: String,
    cfg: TextConfig,
}

impl KoboldClient {
    pub fn new(cfg: &TextConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(BACKEND, Duration::from_secs(cfg.request_timeout_seconds))?,
            probe_client: build_client(BACKEND, Duration::from_secs(5))?,
            base_url: cfg.base_url.clone(),
            generate_url: join_url(&cfg.base_url, &cfg.generate_endpoint),
            cfg: cfg.clone(),
        })
    }
}

#[async_trait]
impl TextBackend for KoboldClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            prompt,
            max_length: self.cfg.max_length,
            temperature: self.cfg.temperature,
            top_p: self.cfg.top_p,
            top_k: self.cfg.top_k,
            min_p: self.cfg.min_p,
            rep_pen: self.cfg.rep_pen,
            quiet: true,
        };
        info!(
            "text generate request: prompt_chars={} max_length={}",
            prompt.chars().count(),
            self.cfg.max_length
        );
        let value = post_json(&self.client, BACKEND, &self.generate_url, &body).await?;
        parse_generation(&value)
    }

    async fn is_online(&self) -> bool {
        probe_ok(&self.probe_client, &self.base_url).await
    }

    async fn interrogate(&self, image: &[u8]) -> Result<String> {
        let body = json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image),
            "model": "clip",
        });
        let url = join_url(&self.base_url, INTERROGATE_ENDPOINT);
        let value = post_json(&self.client, BACKEND, &url, &body).await?;
        parse_caption(&value)
    }
}

/// `{"results": [{"text": "..."}]}`; the reply is trimmed and must not be empty.
pub fn parse_generation(value: &Value) -> Result<String> {
    let text = value
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| AtelierError::malformed(BACKEND, "no results[0].text in response"))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(AtelierError::malformed(BACKEND, "empty generation"));
    }
    Ok(text.to_string())
}

pub fn parse_caption(value: &Value) -> Result<String> {
    value
        .get("caption")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|caption| !caption.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AtelierError::malformed(BACKEND, "no caption in response"))
}
