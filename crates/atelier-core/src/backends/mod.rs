//! Contracts for the external AI services plus their HTTP and subprocess clients.

pub mod forge;
pub mod kobold;
pub mod kokoro;
pub mod search;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{AtelierError, Result};
use crate::imagegen::Txt2ImgPayload;
use crate::types::{GeneratedImage, SearchHit};

#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate(&self, payload: &Txt2ImgPayload) -> Result<GeneratedImage>;

    async fn is_online(&self) -> bool;
}

#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    async fn is_online(&self) -> bool;

    async fn interrogate(&self, image: &[u8]) -> Result<String>;
}

/// Synthesizes speech into a file and returns its path.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<PathBuf>;
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;

    async fn scrape(&self, url: &str) -> Result<String>;
}

pub(crate) fn build_client(backend: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| AtelierError::Config(format!("{backend} http client: {err}")))
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn classify_send_error(backend: &str, err: reqwest::Error) -> AtelierError {
    if err.is_timeout() {
        AtelierError::Timeout(format!("{backend} request"))
    } else {
        AtelierError::unavailable(backend, format!("request failed: {err}"))
    }
}

/// POSTs `body` as JSON and returns the parsed response object.
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    backend: &str,
    url: &str,
    body: &B,
) -> Result<Value> {
    debug!("backend request: backend={} url={}", backend, url);
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|err| classify_send_error(backend, err))?;

    let status = resp.status();
    let body_text = resp
        .text()
        .await
        .map_err(|err| classify_send_error(backend, err))?;

    if !status.is_success() {
        return Err(AtelierError::unavailable(
            backend,
            format!("http {}: {}", status.as_u16(), truncate_for_log(&body_text)),
        ));
    }

    serde_json::from_str(&body_text)
        .map_err(|err| AtelierError::malformed(backend, format!("parse response failed: {err}")))
}

pub(crate) async fn probe_ok(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(err) => {
            debug!("health probe failed: url={} err={}", url, err);
            false
        }
    }
}

fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 300;
    if text.chars().count() <= MAX {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX).collect();
    format!("{head}...")
}
