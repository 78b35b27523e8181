use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use super::{build_client, SearchBackend};
use crate::config::SearchConfig;
use crate::error::{AtelierError, Result};
use crate::types::SearchHit;

const BACKEND: &str = "search";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>").expect("hardcoded regex")
});
static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr|/section|/article)\b[^>]*>").expect("hardcoded regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("hardcoded regex"));
static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").expect("hardcoded regex"));

/// SerpApi web search plus a plain-text page scraper.
pub struct WebSearch {
    client: Client,
    endpoint: String,
    api_key_env: String,
    max_results: usize,
}

impl WebSearch {
    pub fn new(cfg: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_seconds))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| AtelierError::Config(format!("search http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            api_key_env: cfg.api_key_env.clone(),
            max_results: cfg.max_results,
        })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AtelierError::Config(format!("{} is not set", self.api_key_env)))
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AtelierError::Timeout(format!("{BACKEND} request"))
                } else {
                    AtelierError::unavailable(BACKEND, format!("request failed: {err}"))
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AtelierError::unavailable(BACKEND, format!("http {}", status.as_u16())));
        }
        resp.text()
            .await
            .map_err(|err| AtelierError::unavailable(BACKEND, format!("read body failed: {err}")))
    }
}

#[async_trait]
impl SearchBackend for WebSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let api_key = self.api_key()?;
        let body = self
            .get_text(&self.endpoint, &[("q", query), ("api_key", api_key.as_str())])
            .await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| AtelierError::malformed(BACKEND, format!("parse response failed: {err}")))?;
        let hits = parse_organic_results(&value, self.max_results);
        info!("search done: results={}", hits.len());
        Ok(hits)
    }

    async fn scrape(&self, url: &str) -> Result<String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AtelierError::InvalidRequest(format!("not an http url: {url}")));
        }
        let html = self.get_text(url, &[]).await?;
        let text = html_to_text(&html);
        if text.is_empty() {
            return Err(AtelierError::malformed(BACKEND, "page has no readable text"));
        }
        Ok(text)
    }
}

/// `organic_results[*].{title,link}`; entries missing either field are skipped.
pub fn parse_organic_results(value: &Value, max_results: usize) -> Vec<SearchHit> {
    value
        .get("organic_results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|item| {
                    let title = item.get("title")?.as_str()?.trim();
                    let link = item.get("link")?.as_str()?.trim();
                    (!title.is_empty() && !link.is_empty()).then(|| SearchHit {
                        title: title.to_string(),
                        link: link.to_string(),
                    })
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

/// Body text with scripts and tags removed, one non-empty phrase per line.
pub fn html_to_text(html: &str) -> String {
    let body = BODY
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map_or(html, |m| m.as_str());
    let without_code = SCRIPT_OR_STYLE.replace_all(body, "");
    let with_breaks = BLOCK_BREAK.replace_all(&without_code, "\n");
    let plain = TAG.replace_all(&with_breaks, "");
    let decoded = decode_entities(&plain);

    decoded
        .lines()
        .flat_map(|line| line.trim().split("  ").map(str::trim).collect::<Vec<_>>())
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
