use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use super::{build_client, join_url, post_json, probe_ok, ImageBackend};
use crate::config::ImageConfig;
use crate::error::{AtelierError, Result};
use crate::imagegen::Txt2ImgPayload;
use crate::types::GeneratedImage;

const BACKEND: &str = "forge";

/// Stable Diffusion Forge WebUI running with `--api`.
pub struct ForgeClient {
    client: Client,
    probe_client: Client,
    base_url: String,
    txt2img_url: String,
}

impl ForgeClient {
    pub fn new(cfg: &ImageConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(BACKEND, Duration::from_secs(cfg.request_timeout_seconds))?,
            probe_client: build_client(BACKEND, Duration::from_secs(5))?,
            base_url: cfg.base_url.clone(),
            txt2img_url: join_url(&cfg.base_url, &cfg.txt2img_endpoint),
        })
    }
}

#[async_trait]
impl ImageBackend for ForgeClient {
    async fn generate(&self, payload: &Txt2ImgPayload) -> Result<GeneratedImage> {
        info!(
            "txt2img request: size={}x{} steps={} upscale={} adetailer={}",
            payload.width,
            payload.height,
            payload.steps,
            payload.hires.is_some(),
            payload.alwayson_scripts.adetailer.is_some()
        );
        let value = post_json(&self.client, BACKEND, &self.txt2img_url, payload).await?;
        decode_first_image(&value)
    }

    async fn is_online(&self) -> bool {
        probe_ok(&self.probe_client, &self.base_url).await
    }
}

/// Forge answers `{"images": [<base64 png>, ...], "info": "<json string>"}`.
pub fn decode_first_image(value: &Value) -> Result<GeneratedImage> {
    let encoded = value
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(Value::as_str)
        .ok_or_else(|| AtelierError::malformed(BACKEND, "no images in response"))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| AtelierError::malformed(BACKEND, format!("image base64: {err}")))?;
    if bytes.is_empty() {
        return Err(AtelierError::malformed(BACKEND, "empty image"));
    }

    let info = match value.get("info") {
        Some(Value::String(raw)) => serde_json::from_str(raw).ok(),
        Some(other) if !other.is_null() => Some(other.clone()),
        _ => None,
    };
    Ok(GeneratedImage { bytes, info })
}
