//! Prompt handling and the typed txt2img request body.

use serde::Serialize;

use crate::config::{ImageConfig, Resolution};

const UPSCALE_FLAG: &str = "--upscale";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub positive: String,
    pub negative: String,
    pub upscale: bool,
}

/// Splits `positive :: negative`. Returns `None` when there is no positive part.
pub fn split_prompt(raw: &str) -> Option<ImageRequest> {
    let mut upscale = false;
    let words: Vec<&str> = raw
        .split_whitespace()
        .filter(|word| {
            if word.eq_ignore_ascii_case(UPSCALE_FLAG) {
                upscale = true;
                false
            } else {
                true
            }
        })
        .collect();
    let joined = words.join(" ");

    let (positive, negative) = match joined.split_once("::") {
        Some((pos, neg)) => (pos.trim(), neg.trim()),
        None => (joined.trim(), ""),
    };
    if positive.is_empty() {
        return None;
    }
    Some(ImageRequest {
        positive: positive.to_string(),
        negative: negative.to_string(),
        upscale,
    })
}

fn tidy_commas(text: &str) -> String {
    text.trim_matches(|c| c == ',' || c == ' ')
        .replace(",,", ",")
        .trim()
        .to_string()
}

fn capitalize(term: &str) -> String {
    let lower = term.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Drops forbidden terms from a negative prompt, so they cannot be used to steer
/// generation towards them by exclusion.
pub fn clean_negative_prompt(negative: &str, forbidden: &[String]) -> String {
    let mut out = negative.to_string();
    for term in forbidden.iter().filter(|t| !t.is_empty()) {
        for form in [term.clone(), capitalize(term), term.to_uppercase()] {
            out = out.replace(&form, "");
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Final positive and negative prompts with the configured base prompts applied.
pub fn compose_prompts(cfg: &ImageConfig, request: &ImageRequest) -> (String, String) {
    let positive = tidy_commas(&format!("{}, {}", cfg.base_positive_prompt, request.positive));
    let negative = tidy_commas(&format!("{}, {}", request.negative, cfg.base_negative_prompt));
    let negative = clean_negative_prompt(&negative, &cfg.forbidden_negative_terms);
    (positive, negative)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OverrideSettings {
    pub sd_model_checkpoint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdetailerArgs {
    pub ad_model: String,
    pub ad_prompt: String,
    pub ad_negative_prompt: String,
    pub ad_confidence: f32,
    pub ad_mask_blur: u32,
    pub ad_denoising_strength: f32,
    pub ad_inpaint_only_masked: bool,
    pub ad_inpaint_padding: u32,
    pub ad_cfg_scale: f32,
    pub ad_steps: u32,
    pub ad_sampler: String,
    pub ad_clip_skip: u32,
    pub ad_checkpoint: String,
    pub ad_vae: String,
    pub ad_use_inpaint_width_height: bool,
    pub ad_inpaint_width: u32,
    pub ad_inpaint_height: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdetailerScript {
    pub args: Vec<AdetailerArgs>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AlwaysOnScripts {
    #[serde(rename = "ADetailer", skip_serializing_if = "Option::is_none")]
    pub adetailer: Option<AdetailerScript>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HiresFix {
    pub enable_hr: bool,
    pub hr_upscaler: String,
    pub hr_second_pass_steps: u32,
    pub denoising_strength: f32,
    pub hr_scale: f32,
    pub hr_resize_x: u32,
    pub hr_resize_y: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Txt2ImgPayload {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg_scale: f32,
    pub sampler_name: String,
    pub seed: i64,
    pub width: u32,
    pub height: u32,
    pub clip_skip: u32,
    pub override_settings: OverrideSettings,
    pub alwayson_scripts: AlwaysOnScripts,
    #[serde(flatten)]
    pub hires: Option<HiresFix>,
}

pub fn build_payload(cfg: &ImageConfig, request: &ImageRequest, resolution: Resolution) -> Txt2ImgPayload {
    let (prompt, negative_prompt) = compose_prompts(cfg, request);

    let adetailer = cfg.adetailer.enabled.then(|| AdetailerScript {
        args: vec![AdetailerArgs {
            ad_model: cfg.adetailer.model.clone(),
            ad_prompt: cfg.adetailer.prompt.clone(),
            ad_negative_prompt: cfg.adetailer.negative_prompt.clone(),
            ad_confidence: cfg.adetailer.confidence,
            ad_mask_blur: cfg.adetailer.mask_blur,
            ad_denoising_strength: cfg.adetailer.denoising_strength,
            ad_inpaint_only_masked: cfg.adetailer.inpaint_only_masked,
            ad_inpaint_padding: cfg.adetailer.inpaint_padding,
            ad_cfg_scale: cfg.cfg_scale,
            ad_steps: cfg.steps,
            ad_sampler: cfg.sampler_name.clone(),
            ad_clip_skip: 1,
            ad_checkpoint: String::new(),
            ad_vae: String::new(),
            ad_use_inpaint_width_height: false,
            ad_inpaint_width: resolution.width,
            ad_inpaint_height: resolution.height,
        }],
    });

    let hires = request.upscale.then(|| HiresFix {
        enable_hr: true,
        hr_upscaler: cfg.hires.upscaler.clone(),
        hr_second_pass_steps: cfg.hires.steps,
        denoising_strength: cfg.hires.denoising_strength,
        hr_scale: cfg.hires.upscale_by,
        hr_resize_x: cfg.hires.resize_width,
        hr_resize_y: cfg.hires.resize_height,
    });

    Txt2ImgPayload {
        prompt,
        negative_prompt,
        steps: cfg.steps,
        cfg_scale: cfg.cfg_scale,
        sampler_name: cfg.sampler_name.clone(),
        seed: cfg.seed,
        width: resolution.width,
        height: resolution.height,
        clip_skip: cfg.clip_skip,
        override_settings: OverrideSettings {
            sd_model_checkpoint: cfg.model.clone(),
        },
        alwayson_scripts: AlwaysOnScripts { adetailer },
        hires,
    }
}

/// `generated_image_<8 hex chars>.png`
pub fn image_file_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("generated_image_{}.png", &id[..8])
}
