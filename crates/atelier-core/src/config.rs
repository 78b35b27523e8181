use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub admins: Vec<i64>,
    #[serde(default)]
    pub allowlist: Vec<i64>,
    /// Chats the bot answers in. Empty means every chat.
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
    /// Chat that receives idle-shutdown notices.
    #[serde(default)]
    pub status_chat_id: Option<i64>,
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_i18n_path")]
    pub i18n_path: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            admins: Vec::new(),
            allowlist: Vec::new(),
            allowed_chats: Vec::new(),
            status_chat_id: None,
            bot_name: default_bot_name(),
            i18n_path: default_i18n_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_persona_path")]
    pub persona_path: String,
    #[serde(default = "default_context_token_limit")]
    pub context_token_limit: usize,
    #[serde(default = "default_listen_window_seconds")]
    pub listen_window_seconds: u64,
    #[serde(default = "default_listen_grace_seconds")]
    pub listen_grace_seconds: u64,
    #[serde(default)]
    pub voice_replies: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persona_path: default_persona_path(),
            context_token_limit: default_context_token_limit(),
            listen_window_seconds: default_listen_window_seconds(),
            listen_grace_seconds: default_listen_grace_seconds(),
            voice_replies: false,
        }
    }
}

impl ChatConfig {
    /// Time from (re)activation until the expiry warning goes out.
    pub fn listen_warn_after(&self) -> Duration {
        Duration::from_secs(
            self.listen_window_seconds
                .saturating_sub(self.listen_grace_seconds),
        )
    }

    pub fn listen_grace(&self) -> Duration {
        Duration::from_secs(self.listen_grace_seconds)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_base_url")]
    pub base_url: String,
    #[serde(default = "default_txt2img_endpoint")]
    pub txt2img_endpoint: String,
    #[serde(default)]
    pub launch_script: String,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: i64,
    #[serde(default = "default_image_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_sampler_name")]
    pub sampler_name: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_clip_skip")]
    pub clip_skip: u32,
    #[serde(default = "default_resolutions")]
    pub resolutions: HashMap<String, Resolution>,
    #[serde(default = "default_resolution_preset")]
    pub default_resolution: String,
    #[serde(default = "default_base_positive_prompt")]
    pub base_positive_prompt: String,
    #[serde(default = "default_base_negative_prompt")]
    pub base_negative_prompt: String,
    #[serde(default = "default_forbidden_negative_terms")]
    pub forbidden_negative_terms: Vec<String>,
    #[serde(default)]
    pub adetailer: AdetailerConfig,
    #[serde(default)]
    pub hires: HiresConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: default_image_base_url(),
            txt2img_endpoint: default_txt2img_endpoint(),
            launch_script: String::new(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            request_timeout_seconds: default_image_request_timeout_seconds(),
            model: default_image_model(),
            sampler_name: default_sampler_name(),
            steps: default_steps(),
            cfg_scale: default_cfg_scale(),
            seed: default_seed(),
            clip_skip: default_clip_skip(),
            resolutions: default_resolutions(),
            default_resolution: default_resolution_preset(),
            base_positive_prompt: default_base_positive_prompt(),
            base_negative_prompt: default_base_negative_prompt(),
            forbidden_negative_terms: default_forbidden_negative_terms(),
            adetailer: AdetailerConfig::default(),
            hires: HiresConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdetailerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_adetailer_model")]
    pub model: String,
    #[serde(default = "default_adetailer_prompt")]
    pub prompt: String,
    #[serde(default = "default_adetailer_negative_prompt")]
    pub negative_prompt: String,
    #[serde(default = "default_adetailer_confidence")]
    pub confidence: f32,
    #[serde(default = "default_adetailer_mask_blur")]
    pub mask_blur: u32,
    #[serde(default = "default_adetailer_denoising")]
    pub denoising_strength: f32,
    #[serde(default = "default_true")]
    pub inpaint_only_masked: bool,
    #[serde(default = "default_adetailer_inpaint_padding")]
    pub inpaint_padding: u32,
}

impl Default for AdetailerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_adetailer_model(),
            prompt: default_adetailer_prompt(),
            negative_prompt: default_adetailer_negative_prompt(),
            confidence: default_adetailer_confidence(),
            mask_blur: default_adetailer_mask_blur(),
            denoising_strength: default_adetailer_denoising(),
            inpaint_only_masked: true,
            inpaint_padding: default_adetailer_inpaint_padding(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HiresConfig {
    #[serde(default = "default_hires_upscaler")]
    pub upscaler: String,
    #[serde(default = "default_hires_steps")]
    pub steps: u32,
    #[serde(default = "default_hires_denoising")]
    pub denoising_strength: f32,
    #[serde(default = "default_hires_upscale_by")]
    pub upscale_by: f32,
    #[serde(default)]
    pub resize_width: u32,
    #[serde(default)]
    pub resize_height: u32,
}

impl Default for HiresConfig {
    fn default() -> Self {
        Self {
            upscaler: default_hires_upscaler(),
            steps: default_hires_steps(),
            denoising_strength: default_hires_denoising(),
            upscale_by: default_hires_upscale_by(),
            resize_width: 0,
            resize_height: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextConfig {
    #[serde(default = "default_text_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_generate_endpoint")]
    pub generate_endpoint: String,
    #[serde(default)]
    pub launch_executable: String,
    /// Model profile name -> KoboldCpp `.kcpps` config path.
    #[serde(default)]
    pub profiles: HashMap<String, String>,
    #[serde(default = "default_text_profile")]
    pub default_profile: String,
    #[serde(default = "default_text_max_length")]
    pub max_length: u32,
    #[serde(default = "default_text_temperature")]
    pub temperature: f32,
    #[serde(default = "default_text_top_p")]
    pub top_p: f32,
    #[serde(default = "default_text_top_k")]
    pub top_k: u32,
    #[serde(default)]
    pub min_p: f32,
    #[serde(default = "default_text_rep_pen")]
    pub rep_pen: f32,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: i64,
    #[serde(default = "default_text_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            base_url: default_text_base_url(),
            generate_endpoint: default_text_generate_endpoint(),
            launch_executable: String::new(),
            profiles: HashMap::new(),
            default_profile: default_text_profile(),
            max_length: default_text_max_length(),
            temperature: default_text_temperature(),
            top_p: default_text_top_p(),
            top_k: default_text_top_k(),
            min_p: 0.0,
            rep_pen: default_text_rep_pen(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            request_timeout_seconds: default_text_request_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_python_path")]
    pub python_path: String,
    #[serde(default = "default_tts_script_path")]
    pub script_path: String,
    #[serde(default)]
    pub kokoro_path: Option<String>,
    #[serde(default = "default_tts_output_file")]
    pub output_file: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_tts_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_tts_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
    #[serde(default = "default_tts_max_chars")]
    pub max_chars: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            python_path: default_tts_python_path(),
            script_path: default_tts_script_path(),
            kokoro_path: None,
            output_file: default_tts_output_file(),
            voice: default_tts_voice(),
            queue_capacity: default_tts_queue_capacity(),
            job_timeout_seconds: default_tts_job_timeout_seconds(),
            max_chars: default_tts_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_scrape_max_chars")]
    pub scrape_max_chars: usize,
    #[serde(default = "default_search_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_api_key_env(),
            endpoint: default_search_endpoint(),
            max_results: default_search_max_results(),
            scrape_max_chars: default_scrape_max_chars(),
            request_timeout_seconds: default_search_request_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_stats_path")]
    pub stats_path: String,
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stats_path: default_stats_path(),
            profiles_dir: default_profiles_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_health_poll_interval_seconds")]
    pub health_poll_interval_seconds: u64,
    #[serde(default = "default_health_poll_attempts")]
    pub health_poll_attempts: u32,
    #[serde(default = "default_stop_wait_seconds")]
    pub stop_wait_seconds: u64,
    #[serde(default = "default_idle_check_interval_seconds")]
    pub idle_check_interval_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_poll_interval_seconds: default_health_poll_interval_seconds(),
            health_poll_attempts: default_health_poll_attempts(),
            stop_wait_seconds: default_stop_wait_seconds(),
            idle_check_interval_seconds: default_idle_check_interval_seconds(),
        }
    }
}

/// Converts a minute count where `<= 0` means "disabled".
pub fn idle_threshold(minutes: i64) -> Option<Duration> {
    if minutes <= 0 {
        return None;
    }
    Some(Duration::from_secs((minutes as u64).saturating_mul(60)))
}

fn default_true() -> bool {
    true
}

fn default_bot_name() -> String {
    "Atelier".to_string()
}

fn default_i18n_path() -> String {
    "configs/i18n/atelierd.en.toml".to_string()
}

fn default_persona_path() -> String {
    "prompts/persona.md".to_string()
}

fn default_context_token_limit() -> usize {
    4096
}

fn default_listen_window_seconds() -> u64 {
    30 * 60
}

fn default_listen_grace_seconds() -> u64 {
    60
}

fn default_image_base_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_txt2img_endpoint() -> String {
    "/sdapi/v1/txt2img".to_string()
}

fn default_idle_timeout_minutes() -> i64 {
    30
}

fn default_image_request_timeout_seconds() -> u64 {
    300
}

fn default_image_model() -> String {
    "plantMilkModelSuite_walnut.safetensors".to_string()
}

fn default_sampler_name() -> String {
    "Euler a".to_string()
}

fn default_steps() -> u32 {
    28
}

fn default_cfg_scale() -> f32 {
    3.0
}

fn default_seed() -> i64 {
    -1
}

fn default_clip_skip() -> u32 {
    2
}

fn default_resolutions() -> HashMap<String, Resolution> {
    let mut out = HashMap::new();
    out.insert(
        "portrait".to_string(),
        Resolution {
            width: 1024,
            height: 1520,
        },
    );
    out.insert(
        "landscape".to_string(),
        Resolution {
            width: 1520,
            height: 1024,
        },
    );
    out.insert(
        "square".to_string(),
        Resolution {
            width: 1024,
            height: 1024,
        },
    );
    out
}

fn default_resolution_preset() -> String {
    "portrait".to_string()
}

fn default_base_positive_prompt() -> String {
    "detailed, masterpiece, best quality, good quality".to_string()
}

fn default_base_negative_prompt() -> String {
    "bad quality, worst quality, lowres, jpeg artifacts, bad anatomy, bad hands, multiple views, signature, watermark".to_string()
}

fn default_forbidden_negative_terms() -> Vec<String> {
    vec!["child".to_string(), "loli".to_string()]
}

fn default_adetailer_model() -> String {
    "face_yolov8n.pt".to_string()
}

fn default_adetailer_prompt() -> String {
    "face, perfect eyes, beautiful".to_string()
}

fn default_adetailer_negative_prompt() -> String {
    "bad face, blurry, deformed".to_string()
}

fn default_adetailer_confidence() -> f32 {
    0.3
}

fn default_adetailer_mask_blur() -> u32 {
    4
}

fn default_adetailer_denoising() -> f32 {
    0.4
}

fn default_adetailer_inpaint_padding() -> u32 {
    32
}

fn default_hires_upscaler() -> String {
    "remacri_original".to_string()
}

fn default_hires_steps() -> u32 {
    15
}

fn default_hires_denoising() -> f32 {
    0.35
}

fn default_hires_upscale_by() -> f32 {
    1.5
}

fn default_text_base_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_text_generate_endpoint() -> String {
    "/api/v1/generate".to_string()
}

fn default_text_profile() -> String {
    "default".to_string()
}

fn default_text_max_length() -> u32 {
    512
}

fn default_text_temperature() -> f32 {
    1.0
}

fn default_text_top_p() -> f32 {
    0.95
}

fn default_text_top_k() -> u32 {
    64
}

fn default_text_rep_pen() -> f32 {
    1.0
}

fn default_text_request_timeout_seconds() -> u64 {
    120
}

fn default_tts_python_path() -> String {
    "python3".to_string()
}

fn default_tts_script_path() -> String {
    "scripts/kokoro_tts.py".to_string()
}

fn default_tts_output_file() -> String {
    "audio/tts_output.wav".to_string()
}

fn default_tts_voice() -> String {
    "af_bella".to_string()
}

fn default_tts_queue_capacity() -> usize {
    5
}

fn default_tts_job_timeout_seconds() -> u64 {
    120
}

fn default_tts_max_chars() -> usize {
    2000
}

fn default_search_api_key_env() -> String {
    "SERPAPI_API_KEY".to_string()
}

fn default_search_endpoint() -> String {
    "https://serpapi.com/search.json".to_string()
}

fn default_search_max_results() -> usize {
    5
}

fn default_scrape_max_chars() -> usize {
    6000
}

fn default_search_request_timeout_seconds() -> u64 {
    10
}

fn default_stats_path() -> String {
    "data/generation_stats.json".to_string()
}

fn default_profiles_dir() -> String {
    "data/profiles".to_string()
}

fn default_health_poll_interval_seconds() -> u64 {
    5
}

fn default_health_poll_attempts() -> u32 {
    24
}

fn default_stop_wait_seconds() -> u64 {
    10
}

fn default_idle_check_interval_seconds() -> u64 {
    60
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn resolution(&self, preset: &str) -> Option<Resolution> {
        self.image.resolutions.get(&preset.trim().to_ascii_lowercase()).copied()
    }
}
