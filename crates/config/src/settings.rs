//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{agent, greeting, retry, stt, tts, turn, vad};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub vad: VadSettings,

    #[serde(default)]
    pub stt: SttSettings,

    #[serde(default)]
    pub turn: TurnSettings,

    #[serde(default)]
    pub tts: TtsSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings; called after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.vad.percentile) {
            return Err(ConfigError::InvalidValue {
                field: "vad.percentile".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", self.vad.percentile),
            });
        }

        if self.vad.threshold_min >= self.vad.threshold_max {
            return Err(ConfigError::InvalidValue {
                field: "vad.threshold_min".to_string(),
                message: "Lower clamp must be below upper clamp".to_string(),
            });
        }

        for (field, value) in [
            ("turn.eot_threshold_normal", self.turn.eot_threshold_normal),
            ("turn.eot_threshold_short", self.turn.eot_threshold_short),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 1.0, got {}", value),
                });
            }
        }

        if self.turn.silence_fallback_s >= self.turn.max_buffer_age_s {
            return Err(ConfigError::InvalidValue {
                field: "turn.silence_fallback_s".to_string(),
                message: "Silence fallback must fire before the max-age fallback".to_string(),
            });
        }

        if self.tts.min_sentence_chars >= self.tts.max_sentence_chars {
            return Err(ConfigError::InvalidValue {
                field: "tts.min_sentence_chars".to_string(),
                message: "Minimum chunk length must be below the split length".to_string(),
            });
        }

        if self.agent.timeout_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.timeout_s".to_string(),
                message: "Agent timeout must be at least 1 second".to_string(),
            });
        }

        if self.environment.is_production() && self.agent.runtime_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "agent.runtime_url".to_string(),
                message: "Agent runtime URL is required in production".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent call sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    200
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Barge-in detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Continuous voice required to fire an interrupt (ms)
    #[serde(default = "default_interrupt_duration_ms")]
    pub interrupt_duration_ms: u64,

    /// RMS history depth (frames)
    #[serde(default = "default_window_size_frames")]
    pub window_size_frames: usize,

    #[serde(default = "default_threshold_min")]
    pub threshold_min: f32,

    #[serde(default = "default_threshold_max")]
    pub threshold_max: f32,

    #[serde(default = "default_percentile")]
    pub percentile: f32,

    #[serde(default = "default_multiplier")]
    pub multiplier: f32,

    /// VAD suppression window after greeting dispatch (seconds)
    #[serde(default = "default_echo_cooldown_s")]
    pub greeting_echo_cooldown_s: f64,
}

fn default_interrupt_duration_ms() -> u64 {
    vad::INTERRUPT_DURATION_MS
}
fn default_window_size_frames() -> usize {
    vad::WINDOW_SIZE_FRAMES
}
fn default_threshold_min() -> f32 {
    vad::THRESHOLD_MIN
}
fn default_threshold_max() -> f32 {
    vad::THRESHOLD_MAX
}
fn default_percentile() -> f32 {
    vad::PERCENTILE
}
fn default_multiplier() -> f32 {
    vad::MULTIPLIER
}
fn default_echo_cooldown_s() -> f64 {
    greeting::ECHO_COOLDOWN_S
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            interrupt_duration_ms: default_interrupt_duration_ms(),
            window_size_frames: default_window_size_frames(),
            threshold_min: default_threshold_min(),
            threshold_max: default_threshold_max(),
            percentile: default_percentile(),
            multiplier: default_multiplier(),
            greeting_echo_cooldown_s: default_echo_cooldown_s(),
        }
    }
}

/// Utterance segmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    /// Fixed silence threshold (PCM16 RMS)
    #[serde(default = "default_silence_threshold_rms")]
    pub silence_threshold_rms: f32,

    /// Silence after speech that cuts an utterance (seconds)
    #[serde(default = "default_silence_duration_s")]
    pub silence_duration_s: f64,

    /// Utterances shorter than this are dropped (seconds)
    #[serde(default = "default_min_audio_s")]
    pub min_audio_s: f64,

    /// Recognizer invocation timeout (seconds)
    #[serde(default = "default_recognizer_timeout_s")]
    pub recognizer_timeout_s: u64,

    /// Recognizer HTTP endpoint
    #[serde(default = "default_stt_endpoint")]
    pub endpoint: String,
}

fn default_stt_endpoint() -> String {
    "http://127.0.0.1:9000/transcribe".to_string()
}
fn default_silence_threshold_rms() -> f32 {
    stt::SILENCE_THRESHOLD_RMS
}
fn default_silence_duration_s() -> f64 {
    stt::SILENCE_DURATION_S
}
fn default_min_audio_s() -> f64 {
    stt::MIN_AUDIO_S
}
fn default_recognizer_timeout_s() -> u64 {
    stt::RECOGNIZER_TIMEOUT_S
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            silence_threshold_rms: default_silence_threshold_rms(),
            silence_duration_s: default_silence_duration_s(),
            min_audio_s: default_min_audio_s(),
            recognizer_timeout_s: default_recognizer_timeout_s(),
            endpoint: default_stt_endpoint(),
        }
    }
}

/// Turn controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSettings {
    #[serde(default = "default_eot_threshold_normal")]
    pub eot_threshold_normal: f32,

    #[serde(default = "default_eot_threshold_short")]
    pub eot_threshold_short: f32,

    #[serde(default = "default_short_word_cap")]
    pub short_word_cap: usize,

    #[serde(default = "default_silence_fallback_s")]
    pub silence_fallback_s: f64,

    #[serde(default = "default_max_buffer_age_s")]
    pub max_buffer_age_s: f64,

    #[serde(default = "default_no_input_timeout_s")]
    pub no_input_timeout_s: f64,

    /// Fallback/watchdog ticker interval (ms)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// End-of-turn classifier model path (ONNX builds)
    #[serde(default = "default_eot_model_path")]
    pub eot_model_path: String,

    /// End-of-turn tokenizer path (ONNX builds)
    #[serde(default = "default_eot_tokenizer_path")]
    pub eot_tokenizer_path: String,
}

fn default_eot_threshold_normal() -> f32 {
    turn::EOT_THRESHOLD_NORMAL
}
fn default_eot_threshold_short() -> f32 {
    turn::EOT_THRESHOLD_SHORT
}
fn default_short_word_cap() -> usize {
    turn::SHORT_WORD_CAP
}
fn default_silence_fallback_s() -> f64 {
    turn::SILENCE_FALLBACK_S
}
fn default_max_buffer_age_s() -> f64 {
    turn::MAX_BUFFER_AGE_S
}
fn default_no_input_timeout_s() -> f64 {
    turn::NO_INPUT_TIMEOUT_S
}
fn default_tick_ms() -> u64 {
    turn::TICK_MS
}
fn default_eot_model_path() -> String {
    "models/eot/model_quantized.onnx".to_string()
}
fn default_eot_tokenizer_path() -> String {
    "models/eot/tokenizer.json".to_string()
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            eot_threshold_normal: default_eot_threshold_normal(),
            eot_threshold_short: default_eot_threshold_short(),
            short_word_cap: default_short_word_cap(),
            silence_fallback_s: default_silence_fallback_s(),
            max_buffer_age_s: default_max_buffer_age_s(),
            no_input_timeout_s: default_no_input_timeout_s(),
            tick_ms: default_tick_ms(),
            eot_model_path: default_eot_model_path(),
            eot_tokenizer_path: default_eot_tokenizer_path(),
        }
    }
}

/// Synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Fixed audio chunk duration (ms)
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u64,

    #[serde(default = "default_min_sentence_chars")]
    pub min_sentence_chars: usize,

    #[serde(default = "default_max_sentence_chars")]
    pub max_sentence_chars: usize,

    /// Synthesizer HTTP endpoint (empty selects the silence engine)
    #[serde(default)]
    pub endpoint: String,
}

fn default_chunk_ms() -> u64 {
    tts::CHUNK_MS
}
fn default_min_sentence_chars() -> usize {
    tts::MIN_SENTENCE_CHARS
}
fn default_max_sentence_chars() -> usize {
    tts::MAX_SENTENCE_CHARS
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            chunk_ms: default_chunk_ms(),
            min_sentence_chars: default_min_sentence_chars(),
            max_sentence_chars: default_max_sentence_chars(),
            endpoint: String::new(),
        }
    }
}

/// Agent runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Agent runtime base URL
    #[serde(default = "default_runtime_url")]
    pub runtime_url: String,

    /// Agent mode tag: "sales" or "healthcare"
    #[serde(default = "default_agent_mode")]
    pub mode: String,

    #[serde(default = "default_agent_timeout_s")]
    pub timeout_s: u64,

    /// Call-control endpoint for hangups (empty disables hangup)
    #[serde(default)]
    pub call_control_url: String,

    /// Send a greeting before any user input (outbound calls)
    #[serde(default = "default_true")]
    pub greeting_enabled: bool,
}

fn default_runtime_url() -> String {
    "http://localhost:8123".to_string()
}
fn default_agent_mode() -> String {
    "sales".to_string()
}
fn default_agent_timeout_s() -> u64 {
    agent::TIMEOUT_S
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            runtime_url: default_runtime_url(),
            mode: default_agent_mode(),
            timeout_s: default_agent_timeout_s(),
            call_control_url: String::new(),
            greeting_enabled: true,
        }
    }
}

/// Disconnect retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_min_duration_s")]
    pub min_duration_s: u64,

    #[serde(default = "default_retry_delay_s")]
    pub delay_s: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_min_duration_s() -> u64 {
    retry::MIN_DURATION_S
}
fn default_retry_delay_s() -> u64 {
    retry::DELAY_S
}
fn default_retry_max_attempts() -> u32 {
    retry::MAX_ATTEMPTS
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_duration_s: default_retry_min_duration_s(),
            delay_s: default_retry_delay_s(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

/// ScyllaDB persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable ScyllaDB persistence (false = in-memory stores)
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,

    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_scylla_hosts() -> Vec<String> {
    vec!["127.0.0.1:9042".to_string()]
}
fn default_scylla_keyspace() -> String {
    "switchboard".to_string()
}
fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (SWITCHBOARD__ prefix, __ separator)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SWITCHBOARD")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
