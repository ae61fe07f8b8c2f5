//! Configuration for a Driftville run.
//!
//! Maps directly to `driftville.toml`. Every section and field has a
//! default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::schedule::OverlapPolicy;

/// Top-level Driftville configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriftvilleConfig {
    /// Logging settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Tick loop settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Generation service settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding service settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Schedule oracle settings.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Memory relevance ranking.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Two-party conversation settings.
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Offline metrics thresholds.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Log file locations.
    #[serde(default)]
    pub logs: LogsConfig,
}

impl DriftvilleConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `DriftvilleError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| crate::DriftvilleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values the runtime cannot honour.
    ///
    /// # Errors
    /// Returns `DriftvilleError::Config` naming the offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let fail = |msg: &str| Err(crate::DriftvilleError::Config(msg.to_string()));
        if self.simulation.minutes_per_tick == 0 {
            return fail("simulation.minutes_per_tick must be positive");
        }
        if crate::types::parse_sim_time(&self.simulation.start_time).is_err() {
            return fail("simulation.start_time must be formatted as YYYY-MM-DD HH:MM");
        }
        if self.llm.calls_per_minute == 0 {
            return fail("llm.calls_per_minute must be positive");
        }
        if self.embedding.batch_size == 0 || self.embedding.batch_size > 100 {
            return fail("embedding.batch_size must be within 1..=100");
        }
        if self.conversation.max_turns == 0 {
            return fail("conversation.max_turns must be positive");
        }
        if !(0.0..=1.0).contains(&self.metrics.intensity_cutoff) {
            return fail("metrics.intensity_cutoff must be within [0, 1]");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format: `text` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Tick loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulated start time, `YYYY-MM-DD HH:MM`.
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// Number of ticks to run. 60 ticks of 15 minutes covers 06:00 to 21:00.
    #[serde(default = "default_num_ticks")]
    pub num_ticks: u32,
    /// Fixed step length applied to every tick.
    #[serde(default = "default_15")]
    pub minutes_per_tick: u32,
    /// Run the full ORPDA cycle (`true`) or the ORPA baseline (`false`).
    #[serde(default = "default_true")]
    pub use_drift: bool,
    /// Memory-stream summaries fed back into the next tick's context.
    #[serde(default = "default_5_usize")]
    pub recent_history: usize,
    /// Wall-clock pause after each tick, in milliseconds.
    #[serde(default = "default_500")]
    pub post_tick_pause_ms: u64,
    /// Check for conversations every N ticks; 0 disables conversations.
    #[serde(default = "default_1_u32")]
    pub conversation_interval_ticks: u32,
    /// Score each tick summary and keep it as an observation memory.
    #[serde(default)]
    pub remember_observations: bool,
    /// Seed for the conversation initiator RNG; `None` seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            num_ticks: default_num_ticks(),
            minutes_per_tick: 15,
            use_drift: true,
            recent_history: 5,
            post_tick_pause_ms: 500,
            conversation_interval_ticks: 1,
            remember_observations: false,
            seed: None,
        }
    }
}

/// Generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: `ollama`, `openai` (any OpenAI-compatible endpoint), or `none`.
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL of the provider.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Environment variable holding the API key, if the provider needs one.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_0_7")]
    pub temperature: f32,
    /// Maximum tokens per response.
    #[serde(default = "default_1024")]
    pub max_tokens: u32,
    /// HTTP request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sliding-window admission limit.
    #[serde(default = "default_15")]
    pub calls_per_minute: u32,
    /// Fixed sleep before the single retry of a transient failure.
    #[serde(default = "default_60")]
    pub transient_backoff_secs: u64,
    /// Extra attempts for scoring / summarisation calls.
    #[serde(default = "default_2")]
    pub scoring_retries: u32,
    /// Base delay for the exponential scoring backoff.
    #[serde(default = "default_2_0_f64")]
    pub scoring_base_delay_secs: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: default_timeout_secs(),
            calls_per_minute: 15,
            transient_backoff_secs: 60,
            scoring_retries: 2,
            scoring_base_delay_secs: 2.0,
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: `ollama`, `openai`, or `bag_of_words` (offline, deterministic).
    #[serde(default = "default_bag_of_words")]
    pub provider: String,
    /// Base URL for HTTP providers.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Embedding model identifier.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Texts per request, at most 100.
    #[serde(default = "default_100")]
    pub batch_size: usize,
    /// Dimensionality of the bag-of-words embedder.
    #[serde(default = "default_256")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_bag_of_words(),
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            batch_size: 100,
            dimensions: 256,
        }
    }
}

/// Schedule oracle settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleConfig {
    /// How `slot_at` resolves overlapping slots.
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

/// Memory relevance ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Memories handed to a speaker per turn.
    #[serde(default = "default_3_usize")]
    pub top_k: usize,
    /// Weight of `importance / 10`.
    #[serde(default = "default_0_4")]
    pub importance_weight: f64,
    /// Weight of linear recency.
    #[serde(default = "default_0_3")]
    pub recency_weight: f64,
    /// Weight of bag-of-words relevance.
    #[serde(default = "default_0_3")]
    pub relevance_weight: f64,
    /// Days until recency reaches zero.
    #[serde(default = "default_30_f64")]
    pub recency_horizon_days: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            importance_weight: 0.4,
            recency_weight: 0.3,
            relevance_weight: 0.3,
            recency_horizon_days: 30.0,
        }
    }
}

/// Two-party conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Hard cap on turns per conversation.
    #[serde(default = "default_6_usize")]
    pub max_turns: usize,
    /// Running-dialogue turns shown to the speaker.
    #[serde(default = "default_6_usize")]
    pub dialogue_window: usize,
    /// Memories shown to the speak-gating call.
    #[serde(default = "default_3_usize")]
    pub speak_memory_window: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 6,
            dialogue_window: 6,
            speak_memory_window: 3,
        }
    }
}

/// Offline metrics thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Cosine similarity below which a pair counts as divergent.
    #[serde(default = "default_0_55")]
    pub similarity_threshold: f32,
    /// Intensity below which the audit treats a drift as absent.
    #[serde(default = "default_0_5")]
    pub intensity_cutoff: f32,
    /// Waking hours used to extrapolate drifts per day.
    #[serde(default = "default_16_f64")]
    pub waking_hours: f64,
    /// Minutes per tick when the log has fewer than two usable rows.
    #[serde(default = "default_15_f64")]
    pub default_step_minutes: f64,
    /// Phrases in an action summary that indicate mental wandering.
    #[serde(default = "default_wandering_markers")]
    pub wandering_markers: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.55,
            intensity_cutoff: 0.5,
            waking_hours: 16.0,
            default_step_minutes: 15.0,
            wandering_markers: default_wandering_markers(),
        }
    }
}

/// Log file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Directory holding every log file.
    #[serde(default = "default_log_dir")]
    pub directory: String,
    /// Tick log file name.
    #[serde(default = "default_tick_log")]
    pub tick_log: String,
    /// Memory log file name.
    #[serde(default = "default_memory_log")]
    pub memory_log: String,
    /// Dialogue event log file name.
    #[serde(default = "default_event_log")]
    pub event_log: String,
    /// Memory-stream summary log file name.
    #[serde(default = "default_stream_log")]
    pub stream_log: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            tick_log: default_tick_log(),
            memory_log: default_memory_log(),
            event_log: default_event_log(),
            stream_log: default_stream_log(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_start_time() -> String { "2023-02-13 06:00".to_string() }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_api_key_env() -> String { "DRIFTVILLE_API_KEY".to_string() }
fn default_model() -> String { "qwen2.5:7b-instruct".to_string() }
fn default_bag_of_words() -> String { "bag_of_words".to_string() }
fn default_embedding_model() -> String { "nomic-embed-text".to_string() }
fn default_log_dir() -> String { "logs".to_string() }
fn default_tick_log() -> String { "ticks.jsonl".to_string() }
fn default_memory_log() -> String { "memory.jsonl".to_string() }
fn default_event_log() -> String { "event_logs.jsonl".to_string() }
fn default_stream_log() -> String { "memory_stream.jsonl".to_string() }
fn default_wandering_markers() -> Vec<String> {
    ["thinking about", "mentally", "reflecting on", "daydream", "wandering", "exploring"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}
fn default_0_3() -> f64 { 0.3 }
fn default_0_4() -> f64 { 0.4 }
fn default_0_5() -> f32 { 0.5 }
fn default_0_55() -> f32 { 0.55 }
fn default_0_7() -> f32 { 0.7 }
fn default_2_0_f64() -> f64 { 2.0 }
fn default_15_f64() -> f64 { 15.0 }
fn default_16_f64() -> f64 { 16.0 }
fn default_30_f64() -> f64 { 30.0 }
fn default_1_u32() -> u32 { 1 }
fn default_2() -> u32 { 2 }
fn default_15() -> u32 { 15 }
fn default_num_ticks() -> u32 { 60 }
fn default_1024() -> u32 { 1024 }
fn default_3_usize() -> usize { 3 }
fn default_5_usize() -> usize { 5 }
fn default_6_usize() -> usize { 6 }
fn default_100() -> usize { 100 }
fn default_256() -> usize { 256 }
fn default_60() -> u64 { 60 }
fn default_500() -> u64 { 500 }
fn default_timeout_secs() -> u64 { 120 }
