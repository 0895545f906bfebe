use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConciergeError, Result};
use crate::types::IntentLabel;

/// Top-level configuration for the Concierge application.
///
/// Loaded from `~/.concierge/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConciergeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub faq: FaqConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl ConciergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConciergeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConciergeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Application name shown on the landing page and in logs.
    pub app_name: String,
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: "E-Commerce Chatbot".to_string(),
            data_dir: "~/.concierge/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS (the chat frontend).
    pub allowed_origins: Vec<String>,
    /// Maximum requests per second across the API.
    pub rate_limit_per_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            rate_limit_per_sec: 100,
        }
    }
}

/// Intent classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Similarity backend for the fast tier: "lexical" or "onnx".
    pub similarity_backend: String,
    /// Directory holding `model.onnx` and `tokenizer.json` for the "onnx" backend.
    pub embedding_model_dir: Option<String>,
    /// Per-intent acceptance thresholds on a normalized similarity scale.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Whether ambiguous messages escalate to the contextual classifier.
    pub fallback_enabled: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            similarity_backend: "lexical".to_string(),
            embedding_model_dir: None,
            thresholds: ThresholdConfig::default(),
            fallback_enabled: true,
        }
    }
}

/// Acceptance threshold per routable intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub faq: f32,
    pub product_inquiry: f32,
    pub small_talk: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            faq: 0.25,
            product_inquiry: 0.25,
            small_talk: 0.25,
        }
    }
}

impl ThresholdConfig {
    /// Threshold for a label. `Default` has no reference utterances and
    /// can never be matched by the fast tier.
    pub fn for_label(&self, label: IntentLabel) -> f32 {
        match label {
            IntentLabel::Faq => self.faq,
            IntentLabel::ProductInquiry => self.product_inquiry,
            IntentLabel::SmallTalk => self.small_talk,
            IntentLabel::Default => f32::INFINITY,
        }
    }
}

/// Conversation store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend: "memory" or "sqlite".
    pub backend: String,
    /// Maximum live conversations before the least recently active is evicted (0 = unbounded).
    pub max_conversations: usize,
    /// Minutes of inactivity before a conversation expires (0 = never).
    pub idle_expiry_minutes: u32,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            max_conversations: 10_000,
            idle_expiry_minutes: 1_440,
            sweep_interval_secs: 300,
        }
    }
}

/// Chat-completion backend settings (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// API key. Usually supplied through `GROQ_API_KEY` instead of the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model for FAQ answers.
    pub faq_model: String,
    /// Model for SQL generation and result summaries.
    pub sql_model: String,
    /// Model for small talk.
    pub small_talk_model: String,
    /// Model for contextual intent classification.
    pub classifier_model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            faq_model: "meta-llama/llama-4-maverick-17b-128e-instruct".to_string(),
            sql_model: "openai/gpt-oss-20b".to_string(),
            small_talk_model: "openai/gpt-oss-20b".to_string(),
            classifier_model: "openai/gpt-oss-20b".to_string(),
            timeout_secs: 30,
        }
    }
}

/// FAQ knowledge base settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaqConfig {
    /// JSON file with `[{"question": ..., "answer": ...}]` entries.
    pub data_file: Option<String>,
    /// Number of entries retrieved per question.
    pub n_results: usize,
    /// Capacity of the retrieval cache.
    pub cache_capacity: usize,
    /// Similarity below which a retrieved entry is ignored.
    pub min_score: f64,
}

impl Default for FaqConfig {
    fn default() -> Self {
        Self {
            data_file: None,
            n_results: 5,
            cache_capacity: 256,
            min_score: 0.5,
        }
    }
}

/// Product catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON file with product rows used to seed an empty catalog.
    pub seed_file: Option<String>,
    /// Maximum rows returned by a generated query.
    pub max_rows: usize,
    /// Rows passed to the summarizer.
    pub summary_rows: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            seed_file: None,
            max_rows: 50,
            summary_rows: 10,
        }
    }
}

/// Dialogue router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum message length in characters.
    pub max_message_chars: usize,
    /// Reply returned when a handler fails.
    pub apology: String,
    /// Number of most recent turns handlers include in their prompts.
    pub history_window: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2_000,
            apology: "Sorry, something went wrong while answering your question. Please try again."
                .to_string(),
            history_window: 10,
        }
    }
}
