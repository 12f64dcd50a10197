use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;
pub const MAX_BUFFERED_BYTES: usize = 1024 * 1024;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const HEARTBEAT_IDLE_TOLERANCE_SECS: u64 = 90;

pub const DEFAULT_TOOL_CALL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LLM_TURN_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TTS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AGENT_WALL_CLOCK_CAP_SECS: u64 = 60;
pub const DEFAULT_AGENT_STEP_CAP: u32 = 12;

pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_FAILURE_WINDOW_SECS: u64 = 30;
pub const DEFAULT_BREAKER_COOL_OFF_SECS: u64 = 30;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;
pub const DEFAULT_RATE_LIMIT_SLACK_MS: u64 = 200;

/// Confidence at or above which a single-candidate classification becomes a
/// DirectActionPlan outright (§4.4 step 5).
pub const DEFAULT_INTENT_CONFIDENCE_HIGH: f32 = 0.75;
/// Confidence below which a classification is treated as plain conversation
/// (§4.4 step 5).
pub const DEFAULT_INTENT_CONFIDENCE_LOW: f32 = 0.35;
/// Candidate tools bounded to this many before reaching the classifier, to
/// keep prompts bounded (§4.4 step 4).
pub const DEFAULT_INTENT_CANDIDATE_TOP_K: usize = 8;
/// Feedback-correction match threshold (§4.4 step 3); cosine similarity.
pub const DEFAULT_FEEDBACK_MATCH_THRESHOLD: f32 = 0.85;

/// Top-level config (`renfield.toml` + `RENFIELD_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenfieldConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
}

impl Default for RenfieldConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
                auth: AuthConfig {
                    mode: AuthMode::Token,
                    token: Some("change-me".to_string()),
                },
            },
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            features: FeatureFlags::default(),
            providers: ProvidersConfig::default(),
            webhooks: WebhooksConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub auth: AuthConfig,
}

/// How the Gateway authenticates an inbound WS/REST connection before
/// handing off to the external auth collaborator (§1, §10.11 of SPEC_FULL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// The four model slots §6 names, plus an optional distinct agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub chat_model: String,
    pub intent_model: String,
    pub rag_model: String,
    pub embed_model: String,
    pub agent_endpoint: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            chat_model: "chat-default".to_string(),
            intent_model: "intent-default".to_string(),
            rag_model: "rag-default".to_string(),
            embed_model: "embed-default".to_string(),
            agent_endpoint: None,
        }
    }
}

/// Booleans named by §6's environment surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub agent_enabled: bool,
    #[serde(default = "bool_true")]
    pub memory_enabled: bool,
    #[serde(default)]
    pub proactive_enabled: bool,
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default = "bool_true")]
    pub auth_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            agent_enabled: false,
            memory_enabled: true,
            proactive_enabled: false,
            metrics_enabled: false,
            auth_enabled: true,
        }
    }
}

/// Per-provider configuration: `{provider}_enabled`, connection params,
/// `rate_limit` (req/min), `timeout` (s) — §6. Providers themselves are
/// out of scope; this only carries the parameters the Registry needs to
/// attempt a connection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub entries: Vec<ProviderEntryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntryConfig {
    pub name: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub transport: ProviderTransportConfig,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderTransportConfig {
    ChildProcessStdio { command: String, args: Vec<String> },
    LongPollHttp { base_url: String },
    StreamingHttp { base_url: String },
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.renfield/renfield.db")
}
fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}
fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_CALL_TIMEOUT_SECS
}

/// Auth mode for an incoming proactive-notification webhook source (§4.6,
/// §10.11 of SPEC_FULL).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuthMode {
    HmacSha256,
    BearerToken,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSourceConfig {
    pub name: String,
    pub secret: Option<String>,
    pub auth_mode: WebhookAuthMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<WebhookSourceConfig>,
}

impl RenfieldConfig {
    /// Load config from a TOML file with `RENFIELD_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, then `RENFIELD_CONFIG`,
    /// then `~/.renfield/renfield.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("RENFIELD_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: RenfieldConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RENFIELD_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.renfield/renfield.toml")
}
