use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::ProviderKind;

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024; // 2 MB request cap
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Top-level config (thoughtline.toml + THOUGHTLINE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThoughtlineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub thinking: ThinkingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Upstream forwarding rules for `POST /api/proxy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Hosts the proxy may forward to. Empty means any public host.
    /// Entries match exactly, or as a suffix when written `*.example.com`.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Permit loopback / private-network upstreams (e.g. a local llama.cpp
    /// or LM Studio server). Off by default.
    #[serde(default)]
    pub allow_local: bool,
    /// Cadence of `: keep-alive` comment frames on proxied streams.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allow_local: false,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Settings the CLI chat client uses when talking to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Where the gateway listens, e.g. `http://127.0.0.1:8787`.
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Ask OpenAI-compatible upstreams for a trailing usage chunk
    /// (`stream_options.include_usage`).
    #[serde(default = "bool_true")]
    pub include_usage: bool,
    pub system_prompt: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            provider: ProviderKind::default(),
            base_url: default_openai_base_url(),
            model: String::new(),
            api_key: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            include_usage: true,
            system_prompt: None,
        }
    }
}

/// Inline reasoning markers the content stream is split on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(default = "default_open_tags")]
    pub open_tags: Vec<String>,
    #[serde(default = "default_close_tags")]
    pub close_tags: Vec<String>,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            open_tags: default_open_tags(),
            close_tags: default_close_tags(),
        }
    }
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

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_proxy_url() -> String {
    format!("http://{}:{}", DEFAULT_BIND, DEFAULT_PORT)
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_open_tags() -> Vec<String> {
    vec!["<think>".to_string(), "<analysis>".to_string()]
}
fn default_close_tags() -> Vec<String> {
    vec!["</think>".to_string(), "</analysis>".to_string()]
}
fn default_db_path() -> String {
    format!("{}/thoughtline.db", home_dir())
}

fn home_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.thoughtline", home)
}

impl ThoughtlineConfig {
    /// Load config from a TOML file with THOUGHTLINE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `THOUGHTLINE_PROXY__ALLOW_LOCAL=true` or `THOUGHTLINE_CLIENT__API_KEY=...`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::ThoughtlineError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("THOUGHTLINE_").split("__"))
    }
}

pub fn default_config_path() -> String {
    format!("{}/thoughtline.toml", home_dir())
}
