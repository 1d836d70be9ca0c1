use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;

/// Complete server configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct JunoSettings {
    pub server: ServerSettings,
    pub tools: ToolSettings,
    pub model: ModelSettings,
    pub context: ContextSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Optional raw TCP listener speaking line-delimited envelopes.
    pub tcp_port: Option<u16>,
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8091,
            tcp_port: None,
            max_send_queue: 256,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub provider_url: String,
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            provider_url: "http://localhost:8090".into(),
            call_timeout_ms: 8_000,
            connect_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// No key means demo mode.
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub call_timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-2.5-flash-lite".into(),
            embedding_model: "text-embedding-004".into(),
            call_timeout_ms: 30_000,
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub recent_window: usize,
    pub embed_timeout_ms: u64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            recent_window: 4,
            embed_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub db_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: crate::loader::juno_dir().join("database").join("conversations.db"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
