#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;
