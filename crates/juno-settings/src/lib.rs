//! # juno-settings
//!
//! Configuration with layered sources:
//! 1. **Compiled defaults**: [`JunoSettings::default()`]
//! 2. **Settings files**: `~/.juno/settings.json`, then an optional explicit
//!    file, each deep-merged over the previous layer
//! 3. **Environment variables**: `GEMINI_API_KEY`, `FI_MCP_URL`, `PORT`,
//!    `JUNO_*` (highest priority)
//!
//! The loaded value is returned to the caller and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_from_paths, settings_path,
};
pub use types::*;
