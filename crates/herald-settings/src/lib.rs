//! # herald-settings
//!
//! Layered configuration for the herald bridge.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **Settings file**: `~/.herald/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `HERALD_*` overrides
//!
//! The loaded value is passed explicitly to whoever needs it; there is no
//! process-wide settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, read_layers,
    settings_path,
};
pub use types::*;
