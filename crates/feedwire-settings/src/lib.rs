//! # feedwire-settings
//!
//! Configuration for the feedwire server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`FeedwireSettings::default()`]
//! 2. **User file**: `~/.feedwire/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `FEEDWIRE_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
