//! # tacho-settings
//!
//! Settings are layered, lowest priority first:
//! 1. compiled defaults ([`TachoSettings::default()`])
//! 2. `~/.tacho/settings.json`, deep-merged over the defaults
//! 3. `TACHO_*` environment variables
//!
//! ```no_run
//! let settings = tacho_settings::load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_with_env,
    settings_path, validate,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        validate(&TachoSettings::default()).unwrap();
    }

    #[test]
    fn settings_path_is_under_tacho_home() {
        assert!(settings_path().ends_with(".tacho/settings.json"));
    }
}
