//! Settings type definitions.
//!
//! Every struct is `#[serde(default)]`, so a partial JSON file only needs the
//! keys it changes.

mod compliance;
mod server;

pub use compliance::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings for the tacho service.
///
/// ```json
/// {
///   "server": { "port": 8088 },
///   "compliance": { "utcOffsetMinutes": 60 },
///   "location": { "provider": "http", "baseUrl": "http://parking.internal" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TachoSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub compliance: ComplianceSettings,
    pub location: LocationSettings,
    pub telemetry: TelemetrySettings,
}

/// `~/.tacho`, or `/tmp/.tacho` when `HOME` is unset.
pub fn tacho_home() -> std::path::PathBuf {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/tmp"))
        .join(".tacho")
}
