//! Compliance evaluation and parking lookup settings.

use serde::{Deserialize, Serialize};

/// Knobs for the compliance engine. The regulatory limits themselves are fixed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComplianceSettings {
    /// Fixed offset of the driver's local time. Day and ISO-week windows use it.
    pub utc_offset_minutes: i32,
    /// Suggest parking once the mandatory break is this close.
    pub parking_lookahead_min: i64,
    pub parking_radius_km: f64,
    pub history_default_days: u32,
    pub history_max_days: u32,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            parking_lookahead_min: 30,
            parking_radius_km: 50.0,
            history_default_days: 7,
            history_max_days: 90,
        }
    }
}

/// Where nearest-parking lookups go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationProvider {
    /// The bundled truck-park table.
    #[default]
    Local,
    /// A remote parking service at `baseUrl`.
    Http,
    /// Never suggest a parking place.
    Disabled,
}

impl std::str::FromStr for LocationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "http" => Ok(Self::Http),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(format!("unknown location provider: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationSettings {
    pub provider: LocationProvider,
    /// Base URL for the `http` provider.
    pub base_url: String,
    /// Upper bound on a single lookup.
    pub timeout_ms: u64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            provider: LocationProvider::Local,
            base_url: "http://127.0.0.1:3100".to_string(),
            timeout_ms: 2000,
        }
    }
}
