//! Server, database and telemetry settings.

use serde::{Deserialize, Serialize};

use super::tacho_home;

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// Per-request timeout applied by the HTTP layer.
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// SQLite file holding driving sessions and truck parks.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: tacho_home()
                .join("database/tacho.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// Logging and metrics settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// One of `trace`, `debug`, `info`, `warn`, `error`. `RUST_LOG` wins when set.
    pub log_level: String,
    /// Persist warn+ events to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
    pub metrics_enabled: bool,
    pub metrics_db_path: String,
    pub metrics_snapshot_interval_secs: u64,
    pub metrics_retention_days: u32,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        let db_dir = tacho_home().join("database");
        Self {
            log_level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: db_dir.join("logs.db").to_string_lossy().into_owned(),
            metrics_enabled: true,
            metrics_db_path: db_dir.join("metrics.db").to_string_lossy().into_owned(),
            metrics_snapshot_interval_secs: 60,
            metrics_retention_days: 7,
        }
    }
}
