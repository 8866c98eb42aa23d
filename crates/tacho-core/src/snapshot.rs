use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DrivingSessionId;
use crate::location::ParkingSummary;
use crate::session::Violation;

/// Derived view of a driver's regulatory standing at one instant.
/// Recomputed from session history on every request, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub is_driving: bool,
    pub session_id: Option<DrivingSessionId>,
    pub session_started_at: Option<DateTime<Utc>>,

    pub continuous_driving_min: i64,
    pub max_continuous_driving_min: i64,
    pub time_until_break_min: i64,
    pub next_required_break_min: i64,

    pub daily_driving_min: i64,
    pub max_daily_driving_min: i64,
    pub max_extended_daily_driving_min: i64,

    pub weekly_driving_min: i64,
    pub max_weekly_driving_min: i64,

    /// Computed for display only; no violation is raised on it.
    pub biweekly_driving_min: i64,
    pub max_biweekly_driving_min: i64,

    pub next_daily_rest_min: i64,
    pub reduced_daily_rest_min: i64,

    pub violations: Vec<Violation>,

    pub parking_suggested: bool,
    pub nearest_parking: Option<ParkingSummary>,
}

impl ComplianceSnapshot {
    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }
}
