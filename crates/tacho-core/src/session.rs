use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DriverId, DrivingSessionId};

/// One continuous drive-until-rest interval for one driver.
///
/// `ended_at == None` means the session is still open. Closed sessions are
/// never mutated again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrivingSession {
    pub id: DrivingSessionId,
    pub driver_id: DriverId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_driving_min: Option<i64>,
    pub total_break_min: Option<i64>,
    pub distance_km: Option<f64>,
    pub is_compliant: Option<bool>,
    pub violations: Vec<Violation>,
}

impl DrivingSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whole minutes driven so far, rounding partial minutes up.
    /// Zero for a closed session: only the live session counts as continuous driving.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_active() {
            return 0;
        }
        ceil_minutes(now - self.started_at)
    }
}

/// Round a duration up to whole minutes. Negative durations clamp to zero.
pub fn ceil_minutes(duration: Duration) -> i64 {
    let ms = duration.num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    (ms + 59_999) / 60_000
}

/// Which regulatory threshold a violation breaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationRule {
    #[serde(rename = "continuous_driving_exceeded")]
    ContinuousDriving,
    #[serde(rename = "daily_driving_exceeded")]
    DailyDriving,
    #[serde(rename = "weekly_driving_exceeded")]
    WeeklyDriving,
}

impl ViolationRule {
    pub fn code(self) -> &'static str {
        match self {
            Self::ContinuousDriving => "continuous_driving_exceeded",
            Self::DailyDriving => "daily_driving_exceeded",
            Self::WeeklyDriving => "weekly_driving_exceeded",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::ContinuousDriving => "continuous",
            Self::DailyDriving => "daily",
            Self::WeeklyDriving => "weekly",
        }
    }
}

impl std::fmt::Display for ViolationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A breached threshold, with the measured value and the limit it crossed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationRule,
    pub message: String,
    pub actual_min: i64,
    pub limit_min: i64,
}

impl Violation {
    pub fn new(rule: ViolationRule, actual_min: i64, limit_min: i64) -> Self {
        Self {
            code: rule,
            message: format!(
                "Exceeded max {} driving ({actual_min}/{limit_min} min)",
                rule.label()
            ),
            actual_min,
            limit_min,
        }
    }
}
