//! Regulatory thresholds (EC 561/2006) and the pure rule evaluator.

use tacho_core::session::{Violation, ViolationRule};
use tacho_core::snapshot::ComplianceSnapshot;

/// All limits are in minutes.
pub const MAX_CONTINUOUS_DRIVING_MIN: i64 = 270;
pub const REQUIRED_BREAK_MIN: i64 = 45;
pub const MAX_DAILY_DRIVING_MIN: i64 = 540;
pub const MAX_EXTENDED_DAILY_DRIVING_MIN: i64 = 600;
pub const MIN_DAILY_REST_MIN: i64 = 660;
pub const MIN_REDUCED_DAILY_REST_MIN: i64 = 540;
pub const MAX_WEEKLY_DRIVING_MIN: i64 = 3360;
pub const MAX_BIWEEKLY_DRIVING_MIN: i64 = 5400;

/// Classify three driving totals against the fixed limits.
///
/// Each rule is checked on its own, in the order continuous, daily, weekly, so
/// every breached rule is reported. Reaching a limit exactly is not a
/// violation; exceeding it is. The daily check uses the extended limit (600),
/// since the twice-a-week allowance is not tracked.
///
/// Fields that depend on more than the three inputs (session identity,
/// biweekly total, parking advice) are left at their empty values.
pub fn evaluate(continuous_min: i64, daily_min: i64, weekly_min: i64) -> ComplianceSnapshot {
    let checks = [
        (ViolationRule::ContinuousDriving, continuous_min, MAX_CONTINUOUS_DRIVING_MIN),
        (ViolationRule::DailyDriving, daily_min, MAX_EXTENDED_DAILY_DRIVING_MIN),
        (ViolationRule::WeeklyDriving, weekly_min, MAX_WEEKLY_DRIVING_MIN),
    ];
    let violations = checks
        .into_iter()
        .filter(|(_, actual, limit)| actual > limit)
        .map(|(rule, actual, limit)| Violation::new(rule, actual, limit))
        .collect();

    ComplianceSnapshot {
        is_driving: false,
        session_id: None,
        session_started_at: None,
        continuous_driving_min: continuous_min,
        max_continuous_driving_min: MAX_CONTINUOUS_DRIVING_MIN,
        time_until_break_min: (MAX_CONTINUOUS_DRIVING_MIN - continuous_min).max(0),
        next_required_break_min: if continuous_min >= MAX_CONTINUOUS_DRIVING_MIN {
            REQUIRED_BREAK_MIN
        } else {
            0
        },
        daily_driving_min: daily_min,
        max_daily_driving_min: MAX_DAILY_DRIVING_MIN,
        max_extended_daily_driving_min: MAX_EXTENDED_DAILY_DRIVING_MIN,
        weekly_driving_min: weekly_min,
        max_weekly_driving_min: MAX_WEEKLY_DRIVING_MIN,
        biweekly_driving_min: 0,
        max_biweekly_driving_min: MAX_BIWEEKLY_DRIVING_MIN,
        next_daily_rest_min: MIN_DAILY_REST_MIN,
        reduced_daily_rest_min: MIN_REDUCED_DAILY_REST_MIN,
        violations,
        parking_suggested: false,
        nearest_parking: None,
    }
}
