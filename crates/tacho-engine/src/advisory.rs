use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tacho_core::errors::LocatorError;
use tacho_core::location::{GeoPoint, ParkingLocator, ParkingSummary};
use tacho_telemetry::MetricsRecorder;

use crate::rules::MAX_CONTINUOUS_DRIVING_MIN;

/// Parking advice attached to a compliance snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakAdvice {
    pub parking_suggested: bool,
    pub nearest_parking: Option<ParkingSummary>,
}

/// Looks for a place to stop once the mandatory break is near.
///
/// The lookup never fails the caller: errors, timeouts and a missing position
/// all come back as `nearest_parking: None`.
pub struct BreakAdvisor {
    locator: Arc<dyn ParkingLocator>,
    lookahead_min: i64,
    radius_km: f64,
    timeout: Duration,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl BreakAdvisor {
    pub fn new(
        locator: Arc<dyn ParkingLocator>,
        lookahead_min: i64,
        radius_km: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            locator,
            lookahead_min,
            radius_km,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn locator_name(&self) -> &str {
        self.locator.name()
    }

    /// True once continuous driving is within the lookahead of the 270-minute limit.
    pub fn break_imminent(&self, continuous_min: i64) -> bool {
        continuous_min >= MAX_CONTINUOUS_DRIVING_MIN - self.lookahead_min
    }

    pub async fn advise(&self, continuous_min: i64, position: Option<GeoPoint>) -> BreakAdvice {
        if !self.break_imminent(continuous_min) {
            return BreakAdvice::default();
        }
        let Some(point) = position else {
            debug!(continuous_min, "break imminent but no position supplied");
            return BreakAdvice {
                parking_suggested: true,
                nearest_parking: None,
            };
        };

        let lookup = self.locator.find_nearest_parking(point, self.radius_km);
        let result = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(LocatorError::Timeout(self.timeout)),
        };

        let nearest_parking = match result {
            Ok(found) => {
                self.record_lookup(if found.is_some() { "found" } else { "none" });
                found
            }
            Err(e) => {
                warn!(
                    locator = self.locator.name(),
                    error_kind = e.error_kind(),
                    error = %e,
                    "parking lookup failed"
                );
                self.record_lookup(e.error_kind());
                None
            }
        };

        BreakAdvice {
            parking_suggested: true,
            nearest_parking,
        }
    }

    fn record_lookup(&self, outcome: &str) {
        if let Some(m) = &self.metrics {
            m.counter_inc("compliance.parking.lookups", &[("outcome", outcome)], 1);
        }
    }
}
