use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info, instrument};

use tacho_core::ids::DriverId;
use tacho_core::session::{ceil_minutes, DrivingSession};
use tacho_store::{SessionStore, StoreError};

use crate::aggregator::RollingWindowAggregator;
use crate::error::ComplianceError;
use crate::rules;

/// Starts and stops driving sessions.
///
/// The one-open-session-per-driver rule is enforced by the store's insert, so
/// it holds across concurrent requests and across service instances. A stop
/// only closes a row that is still open, so of two racing stops one gets
/// `NotFound`.
#[derive(Clone)]
pub struct SessionLifecycle {
    store: Arc<dyn SessionStore>,
    windows: RollingWindowAggregator,
}

impl SessionLifecycle {
    pub fn new(store: Arc<dyn SessionStore>, windows: RollingWindowAggregator) -> Self {
        Self { store, windows }
    }

    #[instrument(skip(self), fields(driver_id = %driver_id))]
    pub fn start(
        &self,
        driver_id: &DriverId,
        now: DateTime<Utc>,
    ) -> Result<DrivingSession, ComplianceError> {
        let now = now.trunc_subsecs(3);
        match self.store.insert_session(driver_id, now) {
            Ok(session) => {
                info!(session_id = %session.id, "driving session started");
                Ok(session)
            }
            Err(StoreError::Conflict(message)) => {
                // Best effort: name the session that blocked the start.
                let session_id = self
                    .store
                    .find_active_session(driver_id)
                    .ok()
                    .flatten()
                    .map(|s| s.id);
                debug!(?session_id, "start rejected, session already active");
                Err(ComplianceError::Conflict {
                    message,
                    session_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(driver_id = %driver_id))]
    pub fn stop(
        &self,
        driver_id: &DriverId,
        now: DateTime<Utc>,
    ) -> Result<DrivingSession, ComplianceError> {
        let now = now.trunc_subsecs(3);
        let active = self
            .store
            .find_active_session(driver_id)?
            .ok_or_else(|| {
                ComplianceError::NotFound(format!("no active driving session for driver {driver_id}"))
            })?;

        let ended_at = closing_time(active.started_at, now);
        let total_driving_min = ceil_minutes(ended_at - active.started_at).max(1);
        let (daily, weekly) = self.windows.closing_totals(&active, total_driving_min)?;
        let violations = rules::evaluate(total_driving_min, daily, weekly).violations;

        let closed = self
            .store
            .close_session(&active.id, ended_at, total_driving_min, &violations)?;
        info!(
            session_id = %closed.id,
            total_driving_min,
            violations = closed.violations.len(),
            "driving session stopped"
        );
        Ok(closed)
    }
}

/// `now`, or 1 ms after `started_at` when the clock has not moved past the start.
/// Both are whole milliseconds, matching the stored timestamp precision.
fn closing_time(started_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > started_at {
        now
    } else {
        started_at + Duration::milliseconds(1)
    }
}
