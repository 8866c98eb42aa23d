//! `ComplianceEngine`: the status/start/stop/history surface the request layer calls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use tacho_core::ids::DriverId;
use tacho_core::location::{GeoPoint, ParkingLocator};
use tacho_core::session::DrivingSession;
use tacho_core::snapshot::ComplianceSnapshot;
use tacho_store::SessionStore;
use tacho_telemetry::MetricsRecorder;

use crate::advisory::BreakAdvisor;
use crate::aggregator::{LocalCalendar, RollingWindowAggregator};
use crate::error::ComplianceError;
use crate::lifecycle::SessionLifecycle;
use crate::rules;

/// Tunables for one engine instance.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub utc_offset_minutes: i32,
    pub parking_lookahead_min: i64,
    pub parking_radius_km: f64,
    pub locator_timeout: Duration,
    pub history_default_days: u32,
    pub history_max_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            parking_lookahead_min: 30,
            parking_radius_km: 50.0,
            locator_timeout: Duration::from_millis(2000),
            history_default_days: 7,
            history_max_days: 90,
        }
    }
}

impl EngineConfig {
    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                utc_offset_minutes = self.utc_offset_minutes,
                "utc offset out of range, falling back to UTC"
            );
            Utc.fix()
        })
    }
}

/// Per-day roll-up in `history`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_driving_min: i64,
    pub total_break_min: i64,
    pub total_distance_km: f64,
    pub session_count: u32,
}

impl DailySummary {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_driving_min: 0,
            total_break_min: 0,
            total_distance_km: 0.0,
            session_count: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrivingHistory {
    /// Newest first.
    pub sessions: Vec<DrivingSession>,
    /// Newest date first.
    pub daily_summary: Vec<DailySummary>,
}

pub struct ComplianceEngine {
    store: Arc<dyn SessionStore>,
    windows: RollingWindowAggregator,
    lifecycle: SessionLifecycle,
    advisor: BreakAdvisor,
    config: EngineConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ComplianceEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        locator: Arc<dyn ParkingLocator>,
        config: EngineConfig,
    ) -> Self {
        let windows = RollingWindowAggregator::new(store.clone(), LocalCalendar::new(config.offset()));
        let lifecycle = SessionLifecycle::new(store.clone(), windows.clone());
        let advisor = BreakAdvisor::new(
            locator,
            config.parking_lookahead_min,
            config.parking_radius_km,
            config.locator_timeout,
        );
        Self {
            store,
            windows,
            lifecycle,
            advisor,
            config,
            metrics: None,
        }
    }

    /// Attach a recorder. The active-sessions gauge starts from the open rows
    /// already in the store, so it stays correct across restarts.
    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        if let Some(m) = &metrics {
            match self.store.count_open_sessions() {
                Ok(open) => m.gauge_set("compliance.sessions.active", &[], open as f64),
                Err(e) => warn!(error = %e, "could not seed active session gauge"),
            }
        }
        self.advisor = self.advisor.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locator_name(&self) -> &str {
        self.advisor.locator_name()
    }

    /// Current compliance standing. Never mutates.
    ///
    /// Storage failures fail the call. A parking lookup failure only leaves
    /// `nearest_parking` empty.
    #[instrument(skip(self, position), fields(driver_id = %driver_id))]
    pub async fn status(
        &self,
        driver_id: &DriverId,
        now: DateTime<Utc>,
        position: Option<GeoPoint>,
    ) -> Result<ComplianceSnapshot, ComplianceError> {
        let active = self.store.find_active_session(driver_id)?;
        let totals = self.windows.totals(driver_id, active.as_ref(), now)?;

        let mut snapshot = rules::evaluate(totals.continuous_min, totals.daily_min, totals.weekly_min);
        snapshot.is_driving = active.is_some();
        snapshot.session_id = active.as_ref().map(|s| s.id.clone());
        snapshot.session_started_at = active.as_ref().map(|s| s.started_at);
        snapshot.biweekly_driving_min = totals.biweekly_min;

        let advice = self.advisor.advise(totals.continuous_min, position).await;
        snapshot.parking_suggested = advice.parking_suggested;
        snapshot.nearest_parking = advice.nearest_parking;
        Ok(snapshot)
    }

    pub fn start(
        &self,
        driver_id: &DriverId,
        now: DateTime<Utc>,
    ) -> Result<DrivingSession, ComplianceError> {
        let result = self.lifecycle.start(driver_id, now);
        if let Some(m) = &self.metrics {
            match &result {
                Ok(_) => {
                    m.counter_inc("compliance.sessions.started", &[], 1);
                    m.gauge_inc("compliance.sessions.active", &[], 1.0);
                }
                Err(ComplianceError::Conflict { .. }) => {
                    m.counter_inc("compliance.start.conflicts", &[], 1);
                }
                Err(_) => {}
            }
        }
        result
    }

    pub fn stop(
        &self,
        driver_id: &DriverId,
        now: DateTime<Utc>,
    ) -> Result<DrivingSession, ComplianceError> {
        let session = self.lifecycle.stop(driver_id, now)?;
        if let Some(m) = &self.metrics {
            m.counter_inc("compliance.sessions.stopped", &[], 1);
            m.gauge_inc("compliance.sessions.active", &[], -1.0);
            for v in &session.violations {
                m.counter_inc("compliance.violations", &[("rule", v.code.code())], 1);
            }
        }
        Ok(session)
    }

    /// Sessions started in the trailing `window_days` (inclusive) and their
    /// per-local-day totals. `None` uses the configured default window.
    #[instrument(skip(self), fields(driver_id = %driver_id))]
    pub fn history(
        &self,
        driver_id: &DriverId,
        window_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<DrivingHistory, ComplianceError> {
        let days = window_days.unwrap_or(self.config.history_default_days);
        if days == 0 || days > self.config.history_max_days {
            return Err(ComplianceError::InvalidInput(format!(
                "days must be between 1 and {}, got {days}",
                self.config.history_max_days
            )));
        }

        let since = now - chrono::Duration::days(i64::from(days));
        let sessions = self.store.sessions_since(driver_id, since)?;
        let daily_summary = summarize_by_day(&sessions, self.windows.calendar());
        Ok(DrivingHistory {
            sessions,
            daily_summary,
        })
    }
}

fn summarize_by_day(sessions: &[DrivingSession], calendar: LocalCalendar) -> Vec<DailySummary> {
    let mut days: BTreeMap<NaiveDate, DailySummary> = BTreeMap::new();
    for s in sessions {
        let date = calendar.local_date(s.started_at);
        let day = days.entry(date).or_insert_with(|| DailySummary::empty(date));
        day.total_driving_min += s.total_driving_min.unwrap_or(0);
        day.total_break_min += s.total_break_min.unwrap_or(0);
        day.total_distance_km += s.distance_km.unwrap_or(0.0);
        day.session_count += 1;
    }
    days.into_values().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tacho_core::errors::LocatorError;
    use tacho_core::ids::{DrivingSessionId, ParkingId};
    use tacho_core::location::{NoopParkingLocator, ParkingSummary};
    use tacho_core::session::{Violation, ViolationRule};
    use tacho_store::{Database, DrivingSessionRepo, StoreError};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 6, 0, 0).unwrap()
    }

    fn driver() -> DriverId {
        DriverId::from_raw("driver-1")
    }

    fn here() -> Option<GeoPoint> {
        Some(GeoPoint::new(52.32, 10.23).unwrap())
    }

    struct FixedLocator(Result<Option<ParkingSummary>, LocatorError>);

    #[async_trait]
    impl ParkingLocator for FixedLocator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn find_nearest_parking(
            &self,
            _point: GeoPoint,
            _radius_km: f64,
        ) -> Result<Option<ParkingSummary>, LocatorError> {
            self.0.clone()
        }
    }

    fn parking() -> ParkingSummary {
        ParkingSummary {
            id: ParkingId::from_raw("park_1"),
            name: "Autohof Peine".into(),
            address: Some("Woltorfer Str. 1".into()),
            country: "DE".into(),
            lat: 52.33,
            lng: 10.24,
            distance_km: 1.4,
            total_spaces: Some(150),
            has_security: true,
            has_showers: true,
            price_per_night_eur: Some(12.0),
            is_free: false,
        }
    }

    fn engine_with(locator: Arc<dyn ParkingLocator>) -> (Arc<DrivingSessionRepo>, ComplianceEngine) {
        let repo = Arc::new(DrivingSessionRepo::new(Database::in_memory().unwrap()));
        let engine = ComplianceEngine::new(repo.clone(), locator, EngineConfig::default());
        (repo, engine)
    }

    fn engine() -> (Arc<DrivingSessionRepo>, ComplianceEngine) {
        engine_with(Arc::new(NoopParkingLocator))
    }

    /// Every call fails as if the database were gone.
    struct BrokenStore;

    impl SessionStore for BrokenStore {
        fn find_active_session(&self, _: &DriverId) -> Result<Option<DrivingSession>, StoreError> {
            Err(StoreError::Database("unable to open database file".into()))
        }
        fn insert_session(&self, _: &DriverId, _: DateTime<Utc>) -> Result<DrivingSession, StoreError> {
            Err(StoreError::Database("unable to open database file".into()))
        }
        fn close_session(
            &self,
            _: &DrivingSessionId,
            _: DateTime<Utc>,
            _: i64,
            _: &[Violation],
        ) -> Result<DrivingSession, StoreError> {
            Err(StoreError::Database("unable to open database file".into()))
        }
        fn sum_driving_minutes(&self, _: &DriverId, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<i64, StoreError> {
            Err(StoreError::Database("unable to open database file".into()))
        }
        fn sessions_since(&self, _: &DriverId, _: DateTime<Utc>) -> Result<Vec<DrivingSession>, StoreError> {
            Err(StoreError::Database("unable to open database file".into()))
        }
        fn count_open_sessions(&self) -> Result<i64, StoreError> {
            Err(StoreError::Database("unable to open database file".into()))
        }
    }

    #[tokio::test]
    async fn idle_status() {
        let (_repo, engine) = engine();
        let s = engine.status(&driver(), t0(), None).await.unwrap();
        assert!(!s.is_driving);
        assert_eq!(s.session_id, None);
        assert_eq!(s.continuous_driving_min, 0);
        assert_eq!(s.time_until_break_min, 270);
        assert!(!s.parking_suggested);
        assert!(s.is_compliant());
    }

    #[tokio::test]
    async fn status_while_driving() {
        let (_repo, engine) = engine();
        let session = engine.start(&driver(), t0()).unwrap();
        let s = engine
            .status(&driver(), t0() + ChronoDuration::minutes(100), None)
            .await
            .unwrap();
        assert!(s.is_driving);
        assert_eq!(s.session_id, Some(session.id));
        assert_eq!(s.session_started_at, Some(t0()));
        assert_eq!(s.continuous_driving_min, 100);
        assert_eq!(s.daily_driving_min, 100);
        assert_eq!(s.weekly_driving_min, 100);
        assert_eq!(s.biweekly_driving_min, 100);
        assert_eq!(s.time_until_break_min, 170);
    }

    #[tokio::test]
    async fn status_is_idempotent_and_monotonic() {
        let (_repo, engine) = engine();
        engine.start(&driver(), t0()).unwrap();
        let now = t0() + ChronoDuration::minutes(42);
        let a = engine.status(&driver(), now, None).await.unwrap();
        let b = engine.status(&driver(), now, None).await.unwrap();
        assert_eq!(a, b);
        let later = engine
            .status(&driver(), now + ChronoDuration::seconds(30), None)
            .await
            .unwrap();
        assert!(later.continuous_driving_min >= a.continuous_driving_min);
    }

    #[tokio::test]
    async fn overdue_break_reports_violation_and_parking() {
        let (_repo, engine) = engine_with(Arc::new(FixedLocator(Ok(Some(parking())))));
        engine.start(&driver(), t0()).unwrap();
        let s = engine
            .status(&driver(), t0() + ChronoDuration::minutes(300), here())
            .await
            .unwrap();
        assert_eq!(s.next_required_break_min, 45);
        assert_eq!(s.violations.len(), 1);
        assert_eq!(s.violations[0].code, ViolationRule::ContinuousDriving);
        assert!(s.parking_suggested);
        assert_eq!(s.nearest_parking.unwrap().name, "Autohof Peine");
    }

    #[tokio::test]
    async fn locator_outage_does_not_fail_status() {
        let locator = FixedLocator(Err(LocatorError::Unavailable("503".into())));
        let (_repo, engine) = engine_with(Arc::new(locator));
        engine.start(&driver(), t0()).unwrap();
        let s = engine
            .status(&driver(), t0() + ChronoDuration::minutes(250), here())
            .await
            .unwrap();
        assert!(s.parking_suggested);
        assert!(s.nearest_parking.is_none());
    }

    #[tokio::test]
    async fn storage_outage_fails_status() {
        let engine = ComplianceEngine::new(
            Arc::new(BrokenStore),
            Arc::new(NoopParkingLocator),
            EngineConfig::default(),
        );
        let err = engine.status(&driver(), t0(), None).await.unwrap_err();
        assert!(matches!(err, ComplianceError::Unavailable(_)));
        assert!(matches!(
            engine.history(&driver(), None, t0()),
            Err(ComplianceError::Unavailable(_))
        ));
        assert!(matches!(
            engine.start(&driver(), t0()),
            Err(ComplianceError::Unavailable(_))
        ));
    }

    #[test]
    fn start_stop_round_trip() {
        let (_repo, engine) = engine();
        engine.start(&driver(), t0()).unwrap();
        assert!(matches!(
            engine.start(&driver(), t0() + ChronoDuration::seconds(1)),
            Err(ComplianceError::Conflict { .. })
        ));
        let s = engine.stop(&driver(), t0() + ChronoDuration::seconds(1)).unwrap();
        assert_eq!(s.total_driving_min, Some(1));
        assert!(matches!(
            engine.stop(&driver(), t0() + ChronoDuration::seconds(2)),
            Err(ComplianceError::NotFound(_))
        ));
    }

    #[test]
    fn metrics_follow_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(MetricsRecorder::new(&dir.path().join("m.db")).unwrap());
        let (_repo, engine) = engine();
        let engine = engine.with_metrics(Some(metrics.clone()));

        engine.start(&driver(), t0()).unwrap();
        let _ = engine.start(&driver(), t0());
        engine.stop(&driver(), t0() + ChronoDuration::minutes(280)).unwrap();

        assert_eq!(metrics.counter_get("compliance.sessions.started", &[]), 1);
        assert_eq!(metrics.counter_get("compliance.start.conflicts", &[]), 1);
        assert_eq!(metrics.counter_get("compliance.sessions.stopped", &[]), 1);
        assert_eq!(metrics.gauge_get("compliance.sessions.active", &[]), 0.0);
        assert_eq!(
            metrics.counter_get("compliance.violations", &[("rule", "continuous_driving_exceeded")]),
            1
        );
    }

    #[test]
    fn active_gauge_survives_restart() {
        let (repo, before) = engine();
        before.start(&driver(), t0()).unwrap();
        drop(before);

        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(MetricsRecorder::new(&dir.path().join("m.db")).unwrap());
        let after = ComplianceEngine::new(repo, Arc::new(NoopParkingLocator), EngineConfig::default())
            .with_metrics(Some(metrics.clone()));
        assert_eq!(metrics.gauge_get("compliance.sessions.active", &[]), 1.0);

        after.stop(&driver(), t0() + ChronoDuration::minutes(30)).unwrap();
        assert_eq!(metrics.gauge_get("compliance.sessions.active", &[]), 0.0);
    }

    #[test]
    fn gauge_seed_failure_leaves_engine_usable() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(MetricsRecorder::new(&dir.path().join("m.db")).unwrap());
        let engine = ComplianceEngine::new(
            Arc::new(BrokenStore),
            Arc::new(NoopParkingLocator),
            EngineConfig::default(),
        )
        .with_metrics(Some(metrics.clone()));
        assert_eq!(metrics.gauge_get("compliance.sessions.active", &[]), 0.0);
        assert!(matches!(engine.start(&driver(), t0()), Err(ComplianceError::Unavailable(_))));
    }

    #[test]
    fn history_groups_by_day_newest_first() {
        let (_repo, engine) = engine();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let drive = |start: DateTime<Utc>, minutes: i64| {
            engine.start(&driver(), start).unwrap();
            engine.stop(&driver(), start + ChronoDuration::minutes(minutes)).unwrap();
        };
        drive(Utc.with_ymd_and_hms(2026, 3, 9, 6, 0, 0).unwrap(), 120);
        drive(Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap(), 60);
        drive(Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).unwrap(), 200);
        drive(Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap(), 300); // outside 7 days
        engine.start(&driver(), Utc.with_ymd_and_hms(2026, 3, 10, 11, 0, 0).unwrap()).unwrap();

        let h = engine.history(&driver(), None, now).unwrap();
        assert_eq!(h.sessions.len(), 4);
        assert!(h.sessions.windows(2).all(|w| w[0].started_at >= w[1].started_at));
        assert!(h.sessions[0].is_active());

        let days: Vec<_> = h
            .daily_summary
            .iter()
            .map(|d| (d.date.to_string(), d.total_driving_min, d.session_count))
            .collect();
        assert_eq!(
            days,
            vec![
                ("2026-03-10".to_string(), 0, 1),
                ("2026-03-09".to_string(), 180, 2),
                ("2026-03-05".to_string(), 200, 1),
            ]
        );
    }

    #[test]
    fn history_window_is_inclusive() {
        let (_repo, engine) = engine();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let edge = now - ChronoDuration::days(7);
        engine.start(&driver(), edge).unwrap();
        engine.stop(&driver(), edge + ChronoDuration::minutes(30)).unwrap();

        assert_eq!(engine.history(&driver(), Some(7), now).unwrap().sessions.len(), 1);
        assert!(engine.history(&driver(), Some(6), now).unwrap().sessions.is_empty());
    }

    #[test]
    fn history_rejects_bad_windows() {
        let (_repo, engine) = engine();
        for days in [0, 91, 365] {
            assert!(matches!(
                engine.history(&driver(), Some(days), t0()),
                Err(ComplianceError::InvalidInput(_))
            ));
        }
        assert!(engine.history(&driver(), Some(90), t0()).is_ok());
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let config = EngineConfig {
            utc_offset_minutes: 100_000,
            ..Default::default()
        };
        assert_eq!(config.offset().local_minus_utc(), 0);
    }
}
