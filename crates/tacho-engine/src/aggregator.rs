//! Rolling window aggregation: continuous, daily, weekly and biweekly driving
//! totals from persisted sessions plus the live one.
//!
//! Days and ISO weeks are calendar windows in the driver's fixed UTC offset.
//! A session belongs wholly to the window containing its `started_at`.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use tracing::instrument;

use tacho_core::ids::DriverId;
use tacho_core::session::DrivingSession;
use tacho_store::{SessionStore, StoreError};

/// Half-open `[start, end)` interval in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Calendar arithmetic in one fixed offset.
#[derive(Clone, Copy, Debug)]
pub struct LocalCalendar {
    offset: FixedOffset,
}

impl LocalCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        (local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }

    /// Local midnight to midnight containing `ts`.
    pub fn day(&self, ts: DateTime<Utc>) -> Window {
        let start = self.midnight(self.local_date(ts));
        Window {
            start,
            end: start + Duration::days(1),
        }
    }

    /// ISO week (Monday 00:00 to the next Monday 00:00) containing `ts`.
    pub fn iso_week(&self, ts: DateTime<Utc>) -> Window {
        let date = self.local_date(ts);
        let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        let start = self.midnight(monday);
        Window {
            start,
            end: start + Duration::weeks(1),
        }
    }

    /// The ISO week containing `ts` together with the one before it.
    pub fn two_weeks(&self, ts: DateTime<Utc>) -> Window {
        let week = self.iso_week(ts);
        Window {
            start: week.start - Duration::weeks(1),
            end: week.end,
        }
    }
}

/// The four driving totals a snapshot is built from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrivingTotals {
    pub continuous_min: i64,
    pub daily_min: i64,
    pub weekly_min: i64,
    pub biweekly_min: i64,
}

#[derive(Clone)]
pub struct RollingWindowAggregator {
    store: Arc<dyn SessionStore>,
    calendar: LocalCalendar,
}

impl RollingWindowAggregator {
    pub fn new(store: Arc<dyn SessionStore>, calendar: LocalCalendar) -> Self {
        Self { store, calendar }
    }

    pub fn calendar(&self) -> LocalCalendar {
        self.calendar
    }

    /// Totals at `now`. `active` is the driver's open session, if any; its live
    /// minutes count toward a window only when it started inside that window.
    #[instrument(skip(self, active), fields(driver_id = %driver_id))]
    pub fn totals(
        &self,
        driver_id: &DriverId,
        active: Option<&DrivingSession>,
        now: DateTime<Utc>,
    ) -> Result<DrivingTotals, StoreError> {
        let continuous_min = active.map_or(0, |s| s.elapsed_minutes(now));
        let with_live = |window: Window| -> Result<i64, StoreError> {
            let closed = self.store.sum_driving_minutes(driver_id, window.start, window.end)?;
            let live = active
                .filter(|s| window.contains(s.started_at))
                .map_or(0, |_| continuous_min);
            Ok(closed + live)
        };

        Ok(DrivingTotals {
            continuous_min,
            daily_min: with_live(self.calendar.day(now))?,
            weekly_min: with_live(self.calendar.iso_week(now))?,
            biweekly_min: with_live(self.calendar.two_weeks(now))?,
        })
    }

    /// Daily and weekly totals used to classify `session` as it closes with
    /// `total_driving_min`. Windows are those of its `started_at`.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub fn closing_totals(
        &self,
        session: &DrivingSession,
        total_driving_min: i64,
    ) -> Result<(i64, i64), StoreError> {
        let day = self.calendar.day(session.started_at);
        let week = self.calendar.iso_week(session.started_at);
        let daily = self.store.sum_driving_minutes(&session.driver_id, day.start, day.end)?;
        let weekly = self.store.sum_driving_minutes(&session.driver_id, week.start, week.end)?;
        Ok((daily + total_driving_min, weekly + total_driving_min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tacho_store::{Database, DrivingSessionRepo};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn cal(offset_min: i32) -> LocalCalendar {
        LocalCalendar::new(FixedOffset::east_opt(offset_min * 60).unwrap())
    }

    fn setup(offset_min: i32) -> (Arc<DrivingSessionRepo>, RollingWindowAggregator, DriverId) {
        let repo = Arc::new(DrivingSessionRepo::new(Database::in_memory().unwrap()));
        let agg = RollingWindowAggregator::new(repo.clone(), cal(offset_min));
        (repo, agg, DriverId::from_raw("driver-1"))
    }

    fn closed(repo: &DrivingSessionRepo, driver: &DriverId, start: DateTime<Utc>, minutes: i64) {
        let s = repo.insert_session(driver, start).unwrap();
        repo.close_session(&s.id, start + Duration::minutes(minutes), minutes, &[])
            .unwrap();
    }

    #[test]
    fn day_window_in_utc() {
        let w = cal(0).day(utc(2026, 3, 4, 15, 30));
        assert_eq!(w.start, utc(2026, 3, 4, 0, 0));
        assert_eq!(w.end, utc(2026, 3, 5, 0, 0));
    }

    #[test]
    fn day_window_follows_offset() {
        // 23:30 UTC on the 4th is already the 5th at UTC+2.
        let w = cal(120).day(utc(2026, 3, 4, 23, 30));
        assert_eq!(w.start, utc(2026, 3, 4, 22, 0));
        assert_eq!(w.end, utc(2026, 3, 5, 22, 0));

        let w = cal(-300).day(utc(2026, 3, 4, 3, 0));
        assert_eq!(w.start, utc(2026, 3, 3, 5, 0));
    }

    #[test]
    fn iso_week_starts_monday() {
        // 2026-03-04 is a Wednesday.
        let w = cal(0).iso_week(utc(2026, 3, 4, 12, 0));
        assert_eq!(w.start, utc(2026, 3, 2, 0, 0));
        assert_eq!(w.end, utc(2026, 3, 9, 0, 0));

        // Sunday evening stays in the same week; Monday midnight starts the next.
        assert_eq!(cal(0).iso_week(utc(2026, 3, 8, 23, 59)).start, utc(2026, 3, 2, 0, 0));
        assert_eq!(cal(0).iso_week(utc(2026, 3, 9, 0, 0)).start, utc(2026, 3, 9, 0, 0));
    }

    #[test]
    fn two_weeks_covers_previous_week() {
        let w = cal(0).two_weeks(utc(2026, 3, 4, 12, 0));
        assert_eq!(w.start, utc(2026, 2, 23, 0, 0));
        assert_eq!(w.end, utc(2026, 3, 9, 0, 0));
    }

    #[test]
    fn no_history_is_all_zero() {
        let (_repo, agg, driver) = setup(0);
        let totals = agg.totals(&driver, None, utc(2026, 3, 4, 12, 0)).unwrap();
        assert_eq!(totals, DrivingTotals::default());
    }

    #[test]
    fn closed_sessions_land_in_their_windows() {
        let (repo, agg, driver) = setup(0);
        closed(&repo, &driver, utc(2026, 3, 4, 6, 0), 120); // today
        closed(&repo, &driver, utc(2026, 3, 3, 6, 0), 200); // this week
        closed(&repo, &driver, utc(2026, 2, 25, 6, 0), 300); // last week
        closed(&repo, &driver, utc(2026, 2, 16, 6, 0), 400); // outside both

        let totals = agg.totals(&driver, None, utc(2026, 3, 4, 12, 0)).unwrap();
        assert_eq!(totals.continuous_min, 0);
        assert_eq!(totals.daily_min, 120);
        assert_eq!(totals.weekly_min, 320);
        assert_eq!(totals.biweekly_min, 620);
    }

    #[test]
    fn active_session_adds_live_minutes() {
        let (repo, agg, driver) = setup(0);
        closed(&repo, &driver, utc(2026, 3, 4, 6, 0), 60);
        let active = repo.insert_session(&driver, utc(2026, 3, 4, 10, 0)).unwrap();

        let now = utc(2026, 3, 4, 11, 30) + Duration::seconds(1);
        let totals = agg.totals(&driver, Some(&active), now).unwrap();
        assert_eq!(totals.continuous_min, 91);
        assert_eq!(totals.daily_min, 151);
        assert_eq!(totals.weekly_min, 151);
        assert_eq!(totals.biweekly_min, 151);
    }

    #[test]
    fn session_across_midnight_stays_with_start_day() {
        let (repo, agg, driver) = setup(0);
        let active = repo.insert_session(&driver, utc(2026, 3, 4, 23, 0)).unwrap();

        let totals = agg.totals(&driver, Some(&active), utc(2026, 3, 5, 1, 0)).unwrap();
        assert_eq!(totals.continuous_min, 120);
        assert_eq!(totals.daily_min, 0);
        assert_eq!(totals.weekly_min, 120);
    }

    #[test]
    fn session_across_week_boundary_stays_with_start_week() {
        let (repo, agg, driver) = setup(0);
        // Sunday 22:00 into Monday.
        let active = repo.insert_session(&driver, utc(2026, 3, 8, 22, 0)).unwrap();

        let totals = agg.totals(&driver, Some(&active), utc(2026, 3, 9, 1, 0)).unwrap();
        assert_eq!(totals.continuous_min, 180);
        assert_eq!(totals.daily_min, 0);
        assert_eq!(totals.weekly_min, 0);
        assert_eq!(totals.biweekly_min, 180);
    }

    #[test]
    fn local_offset_moves_day_boundary() {
        let (repo, agg, driver) = setup(120);
        // 21:30 UTC is 23:30 local on the 4th; 22:30 UTC is already the 5th locally.
        closed(&repo, &driver, utc(2026, 3, 4, 21, 30), 30);
        closed(&repo, &driver, utc(2026, 3, 4, 22, 30), 45);

        let totals = agg.totals(&driver, None, utc(2026, 3, 5, 6, 0)).unwrap();
        assert_eq!(totals.daily_min, 45);
    }

    #[test]
    fn closing_totals_include_own_minutes() {
        let (repo, agg, driver) = setup(0);
        closed(&repo, &driver, utc(2026, 3, 4, 2, 0), 200);
        closed(&repo, &driver, utc(2026, 3, 2, 8, 0), 500);
        let active = repo.insert_session(&driver, utc(2026, 3, 4, 8, 0)).unwrap();

        let (daily, weekly) = agg.closing_totals(&active, 300).unwrap();
        assert_eq!(daily, 500);
        assert_eq!(weekly, 1000);
    }

    #[test]
    fn other_drivers_are_ignored() {
        let (repo, agg, driver) = setup(0);
        closed(&repo, &DriverId::from_raw("driver-2"), utc(2026, 3, 4, 6, 0), 300);
        let totals = agg.totals(&driver, None, utc(2026, 3, 4, 12, 0)).unwrap();
        assert_eq!(totals.daily_min, 0);
    }
}
