use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use tacho_core::ids::{DriverId, DrivingSessionId};
use tacho_core::session::{DrivingSession, Violation};

use crate::database::Database;
use crate::error::{is_constraint_violation, StoreError};
use crate::row_helpers::{self, format_ts};

const SESSION_COLUMNS: &str = "id, driver_id, started_at, ended_at, total_driving_min, total_break_min,
     distance_km, is_compliant, violations";

/// Persistence contract the compliance engine relies on.
///
/// The single-active-session guarantee lives here, not in the engine:
/// `insert_session` must fail with `Conflict` when the driver already has an
/// open session, atomically with respect to concurrent inserts.
pub trait SessionStore: Send + Sync {
    fn find_active_session(&self, driver_id: &DriverId) -> Result<Option<DrivingSession>, StoreError>;

    fn insert_session(
        &self,
        driver_id: &DriverId,
        started_at: DateTime<Utc>,
    ) -> Result<DrivingSession, StoreError>;

    /// Close a still-open session. `NotFound` if it is missing or already closed.
    fn close_session(
        &self,
        id: &DrivingSessionId,
        ended_at: DateTime<Utc>,
        total_driving_min: i64,
        violations: &[Violation],
    ) -> Result<DrivingSession, StoreError>;

    /// Sum of `total_driving_min` over sessions with `from <= started_at < to`.
    /// Open sessions have no total yet and contribute nothing.
    fn sum_driving_minutes(
        &self,
        driver_id: &DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Sessions with `started_at >= since`, newest first.
    fn sessions_since(
        &self,
        driver_id: &DriverId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DrivingSession>, StoreError>;

    /// Open sessions across all drivers.
    fn count_open_sessions(&self) -> Result<i64, StoreError>;
}

pub struct DrivingSessionRepo {
    db: Database,
}

impl DrivingSessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a session by ID.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &DrivingSessionId) -> Result<DrivingSession, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM driving_sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("driving session {id}"))),
            }
        })
    }

    /// Count open sessions for a driver. Exposed for invariant checks.
    pub fn count_active(&self, driver_id: &DriverId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM driving_sessions WHERE driver_id = ?1 AND ended_at IS NULL",
                [driver_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

impl SessionStore for DrivingSessionRepo {
    #[instrument(skip(self), fields(driver_id = %driver_id))]
    fn find_active_session(&self, driver_id: &DriverId) -> Result<Option<DrivingSession>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM driving_sessions
                 WHERE driver_id = ?1 AND ended_at IS NULL
                 ORDER BY started_at DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([driver_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row).map(Some),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(driver_id = %driver_id))]
    fn insert_session(
        &self,
        driver_id: &DriverId,
        started_at: DateTime<Utc>,
    ) -> Result<DrivingSession, StoreError> {
        let id = DrivingSessionId::new();
        let now = format_ts(Utc::now());

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO driving_sessions (id, driver_id, started_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), driver_id.as_str(), format_ts(started_at), now],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    debug!("active session already exists");
                    return Err(StoreError::Conflict(format!(
                        "driver {driver_id} already has an active driving session"
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            Ok(DrivingSession {
                id,
                driver_id: driver_id.clone(),
                started_at,
                ended_at: None,
                total_driving_min: None,
                total_break_min: None,
                distance_km: None,
                is_compliant: None,
                violations: Vec::new(),
            })
        })
    }

    #[instrument(skip(self, violations), fields(session_id = %id))]
    fn close_session(
        &self,
        id: &DrivingSessionId,
        ended_at: DateTime<Utc>,
        total_driving_min: i64,
        violations: &[Violation],
    ) -> Result<DrivingSession, StoreError> {
        let violations_json = serde_json::to_string(violations)?;

        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE driving_sessions
                 SET ended_at = ?1, total_driving_min = ?2, is_compliant = ?3, violations = ?4
                 WHERE id = ?5 AND ended_at IS NULL",
                rusqlite::params![
                    format_ts(ended_at),
                    total_driving_min,
                    violations.is_empty(),
                    violations_json,
                    id.as_str(),
                ],
            )?)
        })?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("active driving session {id}")));
        }
        self.get(id)
    }

    #[instrument(skip(self), fields(driver_id = %driver_id))]
    fn sum_driving_minutes(
        &self,
        driver_id: &DriverId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(total_driving_min), 0) FROM driving_sessions
                 WHERE driver_id = ?1 AND started_at >= ?2 AND started_at < ?3",
                rusqlite::params![driver_id.as_str(), format_ts(from), format_ts(to)],
                |row| row.get(0),
            )?)
        })
    }

    #[instrument(skip(self), fields(driver_id = %driver_id))]
    fn sessions_since(
        &self,
        driver_id: &DriverId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DrivingSession>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM driving_sessions
                 WHERE driver_id = ?1 AND started_at >= ?2
                 ORDER BY started_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![driver_id.as_str(), format_ts(since)])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }

    fn count_open_sessions(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM driving_sessions WHERE ended_at IS NULL",
                [],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<DrivingSession, StoreError> {
    let started_at: String = row_helpers::get(row, 2, "driving_sessions", "started_at")?;
    let ended_at: Option<String> = row_helpers::get_opt(row, 3, "driving_sessions", "ended_at")?;
    let violations: Option<String> = row_helpers::get_opt(row, 8, "driving_sessions", "violations")?;

    Ok(DrivingSession {
        id: DrivingSessionId::from_raw(row_helpers::get::<String>(row, 0, "driving_sessions", "id")?),
        driver_id: DriverId::from_raw(row_helpers::get::<String>(row, 1, "driving_sessions", "driver_id")?),
        started_at: row_helpers::parse_ts(&started_at, "driving_sessions", "started_at")?,
        ended_at: ended_at
            .map(|raw| row_helpers::parse_ts(&raw, "driving_sessions", "ended_at"))
            .transpose()?,
        total_driving_min: row_helpers::get_opt(row, 4, "driving_sessions", "total_driving_min")?,
        total_break_min: row_helpers::get_opt(row, 5, "driving_sessions", "total_break_min")?,
        distance_km: row_helpers::get_opt(row, 6, "driving_sessions", "distance_km")?,
        is_compliant: row_helpers::get_opt(row, 7, "driving_sessions", "is_compliant")?,
        violations: match violations {
            Some(raw) => row_helpers::parse_json(&raw, "driving_sessions", "violations")?,
            None => Vec::new(),
        },
    })
}
