/// SQL DDL for the tacho-store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS driving_sessions (
    id TEXT PRIMARY KEY,
    driver_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    total_driving_min INTEGER,
    total_break_min INTEGER,
    distance_km REAL,
    is_compliant INTEGER,
    violations TEXT,
    created_at TEXT NOT NULL,
    CHECK (ended_at IS NULL OR ended_at > started_at)
);

-- At most one open session per driver.
CREATE UNIQUE INDEX IF NOT EXISTS idx_driving_sessions_one_active
    ON driving_sessions(driver_id) WHERE ended_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_driving_sessions_driver_started
    ON driving_sessions(driver_id, started_at);

CREATE TABLE IF NOT EXISTS truck_parks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT,
    country TEXT NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    total_spaces INTEGER,
    has_security INTEGER NOT NULL DEFAULT 0,
    has_showers INTEGER NOT NULL DEFAULT 0,
    price_per_night_eur REAL,
    is_free INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (name, country)
);

CREATE INDEX IF NOT EXISTS idx_truck_parks_lat ON truck_parks(lat);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
