use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub span_id: Option<String>,
    pub session_id: Option<String>,
    pub driver_id: Option<String>,
}

/// Filters for searching persisted logs. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub driver_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ logs, keyed by driver and session.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 span_id TEXT,
                 session_id TEXT,
                 driver_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_driver ON logs(driver_id);
             CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        // A failed log write must not turn into another log event.
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, span_id, session_id, driver_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.span_id,
                record.session_id,
                record.driver_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, span_id, session_id, driver_id
             FROM logs WHERE 1=1",
        );
        let mut params: Vec<String> = Vec::new();

        let filters = [
            ("level = ", q.level.clone()),
            ("target LIKE ", q.target.as_ref().map(|t| format!("%{t}%"))),
            ("session_id = ", q.session_id.clone()),
            ("driver_id = ", q.driver_id.clone()),
            ("timestamp >= ", q.since.clone()),
        ];
        for (clause, value) in filters {
            if let Some(value) = value {
                params.push(value);
                sql.push_str(&format!(" AND {clause}?{}", params.len()));
            }
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                span_id: row.get(6)?,
                session_id: row.get(7)?,
                driver_id: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    span_id: Option<String>,
    session_id: Option<String>,
    driver_id: Option<String>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Splits event/span fields into the message, the correlation ids, and the rest.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    session_id: Option<String>,
    driver_id: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn capture(&mut self, field: &Field, value: Value) {
        let as_text = || match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match field.name() {
            "message" => self.message = Some(as_text()),
            "session_id" => self.session_id = Some(as_text()),
            "driver_id" => self.driver_id = Some(as_text()),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}").trim_matches('"').to_string();
        self.capture(field, Value::String(text));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.capture(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.capture(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.capture(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.capture(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.capture(field, Value::Bool(value));
    }
}

/// Carried on spans so child events inherit the driver and session they belong to.
struct SpanFields {
    session_id: Option<String>,
    driver_id: Option<String>,
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if visitor.session_id.is_none() && visitor.driver_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields {
                session_id: visitor.session_id,
                driver_id: visitor.driver_id,
            });
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut span_id = None;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                span_id.get_or_insert_with(|| format!("{:?}", span.id()));
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    if visitor.session_id.is_none() {
                        visitor.session_id.clone_from(&fields.session_id);
                    }
                    if visitor.driver_id.is_none() {
                        visitor.driver_id.clone_from(&fields.driver_id);
                    }
                }
            }
        }

        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::to_string(&visitor.fields).unwrap_or_default());

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            span_id,
            session_id: visitor.session_id,
            driver_id: visitor.driver_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (tempfile::TempDir, SqliteLogSink) {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("logs.db")).unwrap();
        (dir, sink)
    }

    fn warn(timestamp: &str, target: &str, message: &str, driver: Option<&str>, session: Option<&str>) -> LogInsert {
        LogInsert {
            timestamp: timestamp.into(),
            level: "WARN".into(),
            target: target.into(),
            message: message.into(),
            fields: None,
            span_id: None,
            session_id: session.map(Into::into),
            driver_id: driver.map(Into::into),
        }
    }

    #[test]
    fn insert_and_count() {
        let (_dir, sink) = sink();
        sink.insert(&warn("2026-03-02T08:00:00Z", "tacho_engine::advisory", "parking lookup failed", Some("driver-1"), None));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn query_by_level() {
        let (_dir, sink) = sink();
        sink.insert(&warn("2026-03-02T08:00:00Z", "test", "warning msg", None, None));
        let mut error = warn("2026-03-02T08:00:01Z", "test", "error msg", None, None);
        error.level = "ERROR".into();
        sink.insert(&error);

        let results = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "error msg");
    }

    #[test]
    fn query_by_driver_and_session() {
        let (_dir, sink) = sink();
        sink.insert(&warn("2026-03-02T08:00:00Z", "test", "driver A", Some("driver-a"), Some("drv_1")));
        sink.insert(&warn("2026-03-02T08:00:01Z", "test", "driver B", Some("driver-b"), Some("drv_2")));

        let by_driver = sink
            .query(&LogQuery {
                driver_id: Some("driver-a".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_driver.len(), 1);
        assert_eq!(by_driver[0].message, "driver A");

        let by_session = sink
            .query(&LogQuery {
                session_id: Some("drv_2".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_session.len(), 1);
        assert_eq!(by_session[0].driver_id.as_deref(), Some("driver-b"));
    }

    #[test]
    fn query_by_target_substring() {
        let (_dir, sink) = sink();
        sink.insert(&warn("2026-03-02T08:00:00Z", "tacho_engine::advisory", "lookup failed", None, None));
        sink.insert(&warn("2026-03-02T08:00:01Z", "tacho_store::sessions", "db slow", None, None));

        let results = sink
            .query(&LogQuery {
                target: Some("advisory".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "lookup failed");
    }

    #[test]
    fn query_limit_and_since() {
        let (_dir, sink) = sink();
        for i in 0..10 {
            sink.insert(&warn(&format!("2026-03-02T08:00:{i:02}Z"), "test", &format!("msg {i}"), None, None));
        }

        let limited = sink
            .query(&LogQuery {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 3);
        // Most recent first (ORDER BY id DESC)
        assert_eq!(limited[0].message, "msg 9");

        let recent = sink
            .query(&LogQuery {
                since: Some("2026-03-02T08:00:08Z".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn layer_persists_warn_with_span_driver() {
        use tracing_subscriber::layer::SubscriberExt;

        let (_dir, sink) = sink();
        let sink = Arc::new(sink);
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("status", driver_id = "driver-9");
            let _enter = span.enter();
            tracing::info!("not persisted");
            tracing::warn!(session_id = "drv_9", "parking lookup failed");
        });

        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "parking lookup failed");
        assert_eq!(records[0].driver_id.as_deref(), Some("driver-9"));
        assert_eq!(records[0].session_id.as_deref(), Some("drv_9"));
    }
}
