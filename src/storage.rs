use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::events::{EventKind, EventSink, WatchEvent};
use crate::matcher::Identity;

/// Event sink that keeps everything in memory. Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<WatchEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<WatchEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<WatchEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&mut self, event: &WatchEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("in-memory event log poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Event sink writing to the `activity_logs` table of a local SQLite file.
pub struct SqliteEventSink {
    conn: Connection,
}

impl SqliteEventSink {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS activity_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              kind TEXT NOT NULL,
              status TEXT NOT NULL CHECK (status IN ('known', 'unknown')),
              name TEXT,
              camera_id TEXT NOT NULL,
              confidence_score REAL,
              video_path TEXT,
              video_duration REAL,
              file_size INTEGER,
              capture_type TEXT NOT NULL DEFAULT 'auto',
              notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_activity_logs_timestamp ON activity_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_activity_logs_status ON activity_logs(status);
            "#,
        )?;
        Ok(())
    }

    /// Most recent events first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<WatchEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, kind, status, name, camera_id, confidence_score,
                   video_path, video_duration, file_size, notes
            FROM activity_logs ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let timestamp: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let status: String = row.get(2)?;
            let name: Option<String> = row.get(3)?;
            let file_size: Option<i64> = row.get(8)?;
            let identity = match (status.as_str(), name) {
                ("known", Some(name)) => Identity::Known(name),
                _ => Identity::Unknown,
            };
            out.push(WatchEvent {
                kind: EventKind::parse(&kind)
                    .ok_or_else(|| anyhow!("corrupt activity log: unknown kind '{}'", kind))?,
                identity: Some(identity),
                confidence: row.get::<_, Option<f64>>(5)?.map(|c| c as f32),
                video_path: row.get::<_, Option<String>>(6)?.map(PathBuf::from),
                duration_seconds: row.get(7)?,
                file_size_bytes: file_size.map(|size| size.max(0) as u64),
                detail: row.get(9)?,
                camera_id: row.get(4)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| anyhow!("corrupt activity log timestamp: {}", e))?
                    .with_timezone(&Utc),
            });
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM activity_logs", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl EventSink for SqliteEventSink {
    fn record(&mut self, event: &WatchEvent) -> Result<()> {
        let identity = event.identity.clone().unwrap_or(Identity::Unknown);
        let status = if identity.is_unknown() { "unknown" } else { "known" };
        let file_size = event
            .file_size_bytes
            .map(i64::try_from)
            .transpose()
            .map_err(|_| anyhow!("file size exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO activity_logs(
              timestamp, kind, status, name, camera_id, confidence_score,
              video_path, video_duration, file_size, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                event.timestamp.to_rfc3339(),
                event.kind.as_str(),
                status,
                identity.name(),
                event.camera_id,
                event.confidence.map(f64::from),
                event
                    .video_path
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned()),
                event.duration_seconds,
                file_size,
                event.detail,
            ],
        )?;
        Ok(())
    }
}

fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sqlite_sink_round_trips_events() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        let mut sink = SqliteEventSink::open(db.to_str().unwrap()).unwrap();

        sink.record(&WatchEvent::sighting("porch", Identity::known("alice"), Some(91.0)))
            .unwrap();
        sink.record(&WatchEvent::recording_finished(
            "porch",
            PathBuf::from("unknown/videos/unknown_1.mjpeg"),
            Duration::from_secs(6),
            2048,
        ))
        .unwrap();
        sink.record(&WatchEvent::recording_failed(
            "porch",
            None,
            "writer open failed".to_string(),
        ))
        .unwrap();

        assert_eq!(sink.count().unwrap(), 3);
        let recent = sink.recent_events(10).unwrap();
        assert_eq!(recent[0].kind, EventKind::RecordingFailed);
        assert_eq!(recent[0].detail.as_deref(), Some("writer open failed"));
        assert_eq!(recent[1].file_size_bytes, Some(2048));
        assert_eq!(recent[1].duration_seconds, Some(6.0));
        assert_eq!(recent[2].identity, Some(Identity::known("alice")));
        assert_eq!(recent[2].confidence, Some(91.0));
    }

    #[test]
    fn sqlite_sink_limit_applies() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("events.db");
        let mut sink = SqliteEventSink::open(db.to_str().unwrap()).unwrap();
        for _ in 0..5 {
            sink.record(&WatchEvent::sighting("porch", Identity::Unknown, None))
                .unwrap();
        }
        assert_eq!(sink.recent_events(2).unwrap().len(), 2);
    }

    #[test]
    fn in_memory_sink_filters_by_kind() {
        let mut sink = InMemoryEventSink::new();
        sink.record(&WatchEvent::sighting("porch", Identity::Unknown, None))
            .unwrap();
        sink.record(&WatchEvent::recording_failed("porch", None, "x".into()))
            .unwrap();
        assert_eq!(sink.events_of(EventKind::Sighting).len(), 1);
        assert_eq!(sink.clone().events().len(), 2);
    }
}
