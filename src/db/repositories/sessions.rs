use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_record_status, to_i64, to_u64},
    models::{RecordStatus, SessionRecord},
};

const SESSION_COLUMNS: &str = "id, user_id, remote_id, started_at, stopped_at, status, duration_seconds, \
     focused_seconds, sample_count, average_score, created_at, updated_at";

fn row_to_record(row: &Row) -> Result<SessionRecord> {
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;
    let duration_seconds: i64 = row.get("duration_seconds")?;
    let focused_seconds: i64 = row.get("focused_seconds")?;
    let sample_count: i64 = row.get("sample_count")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        remote_id: row.get("remote_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_record_status(&status)?,
        duration_seconds: to_u64(duration_seconds, "duration_seconds")?,
        focused_seconds: to_u64(focused_seconds, "focused_seconds")?,
        sample_count: to_u64(sample_count, "sample_count")?,
        average_score: row.get("average_score")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO focus_sessions (id, user_id, remote_id, started_at, stopped_at, status, duration_seconds,
                     focused_seconds, sample_count, average_score, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id,
                    record.user_id,
                    record.remote_id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.duration_seconds)?,
                    to_i64(record.focused_seconds)?,
                    to_i64(record.sample_count)?,
                    record.average_score,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_session_progress(
        &self,
        session_id: &str,
        focused_seconds: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE focus_sessions
                 SET focused_seconds = ?1,
                     updated_at = ?2
                 WHERE id = ?3 AND status = 'Running'",
                params![to_i64(focused_seconds)?, updated_at.to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_session_remote_id(&self, session_id: &str, remote_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let remote_id = remote_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE focus_sessions
                 SET remote_id = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![remote_id, Utc::now().to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn complete_session(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
        focused_seconds: u64,
        sample_count: u64,
        average_score: Option<f64>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE focus_sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     focused_seconds = ?3,
                     sample_count = ?4,
                     average_score = ?5,
                     updated_at = ?2
                 WHERE id = ?6",
                params![
                    RecordStatus::Completed.as_str(),
                    stopped_at.to_rfc3339(),
                    to_i64(focused_seconds)?,
                    to_i64(sample_count)?,
                    average_score,
                    session_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("session {session_id} not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM focus_sessions WHERE id = ?1");
            let record = conn
                .query_row(&sql, params![session_id], |row| Ok(row_to_record(row)))
                .optional()?
                .transpose()?;
            Ok(record)
        })
        .await
    }

    /// Finished sessions (completed or interrupted), newest first.
    pub async fn list_sessions(&self, limit: usize, offset: usize) -> Result<Vec<SessionRecord>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS}
                 FROM focus_sessions
                 WHERE status IN ('Completed', 'Interrupted')
                 ORDER BY started_at DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![limit, offset])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    /// Marks sessions that were still running when the process last exited.
    pub async fn mark_incomplete_sessions_interrupted(
        &self,
        stopped_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE focus_sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?2
                 WHERE status = ?3",
                params![
                    RecordStatus::Interrupted.as_str(),
                    stopped_at.to_rfc3339(),
                    RecordStatus::Running.as_str(),
                ],
            )?;
            Ok(updated)
        })
        .await
    }
}
