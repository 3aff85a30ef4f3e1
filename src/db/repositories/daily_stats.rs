use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{parse_day, to_i64, to_u64},
    models::{DailyStats, SessionCredit},
};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Stored form of the stats row; `today_focus_seconds` belongs to `day`.
struct StatsRow {
    day: NaiveDate,
    today_focus_seconds: u64,
    total_sessions: u64,
    weekly_goal_hours: f64,
    average_focus: f64,
    scored_sessions: u64,
}

impl StatsRow {
    fn empty(day: NaiveDate, weekly_goal_hours: f64) -> Self {
        Self {
            day,
            today_focus_seconds: 0,
            total_sessions: 0,
            weekly_goal_hours,
            average_focus: 0.0,
            scored_sessions: 0,
        }
    }

    /// Today's focus only counts when the row was last written on `day`.
    fn to_stats(&self, day: NaiveDate) -> DailyStats {
        let today_seconds = if self.day == day {
            self.today_focus_seconds
        } else {
            0
        };
        DailyStats {
            today_focus_hours: today_seconds as f64 / SECONDS_PER_HOUR,
            total_sessions: u32::try_from(self.total_sessions).unwrap_or(u32::MAX),
            weekly_goal_hours: self.weekly_goal_hours,
            average_focus: self.average_focus,
        }
    }

    fn apply(&mut self, credit: &SessionCredit) {
        if self.day != credit.day {
            self.day = credit.day;
            self.today_focus_seconds = 0;
        }
        self.today_focus_seconds = self.today_focus_seconds.saturating_add(credit.focused_seconds);
        self.total_sessions = self.total_sessions.saturating_add(1);

        if let Some(mean) = credit.mean_score {
            let scored = self.scored_sessions as f64;
            self.average_focus = (self.average_focus * scored + mean) / (scored + 1.0);
            self.scored_sessions += 1;
        }
    }
}

fn load_row(conn: &Connection, user_id: &str) -> Result<Option<StatsRow>> {
    let raw = conn
        .query_row(
            "SELECT day, today_focus_seconds, total_sessions, weekly_goal_hours, average_focus, scored_sessions
             FROM daily_stats
             WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((day, today, total, goal, average, scored)) = raw else {
        return Ok(None);
    };

    Ok(Some(StatsRow {
        day: parse_day(&day)?,
        today_focus_seconds: to_u64(today, "today_focus_seconds")?,
        total_sessions: to_u64(total, "total_sessions")?,
        weekly_goal_hours: goal,
        average_focus: average,
        scored_sessions: to_u64(scored, "scored_sessions")?,
    }))
}

fn store_row(conn: &Connection, user_id: &str, row: &StatsRow) -> Result<()> {
    conn.execute(
        "INSERT INTO daily_stats (user_id, day, today_focus_seconds, total_sessions, weekly_goal_hours,
             average_focus, scored_sessions, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id) DO UPDATE SET
             day = excluded.day,
             today_focus_seconds = excluded.today_focus_seconds,
             total_sessions = excluded.total_sessions,
             weekly_goal_hours = excluded.weekly_goal_hours,
             average_focus = excluded.average_focus,
             scored_sessions = excluded.scored_sessions,
             updated_at = excluded.updated_at",
        params![
            user_id,
            row.day.format("%Y-%m-%d").to_string(),
            to_i64(row.today_focus_seconds)?,
            to_i64(row.total_sessions)?,
            row.weekly_goal_hours,
            row.average_focus,
            to_i64(row.scored_sessions)?,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl Database {
    /// Stats for `user_id` as seen on `day`; a user with no sessions gets defaults.
    pub async fn get_daily_stats(
        &self,
        user_id: &str,
        day: NaiveDate,
        default_goal_hours: f64,
    ) -> Result<DailyStats> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let row = load_row(conn, &user_id)?
                .unwrap_or_else(|| StatsRow::empty(day, default_goal_hours));
            Ok(row.to_stats(day))
        })
        .await
    }

    /// Folds one finished session into the user's stats. Additive only.
    pub async fn record_session_stats(
        &self,
        user_id: &str,
        credit: &SessionCredit,
        default_goal_hours: f64,
    ) -> Result<DailyStats> {
        let user_id = user_id.to_string();
        let credit = credit.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut row = load_row(&tx, &user_id)?
                .unwrap_or_else(|| StatsRow::empty(credit.day, default_goal_hours));
            row.apply(&credit);
            store_row(&tx, &user_id, &row)?;
            tx.commit()?;
            Ok(row.to_stats(credit.day))
        })
        .await
    }

    pub async fn set_weekly_goal(&self, user_id: &str, hours: f64, day: NaiveDate) -> Result<()> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut row = load_row(conn, &user_id)?.unwrap_or_else(|| StatsRow::empty(day, hours));
            row.weekly_goal_hours = hours;
            store_row(conn, &user_id, &row)
        })
        .await
    }
}
