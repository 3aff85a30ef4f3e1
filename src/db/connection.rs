use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "focusfy-db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Opens the file, applies connection pragmas and brings the schema up to date.
fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database at {}", path.display()))?;
    configure_connection(&conn)?;
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    // In-memory and some network filesystems refuse WAL; the default journal still works.
    let journal: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context("failed to set journal mode")?;
    if !journal.eq_ignore_ascii_case("wal") {
        warn!("SQLite kept journal mode {journal}; WAL unavailable");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;
    Ok(())
}

/// Owns the worker thread. Dropping the last handle closes the job queue, which
/// ends the thread's receive loop, and then joins it.
struct Worker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or_else(|| anyhow!("database worker already shut down"))?
            .send(job)
            .map_err(|_| anyhow!("database worker is not accepting work"))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Database worker panicked before shutdown");
            }
        }
    }
}

/// Handle to the single SQLite connection owned by a dedicated worker thread.
///
/// Every query is shipped to that thread as a closure; callers await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_path = db_path.clone();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => {
                        let _ = opened_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };

                for job in jobs_rx {
                    job(&mut conn);
                }
                info!("Database worker for {} stopped", thread_path.display());
            })
            .context("failed to spawn database worker thread")?;

        let opened = opened_rx
            .recv()
            .context("database worker exited before opening the connection")?;
        if let Err(err) = opened {
            let _ = thread.join();
            return Err(err);
        }

        info!("Database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Some(jobs_tx),
                thread: Some(thread),
            }),
        })
    }

    /// Runs `task` on the worker thread and hands back its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(task(conn));
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[tokio::test]
    async fn connection_is_configured_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("nested").join("focusfy.sqlite3")).unwrap();

        let (foreign_keys, journal, version) = db
            .execute(|conn| {
                let foreign_keys: i64 =
                    conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
                let journal: String =
                    conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
                let version: i32 =
                    conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
                Ok((foreign_keys, journal, version))
            })
            .await
            .unwrap();

        assert_eq!(foreign_keys, 1);
        assert_eq!(journal.to_lowercase(), "wal");
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn task_errors_reach_the_caller_and_the_worker_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("focusfy.sqlite3")).unwrap();

        let failed = db.execute(|_| -> Result<()> { bail!("boom") }).await;
        assert_eq!(failed.unwrap_err().to_string(), "boom");

        let count: i64 = db
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM focus_sessions", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unopenable_path_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        assert!(Database::new(blocker.join("focusfy.sqlite3")).is_err());
    }
}
