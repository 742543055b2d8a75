use std::{
    convert::TryFrom,
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use crate::models::CompletedSession;
use crate::timer::AppKind;
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("value {value} is negative"))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn app_from_str(value: &str) -> Result<AppKind> {
    AppKind::ALL
        .into_iter()
        .find(|app| app.settings_key() == value)
        .ok_or_else(|| anyhow!("unknown app '{value}'"))
}

enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite handle. All statements run on one dedicated thread; callers await
/// the result through a oneshot channel.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        Self::spawn(Location::File(db_path))
    }

    /// Private database that disappears with the handle.
    pub fn in_memory() -> Result<Self> {
        Self::spawn(Location::Memory)
    }

    fn spawn(location: Location) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let db_path = match &location {
            Location::File(path) => Some(path.clone()),
            Location::Memory => None,
        };

        let worker = thread::Builder::new()
            .name("cadence-db".into())
            .spawn(move || {
                let opened = match &location {
                    Location::File(path) => Connection::open(path),
                    Location::Memory => Connection::open_in_memory(),
                };
                let mut conn = match opened {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Location::File(_) = location {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        match &db_path {
            Some(path) => info!("Database initialized at {}", path.display()),
            None => info!("In-memory database initialized"),
        }

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    pub async fn put_snapshot(
        &self,
        namespace: &str,
        payload: String,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let namespace = namespace.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO snapshots (namespace, payload, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace) DO UPDATE SET
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![namespace, payload, updated_at.to_rfc3339()],
            )
            .with_context(|| "failed to write snapshot")?;
            Ok(())
        })
        .await
    }

    pub async fn get_snapshot(&self, namespace: &str) -> Result<Option<String>> {
        let namespace = namespace.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT payload FROM snapshots WHERE namespace = ?1",
                params![namespace],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| "failed to read snapshot")
        })
        .await
    }

    pub async fn insert_completed_session(&self, session: &CompletedSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO completed_sessions
                     (id, app, started_at, completed_at, planned_ms, cycle_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.app.settings_key(),
                    record.started_at.to_rfc3339(),
                    record.completed_at.to_rfc3339(),
                    to_i64(record.planned_ms)?,
                    record.cycle_count,
                    record.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert completed session")?;
            Ok(())
        })
        .await
    }

    pub async fn list_completed_sessions(&self, limit: u32) -> Result<Vec<CompletedSession>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, app, started_at, completed_at, planned_ms, cycle_count, created_at
                 FROM completed_sessions
                 ORDER BY completed_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(CompletedSession {
                    id: row.get(0)?,
                    app: app_from_str(&row.get::<_, String>(1)?)?,
                    started_at: parse_datetime(&row.get::<_, String>(2)?)?,
                    completed_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    planned_ms: to_u64(row.get::<_, i64>(4)?)?,
                    cycle_count: row.get(5)?,
                    created_at: parse_datetime(&row.get::<_, String>(6)?)?,
                });
            }

            Ok(sessions)
        })
        .await
    }
}
