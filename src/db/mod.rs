//! SQLite storage for tasks and the processed-message journal.
//!
//! One worker thread owns the connection. Callers submit either a read
//! ([`Database::read`]) or a named write ([`Database::write`]); writes run
//! inside an immediate transaction that commits only when the closure
//! succeeds, so an admission's journal check, task insert and journal entry
//! land together or not at all. Commands run one at a time in arrival order.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

mod migrations;
pub mod tasks;

use migrations::run_migrations;

pub use tasks::TaskFilter;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    /// Lookups against the task table or the journal.
    Read(Job),
    /// One named unit of change; the job opens and commits its own
    /// transaction.
    Write { op: &'static str, job: Job },
    /// Fold the WAL back into the database file and stop the worker.
    Shutdown,
}

struct Worker {
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("db: failed to send shutdown to worker: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("db: failed to join worker: {join_err:?}");
            }
        }
    }
}

pub(crate) fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid {field} '{value}': {err}"))
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path).context("failed to open SQLite database")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("db: failed to enable WAL mode: {err}");
    }
    // A second process (manual scan next to `watch`) may hold the write lock.
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, commands: mpsc::Receiver<DbCommand>) {
    let mut writes: u64 = 0;
    while let Ok(command) = commands.recv() {
        match command {
            DbCommand::Read(job) => job(&mut conn),
            DbCommand::Write { op, job } => {
                debug!("db: write {op}");
                job(&mut conn);
                writes += 1;
            }
            DbCommand::Shutdown => break,
        }
    }

    if let Err(err) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
        warn!("db: WAL checkpoint on shutdown failed: {err}");
    }
    info!("db: worker shutting down after {writes} writes");
}

#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    db_path: Arc<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.db_path)
            .finish()
    }
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let path_for_thread = db_path.clone();

        let handle = thread::Builder::new()
            .name("task-scout-db".into())
            .spawn(move || match open_connection(&path_for_thread) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_err() {
                        error!("db: initialization receiver dropped before ready signal");
                        return;
                    }
                    serve(conn, command_rx);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("db: initialized at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                sender: command_tx,
                handle: Mutex::new(Some(handle)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Run a query on the worker's connection.
    pub(crate) async fn read<F, T>(&self, query: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(DbCommand::Read, move |conn| query(conn)).await
    }

    /// Run `change` inside an immediate transaction. The transaction commits
    /// when `change` returns `Ok` and rolls back otherwise.
    pub(crate) async fn write<F, T>(&self, op: &'static str, change: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(
            move |job| DbCommand::Write { op, job },
            move |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .with_context(|| format!("failed to begin {op}"))?;
                let out = change(&tx)?;
                tx.commit().with_context(|| format!("failed to commit {op}"))?;
                Ok(out)
            },
        )
        .await
    }

    async fn submit<C, F, T>(&self, command: C, run: F) -> Result<T>
    where
        C: FnOnce(Job) -> DbCommand,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            if reply_tx.send(run(conn)).is_err() {
                debug!("db: caller dropped before receiving result");
            }
        });

        self.worker
            .sender
            .send(command(job))
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}
