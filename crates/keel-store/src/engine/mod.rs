//! Embedded append-only ledger engine.
//!
//! An in-process store that behaves like a remote, session-oriented,
//! append-only ledger:
//!
//! - sessions authenticate, select one logical database, expire when idle,
//!   and can be killed administratively
//! - the whole engine can be switched offline to simulate network loss
//! - writes that would rewrite history are rejected ([`guard`])
//! - every committed write is appended to a hash-chained log ([`txlog`]) and
//!   reports only its transaction id
//!
//! Each logical database is a `SQLite` database behind an `r2d2` pool
//! ([`pool`]). All `SQLite` work runs on tokio's blocking pool.

pub mod guard;
pub mod pool;
pub mod txlog;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keel_core::ids::prefixed_id;
use keel_settings::StoreSettings;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, TransactionBehavior, params_from_iter};
use tracing::{debug, info, warn};

use self::pool::{ConnectionPool, PoolConfig};
use self::txlog::ChainReport;
use crate::errors::{Result, StoreError};
use crate::session::{ConnectTarget, ExecSummary, StoreConnector, StoreSession};
use crate::value::{Row, SqlValue, Statement};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory for database files; `None` keeps databases in memory.
    pub data_dir: Option<PathBuf>,
    /// Idle time after which a session expires.
    pub session_timeout: Duration,
    /// Pool tuning per database.
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            session_timeout: Duration::from_secs(900),
            pool: PoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Engine configuration described by store settings.
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            data_dir: settings.data_dir.as_ref().map(PathBuf::from),
            session_timeout: settings.session_timeout(),
            pool: PoolConfig {
                pool_size: settings.pool_size,
                ..PoolConfig::default()
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

struct Database {
    name: String,
    pool: ConnectionPool,
}

struct SessionEntry {
    username: String,
    last_used: Instant,
}

struct EngineInner {
    config: EngineConfig,
    users: RwLock<HashMap<String, String>>,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    online: AtomicBool,
}

impl EngineInner {
    /// Validate and refresh a session before it does any work.
    fn touch(&self, session_id: &str) -> Result<()> {
        if !self.online.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(
                "connection refused: store offline".into(),
            ));
        }
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(session_id) else {
            return Err(StoreError::SessionLost(format!(
                "session not found: {session_id}"
            )));
        };
        if entry.last_used.elapsed() > self.config.session_timeout {
            let _ = sessions.remove(session_id);
            return Err(StoreError::SessionLost(format!(
                "session expired: {session_id}"
            )));
        }
        if !self.users.read().contains_key(&entry.username) {
            return Err(StoreError::PermissionDenied(format!(
                "user '{}' is no longer authorized",
                entry.username
            )));
        }
        entry.last_used = Instant::now();
        Ok(())
    }
}

/// Handle to the embedded engine. Cheap to clone.
#[derive(Clone)]
pub struct LedgerEngine {
    inner: Arc<EngineInner>,
}

impl LedgerEngine {
    /// Create an engine with no users and no databases.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                users: RwLock::new(HashMap::new()),
                databases: RwLock::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Create an in-memory engine with default configuration.
    pub fn in_memory() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Create an engine provisioned for `settings`: its user and its
    /// database.
    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        let engine = Self::new(EngineConfig::from_settings(settings));
        engine.add_user(&settings.username, &settings.password);
        engine.create_database(&settings.database)?;
        Ok(engine)
    }

    /// Register (or re-key) a user.
    pub fn add_user(&self, username: &str, password: &str) {
        let _ = self
            .inner
            .users
            .write()
            .insert(username.to_string(), password.to_string());
    }

    /// Remove a user. Their open sessions fail with permission denied.
    pub fn revoke_user(&self, username: &str) -> bool {
        self.inner.users.write().remove(username).is_some()
    }

    /// Create a logical database. Idempotent.
    pub fn create_database(&self, name: &str) -> Result<()> {
        if self.inner.databases.read().contains_key(name) {
            return Ok(());
        }
        let pool = match &self.inner.config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StoreError::Unavailable(format!("create data dir {}: {e}", dir.display()))
                })?;
                pool::new_file(&dir.join(format!("{name}.db")), &self.inner.config.pool)?
            }
            None => pool::new_in_memory(&self.inner.config.pool)?,
        };
        let conn = pool.get()?;
        txlog::ensure_table(&conn)?;
        drop(conn);

        let mut databases = self.inner.databases.write();
        if !databases.contains_key(name) {
            let _ = databases.insert(
                name.to_string(),
                Arc::new(Database {
                    name: name.to_string(),
                    pool,
                }),
            );
            info!(database = name, "database created");
        }
        Ok(())
    }

    /// Simulate network loss (`false`) or recovery (`true`).
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Release);
        if online {
            info!("store online");
        } else {
            warn!("store offline");
        }
    }

    /// Whether the engine accepts calls.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Revoke one session.
    pub fn kill_session(&self, session_id: &str) -> bool {
        let killed = self.inner.sessions.lock().remove(session_id).is_some();
        if killed {
            info!(session_id, "session killed");
        }
        killed
    }

    /// Revoke every session, returning how many were open.
    pub fn kill_all_sessions(&self) -> usize {
        let mut sessions = self.inner.sessions.lock();
        let count = sessions.len();
        sessions.clear();
        info!(count, "all sessions killed");
        count
    }

    /// Drop sessions idle longer than the session timeout.
    pub fn expire_idle_sessions(&self) -> usize {
        let timeout = self.inner.config.session_timeout;
        let mut sessions = self.inner.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() <= timeout);
        before - sessions.len()
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Walk the transaction log of `database` and verify every hash.
    pub async fn verify_chain(&self, database: &str) -> Result<ChainReport> {
        let db = self.database(database)?;
        run_blocking(&db, |conn| txlog::verify(conn)).await
    }

    fn database(&self, name: &str) -> Result<Arc<Database>> {
        self.inner
            .databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::DatabaseNotFound(name.to_string()))
    }
}

#[async_trait]
impl StoreConnector for LedgerEngine {
    async fn open_session(&self, target: &ConnectTarget) -> Result<Arc<dyn StoreSession>> {
        if !self.is_online() {
            return Err(StoreError::Unavailable(format!(
                "connection refused: {}",
                target.address
            )));
        }
        let authenticated = self
            .inner
            .users
            .read()
            .get(&target.username)
            .is_some_and(|password| *password == target.password);
        if !authenticated {
            return Err(StoreError::PermissionDenied(format!(
                "authentication failed for user '{}'",
                target.username
            )));
        }
        let database = self.database(&target.database)?;

        let id = prefixed_id("sess");
        let _ = self.inner.sessions.lock().insert(
            id.clone(),
            SessionEntry {
                username: target.username.clone(),
                last_used: Instant::now(),
            },
        );
        debug!(session_id = %id, database = %database.name, "session opened");
        Ok(Arc::new(LedgerSession {
            id,
            database,
            engine: Arc::clone(&self.inner),
        }))
    }
}

async fn run_blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let mut conn = db.pool.get()?;
        f(&mut conn)
    })
    .await?
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// A session opened by [`LedgerEngine`].
pub struct LedgerSession {
    id: String,
    database: Arc<Database>,
    engine: Arc<EngineInner>,
}

impl LedgerSession {
    async fn commit(&self, statements: Vec<Statement>) -> Result<ExecSummary> {
        for statement in &statements {
            guard::check_write(&statement.sql)?;
        }
        let session_id = self.id.clone();
        let tx_id = run_blocking(&self.database, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for statement in &statements {
                guard::check_index(&tx, &statement.sql)?;
                let _ = tx.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
            }
            let tx_id = txlog::append(&tx, &session_id, &statements)?;
            tx.commit()?;
            Ok(tx_id)
        })
        .await?;
        debug!(session_id = %self.id, tx_id, "transaction committed");
        Ok(ExecSummary { tx_id })
    }
}

#[async_trait]
impl StoreSession for LedgerSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn database(&self) -> &str {
        &self.database.name
    }

    async fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<ExecSummary> {
        self.engine.touch(&self.id)?;
        self.commit(vec![Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        }])
        .await
    }

    async fn exec_batch(&self, statements: &[Statement]) -> Result<ExecSummary> {
        self.engine.touch(&self.id)?;
        if statements.is_empty() {
            return Err(StoreError::Syntax("empty batch".into()));
        }
        self.commit(statements.to_vec()).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.engine.touch(&self.id)?;
        let sql = sql.to_string();
        let params = params.to_vec();
        run_blocking(&self.database, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            if !stmt.readonly() {
                return Err(StoreError::Syntax(
                    "query accepts read-only statements only".into(),
                ));
            }
            let columns: Arc<[String]> = stmt
                .column_names()
                .iter()
                .map(|c| (*c).to_string())
                .collect();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Row::from_sqlite(&columns, row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn health(&self) -> Result<()> {
        self.engine.touch(&self.id)?;
        run_blocking(&self.database, |conn| {
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.engine.sessions.lock().remove(&self.id).is_some() {
            debug!(session_id = %self.id, "session closed");
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
