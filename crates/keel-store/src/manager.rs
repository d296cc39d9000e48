//! Connection lifecycle for one store session.
//!
//! [`ConnectionManager`] owns the only session to the store:
//!
//! - **connect**: exponential backoff over a fixed attempt budget, each
//!   attempt bounded by the connect timeout
//! - **health**: a bounded liveness call; on a session-lost failure, exactly
//!   one reconnect (bounded by its own sub-timeout) and a second liveness
//!   call; only a second consecutive failure is unhealthy
//! - **leases**: the session is lent out as [`SessionLease`]s so stats can
//!   report in-use versus idle
//!
//! State machine:
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ Degraded (inside a health check)
//!       ↑                         │
//!       └──────── disconnect ─────┘
//! ```
//!
//! Shared state sits behind a `parking_lot` reader/writer lock that is
//! never held across an await. Connect and reconnect are serialized by an
//! async gate so concurrent health checks never stampede the store.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use keel_core::BackoffConfig;
use keel_core::metrics::{
    STORE_CONNECT_ATTEMPTS_TOTAL, STORE_CONNECTED, STORE_HEALTH_CHECK_DURATION_SECONDS,
    STORE_RECONNECTS_TOTAL,
};
use keel_settings::StoreSettings;
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, StoreError};
use crate::session::{ConnectTarget, StoreConnector, StoreSession};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and public types
// ─────────────────────────────────────────────────────────────────────────────

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Where to connect.
    pub target: ConnectTarget,
    /// Connect retry schedule.
    pub backoff: BackoffConfig,
    /// Bound on each connect attempt.
    pub connect_timeout: Duration,
    /// Bound on the liveness call.
    pub health_timeout: Duration,
    /// Bound on the reconnect inside a health check.
    pub reconnect_timeout: Duration,
}

impl ManagerConfig {
    /// Defaults for `target`.
    pub fn new(target: ConnectTarget) -> Self {
        Self {
            target,
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_millis(400),
            reconnect_timeout: Duration::from_secs(5),
        }
    }

    /// Configuration described by store settings.
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            target: ConnectTarget::from_settings(settings),
            backoff: settings.backoff(),
            connect_timeout: settings.connect_timeout(),
            health_timeout: settings.health_timeout(),
            reconnect_timeout: settings.reconnect_timeout(),
        }
    }
}

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Initial connect in progress.
    Connecting,
    /// Session installed.
    Connected,
    /// Session lost; a health check is reconnecting.
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Snapshot of connection counters.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Current state.
    pub state: ConnectionState,
    /// Open sessions (0 or 1).
    pub open_connections: usize,
    /// Leases currently held by callers.
    pub in_use: usize,
    /// Open sessions with no lease out.
    pub idle: usize,
    /// Sessions opened over the manager's lifetime.
    pub total_opened: u64,
    /// Successful reconnects inside health checks.
    pub reconnects: u64,
    /// Errors since the last successful connect.
    pub error_count: u64,
    /// Errors over the manager's lifetime.
    pub total_errors: u64,
    /// Most recent error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the current session was opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Last health check time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    /// Last time the store answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// Outcome of the last health check.
    pub healthy: bool,
}

/// Result of [`ConnectionManager::check_health`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Whether the store answered (possibly after one reconnect).
    pub healthy: bool,
    /// State after the check.
    pub state: ConnectionState,
    /// Whether a reconnect happened during the check.
    pub reconnected: bool,
    /// Wall time of the check.
    pub response_time_ms: u64,
    /// Failure text when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the check finished.
    pub checked_at: DateTime<Utc>,
}

/// A borrowed session. Dropping the lease returns it.
pub struct SessionLease {
    session: Arc<dyn StoreSession>,
    in_use: Arc<AtomicUsize>,
}

impl SessionLease {
    fn new(session: Arc<dyn StoreSession>, in_use: &Arc<AtomicUsize>) -> Self {
        let _ = in_use.fetch_add(1, Ordering::AcqRel);
        Self {
            session,
            in_use: Arc::clone(in_use),
        }
    }
}

impl Deref for SessionLease {
    type Target = dyn StoreSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let _ = self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session.id())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    state: ConnectionState,
    session: Option<Arc<dyn StoreSession>>,
    connected_at: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    healthy: bool,
    error_count: u64,
    total_errors: u64,
    total_opened: u64,
    reconnects: u64,
}

/// Puts the previous state back if the enclosing future is dropped before
/// [`StateGuard::settle`] runs.
struct StateGuard<'a> {
    inner: &'a RwLock<Inner>,
    restore: Option<ConnectionState>,
}

impl<'a> StateGuard<'a> {
    fn enter(inner: &'a RwLock<Inner>, next: ConnectionState) -> Self {
        let previous = std::mem::replace(&mut inner.write().state, next);
        Self {
            inner,
            restore: Some(previous),
        }
    }

    fn settle(mut self, state: ConnectionState) {
        self.restore = None;
        self.inner.write().state = state;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.restore.take() {
            self.inner.write().state = previous;
        }
    }
}

struct Probe {
    healthy: bool,
    reconnected: bool,
    error: Option<StoreError>,
}

impl Probe {
    fn ok(reconnected: bool) -> Self {
        Self {
            healthy: true,
            reconnected,
            error: None,
        }
    }

    fn failed(error: StoreError, reconnected: bool) -> Self {
        Self {
            healthy: false,
            reconnected,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the lifecycle of one store session.
pub struct ConnectionManager {
    connector: Arc<dyn StoreConnector>,
    config: ManagerConfig,
    inner: RwLock<Inner>,
    gate: tokio::sync::Mutex<()>,
    in_use: Arc<AtomicUsize>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(connector: Arc<dyn StoreConnector>, config: ManagerConfig) -> Self {
        Self {
            connector,
            config,
            inner: RwLock::new(Inner {
                state: ConnectionState::Disconnected,
                session: None,
                connected_at: None,
                last_health_check: None,
                last_success: None,
                last_error: None,
                healthy: false,
                error_count: 0,
                total_errors: 0,
                total_opened: 0,
                reconnects: 0,
            }),
            gate: tokio::sync::Mutex::new(()),
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Whether a session is installed.
    pub fn is_connected(&self) -> bool {
        self.inner.read().session.is_some()
    }

    /// Open a session, retrying with exponential backoff.
    ///
    /// A no-op when already connected. On exhaustion returns
    /// [`StoreError::ConnectExhausted`] and leaves the manager
    /// disconnected; callers are expected to keep running without storage.
    pub async fn connect(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        if self.is_connected() {
            debug!("store already connected");
            return Ok(());
        }

        let attempts = self.config.backoff.attempts();
        let state = StateGuard::enter(&self.inner, ConnectionState::Connecting);
        let mut last_error = StoreError::NotConnected;
        for attempt in 0..attempts {
            match self.open_once(self.config.connect_timeout).await {
                Ok(session) => {
                    counter!(STORE_CONNECT_ATTEMPTS_TOTAL, "outcome" => "success").increment(1);
                    let session_id = session.id().to_string();
                    self.install(session).await;
                    state.settle(ConnectionState::Connected);
                    info!(
                        attempt = attempt + 1,
                        session_id,
                        address = %self.config.target.address,
                        database = %self.config.target.database,
                        "connected to store"
                    );
                    return Ok(());
                }
                Err(err) => {
                    counter!(STORE_CONNECT_ATTEMPTS_TOTAL, "outcome" => "failure").increment(1);
                    self.record_error(&err);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %err,
                        "store connect attempt failed"
                    );
                    last_error = err;
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.backoff.delay_after(attempt)).await;
                    }
                }
            }
        }

        state.settle(ConnectionState::Disconnected);
        error!(attempts, error = %last_error, "store connect failed");
        Err(StoreError::ConnectExhausted {
            attempts,
            source: Box::new(last_error),
        })
    }

    /// Close the session if one is open. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        let previous = {
            let mut inner = self.inner.write();
            inner.state = ConnectionState::Disconnected;
            inner.connected_at = None;
            inner.healthy = false;
            inner.session.take()
        };
        gauge!(STORE_CONNECTED).set(0.0);
        if let Some(session) = previous {
            self.retire(session).await;
            info!("disconnected from store");
        }
        Ok(())
    }

    /// Liveness check with one transparent reconnect on session loss.
    pub async fn check_health(&self) -> HealthReport {
        let started = Instant::now();
        let probe = self.probe().await;
        let elapsed = started.elapsed();
        histogram!(STORE_HEALTH_CHECK_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let now = Utc::now();
        let state = {
            let mut inner = self.inner.write();
            inner.last_health_check = Some(now);
            inner.healthy = probe.healthy;
            if probe.healthy {
                inner.last_success = Some(now);
            }
            inner.state
        };

        HealthReport {
            healthy: probe.healthy,
            state,
            reconnected: probe.reconnected,
            response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            error: probe.error.map(|e| e.to_string()),
            checked_at: now,
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStats {
        let inner = self.inner.read();
        let open = usize::from(inner.session.is_some());
        let in_use = self.in_use.load(Ordering::Acquire);
        ConnectionStats {
            state: inner.state,
            open_connections: open,
            in_use,
            idle: open.saturating_sub(in_use.min(open)),
            total_opened: inner.total_opened,
            reconnects: inner.reconnects,
            error_count: inner.error_count,
            total_errors: inner.total_errors,
            last_error: inner.last_error.clone(),
            connected_at: inner.connected_at,
            last_health_check: inner.last_health_check,
            last_success: inner.last_success,
            healthy: inner.healthy,
        }
    }

    /// Borrow the session, if one is installed.
    ///
    /// `None` means storage is unavailable; callers degrade.
    pub fn session(&self) -> Option<SessionLease> {
        let session = self.inner.read().session.clone()?;
        Some(SessionLease::new(session, &self.in_use))
    }

    /// Borrow the session or fail with [`StoreError::NotConnected`].
    pub fn require_session(&self) -> Result<SessionLease> {
        self.session().ok_or(StoreError::NotConnected)
    }

    // -- internals --

    async fn open_once(&self, limit: Duration) -> Result<Arc<dyn StoreSession>> {
        match tokio::time::timeout(limit, self.connector.open_session(&self.config.target)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    async fn ping(&self, session: &Arc<dyn StoreSession>) -> Result<()> {
        let limit = self.config.health_timeout;
        match tokio::time::timeout(limit, session.health()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit)),
        }
    }

    /// Install a fresh session, retiring any previous one.
    async fn install(&self, session: Arc<dyn StoreSession>) {
        let now = Utc::now();
        let previous = {
            let mut inner = self.inner.write();
            inner.error_count = 0;
            inner.total_opened += 1;
            inner.connected_at = Some(now);
            inner.last_success = Some(now);
            inner.healthy = true;
            inner.session.replace(session)
        };
        gauge!(STORE_CONNECTED).set(1.0);
        if let Some(old) = previous {
            self.retire(old).await;
        }
    }

    async fn retire(&self, session: Arc<dyn StoreSession>) {
        if let Err(err) = session.close().await {
            debug!(session_id = session.id(), error = %err, "closing stale session failed");
        }
    }

    fn drop_session(&self) {
        let mut inner = self.inner.write();
        inner.session = None;
        inner.connected_at = None;
        gauge!(STORE_CONNECTED).set(0.0);
    }

    fn record_error(&self, err: &StoreError) {
        let mut inner = self.inner.write();
        inner.error_count += 1;
        inner.total_errors += 1;
        inner.last_error = Some(err.to_string());
    }

    fn current(&self) -> Option<Arc<dyn StoreSession>> {
        self.inner.read().session.clone()
    }

    async fn probe(&self) -> Probe {
        let Some(session) = self.current() else {
            return Probe::failed(StoreError::NotConnected, false);
        };
        let first = match self.ping(&session).await {
            Ok(()) => return Probe::ok(false),
            Err(err) => err,
        };
        self.record_error(&first);
        if !first.is_session_lost() {
            warn!(error = %first, "store health check failed");
            return Probe::failed(first, false);
        }

        warn!(session_id = session.id(), error = %first, "store session lost, reconnecting");
        let _gate = self.gate.lock().await;
        // Disconnected while the first ping was in flight.
        let Some(current) = self.current() else {
            debug!("store disconnected during health check, not reconnecting");
            return Probe::failed(StoreError::NotConnected, false);
        };
        let state = StateGuard::enter(&self.inner, ConnectionState::Degraded);

        let fresh = match current {
            // Another health check already replaced the lost session.
            current if current.id() != session.id() => current,
            _ => match self.open_once(self.config.reconnect_timeout).await {
                Ok(fresh) => {
                    counter!(STORE_RECONNECTS_TOTAL, "outcome" => "success").increment(1);
                    self.install(Arc::clone(&fresh)).await;
                    self.inner.write().reconnects += 1;
                    fresh
                }
                Err(err) => {
                    counter!(STORE_RECONNECTS_TOTAL, "outcome" => "failure").increment(1);
                    self.record_error(&err);
                    self.drop_session();
                    state.settle(ConnectionState::Disconnected);
                    error!(error = %err, "store reconnect failed");
                    return Probe::failed(err, false);
                }
            },
        };

        match self.ping(&fresh).await {
            Ok(()) => {
                state.settle(ConnectionState::Connected);
                info!(session_id = fresh.id(), "store session restored");
                Probe::ok(true)
            }
            Err(err) => {
                self.record_error(&err);
                self.drop_session();
                state.settle(ConnectionState::Disconnected);
                error!(error = %err, "store unhealthy after reconnect");
                Probe::failed(err, true)
            }
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.config.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
