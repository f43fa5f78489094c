//! Alertmanager accepts failure signals from monitored systems, deduplicates
//! and rate-limits them into alerts, and tracks their acknowledgement. It also
//! tracks dead man's switches (expected periodic check-ins) and HTTP monitors,
//! both of which raise alerts of their own when they fail.
//!
//! All state is event-sourced. The `eventlog` crate provides the ordered log of
//! `events::Envelope`s, and `state::Store` folds that log into the current
//! alerts, monitors and switches. Every mutation runs through
//! `App::run_transaction`, which decides against the folded state and then
//! appends conditionally upon the log not having moved in the meantime.
//! Lost races re-run the decision against fresh state.
use eventlog::{Cursor, EventLog};

pub mod alerts;
pub mod api;
pub mod events;
mod id;
pub mod monitors;
pub mod notify;
pub mod scanner;
mod scheduled;
pub mod state;
pub mod switches;
pub mod transact;
pub mod ttl;
mod unnoticed;

#[cfg(test)]
mod testing;

pub use id::new_id;
pub use notify::Notifier;
pub use scheduled::Scheduled;
pub use state::{Alert, DeadMansSwitch, HttpMonitor, State, Store};
pub use transact::{Decision, MAX_OPTIMISTIC_LOCKING_RETRIES};

/// Error is the error type of all alertmanager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidTtl(#[from] ttl::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("event log operation failed")]
    Log(#[from] eventlog::Error),
    #[error("giving up after {attempts} attempts lost the race to append to the event log")]
    ConcurrencyExhausted {
        attempts: u32,
        #[source]
        source: eventlog::Error,
    },
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),
    #[error("malformed {kind} event")]
    MalformedEvent {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode or decode state snapshot")]
    Snapshot(#[source] serde_json::Error),
    #[error("events read from {read} don't follow the store's cursor {store}")]
    CursorMismatch { read: Cursor, store: Cursor },
    #[error("operation was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejection is a decision that an operation isn't permitted given current
/// state. Nothing is appended to the log when an operation is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("already have an active alert: {0}")]
    AlertAlreadyActive(String),
    #[error("no alert: {0}")]
    AlertNotFound(String),
    #[error("monitor not found: {0}")]
    MonitorNotFound(String),
    #[error("monitor left unchanged: {0}")]
    MonitorUnchanged(String),
    #[error("switch not found: {0}")]
    SwitchNotFound(String),
}

impl Rejection {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Rejection::AlertNotFound(_)
                | Rejection::MonitorNotFound(_)
                | Rejection::SwitchNotFound(_)
        )
    }
}

impl Error {
    /// Returns the Rejection of this error, if it is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Error::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Returns true if the error was caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidTtl(_) | Error::InvalidInput(_))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Ingestion drops new alerts while this many alerts are active.
    pub max_active_alerts: usize,
    /// Base URL of the HTTP API, used for building acknowledgement links.
    pub api_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_active_alerts: 5,
            api_endpoint: String::new(),
        }
    }
}

/// App binds a Store to the event log it folds, and to the channel over which
/// alerts are published.
pub struct App<L, N> {
    log: L,
    notifier: N,
    config: Config,
    store: Store,
    // Serializes reads of the log with their application to `store`.
    sync_lock: tokio::sync::Mutex<()>,
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Build an App with an empty Store, which has not yet read the log.
    pub fn new(log: L, notifier: N, config: Config) -> Self {
        Self {
            log,
            notifier,
            config,
            store: Store::new(),
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build an App which has installed the log's snapshot, if there is one,
    /// and has folded all events which follow it.
    pub async fn load(log: L, notifier: N, config: Config) -> Result<Self> {
        let app = Self::new(log, notifier, config);

        if let Some(snapshot) = app.log.load_snapshot().await? {
            app.store.install_snapshot(&snapshot)?;
            tracing::debug!(cursor = %snapshot.cursor, "installed state snapshot");
        }
        let cursor = app.sync().await?;
        tracing::debug!(%cursor, "loaded state until realtime");

        Ok(app)
    }

    /// Fold all events which have been appended to the log since the Store's
    /// cursor, returning the updated cursor.
    pub async fn sync(&self) -> Result<Cursor> {
        let _guard = self.sync_lock.lock().await;

        let from = self.store.cursor();
        let eventlog::Read { entries, head } = self.log.read(from).await?;

        if entries.is_empty() {
            return Ok(from);
        }
        // Decode the complete batch before applying any of it, so that an
        // unsupported event leaves the Store untouched.
        let envelopes = entries
            .iter()
            .map(|entry| events::Envelope::decode(entry))
            .collect::<Result<Vec<_>>>()?;

        self.store.apply(from, &envelopes, head)?;
        Ok(head)
    }

    /// Persist a snapshot of the current state to the log.
    pub async fn save_snapshot(&self) -> Result<Cursor> {
        self.sync().await?;

        let snapshot = self.store.snapshot()?;
        let cursor = snapshot.cursor;
        self.log.save_snapshot(snapshot).await?;

        Ok(cursor)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Active alerts, ordered on when they were raised.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.store.active_alerts()
    }

    /// HTTP monitors, ordered on when they were created.
    pub fn http_monitors(&self) -> Vec<HttpMonitor> {
        self.store.http_monitors()
    }

    /// Dead man's switches, ordered on subject.
    pub fn dead_mans_switches(&self) -> Vec<DeadMansSwitch> {
        self.store.dead_mans_switches()
    }

    pub fn last_unnoticed_alerts_notified_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.store.last_unnoticed_alerts_notified_at()
    }
}
