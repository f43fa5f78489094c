//! Client-side interface of the ordered, append-only event log which backs
//! alertmanager state.
//!
//! A log is a single stream of opaque entries. Every read returns the entries
//! following a `Cursor` together with the cursor of the log's current head, and
//! every write states which cursor it extends: `append_after` fails with
//! `Error::Conflict` if any other writer has appended in the meantime. This
//! conditional append is the only concurrency control writers rely upon.
//!
//! The log may also hold a single snapshot, which caches a fold of the stream
//! up to some cursor so readers needn't replay the entire history.
use std::future::Future;

mod file;
mod memory;

pub use file::FileLog;
pub use memory::MemoryLog;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("log has advanced to {actual} (append expected {expected})")]
    Conflict { expected: Cursor, actual: Cursor },
    #[error("cursor {0} is beyond the head of the log")]
    CursorOutOfRange(Cursor),
    #[error("failed to access log file {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log file {path} is corrupt at line {line}")]
    Corrupt { path: std::path::PathBuf, line: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is a lost race on a conditional append.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Cursor is a position within the log: the number of entries which precede it.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub const BEGINNING: Cursor = Cursor(0);

    pub fn offset(&self) -> u64 {
        self.0
    }

    fn advance(self, n: usize) -> Cursor {
        Cursor(self.0 + n as u64)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Entries read from the log, and the cursor which follows the last of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Read {
    pub entries: Vec<String>,
    pub head: Cursor,
}

/// Snapshot is a serialized fold of the log through `cursor`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub cursor: Cursor,
    pub data: Vec<u8>,
}

pub trait EventLog: Send + Sync + 'static {
    /// Read all entries which follow `after`.
    fn read<'s>(&'s self, after: Cursor) -> impl Future<Output = Result<Read>> + Send + 's;

    /// Append `entries` if and only if the head of the log is still `cursor`,
    /// returning the new head.
    fn append_after<'s>(
        &'s self,
        cursor: Cursor,
        entries: Vec<String>,
    ) -> impl Future<Output = Result<Cursor>> + Send + 's;

    fn load_snapshot<'s>(&'s self) -> impl Future<Output = Result<Option<Snapshot>>> + Send + 's;

    fn save_snapshot<'s>(&'s self, snapshot: Snapshot)
        -> impl Future<Output = Result<()>> + Send + 's;
}

/// Journal selects a log implementation at runtime.
#[derive(Debug)]
pub enum Journal {
    Memory(MemoryLog),
    File(FileLog),
}

impl EventLog for Journal {
    async fn read<'s>(&'s self, after: Cursor) -> Result<Read> {
        match self {
            Journal::Memory(log) => log.read(after).await,
            Journal::File(log) => log.read(after).await,
        }
    }

    async fn append_after<'s>(&'s self, cursor: Cursor, entries: Vec<String>) -> Result<Cursor> {
        match self {
            Journal::Memory(log) => log.append_after(cursor, entries).await,
            Journal::File(log) => log.append_after(cursor, entries).await,
        }
    }

    async fn load_snapshot<'s>(&'s self) -> Result<Option<Snapshot>> {
        match self {
            Journal::Memory(log) => log.load_snapshot().await,
            Journal::File(log) => log.load_snapshot().await,
        }
    }

    async fn save_snapshot<'s>(&'s self, snapshot: Snapshot) -> Result<()> {
        match self {
            Journal::Memory(log) => log.save_snapshot(snapshot).await,
            Journal::File(log) => log.save_snapshot(snapshot).await,
        }
    }
}

impl<L: EventLog> EventLog for std::sync::Arc<L> {
    fn read<'s>(&'s self, after: Cursor) -> impl Future<Output = Result<Read>> + Send + 's {
        self.as_ref().read(after)
    }

    fn append_after<'s>(
        &'s self,
        cursor: Cursor,
        entries: Vec<String>,
    ) -> impl Future<Output = Result<Cursor>> + Send + 's {
        self.as_ref().append_after(cursor, entries)
    }

    fn load_snapshot<'s>(&'s self) -> impl Future<Output = Result<Option<Snapshot>>> + Send + 's {
        self.as_ref().load_snapshot()
    }

    fn save_snapshot<'s>(
        &'s self,
        snapshot: Snapshot,
    ) -> impl Future<Output = Result<()>> + Send + 's {
        self.as_ref().save_snapshot(snapshot)
    }
}
