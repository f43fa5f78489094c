use super::{Cursor, Error, EventLog, Read, Result, Snapshot};

/// MemoryLog is an EventLog held entirely in process memory.
/// It's used by tests, and by deployments which don't need durability.
#[derive(Debug, Default)]
pub struct MemoryLog {
    inner: std::sync::Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<String>,
    snapshot: Option<Snapshot>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entries` without any precondition on the current head.
    pub fn append(&self, entries: impl IntoIterator<Item = String>) -> Cursor {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.extend(entries);
        Cursor::BEGINNING.advance(inner.entries.len())
    }

    /// All entries of the log, in order.
    pub fn entries(&self) -> Vec<String> {
        self.inner.lock().unwrap().entries.clone()
    }
}

impl EventLog for MemoryLog {
    async fn read<'s>(&'s self, after: Cursor) -> Result<Read> {
        let inner = self.inner.lock().unwrap();
        let head = Cursor::BEGINNING.advance(inner.entries.len());

        if after > head {
            return Err(Error::CursorOutOfRange(after));
        }
        Ok(Read {
            entries: inner.entries[after.offset() as usize..].to_vec(),
            head,
        })
    }

    async fn append_after<'s>(&'s self, cursor: Cursor, entries: Vec<String>) -> Result<Cursor> {
        let mut inner = self.inner.lock().unwrap();
        let head = Cursor::BEGINNING.advance(inner.entries.len());

        if cursor != head {
            return Err(Error::Conflict {
                expected: cursor,
                actual: head,
            });
        }
        inner.entries.extend(entries);

        Ok(Cursor::BEGINNING.advance(inner.entries.len()))
    }

    async fn load_snapshot<'s>(&'s self) -> Result<Option<Snapshot>> {
        Ok(self.inner.lock().unwrap().snapshot.clone())
    }

    async fn save_snapshot<'s>(&'s self, snapshot: Snapshot) -> Result<()> {
        self.inner.lock().unwrap().snapshot = Some(snapshot);
        Ok(())
    }
}
