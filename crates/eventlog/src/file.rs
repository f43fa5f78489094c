use super::{Cursor, Error, EventLog, Read, Result, Snapshot};
use std::io::Write;
use std::path::{Path, PathBuf};

/// FileLog is an EventLog stored as a local file of JSON-encoded entries,
/// one per line, with its snapshot in a sibling `.snapshot` file.
///
/// Readers and writers coordinate through an advisory lock of a sibling
/// `.lock` file: reads hold it shared, and conditional appends hold it
/// exclusively from reading the head through writing their entries.
/// Any number of FileLog instances and processes may share one path.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    lock_path: PathBuf,
    snapshot_path: PathBuf,
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        Self {
            lock_path: sibling(&path, ".lock"),
            snapshot_path: sibling(&path, ".snapshot"),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileLog {
    async fn read<'s>(&'s self, after: Cursor) -> Result<Read> {
        let (path, lock_path) = (self.path.clone(), self.lock_path.clone());

        tokio::task::spawn_blocking(move || read_blocking(&path, &lock_path, after))
            .await
            .unwrap()
    }

    async fn append_after<'s>(&'s self, cursor: Cursor, entries: Vec<String>) -> Result<Cursor> {
        let (path, lock_path) = (self.path.clone(), self.lock_path.clone());
        let count = entries.len();

        let head = tokio::task::spawn_blocking(move || {
            append_blocking(&path, &lock_path, cursor, entries)
        })
        .await
        .unwrap()?;

        tracing::debug!(path = ?self.path, %cursor, %head, count, "appended log entries");
        Ok(head)
    }

    async fn load_snapshot<'s>(&'s self) -> Result<Option<Snapshot>> {
        let content = match tokio::fs::read(&self.snapshot_path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return io_error(&self.snapshot_path, source),
        };

        // The first line holds the cursor offset, and the remainder is snapshot data.
        let corrupt = || Error::Corrupt {
            path: self.snapshot_path.clone(),
            line: 1,
        };
        let split = content.iter().position(|b| *b == b'\n').ok_or_else(corrupt)?;
        let offset: u64 = std::str::from_utf8(&content[..split])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(corrupt)?;

        Ok(Some(Snapshot {
            cursor: Cursor(offset),
            data: content[split + 1..].to_vec(),
        }))
    }

    async fn save_snapshot<'s>(&'s self, snapshot: Snapshot) -> Result<()> {
        let mut content = format!("{}\n", snapshot.cursor.offset()).into_bytes();
        content.extend_from_slice(&snapshot.data);

        let tmp_path = sibling(&self.snapshot_path, ".tmp");

        if let Err(source) = tokio::fs::write(&tmp_path, &content).await {
            return io_error(&tmp_path, source);
        }
        if let Err(source) = tokio::fs::rename(&tmp_path, &self.snapshot_path).await {
            return io_error(&self.snapshot_path, source);
        }
        Ok(())
    }
}

fn read_blocking(path: &Path, lock_path: &Path, after: Cursor) -> Result<Read> {
    let _lock = lock(lock_path, false)?;

    let mut entries = read_entries(path)?;
    let head = Cursor::BEGINNING.advance(entries.len());

    if after > head {
        return Err(Error::CursorOutOfRange(after));
    }
    let entries = entries.split_off(after.offset() as usize);

    Ok(Read { entries, head })
}

fn append_blocking(
    path: &Path,
    lock_path: &Path,
    cursor: Cursor,
    entries: Vec<String>,
) -> Result<Cursor> {
    let _lock = lock(lock_path, true)?;

    let head = Cursor::BEGINNING.advance(read_entries(path)?.len());
    if cursor != head {
        return Err(Error::Conflict {
            expected: cursor,
            actual: head,
        });
    }

    let mut buf = String::new();
    for entry in &entries {
        // Encoding as a JSON string escapes any embedded newlines.
        buf.push_str(&serde_json::Value::String(entry.clone()).to_string());
        buf.push('\n');
    }

    let mut file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => file,
        Err(source) => return io_error(path, source),
    };
    if let Err(source) = file.write_all(buf.as_bytes()) {
        return io_error(path, source);
    }
    if let Err(source) = file.sync_data() {
        return io_error(path, source);
    }

    Ok(head.advance(entries.len()))
}

fn read_entries(path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => return io_error(path, source),
    };

    content
        .lines()
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str::<String>(line).map_err(|_| Error::Corrupt {
                path: path.to_owned(),
                line: index + 1,
            })
        })
        .collect()
}

// Take an advisory lock of `lock_path`, which is released when the
// returned File is dropped.
fn lock(lock_path: &Path, exclusive: bool) -> Result<std::fs::File> {
    let file = match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(source) => return io_error(lock_path, source),
    };

    let locked = if exclusive {
        fs2::FileExt::lock_exclusive(&file)
    } else {
        fs2::FileExt::lock_shared(&file)
    };
    if let Err(source) = locked {
        return io_error(lock_path, source);
    }
    Ok(file)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut sibling = path.as_os_str().to_owned();
    sibling.push(suffix);
    sibling.into()
}

fn io_error<T>(path: &Path, source: std::io::Error) -> Result<T> {
    Err(Error::Io {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertmanager.log");

        let log = FileLog::new(&path);
        let head = log
            .append_after(
                Cursor::BEGINNING,
                vec!["first".to_string(), "multi\nline".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(head.offset(), 2);
        assert_eq!(log.path(), path.as_path());
        assert!(dir.path().join("alertmanager.log.lock").exists());

        let stale = log
            .append_after(Cursor::BEGINNING, vec!["lost".to_string()])
            .await
            .unwrap_err();
        assert!(stale.is_conflict());

        let reopened = FileLog::new(&path);
        let read = reopened.read(Cursor::BEGINNING).await.unwrap();
        assert_eq!(
            read.entries,
            vec!["first".to_string(), "multi\nline".to_string()]
        );
        assert_eq!(read.head, head);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_instances_sharing_a_path_admit_one_append_per_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertmanager.log");

        // Independent instances hold independent lock file handles, as
        // separate processes would.
        let (one, two) = (FileLog::new(&path), FileLog::new(&path));

        let rounds = 50;
        for round in 0..rounds {
            let head = one.read(Cursor::BEGINNING).await.unwrap().head;
            assert_eq!(head.offset(), round);

            let (first, second) = tokio::join!(
                one.append_after(head, vec![format!("one-{round}")]),
                two.append_after(head, vec![format!("two-{round}")]),
            );

            match (first, second) {
                (Ok(next), Err(err)) | (Err(err), Ok(next)) => {
                    assert!(err.is_conflict(), "{err:?}");
                    assert_eq!(next.offset(), round + 1);
                }
                (first, second) => panic!("round {round}: {first:?} and {second:?}"),
            }
        }

        let read = two.read(Cursor::BEGINNING).await.unwrap();
        assert_eq!(read.entries.len(), rounds as usize);
        assert_eq!(read.head.offset(), rounds);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::new(dir.path().join("alertmanager.log"));

        assert_eq!(log.load_snapshot().await.unwrap(), None);

        let snapshot = Snapshot {
            cursor: Cursor(7),
            data: b"{\n\t\"active_alerts\": {}\n}".to_vec(),
        };
        log.save_snapshot(snapshot.clone()).await.unwrap();

        assert_eq!(log.load_snapshot().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertmanager.log");
        std::fs::write(&path, "\"ok\"\nnot-json\n").unwrap();

        let err = FileLog::new(&path).read(Cursor::BEGINNING).await.unwrap_err();
        assert!(matches!(err, Error::Corrupt { line: 2, .. }), "{err:?}");
    }
}
