//! The annotation store: a single JSON file holding every record for one
//! project.
//!
//! All reads and writes go through one mutex, plus an advisory lock on a
//! sidecar file next to the store. A read-modify-write sequence holds both
//! from the load until the save completes, so no two actors can interleave
//! their updates, whether they share this process or not. Saves write a
//! temporary file and rename it over the store, so readers that skip the lock
//! still see either the old contents or the new ones, never a partial file.
//!
//! Nothing here is async. Callers on the async side should keep the critical
//! section short and must never hold a [`StoreGuard`] across an `.await`.

use std::{
    fs, io,
    io::Write as _,
    sync::{Mutex, MutexGuard},
};

use chrono::Local;
use fs4::fs_std::FileExt as _;

use crate::prelude::*;

pub mod record;

pub use self::record::{
    Dimensions, ExtractionMetadata, ExtractionStatus, NewRecord, Record, RecordState,
    Rect, StoreFile,
};

/// The file name of the store within a project directory.
pub const STORE_FILE_NAME: &str = "rectangle_map.json";

/// Errors from the annotation store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store file exists but could not be parsed.
    #[error("annotation store {path:?} is corrupt")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The store file could not be read or written.
    #[error("cannot access annotation store {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A rectangle with no area.
    #[error("invalid rectangle {rect}: need x1 < x2 and y1 < y2")]
    InvalidRect { rect: Rect },

    /// No record matched.
    #[error("no rectangle with id {id} on page {page}")]
    UnknownRecord { id: u64, page: usize },

    /// The store already holds the largest possible ID.
    #[error("no rectangle IDs left to assign")]
    IdsExhausted,
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// The result of an [`AnnotationStore::update`] callback. Only
/// [`Mutation::Changed`] causes the store to be written back.
#[derive(Debug)]
pub enum Mutation<T> {
    Unchanged(T),
    Changed(T),
}

/// Durable mapping from record ID to record.
pub struct AnnotationStore {
    /// Path to our JSON file.
    path: PathBuf,

    /// The document our records refer to. Written into every save.
    source_path: PathBuf,

    /// Guards every load, save and read-modify-write span within this
    /// process. Other processes are kept out by locking `lock_path`.
    lock: Mutex<()>,

    /// Sidecar file we take an exclusive advisory lock on.
    lock_path: PathBuf,
}

impl AnnotationStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>, source_path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            source_path: source_path.into(),
            lock: Mutex::new(()),
            lock_path,
        }
    }

    /// Open an existing store file, taking the source path from its contents.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = read_store_file(&path)?.ok_or_else(|| {
            StoreError::io(
                &path,
                io::Error::new(io::ErrorKind::NotFound, "store file does not exist"),
            )
        })?;
        Ok(Self::new(path, file.source_path))
    }

    /// The path to our backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory containing our backing file.
    pub fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// The document our records refer to.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Enter the store's critical section. Blocks until no other thread or
    /// process holds it.
    pub fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        // The mutex guards no data of its own, so a panic while it was held
        // can't have left anything inconsistent.
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        trace!(path = %self.lock_path.display(), "Locked store");
        Ok(StoreGuard {
            store: self,
            _lock_file: lock_file,
            _guard: guard,
        })
    }

    /// Load all records. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<Record>, StoreError> {
        self.lock()?.load()
    }

    /// Load all records, logging and returning nothing if the store can't be
    /// read.
    pub fn load_or_empty(&self) -> Vec<Record> {
        match self.load() {
            Ok(records) => records,
            Err(err) => {
                warn!("Treating annotation store as empty: {:?}", err);
                vec![]
            }
        }
    }

    /// Overwrite the store with `records`.
    pub fn save(&self, records: Vec<Record>) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let mut file = match guard.load_file() {
            Ok(file) => file,
            Err(err @ StoreError::CorruptState { .. }) => {
                warn!("Overwriting corrupt annotation store: {}", err);
                StoreFile::default()
            }
            Err(err) => return Err(err),
        };
        file.rectangles = records;
        guard.save_file(file)
    }

    /// Run a read-modify-write cycle inside the critical section.
    pub fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Record>) -> Result<Mutation<T>, StoreError>,
    {
        self.lock()?.update(f)
    }

    /// Append a new record, assigning it the next ID.
    #[instrument(level = "debug", skip_all, fields(page = new.page))]
    pub fn append(&self, new: NewRecord) -> Result<Record, StoreError> {
        new.rect.validate()?;
        let guard = self.lock()?;
        let mut file = guard.load_file()?;
        let id = file.next_id()?;
        let record = Record::new(id, new, Local::now().naive_local());
        file.rectangles.push(record.clone());
        file.last_assigned_id = Some(id);
        guard.save_file(file)?;
        debug!(id, "Appended record");
        Ok(record)
    }

    /// Remove the record matching both `id` and `page`.
    ///
    /// IDs should be unique, but we match on both keys so that a malformed
    /// store with duplicate IDs never loses the wrong record.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&self, id: u64, page: usize) -> Result<Vec<Record>, StoreError> {
        self.update(|records| {
            let (removed, kept) = records
                .drain(..)
                .partition::<Vec<_>, _>(|r| r.id == id && r.page == page);
            *records = kept;
            if removed.is_empty() {
                Err(StoreError::UnknownRecord { id, page })
            } else {
                Ok(Mutation::Changed(removed))
            }
        })
    }

    /// Return failed records to the unseen state so that a running watcher
    /// dispatches them again. An empty `ids` requeues every failed record.
    #[instrument(level = "debug", skip(self))]
    pub fn requeue_failed(&self, ids: &[u64]) -> Result<Vec<u64>, StoreError> {
        self.update(|records| {
            let mut requeued = vec![];
            for record in records.iter_mut() {
                if record.state() == RecordState::Failed
                    && (ids.is_empty() || ids.contains(&record.id))
                {
                    record.rearm();
                    requeued.push(record.id);
                }
            }
            if requeued.is_empty() {
                Ok(Mutation::Unchanged(requeued))
            } else {
                Ok(Mutation::Changed(requeued))
            }
        })
    }
}

/// Proof that we hold the store's lock. Dropping it leaves the critical
/// section.
pub struct StoreGuard<'a> {
    store: &'a AnnotationStore,

    /// Closing this releases the advisory lock, before `_guard` unlocks the
    /// mutex.
    _lock_file: fs::File,

    _guard: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    /// Load all records.
    pub fn load(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.load_file()?.rectangles)
    }

    /// Load, let `f` mutate the records, and save if `f` reports a change.
    /// The caller stays inside the critical section afterwards.
    pub fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Record>) -> Result<Mutation<T>, StoreError>,
    {
        let mut file = self.load_file()?;
        match f(&mut file.rectangles)? {
            Mutation::Unchanged(value) => Ok(value),
            Mutation::Changed(value) => {
                self.save_file(file)?;
                Ok(value)
            }
        }
    }

    fn load_file(&self) -> Result<StoreFile, StoreError> {
        Ok(read_store_file(&self.store.path)?.unwrap_or_default())
    }

    /// Atomically replace the store file, recomputing derived fields.
    fn save_file(&self, mut file: StoreFile) -> Result<(), StoreError> {
        let path = &self.store.path;
        file.source_path = self.store.source_path.clone();
        let max_id = file.rectangles.iter().map(|r| r.id).max();
        file.last_assigned_id = file.last_assigned_id.max(max_id);
        for record in &mut file.rectangles {
            record.refresh_dimensions();
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".rectangle_map")
            .suffix(".tmp")
            .tempfile_in(self.store.dir())
            .map_err(|e| StoreError::io(path, e))?;
        serde_json::to_writer_pretty(&mut tmp, &file)
            .map_err(|e| StoreError::io(path, e.into()))?;
        tmp.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(path, e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        trace!(path = %path.display(), count = file.rectangles.len(), "Saved store");
        Ok(())
    }
}

/// `dir/.rectangle_map.lock` for `dir/rectangle_map.json`.
fn lock_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{stem}.lock"))
}

/// Read and parse a store file. Returns `None` if it doesn't exist.
fn read_store_file(path: &Path) -> Result<Option<StoreFile>, StoreError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    // A writer that truncated the file but hasn't written it yet.
    if data.trim().is_empty() {
        return Ok(Some(StoreFile::default()));
    }
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| StoreError::CorruptState {
            path: path.to_owned(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn scratch_store() -> (tempfile::TempDir, AnnotationStore) {
        let dir = tempfile::TempDir::with_prefix("store").unwrap();
        let store = AnnotationStore::new(dir.path().join(STORE_FILE_NAME), "doc.pdf");
        (dir, store)
    }

    fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> Rect {
        Rect::from([x1, y1, x2, y2])
    }

    #[test]
    fn missing_store_loads_empty() {
        let (_dir, store) = scratch_store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_store_is_an_error_for_load_but_not_load_or_empty() {
        let (_dir, store) = scratch_store();
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::CorruptState { .. })
        ));
        assert!(store.load_or_empty().is_empty());
    }

    #[test]
    fn ids_are_monotonic_across_removals() {
        let (_dir, store) = scratch_store();
        let mut last = 0;
        for round in 0..3 {
            let a = store.append(NewRecord::new(0, rect(0.0, 0.0, 1.0, 1.0))).unwrap();
            let b = store.append(NewRecord::new(1, rect(0.0, 0.0, 1.0, 1.0))).unwrap();
            assert!(a.id > last, "round {round}: {} <= {last}", a.id);
            assert!(b.id > a.id);
            last = b.id;
            // Delete the newest record, which is the one a naive max+1 would
            // hand out again.
            store.remove(b.id, 1).unwrap();
        }
        let ids = store.load().unwrap().iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn append_rejects_empty_rectangles() {
        let (_dir, store) = scratch_store();
        let err = store
            .append(NewRecord::new(0, rect(5.0, 5.0, 5.0, 10.0)))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRect { .. }));
        assert!(!store.path().exists());
    }

    #[test]
    fn saved_dimensions_are_recomputed() {
        let (_dir, store) = scratch_store();
        let mut record = store
            .append(NewRecord::new(0, rect(10.0, 20.0, 110.0, 70.0)))
            .unwrap();
        record.dimensions = Dimensions {
            width: -1.0,
            height: -1.0,
        };
        store.save(vec![record]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["rectangles"][0]["dimensions"]["width"], 100.0);
        assert_eq!(raw["rectangles"][0]["dimensions"]["height"], 50.0);
        assert_eq!(raw["pdf_path"], "doc.pdf");
    }

    #[test]
    fn save_of_load_is_a_no_op() {
        let (_dir, store) = scratch_store();
        store.append(NewRecord::new(0, rect(0.0, 0.0, 50.0, 50.0))).unwrap();
        store.append(NewRecord::new(2, rect(1.0, 2.0, 3.0, 4.0))).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();
        store.save(store.load().unwrap()).unwrap();
        let after = fs::read_to_string(store.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_targets_both_id_and_page() {
        let (_dir, store) = scratch_store();
        let mut a = Record::new(
            5,
            NewRecord::new(1, rect(0.0, 0.0, 1.0, 1.0)),
            Local::now().naive_local(),
        );
        let mut b = a.clone();
        b.page = 2;
        a.description = "keep me".to_owned();
        store.save(vec![a, b]).unwrap();

        let removed = store.remove(5, 2).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].page, 2);
        let left = store.load().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].description, "keep me");

        assert!(matches!(
            store.remove(5, 2),
            Err(StoreError::UnknownRecord { id: 5, page: 2 })
        ));
    }

    #[test]
    fn requeue_rearms_only_failed_records() {
        let (_dir, store) = scratch_store();
        let a = store.append(NewRecord::new(0, rect(0.0, 0.0, 1.0, 1.0))).unwrap();
        let b = store.append(NewRecord::new(0, rect(0.0, 0.0, 2.0, 2.0))).unwrap();
        store
            .update(|records| {
                records[0].fail("no text".to_owned());
                records[1].event_complete = true;
                Ok(Mutation::Changed(()))
            })
            .unwrap();

        assert_eq!(store.requeue_failed(&[b.id]).unwrap(), Vec::<u64>::new());
        assert_eq!(store.requeue_failed(&[]).unwrap(), vec![a.id]);
        let records = store.load().unwrap();
        assert_eq!(records[0].state(), RecordState::Unseen);
        assert_eq!(records[1].state(), RecordState::Queued);
    }

    #[test]
    fn unchanged_updates_do_not_write() {
        let (_dir, store) = scratch_store();
        store.update(|_| Ok(Mutation::Unchanged(()))).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn concurrent_appends_never_lose_records() {
        let (_dir, store) = scratch_store();
        let store = Arc::new(store);
        let handles = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        store
                            .append(NewRecord::new(i, rect(0.0, 0.0, 1.0, 1.0)))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut ids = store.load().unwrap().iter().map(|r| r.id).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, (1..=40).collect::<Vec<_>>());
    }

    #[test]
    fn separate_handles_share_one_critical_section() {
        let (_dir, store) = scratch_store();
        let path = store.path().to_owned();
        let appenders = (0..2)
            .map(|page| {
                // Each thread opens the file on its own, like the CLI does.
                let store = AnnotationStore::new(&path, "doc.pdf");
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .append(NewRecord::new(page, rect(0.0, 0.0, 1.0, 1.0)))
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        // A third handle keeps marking records, the way the watcher does.
        let marker = {
            let store = AnnotationStore::new(&path, "doc.pdf");
            std::thread::spawn(move || {
                for _ in 0..50 {
                    store
                        .update(|records| {
                            for record in records.iter_mut() {
                                record.event_complete = true;
                            }
                            Ok(Mutation::Changed(()))
                        })
                        .unwrap();
                }
            })
        };
        for handle in appenders {
            handle.join().unwrap();
        }
        marker.join().unwrap();

        let mut ids = store.load().unwrap().iter().map(|r| r.id).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn lock_file_sits_next_to_the_store() {
        let (dir, store) = scratch_store();
        assert_eq!(
            lock_path_for(store.path()),
            dir.path().join(".rectangle_map.lock")
        );
        store.load().unwrap();
        assert!(dir.path().join(".rectangle_map.lock").is_file());
        assert!(!store.path().exists());
    }

    #[test]
    fn append_fails_cleanly_when_ids_run_out() {
        let (_dir, store) = scratch_store();
        fs::write(
            store.path(),
            format!(r#"{{"pdf_path": "doc.pdf", "last_assigned_id": {}, "rectangles": []}}"#, u64::MAX),
        )
        .unwrap();
        assert!(matches!(
            store.append(NewRecord::new(0, rect(0.0, 0.0, 1.0, 1.0))),
            Err(StoreError::IdsExhausted)
        ));
    }

    #[test]
    fn open_existing_reads_source_path() {
        let (_dir, store) = scratch_store();
        store.save(vec![]).unwrap();
        let reopened = AnnotationStore::open_existing(store.path()).unwrap();
        assert_eq!(reopened.source_path(), Path::new("doc.pdf"));
    }
}
