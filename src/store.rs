//! Persisted record of listings already seen and delivered.
//!
//! The store is the only owner of posted state. It is loaded once at run
//! start and flushed after each confirmed delivery and again when dropped.
//! Flushes take an advisory lock on a sibling `.lock` file, re-read the file,
//! merge and atomically replace it, so parallel processes never drop each
//! other's updates.

use crate::error::{StoreError, StoreResult};
use crate::models::{Listing, Source};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

const FORMAT_VERSION: u32 = 1;

/// Persisted state of one listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordState {
    pub first_seen: DateTime<Utc>,
    pub posted: bool,
}

/// Flattened view of one persisted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub listing_id: String,
    pub source: Source,
    pub first_seen: DateTime<Utc>,
    pub posted: bool,
}

type Records = BTreeMap<Source, BTreeMap<String, RecordState>>;

#[derive(Debug, Serialize, Deserialize)]
struct DedupFile {
    version: u32,
    records: Records,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Records,
    dirty: bool,
}

pub struct DedupStore {
    path: PathBuf,
    lock_path: PathBuf,
    state: Mutex<StoreState>,
}

impl DedupStore {
    /// Load the store from `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is an error.
    pub fn load(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let records = {
            let _lock = FileLock::acquire(&lock_path)?;
            read_records(&path)?
        };

        let posted: usize = records
            .values()
            .flat_map(|ids| ids.values())
            .filter(|r| r.posted)
            .count();
        info!(path = %path.display(), posted, "Loaded dedup store");

        Ok(Self {
            path,
            lock_path,
            state: Mutex::new(StoreState {
                records,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `(source, id)` has already been delivered
    pub fn contains(&self, id: &str, source: Source) -> bool {
        self.state()
            .records
            .get(&source)
            .and_then(|ids| ids.get(id))
            .is_some_and(|r| r.posted)
    }

    /// Note a listing the first time it is seen, without marking it posted.
    pub fn observe(&self, listing: &Listing) {
        let mut state = self.state();
        let ids = state.records.entry(listing.source).or_default();
        if !ids.contains_key(&listing.id) {
            ids.insert(
                listing.id.clone(),
                RecordState {
                    first_seen: Utc::now(),
                    posted: false,
                },
            );
            state.dirty = true;
        }
    }

    /// Mark a listing as delivered. Call only after delivery is confirmed.
    pub fn record_posted(&self, listing: &Listing) {
        let mut state = self.state();
        let record = state
            .records
            .entry(listing.source)
            .or_default()
            .entry(listing.id.clone())
            .or_insert(RecordState {
                first_seen: Utc::now(),
                posted: false,
            });
        if !record.posted {
            record.posted = true;
            state.dirty = true;
        }
    }

    /// Merge in-memory records into the file under the lock.
    pub fn flush(&self) -> StoreResult<()> {
        let mut state = self.state();
        if !state.dirty {
            return Ok(());
        }

        let _lock = FileLock::acquire(&self.lock_path)?;
        let on_disk = read_records(&self.path)?;
        merge_records(&mut state.records, &on_disk);
        write_records(&self.path, &state.records)?;
        state.dirty = false;

        debug!(path = %self.path.display(), "Flushed dedup store");
        Ok(())
    }

    /// Every record, ordered by source then listing id
    pub fn records(&self) -> Vec<DedupRecord> {
        self.state()
            .records
            .iter()
            .flat_map(|(source, ids)| {
                ids.iter().map(move |(id, r)| DedupRecord {
                    listing_id: id.clone(),
                    source: *source,
                    first_seen: r.first_seen,
                    posted: r.posted,
                })
            })
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the guard cannot leave records half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DedupStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(path = %self.path.display(), error = %e, "Failed to flush dedup store on release");
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn read_records(path: &Path) -> StoreResult<Records> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Records::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file: DedupFile = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if file.version != FORMAT_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", file.version),
        });
    }
    Ok(file.records)
}

fn write_records(path: &Path, records: &Records) -> StoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    let file = DedupFile {
        version: FORMAT_VERSION,
        records: records.clone(),
    };
    let json = serde_json::to_vec_pretty(&file).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Union of two record sets: `posted` never goes back to false and the
/// earliest `first_seen` wins.
fn merge_records(into: &mut Records, other: &Records) {
    for (source, ids) in other {
        let target = into.entry(*source).or_default();
        for (id, theirs) in ids {
            target
                .entry(id.clone())
                .and_modify(|ours| {
                    ours.posted |= theirs.posted;
                    ours.first_seen = ours.first_seen.min(theirs.first_seen);
                })
                .or_insert(*theirs);
        }
    }
}

/// Exclusive advisory lock released on drop.
struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| StoreError::Lock {
                path: path.to_path_buf(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            error!(path = %self.path.display(), error = %e, "Failed to release dedup store lock");
        }
    }
}
