//! File-backed history store with rotation into archives.

use crate::config::normalize_name;
use crate::error::{GatewayError, Result};
use crate::history::record::HistoryRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";

/// Ceilings of the active store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_bytes: 1024 * 1024,
        }
    }
}

/// Result of a committed append.
#[derive(Debug)]
pub struct AppendOutcome {
    /// Sequence number given to the appended record.
    pub sequence: u64,
    /// Records moved out of the active store.
    pub evicted: usize,
    /// Set when evicted records could not be archived.
    pub rotation_error: Option<GatewayError>,
}

#[derive(Serialize)]
struct ActiveFileRef<'a> {
    version: u32,
    instance: &'a str,
    next_sequence: u64,
    entry_count: usize,
    size_bytes: u64,
    records: &'a [HistoryRecord],
}

#[derive(Deserialize)]
struct ActiveFile {
    next_sequence: u64,
    #[serde(default)]
    size_bytes: u64,
    records: Vec<HistoryRecord>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveFile {
    version: u32,
    instance: String,
    records: Vec<HistoryRecord>,
}

/// Immutable view over the last records of a store.
///
/// Holds its own reference to the snapshot it was taken from, so later
/// appends or rotations never change what it yields.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    records: Arc<Vec<HistoryRecord>>,
    start: usize,
}

impl HistoryWindow {
    /// Records oldest first. Can be called any number of times.
    pub fn iter(&self) -> std::slice::Iter<'_, HistoryRecord> {
        self.records[self.start..].iter()
    }

    pub fn len(&self) -> usize {
        self.records.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<HistoryRecord> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a HistoryWindow {
    type Item = &'a HistoryRecord;
    type IntoIter = std::slice::Iter<'a, HistoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Active history of one instance plus its archives on disk.
#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
    instance: String,
    stem: String,
    limits: HistoryLimits,
    records: Arc<Vec<HistoryRecord>>,
    next_sequence: u64,
    size_bytes: u64,
    current_archive: Option<PathBuf>,
}

impl HistoryStore {
    /// Open (or create) the store for `instance` under `dir`.
    ///
    /// An unparsable active file is moved aside and a fresh store started.
    pub fn open(dir: impl Into<PathBuf>, instance: &str, limits: HistoryLimits) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| GatewayError::file_access(&dir, &e))?;

        let mut store = Self {
            stem: normalize_name(instance),
            instance: instance.to_string(),
            dir,
            limits,
            records: Arc::new(Vec::new()),
            next_sequence: 0,
            size_bytes: 0,
            current_archive: None,
        };

        let path = store.active_path();
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ActiveFile>(&bytes) {
                Ok(file) => {
                    let after_last = file.records.last().map(|r| r.sequence + 1).unwrap_or(0);
                    store.next_sequence = file.next_sequence.max(after_last);
                    store.size_bytes = file.size_bytes;
                    store.records = Arc::new(file.records);
                }
                Err(err) => {
                    let aside = store.dir.join(format!(
                        "{}_history_corrupt_{}.json",
                        store.stem,
                        Utc::now().format(TIMESTAMP_FORMAT)
                    ));
                    warn!(
                        instance = %store.instance,
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %err,
                        "History file is corrupt, starting a fresh store"
                    );
                    fs::rename(&path, &aside).map_err(|e| GatewayError::file_access(&path, &e))?;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(GatewayError::file_access(&path, &e)),
        }

        store.current_archive = store.archives().ok().and_then(|mut a| a.pop());

        info!(
            instance = %store.instance,
            entries = store.records.len(),
            path = %path.display(),
            "Opened history store"
        );
        Ok(store)
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}_history.json", self.stem))
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// New ceilings apply from the next append.
    pub fn set_limits(&mut self, limits: HistoryLimits) {
        self.limits = limits;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialized size of the active records.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> HistoryWindow {
        HistoryWindow {
            records: Arc::clone(&self.records),
            start: self.records.len().saturating_sub(n),
        }
    }

    /// Every active record, oldest first.
    pub fn snapshot(&self) -> HistoryWindow {
        self.recent(usize::MAX)
    }

    /// Append a record and persist the store before returning.
    ///
    /// Rotation runs here: the oldest records are evicted until the entry and
    /// byte ceilings hold, always keeping the newest record. Failing to
    /// archive evictions does not fail the append; it is reported in the
    /// outcome instead.
    pub fn append(&mut self, mut record: HistoryRecord) -> Result<AppendOutcome> {
        let sequence = self.next_sequence;
        record.sequence = sequence;

        let mut records = self.records.as_ref().clone();
        records.push(record);

        let sizes = records
            .iter()
            .map(|r| serde_json::to_vec(r).map(|b| b.len() as u64))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut evict = records.len().saturating_sub(self.limits.max_entries.max(1));
        let mut size = array_size(&sizes[evict..]);
        while size > self.limits.max_bytes && records.len() - evict > 1 {
            evict += 1;
            size = array_size(&sizes[evict..]);
        }

        let evicted: Vec<HistoryRecord> = records.drain(..evict).collect();
        self.write_active(&records, sequence + 1, size)?;

        self.records = Arc::new(records);
        self.next_sequence = sequence + 1;
        self.size_bytes = size;

        let rotation_error = if evicted.is_empty() {
            None
        } else {
            debug!(instance = %self.instance, evicted = evicted.len(), "Rotating history");
            match self.archive(evicted) {
                Ok(()) => None,
                Err(err) => {
                    let err = GatewayError::HistoryRotation(err.to_string());
                    warn!(instance = %self.instance, error = %err, "Evicted records were not archived");
                    Some(err)
                }
            }
        };

        Ok(AppendOutcome {
            sequence,
            evicted: evict,
            rotation_error,
        })
    }

    /// Empty the active store. Archives are left alone.
    pub fn clear(&mut self) -> Result<()> {
        self.write_active(&[], self.next_sequence, array_size(&[]))?;
        self.records = Arc::new(Vec::new());
        self.size_bytes = array_size(&[]);
        info!(instance = %self.instance, "History cleared");
        Ok(())
    }

    /// Archive files of this instance, oldest first.
    pub fn archives(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}_history_archive_", self.stem);
        let entries = fs::read_dir(&self.dir).map_err(|e| GatewayError::file_access(&self.dir, &e))?;

        let mut archives: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(&prefix))
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .map(is_archive_suffix)
                    .unwrap_or(false)
            })
            .collect();
        archives.sort();
        Ok(archives)
    }

    /// Every archived record, oldest first.
    pub fn archived_records(&self) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::new();
        for path in self.archives()? {
            records.extend(read_archive(&path)?);
        }
        Ok(records)
    }

    fn write_active(&self, records: &[HistoryRecord], next_sequence: u64, size_bytes: u64) -> Result<()> {
        let file = ActiveFileRef {
            version: FORMAT_VERSION,
            instance: &self.instance,
            next_sequence,
            entry_count: records.len(),
            size_bytes,
            records,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let path = self.active_path();
        write_durable(&path, &bytes)
            .map_err(|e| GatewayError::Storage(format!("{}: {}", path.display(), e)))
    }

    /// Move evicted records into the current archive, opening new ones as
    /// each fills up to `max_entries`.
    fn archive(&mut self, mut evicted: Vec<HistoryRecord>) -> Result<()> {
        let capacity = self.limits.max_entries.max(1);

        while !evicted.is_empty() {
            let (path, mut records) = match self.current_archive.take() {
                Some(path) => {
                    let records = read_archive(&path)?;
                    if records.len() < capacity {
                        (path, records)
                    } else {
                        (self.new_archive_path(), Vec::new())
                    }
                }
                None => (self.new_archive_path(), Vec::new()),
            };

            let take = (capacity - records.len().min(capacity)).max(1).min(evicted.len());
            records.extend(evicted.drain(..take));

            let file = ArchiveFile {
                version: FORMAT_VERSION,
                instance: self.instance.clone(),
                records,
            };
            let bytes = serde_json::to_vec_pretty(&file)?;
            write_durable(&path, &bytes).map_err(|e| GatewayError::file_access(&path, &e))?;

            debug!(instance = %self.instance, archive = %path.display(), entries = file.records.len(), "Archived history records");
            self.current_archive = Some(path);
        }

        Ok(())
    }

    fn new_archive_path(&self) -> PathBuf {
        let stamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let base = format!("{}_history_archive_{}", self.stem, stamp);

        let mut path = self.dir.join(format!("{}.json", base));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.json", base, n));
            n += 1;
        }
        path
    }
}

/// Serialized size of a JSON array holding records of the given sizes.
fn array_size(sizes: &[u64]) -> u64 {
    2 + sizes.iter().sum::<u64>() + sizes.len().saturating_sub(1) as u64
}

fn is_archive_suffix(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    bytes.len() >= 22 && bytes[..8].iter().all(u8::is_ascii_digit) && bytes[8] == b'T'
}

fn read_archive(path: &Path) -> Result<Vec<HistoryRecord>> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice::<ArchiveFile>(&bytes)?.records),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(GatewayError::file_access(path, &e)),
    }
}

/// Write via a temp file, fsync, then rename over the target.
fn write_durable(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    #[cfg(unix)]
    {
        if let Some(dir) = path.parent().and_then(|p| File::open(p).ok()) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
