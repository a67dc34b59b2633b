use rand::Rng;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use super::models::LedgerSnapshot;
use crate::error::{EngineError, EngineResult};

const SAVE_ATTEMPTS: u32 = 3;

/// Storage backend for the ledger document.
pub trait LedgerStore: Send + Sync {
    /// Load the current document. A store that has never been written
    /// returns an empty snapshot.
    fn load(&self) -> EngineResult<LedgerSnapshot>;

    /// Replace the stored document. Must never leave a partially written
    /// document behind.
    fn save(&self, snapshot: &LedgerSnapshot) -> EngineResult<()>;

    /// Change marker for the stored document. Two equal revisions mean the
    /// document was not replaced in between.
    fn revision(&self) -> EngineResult<Revision>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    Missing,
    File {
        len: u64,
        modified: Option<SystemTime>,
        /// Every save renames a fresh file into place, so the inode changes
        /// even when size and mtime do not.
        inode: u64,
    },
    Writes(u64),
}

/// JSON file store: write `<path>.tmp`, fsync, then rename over the
/// canonical file.
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLedgerStore { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// No canonical file. A complete `<path>.tmp` means a save stopped after
    /// removing the old document and before the rename; a partial one means
    /// the very first save never finished.
    fn recover_tmp(&self) -> EngineResult<LedgerSnapshot> {
        let tmp = self.tmp_path();
        let raw = match fs::read_to_string(&tmp) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Ledger file {} not found, starting empty", self.path.display());
                return Ok(LedgerSnapshot::default());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<LedgerSnapshot>(&raw) {
            Ok(doc) => {
                warn!(
                    "Ledger file {} missing, recovered version {} from {}",
                    self.path.display(),
                    doc.version,
                    tmp.display()
                );
                Ok(doc)
            }
            Err(e) => {
                warn!("Ignoring incomplete ledger write {}: {}", tmp.display(), e);
                Ok(LedgerSnapshot::default())
            }
        }
    }

    fn write_atomic(&self, payload: &[u8]) -> EngineResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&tmp, &self.path) {
            // load() recovers from the tmp file if we stop between these two steps.
            if self.path.exists() {
                fs::remove_file(&self.path)?;
                fs::rename(&tmp, &self.path)?;
            } else {
                let _ = fs::remove_file(&tmp);
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> EngineResult<LedgerSnapshot> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(LedgerSnapshot::default()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.recover_tmp(),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> EngineResult<()> {
        let payload = serde_json::to_vec_pretty(snapshot)?;
        let mut last_err = None;
        for attempt in 1..=SAVE_ATTEMPTS {
            match self.write_atomic(&payload) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Ledger write attempt {}/{} to {} failed: {}",
                        attempt,
                        SAVE_ATTEMPTS,
                        self.path.display(),
                        e
                    );
                    last_err = Some(e);
                    if attempt < SAVE_ATTEMPTS {
                        let jitter = rand::thread_rng().gen_range(0..25);
                        std::thread::sleep(Duration::from_millis(50 * u64::from(attempt) + jitter));
                    }
                }
            }
        }
        Err(EngineError::Persistence {
            attempts: SAVE_ATTEMPTS,
            source: Box::new(last_err.unwrap_or_else(|| {
                EngineError::InvalidInput("ledger write produced no error".into())
            })),
        })
    }

    fn revision(&self) -> EngineResult<Revision> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Revision::File {
                len: meta.len(),
                modified: meta.modified().ok(),
                inode: inode(&meta),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Revision::Missing),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(unix)]
fn inode(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &fs::Metadata) -> u64 {
    0
}

/// In-process store, used by tests and when no ledger path is configured.
#[derive(Default)]
pub struct MemoryLedgerStore {
    doc: Mutex<Option<LedgerSnapshot>>,
    writes: AtomicU64,
    fail_writes: bool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every save fails, for exercising persistence failure.
    #[cfg(test)]
    pub fn failing() -> Self {
        MemoryLedgerStore {
            fail_writes: true,
            ..Self::default()
        }
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> EngineResult<LedgerSnapshot> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        Ok(doc.clone().unwrap_or_default())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> EngineResult<()> {
        if self.fail_writes {
            return Err(EngineError::Persistence {
                attempts: 1,
                source: Box::new(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "memory store configured to fail",
                ))),
            });
        }
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        *doc = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn revision(&self) -> EngineResult<Revision> {
        Ok(Revision::Writes(self.writes.load(Ordering::Acquire)))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
