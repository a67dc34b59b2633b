//! Persistent per-cell performance ledger.
//!
//! One `PerformanceLedger` owns the ledger document for the process. All
//! read-modify-write cycles go through [`PerformanceLedger::update`], which
//! holds the write mutex, reloads the document from the store (another
//! process may have written since), applies the mutation, persists, and
//! then drops the read cache so the next reader loads fresh data.
//!
//! Readers go through [`PerformanceLedger::snapshot`]: a cache hit is an
//! `Arc` clone under a read lock, so concurrent scorers never block each
//! other or the writer. A hit is only served while the store revision it
//! was loaded at is still current, so writes from another process show up
//! on the next read.
//!
//! If the store rejects a write, the in-memory document stays authoritative
//! for the rest of the process and the on-disk copy is left as it was.

pub mod metrics;
pub mod models;
pub mod store;

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::EngineResult;
pub use models::{LedgerSnapshot, SettlementRecord, StrategyCell};
pub use store::{FileLedgerStore, LedgerStore, MemoryLedgerStore, Revision};

struct Cached {
    doc: Arc<LedgerSnapshot>,
    /// Store revision the document was loaded at; `None` for the in-memory copy.
    revision: Option<Revision>,
}

pub struct PerformanceLedger {
    store: Box<dyn LedgerStore>,
    /// Last document this process wrote or loaded; doubles as the write lock.
    state: Mutex<LedgerSnapshot>,
    /// Set when the in-memory document is ahead of the store.
    dirty: AtomicBool,
    /// Bumped by every `update`; a reader only installs what it loaded if
    /// no write landed in between.
    writes: AtomicU64,
    cache: RwLock<Option<Cached>>,
}

impl PerformanceLedger {
    /// Load the ledger from `store`. A corrupt document is an error: the
    /// caller decides whether to start without it, nothing is overwritten.
    pub fn open(store: Box<dyn LedgerStore>) -> EngineResult<Self> {
        let snapshot = store.load()?;
        info!(
            "Ledger loaded from {} (version {}, {} league(s), {} driver(s))",
            store.describe(),
            snapshot.version,
            snapshot.stats.len(),
            snapshot.drivers.len()
        );
        Ok(PerformanceLedger {
            store,
            state: Mutex::new(snapshot),
            dirty: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            cache: RwLock::new(None),
        })
    }

    /// Current ledger document, served from the read cache when possible.
    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        let dirty = self.dirty.load(Ordering::Acquire);
        let current = if dirty {
            None
        } else {
            match self.store.revision() {
                Ok(rev) => Some(rev),
                Err(e) => {
                    debug!("Ledger revision check on {} failed: {}", self.store.describe(), e);
                    None
                }
            }
        };

        if let Some(hit) = self.cache.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let valid = match &hit.revision {
                None => dirty,
                Some(rev) => !dirty && current.as_ref() == Some(rev),
            };
            if valid {
                return Arc::clone(&hit.doc);
            }
        }

        let seen = self.writes.load(Ordering::Acquire);
        let (fresh, revision) = if dirty {
            (self.in_memory(), None)
        } else {
            match self.store.load() {
                Ok(doc) => (doc, current),
                Err(e) => {
                    warn!("Ledger reload from {} failed, serving in-memory copy: {}", self.store.describe(), e);
                    (self.in_memory(), None)
                }
            }
        };
        let fresh = Arc::new(fresh);

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if self.writes.load(Ordering::Acquire) == seen {
            *cache = Some(Cached {
                doc: Arc::clone(&fresh),
                revision,
            });
        }
        fresh
    }

    /// Apply `mutate` to the latest document and persist it.
    ///
    /// The mutation is always kept in memory. An `Err` means the store could
    /// not be written and the on-disk document is behind.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut LedgerSnapshot) -> R) -> EngineResult<R> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut doc = if self.dirty.load(Ordering::Acquire) {
            state.clone()
        } else {
            match self.store.load() {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Ledger reload before write failed, using in-memory copy: {}", e);
                    state.clone()
                }
            }
        };

        let out = mutate(&mut doc);
        doc.version += 1;
        doc.last_updated = Some(Utc::now());
        doc.refresh_global();

        let saved = self.store.save(&doc);
        *state = doc;
        self.dirty.store(saved.is_err(), Ordering::Release);
        self.writes.fetch_add(1, Ordering::AcqRel);
        drop(state);
        self.invalidate_cache();

        match saved {
            Ok(()) => {
                debug!("Ledger persisted to {}", self.store.describe());
                Ok(out)
            }
            Err(e) => {
                error!("Ledger persist to {} failed, keeping in-memory state: {}", self.store.describe(), e);
                Err(e)
            }
        }
    }

    /// Write the in-memory document if a previous persist failed.
    pub fn flush(&self) -> EngineResult<()> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.store.save(&state)?;
        self.dirty.store(false, Ordering::Release);
        info!("Ledger flushed to {} (version {})", self.store.describe(), state.version);
        Ok(())
    }

    fn invalidate_cache(&self) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn in_memory(&self) -> LedgerSnapshot {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
