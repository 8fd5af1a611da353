//! Ledgers — the in-memory source of truth for every dedup decision.
//!
//! `Ledgers` owns the three documents for the length of a process and is
//! handed by reference to the rules, the approval gate, and the orchestrator.
//! Mutations happen in memory; `flush()` writes back only the documents that
//! changed, each through its store's atomic save.

pub mod marketing;
pub mod thread;
pub mod watermark;

pub use marketing::{MarketingLedger, MarketingSendRecord, SendStatus};
pub use thread::{
    Direction, ProposalDecision, SchedulingStatus, ThreadLedger, ThreadMessage, ThreadRecord,
    ThreadSummary,
};
pub use watermark::ProcessingWatermark;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{JsonFileStore, MemoryStore, StateStore};

/// File names inside the data directory.
pub mod files {
    pub const THREADS: &str = "thread_memory.json";
    pub const MARKETING: &str = "marketing_sent.json";
    pub const WATERMARK: &str = "last_processed.json";
}

/// The three backing stores, one per ledger document.
#[derive(Clone)]
pub struct StateStores {
    pub threads: Arc<dyn StateStore<ThreadLedger>>,
    pub marketing: Arc<dyn StateStore<MarketingLedger>>,
    pub watermark: Arc<dyn StateStore<ProcessingWatermark>>,
}

impl StateStores {
    /// JSON files under `dir`.
    pub fn json_dir(dir: &Path) -> Self {
        Self {
            threads: Arc::new(JsonFileStore::new(dir.join(files::THREADS))),
            marketing: Arc::new(JsonFileStore::new(dir.join(files::MARKETING))),
            watermark: Arc::new(JsonFileStore::new(dir.join(files::WATERMARK))),
        }
    }

    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            threads: Arc::new(MemoryStore::new()),
            marketing: Arc::new(MemoryStore::new()),
            watermark: Arc::new(MemoryStore::new()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    threads: bool,
    marketing: bool,
    watermark: bool,
}

impl Dirty {
    fn any(&self) -> bool {
        self.threads || self.marketing || self.watermark
    }
}

/// Read-only view handed to the dedup rules.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub threads: &'a ThreadLedger,
    pub marketing: &'a MarketingLedger,
}

/// Loaded ledgers plus the stores they flush to.
pub struct Ledgers {
    threads: ThreadLedger,
    marketing: MarketingLedger,
    watermark: ProcessingWatermark,
    stores: StateStores,
    dirty: Dirty,
}

impl Ledgers {
    /// Load all three documents. Any corrupt document fails the whole open:
    /// nothing is overwritten and the caller must not proceed.
    pub async fn open(stores: StateStores) -> Result<Self, StoreError> {
        let threads = stores.threads.load().await?;
        let marketing = stores.marketing.load().await?;
        let watermark = stores.watermark.load().await?;
        info!(
            threads = threads.len(),
            first_run = watermark.is_first_run(),
            "Ledgers loaded"
        );
        Ok(Self {
            threads,
            marketing,
            watermark,
            stores,
            dirty: Dirty::default(),
        })
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            threads: &self.threads,
            marketing: &self.marketing,
        }
    }

    pub fn threads(&self) -> &ThreadLedger {
        &self.threads
    }

    pub fn marketing(&self) -> &MarketingLedger {
        &self.marketing
    }

    pub fn watermark(&self) -> &ProcessingWatermark {
        &self.watermark
    }

    pub fn threads_mut(&mut self) -> &mut ThreadLedger {
        self.dirty.threads = true;
        &mut self.threads
    }

    pub fn marketing_mut(&mut self) -> &mut MarketingLedger {
        self.dirty.marketing = true;
        &mut self.marketing
    }

    pub fn watermark_mut(&mut self) -> &mut ProcessingWatermark {
        self.dirty.watermark = true;
        &mut self.watermark
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty.any()
    }

    /// Persist every document changed since the last flush.
    ///
    /// A document whose save fails stays dirty and is retried on the next
    /// flush.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.dirty.threads {
            self.stores.threads.save(&self.threads).await?;
            self.dirty.threads = false;
        }
        if self.dirty.marketing {
            self.stores.marketing.save(&self.marketing).await?;
            self.dirty.marketing = false;
        }
        if self.dirty.watermark {
            self.stores.watermark.save(&self.watermark).await?;
            self.dirty.watermark = false;
        }
        debug!("Ledgers flushed");
        Ok(())
    }
}
