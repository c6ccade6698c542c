//! RegenWorks Mirror Sync
//!
//! Best-effort, one-way replication of ledger entries to an external document
//! store. A mirror write happens strictly after the local commit and never
//! holds ledger locks; failure is logged and counted, never escalated into a
//! failure of the ledger operation that produced the entry.
//!
//! Mirrored documents are keyed by the entry's own content hash, so a retried
//! write for the same entry lands on the same document.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod http;
pub mod memory;

pub use error::{Error, Result};
pub use http::HttpMirror;
pub use memory::MemoryMirror;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// External document store interface
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Write (or overwrite) one mirrored ledger document
    async fn write_entry(&self, doc: &MirrorDocument) -> Result<()>;

    /// Store name for logs
    fn name(&self) -> &str;
}

/// The replicated view of one ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorDocument {
    /// Owning project
    pub project_id: String,

    /// Document key: the entry's content hash
    pub doc_id: String,

    /// Originating batch, if any
    pub batch_reference: Option<String>,

    /// Weight carried in the entry payload, if present
    pub weight_grams: Option<Decimal>,

    /// Attribution
    pub verified_by: String,

    /// Attested status label
    pub status: String,

    /// Entry timestamp
    pub timestamp: DateTime<Utc>,
}

impl MirrorDocument {
    /// Project the mirrored view out of a ledger entry
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            project_id: entry.project_id.to_string(),
            doc_id: entry.hash.clone(),
            batch_reference: entry.batch_reference.as_ref().map(|b| b.to_string()),
            weight_grams: entry
                .payload
                .get("weight")
                .and_then(|v| v.as_decimal()),
            verified_by: entry.verified_by.clone(),
            status: entry.status.as_str().to_string(),
            timestamp: entry.timestamp,
        }
    }
}

/// Best-effort replication dispatcher
#[derive(Clone)]
pub struct MirrorSync {
    store: Arc<dyn MirrorStore>,
    enabled: bool,
    successes: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl MirrorSync {
    /// Create a dispatcher over a store
    pub fn new(store: Arc<dyn MirrorStore>, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            successes: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Dispatcher that drops every entry (mirroring switched off)
    pub fn disabled() -> Self {
        Self::new(Arc::new(MemoryMirror::new()), false)
    }

    /// Whether mirroring is switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fire-and-forget replication of one entry.
    ///
    /// Spawns onto the current runtime and returns immediately; call only
    /// after the local commit, outside any ledger lock.
    pub fn dispatch(&self, entry: &Entry) {
        if !self.enabled {
            return;
        }

        let doc = MirrorDocument::from_entry(entry);
        let store = self.store.clone();
        let successes = self.successes.clone();
        let failures = self.failures.clone();

        tokio::spawn(async move {
            match store.write_entry(&doc).await {
                Ok(()) => {
                    successes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        store = store.name(),
                        project_id = %doc.project_id,
                        doc_id = %doc.doc_id,
                        "Ledger entry mirrored"
                    );
                }
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        store = store.name(),
                        project_id = %doc.project_id,
                        doc_id = %doc.doc_id,
                        error = %e,
                        "Mirror write failed; local ledger unaffected"
                    );
                }
            }
        });
    }

    /// Replicate one entry and report whether the write landed.
    ///
    /// Same never-escalate contract as [`dispatch`](Self::dispatch), but
    /// awaited, for callers that surface the flag.
    pub async fn try_mirror(&self, entry: &Entry) -> bool {
        if !self.enabled {
            return false;
        }

        let doc = MirrorDocument::from_entry(entry);
        match self.store.write_entry(&doc).await {
            Ok(()) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    store = self.store.name(),
                    project_id = %doc.project_id,
                    error = %e,
                    "Mirror write failed; local ledger unaffected"
                );
                false
            }
        }
    }

    /// Number of successful mirror writes
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Number of failed mirror writes
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MirrorSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSync")
            .field("store", &self.store.name())
            .field("enabled", &self.enabled)
            .finish()
    }
}
