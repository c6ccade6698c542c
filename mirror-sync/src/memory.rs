//! In-memory mirror store
//!
//! Used in tests and local development where no external document store is
//! reachable. Keeps documents in a map keyed by `(project_id, doc_id)`, which
//! makes the hash-keyed idempotence of mirror writes directly observable.

use crate::{Error, MirrorDocument, MirrorStore, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory document store
#[derive(Debug, Default)]
pub struct MemoryMirror {
    docs: Mutex<BTreeMap<(String, String), MirrorDocument>>,
    fail_writes: AtomicBool,
}

impl MemoryMirror {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (for failure-path tests)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch one document
    pub fn get(&self, project_id: &str, doc_id: &str) -> Option<MirrorDocument> {
        self.docs
            .lock()
            .get(&(project_id.to_string(), doc_id.to_string()))
            .cloned()
    }

    /// All documents mirrored for a project
    pub fn docs_for_project(&self, project_id: &str) -> Vec<MirrorDocument> {
        self.docs
            .lock()
            .iter()
            .filter(|((p, _), _)| p == project_id)
            .map(|(_, doc)| doc.clone())
            .collect()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    async fn write_entry(&self, doc: &MirrorDocument) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("writes forced to fail".to_string()));
        }

        self.docs
            .lock()
            .insert((doc.project_id.clone(), doc.doc_id.clone()), doc.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
