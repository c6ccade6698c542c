//! Main ledger orchestration layer
//!
//! Ties storage, hash chaining, and verification into a high-level API.
//!
//! Appends for one project serialize on a per-project lock so the
//! read-head/compute-hash/commit sequence can never interleave; appends for
//! different projects proceed in parallel. Reads take no locks and may see
//! slightly stale data.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AppendRequest, Config, EntryStatus, Ledger, Payload, ProjectId};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let entry = ledger
//!         .append_entry(AppendRequest {
//!             project_id: ProjectId::new("proj_1"),
//!             status: EntryStatus::Collected,
//!             verified_by: "system".to_string(),
//!             batch_reference: None,
//!             payload: Payload::new(),
//!         })
//!         .await?;
//!
//!     assert_eq!(entry.sequence_no, 0);
//!     Ok(())
//! }
//! ```

use crate::{
    chain,
    metrics::Metrics,
    storage::{StateUpdates, Storage},
    types::{
        Batch, BatchId, ChainBlock, Contribution, Entry, EntryStatus, Payload, Project, ProjectId,
        ProjectStatus, UserId,
    },
    verifier, Config, Error, Result,
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Input for appending a ledger entry
#[derive(Debug, Clone)]
pub struct AppendRequest {
    /// Target project
    pub project_id: ProjectId,

    /// Attested status
    pub status: EntryStatus,

    /// Attribution: user identifier or `"system"`
    pub verified_by: String,

    /// Originating batch, if any
    pub batch_reference: Option<BatchId>,

    /// Structured metadata covered by the hash
    pub payload: Payload,
}

/// Held write lock for one project's chain.
///
/// Proof that the caller owns the project's serialization boundary; required
/// by [`Ledger::append_entry_locked`] so multi-step operations (read state,
/// mutate aggregates, append) stay race-free end to end.
#[derive(Debug)]
pub struct ProjectLock {
    project_id: ProjectId,
    _guard: OwnedMutexGuard<()>,
}

impl ProjectLock {
    /// Project this lock covers
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}

/// Main ledger interface
pub struct Ledger {
    /// Storage backend
    storage: Arc<Storage>,

    /// Per-project write locks
    locks: DashMap<ProjectId, Arc<Mutex<()>>>,

    /// Serializes project creation (creation-sequence allocation)
    create_lock: Mutex<()>,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;

        Ok(Self {
            storage,
            locks: DashMap::new(),
            create_lock: Mutex::new(()),
            metrics,
            config,
        })
    }

    /// Direct storage access (reads, audit tooling)
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Acquire the write lock for a project.
    ///
    /// Waits up to the configured lock timeout, then fails with
    /// [`Error::Conflict`]; callers may retry the whole operation.
    pub async fn lock_project(&self, project_id: &ProjectId) -> Result<ProjectLock> {
        let mutex = self
            .locks
            .entry(project_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let timeout = Duration::from_millis(self.config.lock_timeout_ms);
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(ProjectLock {
                project_id: project_id.clone(),
                _guard: guard,
            }),
            Err(_) => {
                self.metrics.record_conflict_timeout();
                Err(Error::Conflict(format!(
                    "Timed out acquiring write lock for project {}",
                    project_id
                )))
            }
        }
    }

    /// Append a new entry, acquiring the project lock internally
    pub async fn append_entry(&self, request: AppendRequest) -> Result<Entry> {
        let lock = self.lock_project(&request.project_id).await?;
        self.append_entry_locked(request, StateUpdates::none(), &lock)
    }

    /// Append a new entry plus aggregate mutations under an already-held lock.
    ///
    /// Reads the chain head, assigns the next sequence number and a
    /// non-decreasing timestamp, chains the hash, and commits entry and
    /// [`StateUpdates`] in one atomic write batch: either both persist or
    /// neither does.
    pub fn append_entry_locked(
        &self,
        request: AppendRequest,
        updates: StateUpdates,
        lock: &ProjectLock,
    ) -> Result<Entry> {
        if lock.project_id() != &request.project_id {
            return Err(Error::Validation(format!(
                "Held lock is for project {}, not {}",
                lock.project_id(),
                request.project_id
            )));
        }
        Self::validate_request(&request)?;

        let started = Instant::now();

        let head = self.storage.head(&request.project_id)?;
        let (sequence_no, previous_hash, timestamp_floor) = match head {
            Some(h) => (h.sequence_no + 1, Some(h.hash), Some(h.timestamp)),
            None => (0, None, None),
        };

        // Wall clock can step backwards; the chain's timestamps may not
        let now = Utc::now();
        let timestamp = match timestamp_floor {
            Some(floor) if now < floor => floor,
            _ => now,
        };

        let hash = chain::digest(&request.payload, previous_hash.as_deref());

        let entry = Entry {
            project_id: request.project_id,
            sequence_no,
            timestamp,
            status: request.status,
            verified_by: request.verified_by,
            batch_reference: request.batch_reference,
            payload: request.payload,
            previous_hash,
            hash,
        };

        self.storage.commit(Some(&entry), &updates)?;
        self.metrics.record_append(started.elapsed().as_secs_f64());

        tracing::debug!(
            project_id = %entry.project_id,
            sequence_no = entry.sequence_no,
            status = %entry.status,
            "Entry appended"
        );

        Ok(entry)
    }

    /// Commit aggregate mutations without appending an entry
    pub fn commit_state(&self, updates: StateUpdates) -> Result<()> {
        self.storage.commit(None, &updates)
    }

    fn validate_request(request: &AppendRequest) -> Result<()> {
        validate_identifier("project_id", request.project_id.as_str())?;
        if request.verified_by.trim().is_empty() {
            return Err(Error::Validation("verified_by must not be empty".into()));
        }
        if let Some(batch_id) = &request.batch_reference {
            validate_identifier("batch_reference", batch_id.as_str())?;
        }
        Ok(())
    }

    // Read side

    /// Newest entry for a project, if any
    pub fn latest(&self, project_id: &ProjectId) -> Result<Option<Entry>> {
        self.storage.latest_entry(project_id)
    }

    /// Full history for a project, oldest first
    pub fn history(&self, project_id: &ProjectId) -> Result<Vec<Entry>> {
        self.storage.history(project_id)
    }

    /// Chain view with per-block validity flags
    pub fn get_chain(&self, project_id: &ProjectId) -> Result<Vec<ChainBlock>> {
        let entries = self.history(project_id)?;
        let flags = verifier::validity_flags(&entries);

        Ok(entries
            .into_iter()
            .zip(flags)
            .map(|(entry, is_valid)| ChainBlock {
                index: entry.sequence_no,
                hash: entry.hash,
                previous_hash: entry.previous_hash,
                timestamp: entry.timestamp,
                status: entry.status,
                verified_by: entry.verified_by,
                batch_reference: entry.batch_reference,
                payload: entry.payload,
                is_valid,
            })
            .collect())
    }

    /// Index of the first invalid entry, if the chain is corrupt
    pub fn verify(&self, project_id: &ProjectId) -> Result<Option<usize>> {
        let entries = self.history(project_id)?;
        Ok(verifier::first_invalid(&entries))
    }

    /// Whether the whole chain verifies
    pub fn verify_chain(&self, project_id: &ProjectId) -> Result<bool> {
        Ok(self.verify(project_id)?.is_none())
    }

    // Project/batch/contribution access

    /// Create a new project in `Planned` state
    pub async fn create_project(
        &self,
        name: &str,
        required_grams: Decimal,
        project_type: Option<String>,
    ) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::Validation("project name must not be empty".into()));
        }
        if required_grams <= Decimal::ZERO {
            return Err(Error::Validation(
                "required_grams must be positive".into(),
            ));
        }

        let _guard = self.create_lock.lock().await;
        let created_seq = self.storage.next_project_seq()?;

        let project = Project {
            project_id: ProjectId::generate(),
            name: name.to_string(),
            status: ProjectStatus::Planned,
            required_grams,
            allocated_grams: Decimal::ZERO,
            project_type,
            created_seq,
            created_at: Utc::now(),
            date_started: None,
            date_completed: None,
        };

        self.storage.commit(
            None,
            &StateUpdates {
                project: Some(project.clone()),
                ..Default::default()
            },
        )?;

        tracing::info!(project_id = %project.project_id, name = %project.name, "Project created");

        Ok(project)
    }

    /// Get project by ID
    pub fn get_project(&self, project_id: &ProjectId) -> Result<Project> {
        self.storage.get_project(project_id)
    }

    /// All projects, oldest creation first
    pub fn projects_in_creation_order(&self) -> Result<Vec<Project>> {
        self.storage.projects_in_creation_order()
    }

    /// Get batch by ID
    pub fn get_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        self.storage.get_batch(batch_id)
    }

    /// Batches holding a given material type
    pub fn batches_for_material(&self, material_type: &str) -> Result<Vec<Batch>> {
        self.storage.batches_for_material(material_type)
    }

    /// Batches linked to a project
    pub fn batches_for_project(&self, project_id: &ProjectId) -> Result<Vec<Batch>> {
        self.storage.batches_for_project(project_id)
    }

    /// All batches
    pub fn all_batches(&self) -> Result<Vec<Batch>> {
        self.storage.all_batches()
    }

    /// A user's contribution to a batch, if recorded
    pub fn get_contribution(
        &self,
        batch_id: &BatchId,
        user_id: &UserId,
    ) -> Result<Option<Contribution>> {
        self.storage.get_contribution(batch_id, user_id)
    }

    /// All contributions to a batch
    pub fn contributions_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Contribution>> {
        self.storage.contributions_for_batch(batch_id)
    }

    /// All contributions by a user
    pub fn contributions_for_user(&self, user_id: &UserId) -> Result<Vec<Contribution>> {
        self.storage.contributions_for_user(user_id)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

/// Reject empty identifiers and embedded NUL (reserved as key delimiter)
pub(crate) fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    if value.contains('\0') {
        return Err(Error::Validation(format!(
            "{} must not contain NUL bytes",
            field
        )));
    }
    Ok(())
}
