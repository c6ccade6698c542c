//! Material-flow engine
//!
//! Turns material-collection events into batch/contribution mutations and
//! ledger entries. Batches accumulate per material type inside a trailing
//! collection window; once a batch crosses the weight threshold it is
//! auto-linked to the oldest open project, which appends an `allocated` entry
//! to that project's chain and replicates it to the external mirror.
//!
//! Locking: batch and contribution upserts serialize on a per-material lock,
//! chain appends and project mutations on the ledger's per-project lock.
//! Lock order is always material first, project second. Mirror dispatch
//! happens after every lock is released.

use crate::{
    config::FlowConfig,
    ranking,
    types::{BatchSummary, ContributionChain, ItemRecord, ProjectSummary},
    weights::{StaticWeightTable, WeightEstimator},
    Error, Result,
};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use ledger_core::{
    AppendRequest, Batch, BatchId, ChainBlock, Contribution, Entry, EntryStatus, Ledger, Payload,
    PayloadValue, Project, ProjectId, ProjectStatus, StateUpdates, UserId,
};
use mirror_sync::{HttpMirror, MirrorSync};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Fraction of the requirement at which a planned project breaks ground
fn start_threshold(required_grams: Decimal) -> Decimal {
    required_grams / Decimal::TEN
}

/// Material-flow engine
pub struct MaterialFlow {
    /// Ledger core
    ledger: Arc<Ledger>,

    /// Best-effort external replication
    mirror: MirrorSync,

    /// Average-weight lookup for items scanned without a measured weight
    weights: Arc<dyn WeightEstimator>,

    /// Per-material batch locks
    material_locks: DashMap<String, Arc<Mutex<()>>>,

    /// Configuration
    config: FlowConfig,
}

impl MaterialFlow {
    /// Create a new engine, opening the ledger at the configured directory
    pub fn new(config: FlowConfig) -> Result<Self> {
        let ledger_config = ledger_core::Config {
            data_dir: config.ledger_data_dir.clone(),
            ..Default::default()
        };
        let ledger = Arc::new(Ledger::open(ledger_config)?);

        let mirror = match (config.mirror.enabled, &config.mirror.base_url) {
            (true, Some(url)) => {
                let store = HttpMirror::new(url.clone())
                    .map_err(|e| Error::Config(format!("mirror client: {}", e)))?;
                MirrorSync::new(Arc::new(store), true)
            }
            (true, None) => {
                tracing::warn!("Mirroring enabled without a base URL; disabling");
                MirrorSync::disabled()
            }
            (false, _) => MirrorSync::disabled(),
        };

        Ok(Self {
            ledger,
            mirror,
            weights: Arc::new(StaticWeightTable::new()),
            material_locks: DashMap::new(),
            config,
        })
    }

    /// Replace the mirror dispatcher (tests, custom stores)
    pub fn with_mirror(mut self, mirror: MirrorSync) -> Self {
        self.mirror = mirror;
        self
    }

    /// Replace the weight estimator
    pub fn with_weights(mut self, weights: Arc<dyn WeightEstimator>) -> Self {
        self.weights = weights;
        self
    }

    /// Underlying ledger (reads: `latest`, `history`, chain views)
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Mirror dispatcher
    pub fn mirror(&self) -> &MirrorSync {
        &self.mirror
    }

    async fn lock_material(&self, material_type: &str) -> Result<OwnedMutexGuard<()>> {
        let mutex = self
            .material_locks
            .entry(material_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let timeout = Duration::from_millis(self.config.material_lock_timeout_ms);
        tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                Error::Conflict(format!(
                    "Timed out acquiring batch lock for material {}",
                    material_type
                ))
            })
    }

    // ------------------------------------------------------------------
    // Scanned items
    // ------------------------------------------------------------------

    /// Record one scanned item's weight into an open batch.
    ///
    /// Finds or creates an open batch for the material inside the trailing
    /// collection window, accumulates the user's contribution, and auto-links
    /// the batch to a project once the threshold is reached. Conflicts are
    /// retried a bounded number of times before surfacing.
    pub async fn record_scanned_item(
        &self,
        user_id: &UserId,
        material_type: &str,
        weight_grams: Option<Decimal>,
    ) -> Result<ItemRecord> {
        let mut attempt = 0;
        loop {
            match self
                .record_scanned_item_inner(user_id, material_type, weight_grams)
                .await
            {
                Err(e) if e.is_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, material_type, "Conflict recording item; retrying");
                }
                other => return other,
            }
        }
    }

    async fn record_scanned_item_inner(
        &self,
        user_id: &UserId,
        material_type: &str,
        weight_grams: Option<Decimal>,
    ) -> Result<ItemRecord> {
        validate_label("user_id", user_id.as_str())?;
        validate_label("material_type", material_type)?;

        let weight = match weight_grams {
            Some(w) => w,
            None => self
                .weights
                .average_weight_grams(material_type)
                .unwrap_or(self.config.default_item_weight_grams),
        };
        if weight <= Decimal::ZERO {
            return Err(Error::Validation("weight must be positive".into()));
        }

        let _material_guard = self.lock_material(material_type).await?;
        let now = Utc::now();

        // Most recent open batch for this material inside the window
        let window_start = now - ChronoDuration::days(self.config.batch_window_days);
        let mut batch = self
            .ledger
            .batches_for_material(material_type)?
            .into_iter()
            .filter(|b| b.is_open() && b.collection_date >= window_start)
            .max_by_key(|b| b.collection_date)
            .map(|mut b| {
                b.total_weight_grams += weight;
                b
            })
            .unwrap_or_else(|| Batch::new(material_type, weight, now));

        let contribution = match self.ledger.get_contribution(&batch.batch_id, user_id)? {
            Some(mut existing) => {
                existing.weight_grams += weight;
                existing
            }
            None => Contribution {
                user_id: user_id.clone(),
                batch_id: batch.batch_id.clone(),
                weight_grams: weight,
                contribution_date: now,
                is_top_contributor: false,
            },
        };

        let mut linked_project_id = None;

        if batch.total_weight_grams >= self.config.batch_threshold_grams && batch.is_open() {
            if let Some(project) = self.find_project_for(material_type)? {
                match self
                    .link_batch(
                        batch.clone(),
                        &project.project_id,
                        user_id.as_str(),
                        true,
                        vec![contribution.clone()],
                    )
                    .await
                {
                    Ok(_) => {
                        batch = self.ledger.get_batch(&batch.batch_id)?;
                        linked_project_id = Some(project.project_id);
                    }
                    // The project filled up or closed between lookup and lock;
                    // keep the weight, leave the batch pending
                    Err(Error::Validation(reason)) => {
                        tracing::debug!(reason = %reason, "Auto-link skipped");
                        self.ledger.commit_state(StateUpdates {
                            batches: vec![batch.clone()],
                            contributions: vec![contribution.clone()],
                            ..Default::default()
                        })?;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                self.ledger.commit_state(StateUpdates {
                    batches: vec![batch.clone()],
                    contributions: vec![contribution.clone()],
                    ..Default::default()
                })?;
            }
        } else {
            self.ledger.commit_state(StateUpdates {
                batches: vec![batch.clone()],
                contributions: vec![contribution.clone()],
                ..Default::default()
            })?;
        }

        tracing::debug!(
            user_id = %user_id,
            material_type,
            weight = %weight,
            batch_id = %batch.batch_id,
            "Item recorded"
        );

        Ok(ItemRecord {
            batch_id: batch.batch_id.clone(),
            material_type: material_type.to_string(),
            weight_added_grams: weight,
            batch_total_grams: batch.total_weight_grams,
            linked_project_id,
        })
    }

    // ------------------------------------------------------------------
    // Project matching and allocation
    // ------------------------------------------------------------------

    /// Pick the project that should absorb a finished batch.
    ///
    /// Oldest planned/in-progress project with an unmet requirement wins;
    /// failing that, the oldest planned project. Matching does not consider
    /// the material type: any open project absorbs any recycled material.
    pub fn find_project_for(&self, material_type: &str) -> Result<Option<Project>> {
        let projects = self.ledger.projects_in_creation_order()?;

        tracing::debug!(material_type, "Selecting project for batch");

        if let Some(project) = projects
            .iter()
            .find(|p| p.accepts_material() && p.has_unmet_requirement())
        {
            return Ok(Some(project.clone()));
        }

        Ok(projects
            .into_iter()
            .find(|p| p.status == ProjectStatus::Planned))
    }

    /// Link a batch to a project by ID.
    ///
    /// Re-linking an already-allocated batch is rejected, never double
    /// counted. Conflicts are retried a bounded number of times.
    pub async fn link_batch_to_project(
        &self,
        batch_id: &BatchId,
        project_id: &ProjectId,
        verified_by: &str,
    ) -> Result<Entry> {
        let mut attempt = 0;
        loop {
            match self
                .link_batch_to_project_inner(batch_id, project_id, verified_by)
                .await
            {
                Err(e) if e.is_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, batch_id = %batch_id, "Conflict linking batch; retrying");
                }
                other => return other,
            }
        }
    }

    async fn link_batch_to_project_inner(
        &self,
        batch_id: &BatchId,
        project_id: &ProjectId,
        verified_by: &str,
    ) -> Result<Entry> {
        validate_label("verified_by", verified_by)?;

        let material_type = self.ledger.get_batch(batch_id)?.material_type;
        let _material_guard = self.lock_material(&material_type).await?;

        // Re-read under the lock; a concurrent writer may have linked it
        let batch = self.ledger.get_batch(batch_id)?;
        self.link_batch(batch, project_id, verified_by, false, vec![])
            .await
    }

    /// Allocate a batch to a project: one atomic unit covering the batch
    /// transition, the allocation counter, and the ledger entry.
    async fn link_batch(
        &self,
        mut batch: Batch,
        project_id: &ProjectId,
        verified_by: &str,
        auto_linked: bool,
        contributions: Vec<Contribution>,
    ) -> Result<Entry> {
        if !batch.is_open() {
            return Err(Error::Validation(format!(
                "Batch {} is already allocated",
                batch.batch_id
            )));
        }

        let lock = self.ledger.lock_project(project_id).await?;
        let mut project = self.ledger.get_project(project_id)?;

        if !project.accepts_material() {
            return Err(Error::Validation(format!(
                "Project {} no longer accepts material",
                project_id
            )));
        }

        let now = Utc::now();
        batch.status = ledger_core::BatchStatus::Allocated;
        batch.linked_project_id = Some(project_id.clone());
        batch.processing_date = Some(now);

        project.allocated_grams += batch.total_weight_grams;
        if project.status == ProjectStatus::Planned
            && project.allocated_grams >= start_threshold(project.required_grams)
        {
            project.status = ProjectStatus::InProgress;
            if project.date_started.is_none() {
                project.date_started = Some(now);
            }
        }

        let mut payload = Payload::new();
        payload.insert("action".into(), "allocated".into());
        payload.insert("batch_id".into(), batch.batch_id.as_str().into());
        payload.insert("project_id".into(), project_id.as_str().into());
        payload.insert("verified_by".into(), verified_by.into());
        payload.insert(
            "weight".into(),
            PayloadValue::Number(batch.total_weight_grams),
        );
        payload.insert("material_type".into(), batch.material_type.as_str().into());
        payload.insert("auto_linked".into(), PayloadValue::Bool(auto_linked));

        let request = AppendRequest {
            project_id: project_id.clone(),
            status: EntryStatus::Allocated,
            verified_by: verified_by.to_string(),
            batch_reference: Some(batch.batch_id.clone()),
            payload,
        };

        let updates = StateUpdates {
            project: Some(project),
            batches: vec![batch.clone()],
            contributions,
        };

        let entry = self.ledger.append_entry_locked(request, updates, &lock)?;
        self.ledger.metrics().record_batch_linked();

        // Still under the project lock: ranking must not interleave with
        // another allocation for the same project
        ranking::recompute(&self.ledger, project_id)?;

        drop(lock);
        self.mirror.dispatch(&entry);

        tracing::info!(
            batch_id = %batch.batch_id,
            project_id = %project_id,
            weight = %batch.total_weight_grams,
            auto_linked,
            "Batch allocated to project"
        );

        Ok(entry)
    }

    /// Sweep all pending batches and link any that reached the threshold.
    ///
    /// Returns the number of batches linked. Intended for periodic callers.
    pub async fn process_pending_batches(&self) -> Result<usize> {
        let pending: Vec<Batch> = self
            .ledger
            .all_batches()?
            .into_iter()
            .filter(|b| b.is_open() && b.total_weight_grams >= self.config.batch_threshold_grams)
            .collect();

        let mut linked = 0;
        for stale in pending {
            let _material_guard = self.lock_material(&stale.material_type).await?;
            let batch = self.ledger.get_batch(&stale.batch_id)?;
            if !batch.is_open() {
                continue;
            }

            let Some(project) = self.find_project_for(&batch.material_type)? else {
                continue;
            };

            match self
                .link_batch(batch, &project.project_id, "system", true, vec![])
                .await
            {
                Ok(_) => linked += 1,
                Err(Error::Validation(reason)) => {
                    tracing::debug!(reason = %reason, "Pending batch skipped");
                }
                Err(e) => return Err(e),
            }
        }

        if linked > 0 {
            tracing::info!(linked, "Pending batches allocated");
        }
        Ok(linked)
    }

    // ------------------------------------------------------------------
    // Project lifecycle
    // ------------------------------------------------------------------

    /// Create a new project in `Planned` state
    pub async fn create_project(
        &self,
        name: &str,
        required_grams: Decimal,
        project_type: Option<String>,
    ) -> Result<Project> {
        Ok(self
            .ledger
            .create_project(name, required_grams, project_type)
            .await?)
    }

    /// Mark a project completed: closes its batches and appends the final
    /// `completed` entry in one atomic unit.
    pub async fn complete_project(
        &self,
        project_id: &ProjectId,
        verified_by: &str,
    ) -> Result<Entry> {
        let mut attempt = 0;
        loop {
            match self.complete_project_inner(project_id, verified_by).await {
                Err(e) if e.is_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, project_id = %project_id, "Conflict completing; retrying");
                }
                other => return other,
            }
        }
    }

    async fn complete_project_inner(
        &self,
        project_id: &ProjectId,
        verified_by: &str,
    ) -> Result<Entry> {
        validate_label("verified_by", verified_by)?;

        let lock = self.ledger.lock_project(project_id).await?;
        let mut project = self.ledger.get_project(project_id)?;

        if project.status == ProjectStatus::Completed {
            return Err(Error::Validation(format!(
                "Project {} is already completed",
                project_id
            )));
        }

        let now = Utc::now();
        project.status = ProjectStatus::Completed;
        project.date_completed = Some(now);

        let batches: Vec<Batch> = self
            .ledger
            .batches_for_project(project_id)?
            .into_iter()
            .map(|mut b| {
                b.status = ledger_core::BatchStatus::Completed;
                b
            })
            .collect();

        let mut payload = Payload::new();
        payload.insert("action".into(), "completed".into());
        payload.insert("project_id".into(), project_id.as_str().into());
        payload.insert("verified_by".into(), verified_by.into());
        payload.insert(
            "allocated_grams".into(),
            PayloadValue::Number(project.allocated_grams),
        );

        let request = AppendRequest {
            project_id: project_id.clone(),
            status: EntryStatus::Completed,
            verified_by: verified_by.to_string(),
            batch_reference: None,
            payload,
        };

        let updates = StateUpdates {
            project: Some(project),
            batches,
            contributions: vec![],
        };

        let entry = self.ledger.append_entry_locked(request, updates, &lock)?;
        drop(lock);
        self.mirror.dispatch(&entry);

        tracing::info!(project_id = %project_id, "Project completed");

        Ok(entry)
    }

    /// Recompute the top-contributor flags for a project
    pub async fn recompute_top_contributors(&self, project_id: &ProjectId) -> Result<usize> {
        let lock = self.ledger.lock_project(project_id).await?;
        // Touch the project so an unknown ID surfaces as NotFound
        self.ledger.get_project(project_id)?;
        let flagged = ranking::recompute(&self.ledger, project_id)?;
        drop(lock);
        Ok(flagged)
    }

    // ------------------------------------------------------------------
    // External interface
    // ------------------------------------------------------------------

    /// Append an arbitrary ledger entry and mirror it
    pub async fn append_entry(&self, request: AppendRequest) -> Result<Entry> {
        let entry = self.ledger.append_entry(request).await?;
        self.mirror.dispatch(&entry);
        Ok(entry)
    }

    /// Chain view with per-block validity flags
    pub fn get_chain(&self, project_id: &ProjectId) -> Result<Vec<ChainBlock>> {
        Ok(self.ledger.get_chain(project_id)?)
    }

    /// Whether the whole chain verifies
    pub fn verify_chain(&self, project_id: &ProjectId) -> Result<bool> {
        Ok(self.ledger.verify_chain(project_id)?)
    }

    /// A user's contributions with each one's downstream journey attached,
    /// newest first
    pub fn get_user_contribution_chain(&self, user_id: &UserId) -> Result<Vec<ContributionChain>> {
        let contributions = self.ledger.contributions_for_user(user_id)?;

        let mut chains = Vec::new();
        for contribution in contributions {
            let batch = match self.ledger.get_batch(&contribution.batch_id) {
                Ok(batch) => batch,
                Err(ledger_core::Error::BatchNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let (project, chain) = match &batch.linked_project_id {
                Some(project_id) => {
                    let project = self.ledger.get_project(project_id)?;
                    let chain = self.ledger.get_chain(project_id)?;
                    (Some(ProjectSummary::from(&project)), Some(chain))
                }
                None => (None, None),
            };

            chains.push(ContributionChain {
                user_id: contribution.user_id.clone(),
                weight_grams: contribution.weight_grams,
                contribution_date: contribution.contribution_date,
                is_top_contributor: contribution.is_top_contributor,
                batch: BatchSummary::from(&batch),
                project,
                chain,
            });
        }

        chains.sort_by(|a, b| b.contribution_date.cmp(&a.contribution_date));
        Ok(chains)
    }
}

impl std::fmt::Debug for MaterialFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialFlow")
            .field("ledger", &self.ledger)
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

/// Reject empty labels and embedded NUL (reserved as storage key delimiter)
fn validate_label(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
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
