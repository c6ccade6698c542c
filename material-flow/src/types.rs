//! Result records returned by the flow engine

use chrono::{DateTime, Utc};
use ledger_core::{Batch, BatchId, BatchStatus, ChainBlock, Project, ProjectId, ProjectStatus, UserId};
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of recording one scanned item
#[derive(Debug, Clone, Serialize)]
pub struct ItemRecord {
    /// Batch the weight landed in
    pub batch_id: BatchId,

    /// Material type recorded
    pub material_type: String,

    /// Weight added by this item, grams
    pub weight_added_grams: Decimal,

    /// Batch total after the addition, grams
    pub batch_total_grams: Decimal,

    /// Project the batch was auto-linked to, if the threshold was crossed
    pub linked_project_id: Option<ProjectId>,
}

/// Compact batch view for contribution chains
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Batch identifier
    pub batch_id: BatchId,

    /// Material type label
    pub material_type: String,

    /// Accumulated weight, grams
    pub total_weight_grams: Decimal,

    /// Lifecycle status
    pub status: BatchStatus,
}

impl From<&Batch> for BatchSummary {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            material_type: batch.material_type.clone(),
            total_weight_grams: batch.total_weight_grams,
            status: batch.status,
        }
    }
}

/// Compact project view for contribution chains
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    /// Project identifier
    pub project_id: ProjectId,

    /// Human-readable name
    pub name: String,

    /// Lifecycle status
    pub status: ProjectStatus,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            project_id: project.project_id.clone(),
            name: project.name.clone(),
            status: project.status,
        }
    }
}

/// One contribution with its downstream journey attached
#[derive(Debug, Clone, Serialize)]
pub struct ContributionChain {
    /// Contributing user
    pub user_id: UserId,

    /// Accumulated weight, grams
    pub weight_grams: Decimal,

    /// First contribution timestamp
    pub contribution_date: DateTime<Utc>,

    /// Whether the user ranks in the project's top contributors
    pub is_top_contributor: bool,

    /// Batch the contribution went into
    pub batch: BatchSummary,

    /// Project the batch was allocated to, once linked
    pub project: Option<ProjectSummary>,

    /// The project's full chain view, once linked
    pub chain: Option<Vec<ChainBlock>>,
}
