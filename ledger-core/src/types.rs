//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode for storage, canonical text for hashing)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for weights)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Project identifier (opaque string key, unique per deployment)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create new project ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random project ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Batch identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
    /// Create new batch ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random batch ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier (opaque foreign key supplied by the auth layer)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured entry payload: a key-sorted map of tagged values.
///
/// Sorted maps make the canonical rendering independent of insertion order.
pub type Payload = BTreeMap<String, PayloadValue>;

/// A single payload value.
///
/// Payloads carry arbitrary metadata (weight, material type, action) without a
/// fixed schema. Decimal is used for quantities so canonical rendering stays
/// exact; nested maps sort their keys recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PayloadValue {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Exact decimal quantity
    Number(Decimal),
    /// UTF-8 text
    Text(String),
    /// Ordered list
    List(Vec<PayloadValue>),
    /// Nested key-sorted map
    Map(BTreeMap<String, PayloadValue>),
}

impl PayloadValue {
    /// Interpret as a decimal quantity, if numeric
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            PayloadValue::Int(i) => Some(Decimal::from(*i)),
            PayloadValue::Number(d) => Some(*d),
            _ => None,
        }
    }

    /// Interpret as text, if textual
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PayloadValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Int(v)
    }
}

impl From<Decimal> for PayloadValue {
    fn from(v: Decimal) -> Self {
        PayloadValue::Number(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Text(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::Text(v)
    }
}

impl From<&PayloadValue> for serde_json::Value {
    fn from(v: &PayloadValue) -> Self {
        match v {
            PayloadValue::Null => serde_json::Value::Null,
            PayloadValue::Bool(b) => serde_json::Value::Bool(*b),
            PayloadValue::Int(i) => serde_json::Value::from(*i),
            PayloadValue::Number(d) => serde_json::Value::String(d.normalize().to_string()),
            PayloadValue::Text(s) => serde_json::Value::String(s.clone()),
            PayloadValue::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            PayloadValue::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Entry status vocabulary.
///
/// Open at the schema level (`Other` carries anything), closed at the business
/// level: the flow engine only ever writes the named variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Material collected into a batch
    Collected,
    /// Batch allocated to a project
    Allocated,
    /// Project construction underway
    InProgress,
    /// Project (or batch) finished
    Completed,
    /// Any other attested status
    Other(String),
}

impl EntryStatus {
    /// Status label as stored in mirrored documents
    pub fn as_str(&self) -> &str {
        match self {
            EntryStatus::Collected => "collected",
            EntryStatus::Allocated => "allocated",
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Completed => "completed",
            EntryStatus::Other(s) => s,
        }
    }

    /// Parse from a label (never fails; unknown labels become `Other`)
    pub fn from_str(s: &str) -> Self {
        match s {
            "collected" => EntryStatus::Collected,
            "allocated" => EntryStatus::Allocated,
            "in_progress" => EntryStatus::InProgress,
            "completed" => EntryStatus::Completed,
            other => EntryStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable, hash-linked record in a project's ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Project this entry belongs to
    pub project_id: ProjectId,

    /// Per-project sequence number (gapless, assigned at append)
    pub sequence_no: u64,

    /// Insertion timestamp (monotonic per project, ties broken by sequence)
    pub timestamp: DateTime<Utc>,

    /// Attested status
    pub status: EntryStatus,

    /// Attribution: a user identifier or `"system"`
    pub verified_by: String,

    /// Originating material batch, if any
    pub batch_reference: Option<BatchId>,

    /// Structured metadata covered by the hash
    pub payload: Payload,

    /// Digest of the immediately preceding entry, absent for the first
    pub previous_hash: Option<String>,

    /// Digest over this entry's canonical payload and `previous_hash`
    pub hash: String,
}

impl Entry {
    /// Recompute the digest from the stored payload and `previous_hash`.
    ///
    /// A mismatch with `self.hash` signals corruption or tampering.
    pub fn recompute_hash(&self) -> String {
        crate::chain::digest(&self.payload, self.previous_hash.as_deref())
    }
}

/// One block of the chain view returned to callers, with validity attached
#[derive(Debug, Clone, Serialize)]
pub struct ChainBlock {
    /// Zero-based position in the project's chain
    pub index: u64,

    /// Stored digest
    pub hash: String,

    /// Stored predecessor digest
    pub previous_hash: Option<String>,

    /// Insertion timestamp
    pub timestamp: DateTime<Utc>,

    /// Attested status
    pub status: EntryStatus,

    /// Attribution
    pub verified_by: String,

    /// Originating batch, if any
    pub batch_reference: Option<BatchId>,

    /// Structured metadata
    pub payload: Payload,

    /// Whether linkage and digest recomputation both hold for this block
    pub is_valid: bool,
}

/// Batch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Accumulating weight, not yet linked
    Collected,
    /// Being sorted/processed at a facility
    Processing,
    /// Linked to a project; tracked fields frozen
    Allocated,
    /// Consumed by a completed project
    Completed,
}

/// A mutable aggregate of collected material of one type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier
    pub batch_id: BatchId,

    /// Material type label (Plastic, Paper, Metal, ...)
    pub material_type: String,

    /// Accumulated weight in grams (exact)
    pub total_weight_grams: Decimal,

    /// Lifecycle status
    pub status: BatchStatus,

    /// Target project once allocated
    pub linked_project_id: Option<ProjectId>,

    /// When collection of this batch started
    pub collection_date: DateTime<Utc>,

    /// When the batch was allocated/processed
    pub processing_date: Option<DateTime<Utc>>,
}

impl Batch {
    /// Create a fresh collecting batch
    pub fn new(material_type: impl Into<String>, weight_grams: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            batch_id: BatchId::generate(),
            material_type: material_type.into(),
            total_weight_grams: weight_grams,
            status: BatchStatus::Collected,
            linked_project_id: None,
            collection_date: now,
            processing_date: None,
        }
    }

    /// Whether the batch can still accumulate weight
    pub fn is_open(&self) -> bool {
        self.status == BatchStatus::Collected && self.linked_project_id.is_none()
    }
}

/// Project lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    /// Announced, awaiting material
    Planned,
    /// Construction underway
    InProgress,
    /// Built
    Completed,
    /// Abandoned
    Cancelled,
}

/// An infrastructure project: the ledger's aggregation root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier
    pub project_id: ProjectId,

    /// Human-readable name
    pub name: String,

    /// Lifecycle status
    pub status: ProjectStatus,

    /// Total material weight required, grams
    pub required_grams: Decimal,

    /// Total material weight allocated so far, grams (never decreases)
    pub allocated_grams: Decimal,

    /// Kind of structure (bench, pavement_tile, planter, ...)
    pub project_type: Option<String>,

    /// Creation-order sequence, used as a deterministic tiebreak
    pub created_seq: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When construction started
    pub date_started: Option<DateTime<Utc>>,

    /// When construction finished
    pub date_completed: Option<DateTime<Utc>>,
}

impl Project {
    /// Whether the project can still absorb material
    pub fn accepts_material(&self) -> bool {
        matches!(self.status, ProjectStatus::Planned | ProjectStatus::InProgress)
    }

    /// Whether allocation has not yet met the requirement
    pub fn has_unmet_requirement(&self) -> bool {
        self.allocated_grams < self.required_grams
    }
}

/// A user's weight share of a batch.
///
/// At most one record per `(user, batch)` pair; repeat contributions
/// accumulate into `weight_grams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    /// Contributing user
    pub user_id: UserId,

    /// Batch contributed to
    pub batch_id: BatchId,

    /// Accumulated weight in grams
    pub weight_grams: Decimal,

    /// First contribution timestamp
    pub contribution_date: DateTime<Utc>,

    /// Whether this user ranks in the project's top contributors
    pub is_top_contributor: bool,
}
