//! RegenWorks Material Flow
//!
//! Domain engine over the provenance ledger: accumulates scanned items into
//! material batches, attributes user contributions, auto-allocates full
//! batches to infrastructure projects, and keeps top-contributor flags
//! current. Every allocation appends a hash-linked entry to the project's
//! chain and replicates it, best-effort, to the external mirror.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod engine;
pub mod error;
pub mod ranking;
pub mod types;
pub mod weights;

// Re-exports
pub use config::{FlowConfig, MirrorConfig};
pub use engine::MaterialFlow;
pub use error::{Error, Result};
pub use types::{BatchSummary, ContributionChain, ItemRecord, ProjectSummary};
pub use weights::{StaticWeightTable, WeightEstimator};
