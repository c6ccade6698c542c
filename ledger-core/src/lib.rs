//! RegenWorks Ledger Core
//!
//! Append-only, hash-linked provenance ledger for recycling infrastructure
//! projects.
//!
//! # Architecture
//!
//! - **Hash Chain**: Every entry carries the digest of its predecessor
//! - **Single Writer Per Project**: A per-project lock serializes appends
//! - **Atomic Commits**: Entry + aggregate mutations land in one write batch
//! - **Verification**: The full chain can be re-checked offline at any time
//!
//! # Invariants
//!
//! - Append-only: entries are never modified or deleted
//! - Linkage: `entry[i].previous_hash == entry[i-1].hash` within a project
//! - Recomputation: `entry.hash` always equals the digest of its own
//!   canonical payload and `previous_hash`
//! - Sequencing: per-project sequence numbers are gapless and monotonic

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod canonical;
pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;
pub mod verifier;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{AppendRequest, Ledger, ProjectLock};
pub use storage::{StateUpdates, Storage};
pub use types::{
    Batch, BatchId, BatchStatus, ChainBlock, Contribution, Entry, EntryStatus, Payload,
    PayloadValue, Project, ProjectId, ProjectStatus, UserId,
};
