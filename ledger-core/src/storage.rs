//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only entry log (key: project_id \0 sequence_no)
//! - `heads` - Chain head per project (key: project_id)
//! - `projects` - Project aggregates (key: project_id)
//! - `batches` - Material batches (key: batch_id)
//! - `contributions` - User shares (key: batch_id \0 user_id)
//! - `indices` - Secondary indices for ordered scans
//! - `meta` - Counters (project creation sequence)
//!
//! Entry keys embed a big-endian sequence number so a forward prefix scan
//! yields a project's history oldest first. Identifiers are rejected upstream
//! if they contain NUL, which keeps the `\0` delimiter unambiguous.

use crate::{
    error::{Error, Result},
    types::{Batch, BatchId, Contribution, Entry, Project, ProjectId, UserId},
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_HEADS: &str = "heads";
const CF_PROJECTS: &str = "projects";
const CF_BATCHES: &str = "batches";
const CF_CONTRIBUTIONS: &str = "contributions";
const CF_INDICES: &str = "indices";
const CF_META: &str = "meta";

/// Index key prefixes
const IDX_MATERIAL: u8 = b'm';
const IDX_USER: u8 = b'u';
const IDX_PROJECT_BATCH: u8 = b'b';
const IDX_PROJECT_ORDER: u8 = b'p';

/// Meta keys
const META_PROJECT_SEQ: &[u8] = b"project_seq";

/// Chain head for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Head {
    /// Sequence number of the newest entry
    pub sequence_no: u64,

    /// Hash of the newest entry
    pub hash: String,

    /// Timestamp of the newest entry (floor for the next append)
    pub timestamp: DateTime<Utc>,
}

/// Aggregate mutations committed atomically alongside an entry append.
///
/// Either everything in the set persists together with the entry, or nothing
/// does.
#[derive(Debug, Default)]
pub struct StateUpdates {
    /// Project aggregate to upsert
    pub project: Option<Project>,

    /// Batches to upsert
    pub batches: Vec<Batch>,

    /// Contributions to upsert
    pub contributions: Vec<Contribution>,
}

impl StateUpdates {
    /// No aggregate mutations
    pub fn none() -> Self {
        Self::default()
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the write-heavy append log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_HEADS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_PROJECTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_BATCHES, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_CONTRIBUTIONS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_hot()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read aggregates, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn entry_key(project_id: &ProjectId, sequence_no: u64) -> Vec<u8> {
        let mut key = project_id.as_str().as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(&sequence_no.to_be_bytes());
        key
    }

    fn entry_prefix(project_id: &ProjectId) -> Vec<u8> {
        let mut key = project_id.as_str().as_bytes().to_vec();
        key.push(0);
        key
    }

    fn contribution_key(batch_id: &BatchId, user_id: &UserId) -> Vec<u8> {
        let mut key = batch_id.as_str().as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(user_id.as_str().as_bytes());
        key
    }

    fn index_key(tag: u8, first: &[u8], second: &[u8]) -> Vec<u8> {
        let mut key = vec![tag, 0];
        key.extend_from_slice(first);
        key.push(0);
        key.extend_from_slice(second);
        key
    }

    fn index_prefix(tag: u8, first: &[u8]) -> Vec<u8> {
        let mut key = vec![tag, 0];
        key.extend_from_slice(first);
        key.push(0);
        key
    }

    /// Forward scan of all `(key, value)` pairs under a prefix
    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    // Entry operations

    /// Get chain head for a project
    pub fn head(&self, project_id: &ProjectId) -> Result<Option<Head>> {
        let cf = self.cf_handle(CF_HEADS)?;
        match self.db.get_cf(cf, project_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get entry by project and sequence number
    pub fn entry(&self, project_id: &ProjectId, sequence_no: u64) -> Result<Entry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let key = Self::entry_key(project_id, sequence_no);

        let value = self.db.get_cf(cf, &key)?.ok_or_else(|| {
            Error::EntryNotFound(format!("{}#{}", project_id, sequence_no))
        })?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Full history for a project, oldest first
    pub fn history(&self, project_id: &ProjectId) -> Result<Vec<Entry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = Self::entry_prefix(project_id);

        let mut entries = Vec::new();
        for (_, value) in self.scan_prefix(cf, &prefix)? {
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Newest entry for a project, if any
    pub fn latest_entry(&self, project_id: &ProjectId) -> Result<Option<Entry>> {
        match self.head(project_id)? {
            Some(head) => Ok(Some(self.entry(project_id, head.sequence_no)?)),
            None => Ok(None),
        }
    }

    /// Commit an optional entry and a set of aggregate mutations atomically.
    ///
    /// The entry write also advances the project's chain head. Secondary
    /// indices are derived from the records and written in the same batch.
    pub fn commit(&self, entry: Option<&Entry>, updates: &StateUpdates) -> Result<()> {
        let mut batch = WriteBatch::default();

        if let Some(entry) = entry {
            let cf_entries = self.cf_handle(CF_ENTRIES)?;
            let key = Self::entry_key(&entry.project_id, entry.sequence_no);
            batch.put_cf(cf_entries, &key, bincode::serialize(entry)?);

            let cf_heads = self.cf_handle(CF_HEADS)?;
            let head = Head {
                sequence_no: entry.sequence_no,
                hash: entry.hash.clone(),
                timestamp: entry.timestamp,
            };
            batch.put_cf(
                cf_heads,
                entry.project_id.as_str().as_bytes(),
                bincode::serialize(&head)?,
            );
        }

        if let Some(project) = &updates.project {
            let cf_projects = self.cf_handle(CF_PROJECTS)?;
            batch.put_cf(
                cf_projects,
                project.project_id.as_str().as_bytes(),
                bincode::serialize(project)?,
            );

            // Creation-order index: seq -> project_id
            let cf_indices = self.cf_handle(CF_INDICES)?;
            let idx = Self::index_key(
                IDX_PROJECT_ORDER,
                &project.created_seq.to_be_bytes(),
                &[],
            );
            batch.put_cf(cf_indices, &idx, project.project_id.as_str().as_bytes());
        }

        let cf_indices = self.cf_handle(CF_INDICES)?;
        for b in &updates.batches {
            let cf_batches = self.cf_handle(CF_BATCHES)?;
            batch.put_cf(
                cf_batches,
                b.batch_id.as_str().as_bytes(),
                bincode::serialize(b)?,
            );

            let idx_material = Self::index_key(
                IDX_MATERIAL,
                b.material_type.as_bytes(),
                b.batch_id.as_str().as_bytes(),
            );
            batch.put_cf(cf_indices, &idx_material, &[]);

            if let Some(project_id) = &b.linked_project_id {
                let idx_project = Self::index_key(
                    IDX_PROJECT_BATCH,
                    project_id.as_str().as_bytes(),
                    b.batch_id.as_str().as_bytes(),
                );
                batch.put_cf(cf_indices, &idx_project, &[]);
            }
        }

        for c in &updates.contributions {
            let cf_contrib = self.cf_handle(CF_CONTRIBUTIONS)?;
            let key = Self::contribution_key(&c.batch_id, &c.user_id);
            batch.put_cf(cf_contrib, &key, bincode::serialize(c)?);

            let idx_user = Self::index_key(
                IDX_USER,
                c.user_id.as_str().as_bytes(),
                c.batch_id.as_str().as_bytes(),
            );
            batch.put_cf(cf_indices, &idx_user, &[]);
        }

        self.db.write(batch)?;

        Ok(())
    }

    /// Raw overwrite of an entry record, bypassing chain-head maintenance.
    ///
    /// The ledger never calls this; it exists for audit tooling that needs to
    /// reproduce corruption scenarios against a real store.
    pub fn put_entry_raw(&self, entry: &Entry) -> Result<()> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let key = Self::entry_key(&entry.project_id, entry.sequence_no);
        self.db.put_cf(cf, &key, bincode::serialize(entry)?)?;
        Ok(())
    }

    // Project operations

    /// Get project by ID
    pub fn get_project(&self, project_id: &ProjectId) -> Result<Project> {
        let cf = self.cf_handle(CF_PROJECTS)?;
        let value = self
            .db
            .get_cf(cf, project_id.as_str().as_bytes())?
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All projects, oldest creation first
    pub fn projects_in_creation_order(&self) -> Result<Vec<Project>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = vec![IDX_PROJECT_ORDER, 0];

        let mut projects = Vec::new();
        for (_, value) in self.scan_prefix(cf_indices, &prefix)? {
            let project_id = ProjectId::new(String::from_utf8_lossy(&value).into_owned());
            projects.push(self.get_project(&project_id)?);
        }
        Ok(projects)
    }

    /// Allocate the next project creation sequence number.
    ///
    /// Not atomic on its own; callers serialize project creation.
    pub fn next_project_seq(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        let next = match self.db.get_cf(cf, META_PROJECT_SEQ)? {
            Some(value) => bincode::deserialize::<u64>(&value)? + 1,
            None => 0,
        };
        self.db.put_cf(cf, META_PROJECT_SEQ, bincode::serialize(&next)?)?;
        Ok(next)
    }

    // Batch operations

    /// Get batch by ID
    pub fn get_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        let cf = self.cf_handle(CF_BATCHES)?;
        let value = self
            .db
            .get_cf(cf, batch_id.as_str().as_bytes())?
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Batches holding a given material type (via index)
    pub fn batches_for_material(&self, material_type: &str) -> Result<Vec<Batch>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix(IDX_MATERIAL, material_type.as_bytes());

        let mut batches = Vec::new();
        for (key, _) in self.scan_prefix(cf_indices, &prefix)? {
            let batch_id = BatchId::new(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
            batches.push(self.get_batch(&batch_id)?);
        }
        Ok(batches)
    }

    /// Batches linked to a given project (via index)
    pub fn batches_for_project(&self, project_id: &ProjectId) -> Result<Vec<Batch>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix(IDX_PROJECT_BATCH, project_id.as_str().as_bytes());

        let mut batches = Vec::new();
        for (key, _) in self.scan_prefix(cf_indices, &prefix)? {
            let batch_id = BatchId::new(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
            batches.push(self.get_batch(&batch_id)?);
        }
        Ok(batches)
    }

    /// Full scan of all batches
    pub fn all_batches(&self) -> Result<Vec<Batch>> {
        let cf = self.cf_handle(CF_BATCHES)?;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);

        let mut batches = Vec::new();
        for item in iter {
            let (_, value) = item?;
            batches.push(bincode::deserialize(&value)?);
        }
        Ok(batches)
    }

    // Contribution operations

    /// Get a user's contribution to a batch, if recorded
    pub fn get_contribution(
        &self,
        batch_id: &BatchId,
        user_id: &UserId,
    ) -> Result<Option<Contribution>> {
        let cf = self.cf_handle(CF_CONTRIBUTIONS)?;
        let key = Self::contribution_key(batch_id, user_id);
        match self.db.get_cf(cf, &key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All contributions to a batch
    pub fn contributions_for_batch(&self, batch_id: &BatchId) -> Result<Vec<Contribution>> {
        let cf = self.cf_handle(CF_CONTRIBUTIONS)?;
        let mut prefix = batch_id.as_str().as_bytes().to_vec();
        prefix.push(0);

        let mut contributions = Vec::new();
        for (_, value) in self.scan_prefix(cf, &prefix)? {
            contributions.push(bincode::deserialize(&value)?);
        }
        Ok(contributions)
    }

    /// All contributions by a user (via index)
    pub fn contributions_for_user(&self, user_id: &UserId) -> Result<Vec<Contribution>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix(IDX_USER, user_id.as_str().as_bytes());

        let mut contributions = Vec::new();
        for (key, _) in self.scan_prefix(cf_indices, &prefix)? {
            let batch_id = BatchId::new(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
            if let Some(c) = self.get_contribution(&batch_id, user_id)? {
                contributions.push(c);
            }
        }
        Ok(contributions)
    }

    // Statistics

    /// Get storage statistics (approximate where the engine allows)
    pub fn stats(&self) -> Result<StorageStats> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        let cf_projects = self.cf_handle(CF_PROJECTS)?;
        let cf_batches = self.cf_handle(CF_BATCHES)?;

        Ok(StorageStats {
            total_entries: self.approximate_count(cf_entries)?,
            total_projects: self.approximate_count(cf_projects)?,
            total_batches: self.approximate_count(cf_batches)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of ledger entries
    pub total_entries: u64,
    /// Approximate number of projects
    pub total_projects: u64,
    /// Approximate number of batches
    pub total_batches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain;
    use crate::types::{BatchStatus, EntryStatus, Payload, PayloadValue, ProjectStatus};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_entry(project_id: &ProjectId, sequence_no: u64, previous_hash: Option<String>) -> Entry {
        let mut payload = Payload::new();
        payload.insert("weight".into(), PayloadValue::Number(dec!(500)));

        let hash = chain::digest(&payload, previous_hash.as_deref());
        Entry {
            project_id: project_id.clone(),
            sequence_no,
            timestamp: Utc::now(),
            status: EntryStatus::Collected,
            verified_by: "system".to_string(),
            batch_reference: None,
            payload,
            previous_hash,
            hash,
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.head(&ProjectId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_commit_entry_advances_head() {
        let (storage, _temp) = test_storage();
        let project_id = ProjectId::new("proj_1");

        let entry = test_entry(&project_id, 0, None);
        storage.commit(Some(&entry), &StateUpdates::none()).unwrap();

        let head = storage.head(&project_id).unwrap().unwrap();
        assert_eq!(head.sequence_no, 0);
        assert_eq!(head.hash, entry.hash);

        let stored = storage.entry(&project_id, 0).unwrap();
        assert_eq!(stored.hash, entry.hash);
    }

    #[test]
    fn test_history_ordered_oldest_first() {
        let (storage, _temp) = test_storage();
        let project_id = ProjectId::new("proj_1");

        let mut prev: Option<String> = None;
        for seq in 0..5 {
            let entry = test_entry(&project_id, seq, prev.clone());
            prev = Some(entry.hash.clone());
            storage.commit(Some(&entry), &StateUpdates::none()).unwrap();
        }

        let history = storage.history(&project_id).unwrap();
        assert_eq!(history.len(), 5);
        for (i, entry) in history.iter().enumerate() {
            assert_eq!(entry.sequence_no, i as u64);
        }
    }

    #[test]
    fn test_history_does_not_leak_across_projects() {
        let (storage, _temp) = test_storage();
        let a = ProjectId::new("proj");
        let b = ProjectId::new("proj2");

        storage
            .commit(Some(&test_entry(&a, 0, None)), &StateUpdates::none())
            .unwrap();
        storage
            .commit(Some(&test_entry(&b, 0, None)), &StateUpdates::none())
            .unwrap();

        assert_eq!(storage.history(&a).unwrap().len(), 1);
        assert_eq!(storage.history(&b).unwrap().len(), 1);
    }

    #[test]
    fn test_batch_and_material_index() {
        let (storage, _temp) = test_storage();

        let batch = Batch::new("Plastic", dec!(400), Utc::now());
        let updates = StateUpdates {
            batches: vec![batch.clone()],
            ..Default::default()
        };
        storage.commit(None, &updates).unwrap();

        let found = storage.batches_for_material("Plastic").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].batch_id, batch.batch_id);
        assert!(storage.batches_for_material("Paper").unwrap().is_empty());
    }

    #[test]
    fn test_project_creation_order() {
        let (storage, _temp) = test_storage();

        for name in ["first", "second", "third"] {
            let seq = storage.next_project_seq().unwrap();
            let project = Project {
                project_id: ProjectId::generate(),
                name: name.to_string(),
                status: ProjectStatus::Planned,
                required_grams: dec!(10000),
                allocated_grams: dec!(0),
                project_type: None,
                created_seq: seq,
                created_at: Utc::now(),
                date_started: None,
                date_completed: None,
            };
            let updates = StateUpdates {
                project: Some(project),
                ..Default::default()
            };
            storage.commit(None, &updates).unwrap();
        }

        let projects = storage.projects_in_creation_order().unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_contribution_upsert_and_scans() {
        let (storage, _temp) = test_storage();

        let batch = Batch::new("Metal", dec!(100), Utc::now());
        let user = UserId::new("user_7");
        let contribution = Contribution {
            user_id: user.clone(),
            batch_id: batch.batch_id.clone(),
            weight_grams: dec!(100),
            contribution_date: Utc::now(),
            is_top_contributor: false,
        };

        let updates = StateUpdates {
            batches: vec![batch.clone()],
            contributions: vec![contribution.clone()],
            ..Default::default()
        };
        storage.commit(None, &updates).unwrap();

        let by_batch = storage.contributions_for_batch(&batch.batch_id).unwrap();
        assert_eq!(by_batch.len(), 1);

        let by_user = storage.contributions_for_user(&user).unwrap();
        assert_eq!(by_user.len(), 1);
        assert_eq!(by_user[0].weight_grams, dec!(100));
    }

    #[test]
    fn test_project_batch_index_written_on_link() {
        let (storage, _temp) = test_storage();
        let project_id = ProjectId::new("proj_1");

        let mut batch = Batch::new("Glass", dec!(1200), Utc::now());
        batch.status = BatchStatus::Allocated;
        batch.linked_project_id = Some(project_id.clone());

        let updates = StateUpdates {
            batches: vec![batch.clone()],
            ..Default::default()
        };
        storage.commit(None, &updates).unwrap();

        let linked = storage.batches_for_project(&project_id).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].batch_id, batch.batch_id);
    }
}
