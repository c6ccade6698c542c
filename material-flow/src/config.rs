//! Configuration for the material-flow engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Data directory for the underlying ledger
    pub ledger_data_dir: PathBuf,

    /// Batch weight at which auto-linking kicks in, grams
    pub batch_threshold_grams: Decimal,

    /// Trailing window in which an open batch still accumulates, days
    pub batch_window_days: i64,

    /// Weight assumed for an item when neither caller nor lookup knows it
    pub default_item_weight_grams: Decimal,

    /// How many times a conflicted operation is retried before surfacing
    pub max_conflict_retries: u32,

    /// How long a writer may wait on a material lock (milliseconds)
    pub material_lock_timeout_ms: u64,

    /// Mirror settings
    pub mirror: MirrorConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            ledger_data_dir: PathBuf::from("./data/ledger"),
            batch_threshold_grams: Decimal::new(1000, 0),
            batch_window_days: 7,
            default_item_weight_grams: Decimal::new(25, 0),
            max_conflict_retries: 3,
            material_lock_timeout_ms: 5_000,
            mirror: MirrorConfig::default(),
        }
    }
}

/// External mirror settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Whether entries are replicated at all
    pub enabled: bool,

    /// Document-store endpoint, e.g. `https://mirror.example.com`
    pub base_url: Option<String>,
}

impl FlowConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = FlowConfig::default();

        if let Ok(dir) = std::env::var("REGEN_LEDGER_DATA_DIR") {
            config.ledger_data_dir = PathBuf::from(dir);
        }

        if let Ok(url) = std::env::var("REGEN_MIRROR_URL") {
            config.mirror.enabled = true;
            config.mirror.base_url = Some(url);
        }

        Ok(config)
    }
}
