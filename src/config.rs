use anyhow::{Context, Result};
use klyra_client::{CompanionConfig, ReconcilerConfig, SyncConfig};
use klyra_net::{BatcherConfig, NetworkConfig};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/klyra.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Render ticks per second; remote entities are interpolated at this rate.
    pub render_hz: u32,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Companion kind to equip after joining.
    pub pet: Option<String>,
    pub network: NetworkConfig,
    pub batcher: BatcherConfig,
    pub reconciler: ReconcilerConfig,
    pub companion: CompanionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            render_hz: 60,
            log_filter: None,
            pet: None,
            network: NetworkConfig::default(),
            batcher: BatcherConfig::default(),
            reconciler: ReconcilerConfig::default(),
            companion: CompanionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Read and parse `path`, failing on any error.
    pub fn read(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match Self::read(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("{err:#}. Using defaults");
                ClientConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    /// Sections the sync client consumes.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            batcher: self.batcher.clone(),
            reconciler: self.reconciler.clone(),
            companion: self.companion.clone(),
        }
    }
}
