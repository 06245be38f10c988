//! Engine configuration.
//!
//! World shape, storage location and cache tuning. Loaded from and saved to
//! a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use strata_cache::CacheSettings;
use strata_common::MapId;
use strata_world::WorldShape;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "strata.toml";

/// Engine configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === World Settings ===
    /// Map identifier
    pub map_id: MapId,
    /// World edge lengths in blocks (x, y, z)
    pub dims: [u16; 3],
    /// Leaf chunk edge length in blocks
    pub chunk_size: u16,

    // === Storage Settings ===
    /// Directory holding persisted records
    pub data_dir: PathBuf,
    /// Knowledge document (None = no knowledge)
    pub knowledge_path: Option<PathBuf>,

    // === Cache Settings ===
    /// Cache sizes and timeouts
    pub cache: CacheSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            map_id: 0,
            dims: [64, 64, 32],
            chunk_size: 16,
            data_dir: PathBuf::from("strata-data"),
            knowledge_path: None,
            cache: CacheSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let mut contents = String::new();
        match fs::File::open(path) {
            Ok(mut file) => {
                if let Err(e) = file.read_to_string(&mut contents) {
                    warn!("Failed to read config file: {e}");
                    return Self::default();
                }
            },
            Err(e) => {
                warn!("Failed to open config file: {e}");
                return Self::default();
            },
        }

        match toml::from_str(&contents) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values to sensible ranges.
    ///
    /// Dimensions that do not split evenly into leaves are left alone;
    /// world construction reports them.
    pub fn validate(&mut self) {
        self.chunk_size = self.chunk_size.clamp(1, 1024);
        for dim in &mut self.dims {
            *dim = (*dim).max(1);
        }
        self.cache.validate();
    }

    /// Shape of the world described by this config.
    #[must_use]
    pub const fn world_shape(&self) -> WorldShape {
        WorldShape::new(self.map_id, self.dims, self.chunk_size)
    }
}
