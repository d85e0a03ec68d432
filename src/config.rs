use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for a terrain block, typically read from a project json file.
///
/// ```json
/// { "square_size": 4.0, "physics_rebuild_delay_ms": 250, "file": "terrain/island.ter" }
/// ```
///
/// Missing fields fall back to [`TerrainConfig::default`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TerrainConfig {
    /// World units between adjacent height samples.
    pub square_size: f32,
    /// Quiet period after the last edit before the collision shape is rebuilt.
    pub physics_rebuild_delay_ms: u64,
    /// Side length, in grid cells, of the smallest render cell.
    pub min_cell_size: u32,
    pub base_texture_size: u32,
    pub light_map_size: u32,
    pub file: Option<PathBuf>,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            square_size: 8.0,
            physics_rebuild_delay_ms: 500,
            min_cell_size: 64,
            base_texture_size: 1024,
            light_map_size: 256,
            file: None,
        }
    }
}

impl TerrainConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
