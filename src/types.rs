//! Core geometry, identity and configuration types shared across all modules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier of an actor (player, plugin, console) acting on the world.
pub type ActorId = Uuid;

/// Identifier of a world.
pub type WorldId = Uuid;

/// Reserved actor id standing in for "no actor" (system / console).
pub const CONSOLE_ID: ActorId = Uuid::nil();

// ---------------------------------------------------------------------------
// Basic geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Componentwise minimum of two corners.
    pub fn min(self, other: Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Componentwise maximum of two corners.
    pub fn max(self, other: Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    pub fn chunk(&self) -> Chunk {
        Chunk::of(self.x, self.z)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Chunk grid
// ---------------------------------------------------------------------------

/// A 16x16 column of the world grid.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Chunk {
    pub x: i32,
    pub z: i32,
}

impl Chunk {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the block column at `(x, z)`.
    pub fn of(x: f64, z: f64) -> Self {
        Self::new((x.floor() as i64 >> 4) as i32, (z.floor() as i64 >> 4) as i32)
    }
}

impl std::fmt::Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.z)
    }
}

// ---------------------------------------------------------------------------
// World-qualified coordinate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorldCoordinate {
    pub world: WorldId,
    pub coordinate: Coordinate,
}

impl WorldCoordinate {
    pub fn new(world: WorldId, coordinate: Coordinate) -> Self {
        Self { world, coordinate }
    }

    pub fn at(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self::new(world, Coordinate::new(x, y, z))
    }
}

impl std::fmt::Display for WorldCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.coordinate, self.world)
    }
}

// ---------------------------------------------------------------------------
// Limits, stats & config
// ---------------------------------------------------------------------------

/// Caps on the derived geometry a terrain computes for itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerrainLimits {
    /// Borders are only traced for terrains with an area below this value.
    pub border_area_cap: u64,
    /// Terrains spanning more chunks than this keep an empty chunk set.
    pub chunk_cap: usize,
}

impl Default for TerrainLimits {
    fn default() -> Self {
        Self {
            border_area_cap: 100_000,
            chunk_cap: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub terrains: usize,
    pub worlds: usize,
    pub pending_saves: usize,
    pub pending_deletions: usize,
    /// Number of priority repositions performed since construction.
    pub repositions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Directory holding one file per terrain.
    pub data_dir: PathBuf,
    /// Delay between the first dirty mark and the save cycle, in milliseconds.
    pub save_delay_ms: u64,
    /// Derived-geometry caps applied to terrains built by the index.
    pub limits: TerrainLimits,
    /// Flags stamped onto every terrain built by the index, as flag name to
    /// input text (`build = "false"`).
    pub default_flags: BTreeMap<String, String>,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("terrains"),
            save_delay_ms: 2000,
            limits: TerrainLimits::default(),
            default_flags: BTreeMap::from([
                ("build".to_string(), "false".to_string()),
                ("containers".to_string(), "false".to_string()),
            ]),
        }
    }
}

impl ClaimsConfig {
    /// `CLAIMS_` variables; nested keys use `__` (`CLAIMS_LIMITS__CHUNK_CAP`).
    pub fn env_source() -> config::Environment {
        config::Environment::with_prefix("CLAIMS")
            .prefix_separator("_")
            .separator("__")
    }

    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::layered(file, Self::env_source())
    }

    /// Like [`ClaimsConfig::load`] with an explicit environment source.
    pub fn layered(
        file: Option<&Path>,
        env: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder.add_source(env).build()?.try_deserialize()
    }
}
