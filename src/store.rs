//! Terrain persistence: the on-disk record schema and storage backends.
//!
//! One record per terrain, JSON encoded.  Collections are written in sorted
//! order so identical terrains always encode to identical bytes, which the
//! save cycle relies on to skip unchanged writes.

use crate::error::PersistError;
use crate::flags::FlagRegistry;
use crate::terrain::{Terrain, TerrainKind};
use crate::types::{ActorId, Coordinate, TerrainLimits, WorldId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Record schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagEntry {
    pub id: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerrainRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub world: WorldId,
    #[serde(default)]
    pub kind: TerrainKind,
    #[serde(default)]
    pub priority: i32,
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moderators: Vec<ActorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ActorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<FlagEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub member_flags: BTreeMap<ActorId, Vec<FlagEntry>>,
}

fn sorted_entries(flags: &HashMap<String, Value>) -> Vec<FlagEntry> {
    let mut entries: Vec<FlagEntry> = flags
        .iter()
        .map(|(id, value)| FlagEntry {
            id: id.clone(),
            value: value.clone(),
        })
        .collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries
}

impl TerrainRecord {
    pub fn capture(terrain: &Terrain) -> Self {
        let state = terrain.state();
        let mut moderators: Vec<ActorId> = state.moderators.iter().copied().collect();
        moderators.sort();
        let mut members: Vec<ActorId> = state.members.iter().copied().collect();
        members.sort();

        Self {
            id: terrain.id(),
            name: state.name.clone(),
            description: state.description.clone(),
            created: terrain.creation_date(),
            world: terrain.world(),
            kind: terrain.kind(),
            priority: state.priority,
            min_x: state.min.x,
            min_y: state.min.y,
            min_z: state.min.z,
            max_x: state.max.x,
            max_y: state.max.y,
            max_z: state.max.z,
            owner: state.owner,
            moderators,
            members,
            flags: sorted_entries(&state.flags),
            member_flags: state
                .member_flags
                .iter()
                .filter(|(_, flags)| !flags.is_empty())
                .map(|(member, flags)| (*member, sorted_entries(flags)))
                .collect(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PersistError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Rebuild the terrain.  Flag entries that do not fit their registered
    /// flag are dropped; the second value counts them.
    pub fn restore(
        self,
        registry: &FlagRegistry,
        limits: TerrainLimits,
    ) -> Result<(Terrain, usize), PersistError> {
        let bounds = [
            self.min_x, self.min_y, self.min_z, self.max_x, self.max_y, self.max_z,
        ];
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(PersistError::Invalid {
                reason: format!("terrain {} has non-finite bounds", self.id),
            });
        }

        let terrain = Terrain::restored(
            self.id,
            self.world,
            self.kind,
            self.created,
            limits,
            Coordinate::new(self.min_x, self.min_y, self.min_z),
            Coordinate::new(self.max_x, self.max_y, self.max_z),
        );

        let id = self.id;
        let mut dropped = 0;
        let mut keep = |entries: Vec<FlagEntry>| -> HashMap<String, Value> {
            entries
                .into_iter()
                .filter(|entry| match registry.get(&entry.id) {
                    Some(flag) if !flag.accepts(&entry.value) => {
                        warn!(
                            "Dropping flag {} of terrain {}: value does not fit a {} flag",
                            entry.id,
                            id,
                            flag.data_type()
                        );
                        dropped += 1;
                        false
                    }
                    _ => true,
                })
                .map(|entry| (entry.id, entry.value))
                .collect()
        };

        let flags = keep(self.flags);
        let member_flags: HashMap<ActorId, HashMap<String, Value>> = self
            .member_flags
            .into_iter()
            .map(|(member, entries)| (member, keep(entries)))
            .filter(|(_, flags)| !flags.is_empty())
            .collect();

        {
            let mut state = terrain.state_mut();
            state.name = self.name;
            state.description = self.description;
            state.priority = self.priority;
            state.owner = self.owner;
            state.moderators = self.moderators.into_iter().collect();
            state.members = self.members.into_iter().collect();
            state.flags = flags;
            state.member_flags = member_flags;
        }

        Ok((terrain, dropped))
    }
}

// ---------------------------------------------------------------------------
// Storage backends
// ---------------------------------------------------------------------------

/// Where terrain records live.  Records are addressed by key when reading
/// (whatever `list` returns) and by terrain id when writing.
pub trait TerrainStore: Send + Sync {
    fn list(&self) -> Result<Vec<String>, PersistError>;
    fn read(&self, key: &str) -> Result<Bytes, PersistError>;
    fn write(&self, id: Uuid, data: Bytes) -> Result<(), PersistError>;
    /// Deleting a missing record succeeds.
    fn delete(&self, id: Uuid) -> Result<(), PersistError>;
    /// Move an unreadable record out of the way.
    fn quarantine(&self, key: &str) -> Result<(), PersistError>;
}

/// Suffix given to quarantined files.
pub const QUARANTINE_SUFFIX: &str = ".invalid";

/// One `<id>.json` file per terrain in a directory.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl TerrainStore for DirStore {
    fn list(&self) -> Result<Vec<String>, PersistError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read(&self, key: &str) -> Result<Bytes, PersistError> {
        Ok(Bytes::from(fs::read(self.dir.join(key))?))
    }

    fn write(&self, id: Uuid, data: Bytes) -> Result<(), PersistError> {
        atomic_write(&self.path_of(id), &data)?;
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), PersistError> {
        match fs::remove_file(self.path_of(id)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn quarantine(&self, key: &str) -> Result<(), PersistError> {
        let from = self.dir.join(key);
        let to = self.dir.join(format!("{key}{QUARANTINE_SUFFIX}"));
        fs::rename(from, to)?;
        Ok(())
    }
}

/// Write to `{path}.tmp`, sync, then rename over `path`.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Records kept in memory; quarantined keys are remembered.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Bytes>>,
    quarantined: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_of(id: Uuid) -> String {
        format!("{id}.json")
    }

    /// Put raw bytes under `key`, bypassing encoding.
    pub fn insert_raw(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.records.lock().insert(key.into(), data.into());
    }

    pub fn get(&self, id: Uuid) -> Option<Bytes> {
        self.records.lock().get(&Self::key_of(id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn quarantined(&self) -> Vec<String> {
        self.quarantined.lock().clone()
    }
}

impl TerrainStore for MemoryStore {
    fn list(&self) -> Result<Vec<String>, PersistError> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn read(&self, key: &str) -> Result<Bytes, PersistError> {
        self.records
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| PersistError::Io(ErrorKind::NotFound.into()))
    }

    fn write(&self, id: Uuid, data: Bytes) -> Result<(), PersistError> {
        self.records.lock().insert(Self::key_of(id), data);
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), PersistError> {
        self.records.lock().remove(&Self::key_of(id));
        Ok(())
    }

    fn quarantine(&self, key: &str) -> Result<(), PersistError> {
        if self.records.lock().remove(key).is_some() {
            self.quarantined.lock().push(key.to_string());
        }
        Ok(())
    }
}
