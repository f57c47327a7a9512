//! The terrain (claim) entity.
//!
//! A [`Terrain`] is a cuboid over one world carrying ownership, relations, a
//! priority and flag overrides.  Terrains are shared as `Arc<Terrain>` and
//! mutate through interior locks; writes to one terrain are expected to be
//! serialized by the caller.
//!
//! ```text
//! Unmanaged ──(TerrainIndex::add)──▶ Managed ──(TerrainIndex::remove)──▶ Removed
//! ```
//!
//! Only managed terrains report mutations back to their index (dirty marks,
//! chunk reindexing, priority repositioning, flag hooks).

use crate::error::TerrainError;
use crate::flag::{AnyFlag, Flag, FlagValue};
use crate::index::IndexShared;
use crate::types::{ActorId, Chunk, Coordinate, TerrainLimits, WorldCoordinate, WorldId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Name given to whole-world terrains.
pub const WORLD_TERRAIN_NAME: &str = "__world__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerrainKind {
    /// A normal claim bounded by its diagonals.
    #[default]
    Bounded,
    /// Covers its whole world; sets world-wide defaults.
    ///
    /// Never overlaps, never substitutes flag defaults, and keeps its name,
    /// owner and bounds fixed.
    WorldWide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Owner,
    Moderator,
    Member,
}

pub(crate) enum Lifecycle {
    Unmanaged,
    Managed(Weak<IndexShared>),
    Removed,
}

pub(crate) struct TerrainState {
    pub(crate) min: Coordinate,
    pub(crate) max: Coordinate,
    pub(crate) owner: Option<ActorId>,
    pub(crate) moderators: HashSet<ActorId>,
    pub(crate) members: HashSet<ActorId>,
    pub(crate) priority: i32,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) flags: HashMap<String, Value>,
    pub(crate) member_flags: HashMap<ActorId, HashMap<String, Value>>,
    borders: Vec<Coordinate>,
    chunks: BTreeSet<Chunk>,
}

pub struct Terrain {
    id: Uuid,
    world: WorldId,
    kind: TerrainKind,
    created: DateTime<Utc>,
    limits: TerrainLimits,
    state: RwLock<TerrainState>,
    lifecycle: Mutex<Lifecycle>,
}

impl Terrain {
    /// A new bounded terrain spanning the two corners, in any order.
    pub fn new(first: Coordinate, second: Coordinate, world: WorldId) -> Self {
        Self::with_limits(first, second, world, TerrainLimits::default())
    }

    pub fn with_limits(
        first: Coordinate,
        second: Coordinate,
        world: WorldId,
        limits: TerrainLimits,
    ) -> Self {
        Self::restored(
            Uuid::new_v4(),
            world,
            TerrainKind::Bounded,
            Utc::now(),
            limits,
            first,
            second,
        )
    }

    /// The whole-world terrain of `world`.
    pub fn world_wide(world: WorldId) -> Self {
        let terrain = Self::restored(
            Uuid::new_v4(),
            world,
            TerrainKind::WorldWide,
            Utc::now(),
            TerrainLimits::default(),
            Coordinate::new(-f64::MAX, -f64::MAX, -f64::MAX),
            Coordinate::new(f64::MAX, f64::MAX, f64::MAX),
        );
        {
            let mut state = terrain.state.write();
            state.priority = i32::MAX;
            state.name = WORLD_TERRAIN_NAME.to_string();
        }
        terrain
    }

    /// Rebuild a terrain with a known identity (persistence).
    pub(crate) fn restored(
        id: Uuid,
        world: WorldId,
        kind: TerrainKind,
        created: DateTime<Utc>,
        limits: TerrainLimits,
        first: Coordinate,
        second: Coordinate,
    ) -> Self {
        let min = first.min(second);
        let max = first.max(second);
        let (borders, chunks) = derive_geometry(kind, &limits, min, max);
        Self {
            id,
            world,
            kind,
            created,
            limits,
            state: RwLock::new(TerrainState {
                min,
                max,
                owner: None,
                moderators: HashSet::new(),
                members: HashSet::new(),
                priority: 0,
                name: id.to_string(),
                description: None,
                flags: HashMap::new(),
                member_flags: HashMap::new(),
                borders,
                chunks,
            }),
            lifecycle: Mutex::new(Lifecycle::Unmanaged),
        }
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, TerrainState> {
        self.state.read()
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, TerrainState> {
        self.state.write()
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    pub fn kind(&self) -> TerrainKind {
        self.kind
    }

    pub fn is_world_wide(&self) -> bool {
        self.kind == TerrainKind::WorldWide
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn limits(&self) -> TerrainLimits {
        self.limits
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn is_managed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Managed(_))
    }

    pub fn is_removed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Removed)
    }

    /// Unmanaged → Managed.  Returns `false` from any other state.
    pub(crate) fn manage(&self, index: Weak<IndexShared>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Unmanaged) {
            return false;
        }
        *lifecycle = Lifecycle::Managed(index);
        true
    }

    pub(crate) fn retire(&self) {
        *self.lifecycle.lock() = Lifecycle::Removed;
    }

    fn index(&self) -> Option<Arc<IndexShared>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Managed(index) => index.upgrade(),
            _ => None,
        }
    }

    fn touch(&self) {
        if let Some(index) = self.index() {
            index.mark_dirty(self.id);
        }
    }

    fn ensure_bounded(&self, operation: &'static str) -> Result<(), TerrainError> {
        if self.is_world_wide() {
            return Err(TerrainError::WorldWideImmutable { operation });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bounds
    // -----------------------------------------------------------------------

    pub fn min_diagonal(&self) -> Coordinate {
        self.state.read().min
    }

    pub fn max_diagonal(&self) -> Coordinate {
        self.state.read().max
    }

    /// Resize to span the two corners, in any order.
    pub fn set_diagonals(&self, first: Coordinate, second: Coordinate) -> Result<(), TerrainError> {
        self.ensure_bounded("resize")?;
        let min = first.min(second);
        let max = first.max(second);

        let old_chunks = {
            let mut state = self.state.write();
            if state.min == min && state.max == max {
                return Ok(());
            }
            let (borders, chunks) = derive_geometry(self.kind, &self.limits, min, max);
            state.min = min;
            state.max = max;
            state.borders = borders;
            std::mem::replace(&mut state.chunks, chunks)
        };

        if let Some(index) = self.index() {
            index.reindex_chunks(self, &old_chunks);
            index.mark_dirty(self.id);
        }
        Ok(())
    }

    /// Ground-level outline, empty for terrains at or above the border cap.
    pub fn borders(&self) -> Vec<Coordinate> {
        self.state.read().borders.clone()
    }

    /// Chunks the bounds intersect, empty when above the chunk cap.
    pub fn chunks(&self) -> BTreeSet<Chunk> {
        self.state.read().chunks.clone()
    }

    /// Footprint in blocks; infinite for whole-world terrains.
    pub fn area(&self) -> f64 {
        if self.is_world_wide() {
            return f64::INFINITY;
        }
        let state = self.state.read();
        footprint(state.min, state.max)
    }

    pub fn is_within(&self, point: &Coordinate) -> bool {
        if self.is_world_wide() {
            return true;
        }
        let state = self.state.read();
        let (min, max) = (state.min, state.max);
        point.x >= min.x
            && point.x <= max.x
            && point.y >= min.y
            && point.y <= max.y
            && point.z >= min.z
            && point.z <= max.z
    }

    pub fn is_within_world(&self, point: &WorldCoordinate) -> bool {
        point.world == self.world && self.is_within(&point.coordinate)
    }

    /// AABB intersection; always `false` across worlds or for whole-world
    /// terrains.
    pub fn is_overlapping(&self, other: &Terrain) -> bool {
        if self.world != other.world || self.is_world_wide() || other.is_world_wide() {
            return false;
        }
        if std::ptr::eq(self, other) {
            return true;
        }
        let (a_min, a_max) = (self.min_diagonal(), self.max_diagonal());
        let (b_min, b_max) = (other.min_diagonal(), other.max_diagonal());
        a_min.x <= b_max.x
            && a_max.x >= b_min.x
            && a_min.y <= b_max.y
            && a_max.y >= b_min.y
            && a_min.z <= b_max.z
            && a_max.z >= b_min.z
    }

    // -----------------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------------

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), TerrainError> {
        self.ensure_bounded("rename")?;
        let name = name.into();
        {
            let mut state = self.state.write();
            if state.name == name {
                return Ok(());
            }
            state.name = name;
        }
        self.touch();
        Ok(())
    }

    pub fn description(&self) -> Option<String> {
        self.state.read().description.clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        {
            let mut state = self.state.write();
            if state.description == description {
                return;
            }
            state.description = description;
        }
        self.touch();
    }

    // -----------------------------------------------------------------------
    // Priority
    // -----------------------------------------------------------------------

    pub fn priority(&self) -> i32 {
        self.state.read().priority
    }

    /// Change the priority, repositioning this terrain in its index.
    pub fn set_priority(&self, priority: i32) {
        if self.priority() == priority {
            return;
        }
        match self.index() {
            Some(index) => {
                index.reposition(self, priority);
                index.mark_dirty(self.id);
            }
            None => self.store_priority(priority),
        }
    }

    pub(crate) fn store_priority(&self, priority: i32) {
        self.state.write().priority = priority;
    }

    // -----------------------------------------------------------------------
    // Ownership & relations
    // -----------------------------------------------------------------------

    /// `None` means owned by the console.
    pub fn owner(&self) -> Option<ActorId> {
        self.state.read().owner
    }

    pub fn set_owner(&self, owner: Option<ActorId>) -> Result<(), TerrainError> {
        self.ensure_bounded("change the owner of")?;
        {
            let mut state = self.state.write();
            if state.owner == owner {
                return Ok(());
            }
            state.owner = owner;
        }
        self.touch();
        Ok(())
    }

    pub fn moderators(&self) -> HashSet<ActorId> {
        self.state.read().moderators.clone()
    }

    pub fn members(&self) -> HashSet<ActorId> {
        self.state.read().members.clone()
    }

    pub fn add_moderator(&self, actor: ActorId) -> bool {
        self.edit_relations(|state| state.moderators.insert(actor))
    }

    pub fn remove_moderator(&self, actor: ActorId) -> bool {
        self.edit_relations(|state| state.moderators.remove(&actor))
    }

    pub fn add_member(&self, actor: ActorId) -> bool {
        self.edit_relations(|state| state.members.insert(actor))
    }

    pub fn remove_member(&self, actor: ActorId) -> bool {
        self.edit_relations(|state| state.members.remove(&actor))
    }

    fn edit_relations(&self, edit: impl FnOnce(&mut TerrainState) -> bool) -> bool {
        let changed = edit(&mut self.state.write());
        if changed {
            self.touch();
        }
        changed
    }

    /// Strongest relation `actor` holds on this terrain.
    pub fn relation_of(&self, actor: ActorId) -> Option<Relation> {
        let state = self.state.read();
        if state.owner == Some(actor) {
            Some(Relation::Owner)
        } else if state.moderators.contains(&actor) {
            Some(Relation::Moderator)
        } else if state.members.contains(&actor) {
            Some(Relation::Member)
        } else {
            None
        }
    }

    pub fn has_any_relation(&self, actor: ActorId) -> bool {
        self.relation_of(actor).is_some()
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    pub fn flags(&self) -> TerrainFlags<'_> {
        TerrainFlags {
            slot: FlagSlot {
                terrain: self,
                member: None,
            },
        }
    }

    /// Overrides scoped to one member.
    pub fn member_flags(&self, member: ActorId) -> MemberFlags<'_> {
        MemberFlags {
            slot: FlagSlot {
                terrain: self,
                member: Some(member),
            },
        }
    }

    /// Members holding at least one override.
    pub fn members_with_flags(&self) -> Vec<ActorId> {
        self.state.read().member_flags.keys().copied().collect()
    }
}

impl fmt::Debug for Terrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terrain")
            .field("id", &self.id)
            .field("world", &self.world)
            .field("kind", &self.kind)
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Flag views
// ---------------------------------------------------------------------------

/// One flag map on a terrain: the terrain's own, or a member's overrides.
#[derive(Clone, Copy)]
struct FlagSlot<'a> {
    terrain: &'a Terrain,
    member: Option<ActorId>,
}

impl FlagSlot<'_> {
    fn stored(&self, id: &str) -> Option<Value> {
        let state = self.terrain.state.read();
        match self.member {
            None => state.flags.get(id).cloned(),
            Some(member) => state.member_flags.get(&member)?.get(id).cloned(),
        }
    }

    fn snapshot(&self) -> HashMap<String, Value> {
        let state = self.terrain.state.read();
        match self.member {
            None => state.flags.clone(),
            Some(member) => state.member_flags.get(&member).cloned().unwrap_or_default(),
        }
    }

    fn put(&self, id: &str, value: Value) -> Result<Option<Value>, TerrainError> {
        let index = self.terrain.index();
        let value = match &index {
            Some(index) => index
                .hooks()
                .filter_flag_set(self.terrain, id, self.member, value)
                .ok_or_else(|| TerrainError::Cancelled {
                    flag: id.to_string(),
                })?,
            None => value,
        };

        let previous = {
            let mut state = self.terrain.state.write();
            match self.member {
                None => state.flags.insert(id.to_string(), value),
                Some(member) => state
                    .member_flags
                    .entry(member)
                    .or_default()
                    .insert(id.to_string(), value),
            }
        };

        if let Some(index) = index {
            index.mark_dirty(self.terrain.id);
        }
        Ok(previous)
    }

    fn remove(&self, id: &str) -> Result<Option<Value>, TerrainError> {
        if self.stored(id).is_none() {
            return Ok(None);
        }
        let index = self.terrain.index();
        if let Some(index) = &index {
            if !index
                .hooks()
                .allow_flag_unset(self.terrain, id, self.member)
            {
                return Err(TerrainError::Cancelled {
                    flag: id.to_string(),
                });
            }
        }

        let previous = {
            let mut state = self.terrain.state.write();
            match self.member {
                None => state.flags.remove(id),
                Some(member) => {
                    let overrides = state.member_flags.get_mut(&member);
                    let previous = overrides.and_then(|o| o.remove(id));
                    if state.member_flags.get(&member).is_some_and(HashMap::is_empty) {
                        state.member_flags.remove(&member);
                    }
                    previous
                }
            }
        };

        if let Some(index) = index {
            index.mark_dirty(self.terrain.id);
        }
        Ok(previous)
    }
}

/// Serialize `value` and insist it reads back as a `T`.  Non-finite
/// floats become `null`, which would otherwise be stored and then dropped
/// on the next load.
fn encode<T: FlagValue>(flag: &Flag<T>, value: &T) -> Result<Value, TerrainError> {
    let encoded = serde_json::to_value(value).map_err(|e| TerrainError::Unserializable {
        flag: flag.id().to_string(),
        reason: e.to_string(),
    })?;
    if flag.decode(&encoded).is_none() {
        return Err(TerrainError::Unserializable {
            flag: flag.id().to_string(),
            reason: format!("value does not survive encoding (became {encoded})"),
        });
    }
    Ok(encoded)
}

/// A terrain's own flags.  Unset flags read as their default, except on
/// whole-world terrains where unset stays unset.
pub struct TerrainFlags<'a> {
    slot: FlagSlot<'a>,
}

impl TerrainFlags<'_> {
    /// Store `value`, returning the previous one.  Fails without touching
    /// state when the value cannot be serialized or a hook cancels.
    pub fn put<T: FlagValue>(&self, flag: &Flag<T>, value: T) -> Result<Option<T>, TerrainError> {
        let previous = self.slot.put(flag.id(), encode(flag, &value)?)?;
        Ok(previous.and_then(|v| flag.decode(&v)))
    }

    /// Store an already encoded value for a type-erased flag.
    pub fn put_raw(&self, flag: &dyn AnyFlag, value: Value) -> Result<Option<Value>, TerrainError> {
        if !flag.accepts(&value) {
            return Err(TerrainError::Unserializable {
                flag: flag.id().to_string(),
                reason: format!("value does not fit a {} flag", flag.data_type()),
            });
        }
        self.slot.put(flag.id(), value)
    }

    pub fn get_data<T: FlagValue>(&self, flag: &Flag<T>) -> Option<T> {
        match self.slot.stored(flag.id()).and_then(|v| flag.decode(&v)) {
            Some(value) => Some(value),
            None if self.slot.terrain.is_world_wide() => None,
            None => Some(flag.default_value().clone()),
        }
    }

    /// The stored value only; `None` when unset or stored under another type.
    pub fn get_explicit<T: FlagValue>(&self, flag: &Flag<T>) -> Option<T> {
        self.slot.stored(flag.id()).and_then(|v| flag.decode(&v))
    }

    pub fn get_raw(&self, id: &str) -> Option<Value> {
        self.slot.stored(id)
    }

    pub fn is_set(&self, id: &str) -> bool {
        self.slot.stored(id).is_some()
    }

    pub fn remove<T: FlagValue>(&self, flag: &Flag<T>) -> Result<Option<T>, TerrainError> {
        Ok(self.slot.remove(flag.id())?.and_then(|v| flag.decode(&v)))
    }

    pub fn remove_raw(&self, id: &str) -> Result<Option<Value>, TerrainError> {
        self.slot.remove(id)
    }

    /// Copy of every stored flag.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.slot.snapshot()
    }
}

/// One member's overrides.  Lookups never fall back to a default.
pub struct MemberFlags<'a> {
    slot: FlagSlot<'a>,
}

impl MemberFlags<'_> {
    pub fn put<T: FlagValue>(&self, flag: &Flag<T>, value: T) -> Result<Option<T>, TerrainError> {
        let previous = self.slot.put(flag.id(), encode(flag, &value)?)?;
        Ok(previous.and_then(|v| flag.decode(&v)))
    }

    pub fn get_data<T: FlagValue>(&self, flag: &Flag<T>) -> Option<T> {
        self.slot.stored(flag.id()).and_then(|v| flag.decode(&v))
    }

    pub fn is_set(&self, id: &str) -> bool {
        self.slot.stored(id).is_some()
    }

    pub fn remove<T: FlagValue>(&self, flag: &Flag<T>) -> Result<Option<T>, TerrainError> {
        Ok(self.slot.remove(flag.id())?.and_then(|v| flag.decode(&v)))
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.slot.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Derived geometry
// ---------------------------------------------------------------------------

fn footprint(min: Coordinate, max: Coordinate) -> f64 {
    (max.x - min.x + 1.0) * (max.z - min.z + 1.0)
}

fn derive_geometry(
    kind: TerrainKind,
    limits: &TerrainLimits,
    min: Coordinate,
    max: Coordinate,
) -> (Vec<Coordinate>, BTreeSet<Chunk>) {
    if kind == TerrainKind::WorldWide {
        return (Vec::new(), BTreeSet::new());
    }
    (trace_borders(limits, min, max), cover_chunks(limits, min, max))
}

/// Block columns on the rim of the footprint, at the floor of the terrain.
fn trace_borders(limits: &TerrainLimits, min: Coordinate, max: Coordinate) -> Vec<Coordinate> {
    if footprint(min, max) >= limits.border_area_cap as f64 {
        return Vec::new();
    }
    let (x0, x1) = (min.x.floor() as i64, max.x.floor() as i64);
    let (z0, z1) = (min.z.floor() as i64, max.z.floor() as i64);
    let y = min.y.floor();

    let mut borders = Vec::new();
    for x in x0..=x1 {
        borders.push(Coordinate::new(x as f64, y, z0 as f64));
        if z1 != z0 {
            borders.push(Coordinate::new(x as f64, y, z1 as f64));
        }
    }
    for z in (z0 + 1)..z1 {
        borders.push(Coordinate::new(x0 as f64, y, z as f64));
        if x1 != x0 {
            borders.push(Coordinate::new(x1 as f64, y, z as f64));
        }
    }
    borders
}

fn cover_chunks(limits: &TerrainLimits, min: Coordinate, max: Coordinate) -> BTreeSet<Chunk> {
    let low = Chunk::of(min.x, min.z);
    let high = Chunk::of(max.x, max.z);
    let count = (i64::from(high.x) - i64::from(low.x) + 1) * (i64::from(high.z) - i64::from(low.z) + 1);
    if count > limits.chunk_cap as i64 {
        return BTreeSet::new();
    }
    (low.x..=high.x)
        .flat_map(|x| (low.z..=high.z).map(move |z| Chunk::new(x, z)))
        .collect()
}
