//! TerrainIndex – registry, spatial lookup and persistence bookkeeping.
//!
//! Every world owns its own list of terrains sorted by **descending**
//! priority, behind its own lock, so writers in one world never stall
//! readers in another.  Readers take a snapshot (`Vec<Arc<Terrain>>`) and
//! release the lock before touching any terrain.
//!
//! Lock order: world map → world list → terrain state.  Terrains never hold
//! their own state lock while calling back into the index.

use crate::error::PersistError;
use crate::flags::FlagRegistry;
use crate::hooks::Hooks;
#[cfg(feature = "server")]
use crate::save::SaveScheduler;
use crate::store::{DirStore, MemoryStore, TerrainRecord, TerrainStore};
use crate::terrain::Terrain;
use crate::types::{
    ActorId, Chunk, ClaimsConfig, Coordinate, IndexStats, WorldCoordinate, WorldId,
};
use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

type WorldList = Arc<RwLock<Vec<Arc<Terrain>>>>;

/// The two corners an actor picked while claiming.
pub type Selection = [Option<WorldCoordinate>; 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSlot {
    First,
    Second,
}

/// Outcome of [`TerrainIndex::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub quarantined: usize,
    pub dropped_flags: usize,
}

/// Outcome of one save/delete pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Pending {
    dirty: HashSet<Uuid>,
    deletions: HashSet<Uuid>,
}

/// Chunk → terrain ids for one world.
#[derive(Default)]
struct ChunkBuckets {
    buckets: HashMap<Chunk, HashSet<Uuid>>,
    /// Terrains too large (or world-wide) to bucket precisely.
    unbounded: HashSet<Uuid>,
}

impl ChunkBuckets {
    fn insert(&mut self, id: Uuid, chunks: &BTreeSet<Chunk>) {
        if chunks.is_empty() {
            self.unbounded.insert(id);
            return;
        }
        for chunk in chunks {
            self.buckets.entry(*chunk).or_default().insert(id);
        }
    }

    fn remove(&mut self, id: Uuid, chunks: &BTreeSet<Chunk>) {
        if chunks.is_empty() {
            self.unbounded.remove(&id);
            return;
        }
        for chunk in chunks {
            if let Some(bucket) = self.buckets.get_mut(chunk) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(chunk);
                }
            }
        }
    }

    fn contains(&self, id: &Uuid, chunk: &Chunk) -> bool {
        self.unbounded.contains(id)
            || self.buckets.get(chunk).is_some_and(|bucket| bucket.contains(id))
    }
}

/// Insert after every terrain of greater or equal priority.
fn insert_sorted(list: &mut Vec<Arc<Terrain>>, terrain: Arc<Terrain>) {
    let priority = terrain.priority();
    let at = list.partition_point(|t| t.priority() >= priority);
    list.insert(at, terrain);
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct IndexShared {
    me: Weak<IndexShared>,
    config: ClaimsConfig,
    store: Arc<dyn TerrainStore>,
    registry: Arc<FlagRegistry>,
    hooks: Hooks,
    worlds: RwLock<HashMap<WorldId, WorldList>>,
    by_id: RwLock<HashMap<Uuid, Arc<Terrain>>>,
    chunk_index: RwLock<HashMap<WorldId, ChunkBuckets>>,
    selections: Mutex<HashMap<ActorId, Selection>>,
    pending: Mutex<Pending>,
    digests: Mutex<HashMap<Uuid, md5::Digest>>,
    repositions: AtomicU64,
    #[cfg(feature = "server")]
    pub(crate) saver: SaveScheduler,
}

impl IndexShared {
    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn mark_dirty(&self, id: Uuid) {
        self.pending.lock().dirty.insert(id);
        self.request_save();
    }

    pub(crate) fn has_pending(&self) -> bool {
        let pending = self.pending.lock();
        !pending.dirty.is_empty() || !pending.deletions.is_empty()
    }

    #[cfg(feature = "server")]
    pub(crate) fn request_save(&self) {
        if let Some(me) = self.me.upgrade() {
            self.saver.request(&me);
        }
    }

    #[cfg(not(feature = "server"))]
    pub(crate) fn request_save(&self) {}

    fn world_list(&self, world: WorldId) -> WorldList {
        if let Some(list) = self.worlds.read().get(&world) {
            return Arc::clone(list);
        }
        Arc::clone(self.worlds.write().entry(world).or_default())
    }

    fn snapshot(&self, world: WorldId) -> Vec<Arc<Terrain>> {
        match self.worlds.read().get(&world) {
            Some(list) => list.read().clone(),
            None => Vec::new(),
        }
    }

    /// Move `terrain` to its sorted position for `priority`.
    pub(crate) fn reposition(&self, terrain: &Terrain, priority: i32) {
        let list = self.world_list(terrain.world());
        let mut list = list.write();
        match list.iter().position(|t| t.id() == terrain.id()) {
            Some(at) => {
                let moved = list.remove(at);
                moved.store_priority(priority);
                let to = list.partition_point(|t| t.priority() >= priority);
                list.insert(to, moved);
            }
            None => terrain.store_priority(priority),
        }
        self.repositions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reindex_chunks(&self, terrain: &Terrain, old: &BTreeSet<Chunk>) {
        let mut index = self.chunk_index.write();
        let buckets = index.entry(terrain.world()).or_default();
        buckets.remove(terrain.id(), old);
        buckets.insert(terrain.id(), &terrain.chunks());
    }

    /// Place a managed terrain into every lookup structure.
    fn insert(&self, terrain: Arc<Terrain>) {
        {
            let list = self.world_list(terrain.world());
            let mut list = list.write();
            insert_sorted(&mut list, Arc::clone(&terrain));
        }
        self.insert_lookups(terrain);
    }

    /// Chunk buckets and the id map; the world list is handled by the caller.
    fn insert_lookups(&self, terrain: Arc<Terrain>) {
        self.chunk_index
            .write()
            .entry(terrain.world())
            .or_default()
            .insert(terrain.id(), &terrain.chunks());
        self.by_id.write().insert(terrain.id(), terrain);
    }

    /// Pull a terrain out of every lookup structure.
    fn detach(&self, id: Uuid) -> Option<Arc<Terrain>> {
        let terrain = self.by_id.write().remove(&id)?;
        if let Some(list) = self.worlds.read().get(&terrain.world()) {
            list.write().retain(|t| !Arc::ptr_eq(t, &terrain));
        }
        if let Some(buckets) = self.chunk_index.write().get_mut(&terrain.world()) {
            buckets.remove(id, &terrain.chunks());
        }
        Some(terrain)
    }

    /// Register without hooks (load, world terrains).
    fn adopt(&self, terrain: Arc<Terrain>) -> bool {
        if let Some(previous) = self.detach(terrain.id()) {
            warn!("Terrain {} registered twice, keeping the newer copy", previous.id());
            previous.retire();
        }
        if !terrain.manage(self.me.clone()) {
            return false;
        }
        self.insert(terrain);
        true
    }

    pub(crate) fn flush(&self) -> FlushReport {
        let (dirty, deletions) = {
            let mut pending = self.pending.lock();
            (
                mem::take(&mut pending.dirty),
                mem::take(&mut pending.deletions),
            )
        };

        let mut report = FlushReport::default();

        for id in deletions {
            if self.by_id.read().contains_key(&id) {
                continue;
            }
            self.digests.lock().remove(&id);
            match self.store.delete(id) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete terrain {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        for id in dirty {
            let Some(terrain) = self.by_id.read().get(&id).cloned() else {
                continue;
            };
            let bytes = match TerrainRecord::capture(&terrain).encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode terrain {}: {}", id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let digest = md5::compute(&bytes);
            if self.digests.lock().get(&id) == Some(&digest) {
                report.unchanged += 1;
                continue;
            }

            match self.store.write(id, Bytes::from(bytes)) {
                Ok(()) => {
                    self.digests.lock().insert(id, digest);
                    report.written += 1;
                }
                Err(e) => {
                    warn!("Failed to save terrain {}: {}", id, e);
                    self.pending.lock().dirty.insert(id);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Save cycle: {} written, {} unchanged, {} deleted, {} failed",
            report.written, report.unchanged, report.deleted, report.failed
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Handle to a terrain registry.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TerrainIndex {
    shared: Arc<IndexShared>,
}

impl TerrainIndex {
    pub fn new(config: ClaimsConfig, store: Arc<dyn TerrainStore>) -> Self {
        Self::with_registry(config, store, Arc::new(FlagRegistry::new()))
    }

    pub fn with_registry(
        config: ClaimsConfig,
        store: Arc<dyn TerrainStore>,
        registry: Arc<FlagRegistry>,
    ) -> Self {
        #[cfg(feature = "server")]
        let saver = SaveScheduler::new(std::time::Duration::from_millis(config.save_delay_ms));
        let shared = Arc::new_cyclic(|me| IndexShared {
            me: me.clone(),
            config,
            store,
            registry,
            hooks: Hooks::new(),
            worlds: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            chunk_index: RwLock::new(HashMap::new()),
            selections: Mutex::new(HashMap::new()),
            pending: Mutex::new(Pending::default()),
            digests: Mutex::new(HashMap::new()),
            repositions: AtomicU64::new(0),
            #[cfg(feature = "server")]
            saver,
        });
        Self { shared }
    }

    /// Index persisted to `config.data_dir`.
    pub fn open(config: ClaimsConfig) -> Self {
        let store = Arc::new(DirStore::new(config.data_dir.clone()));
        Self::new(config, store)
    }

    /// Index persisted to memory only.
    pub fn in_memory(config: ClaimsConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &ClaimsConfig {
        &self.shared.config
    }

    pub fn hooks(&self) -> &Hooks {
        &self.shared.hooks
    }

    pub fn flag_registry(&self) -> &Arc<FlagRegistry> {
        &self.shared.registry
    }

    pub fn store(&self) -> &Arc<dyn TerrainStore> {
        &self.shared.store
    }

    /// A fresh unmanaged terrain using this index's limits, carrying the
    /// configured default flags.  Defaults that fail to parse are skipped.
    pub fn new_terrain(&self, first: Coordinate, second: Coordinate, world: WorldId) -> Terrain {
        let terrain = Terrain::with_limits(first, second, world, self.shared.config.limits);
        for (name, input) in &self.shared.config.default_flags {
            let applied = self
                .shared
                .registry
                .parse(name, input)
                .map_err(|e| e.to_string())
                .and_then(|(flag, value)| {
                    terrain
                        .flags()
                        .put_raw(flag.as_ref(), value)
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = applied {
                warn!("Skipping default flag {}: {}", name, e);
            }
        }
        terrain
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Read every stored terrain.  Broken records are quarantined and skipped.
    pub fn load(&self) -> Result<LoadReport, PersistError> {
        let store = &self.shared.store;
        let mut report = LoadReport::default();

        for key in store.list()? {
            let decoded = store
                .read(&key)
                .and_then(|bytes| TerrainRecord::decode(&bytes))
                .and_then(|record| record.restore(&self.shared.registry, self.shared.config.limits));

            match decoded {
                Ok((terrain, dropped)) => {
                    report.dropped_flags += dropped;
                    if self.shared.adopt(Arc::new(terrain)) {
                        report.loaded += 1;
                    }
                }
                Err(e) => {
                    error!("Quarantining terrain file {}: {}", key, e);
                    if let Err(e) = store.quarantine(&key) {
                        warn!("Failed to quarantine {}: {}", key, e);
                    }
                    report.quarantined += 1;
                }
            }
        }

        info!(
            "Loaded {} terrains ({} quarantined, {} flags dropped)",
            report.loaded, report.quarantined, report.dropped_flags
        );
        Ok(report)
    }

    /// Enable background saves on `handle`.
    #[cfg(feature = "server")]
    pub fn start(&self, handle: tokio::runtime::Handle) {
        self.shared.saver.attach(handle);
        if self.shared.has_pending() {
            self.shared.request_save();
        }
    }

    /// Stop background saves and write out everything pending.
    pub fn shutdown(&self) -> FlushReport {
        #[cfg(feature = "server")]
        self.shared.saver.detach();
        self.flush()
    }

    /// Run one save/delete pass now.
    pub fn flush(&self) -> FlushReport {
        self.shared.flush()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a terrain.  Returns `false` if this instance is already
    /// managed or removed, or if an add hook cancels.  A different terrain
    /// with the same id is replaced.
    pub fn add(&self, terrain: Arc<Terrain>) -> bool {
        if terrain.is_managed() || terrain.is_removed() {
            return false;
        }
        if !self.shared.hooks.allow_add(&terrain) {
            debug!("Adding terrain {} was cancelled", terrain.id());
            return false;
        }
        let id = terrain.id();
        if let Some(previous) = self.shared.detach(id) {
            debug!("Replacing terrain {}", id);
            previous.retire();
        }
        if !terrain.manage(self.shared.me.clone()) {
            return false;
        }
        self.shared.insert(terrain);
        self.shared.mark_dirty(id);
        true
    }

    /// Unregister a terrain and schedule its record for deletion.
    pub fn remove(&self, id: Uuid) -> Option<Arc<Terrain>> {
        let terrain = self.by_id(id)?;
        if !self.shared.hooks.allow_remove(&terrain) {
            debug!("Removing terrain {} was cancelled", id);
            return None;
        }
        let terrain = self.shared.detach(id)?;
        terrain.retire();
        {
            let mut pending = self.shared.pending.lock();
            pending.dirty.remove(&id);
            pending.deletions.insert(id);
        }
        self.shared.request_save();
        Some(terrain)
    }

    /// The whole-world terrain of `world`, created on first use.
    ///
    /// Lookup and creation happen under the world list's write lock, so
    /// concurrent first calls agree on one terrain.
    pub fn ensure_world_terrain(&self, world: WorldId) -> Arc<Terrain> {
        let list = self.shared.world_list(world);
        let terrain = {
            let mut list = list.write();
            if let Some(existing) = list.iter().find(|t| t.is_world_wide()) {
                return Arc::clone(existing);
            }
            let terrain = Arc::new(Terrain::world_wide(world));
            terrain.manage(self.shared.me.clone());
            insert_sorted(&mut list, Arc::clone(&terrain));
            terrain
        };
        self.shared.insert_lookups(Arc::clone(&terrain));
        self.shared.mark_dirty(terrain.id());
        terrain
    }

    pub fn world_terrain(&self, world: WorldId) -> Option<Arc<Terrain>> {
        self.shared
            .snapshot(world)
            .into_iter()
            .find(|t| t.is_world_wide())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn by_id(&self, id: Uuid) -> Option<Arc<Terrain>> {
        self.shared.by_id.read().get(&id).cloned()
    }

    pub fn all_terrains(&self) -> Vec<Arc<Terrain>> {
        self.shared.by_id.read().values().cloned().collect()
    }

    /// Terrains owned by `actor`.
    pub fn terrains_of(&self, actor: ActorId) -> Vec<Arc<Terrain>> {
        self.shared
            .by_id
            .read()
            .values()
            .filter(|t| t.owner() == Some(actor))
            .cloned()
            .collect()
    }

    /// Every terrain of `world`, highest priority first.
    pub fn terrains_in(&self, world: WorldId) -> Vec<Arc<Terrain>> {
        self.shared.snapshot(world)
    }

    /// Terrains containing the point, highest priority first.
    pub fn terrains_at(&self, world: WorldId, x: f64, y: f64, z: f64) -> Vec<Arc<Terrain>> {
        let point = Coordinate::new(x, y, z);
        self.shared
            .snapshot(world)
            .into_iter()
            .filter(|t| t.is_within(&point))
            .collect()
    }

    /// Terrains intersecting `chunk`, highest priority first.
    pub fn terrains_in_chunk(&self, world: WorldId, chunk: Chunk) -> Vec<Arc<Terrain>> {
        let snapshot = self.shared.snapshot(world);
        let index = self.shared.chunk_index.read();
        let Some(buckets) = index.get(&world) else {
            return Vec::new();
        };
        snapshot
            .into_iter()
            .filter(|t| buckets.contains(&t.id(), &chunk))
            .collect()
    }

    /// Other terrains whose boxes intersect `terrain`.
    pub fn overlapping(&self, terrain: &Terrain) -> Vec<Arc<Terrain>> {
        self.shared
            .snapshot(terrain.world())
            .into_iter()
            .filter(|t| t.id() != terrain.id() && t.is_overlapping(terrain))
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let (pending_saves, pending_deletions) = {
            let pending = self.shared.pending.lock();
            (pending.dirty.len(), pending.deletions.len())
        };
        IndexStats {
            terrains: self.shared.by_id.read().len(),
            worlds: self
                .shared
                .worlds
                .read()
                .values()
                .filter(|list| !list.read().is_empty())
                .count(),
            pending_saves,
            pending_deletions,
            repositions: self.shared.repositions.load(Ordering::Relaxed),
        }
    }

    // -----------------------------------------------------------------------
    // Selections
    // -----------------------------------------------------------------------

    /// Corners picked by `actor`; use [`crate::CONSOLE_ID`] for the console.
    pub fn selection(&self, actor: ActorId) -> Selection {
        self.shared
            .selections
            .lock()
            .get(&actor)
            .copied()
            .unwrap_or_default()
    }

    pub fn select(&self, actor: ActorId, slot: SelectionSlot, point: WorldCoordinate) {
        let mut selections = self.shared.selections.lock();
        let selection = selections.entry(actor).or_default();
        match slot {
            SelectionSlot::First => selection[0] = Some(point),
            SelectionSlot::Second => selection[1] = Some(point),
        }
    }

    pub fn clear_selection(&self, actor: ActorId) {
        self.shared.selections.lock().remove(&actor);
    }
}
