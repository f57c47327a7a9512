//! Janet Claims
//!
//! A cuboid land-claim protection engine: terrains carry ownership, relations,
//! a priority and typed flags, and a resolution engine decides whether an
//! actor may do something at a point where several terrains overlap.
//!
//! ## Architecture
//!
//! ```text
//! Protections  (protection.rs)   ← allow / deny resolution
//!   └── TerrainIndex  (index.rs)  ← per-world priority lists, chunk buckets
//!         ├── Terrain  (terrain.rs)   ← bounds, relations, flag maps
//!         ├── FlagRegistry  (flags.rs) ← built-in + extension flags
//!         ├── Hooks  (hooks.rs)        ← cancellable add/remove/flag events
//!         └── TerrainStore  (store.rs) ← one JSON record per terrain
//!               └── SaveScheduler  (save.rs, server) ← debounced saves
//! ```
//!
//! Everything except background saving and the `janet-claims` binary works
//! without the `server` feature.

pub mod error;
pub mod flag;
pub mod flags;
pub mod hooks;
pub mod index;
pub mod protection;
pub mod store;
pub mod terrain;
pub mod types;

// Background persistence requires the `server` feature.
#[cfg(feature = "server")]
pub(crate) mod save;

pub use error::{FlagError, FlagTransformError, HookError, PersistError, TerrainError};
pub use flag::{AnyFlag, Flag, FlagType, FlagValue};
pub use flags::FlagRegistry;
pub use hooks::{FlagChange, FlagVerdict, HookKind, HookVerdict, Hooks};
pub use index::{FlushReport, LoadReport, Selection, SelectionSlot, TerrainIndex};
pub use protection::{Protections, RelationChecker, TerrainRelations};
pub use store::{DirStore, MemoryStore, TerrainRecord, TerrainStore};
pub use terrain::{MemberFlags, Relation, Terrain, TerrainFlags, TerrainKind};
pub use types::{
    ActorId, Chunk, ClaimsConfig, Coordinate, IndexStats, TerrainLimits, WorldCoordinate,
    WorldId, CONSOLE_ID,
};
