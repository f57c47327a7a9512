//! Vetoable lifecycle hooks.
//!
//! Hosts register plain closures per hook kind.  Dispatch is synchronous and
//! runs hooks in registration order:
//!
//! - `Cancel` from any hook stops the chain and vetoes the operation
//! - `Replace` (flag-set only) swaps the proposed value; later hooks see it
//! - a hook returning `Err` or panicking is logged and treated as `Continue`
//!
//! Hooks must not register further hooks from inside a dispatch.

use crate::error::HookError;
use crate::terrain::Terrain;
use crate::types::ActorId;
use log::warn;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Answer of an add/remove/flag-unset hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    Continue,
    Cancel,
}

/// Answer of a flag-set hook.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagVerdict {
    Continue,
    Cancel,
    /// Store this value instead of the proposed one.
    Replace(Value),
}

/// A proposed flag change, handed to flag hooks.
#[derive(Debug, Clone, Copy)]
pub struct FlagChange<'a> {
    pub terrain: &'a Terrain,
    pub flag: &'a str,
    /// Set when the change targets one member's overrides.
    pub member: Option<ActorId>,
    /// Proposed value; `None` for unset.
    pub value: Option<&'a Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Add,
    Remove,
    FlagSet,
    FlagUnset,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::Add => "terrain add",
            HookKind::Remove => "terrain remove",
            HookKind::FlagSet => "flag set",
            HookKind::FlagUnset => "flag unset",
        })
    }
}

type TerrainHook = Box<dyn Fn(&Terrain) -> Result<HookVerdict, HookError> + Send + Sync>;
type FlagSetHook = Box<dyn Fn(&FlagChange<'_>) -> Result<FlagVerdict, HookError> + Send + Sync>;
type FlagUnsetHook = Box<dyn Fn(&FlagChange<'_>) -> Result<HookVerdict, HookError> + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    on_add: RwLock<Vec<TerrainHook>>,
    on_remove: RwLock<Vec<TerrainHook>>,
    on_flag_set: RwLock<Vec<FlagSetHook>>,
    on_flag_unset: RwLock<Vec<FlagUnsetHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(
        &self,
        hook: impl Fn(&Terrain) -> Result<HookVerdict, HookError> + Send + Sync + 'static,
    ) {
        self.on_add.write().push(Box::new(hook));
    }

    pub fn on_remove(
        &self,
        hook: impl Fn(&Terrain) -> Result<HookVerdict, HookError> + Send + Sync + 'static,
    ) {
        self.on_remove.write().push(Box::new(hook));
    }

    pub fn on_flag_set(
        &self,
        hook: impl Fn(&FlagChange<'_>) -> Result<FlagVerdict, HookError> + Send + Sync + 'static,
    ) {
        self.on_flag_set.write().push(Box::new(hook));
    }

    pub fn on_flag_unset(
        &self,
        hook: impl Fn(&FlagChange<'_>) -> Result<HookVerdict, HookError> + Send + Sync + 'static,
    ) {
        self.on_flag_unset.write().push(Box::new(hook));
    }

    pub fn clear(&self) {
        self.on_add.write().clear();
        self.on_remove.write().clear();
        self.on_flag_set.write().clear();
        self.on_flag_unset.write().clear();
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// `true` when no add hook cancelled.
    pub(crate) fn allow_add(&self, terrain: &Terrain) -> bool {
        run_terrain_hooks(&self.on_add.read(), HookKind::Add, terrain)
    }

    /// `true` when no remove hook cancelled.
    pub(crate) fn allow_remove(&self, terrain: &Terrain) -> bool {
        run_terrain_hooks(&self.on_remove.read(), HookKind::Remove, terrain)
    }

    /// Value to commit, or `None` when a hook cancelled the change.
    pub(crate) fn filter_flag_set(
        &self,
        terrain: &Terrain,
        flag: &str,
        member: Option<ActorId>,
        value: Value,
    ) -> Option<Value> {
        let hooks = self.on_flag_set.read();
        let mut current = value;
        for hook in hooks.iter() {
            let change = FlagChange {
                terrain,
                flag,
                member,
                value: Some(&current),
            };
            match guarded(HookKind::FlagSet, terrain, || hook(&change)) {
                Some(FlagVerdict::Cancel) => return None,
                Some(FlagVerdict::Replace(replacement)) => current = replacement,
                Some(FlagVerdict::Continue) | None => {}
            }
        }
        Some(current)
    }

    /// `true` when no flag-unset hook cancelled.
    pub(crate) fn allow_flag_unset(
        &self,
        terrain: &Terrain,
        flag: &str,
        member: Option<ActorId>,
    ) -> bool {
        let change = FlagChange {
            terrain,
            flag,
            member,
            value: None,
        };
        !self.on_flag_unset.read().iter().any(|hook| {
            guarded(HookKind::FlagUnset, terrain, || hook(&change)) == Some(HookVerdict::Cancel)
        })
    }
}

fn run_terrain_hooks(hooks: &[TerrainHook], kind: HookKind, terrain: &Terrain) -> bool {
    !hooks
        .iter()
        .any(|hook| guarded(kind, terrain, || hook(terrain)) == Some(HookVerdict::Cancel))
}

/// Run one hook, turning errors and panics into `None`.
fn guarded<V>(
    kind: HookKind,
    terrain: &Terrain,
    call: impl FnOnce() -> Result<V, HookError>,
) -> Option<V> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(verdict)) => Some(verdict),
        Ok(Err(e)) => {
            warn!("{} hook failed for terrain {}: {}", kind, terrain.id(), e);
            None
        }
        Err(_) => {
            warn!("{} hook panicked for terrain {}", kind, terrain.id());
            None
        }
    }
}
