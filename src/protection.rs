//! Permission resolution over overlapping terrains.
//!
//! ## Single flag
//!
//! Terrains of the world are scanned highest priority first, skipping those
//! that do not contain the point:
//!
//! 1. an actor related to the terrain (owner, moderator, member) is allowed
//! 2. flag unset → keep scanning (pierce-through)
//! 3. flag `true` → allowed
//! 4. flag `false` → allowed only if the actor is related to another
//!    terrain containing the point with the *same* priority, found after the
//!    deciding terrain in scan order; denied otherwise
//!
//! Nothing decided → allowed.
//!
//! ## Two flags
//!
//! Same scan; each flag is checked until it resolves `true` and then left
//! alone.  A `false` on either flag decides the whole query as in step 4.

use crate::flag::Flag;
use crate::flags::{BUILD, CONTAINERS, ENTRY};
use crate::index::TerrainIndex;
use crate::terrain::Terrain;
use crate::types::{ActorId, WorldCoordinate};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Host-side knowledge of who may act where.
pub trait RelationChecker: Send + Sync {
    /// Whether `actor` owns, moderates or is a member of `terrain`.
    fn has_any_relation(&self, actor: ActorId, terrain: &Terrain) -> bool;

    /// Whether `actor` skips the check for `flag` entirely.
    fn bypasses(&self, _actor: ActorId, _flag: &str) -> bool {
        false
    }
}

/// Relations read from the terrains themselves.
#[derive(Debug, Clone, Default)]
pub struct TerrainRelations {
    bypass: HashSet<ActorId>,
}

impl TerrainRelations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actors that bypass every protection.
    pub fn with_bypass(actors: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            bypass: actors.into_iter().collect(),
        }
    }
}

impl RelationChecker for TerrainRelations {
    fn has_any_relation(&self, actor: ActorId, terrain: &Terrain) -> bool {
        terrain.has_any_relation(actor)
    }

    fn bypasses(&self, actor: ActorId, _flag: &str) -> bool {
        self.bypass.contains(&actor)
    }
}

type Probe = Box<dyn Fn(Uuid, &str) + Send + Sync>;

pub struct Protections {
    index: TerrainIndex,
    relations: Arc<dyn RelationChecker>,
    probe: Option<Probe>,
}

impl Protections {
    pub fn new(index: TerrainIndex, relations: Arc<dyn RelationChecker>) -> Self {
        Self {
            index,
            relations,
            probe: None,
        }
    }

    /// Call `probe` with the terrain id and flag id of every flag evaluation.
    pub fn with_probe(mut self, probe: impl Fn(Uuid, &str) + Send + Sync + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    pub fn index(&self) -> &TerrainIndex {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    pub fn is_allowed(&self, actor: ActorId, at: &WorldCoordinate, flag: &Flag<bool>) -> bool {
        self.relations.bypasses(actor, flag.id()) || self.resolve(actor, at, flag)
    }

    pub fn is_allowed_both(
        &self,
        actor: ActorId,
        at: &WorldCoordinate,
        first: &Flag<bool>,
        second: &Flag<bool>,
    ) -> bool {
        (self.relations.bypasses(actor, first.id()) && self.relations.bypasses(actor, second.id()))
            || self.resolve_both(actor, at, first, second)
    }

    pub fn can_build(&self, actor: ActorId, at: &WorldCoordinate) -> bool {
        self.is_allowed(actor, at, &BUILD)
    }

    /// Container access needs both build and container rights.
    pub fn can_open_container(&self, actor: ActorId, at: &WorldCoordinate) -> bool {
        self.is_allowed_both(actor, at, &BUILD, &CONTAINERS)
    }

    pub fn can_enter(&self, actor: ActorId, at: &WorldCoordinate) -> bool {
        self.is_allowed(actor, at, &ENTRY)
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    pub fn resolve(&self, actor: ActorId, at: &WorldCoordinate, flag: &Flag<bool>) -> bool {
        let terrains = self.index.terrains_in(at.world);

        for (i, terrain) in terrains.iter().enumerate() {
            if !terrain.is_within(&at.coordinate) {
                continue;
            }
            if self.relations.has_any_relation(actor, terrain) {
                return true;
            }
            match self.evaluate(terrain, flag) {
                None => continue,
                Some(true) => return true,
                Some(false) => return self.tie_break(actor, at, &terrains[i + 1..], terrain),
            }
        }

        true
    }

    pub fn resolve_both(
        &self,
        actor: ActorId,
        at: &WorldCoordinate,
        first: &Flag<bool>,
        second: &Flag<bool>,
    ) -> bool {
        let terrains = self.index.terrains_in(at.world);
        let mut first_allowed = false;
        let mut second_allowed = false;

        for (i, terrain) in terrains.iter().enumerate() {
            if !terrain.is_within(&at.coordinate) {
                continue;
            }
            if self.relations.has_any_relation(actor, terrain) {
                return true;
            }

            for (flag, allowed) in [(first, &mut first_allowed), (second, &mut second_allowed)] {
                if *allowed {
                    continue;
                }
                match self.evaluate(terrain, flag) {
                    None => {}
                    Some(true) => *allowed = true,
                    Some(false) => return self.tie_break(actor, at, &terrains[i + 1..], terrain),
                }
            }

            if first_allowed && second_allowed {
                return true;
            }
        }

        true
    }

    fn evaluate(&self, terrain: &Terrain, flag: &Flag<bool>) -> Option<bool> {
        if let Some(probe) = &self.probe {
            probe(terrain.id(), flag.id());
        }
        terrain.flags().get_explicit(flag)
    }

    /// Relation to any later terrain sharing `decider`'s priority.
    fn tie_break(
        &self,
        actor: ActorId,
        at: &WorldCoordinate,
        rest: &[Arc<Terrain>],
        decider: &Terrain,
    ) -> bool {
        let priority = decider.priority();
        rest.iter()
            .take_while(|t| t.priority() == priority)
            .filter(|t| t.is_within(&at.coordinate))
            .any(|t| self.relations.has_any_relation(actor, t))
    }
}
