//! Built-in flag set and the runtime flag registry.
//!
//! The resolution engine only gives meaning to a handful of boolean flags
//! ([`BUILD`], [`CONTAINERS`], [`ENTRY`] …).  The rest are carried for the
//! host layers that enforce them.

use crate::error::{FlagError, FlagTransformError};
use crate::flag::{normalize_id, AnyFlag, Flag, FlagType, FlagValue};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// String-keyed integer map stored by [`FlagType::Map`] flags.
pub type IntMap = BTreeMap<String, i64>;

// ---------------------------------------------------------------------------
// Transformers / formatters
// ---------------------------------------------------------------------------

pub fn parse_bool(input: &str) -> Result<bool, FlagTransformError> {
    match input.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "allow" | "1" => Ok(true),
        "false" | "no" | "off" | "deny" | "0" => Ok(false),
        other => Err(FlagTransformError::new(format!(
            "'{other}' is not a boolean, use true or false"
        ))),
    }
}

pub fn parse_int(input: &str) -> Result<i64, FlagTransformError> {
    input
        .trim()
        .parse()
        .map_err(|_| FlagTransformError::new(format!("'{}' is not a whole number", input.trim())))
}

fn ranged_int(min: i64, max: i64) -> impl Fn(&str) -> Result<i64, FlagTransformError> {
    move |input| {
        let value = parse_int(input)?;
        if value < min || value > max {
            return Err(FlagTransformError::new(format!(
                "{value} is out of range, expected {min} to {max}"
            )));
        }
        Ok(value)
    }
}

pub fn parse_text(input: &str) -> Result<String, FlagTransformError> {
    Ok(input.trim().to_string())
}

pub fn parse_list(input: &str) -> Result<Vec<String>, FlagTransformError> {
    Ok(input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn parse_set(input: &str) -> Result<BTreeSet<String>, FlagTransformError> {
    Ok(parse_list(input)?
        .into_iter()
        .map(|s| s.to_lowercase())
        .collect())
}

/// `key=value, key=value`; `:` is accepted in place of `=`.
pub fn parse_map(input: &str) -> Result<IntMap, FlagTransformError> {
    let mut map = IntMap::new();
    for entry in parse_list(input)? {
        let Some((key, value)) = entry.split_once(['=', ':']) else {
            return Err(FlagTransformError::new(format!(
                "'{entry}' is missing a value, use key=value"
            )));
        };
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return Err(FlagTransformError::new(format!("'{entry}' has an empty key")));
        }
        map.insert(key, parse_int(value)?);
    }
    Ok(map)
}

fn format_seq<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_map(map: &IntMap) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn boolean(id: &str, default: bool) -> Flag<bool> {
    Flag::define(id, FlagType::Boolean, default, parse_bool, |v: &bool| {
        v.to_string()
    })
}

fn text(id: &str) -> Flag<String> {
    Flag::define(id, FlagType::Text, String::new(), parse_text, String::clone)
}

// ---------------------------------------------------------------------------
// Built-in flags
// ---------------------------------------------------------------------------

/// Placing and breaking blocks.
pub static BUILD: Lazy<Flag<bool>> = Lazy::new(|| boolean("build", false));
pub static BUILD_BOATS: Lazy<Flag<bool>> = Lazy::new(|| boolean("build_boats", false));
pub static BUILD_MINECARTS: Lazy<Flag<bool>> = Lazy::new(|| boolean("build_minecarts", false));
/// Opening chests and other inventories.
pub static CONTAINERS: Lazy<Flag<bool>> = Lazy::new(|| boolean("containers", false));
pub static DOORS: Lazy<Flag<bool>> = Lazy::new(|| boolean("doors", false));
pub static BUTTONS: Lazy<Flag<bool>> = Lazy::new(|| boolean("buttons", false));
pub static LEVERS: Lazy<Flag<bool>> = Lazy::new(|| boolean("levers", false));
pub static PRESSURE_PLATES: Lazy<Flag<bool>> = Lazy::new(|| boolean("pressure_plates", false));
pub static INTERACTIONS: Lazy<Flag<bool>> = Lazy::new(|| boolean("interactions", false));
pub static ENTITY_INTERACTIONS: Lazy<Flag<bool>> =
    Lazy::new(|| boolean("entity_interactions", false));
/// Walking into the terrain.
pub static ENTRY: Lazy<Flag<bool>> = Lazy::new(|| boolean("entry", true));
pub static LEAVE: Lazy<Flag<bool>> = Lazy::new(|| boolean("leave", true));
pub static ENTER_VEHICLES: Lazy<Flag<bool>> = Lazy::new(|| boolean("enter_vehicles", false));
pub static ENDERPEARLS: Lazy<Flag<bool>> = Lazy::new(|| boolean("enderpearls", false));
pub static PVP: Lazy<Flag<bool>> = Lazy::new(|| boolean("pvp", false));
pub static ENEMY_HARM: Lazy<Flag<bool>> = Lazy::new(|| boolean("enemy_harm", true));
pub static MOB_SPAWN: Lazy<Flag<bool>> = Lazy::new(|| boolean("mob_spawn", true));
pub static SPAWNERS: Lazy<Flag<bool>> = Lazy::new(|| boolean("spawners", false));
pub static EXPLOSION_DAMAGE: Lazy<Flag<bool>> = Lazy::new(|| boolean("explosion_damage", false));
pub static FIRE_DAMAGE: Lazy<Flag<bool>> = Lazy::new(|| boolean("fire_damage", false));
pub static LIQUID_FLOW: Lazy<Flag<bool>> = Lazy::new(|| boolean("liquid_flow", false));
pub static LEAF_DECAY: Lazy<Flag<bool>> = Lazy::new(|| boolean("leaf_decay", true));
pub static TRAMPLE: Lazy<Flag<bool>> = Lazy::new(|| boolean("trample", false));
pub static ITEM_DROP: Lazy<Flag<bool>> = Lazy::new(|| boolean("item_drop", true));
pub static ITEM_PICKUP: Lazy<Flag<bool>> = Lazy::new(|| boolean("item_pickup", true));
pub static MODS_CAN_EDIT_FLAGS: Lazy<Flag<bool>> =
    Lazy::new(|| boolean("mods_can_edit_flags", false));
pub static MODS_CAN_MANAGE_MODS: Lazy<Flag<bool>> =
    Lazy::new(|| boolean("mods_can_manage_mods", false));

/// Where entry/leave messages are shown: 0 chat, 1 action bar, 2 title, 3 hidden.
pub static MESSAGE_LOCATION: Lazy<Flag<i64>> = Lazy::new(|| {
    Flag::define(
        "message_location",
        FlagType::Integer,
        1,
        ranged_int(0, 3),
        |v: &i64| v.to_string(),
    )
});
pub static ENTRY_MESSAGE: Lazy<Flag<String>> = Lazy::new(|| text("entry_message"));
pub static LEAVE_MESSAGE: Lazy<Flag<String>> = Lazy::new(|| text("leave_message"));

pub static BLOCKED_COMMANDS: Lazy<Flag<Vec<String>>> = Lazy::new(|| {
    Flag::define(
        "blocked_commands",
        FlagType::List,
        Vec::new(),
        parse_list,
        |v: &Vec<String>| format_seq(v),
    )
});

/// Names of actors refused entry regardless of other flags.
pub static BANNED: Lazy<Flag<BTreeSet<String>>> = Lazy::new(|| {
    Flag::define(
        "banned",
        FlagType::Set,
        BTreeSet::new(),
        parse_set,
        |v: &BTreeSet<String>| format_seq(v),
    )
});

/// Status effect name to amplifier applied to actors inside.
pub static EFFECTS: Lazy<Flag<IntMap>> = Lazy::new(|| {
    Flag::define("effects", FlagType::Map, IntMap::new(), parse_map, format_map)
});

static BUILTINS: Lazy<Vec<Arc<dyn AnyFlag>>> = Lazy::new(|| {
    fn erase<T: FlagValue>(flag: &Lazy<Flag<T>>) -> Arc<dyn AnyFlag> {
        Arc::new(Flag::clone(flag))
    }

    vec![
        erase(&BUILD),
        erase(&BUILD_BOATS),
        erase(&BUILD_MINECARTS),
        erase(&CONTAINERS),
        erase(&DOORS),
        erase(&BUTTONS),
        erase(&LEVERS),
        erase(&PRESSURE_PLATES),
        erase(&INTERACTIONS),
        erase(&ENTITY_INTERACTIONS),
        erase(&ENTRY),
        erase(&LEAVE),
        erase(&ENTER_VEHICLES),
        erase(&ENDERPEARLS),
        erase(&PVP),
        erase(&ENEMY_HARM),
        erase(&MOB_SPAWN),
        erase(&SPAWNERS),
        erase(&EXPLOSION_DAMAGE),
        erase(&FIRE_DAMAGE),
        erase(&LIQUID_FLOW),
        erase(&LEAF_DECAY),
        erase(&TRAMPLE),
        erase(&ITEM_DROP),
        erase(&ITEM_PICKUP),
        erase(&MODS_CAN_EDIT_FLAGS),
        erase(&MODS_CAN_MANAGE_MODS),
        erase(&MESSAGE_LOCATION),
        erase(&ENTRY_MESSAGE),
        erase(&LEAVE_MESSAGE),
        erase(&BLOCKED_COMMANDS),
        erase(&BANNED),
        erase(&EFFECTS),
    ]
});

/// Every built-in flag, in declaration order.
pub fn builtins() -> &'static [Arc<dyn AnyFlag>] {
    &BUILTINS
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name → flag lookup over the built-ins plus runtime extensions.
///
/// Lookups normalize the name first, so `"Build"`, `"entry message"` and
/// `"entry_message"` all resolve.  Built-ins win over extensions.
#[derive(Default)]
pub struct FlagRegistry {
    extensions: RwLock<HashMap<String, Arc<dyn AnyFlag>>>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension flag.  Ids already taken by a built-in or another
    /// extension are rejected.
    pub fn register<T: FlagValue>(&self, flag: Flag<T>) -> Result<(), FlagError> {
        let id = flag.id().to_string();
        if builtin(&id).is_some() {
            return Err(FlagError::Duplicate(id));
        }
        let mut extensions = self.extensions.write();
        if extensions.contains_key(&id) {
            return Err(FlagError::Duplicate(id));
        }
        log::debug!("Registered extension flag {}", id);
        extensions.insert(id, Arc::new(flag));
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.extensions.write().remove(&normalize_id(id)).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AnyFlag>> {
        let id = normalize_id(name);
        builtin(&id).or_else(|| self.extensions.read().get(&id).cloned())
    }

    /// Look a flag up and recover its concrete type.
    pub fn get_typed<T: FlagValue>(&self, name: &str) -> Option<Flag<T>> {
        self.get(name)?.as_any().downcast_ref::<Flag<T>>().cloned()
    }

    /// Transform user input through the named flag.
    pub fn parse(&self, name: &str, input: &str) -> Result<(Arc<dyn AnyFlag>, Value), FlagError> {
        let flag = self
            .get(name)
            .ok_or_else(|| FlagError::Unknown(name.to_string()))?;
        let value = flag.transform_json(input)?;
        Ok((flag, value))
    }

    /// Ids of every known flag, built-ins first.
    pub fn ids(&self) -> Vec<String> {
        let mut extra: Vec<String> = self.extensions.read().keys().cloned().collect();
        extra.sort();
        builtins()
            .iter()
            .map(|f| f.id().to_string())
            .chain(extra)
            .collect()
    }
}

fn builtin(id: &str) -> Option<Arc<dyn AnyFlag>> {
    builtins().iter().find(|f| f.id() == id).cloned()
}
