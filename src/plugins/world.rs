//! Canonical world document and its state store.
//!
//! The world is one JSON document shared with other tooling (reporting,
//! snapshots), so unknown keys at the top level and on citizens are carried
//! through untouched.

use crate::core::error::ZionError;
use crate::core::store::{self, LeasePolicy, StoreLease};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

pub const WORLD_VERSION: u32 = 1;
pub const MAX_ACTION_LOG: usize = 100;
pub const DEFAULT_GROWTH_TIME_SECS: u64 = 3600;

fn default_version() -> u32 {
    WORLD_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub citizens: BTreeMap<String, Citizen>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gardens: BTreeMap<String, Garden>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub structures: BTreeMap<String, Structure>,
    #[serde(default)]
    pub last_update: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for WorldState {
    fn default() -> Self {
        WorldState {
            version: WORLD_VERSION,
            citizens: BTreeMap::new(),
            gardens: BTreeMap::new(),
            structures: BTreeMap::new(),
            last_update: Map::new(),
            extra: Map::new(),
        }
    }
}

/// Positions are kept as written (`{}`, zone-less, or a full protocol
/// position); other tools read and write the same field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citizen {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub actions: VecDeque<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_intention: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<InventoryItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Citizen {
    pub fn new(id: &str, position: Option<Value>, last_seen: Option<String>) -> Self {
        Citizen {
            id: id.to_string(),
            position,
            last_seen,
            actions: VecDeque::new(),
            current_intention: None,
            inventory: None,
            extra: Map::new(),
        }
    }

    /// Append to the action log, evicting the oldest entries past the cap.
    pub fn record_action(&mut self, record: ActionRecord) {
        self.actions.push_back(record);
        while self.actions.len() > MAX_ACTION_LOG {
            self.actions.pop_front();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub crafted_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A plot; its id is the key in `gardens`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Garden {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub plants: Vec<Plant>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plant {
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub planted_by: String,
    #[serde(default)]
    pub planted_at: Option<String>,
    #[serde(default)]
    pub growth_stage: f64,
    #[serde(default = "default_growth_time")]
    pub growth_time: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_growth_time() -> u64 {
    DEFAULT_GROWTH_TIME_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Structure {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub builder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Load/save access to the world document.
#[derive(Debug, Clone)]
pub struct WorldStore {
    path: PathBuf,
    lease: LeasePolicy,
}

impl WorldStore {
    pub fn new(path: impl Into<PathBuf>, lease: LeasePolicy) -> Self {
        WorldStore {
            path: path.into(),
            lease,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive writer lease; hold it across load-modify-save.
    pub fn lease(&self) -> Result<StoreLease, ZionError> {
        StoreLease::acquire(&self.path, self.lease)
    }

    /// Load the document; `Ok(None)` when it does not exist yet.
    ///
    /// A document that exists but does not parse is `CorruptState`: it is
    /// never silently replaced with an empty world.
    pub fn load(&self) -> Result<Option<WorldState>, ZionError> {
        let Some(bytes) = store::read_optional(&self.path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            ZionError::CorruptState(format!("{}: {}", self.path.display(), e))
        })
    }

    pub fn load_or_default(&self) -> Result<WorldState, ZionError> {
        Ok(self.load()?.unwrap_or_default())
    }

    pub fn save(&self, world: &WorldState) -> Result<(), ZionError> {
        store::write_json_atomic(&self.path, world)
    }
}
