//! Inbox drain: fold queued protocol messages into the canonical world.
//!
//! Conflict policy is last-writer-wins per citizen, with one asymmetry that
//! callers rely on: `lastSeen` only ever moves forward (max of stored and
//! incoming timestamp), while payload-carried fields such as `position` are
//! applied in file-processing order. Files are processed in the order the
//! filesystem lists them, so "last file processed wins" for body fields.
//!
//! Consumption is gated on a successful parse. A readable file is deleted (or
//! archived) after its messages are folded even when they were inert, so a
//! message is never replayed; an unreadable file is counted as an error and
//! left in place for inspection.

use crate::core::config::SyncConfig;
use crate::core::error::ZionError;
use crate::core::output;
use crate::core::store::{self, Store};
use crate::core::time;
use crate::plugins::protocol::{self, Action, Envelope};
use crate::plugins::world::{
    ActionRecord, Citizen, DEFAULT_GROWTH_TIME_SECS, InventoryItem, Plant, Structure, WorldState,
    WorldStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PROCESSED_DIR: &str = "_processed";

/// Root shape of an inbox file.
#[derive(Debug, Clone, PartialEq)]
pub enum InboxFile {
    SingleMessage(serde_json::Map<String, Value>),
    MessageBatch(Vec<Value>),
}

impl InboxFile {
    pub fn parse(bytes: &[u8]) -> Result<InboxFile, ZionError> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Object(obj) => Ok(InboxFile::SingleMessage(obj)),
            Value::Array(items) => Ok(InboxFile::MessageBatch(items)),
            other => Err(ZionError::ValidationError(format!(
                "inbox file root must be a message object or an array of messages, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn into_messages(self) -> Vec<Value> {
        match self {
            InboxFile::SingleMessage(obj) => vec![Value::Object(obj)],
            InboxFile::MessageBatch(items) => items,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Counters for one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Files parsed successfully.
    pub processed: usize,
    /// Message objects taken from parsed files, inert ones included.
    pub merged: usize,
    /// Files consumed (deleted or archived).
    pub deleted: usize,
    /// Files that could not be read or parsed.
    pub errors: usize,
    /// Elements that changed nothing: inert messages, non-objects, and
    /// messages rejected by `require_valid`.
    pub skipped: usize,
    /// SHA-256 of the world document after the pass, when one exists.
    pub digest: Option<String>,
}

impl SyncSummary {
    pub fn render(&self) -> String {
        format!(
            "Files processed: {}\nMessages merged: {}\nFiles deleted: {}\nErrors: {}",
            self.processed, self.merged, self.deleted, self.errors
        )
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// Fold one decoded message into the world.
///
/// `now` stamps generated structure ids.
pub fn merge_message(world: &mut WorldState, msg: &Envelope, now: DateTime<Utc>) {
    let citizen = world
        .citizens
        .entry(msg.from.clone())
        .or_insert_with(|| {
            let position = msg
                .position
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new()));
            Citizen::new(&msg.from, Some(position), msg.ts.clone())
        });

    if time::ordering_key(msg.ts.as_deref()) > time::ordering_key(citizen.last_seen.as_deref()) {
        citizen.last_seen = msg.ts.clone();
    }

    match &msg.action {
        Action::Move { destination } => match destination {
            Some(dest) => citizen.position = Some(dest.clone()),
            None => tracing::debug!(from = %msg.from, "move without a destination"),
        },
        Action::Plant { plot, species } => {
            if let Some(plot) = plot {
                world
                    .gardens
                    .entry(plot.clone())
                    .or_default()
                    .plants
                    .push(Plant {
                        species: species.clone(),
                        planted_by: msg.from.clone(),
                        planted_at: msg.ts.clone(),
                        growth_stage: 0.0,
                        growth_time: DEFAULT_GROWTH_TIME_SECS,
                        extra: Map::new(),
                    });
            }
        }
        Action::Build { structure } => {
            let id = structure_id(&msg.from, now);
            if world.structures.contains_key(&id) {
                tracing::warn!(structure = %id, "structure id collision; earlier structure replaced");
            }
            world.structures.insert(
                id.clone(),
                Structure {
                    id,
                    kind: structure.clone(),
                    builder: msg.from.clone(),
                    built_at: msg.ts.clone(),
                    position: msg.position.clone(),
                    extra: Map::new(),
                },
            );
        }
        Action::Craft { recipe } => {
            citizen
                .inventory
                .get_or_insert_with(Vec::new)
                .push(InventoryItem {
                    item: recipe.clone(),
                    crafted_at: msg.ts.clone(),
                    extra: Map::new(),
                });
        }
        Action::SetIntention { intention } => citizen.current_intention = Some(intention.clone()),
        Action::ClearIntention => citizen.current_intention = None,
        Action::Record => {}
    }

    citizen.record_action(ActionRecord {
        kind: msg.kind.clone(),
        timestamp: msg.ts.clone(),
        payload: msg.payload.clone(),
        extra: Map::new(),
    });
}

/// Structure ids are `(builder, whole second)`; two builds by one builder in
/// the same second share an id.
pub fn structure_id(builder: &str, now: DateTime<Utc>) -> String {
    format!("structure_{}_{}", builder, now.timestamp())
}

/// Outcome of folding one inbox element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fold {
    Applied,
    /// An object without a usable `from` or `type`.
    Inert,
    Rejected,
    NotAnObject,
}

/// Drains an inbox directory into a world document.
#[derive(Debug, Clone)]
pub struct MergeProcessor {
    inbox: PathBuf,
    world: WorldStore,
    options: SyncConfig,
}

impl MergeProcessor {
    pub fn new(inbox: impl Into<PathBuf>, world: WorldStore, options: SyncConfig) -> Self {
        MergeProcessor {
            inbox: inbox.into(),
            world,
            options,
        }
    }

    pub fn for_store(store: &Store, options: SyncConfig) -> Self {
        let world = WorldStore::new(&store.world, options.lease_policy());
        MergeProcessor::new(&store.inbox, world, options)
    }

    /// Candidate files in filesystem order.
    pub fn pending_files(&self) -> Result<Vec<PathBuf>, ZionError> {
        let entries = match fs::read_dir(&self.inbox) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ZionError::IoError(err)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            // Vanished entries and directories are both skipped here.
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            if let Some(ext) = &self.options.extension {
                let matches = path
                    .extension()
                    .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext));
                if !matches {
                    continue;
                }
            }
            files.push(path);
        }
        Ok(files)
    }

    /// One full drain pass under the world lease.
    pub fn run(&self, now: DateTime<Utc>) -> Result<SyncSummary, ZionError> {
        let lease = self.world.lease()?;
        let existing = self.world.load()?;
        let existed = existing.is_some();
        let mut world = existing.unwrap_or_default();
        let mut summary = SyncSummary::default();
        let mut applied = 0usize;

        for path in self.pending_files()? {
            if let Err(err) = lease.refresh() {
                tracing::warn!(error = %err, "cannot refresh world lease");
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(file = %path.display(), "inbox file vanished before read");
                    continue;
                }
                Err(err) => {
                    tracing::error!(file = %path.display(), error = %err, "cannot read inbox file");
                    summary.errors += 1;
                    continue;
                }
            };
            let file = match InboxFile::parse(&bytes) {
                Ok(file) => file,
                Err(err) => {
                    tracing::error!(file = %path.display(), error = %err, "cannot parse inbox file; retained");
                    summary.errors += 1;
                    continue;
                }
            };

            for message in file.into_messages() {
                match self.fold(&mut world, &message, now) {
                    Fold::Applied => {
                        applied += 1;
                        summary.merged += 1;
                    }
                    Fold::Inert => {
                        summary.merged += 1;
                        summary.skipped += 1;
                    }
                    Fold::Rejected | Fold::NotAnObject => summary.skipped += 1,
                }
            }
            summary.processed += 1;

            match self.consume(&path) {
                Ok(true) => summary.deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(file = %path.display(), error = %err, "cannot consume inbox file");
                    summary.errors += 1;
                }
            }
        }

        if applied > 0 {
            world
                .last_update
                .insert("sync".to_string(), Value::String(time::format_rfc3339(now)));
        }
        if applied > 0 || !existed {
            self.world.save(&world)?;
        }
        summary.digest = store::read_optional(self.world.path())?.map(|b| store::content_digest(&b));
        Ok(summary)
    }

    fn fold(&self, world: &mut WorldState, message: &Value, now: DateTime<Utc>) -> Fold {
        if !message.is_object() {
            return Fold::NotAnObject;
        }
        if self.options.require_valid {
            let (valid, errors) = protocol::validate(message);
            if !valid {
                tracing::warn!(
                    errors = %output::error_digest(&errors, 3),
                    "message rejected by schema"
                );
                return Fold::Rejected;
            }
        }
        match Envelope::decode(message) {
            Some(envelope) => {
                merge_message(world, &envelope, now);
                Fold::Applied
            }
            None => {
                tracing::debug!("inert message without from/type skipped");
                Fold::Inert
            }
        }
    }

    /// Delete (or archive) a parsed file. `Ok(false)` if it was already gone.
    fn consume(&self, path: &Path) -> Result<bool, ZionError> {
        let result = if self.options.archive_processed {
            let archive = self.inbox.join(PROCESSED_DIR);
            fs::create_dir_all(&archive)?;
            let name = path.file_name().unwrap_or_default();
            fs::rename(path, archive.join(name))
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ZionError::IoError(err)),
        }
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "sync",
        "version": "0.1.0",
        "description": "Drain the inbox into the canonical world document",
        "commands": [
            { "name": "sync", "parameters": [] }
        ],
        "storage": ["world.json", "inbox/"]
    })
}
