//! Output shaping for CLI replies and diagnostics.
//!
//! Command results go to stdout as one JSON reply object; error lists go to
//! stderr as bullets or into a single log field.

use crate::core::time;
use serde_json::{Map, Value};

pub const REPLY_VERSION: &str = "1";

/// Reply object for a command: `{reply_version, cmd, status, ts, event_id}`
/// plus every key of `body` (when it is an object).
pub fn reply(cmd: &str, status: &str, body: Value) -> Value {
    let mut out = Map::new();
    out.insert("reply_version".into(), REPLY_VERSION.into());
    out.insert("cmd".into(), cmd.into());
    out.insert("status".into(), status.into());
    out.insert("ts".into(), time::now_rfc3339().into());
    out.insert("event_id".into(), time::new_event_id().into());
    if let Value::Object(fields) = body {
        out.extend(fields);
    }
    Value::Object(out)
}

/// The first `max_items` errors on one line, then a count of the rest.
pub fn error_digest(errors: &[String], max_items: usize) -> String {
    let mut line = errors
        .iter()
        .take(max_items)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ");
    if errors.len() > max_items {
        line.push_str(&format!(" (+{} more)", errors.len() - max_items));
    }
    line
}

/// One `  - <error>` line per entry.
pub fn bulleted(messages: &[String]) -> String {
    messages
        .iter()
        .map(|m| format!("  - {}", m))
        .collect::<Vec<_>>()
        .join("\n")
}
