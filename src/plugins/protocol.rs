//! Wire protocol: message kinds, envelope validation and typed decoding.
//!
//! Two views of an inbound message exist:
//!
//! - [`Message`]: the strict, fully typed envelope. Only produced from a value
//!   that passes [`validate`], so downstream code never re-checks the schema.
//! - [`Envelope`]: the merge-boundary view. It needs only `from` and `type`,
//!   and decodes the payload once into an [`Action`] so the merge pipeline
//!   matches on variants instead of poking at JSON.

use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_API_TEXT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Join,
    Leave,
    Heartbeat,
    Idle,
    Move,
    Warp,
    Say,
    Shout,
    Whisper,
    Emote,
    Build,
    Plant,
    Craft,
    Compose,
    Harvest,
    TradeOffer,
    TradeAccept,
    TradeDecline,
    Buy,
    Sell,
    Gift,
    Teach,
    Learn,
    MentorOffer,
    MentorAccept,
    Challenge,
    AcceptChallenge,
    Forfeit,
    Score,
    Discover,
    AnchorPlace,
    Inspect,
    IntentionSet,
    IntentionClear,
    WarpFork,
    ReturnHome,
    FederationAnnounce,
    FederationHandshake,
}

impl MessageType {
    pub const ALL: [MessageType; 38] = [
        MessageType::Join,
        MessageType::Leave,
        MessageType::Heartbeat,
        MessageType::Idle,
        MessageType::Move,
        MessageType::Warp,
        MessageType::Say,
        MessageType::Shout,
        MessageType::Whisper,
        MessageType::Emote,
        MessageType::Build,
        MessageType::Plant,
        MessageType::Craft,
        MessageType::Compose,
        MessageType::Harvest,
        MessageType::TradeOffer,
        MessageType::TradeAccept,
        MessageType::TradeDecline,
        MessageType::Buy,
        MessageType::Sell,
        MessageType::Gift,
        MessageType::Teach,
        MessageType::Learn,
        MessageType::MentorOffer,
        MessageType::MentorAccept,
        MessageType::Challenge,
        MessageType::AcceptChallenge,
        MessageType::Forfeit,
        MessageType::Score,
        MessageType::Discover,
        MessageType::AnchorPlace,
        MessageType::Inspect,
        MessageType::IntentionSet,
        MessageType::IntentionClear,
        MessageType::WarpFork,
        MessageType::ReturnHome,
        MessageType::FederationAnnounce,
        MessageType::FederationHandshake,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Idle => "idle",
            MessageType::Move => "move",
            MessageType::Warp => "warp",
            MessageType::Say => "say",
            MessageType::Shout => "shout",
            MessageType::Whisper => "whisper",
            MessageType::Emote => "emote",
            MessageType::Build => "build",
            MessageType::Plant => "plant",
            MessageType::Craft => "craft",
            MessageType::Compose => "compose",
            MessageType::Harvest => "harvest",
            MessageType::TradeOffer => "trade_offer",
            MessageType::TradeAccept => "trade_accept",
            MessageType::TradeDecline => "trade_decline",
            MessageType::Buy => "buy",
            MessageType::Sell => "sell",
            MessageType::Gift => "gift",
            MessageType::Teach => "teach",
            MessageType::Learn => "learn",
            MessageType::MentorOffer => "mentor_offer",
            MessageType::MentorAccept => "mentor_accept",
            MessageType::Challenge => "challenge",
            MessageType::AcceptChallenge => "accept_challenge",
            MessageType::Forfeit => "forfeit",
            MessageType::Score => "score",
            MessageType::Discover => "discover",
            MessageType::AnchorPlace => "anchor_place",
            MessageType::Inspect => "inspect",
            MessageType::IntentionSet => "intention_set",
            MessageType::IntentionClear => "intention_clear",
            MessageType::WarpFork => "warp_fork",
            MessageType::ReturnHome => "return_home",
            MessageType::FederationAnnounce => "federation_announce",
            MessageType::FederationHandshake => "federation_handshake",
        }
    }

    /// Directed kinds that need the recipient's consent, so must name one.
    pub fn requires_consent(self) -> bool {
        matches!(
            self,
            MessageType::Whisper
                | MessageType::Challenge
                | MessageType::TradeOffer
                | MessageType::MentorOffer
        )
    }

    /// Kinds an `api` platform agent may emit.
    pub fn api_allowed(self) -> bool {
        matches!(
            self,
            MessageType::Say
                | MessageType::Shout
                | MessageType::Emote
                | MessageType::Move
                | MessageType::Warp
                | MessageType::Discover
                | MessageType::Build
                | MessageType::Plant
                | MessageType::Harvest
                | MessageType::Craft
                | MessageType::Compose
                | MessageType::Gift
                | MessageType::TradeOffer
                | MessageType::TradeAccept
                | MessageType::TradeDecline
                | MessageType::Buy
                | MessageType::Sell
                | MessageType::IntentionSet
                | MessageType::IntentionClear
                | MessageType::Join
                | MessageType::Leave
                | MessageType::Heartbeat
                | MessageType::Inspect
                | MessageType::Teach
                | MessageType::MentorOffer
        )
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid message type: {}", s))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Phone,
    Vr,
    Ar,
    Api,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Desktop,
        Platform::Phone,
        Platform::Vr,
        Platform::Ar,
        Platform::Api,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Desktop => "desktop",
            Platform::Phone => "phone",
            Platform::Vr => "vr",
            Platform::Ar => "ar",
            Platform::Api => "api",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Invalid platform: {}", s))
    }
}

/// A point in a named zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub zone: String,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64, zone: impl Into<String>) -> Self {
        Position {
            x,
            y,
            z,
            zone: zone.into(),
        }
    }
}

/// Strict protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub v: u32,
    pub id: String,
    pub ts: String,
    pub seq: u64,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub platform: Platform,
    pub position: Position,
    pub payload: Map<String, Value>,
}

impl Message {
    /// Validate then decode. Errors are the full violation list.
    pub fn parse(value: &Value) -> Result<Message, Vec<String>> {
        let (valid, errors) = validate(value);
        if !valid {
            return Err(errors);
        }
        let mut owned = value.clone();
        // `v` may arrive as 1.0, which the validator accepts.
        owned["v"] = Value::from(PROTOCOL_VERSION);
        serde_json::from_value(owned).map_err(|e| vec![format!("Decode failed: {}", e)])
    }

    pub fn recipient(&self) -> Option<&str> {
        self.payload.get("to").and_then(Value::as_str)
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_non_blank_string(value: &Value) -> bool {
    value.as_str().is_some_and(|s| !s.trim().is_empty())
}

/// Check a raw message against the wire schema.
///
/// Never fails: every violation is collected and returned. `valid` is true
/// iff `errors` is empty.
pub fn validate(message: &Value) -> (bool, Vec<String>) {
    let Some(msg) = message.as_object() else {
        return (false, vec!["Message must be a JSON object".to_string()]);
    };
    let mut errors = Vec::new();

    match msg.get("v") {
        None => errors.push("Missing field: v".to_string()),
        Some(v) if v.as_f64() != Some(f64::from(PROTOCOL_VERSION)) => errors.push(format!(
            "Invalid version: {} (expected {})",
            display_value(v),
            PROTOCOL_VERSION
        )),
        Some(_) => {}
    }

    match msg.get("id") {
        None => errors.push("Missing field: id".to_string()),
        Some(id) if !is_non_blank_string(id) => {
            errors.push("Field 'id' must be a non-empty string".to_string())
        }
        Some(_) => {}
    }

    match msg.get("ts") {
        None => errors.push("Missing field: ts".to_string()),
        Some(Value::String(ts)) => {
            if time::parse_iso8601(ts).is_none() {
                errors.push(format!("Invalid ISO-8601 timestamp: {}", ts));
            }
        }
        Some(_) => errors.push("Field 'ts' must be a string".to_string()),
    }

    match msg.get("seq") {
        None => errors.push("Missing field: seq".to_string()),
        Some(Value::Number(n)) if n.is_u64() => {}
        Some(Value::Number(n)) if n.is_i64() => errors.push(format!(
            "Field 'seq' must be non-negative (got {})",
            n
        )),
        Some(_) => errors.push("Field 'seq' must be an integer".to_string()),
    }

    match msg.get("from") {
        None => errors.push("Missing field: from".to_string()),
        Some(from) if !is_non_blank_string(from) => {
            errors.push("Field 'from' must be a non-empty string".to_string())
        }
        Some(_) => {}
    }

    let kind = match msg.get("type") {
        None => {
            errors.push("Missing field: type".to_string());
            None
        }
        Some(t) => match t.as_str().map(MessageType::from_str) {
            Some(Ok(kind)) => Some(kind),
            _ => {
                errors.push(format!("Invalid message type: {}", display_value(t)));
                None
            }
        },
    };

    match msg.get("platform") {
        None => errors.push("Missing field: platform".to_string()),
        Some(p) if p.as_str().map(Platform::from_str).is_some_and(|r| r.is_ok()) => {}
        Some(p) => errors.push(format!(
            "Invalid platform: {} (must be one of {})",
            display_value(p),
            Platform::ALL.map(Platform::as_str).join(", ")
        )),
    }

    match msg.get("position") {
        None => errors.push("Missing field: position".to_string()),
        Some(Value::Object(pos)) => {
            for axis in ["x", "y", "z"] {
                match pos.get(axis) {
                    None => errors.push(format!("Missing position.{}", axis)),
                    Some(Value::Number(_)) => {}
                    Some(_) => errors.push(format!("position.{} must be a number", axis)),
                }
            }
            match pos.get("zone") {
                None => errors.push("Missing position.zone".to_string()),
                Some(zone) if !is_non_blank_string(zone) => {
                    errors.push("position.zone must be a non-empty string".to_string())
                }
                Some(_) => {}
            }
        }
        Some(_) => errors.push("Field 'position' must be an object".to_string()),
    }

    let payload = match msg.get("payload") {
        None => {
            errors.push("Missing field: payload".to_string());
            None
        }
        Some(Value::Object(p)) => Some(p),
        Some(_) => {
            errors.push("Field 'payload' must be an object".to_string());
            None
        }
    };

    // Consent only applies once both the kind and the payload are readable.
    if let (Some(kind), Some(payload)) = (kind, payload) {
        if kind.requires_consent() && !payload.contains_key("to") {
            errors.push(format!(
                "Message type '{}' requires 'to' field in payload",
                kind
            ));
        }
    }

    (errors.is_empty(), errors)
}

/// Extra gate for messages submitted by API agents.
pub fn check_api_restrictions(message: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let platform = message.get("platform").and_then(Value::as_str);
    if platform != Some(Platform::Api.as_str()) {
        errors.push("API messages must have platform \"api\"".to_string());
    }
    let kind = message.get("type").and_then(Value::as_str).unwrap_or("");
    let allowed = MessageType::from_str(kind).is_ok_and(MessageType::api_allowed);
    if !allowed {
        errors.push(format!("Type \"{}\" is not allowed for API agents", kind));
    }
    let text = message
        .get("payload")
        .and_then(|p| p.get("text"))
        .and_then(Value::as_str);
    if text.is_some_and(|t| t.chars().count() > MAX_API_TEXT_CHARS) {
        errors.push(format!(
            "Text payload exceeds {} character limit",
            MAX_API_TEXT_CHARS
        ));
    }
    errors
}

/// State transition carried by a message, decoded once at the merge boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Destination as received; absent when the payload has none.
    Move {
        destination: Option<Value>,
    },
    Plant {
        plot: Option<String>,
        species: Option<String>,
    },
    Build {
        structure: Option<String>,
    },
    Craft {
        recipe: Option<String>,
    },
    SetIntention {
        intention: Value,
    },
    ClearIntention,
    /// No state beyond the action log.
    Record,
}

impl Action {
    pub fn decode(kind: &str, payload: &Value) -> Action {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match MessageType::from_str(kind) {
            Ok(MessageType::Move) => Action::Move {
                destination: payload.get("destination").cloned(),
            },
            Ok(MessageType::Plant) => Action::Plant {
                plot: text("plot").filter(|p| !p.is_empty()),
                species: text("species"),
            },
            Ok(MessageType::Build) => Action::Build {
                structure: text("structure"),
            },
            Ok(MessageType::Craft) => Action::Craft {
                recipe: text("recipe"),
            },
            Ok(MessageType::IntentionSet) => Action::SetIntention {
                intention: payload.get("intention").cloned().unwrap_or(Value::Null),
            },
            Ok(MessageType::IntentionClear) => Action::ClearIntention,
            _ => Action::Record,
        }
    }
}

/// Merge-boundary view of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: String,
    pub kind: String,
    pub ts: Option<String>,
    /// Raw `position`, stored on new citizens and structures as written.
    pub position: Option<Value>,
    /// Payload as received; recorded verbatim in the action log.
    pub payload: Value,
    pub action: Action,
}

impl Envelope {
    /// `None` when the message is inert (no usable `from` or `type`).
    pub fn decode(message: &Value) -> Option<Envelope> {
        let obj = message.as_object()?;
        let from = obj.get("from").and_then(Value::as_str).filter(|s| !s.is_empty())?;
        let kind = obj.get("type").and_then(Value::as_str).filter(|s| !s.is_empty())?;
        let payload = obj
            .get("payload")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        Some(Envelope {
            from: from.to_string(),
            kind: kind.to_string(),
            ts: obj.get("ts").and_then(Value::as_str).map(str::to_string),
            position: obj.get("position").cloned(),
            action: Action::decode(kind, &payload),
            payload,
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "protocol",
        "version": "0.1.0",
        "description": "Validate protocol messages against the wire schema",
        "commands": [
            { "name": "validate", "parameters": ["path", "api"] }
        ],
        "message_types": MessageType::ALL.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "platforms": Platform::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        "storage": []
    })
}
