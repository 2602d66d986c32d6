use serde_json::{Value, json};
use std::str::FromStr;
use zion::plugins::protocol::{
    self, Action, Envelope, Message, MessageType, Platform, Position, check_api_restrictions,
    validate,
};

fn sample() -> Value {
    json!({
        "v": 1,
        "id": "01HZX3",
        "ts": "2026-03-01T12:00:00Z",
        "seq": 7,
        "from": "alice",
        "type": "say",
        "platform": "desktop",
        "position": {"x": 1.0, "y": 0.0, "z": -2.5, "zone": "plaza"},
        "payload": {"text": "hello"}
    })
}

#[test]
fn test_well_formed_message_passes() {
    let (valid, errors) = validate(&sample());
    assert!(valid, "unexpected errors: {:?}", errors);
    assert!(errors.is_empty());

    let message = Message::parse(&sample()).unwrap();
    assert_eq!(message.kind, MessageType::Say);
    assert_eq!(message.platform, Platform::Desktop);
    assert_eq!(message.position, Position::new(1.0, 0.0, -2.5, "plaza"));
    assert_eq!(message.recipient(), None);
}

#[test]
fn test_every_listed_type_parses() {
    assert_eq!(MessageType::ALL.len(), 38);
    for kind in MessageType::ALL {
        let mut msg = sample();
        msg["type"] = json!(kind.as_str());
        msg["payload"]["to"] = json!("bob");
        assert!(validate(&msg).0, "{} should validate", kind);
        assert_eq!(MessageType::from_str(kind.as_str()), Ok(kind));
    }
}

#[test]
fn test_missing_fields_are_all_reported() {
    let (valid, errors) = validate(&json!({}));
    assert!(!valid);
    for field in ["v", "id", "ts", "seq", "from", "type", "platform", "position", "payload"] {
        assert!(
            errors.contains(&format!("Missing field: {}", field)),
            "no error for {}: {:?}",
            field,
            errors
        );
    }
}

#[test]
fn test_non_object_is_a_single_error() {
    for raw in [json!([1, 2]), json!("hi"), json!(null)] {
        let (valid, errors) = validate(&raw);
        assert!(!valid);
        assert_eq!(errors, vec!["Message must be a JSON object".to_string()]);
    }
}

#[test]
fn test_field_level_violations() {
    let mut msg = sample();
    msg["v"] = json!(2);
    msg["seq"] = json!(-3);
    msg["platform"] = json!("watch");
    msg["ts"] = json!("yesterday");
    let (_, errors) = validate(&msg);
    assert!(errors.contains(&"Invalid version: 2 (expected 1)".to_string()));
    assert!(errors.contains(&"Field 'seq' must be non-negative (got -3)".to_string()));
    assert!(errors.contains(
        &"Invalid platform: watch (must be one of desktop, phone, vr, ar, api)".to_string()
    ));
    assert!(errors.contains(&"Invalid ISO-8601 timestamp: yesterday".to_string()));
    assert_eq!(errors.len(), 4);
}

#[test]
fn test_float_version_one_is_accepted() {
    let mut msg = sample();
    msg["v"] = json!(1.0);
    assert!(validate(&msg).0);
    assert_eq!(Message::parse(&msg).unwrap().v, 1);
}

#[test]
fn test_position_shape() {
    let mut msg = sample();
    msg["position"] = json!({"x": 1, "y": "up", "zone": "  "});
    let (_, errors) = validate(&msg);
    assert!(errors.contains(&"position.y must be a number".to_string()));
    assert!(errors.contains(&"Missing position.z".to_string()));
    assert!(errors.contains(&"position.zone must be a non-empty string".to_string()));

    msg["position"] = json!([0, 0, 0]);
    let (_, errors) = validate(&msg);
    assert_eq!(errors, vec!["Field 'position' must be an object".to_string()]);
}

#[test]
fn test_consent_kinds_need_recipient() {
    for kind in ["whisper", "challenge", "trade_offer", "mentor_offer"] {
        let mut msg = sample();
        msg["type"] = json!(kind);
        let (valid, errors) = validate(&msg);
        assert!(!valid);
        assert_eq!(
            errors,
            vec![format!("Message type '{}' requires 'to' field in payload", kind)]
        );
        msg["payload"]["to"] = json!("bob");
        assert!(validate(&msg).0);
        assert_eq!(Message::parse(&msg).unwrap().recipient(), Some("bob"));
    }
}

#[test]
fn test_unknown_type_rejected() {
    let mut msg = sample();
    msg["type"] = json!("teleport");
    let (_, errors) = validate(&msg);
    assert_eq!(errors, vec!["Invalid message type: teleport".to_string()]);
}

#[test]
fn test_api_restrictions() {
    let mut msg = sample();
    msg["platform"] = json!("api");
    assert!(check_api_restrictions(&msg).is_empty());

    msg["payload"]["text"] = json!("x".repeat(501));
    assert_eq!(
        check_api_restrictions(&msg),
        vec!["Text payload exceeds 500 character limit".to_string()]
    );

    msg["payload"]["text"] = json!("ok");
    msg["type"] = json!("forfeit");
    msg["platform"] = json!("vr");
    let errors = check_api_restrictions(&msg);
    assert_eq!(errors.len(), 2);
    assert!(errors[1].contains("forfeit"));
}

#[test]
fn test_envelope_requires_sender_and_type() {
    assert!(Envelope::decode(&json!({"type": "say"})).is_none());
    assert!(Envelope::decode(&json!({"from": "", "type": "say"})).is_none());
    assert!(Envelope::decode(&json!({"from": "alice"})).is_none());

    let env = Envelope::decode(&json!({"from": "alice", "type": "say"})).unwrap();
    assert_eq!(env.payload, json!({}));
    assert_eq!(env.action, Action::Record);
    assert_eq!(env.ts, None);
}

#[test]
fn test_action_decoding() {
    let moved = Action::decode(
        "move",
        &json!({"destination": {"x": 5, "y": 0, "z": 1, "zone": "garden"}}),
    );
    assert_eq!(
        moved,
        Action::Move {
            destination: Some(json!({"x": 5, "y": 0, "z": 1, "zone": "garden"}))
        }
    );
    // Partial destinations are carried as written.
    assert_eq!(
        Action::decode("move", &json!({"destination": {"x": 5}})),
        Action::Move {
            destination: Some(json!({"x": 5}))
        }
    );
    assert_eq!(
        Action::decode("move", &json!({"to": "plaza"})),
        Action::Move { destination: None }
    );
    assert_eq!(
        Action::decode("plant", &json!({"plot": "", "species": "fern"})),
        Action::Plant {
            plot: None,
            species: Some("fern".into())
        }
    );
    assert_eq!(Action::decode("intention_clear", &json!({})), Action::ClearIntention);
    assert_eq!(
        Action::decode("intention_set", &json!({})),
        Action::SetIntention {
            intention: Value::Null
        }
    );
}

#[test]
fn test_schema_lists_vocabulary() {
    let schema = protocol::schema();
    assert_eq!(schema["message_types"].as_array().unwrap().len(), 38);
    assert_eq!(
        schema["platforms"],
        json!(["desktop", "phone", "vr", "ar", "api"])
    );
}
