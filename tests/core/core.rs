use regex::Regex;
use serde_json::{Value, json};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::tempdir;
use zion::core::config::{CONFIG_ENV, STATE_DIR_ENV, ZionConfig};
use zion::core::store::{Store, write_json_atomic};
use zion::plugins::reputation;

fn zion_cmd(workdir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zion"));
    cmd.current_dir(workdir)
        .env_remove(CONFIG_ENV)
        .env(STATE_DIR_ENV, workdir.join("state"))
        .env("ZION_LOG", "off");
    cmd
}

fn run_zion(workdir: &Path, args: &[&str]) -> Output {
    zion_cmd(workdir)
        .args(args)
        .output()
        .expect("failed to execute zion")
}

fn run_zion_stdin(workdir: &Path, args: &[&str], input: &str) -> Output {
    let mut child = zion_cmd(workdir)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn zion");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn wire_message() -> Value {
    json!({
        "v": 1,
        "id": "m-1",
        "ts": "2026-03-01T12:00:00Z",
        "seq": 0,
        "from": "alice",
        "type": "say",
        "platform": "api",
        "position": {"x": 0, "y": 0, "z": 0, "zone": "plaza"},
        "payload": {"text": "hello"}
    })
}

fn envelope(output: &Output) -> Value {
    serde_json::from_str(&stdout(output)).expect("command output should be JSON")
}

#[test]
fn validate_accepts_file_and_prints_message() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("msg.json");
    fs::write(&path, wire_message().to_string()).unwrap();

    let out = run_zion(tmp.path(), &["validate", path.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let (first, rest) = text.split_once('\n').unwrap();
    assert_eq!(first, "VALID");
    let echoed: Value = serde_json::from_str(rest).unwrap();
    assert_eq!(echoed["from"], "alice");
    assert_eq!(echoed["type"], "say");
}

#[test]
fn validate_echoes_input_as_written() {
    let tmp = tempdir().unwrap();
    let mut msg = wire_message();
    msg["position"] = json!({"x": 0, "y": 2, "z": -1, "zone": "plaza"});
    msg["trace"] = json!("abc");
    let path = tmp.path().join("msg.json");
    fs::write(&path, msg.to_string()).unwrap();

    let out = run_zion(tmp.path(), &["validate", path.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let (_, rest) = text.split_once('\n').unwrap();
    let echoed: Value = serde_json::from_str(rest).unwrap();
    assert_eq!(echoed, msg);
    assert!(echoed["position"]["x"].is_u64());
}

#[test]
fn validate_reports_errors_from_stdin() {
    let tmp = tempdir().unwrap();
    let out = run_zion_stdin(tmp.path(), &["validate"], r#"{"from": "alice"}"#);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout(&out).trim(), "INVALID");
    let err = stderr(&out);
    assert!(err.contains("  - Missing field: v"));
    assert!(err.contains("  - Missing field: payload"));
}

#[test]
fn validate_api_mode_applies_restrictions() {
    let tmp = tempdir().unwrap();
    let mut msg = wire_message();
    msg["type"] = json!("forfeit");
    let path = tmp.path().join("msg.json");
    fs::write(&path, msg.to_string()).unwrap();

    let plain = run_zion(tmp.path(), &["validate", path.to_str().unwrap()]);
    assert!(plain.status.success());
    let api = run_zion(tmp.path(), &["validate", "--api", path.to_str().unwrap()]);
    assert_eq!(api.status.code(), Some(1));
    assert!(stderr(&api).contains("is not allowed for API agents"));
}

#[test]
fn validate_rejects_non_json_input() {
    let tmp = tempdir().unwrap();
    let out = run_zion_stdin(tmp.path(), &["validate"], "{ not json");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("invalid JSON"));

    let missing = run_zion(tmp.path(), &["validate", "nope.json"]);
    assert_eq!(missing.status.code(), Some(1));
    assert!(stderr(&missing).contains("cannot read"));
}

#[test]
fn sync_prints_four_line_summary() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path().join("state"));
    store.ensure_layout().unwrap();
    fs::write(store.inbox.join("a.json"), wire_message().to_string()).unwrap();

    let out = run_zion(tmp.path(), &["sync"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let re = Regex::new(
        r"^Files processed: 1\nMessages merged: 1\nFiles deleted: 1\nErrors: 0\n$",
    )
    .unwrap();
    assert!(re.is_match(&stdout(&out)), "got: {}", stdout(&out));
    assert!(store.world.exists());
}

#[test]
fn sync_exit_code_reflects_errors() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path().join("state"));
    store.ensure_layout().unwrap();
    fs::write(store.inbox.join("bad.json"), "{").unwrap();

    let out = run_zion(tmp.path(), &["sync"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("Errors: 1"));
    assert!(store.inbox.join("bad.json").exists());
}

#[test]
fn sync_creates_missing_state_dir() {
    let tmp = tempdir().unwrap();
    let out = run_zion(tmp.path(), &["sync"]);
    assert!(out.status.success());
    assert!(tmp.path().join("state/inbox").is_dir());
    assert!(tmp.path().join("state/world.json").is_file());
}

#[test]
fn concurrent_syncs_do_not_lose_messages() {
    let tmp = tempdir().unwrap();
    let store = Store::at(tmp.path().join("state"));
    store.ensure_layout().unwrap();
    for i in 0..20 {
        let msg = json!({"from": format!("c{}", i), "type": "say", "payload": {}});
        fs::write(store.inbox.join(format!("{:02}.json", i)), msg.to_string()).unwrap();
    }

    let children: Vec<_> = (0..3)
        .map(|_| {
            zion_cmd(tmp.path())
                .arg("sync")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .unwrap()
        })
        .collect();
    for child in children {
        let out = child.wait_with_output().unwrap();
        assert!(out.status.success(), "stderr: {}", stderr(&out));
    }

    let world: Value = serde_json::from_slice(&fs::read(&store.world).unwrap()).unwrap();
    assert_eq!(world["citizens"].as_object().unwrap().len(), 20);
    assert!(fs::read_dir(&store.inbox).unwrap().next().is_none());
}

#[test]
fn reputation_adjust_show_and_top() {
    let tmp = tempdir().unwrap();
    let out = run_zion(
        tmp.path(),
        &["reputation", "adjust", "--from", "alice", "--to", "bob", "--amount", "40", "--reason", "helped"],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let adjusted = envelope(&out);
    assert_eq!(adjusted["status"], "ok");
    assert_eq!(adjusted["outcome"]["new_score"], 40.0);

    let out = run_zion(
        tmp.path(),
        &["reputation", "adjust", "--from", "carol", "--to", "alice", "--amount", "-5"],
    );
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let shown = envelope(&run_zion(tmp.path(), &["reputation", "show", "bob"]));
    assert_eq!(shown["record"]["score"], 40.0);
    assert_eq!(shown["tier"], "Neutral");
    assert_eq!(shown["record"]["history"][0]["reason"], "helped");

    let top = envelope(&run_zion(tmp.path(), &["reputation", "top", "--limit", "2"]));
    let ids: Vec<&str> = top["citizens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["citizen_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["bob", "carol"]);

    let ledger = reputation::load_reputation(&tmp.path().join("state/reputation.json"));
    assert_eq!(ledger.get("alice").unwrap().score, -5.0);
}

#[test]
fn reputation_rejected_adjustment_exits_nonzero() {
    let tmp = tempdir().unwrap();
    let out = run_zion(
        tmp.path(),
        &["reputation", "adjust", "--from", "alice", "--to", "alice", "--amount", "500"],
    );
    assert_eq!(out.status.code(), Some(1));
    let rejected = envelope(&out);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["errors"].as_array().unwrap().len(), 2);
    assert!(!tmp.path().join("state/reputation.json").exists());
}

#[test]
fn reputation_show_unknown_citizen_fails() {
    let tmp = tempdir().unwrap();
    let out = run_zion(tmp.path(), &["reputation", "show", "ghost"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Not found"));
}

#[test]
fn reputation_tick_and_audit() {
    let tmp = tempdir().unwrap();
    run_zion(
        tmp.path(),
        &["reputation", "adjust", "--from", "alice", "--to", "bob", "--amount", "10"],
    );
    // Too soon after creation to decay.
    let tick = envelope(&run_zion(tmp.path(), &["reputation", "tick"]));
    assert_eq!(tick["decayed"], 0);
    assert_eq!(tick["citizens"], 2);

    let audit = envelope(&run_zion(tmp.path(), &["reputation", "audit"]));
    for row in audit["citizens"].as_array().unwrap() {
        assert_eq!(row["delta"], 0.0);
    }
}

#[test]
fn reputation_help_schema_stay_in_sync() {
    let tmp = tempdir().unwrap();
    let help = stdout(&run_zion(tmp.path(), &["reputation", "--help"]));
    let schema = reputation::schema();
    for command in schema["commands"].as_array().unwrap() {
        let name = command["name"].as_str().unwrap();
        let re = Regex::new(&format!(r"(?m)^\s+{}\s+", regex::escape(name))).unwrap();
        assert!(re.is_match(&help), "reputation --help missing command: {}", name);
    }
}

#[test]
fn schema_lists_every_subsystem() {
    let tmp = tempdir().unwrap();
    let out = run_zion(tmp.path(), &["schema", "--deterministic"]);
    assert!(out.status.success());
    let schema = envelope(&out);
    assert!(schema.get("generated_at").is_none());
    let names: Vec<&String> = schema["subsystems"].as_object().unwrap().keys().collect();
    assert_eq!(names, vec!["protocol", "reputation", "sync"]);
}

#[test]
fn config_file_selects_state_dir() {
    let tmp = tempdir().unwrap();
    let config_path = tmp.path().join("custom.toml");
    fs::write(
        &config_path,
        "[paths]\nstate_dir = \"elsewhere\"\n\n[sync]\narchive_processed = true\n",
    )
    .unwrap();
    let config = ZionConfig::from_file(&config_path).unwrap();
    assert!(config.sync.archive_processed);

    let inbox = tmp.path().join("elsewhere/inbox");
    fs::create_dir_all(&inbox).unwrap();
    write_json_atomic(&inbox.join("a.json"), &wire_message()).unwrap();

    let out = Command::new(env!("CARGO_BIN_EXE_zion"))
        .current_dir(tmp.path())
        .env(CONFIG_ENV, &config_path)
        .env_remove(STATE_DIR_ENV)
        .env("ZION_LOG", "off")
        .arg("sync")
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(inbox.join("_processed/a.json").exists());
    assert!(tmp.path().join("elsewhere/world.json").exists());
}

#[test]
fn bad_config_is_reported() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("zion.toml"), "[reputation]\ndecay_rate = 2.0\n").unwrap();
    let out = run_zion(tmp.path(), &["sync"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Configuration error"));
}
