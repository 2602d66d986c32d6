//! Zion: state core for a shared persistent world.
//!
//! Clients on several platforms (desktop, phone, VR, AR, API agents) drop JSON
//! messages into an inbox directory. Zion validates those messages, folds them
//! into one canonical world document, and maintains a reputation ledger
//! between citizens.
//!
//! # Architecture
//!
//! ## Documents
//!
//! - **Inbox** (`<state>/inbox/`): one JSON file per message or batch, consumed
//!   only after it parses
//! - **World** (`<state>/world.json`): citizens, gardens, structures
//! - **Ledger** (`<state>/reputation.json`): scores, bounded history, daily
//!   adjustment counters
//!
//! Every write replaces the document atomically (temp file + rename) while
//! holding a `<document>.lock` lease, so concurrent writers cannot lose
//! updates and readers never see a half-written file.
//!
//! ## Subsystems (Plugins)
//!
//! - `protocol`: wire schema, validation, API-client restrictions
//! - `world`: world document model and store
//! - `sync`: inbox drain and last-writer-wins merge
//! - `reputation`: decaying, rate-limited trust scores
//!
//! # Examples
//!
//! ```bash
//! # Check a message before dropping it in the inbox
//! zion validate message.json
//!
//! # Merge everything pending
//! zion sync
//!
//! # Reputation
//! zion reputation adjust --from alice --to bob --amount 5 --reason "helped build"
//! zion reputation top --limit 5 --format text
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: Shared primitives (error, config, logging, store, time)
//! - [`plugins`]: Subsystem implementations

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, ReputationCommand, SchemaCli, ValidateCli};
use crate::core::config::ZionConfig;
use crate::core::error::ZionError;
use crate::core::store::Store;
use crate::core::{logging, output, time};
use crate::plugins::protocol::{self, Message};
use crate::plugins::reputation::{self, AdjustmentRequest, ReputationStore, Tier};
use crate::plugins::sync::{self, MergeProcessor};

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::Read;

/// Parse the command line, dispatch, and return the process exit code.
pub fn run() -> Result<i32, ZionError> {
    let cli = Cli::parse();
    let config = match ZionConfig::load() {
        Ok(config) => config,
        Err(err) => {
            logging::init("info");
            return Err(err);
        }
    };
    logging::init(&config.logging.level);

    match cli.command {
        Command::Validate(validate_cli) => run_validate(&validate_cli),
        Command::Sync => run_sync(&config),
        Command::Reputation(rep_cli) => run_reputation(&config, rep_cli.command),
        Command::Schema(schema_cli) => run_schema(&schema_cli),
    }
}

fn print_json(value: &Value) -> Result<(), ZionError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_validate(args: &ValidateCli) -> Result<i32, ZionError> {
    let raw = match &args.path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| (path.display().to_string(), e)),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map(|_| buf)
                .map_err(|e| ("<stdin>".to_string(), e))
        }
    };
    let raw = match raw {
        Ok(raw) => raw,
        Err((source, err)) => {
            eprintln!("Error: cannot read {}: {}", source, err);
            return Ok(1);
        }
    };
    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Error: invalid JSON: {}", err);
            return Ok(1);
        }
    };

    let (parsed, mut errors) = match Message::parse(&value) {
        Ok(message) => (Some(message), Vec::new()),
        Err(errors) => (None, errors),
    };
    if args.api {
        errors.extend(protocol::check_api_restrictions(&value));
    }

    // Echo the input as received; the typed decode only gates validity.
    match parsed {
        Some(_) if errors.is_empty() => {
            println!("VALID");
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(0)
        }
        _ => {
            println!("INVALID");
            eprintln!("{}", output::bulleted(&errors));
            Ok(1)
        }
    }
}

fn run_sync(config: &ZionConfig) -> Result<i32, ZionError> {
    let store = Store::from_paths(&config.paths);
    store.ensure_layout()?;
    let processor = MergeProcessor::for_store(&store, config.sync.clone());
    let summary = processor.run(Utc::now())?;
    tracing::info!(
        skipped = summary.skipped,
        digest = summary.digest.as_deref().unwrap_or("-"),
        "sync pass complete"
    );
    println!("{}", summary.render());
    Ok(if summary.is_clean() { 0 } else { 1 })
}

fn tier_label(tier: Tier) -> colored::ColoredString {
    match tier {
        Tier::Untrusted => tier.as_str().red(),
        Tier::Neutral => tier.as_str().normal(),
        Tier::Respected => tier.as_str().green(),
        Tier::Honored => tier.as_str().cyan(),
        Tier::Legendary => tier.as_str().yellow().bold(),
    }
}

fn run_reputation(config: &ZionConfig, command: ReputationCommand) -> Result<i32, ZionError> {
    let store = Store::from_paths(&config.paths);
    let ledger_store = ReputationStore::new(&store.reputation, config.sync.lease_policy());
    let policy = &config.reputation;

    match command {
        ReputationCommand::Show { id } => {
            let ledger = ledger_store.load();
            let record = ledger
                .get(&id)
                .ok_or_else(|| ZionError::NotFound(format!("citizen '{}' has no reputation record", id)))?;
            print_json(&output::reply(
                "reputation.show",
                "ok",
                json!({
                    "citizen_id": id,
                    "tier": record.tier(),
                    "record": record,
                }),
            ))?;
            Ok(0)
        }
        ReputationCommand::Adjust {
            from,
            to,
            amount,
            reason,
        } => {
            let request = AdjustmentRequest {
                from_id: from,
                target_id: to,
                amount,
                reason,
                timestamp: Utc::now(),
            };
            let lease = ledger_store.lease()?;
            let mut ledger = ledger_store.load_for_update(&lease)?;
            match ledger.apply_adjustment(&request, policy) {
                Ok(outcome) => {
                    ledger_store.save(&ledger)?;
                    if outcome.tier_changed {
                        tracing::info!(
                            citizen = %request.target_id,
                            from = %outcome.old_tier,
                            to = %outcome.new_tier,
                            "tier changed"
                        );
                    }
                    print_json(&output::reply(
                        "reputation.adjust",
                        "ok",
                        json!({ "request": request, "outcome": outcome }),
                    ))?;
                    Ok(0)
                }
                Err(errors) => {
                    print_json(&output::reply(
                        "reputation.adjust",
                        "rejected",
                        json!({ "request": request, "errors": errors }),
                    ))?;
                    Ok(1)
                }
            }
        }
        ReputationCommand::Tick => {
            let now = Utc::now();
            let lease = ledger_store.lease()?;
            let mut ledger = ledger_store.load_for_update(&lease)?;
            let decayed = ledger.tick_reputation(now, policy);
            if decayed > 0 {
                ledger_store.save(&ledger)?;
            }
            print_json(&output::reply(
                "reputation.tick",
                "ok",
                json!({ "decayed": decayed, "citizens": ledger.records.len() }),
            ))?;
            Ok(0)
        }
        ReputationCommand::Top { limit, format } => {
            let ranked = ledger_store.load().get_top_citizens(limit);
            if format == "text" {
                for (rank, entry) in ranked.iter().enumerate() {
                    println!(
                        "{:>3}. {:<24} {:>10.2}  {}",
                        rank + 1,
                        entry.citizen_id,
                        entry.score,
                        tier_label(entry.tier)
                    );
                }
            } else {
                print_json(&output::reply(
                    "reputation.top",
                    "ok",
                    json!({ "citizens": ranked }),
                ))?;
            }
            Ok(0)
        }
        ReputationCommand::Audit => {
            let ledger = ledger_store.load();
            let replayed = reputation::replay_scores(ledger.history(), policy);
            let mut drift = Vec::new();
            for (id, record) in &ledger.records {
                let expected = replayed.get(id).copied().unwrap_or(policy.neutral_score);
                drift.push(json!({
                    "citizen_id": id,
                    "stored": record.score,
                    "replayed": expected,
                    "delta": record.score - expected,
                }));
            }
            print_json(&output::reply(
                "reputation.audit",
                "ok",
                json!({ "citizens": drift }),
            ))?;
            Ok(0)
        }
    }
}

fn run_schema(args: &SchemaCli) -> Result<i32, ZionError> {
    let mut schemas = BTreeMap::new();
    schemas.insert("protocol", protocol::schema());
    schemas.insert("sync", sync::schema());
    schemas.insert("reputation", reputation::schema());

    let output = if let Some(sub) = &args.subsystem {
        schemas
            .get(sub.as_str())
            .cloned()
            .unwrap_or(json!({ "error": "subsystem not found" }))
    } else {
        let mut envelope = json!({
            "schema_version": "1.0.0",
            "subsystems": schemas
        });
        if !args.deterministic {
            if let Some(obj) = envelope.as_object_mut() {
                obj.insert("generated_at".to_string(), json!(time::now_rfc3339()));
            }
        }
        envelope
    };
    print_json(&output)?;
    Ok(0)
}
