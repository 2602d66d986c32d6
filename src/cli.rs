//! CLI struct definitions for the Zion command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "zion",
    version = env!("CARGO_PKG_VERSION"),
    about = "Zion state core: validates wire messages, merges the inbox into the canonical world document, and keeps the citizen reputation ledger."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate one protocol message (file or stdin)
    Validate(ValidateCli),
    /// Drain the inbox into the world document
    Sync,
    /// Inspect and adjust the reputation ledger
    Reputation(ReputationCli),
    /// Print subsystem command schemas as JSON
    Schema(SchemaCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct ValidateCli {
    /// Message file; reads stdin when omitted.
    pub path: Option<PathBuf>,
    /// Also enforce API-client restrictions.
    #[clap(long)]
    pub api: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ReputationCli {
    #[clap(subcommand)]
    pub command: ReputationCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ReputationCommand {
    /// Show one citizen's record
    Show {
        /// Citizen id
        id: String,
    },
    /// Apply a reputation adjustment
    Adjust {
        /// Acting citizen
        #[clap(long)]
        from: String,
        /// Target citizen
        #[clap(long)]
        to: String,
        /// Signed amount
        #[clap(long, allow_hyphen_values = true)]
        amount: f64,
        #[clap(long, default_value = "")]
        reason: String,
    },
    /// Decay every score toward neutral
    Tick,
    /// Highest scores first
    Top {
        #[clap(long, default_value_t = 10)]
        limit: usize,
        /// Output format: 'json' or 'text'.
        #[clap(long, default_value = "json")]
        format: String,
    },
    /// Compare stored scores against a replay of the adjustment history
    Audit,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SchemaCli {
    /// Only this subsystem
    #[clap(long)]
    pub subsystem: Option<String>,
    /// Omit the generation timestamp
    #[clap(long)]
    pub deterministic: bool,
}
