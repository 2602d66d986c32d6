//! Shared primitives for the Zion state core.
//!
//! Everything that is not a subsystem lives here: errors, configuration,
//! logging, timestamps, and the durable document store.

pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod store;
pub mod time;
