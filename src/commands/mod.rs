//! Command-line interface for contrib-rank
//!
//! This module turns command-line arguments and the configuration file into a run of the
//! collection engine and renders what comes out of it.
//!
//! # Implementation Model
//!
//! ## Commands
//!
//! - **analyze**: Resolve the run configuration, discover organization members when no
//!   identities are given, run the orchestrator and print the run summary and ranking,
//!   optionally exporting the finalized results as JSON
//! - **init**: Generate a default configuration file
//! - **validate**: Check a configuration file
//! - **reset**: Delete every checkpoint so the next run starts fresh
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes to the appropriate
//! command handler. Commands talk to the outside world through [`Host`] so they can be tested
//! without a terminal.
//!
//! Settings come from a TOML file (`contrib-rank.toml` by default). Values given on the
//! command line or through the environment override it.

mod analyze;
mod common;
mod config;
mod host;
mod init;
mod reset;
mod run;
mod validate;

pub use analyze::{AnalyzeArgs, analyze};
pub use common::{ColorMode, LogLevel};
pub use config::{Config, FetchSettings, RateLimitSettings};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use reset::{ResetArgs, reset_checkpoints};
pub use run::run;
pub use validate::{ValidateArgs, validate_config};
