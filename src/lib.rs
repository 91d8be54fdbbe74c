//! contrib-rank crate
//!
//! Collects activity metrics for candidate identities across one or more GitHub organizations
//! and turns them into comparable scores. The collection engine is resumable: every processed
//! page is folded into a per-pair tally and checkpointed, so an interrupted run picks up where
//! it left off.
//!
//! This crate is an implementation detail of the `contrib-rank` tool. Its API is fluid and may
//! change without warning and in a semver-incompatible way.

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[doc(hidden)]
pub mod commands;

#[doc(hidden)]
pub mod facts;

#[doc(hidden)]
pub mod metrics;

#[doc(hidden)]
pub mod reports;

pub use crate::commands::{Host, run};
