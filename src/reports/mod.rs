//! Report generation for finished runs
//!
//! Two generators turn a run's results into output:
//! - **Console**: the per-pair run summary with diagnostics, then the ranking, with optional
//!   ANSI colors
//! - **JSON**: the finalized aggregate per pair plus the ranking, for downstream tools such as
//!   a spreadsheet renderer
//!
//! Both write into any `core::fmt::Write`, leaving the choice of destination to the caller.

mod console;
mod json;

pub use console::generate as generate_console;
pub use json::generate as generate_json;
