//! Ranks candidates by their activity across GitHub organizations.
//!
//! # Quick Start
//!
//! ```bash
//! export GITHUB_TOKEN=ghp_...
//! contrib-rank analyze --org acme --user alice,bob --months 12
//! ```
//!
//! Progress is checkpointed after every page. If a run is interrupted, running the same
//! command again picks up where it stopped. `contrib-rank reset` discards all progress.
//!
//! Use `contrib-rank init` to write a commented configuration file and
//! `contrib-rank validate` to check one.

use contrib_rank::{Host, run};
use std::io::Write;
use std::io::{stderr, stdout};

/// Default host that talks to the real terminal.
#[derive(Debug, Clone, Default)]
pub struct RealHost;

impl Host for RealHost {
    fn output(&mut self) -> impl Write {
        stdout()
    }

    fn error(&mut self) -> impl Write {
        stderr()
    }

    fn exit(&mut self, code: i32) {
        std::process::exit(code);
    }
}

#[tokio::main]
async fn main() -> Result<(), ohno::AppError> {
    run(&mut RealHost, std::env::args()).await
}
