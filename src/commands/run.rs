//! Command dispatch logic for contrib-rank

use super::{AnalyzeArgs, InitArgs, ResetArgs, ValidateArgs, analyze, init_config, reset_checkpoints, validate_config};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "contrib-rank", version, author, long_about = None)]
#[command(about = "Rank candidates by their activity across GitHub organizations")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: RankSubcommand,
}

#[derive(Subcommand, Debug)]
enum RankSubcommand {
    /// Collect activity, score it and report the ranking
    Analyze(Box<AnalyzeArgs>),
    /// Generate a default configuration file
    Init(InitArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
    /// Delete all checkpoints so the next run starts fresh
    Reset(ResetArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Errors
///
/// Returns an error if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    match &Cli::parse_from(args).command {
        RankSubcommand::Analyze(analyze_args) => analyze(host, analyze_args).await,
        RankSubcommand::Init(init_args) => init_config(host, init_args),
        RankSubcommand::Validate(validate_args) => validate_config(host, validate_args),
        RankSubcommand::Reset(reset_args) => reset_checkpoints(host, reset_args).await,
    }
}
