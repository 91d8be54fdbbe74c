use super::Host;
use super::common::{ColorMode, LogLevel, default_checkpoint_dir, init_logging};
use super::config::Config;
use crate::Result;
use crate::facts::{
    AnalysisOrchestrator, Cancellation, CheckpointStore, Credential, EndpointContext, HttpTransport, PaginatedFetcher, RateLimiter,
    ReqwestTransport, RunConfig, discover_members, parse_api_url,
};
use crate::metrics::ScoreEngine;
use crate::reports::{generate_console, generate_json};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use clap::Args;
use ohno::IntoAppError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use url::Url;

/// Log target for the analyze command
const LOG_TARGET: &str = "   analyze";

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Organizations to analyze, overriding the configuration file
    #[arg(long = "org", value_name = "ORG", env = "GITHUB_ORGANIZATIONS", value_delimiter = ',')]
    pub organizations: Vec<String>,

    /// Identities to rank, overriding the configuration file
    #[arg(long = "user", value_name = "LOGIN", env = "GITHUB_USERNAMES", value_delimiter = ',')]
    pub users: Vec<String>,

    /// File with one identity per line; lines starting with `#` are ignored
    #[arg(long, value_name = "PATH")]
    pub users_file: Option<Utf8PathBuf>,

    /// Only count activity from the last this many months
    #[arg(long, value_name = "MONTHS", env = "TIME_PERIOD")]
    pub months: Option<u32>,

    /// Path to configuration file (default is `contrib-rank.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Directory where progress is checkpointed
    #[arg(long, value_name = "PATH")]
    pub checkpoint_dir: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,

    /// Write the finalized results to a JSON file
    #[arg(long, value_name = "PATH", help_heading = "Report Output")]
    pub json: Option<Utf8PathBuf>,
}

/// Collect, score and report activity for every configured pair.
///
/// Exits with status 1 when any pair failed. Pairs that were interrupted keep their checkpoints
/// and continue on the next invocation.
pub async fn analyze<H: Host>(host: &mut H, args: &AnalyzeArgs) -> Result<()> {
    init_logging(args.log_level);

    let config = Config::load(Utf8Path::new("."), args.config.as_ref())?;
    let run_config = build_run_config(args, &config)?;
    run_config.validate()?;

    let api_url = parse_api_url(&config.fetch.api_url)?;
    let transport = ReqwestTransport::new(
        run_config.credential.as_ref().map(Credential::expose),
        config.fetch.request_timeout(),
    )?;
    let fetcher = PaginatedFetcher::new(transport, RateLimiter::new(config.rate_limit.policy()), config.fetch.retry_policy());

    let members = if run_config.needs_discovery() {
        discover_all(&fetcher, &api_url, &run_config.organizations, config.fetch.page_size).await?
    } else {
        BTreeMap::new()
    };

    let pairs = run_config.plan_pairs(&members);
    if pairs.is_empty() {
        let _ = writeln!(host.output(), "Nothing to analyze: no identities were found");
        return Ok(());
    }

    let checkpoint_dir = match &args.checkpoint_dir {
        Some(dir) => dir.clone().into_std_path_buf(),
        None => default_checkpoint_dir()?,
    };
    let store = CheckpointStore::open(&checkpoint_dir).await?;

    log::info!(
        target: LOG_TARGET,
        "Analyzing {} pair(s) across {} organization(s)",
        pairs.len(),
        run_config.organizations.len()
    );

    let cancellation = Cancellation::new();
    let interrupt = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!(target: LOG_TARGET, "Interrupted, saving progress");
                cancellation.cancel();
            }
        })
    };

    let orchestrator = AnalysisOrchestrator::new(
        fetcher,
        store,
        ScoreEngine::new(config.weights),
        EndpointContext {
            api_url,
            page_size: config.fetch.page_size,
        },
        run_config.window,
        config.fetch.max_concurrent_pairs,
        cancellation,
    );

    let summary = orchestrator.run(&pairs).await;
    interrupt.abort();
    let summary = summary?;

    let aggregate = orchestrator.finalize(&pairs).await?;
    let ranking = aggregate.ranking(orchestrator.scorer());

    let mut console_output = String::new();
    generate_console(&summary, &ranking, args.color.use_colors(), &mut console_output)?;
    let _ = write!(host.output(), "{console_output}");

    if let Some(path) = &args.json {
        let mut json_output = String::new();
        generate_json(&aggregate, &ranking, &mut json_output)?;
        fs::write(path, json_output).into_app_err_with(|| format!("writing JSON report to '{path}'"))?;
        let _ = writeln!(host.output(), "\nWrote JSON report to {path}");
    }

    if summary.has_failures() {
        let failed: Vec<_> = summary.failed().map(|o| o.key.to_string()).collect();
        let _ = writeln!(
            host.error(),
            "\n{} pair(s) failed and will start over on the next run: {}",
            failed.len(),
            failed.join(", ")
        );
        host.exit(1);
    }

    Ok(())
}

/// Merge the command line over the configuration file.
fn build_run_config(args: &AnalyzeArgs, config: &Config) -> Result<RunConfig> {
    let organizations = if args.organizations.is_empty() {
        config.organizations.clone()
    } else {
        args.organizations.clone()
    };

    let mut identities = args.users.clone();
    if let Some(path) = &args.users_file {
        identities.extend(read_identities_file(path)?);
    }

    let identities = if identities.is_empty() {
        config.identities.clone()
    } else {
        Some(identities)
    };

    Ok(RunConfig {
        organizations: organizations.iter().map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect(),
        identities: identities.map(|ids| ids.iter().map(|i| i.trim().to_string()).filter(|i| !i.is_empty()).collect()),
        window: config.window_setting(args.months, Utc::now().date_naive())?,
        credential: args.github_token.as_deref().map(Credential::new),
    })
}

fn read_identities_file(path: &Utf8Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).into_app_err_with(|| format!("reading identities file '{path}'"))?;

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

async fn discover_all<T: HttpTransport>(
    fetcher: &PaginatedFetcher<T>,
    api_url: &Url,
    organizations: &[String],
    page_size: u8,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut members = BTreeMap::new();
    for org in organizations {
        let found = discover_members(fetcher, api_url, org, page_size).await?;
        let _ = members.insert(org.clone(), found);
    }

    Ok(members)
}
