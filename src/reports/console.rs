use crate::Result;
use crate::facts::{IdentityTotal, PairOutcome, PairState, RunSummary};
use core::fmt::Write;
use owo_colors::OwoColorize;

const SEPARATOR: &str = "═══════════════════════════════════════";

/// Render the run summary followed by the ranking.
pub fn generate<W: Write>(summary: &RunSummary, ranking: &[IdentityTotal], use_colors: bool, writer: &mut W) -> Result<()> {
    write_heading(writer, "Run summary", use_colors)?;

    let key_width = summary.outcomes.iter().map(|o| o.key.to_string().len()).max().unwrap_or(0);
    for outcome in &summary.outcomes {
        write_outcome(writer, outcome, key_width, use_colors)?;
    }

    writeln!(writer)?;
    writeln!(
        writer,
        "{} complete, {} failed, {} interrupted",
        summary.count(PairState::Complete),
        summary.count(PairState::Failed),
        summary.count(PairState::Interrupted)
    )?;

    if !summary.diagnostics.is_empty() {
        writeln!(writer)?;
        write_heading(writer, "Diagnostics", use_colors)?;
        for diagnostic in &summary.diagnostics {
            writeln!(writer, "  {diagnostic}")?;
        }
    }

    writeln!(writer)?;
    writeln!(writer, "{SEPARATOR}")?;
    writeln!(writer)?;

    write_heading(writer, "Ranking", use_colors)?;
    if ranking.is_empty() {
        writeln!(writer, "  No identity has complete results yet")?;
        return Ok(());
    }

    let name_width = ranking.iter().map(|t| t.identity.len()).max().unwrap_or(0).max("identity".len());
    writeln!(
        writer,
        "  {:>4}  {:<name_width$}  {:>8}  {:>6}  {:>7}  {:>7}  {:>6}  {:>8}  organizations",
        "rank", "identity", "score", "merged", "reviews", "commits", "issues", "comments"
    )?;

    for (index, total) in ranking.iter().enumerate() {
        let score = format!("{:>8.2}", total.score);
        let score = if use_colors { score.bold().to_string() } else { score };

        writeln!(
            writer,
            "  {:>4}  {:<name_width$}  {score}  {:>6}  {:>7}  {:>7}  {:>6}  {:>8}  {}",
            index + 1,
            total.identity,
            total.tally.pull_requests_merged,
            total.tally.reviews,
            total.tally.commits,
            total.tally.issues_opened,
            total.tally.comments(),
            total.organizations.join(", ")
        )?;
    }

    Ok(())
}

fn write_heading<W: Write>(writer: &mut W, heading: &str, use_colors: bool) -> Result<()> {
    if use_colors {
        writeln!(writer, "{}", heading.bold())?;
    } else {
        writeln!(writer, "{heading}")?;
    }
    Ok(())
}

fn write_outcome<W: Write>(writer: &mut W, outcome: &PairOutcome, key_width: usize, use_colors: bool) -> Result<()> {
    let state = format!("{:<11}", outcome.state.to_string());
    let state = if use_colors {
        match outcome.state {
            PairState::Complete => state.green().bold().to_string(),
            PairState::Failed => state.red().bold().to_string(),
            PairState::Interrupted | PairState::Retrying => state.yellow().bold().to_string(),
            PairState::Pending | PairState::Fetching => state,
        }
    } else {
        state
    };

    write!(
        writer,
        "  {:<key_width$}  {state}  {} page(s), {} retr{}",
        outcome.key.to_string(),
        outcome.pages_fetched,
        outcome.retries,
        if outcome.retries == 1 { "y" } else { "ies" }
    )?;

    if outcome.skipped_records > 0 {
        write!(writer, ", {} skipped record(s)", outcome.skipped_records)?;
    }

    if outcome.resumed {
        write!(writer, ", resumed")?;
    }

    writeln!(writer)?;
    Ok(())
}
