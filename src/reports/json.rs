use crate::Result;
use crate::facts::{Aggregate, IdentityTotal};
use crate::metrics::MetricTally;
use core::fmt::Write;
use serde_json::json;

/// Write the finalized aggregate and the ranking derived from it.
pub fn generate<W: Write>(aggregate: &Aggregate, ranking: &[IdentityTotal], writer: &mut W) -> Result<()> {
    let pairs: Vec<_> = aggregate
        .pairs
        .iter()
        .map(|(key, scored)| {
            json!({
                "organization": key.organization,
                "identity": key.identity,
                "score": scored.score,
                "metrics": tally_to_json(&scored.tally),
            })
        })
        .collect();

    let ranking: Vec<_> = ranking
        .iter()
        .enumerate()
        .map(|(index, total)| {
            json!({
                "rank": index + 1,
                "identity": total.identity,
                "organizations": total.organizations,
                "score": total.score,
                "metrics": tally_to_json(&total.tally),
            })
        })
        .collect();

    let output = json!({
        "pairs": pairs,
        "ranking": ranking,
    });

    write!(writer, "{}", serde_json::to_string_pretty(&output)?)?;
    Ok(())
}

#[expect(unused_results, reason = "keys are unique, nothing is overwritten")]
fn tally_to_json(tally: &MetricTally) -> serde_json::Value {
    let mut metrics = serde_json::Map::new();
    for (metric, value) in tally.metrics() {
        metrics.insert(metric.to_string(), json!(value));
    }

    metrics.insert("repositories".to_string(), json!(tally.repos_touched));
    metrics.insert("skipped".to_string(), json!(tally.skipped));
    serde_json::Value::Object(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{PairKey, ScoredTally};
    use std::collections::{BTreeMap, BTreeSet};

    fn tally() -> MetricTally {
        MetricTally {
            pull_requests_total: 3,
            pull_requests_merged: 2,
            pull_requests_open: 1,
            commits: 5,
            repos_touched: BTreeSet::from(["acme/api".to_string()]),
            skipped: 2,
            ..MetricTally::default()
        }
    }

    #[test]
    fn test_json_report() {
        let aggregate = Aggregate {
            pairs: BTreeMap::from([(PairKey::new("acme", "alice"), ScoredTally { tally: tally(), score: 11.0 })]),
        };
        let ranking = vec![IdentityTotal {
            identity: "alice".to_string(),
            organizations: vec!["acme".to_string()],
            tally: tally(),
            score: 11.0,
        }];

        let mut output = String::new();
        generate(&aggregate, &ranking, &mut output).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["pairs"][0]["organization"], "acme");
        assert_eq!(value["pairs"][0]["identity"], "alice");
        assert_eq!(value["pairs"][0]["metrics"]["pull_requests_merged"], 2);
        assert_eq!(value["pairs"][0]["metrics"]["repos_touched"], 1);
        assert_eq!(value["pairs"][0]["metrics"]["repositories"][0], "acme/api");
        assert_eq!(value["pairs"][0]["metrics"]["skipped"], 2);
        assert_eq!(value["ranking"][0]["rank"], 1);
        assert_eq!(value["ranking"][0]["score"], 11.0);
    }

    #[test]
    fn test_empty_json_report() {
        let mut output = String::new();
        generate(&Aggregate::default(), &[], &mut output).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["pairs"], json!([]));
        assert_eq!(value["ranking"], json!([]));
    }
}
