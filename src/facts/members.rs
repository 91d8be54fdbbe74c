use super::fetcher::{PageOutcome, PaginatedFetcher};
use super::{HttpTransport, QuotaBucket};
use crate::Result;
use futures_util::StreamExt;
use ohno::{IntoAppError, app_err};
use serde::Deserialize;
use url::Url;

/// Log target for member discovery
const LOG_TARGET: &str = "   members";

#[derive(Debug, Deserialize)]
struct Member {
    login: String,
}

fn parse_members(body: &[u8]) -> Result<Vec<String>> {
    let members: Vec<Member> = serde_json::from_slice(body).into_app_err("parsing organization members")?;
    Ok(members.into_iter().map(|m| m.login).collect())
}

/// List the members of `organization` visible with the current credential.
pub async fn discover_members<T: HttpTransport>(
    fetcher: &PaginatedFetcher<T>,
    api_url: &Url,
    organization: &str,
    page_size: u8,
) -> Result<Vec<String>> {
    let mut url = api_url.clone();
    let _ = url
        .path_segments_mut()
        .map_err(|()| app_err!("API URL cannot be a base"))?
        .pop_if_empty()
        .extend(["orgs", organization, "members"]);
    let _ = url.query_pairs_mut().append_pair("per_page", &page_size.to_string());

    log::info!(target: LOG_TARGET, "Listing members of '{organization}'");

    let pages = fetcher.pages(url.into(), QuotaBucket::Core, &parse_members, &());
    futures_util::pin_mut!(pages);

    let mut members = Vec::new();
    while let Some(page) = pages.next().await {
        match page? {
            PageOutcome::Page { items, .. } => members.extend(items),
            PageOutcome::Rejected { status, .. } => {
                return Err(app_err!("listing members of '{organization}' failed with HTTP {status}"));
            }
        }
    }

    members.sort();
    members.dedup();
    log::debug!(target: LOG_TARGET, "Found {} member(s) in '{organization}'", members.len());

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_members() {
        let body = br#"[{"login": "carol", "id": 1}, {"login": "alice", "id": 2}]"#;
        assert_eq!(parse_members(body).unwrap(), ["carol", "alice"]);
        let _ = parse_members(br#"{"message": "Not Found"}"#).unwrap_err();
    }
}
