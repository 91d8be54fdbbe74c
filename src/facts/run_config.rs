use super::{PairKey, WindowSetting};
use crate::Result;
use core::fmt::{Debug, Formatter};
use ohno::bail;
use std::collections::{BTreeMap, BTreeSet};

/// An API token, kept out of logs and debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The plain configuration value a run starts from.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub organizations: Vec<String>,

    /// `None` means every member of each organization.
    pub identities: Option<Vec<String>>,
    pub window: WindowSetting,
    pub credential: Option<Credential>,
}

impl RunConfig {
    /// Check that a run can start. Nothing has been fetched when this fails.
    pub fn validate(&self) -> Result<()> {
        if self.credential.as_ref().is_none_or(|c| c.expose().trim().is_empty()) {
            bail!("no API token was provided; pass --github-token or set GITHUB_TOKEN");
        }

        if self.organizations.is_empty() {
            bail!("no organizations were provided");
        }

        if let Some(org) = self.organizations.iter().find(|org| !is_valid_name(org)) {
            bail!("'{org}' is not a valid organization name");
        }

        if let Some(identities) = &self.identities {
            if identities.is_empty() {
                bail!("the identity list is empty");
            }

            if let Some(identity) = identities.iter().find(|identity| !is_valid_name(identity)) {
                bail!("'{identity}' is not a valid identity");
            }
        }

        Ok(())
    }

    /// Whether identities have to be discovered from organization membership.
    #[must_use]
    pub const fn needs_discovery(&self) -> bool {
        self.identities.is_none()
    }

    /// Plan the pairs of a run, organization by organization, in configuration order.
    ///
    /// When no identities are configured, `members` supplies them per organization.
    /// Duplicates are dropped.
    #[must_use]
    pub fn plan_pairs(&self, members: &BTreeMap<String, Vec<String>>) -> Vec<PairKey> {
        let mut seen = BTreeSet::new();
        let mut pairs = Vec::new();

        for org in &self.organizations {
            let identities = match &self.identities {
                Some(identities) => identities.as_slice(),
                None => members.get(org).map_or(&[][..], Vec::as_slice),
            };

            for identity in identities {
                let key = PairKey::new(org.clone(), identity.clone());
                if seen.insert(key.clone()) {
                    pairs.push(key);
                }
            }
        }

        pairs
    }
}

/// Logins and organization names are alphanumeric with single inner hyphens.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 39
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
