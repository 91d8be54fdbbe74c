use super::PairKey;
use core::fmt::{Display, Formatter};
use serde::Serialize;
use strum::Display as StrumDisplay;

/// The class of a recorded problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// The server rejected a request with a client error. The pair kept going.
    PermanentFetch,

    /// A request kept failing after every retry. The pair was abandoned.
    Fetch,

    /// A checkpoint file could not be read and was set aside.
    CheckpointCorruption,

    /// A checkpoint could not be read or written.
    Storage,

    /// A request for the pair could not be built.
    Request,

    /// Records that matched no known kind were left out of the tally.
    SkippedRecords,
}

/// A problem encountered during a run, reported next to the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub pair: Option<PairKey>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn for_pair(pair: &PairKey, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            pair: Some(pair.clone()),
            kind,
            message: message.into(),
        }
    }

    pub fn general(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            pair: None,
            kind,
            message: message.into(),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match &self.pair {
            Some(pair) => write!(f, "[{}] {pair}: {}", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let pair = PairKey::new("Acme", "bob");
        let diagnostic = Diagnostic::for_pair(&pair, DiagnosticKind::PermanentFetch, "HTTP 404 fetching issues");
        assert_eq!(diagnostic.to_string(), "[permanent-fetch] bob@Acme: HTTP 404 fetching issues");

        let diagnostic = Diagnostic::general(DiagnosticKind::CheckpointCorruption, "bad file");
        assert_eq!(diagnostic.to_string(), "[checkpoint-corruption] bad file");

        let diagnostic = Diagnostic::for_pair(&pair, DiagnosticKind::SkippedRecords, "2 record(s)");
        assert_eq!(diagnostic.to_string(), "[skipped-records] bob@Acme: 2 record(s)");
    }
}
