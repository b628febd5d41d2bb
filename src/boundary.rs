use serde::Serialize;
use std::fmt;

/// Non-fatal conditions hit during a run.
/// They are reported alongside the result instead of aborting it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// The staged working copy could not be moved to the requested commit
    CheckoutFailed { reference: String, reason: String },
    /// Range-diff pairs dropped because they matched each other in a cycle
    TwistedPairs { count: usize },
    /// An upstream repository could not be staged; provenance skips it
    UpstreamUnavailable { name: String, reason: String },
    /// A side of the comparison has no commits between base and tip
    EmptyRange { side: String, range: String },
    /// Provenance lookup failed for one patch
    ProvenanceFailed { commit: String, reason: String },
}

fn short(sha: &str) -> &str {
    if sha.len() > 12 {
        &sha[..12]
    } else {
        sha
    }
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWarning::CheckoutFailed { reference, reason } => {
                write!(f, "Cannot check out '{}': {}", reference, reason)
            }
            RunWarning::TwistedPairs { count } => {
                write!(f, "Dropped {} twisted range-diff pair(s)", count)
            }
            RunWarning::UpstreamUnavailable { name, reason } => {
                write!(f, "Upstream '{}' unavailable: {}", name, reason)
            }
            RunWarning::EmptyRange { side, range } => {
                write!(f, "No commits on side {} ({})", side, range)
            }
            RunWarning::ProvenanceFailed { commit, reason } => {
                write!(f, "Provenance lookup failed for {}: {}", short(commit), reason)
            }
        }
    }
}
