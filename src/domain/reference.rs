//! Reference classification rules.
//!
//! A reference given by a user is either an explicit commit hash, or a name
//! that has to be matched against the heads and tags a remote advertises.

use crate::error::{LineageError, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// What a reference string turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Sha,
    Tag,
    Branch,
    Missing,
    InvalidRepo,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefKind::Sha => "sha",
            RefKind::Tag => "tag",
            RefKind::Branch => "branch",
            RefKind::Missing => "missing",
            RefKind::InvalidRepo => "invalid-repo",
        };
        write!(f, "{}", name)
    }
}

/// A reference after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub raw: String,
    pub kind: RefKind,
    pub sha: Option<String>,
}

impl ResolvedRef {
    pub fn new(raw: impl Into<String>, kind: RefKind, sha: Option<String>) -> Self {
        ResolvedRef {
            raw: raw.into(),
            kind,
            sha,
        }
    }

    /// Whether the reference names something that can be checked out.
    pub fn is_usable(&self) -> bool {
        matches!(self.kind, RefKind::Sha | RefKind::Tag | RefKind::Branch)
    }

    /// The revision to hand to git: the sha when known, the raw name otherwise.
    pub fn revision(&self) -> &str {
        self.sha.as_deref().unwrap_or(&self.raw)
    }
}

fn sha_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{4,}$").expect("static sha pattern"))
}

/// Lowercase hex of at least four characters.
pub fn looks_like_sha(raw: &str) -> bool {
    sha_regex().is_match(raw)
}

/// `origin/foo` and `foo` name the same remote branch.
pub fn strip_origin(raw: &str) -> &str {
    raw.strip_prefix("origin/").unwrap_or(raw)
}

/// Classify `raw` against an advertised ref list (`git ls-remote` output as
/// `(refname, sha)` pairs).
///
/// Hex strings are taken as commit hashes without looking at the list.
/// Peeled tag entries (`refs/tags/x^{}`) provide the commit sha of annotated
/// tags.
///
/// # Errors
/// `AmbiguousRef` when the name matches more than one head or tag.
pub fn classify_remote_refs(raw: &str, advertised: &[(String, String)]) -> Result<ResolvedRef> {
    if looks_like_sha(raw) {
        return Ok(ResolvedRef::new(raw, RefKind::Sha, Some(raw.to_string())));
    }

    let name = strip_origin(raw);
    let suffix = format!("/{}", name);
    let mut matches: Vec<(&str, RefKind)> = Vec::new();

    for (refname, _) in advertised {
        if refname.ends_with("^{}") || !refname.ends_with(&suffix) {
            continue;
        }
        if refname.starts_with("refs/heads/") {
            matches.push((refname, RefKind::Branch));
        } else if refname.starts_with("refs/tags/") {
            matches.push((refname, RefKind::Tag));
        }
    }

    match matches.as_slice() {
        [] => Ok(ResolvedRef::new(raw, RefKind::Missing, None)),
        [(refname, kind)] => {
            let peeled = format!("{}^{{}}", refname);
            let sha = advertised
                .iter()
                .find(|(n, _)| *n == peeled)
                .or_else(|| advertised.iter().find(|(n, _)| n == refname))
                .map(|(_, sha)| sha.clone());
            Ok(ResolvedRef::new(raw, *kind, sha))
        }
        _ => Err(LineageError::AmbiguousRef {
            reference: raw.to_string(),
            matches: matches.iter().map(|(n, _)| n.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertised() -> Vec<(String, String)> {
        vec![
            ("HEAD".to_string(), "1111".to_string()),
            ("refs/heads/main".to_string(), "1111".to_string()),
            ("refs/heads/release/5.15".to_string(), "2222".to_string()),
            ("refs/tags/v5.15".to_string(), "3333".to_string()),
            ("refs/tags/v5.15^{}".to_string(), "4444".to_string()),
            ("refs/tags/v5.16".to_string(), "5555".to_string()),
            ("refs/heads/v5.16".to_string(), "6666".to_string()),
        ]
    }

    #[test]
    fn test_hex_is_sha_without_lookup() {
        let resolved = classify_remote_refs("deadbeef", &[]).unwrap();
        assert_eq!(resolved.kind, RefKind::Sha);
        assert_eq!(resolved.sha.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_short_hex_is_not_sha() {
        assert!(!looks_like_sha("abc"));
        assert!(!looks_like_sha("ABCDEF"));
        assert!(looks_like_sha("abcd"));
    }

    #[test]
    fn test_branch_with_origin_prefix() {
        let resolved = classify_remote_refs("origin/main", &advertised()).unwrap();
        assert_eq!(resolved.kind, RefKind::Branch);
        assert_eq!(resolved.sha.as_deref(), Some("1111"));
    }

    #[test]
    fn test_annotated_tag_uses_peeled_sha() {
        let resolved = classify_remote_refs("v5.15", &advertised()).unwrap();
        assert_eq!(resolved.kind, RefKind::Tag);
        assert_eq!(resolved.sha.as_deref(), Some("4444"));
    }

    #[test]
    fn test_nested_branch_name() {
        let resolved = classify_remote_refs("release/5.15", &advertised()).unwrap();
        assert_eq!(resolved.kind, RefKind::Branch);
        assert_eq!(resolved.revision(), "2222");
    }

    #[test]
    fn test_missing_ref() {
        let resolved = classify_remote_refs("nope", &advertised()).unwrap();
        assert_eq!(resolved.kind, RefKind::Missing);
        assert!(!resolved.is_usable());
        assert_eq!(resolved.revision(), "nope");
    }

    #[test]
    fn test_branch_and_tag_same_name_is_ambiguous() {
        let err = classify_remote_refs("v5.16", &advertised()).unwrap_err();
        assert!(matches!(err, LineageError::AmbiguousRef { .. }));
    }
}
