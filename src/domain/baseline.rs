//! Baseline derivation from the release points reachable from a revision.

use crate::domain::version::{BaseVersion, VersionTag};
use crate::error::{LineageError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// A release point found while scanning history: a tag (or a release commit
/// subject turned into a tag name) and the commit it sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPoint {
    pub tag: String,
    pub sha: String,
}

impl TagPoint {
    pub fn new(tag: impl Into<String>, sha: impl Into<String>) -> Self {
        TagPoint {
            tag: tag.into(),
            sha: sha.into(),
        }
    }
}

/// The upstream version a revision was built on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Baseline {
    pub version: String,
    pub sha: String,
}

fn rt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-rt\d*\b").expect("static rt pattern"))
}

fn release_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(v[3-9]\.[\d.\-rct]+)-.*\d{6}T\d{6}Z$").expect("static release tag pattern")
    })
}

fn release_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^v\d+\.\d+(?:\.\d+)?(?:-rc\d+)?(?:-rt\d+)?$").expect("static release name pattern")
    })
}

fn release_subject_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Linux\s+(\d+\.[\d.rct-]*?)\s*$").expect("static release subject pattern")
    })
}

/// Tags that can serve as a baseline: `v5.15`, `v5.15.3`, `v6.1-rc2`,
/// `v5.15.3-rt20`, `v6.1-rc1-rt1`.
pub fn is_release_tag_name(tag: &str) -> bool {
    release_name_regex().is_match(tag)
}

/// `Linux 5.15.3` as a commit subject marks the `v5.15.3` release.
pub fn release_commit_tag(subject: &str) -> Option<String> {
    release_subject_regex()
        .captures(subject)
        .map(|caps| format!("v{}", &caps[1]))
}

/// Whether a ref name marks a realtime tree (`...-rt...`).
pub fn is_realtime_ref(reference: &str) -> bool {
    rt_regex().is_match(reference)
}

/// Pick the baseline out of scanned release points.
///
/// The highest `major.minor[.micro]` among the points wins. For that base the
/// final release is preferred; without one the highest rc is used. Realtime
/// trees only look at `-rtN` points and pick the highest `N`; other trees
/// ignore `-rtN` points entirely.
pub fn derive_baseline(points: &[TagPoint], realtime: bool) -> Option<Baseline> {
    let parsed: Vec<(VersionTag, &TagPoint)> = points
        .iter()
        .filter_map(|point| VersionTag::parse(&point.tag).map(|tag| (tag, point)))
        .filter(|(tag, _)| tag.is_rt() == realtime && !tag.excluded)
        .collect();

    let base: BaseVersion = parsed.iter().map(|(tag, _)| tag.base).max()?;
    let of_base = || parsed.iter().filter(move |(tag, _)| tag.base == base);

    let released = of_base()
        .filter(|(tag, _)| !tag.is_rc())
        .max_by_key(|(tag, _)| tag.rt);
    let chosen = match released {
        Some(found) => found,
        None => of_base().max_by_key(|(tag, _)| (tag.rc, tag.rt))?,
    };

    let (tag, point) = chosen;
    Some(Baseline {
        version: tag.raw.clone(),
        sha: point.sha.clone(),
    })
}

/// Release tags named `v<version>-<anything><YYMMDD>T<HHMMSS>Z` declare
/// their baseline; it has to agree with the computed one.
///
/// # Errors
/// `BaselineInconsistency` when the declared and computed baselines differ.
pub fn check_consistency(reference: &str, computed: &str) -> Result<()> {
    let Some(caps) = release_tag_regex().captures(reference) else {
        return Ok(());
    };
    let declared = &caps[1];
    if declared != computed {
        return Err(LineageError::BaselineInconsistency {
            computed: computed.to_string(),
            declared: declared.to_string(),
        });
    }
    Ok(())
}
