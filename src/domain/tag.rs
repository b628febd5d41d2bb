//! Release tag ordering.
//!
//! Tags are expected in `git tag --sort=v:refname` order. Sorting keeps that
//! order for released tags and decides where release candidates go.

use crate::domain::version::{compare_version, VersionTag};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Options for [`sort_tags`]
#[derive(Debug, Clone, Default)]
pub struct TagSortOptions<'a> {
    /// Drop every tag up to and including this one
    pub start_after: Option<&'a str>,
    pub reverse: bool,
    /// Place each release's rc tags right before it
    pub include_rc: bool,
}

/// Tags of one `major.minor` series, in sorted order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagGroup {
    pub series: String,
    pub tags: Vec<String>,
}

/// Sort upstream release tags.
///
/// Released tags keep their input order. Release candidates are placed
/// before their release when `include_rc` is set; otherwise they are dropped,
/// except the rcs of the highest series when that series has no release yet.
/// `-dontuse`/`-rebase`/`-patches` tags and tags without a version prefix are
/// skipped.
pub fn sort_tags<S: AsRef<str>>(tags: &[S], options: &TagSortOptions<'_>) -> Vec<String> {
    let mut released: Vec<String> = Vec::new();
    let mut pending_rcs: HashMap<String, Vec<String>> = HashMap::new();
    let mut max_series: Option<String> = None;
    let mut started = options.start_after.is_none();

    for raw in tags.iter().map(AsRef::as_ref) {
        let Some(tag) = VersionTag::parse(raw) else {
            debug!(tag = raw, "skipping tag without version prefix");
            continue;
        };

        if !started {
            started = options.start_after == Some(raw);
            continue;
        }

        if tag.excluded {
            continue;
        }

        if tag.is_rc() {
            pending_rcs
                .entry(tag.release_key())
                .or_default()
                .push(raw.to_string());
        } else {
            released.push(raw.to_string());
        }

        let series = tag.series_key();
        let is_higher = match &max_series {
            None => true,
            Some(current) => {
                compare_version(&series, current).map_or(false, |ord| ord == Ordering::Greater)
            }
        };
        if is_higher {
            max_series = Some(series);
        }
    }

    let mut sorted = Vec::with_capacity(released.len());
    for tag in &released {
        if options.include_rc {
            if let Some(rcs) = pending_rcs.get(tag) {
                sorted.extend(rcs.iter().cloned());
            }
        }
        sorted.push(tag.clone());
    }

    if let Some(series) = max_series {
        if !released.contains(&series) {
            if let Some(rcs) = pending_rcs.get(&series) {
                sorted.extend(rcs.iter().cloned());
            }
        }
    }

    if options.reverse {
        sorted.reverse();
    }
    sorted
}

/// Sort tags and bucket them by `major.minor` series, keeping series order.
pub fn sort_tags_grouped<S: AsRef<str>>(tags: &[S], options: &TagSortOptions<'_>) -> Vec<TagGroup> {
    let mut groups: Vec<TagGroup> = Vec::new();
    for tag in sort_tags(tags, options) {
        let Some(parsed) = VersionTag::parse(&tag) else {
            continue;
        };
        let series = parsed.series_key();
        match groups.iter_mut().find(|g| g.series == series) {
            Some(group) => group.tags.push(tag),
            None => groups.push(TagGroup {
                series,
                tags: vec![tag],
            }),
        }
    }
    groups
}
