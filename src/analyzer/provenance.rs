//! Where did a patch come from upstream?
//!
//! A patch's provenance is the oldest upstream release tag that carries an
//! equivalent change. A precomputed fingerprint index answers most lookups;
//! the rest go through the similarity matcher, which is slow on large
//! upstream histories.

use crate::analyzer::matcher::{MatchOptions, SearchScope, SimilarityMatcher, Tier};
use crate::domain::commit::CommitRecord;
use crate::domain::tag::{sort_tags, TagSortOptions};
use crate::error::Result;
use crate::git::Repository;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Default glob for upstream release tags
pub const DEFAULT_TAG_PATTERN: &str = "v*";

/// Where a known upstream fingerprint lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub commit: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Fingerprint to upstream commit map, stored as JSON:
///
/// ```json
/// { "3f0c...": { "commit": "9a1b...", "tag": "v6.1-rc3" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintIndex {
    entries: HashMap<String, IndexEntry>,
}

impl FingerprintIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let index: FingerprintIndex = serde_json::from_str(&content)?;
        info!(path = %path.display(), entries = index.len(), "loaded fingerprint index");
        Ok(index)
    }

    pub fn insert(&mut self, fingerprint: impl Into<String>, entry: IndexEntry) {
        self.entries.insert(fingerprint.into(), entry);
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<&IndexEntry> {
        self.entries.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One upstream history to search
pub struct UpstreamSource<'a> {
    pub name: String,
    pub repo: &'a dyn Repository,
    /// Tip of the searched history, e.g. `origin/master`
    pub rev: String,
    pub index: Option<&'a FingerprintIndex>,
    /// Glob of the release tags a provenance tag is picked from
    pub tag_pattern: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceMethod {
    Fingerprint,
    /// The commit message names the upstream commit
    UpstreamReference,
    Similarity,
}

/// Where a patch was found upstream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub upstream: String,
    /// Oldest release tag containing the change; `None` when it is only on
    /// the searched branch so far
    pub tag: Option<String>,
    pub rev: String,
    pub matched_commit: String,
    pub method: ProvenanceMethod,
}

/// The oldest tag (rcs included) of `repo` that contains `sha`.
pub fn find_upstream_tag(repo: &dyn Repository, sha: &str, pattern: &str) -> Result<Option<String>> {
    let containing = repo.tags_containing(sha, Some(pattern))?;
    let sorted = sort_tags(
        &containing,
        &TagSortOptions {
            include_rc: true,
            ..Default::default()
        },
    );
    let tag = sorted.into_iter().next();
    debug!(commit = sha, tag = ?tag, "oldest containing tag");
    Ok(tag)
}

pub struct ProvenanceResolver {
    matcher: SimilarityMatcher,
    /// Also search by author and subject when touched files find nothing
    exhaustive: bool,
}

impl ProvenanceResolver {
    pub fn new(options: MatchOptions, exhaustive: bool) -> Self {
        ProvenanceResolver {
            matcher: SimilarityMatcher::new(options),
            exhaustive,
        }
    }

    fn tiers(&self) -> &'static [Tier] {
        if self.exhaustive {
            &[Tier::Files, Tier::Author, Tier::Subject]
        } else {
            &[Tier::Files]
        }
    }

    /// Look `commit` up in each upstream, in order; the first hit wins.
    pub fn resolve(
        &self,
        repo: &dyn Repository,
        commit: &CommitRecord,
        upstreams: &[UpstreamSource<'_>],
    ) -> Result<Option<Provenance>> {
        for upstream in upstreams {
            if let Some(found) = self.resolve_in(repo, commit, upstream)? {
                info!(
                    commit = %commit.short_sha(),
                    upstream = %found.upstream,
                    tag = ?found.tag,
                    matched = %found.matched_commit,
                    "provenance found"
                );
                return Ok(Some(found));
            }
        }
        debug!(commit = %commit.short_sha(), "no provenance");
        Ok(None)
    }

    fn resolve_in(
        &self,
        repo: &dyn Repository,
        commit: &CommitRecord,
        upstream: &UpstreamSource<'_>,
    ) -> Result<Option<Provenance>> {
        if let Some(entry) = self.indexed(commit, upstream) {
            let tag = match &entry.tag {
                Some(tag) => Some(tag.clone()),
                None => self.tag_of(upstream, &entry.commit)?,
            };
            return Ok(Some(Provenance {
                upstream: upstream.name.clone(),
                tag,
                rev: upstream.rev.clone(),
                matched_commit: entry.commit.clone(),
                method: ProvenanceMethod::Fingerprint,
            }));
        }

        if let Some(found) = self.referenced(commit, upstream)? {
            return Ok(Some(found));
        }

        let scope = SearchScope::new(&upstream.rev).since_authored();
        let result = self
            .matcher
            .search(repo, commit, upstream.repo, scope, self.tiers())?;
        let Some(matched) = result.matched else {
            return Ok(None);
        };

        let tag = match self.indexed(&matched, upstream).and_then(|e| e.tag.clone()) {
            Some(tag) => Some(tag),
            None => self.tag_of(upstream, &matched.sha)?,
        };
        Ok(Some(Provenance {
            upstream: upstream.name.clone(),
            tag,
            rev: upstream.rev.clone(),
            matched_commit: matched.sha,
            method: ProvenanceMethod::Similarity,
        }))
    }

    /// The upstream commit a backport names in its message, when this
    /// upstream has it.
    fn referenced(&self, commit: &CommitRecord, upstream: &UpstreamSource<'_>) -> Result<Option<Provenance>> {
        let Some(sha) = commit.upstream_sha() else {
            return Ok(None);
        };
        let Ok(matched) = upstream.repo.resolve(sha) else {
            debug!(commit = %commit.short_sha(), referenced = sha, upstream = %upstream.name, "referenced commit not in upstream");
            return Ok(None);
        };
        Ok(Some(Provenance {
            upstream: upstream.name.clone(),
            tag: self.tag_of(upstream, &matched)?,
            rev: upstream.rev.clone(),
            matched_commit: matched,
            method: ProvenanceMethod::UpstreamReference,
        }))
    }

    fn indexed<'u>(&self, commit: &CommitRecord, upstream: &UpstreamSource<'u>) -> Option<&'u IndexEntry> {
        let fingerprint = commit.fingerprint.as_deref()?;
        upstream.index?.lookup(fingerprint)
    }

    /// Tag lookup for a commit that may not exist in the staged upstream
    fn tag_of(&self, upstream: &UpstreamSource<'_>, sha: &str) -> Result<Option<String>> {
        if upstream.repo.resolve(sha).is_err() {
            debug!(commit = sha, upstream = %upstream.name, "indexed commit not in staged upstream");
            return Ok(None);
        }
        find_upstream_tag(upstream.repo, sha, upstream.tag_pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{MockCommit, MockRepository};
    use tempfile::TempDir;

    fn diff(path: &str, line: &str) -> String {
        format!("diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1 +1 @@\n{l}\n", p = path, l = line)
    }

    fn upstream() -> MockRepository {
        let mut repo = MockRepository::new("mainline");
        repo.add_commit(MockCommit::new("u001", "Linux 6.0", diff("Makefile", "+6.0")));
        repo.add_commit(MockCommit::new("u002", "net: fix leak", diff("net/core.c", "+kfree(p);")));
        repo.add_commit(MockCommit::new("u003", "Linux 6.1-rc1", diff("Makefile", "+6.1-rc1")));
        repo.add_commit(MockCommit::new("u004", "Linux 6.1", diff("Makefile", "+6.1")));
        repo.add_commit(MockCommit::new("u005", "mm: not released", diff("mm/a.c", "+x")));
        repo.add_tag("v6.0", "u001");
        repo.add_tag("v6.1-rc1", "u003");
        repo.add_tag("v6.1", "u004");
        repo
    }

    fn product() -> MockRepository {
        let mut repo = MockRepository::new("product");
        repo.add_commit(MockCommit::new("p001", "net: fix leak", diff("net/core.c", "+kfree(p);")));
        repo.add_commit(MockCommit::new("p002", "mm: not released", diff("mm/a.c", "+x")));
        repo.add_commit(MockCommit::new("p003", "product only", diff("drivers/x.c", "+y")));
        repo
    }

    fn source<'a>(repo: &'a MockRepository, index: Option<&'a FingerprintIndex>) -> UpstreamSource<'a> {
        UpstreamSource {
            name: "mainline".to_string(),
            repo,
            rev: "HEAD".to_string(),
            index,
            tag_pattern: DEFAULT_TAG_PATTERN,
        }
    }

    #[test]
    fn test_oldest_containing_tag_includes_rc() {
        let up = upstream();
        assert_eq!(find_upstream_tag(&up, "u002", "v*").unwrap().as_deref(), Some("v6.1-rc1"));
        assert_eq!(find_upstream_tag(&up, "u005", "v*").unwrap(), None);
    }

    #[test]
    fn test_similarity_fallback() {
        let up = upstream();
        let product = product();
        let resolver = ProvenanceResolver::new(MatchOptions::default(), false);
        let upstreams = [source(&up, None)];

        let found = resolver
            .resolve(&product, &product.commit("p001").unwrap(), &upstreams)
            .unwrap()
            .unwrap();
        assert_eq!(found.matched_commit, "u002");
        assert_eq!(found.tag.as_deref(), Some("v6.1-rc1"));
        assert_eq!(found.method, ProvenanceMethod::Similarity);

        let unreleased = resolver
            .resolve(&product, &product.commit("p002").unwrap(), &upstreams)
            .unwrap()
            .unwrap();
        assert_eq!(unreleased.tag, None);
        assert_eq!(unreleased.rev, "HEAD");

        let none = resolver
            .resolve(&product, &product.commit("p003").unwrap(), &upstreams)
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_index_hit_wins() {
        let up = upstream();
        let product = product();
        let commit = product.commit("p003").unwrap();
        let mut index = FingerprintIndex::default();
        index.insert(
            commit.fingerprint.clone().unwrap(),
            IndexEntry {
                commit: "feedface".to_string(),
                tag: Some("v5.19".to_string()),
            },
        );

        let resolver = ProvenanceResolver::new(MatchOptions::default(), true);
        let found = resolver
            .resolve(&product, &commit, &[source(&up, Some(&index))])
            .unwrap()
            .unwrap();
        assert_eq!(found.method, ProvenanceMethod::Fingerprint);
        assert_eq!(found.tag.as_deref(), Some("v5.19"));
        assert_eq!(found.matched_commit, "feedface");
    }

    #[test]
    fn test_message_reference_wins_over_similarity() {
        let mut up = upstream();
        up.add_commit(MockCommit::new("5eed5eed0001", "drm: fix hang", diff("drm/i915.c", "+reset();")));
        up.add_tag("v6.2", "5eed5eed0001");

        let mut product = MockRepository::new("product");
        product.add_commit(
            MockCommit::new("p004", "drm: fix hang", diff("drm/i915_gem.c", "+reset_engine();"))
                .message("drm: fix hang\n\n[ Upstream commit 5eed5eed0001 ]\n"),
        );
        product.add_commit(
            MockCommit::new("p005", "net: fix leak", diff("net/core.c", "+kfree(p);"))
                .message("net: fix leak\n\ncommit 0badc0de0badc0de upstream.\n"),
        );

        let resolver = ProvenanceResolver::new(MatchOptions::default(), false);
        let upstreams = [source(&up, None)];
        let found = resolver
            .resolve(&product, &product.commit("p004").unwrap(), &upstreams)
            .unwrap()
            .unwrap();
        assert_eq!(found.method, ProvenanceMethod::UpstreamReference);
        assert_eq!(found.matched_commit, "5eed5eed0001");
        assert_eq!(found.tag.as_deref(), Some("v6.2"));

        // A reference the upstream does not know falls back to similarity
        let fallback = resolver
            .resolve(&product, &product.commit("p005").unwrap(), &upstreams)
            .unwrap()
            .unwrap();
        assert_eq!(fallback.method, ProvenanceMethod::Similarity);
        assert_eq!(fallback.matched_commit, "u002");
    }

    #[test]
    fn test_tag_pattern_per_upstream() {
        let up = upstream();
        let product = product();
        let resolver = ProvenanceResolver::new(MatchOptions::default(), false);
        let mut narrow = source(&up, None);
        narrow.tag_pattern = "v6.1*";

        let found = resolver
            .resolve(&product, &product.commit("p001").unwrap(), &[narrow])
            .unwrap()
            .unwrap();
        assert_eq!(found.tag.as_deref(), Some("v6.1-rc1"));

        let mut none = source(&up, None);
        none.tag_pattern = "v7*";
        let found = resolver
            .resolve(&product, &product.commit("p001").unwrap(), &[none])
            .unwrap()
            .unwrap();
        assert_eq!(found.tag, None);
    }

    #[test]
    fn test_index_loads_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        fs::write(
            &path,
            r#"{"abc": {"commit": "u002", "tag": "v6.1-rc1"}, "def": {"commit": "u005"}}"#,
        )
        .unwrap();
        let index = FingerprintIndex::load(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("def").unwrap().tag, None);
        assert!(index.lookup("nope").is_none());
    }
}
