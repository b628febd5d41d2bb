//! Tool-free classification of two commit ranges ("quilts").
//!
//! Each range is linearized oldest first without merges. Side B is indexed
//! by sha, fingerprint, author and touched file; every side A commit is then
//! looked up by exact identity, by fingerprint, and finally by hunk
//! similarity against the indexed candidates.

use crate::analyzer::matcher::{find_similar_patch, MatchOptions};
use crate::domain::classification::{Classification, ClassifiedPatch, ClassifiedRange};
use crate::domain::commit::CommitRecord;
use crate::error::Result;
use crate::git::Repository;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Which commits of a range take part in the comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct QuiltFilter<'a> {
    /// Fingerprints already known from another history; matching commits
    /// are left out
    pub exclude: Option<&'a HashSet<String>>,
    /// Only commits authored from this email domain
    pub contributor_domain: Option<&'a str>,
}

impl<'a> QuiltFilter<'a> {
    fn keeps(&self, commit: &CommitRecord) -> bool {
        if let (Some(exclude), Some(fp)) = (self.exclude, commit.fingerprint.as_ref()) {
            if exclude.contains(fp) {
                return false;
            }
        }
        self.contributor_domain
            .map_or(true, |domain| commit.is_contributor(domain))
    }
}

/// Load the commits of `base..tip`, oldest first, merges excluded.
pub fn build_quilt(
    repo: &dyn Repository,
    base: Option<&str>,
    tip: &str,
    filter: QuiltFilter<'_>,
) -> Result<Vec<CommitRecord>> {
    let shas = repo.rev_list(base, tip)?;
    let total = shas.len();
    let mut quilt = Vec::with_capacity(total);
    for sha in shas {
        let commit = repo.commit(&sha)?;
        if filter.keeps(&commit) {
            quilt.push(commit);
        }
    }
    debug!(
        repo = repo.name(),
        base = base.unwrap_or("<root>"),
        tip,
        total,
        kept = quilt.len(),
        "built quilt"
    );
    Ok(quilt)
}

/// Fingerprints of every commit in `base..tip`.
pub fn fingerprints_in_range(repo: &dyn Repository, base: Option<&str>, tip: &str) -> Result<HashSet<String>> {
    let mut fingerprints = HashSet::new();
    for sha in repo.rev_list(base, tip)? {
        if let Some(fp) = repo.fingerprint(&sha)? {
            fingerprints.insert(fp);
        }
    }
    Ok(fingerprints)
}

/// Lookup tables over side B
struct QuiltIndex<'q> {
    commits: &'q [CommitRecord],
    by_sha: HashMap<&'q str, usize>,
    by_fingerprint: HashMap<&'q str, Vec<usize>>,
    by_author: HashMap<&'q str, Vec<usize>>,
    by_file: HashMap<&'q str, Vec<usize>>,
    claimed: HashSet<usize>,
}

impl<'q> QuiltIndex<'q> {
    fn new(commits: &'q [CommitRecord]) -> Self {
        let mut index = QuiltIndex {
            commits,
            by_sha: HashMap::new(),
            by_fingerprint: HashMap::new(),
            by_author: HashMap::new(),
            by_file: HashMap::new(),
            claimed: HashSet::new(),
        };
        for (i, commit) in commits.iter().enumerate() {
            index.by_sha.insert(&commit.sha, i);
            if let Some(fp) = &commit.fingerprint {
                index.by_fingerprint.entry(fp).or_default().push(i);
            }
            index.by_author.entry(&commit.author_email).or_default().push(i);
            for file in &commit.files {
                index.by_file.entry(file).or_default().push(i);
            }
        }
        index
    }

    fn unclaimed(&self, candidates: impl IntoIterator<Item = usize>) -> Vec<usize> {
        let mut picked: Vec<usize> = candidates
            .into_iter()
            .filter(|i| !self.claimed.contains(i))
            .collect();
        picked.sort_unstable();
        picked.dedup();
        picked
    }

    fn exact(&self, commit: &CommitRecord) -> Option<usize> {
        self.by_sha
            .get(commit.sha.as_str())
            .copied()
            .filter(|i| !self.claimed.contains(i))
    }

    /// Same fingerprint, preferring a commit with the same message.
    fn same_change(&self, commit: &CommitRecord) -> Option<usize> {
        let fp = commit.fingerprint.as_deref()?;
        let candidates = self.unclaimed(self.by_fingerprint.get(fp)?.iter().copied());
        candidates
            .iter()
            .copied()
            .find(|&i| self.commits[i].message == commit.message)
            .or_else(|| candidates.first().copied())
    }

    fn by_files(&self, commit: &CommitRecord) -> Vec<usize> {
        self.unclaimed(
            commit
                .files
                .iter()
                .filter_map(|f| self.by_file.get(f.as_str()))
                .flatten()
                .copied(),
        )
    }

    fn by_author(&self, commit: &CommitRecord) -> Vec<usize> {
        if commit.author_email.is_empty() {
            return Vec::new();
        }
        self.unclaimed(
            self.by_author
                .get(commit.author_email.as_str())
                .into_iter()
                .flatten()
                .copied(),
        )
    }

    fn by_subject(&self, commit: &CommitRecord, fuzzy: bool) -> Vec<Vec<usize>> {
        let subject = commit.subject.trim();
        if subject.is_empty() {
            return Vec::new();
        }
        let all = || 0..self.commits.len();
        let mut tiers = vec![self.unclaimed(all().filter(|&i| self.commits[i].subject.trim() == subject))];
        if fuzzy {
            tiers.push(self.unclaimed(all().filter(|&i| self.commits[i].message.contains(subject))));
        }
        tiers
    }

    fn shas(&self, candidates: &[usize]) -> Vec<String> {
        candidates.iter().map(|&i| self.commits[i].sha.clone()).collect()
    }
}

/// Classifies side A against side B
#[derive(Debug, Clone, Default)]
pub struct QuiltComparator {
    options: MatchOptions,
}

impl QuiltComparator {
    pub fn new(options: MatchOptions) -> Self {
        QuiltComparator { options }
    }

    /// Classify two quilts.
    ///
    /// Every commit of either side lands in exactly one category. A commits
    /// are numbered first in their order, then leftover B commits.
    pub fn compare(
        &self,
        repo_a: &dyn Repository,
        quilt_a: &[CommitRecord],
        repo_b: &dyn Repository,
        quilt_b: &[CommitRecord],
    ) -> Result<ClassifiedRange> {
        let mut index = QuiltIndex::new(quilt_b);
        let mut result = ClassifiedRange::default();
        let mut seq = 0u32;

        for commit in quilt_a {
            seq += 1;
            let patch = match self.pair(repo_a, commit, repo_b, &index)? {
                Some((i, classification)) => {
                    index.claimed.insert(i);
                    let matched = &quilt_b[i];
                    ClassifiedPatch::paired(seq, &commit.sha, &matched.sha, &matched.subject, classification)
                }
                None => ClassifiedPatch::removed_from_a(seq, &commit.sha, &commit.subject),
            };
            debug!(commit = %commit.short_sha(), classification = %patch.classification, "classified");
            result.push(patch);
        }

        for (i, commit) in quilt_b.iter().enumerate() {
            if index.claimed.contains(&i) {
                continue;
            }
            seq += 1;
            result.push(ClassifiedPatch::new_in_b(seq, &commit.sha, &commit.subject));
        }

        info!(
            same = result.same.len(),
            message_only = result.message_only.len(),
            updated = result.updated.len(),
            new = result.new.len(),
            removed = result.removed.len(),
            "quilts compared"
        );
        Ok(result)
    }

    fn pair(
        &self,
        repo_a: &dyn Repository,
        commit: &CommitRecord,
        repo_b: &dyn Repository,
        index: &QuiltIndex<'_>,
    ) -> Result<Option<(usize, Classification)>> {
        if let Some(i) = index.exact(commit) {
            return Ok(Some((i, Classification::Same)));
        }

        if let Some(i) = index.same_change(commit) {
            let classification = if index.commits[i].message == commit.message {
                Classification::Same
            } else {
                Classification::MessageOnly
            };
            return Ok(Some((i, classification)));
        }

        let mut tiers = vec![index.by_files(commit), index.by_author(commit)];
        tiers.extend(index.by_subject(commit, self.options.subject_fuzzy_fallback));

        for candidates in tiers {
            if candidates.is_empty() {
                continue;
            }
            let shas = index.shas(&candidates);
            let result = find_similar_patch(repo_a, &commit.sha, repo_b, &shas, &self.options)?;
            if let Some(matched) = result.matched {
                if let Some(&i) = index.by_sha.get(matched.sha.as_str()) {
                    return Ok(Some((i, Classification::Updated)));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{MockCommit, MockRepository};

    fn diff(path: &str, lines: &[&str]) -> String {
        let mut text = format!("diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n", p = path);
        for line in lines {
            text.push_str("@@ -1 +1 @@\n");
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    fn sides() -> (MockRepository, MockRepository) {
        let mut a = MockRepository::new("a");
        a.add_commit(MockCommit::new("a000", "base", diff("Makefile", &["+v1"])));
        a.add_commit(MockCommit::new("a001", "net: same", diff("net/a.c", &["+same"])));
        a.add_commit(MockCommit::new("a002", "net: reworded", diff("net/b.c", &["+reworded"])));
        a.add_commit(MockCommit::new(
            "a003",
            "mm: rework",
            diff("mm/c.c", &["+l1", "+l2", "+l3", "+l4", "+l5"]),
        ));
        a.add_commit(MockCommit::new("a004", "fs: dropped", diff("fs/d.c", &["+gone"])));

        let mut b = MockRepository::new("b");
        b.add_commit(MockCommit::new("b000", "base", diff("Makefile", &["+v2"])));
        b.add_commit(MockCommit::new("b001", "net: same", diff("net/a.c", &["+same"])));
        b.add_commit(MockCommit::new("b002", "net: reworded (v2)", diff("net/b.c", &["+reworded"])));
        b.add_commit(MockCommit::new(
            "b003",
            "mm: rework",
            diff("mm/c.c", &["+l1", "+l2", "+l3", "+l4", "+l5 changed"]),
        ));
        b.add_commit(MockCommit::new("b004", "drm: brand new", diff("drm/e.c", &["+new"])));
        (a, b)
    }

    #[test]
    fn test_every_category() {
        let (a, b) = sides();
        let quilt_a = build_quilt(&a, Some("a000"), "HEAD", QuiltFilter::default()).unwrap();
        let quilt_b = build_quilt(&b, Some("b000"), "HEAD", QuiltFilter::default()).unwrap();
        let result = QuiltComparator::default().compare(&a, &quilt_a, &b, &quilt_b).unwrap();

        assert_eq!(result.same.len(), 1);
        assert_eq!(result.same[0].commit_b.as_deref(), Some("b001"));
        assert_eq!(result.message_only.len(), 1);
        assert_eq!(result.message_only[0].commit_a.as_deref(), Some("a002"));
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].commit_b.as_deref(), Some("b003"));
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].commit_a.as_deref(), Some("a004"));
        assert_eq!(result.new.len(), 1);
        assert_eq!(result.new[0].commit_b.as_deref(), Some("b004"));
        assert_eq!(result.new[0].seq, 5);
    }

    #[test]
    fn test_partition() {
        let (a, b) = sides();
        let quilt_a = build_quilt(&a, None, "HEAD", QuiltFilter::default()).unwrap();
        let quilt_b = build_quilt(&b, None, "HEAD", QuiltFilter::default()).unwrap();
        let result = QuiltComparator::default().compare(&a, &quilt_a, &b, &quilt_b).unwrap();

        let mut seen_a: Vec<&str> = result.all().iter().filter_map(|p| p.commit_a.as_deref()).collect();
        let mut seen_b: Vec<&str> = result.all().iter().filter_map(|p| p.commit_b.as_deref()).collect();
        seen_a.sort();
        seen_b.sort();
        assert_eq!(seen_a, vec!["a000", "a001", "a002", "a003", "a004"]);
        assert_eq!(seen_b, vec!["b000", "b001", "b002", "b003", "b004"]);
    }

    #[test]
    fn test_identical_sha_is_same() {
        let (a, _) = sides();
        let quilt = build_quilt(&a, Some("a000"), "HEAD", QuiltFilter::default()).unwrap();
        let result = QuiltComparator::default().compare(&a, &quilt, &a, &quilt).unwrap();
        assert_eq!(result.same.len(), quilt.len());
    }

    #[test]
    fn test_filter_excludes_known_fingerprints_and_foreign_authors() {
        let (a, b) = sides();
        let known = fingerprints_in_range(&b, Some("b000"), "b001").unwrap();
        let filter = QuiltFilter {
            exclude: Some(&known),
            contributor_domain: None,
        };
        let quilt = build_quilt(&a, Some("a000"), "HEAD", filter).unwrap();
        assert_eq!(quilt.len(), 3);
        assert!(quilt.iter().all(|c| c.sha != "a001"));

        let filter = QuiltFilter {
            exclude: None,
            contributor_domain: Some("intel.com"),
        };
        assert!(build_quilt(&a, Some("a000"), "HEAD", filter).unwrap().is_empty());
    }
}
