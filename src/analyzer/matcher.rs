//! Fuzzy patch matching.
//!
//! When two commits don't share a fingerprint they may still carry the same
//! change (rebased onto different context, split differently, with a file
//! moved). Candidates are narrowed down cheaply first, by touched files,
//! author or subject, then compared hunk by hunk.

use crate::config::MatchingConfig;
use crate::domain::commit::CommitRecord;
use crate::domain::hunks::{similar_patches, MatchRatio};
use crate::error::Result;
use crate::git::{LogQuery, MessageFilter, Repository};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Stop at the first acceptable candidate, or scan them all for the best
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    Fast,
    #[default]
    Best,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    pub min_ratio: f64,
    pub strategy: MatchStrategy,
    pub subject_fuzzy_fallback: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl MatchOptions {
    pub fn from_config(config: &MatchingConfig) -> Self {
        MatchOptions {
            min_ratio: config.min_ratio,
            strategy: config.strategy,
            subject_fuzzy_fallback: config.subject_fuzzy_fallback,
        }
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Outcome of a similarity search
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchResult {
    pub matched: Option<CommitRecord>,
    pub ratio: f64,
    pub matched_hunks: usize,
    pub total_hunks: usize,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// Ways to narrow down candidates before comparing diffs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Commits touching the same files (that still exist on the other side)
    Files,
    /// Commits by the same author
    Author,
    /// Commits with the same subject line, then containing it
    Subject,
}

/// Where candidates are searched: `hide..rev` of the other repository
#[derive(Debug, Clone, Copy)]
pub struct SearchScope<'a> {
    pub rev: &'a str,
    pub hide: Option<&'a str>,
    /// Skip commits older than the one being matched
    pub since_authored: bool,
}

impl<'a> SearchScope<'a> {
    pub fn new(rev: &'a str) -> Self {
        SearchScope {
            rev,
            hide: None,
            since_authored: false,
        }
    }

    pub fn hide(mut self, hide: Option<&'a str>) -> Self {
        self.hide = hide;
        self
    }

    pub fn since_authored(mut self) -> Self {
        self.since_authored = true;
        self
    }

    fn query(&self, commit: &CommitRecord) -> LogQuery {
        let mut query = LogQuery::new(self.rev).oldest_first();
        if let Some(hide) = self.hide {
            query = query.hide(hide);
        }
        if self.since_authored {
            query = query.since(Some(commit.authored_at));
        }
        query
    }
}

/// Compare `sha_a` with every candidate and keep the match.
///
/// A perfect ratio ends the scan. Otherwise candidates reaching
/// `min_ratio` qualify; `Fast` takes the first, `Best` the highest.
pub fn find_similar_patch(
    repo_a: &dyn Repository,
    sha_a: &str,
    repo_b: &dyn Repository,
    candidates: &[String],
    options: &MatchOptions,
) -> Result<MatchResult> {
    if candidates.is_empty() {
        return Ok(MatchResult::default());
    }

    let diff_a = repo_a.show(sha_a)?;
    let mut best: Option<(&str, MatchRatio)> = None;

    for rev in candidates {
        let ratio = similar_patches(&diff_a, &repo_b.show(rev)?);
        if ratio.ratio >= 1.0 {
            best = Some((rev, ratio));
            break;
        }
        if ratio.ratio < options.min_ratio {
            continue;
        }
        match options.strategy {
            MatchStrategy::Fast => {
                best = Some((rev, ratio));
                break;
            }
            MatchStrategy::Best => {
                if best.map_or(true, |(_, current)| ratio.ratio > current.ratio) {
                    best = Some((rev, ratio));
                }
            }
        }
    }

    let Some((rev, ratio)) = best else {
        debug!(commit = sha_a, candidates = candidates.len(), "no similar patch");
        return Ok(MatchResult::default());
    };

    let matched = repo_b.commit(rev)?;
    info!(
        commit = sha_a,
        matched = %matched.sha,
        hunks = ratio.matched,
        total = ratio.total,
        repo = repo_b.name(),
        "similar patch matched"
    );
    Ok(MatchResult {
        matched: Some(matched),
        ratio: ratio.ratio,
        matched_hunks: ratio.matched,
        total_hunks: ratio.total,
    })
}

/// Tiered candidate search
#[derive(Debug, Clone, Default)]
pub struct SimilarityMatcher {
    pub options: MatchOptions,
}

impl SimilarityMatcher {
    pub fn new(options: MatchOptions) -> Self {
        SimilarityMatcher { options }
    }

    /// Try each tier in order until one finds a match.
    pub fn search(
        &self,
        repo_a: &dyn Repository,
        commit_a: &CommitRecord,
        repo_b: &dyn Repository,
        scope: SearchScope<'_>,
        tiers: &[Tier],
    ) -> Result<MatchResult> {
        for tier in tiers {
            let result = match tier {
                Tier::Files => self.by_files(repo_a, commit_a, repo_b, scope)?,
                Tier::Author => self.by_author(repo_a, commit_a, repo_b, scope)?,
                Tier::Subject => self.by_subject(repo_a, commit_a, repo_b, scope)?,
            };
            if result.is_match() {
                return Ok(result);
            }
        }
        Ok(MatchResult::default())
    }

    pub fn by_files(
        &self,
        repo_a: &dyn Repository,
        commit_a: &CommitRecord,
        repo_b: &dyn Repository,
        scope: SearchScope<'_>,
    ) -> Result<MatchResult> {
        let mut files = Vec::new();
        for file in &commit_a.files {
            if repo_b.has_path(scope.rev, file)? {
                files.push(file.clone());
            }
        }
        if files.is_empty() {
            debug!(commit = %commit_a.sha, "no touched file exists on the other side");
            return Ok(MatchResult::default());
        }

        let candidates = repo_b.log(&scope.query(commit_a).paths(files))?;
        find_similar_patch(repo_a, &commit_a.sha, repo_b, &candidates, &self.options)
    }

    pub fn by_author(
        &self,
        repo_a: &dyn Repository,
        commit_a: &CommitRecord,
        repo_b: &dyn Repository,
        scope: SearchScope<'_>,
    ) -> Result<MatchResult> {
        if commit_a.author_email.is_empty() {
            debug!(commit = %commit_a.sha, "no author email");
            return Ok(MatchResult::default());
        }

        let candidates = repo_b.log(&scope.query(commit_a).author(&commit_a.author_email))?;
        find_similar_patch(repo_a, &commit_a.sha, repo_b, &candidates, &self.options)
    }

    pub fn by_subject(
        &self,
        repo_a: &dyn Repository,
        commit_a: &CommitRecord,
        repo_b: &dyn Repository,
        scope: SearchScope<'_>,
    ) -> Result<MatchResult> {
        let subject = commit_a.subject.trim();
        if subject.is_empty() {
            return Ok(MatchResult::default());
        }

        let mut filters = vec![MessageFilter::Line(subject.to_string())];
        if self.options.subject_fuzzy_fallback {
            filters.push(MessageFilter::Contains(subject.to_string()));
        }

        for filter in filters {
            let candidates = repo_b.log(&scope.query(commit_a).message(filter))?;
            let result =
                find_similar_patch(repo_a, &commit_a.sha, repo_b, &candidates, &self.options)?;
            if result.is_match() {
                return Ok(result);
            }
        }
        Ok(MatchResult::default())
    }
}
