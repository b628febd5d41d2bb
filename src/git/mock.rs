use crate::domain::baseline::{is_release_tag_name, release_commit_tag, TagPoint};
use crate::domain::commit::{extract_upstream_ref, CommitRecord};
use crate::domain::hunks::extract_hunks;
use crate::domain::version::version_refname_cmp;
use crate::error::{LineageError, Result};
use crate::git::{LogQuery, Repository};
use git2::{ObjectType, Oid};
use regex::Regex;
use std::collections::HashMap;

/// One commit of a [`MockRepository`]
#[derive(Debug, Clone)]
pub struct MockCommit {
    pub sha: String,
    pub subject: String,
    pub message: String,
    pub diff: String,
    pub author_email: String,
    pub authored_at: i64,
    pub fingerprint: Option<String>,
}

impl MockCommit {
    /// A commit whose message is just `subject` and whose change is `diff`.
    ///
    /// The fingerprint is derived from the changed lines of `diff`, so two
    /// commits with the same `+`/`-` lines share it.
    pub fn new(sha: impl Into<String>, subject: impl Into<String>, diff: impl Into<String>) -> Self {
        let subject = subject.into();
        let diff = diff.into();
        MockCommit {
            sha: sha.into(),
            message: subject.clone(),
            subject,
            fingerprint: diff_fingerprint(&diff),
            diff,
            author_email: "dev@example.com".to_string(),
            authored_at: 0,
        }
    }

    /// Replace the full message; the subject stays as given to `new`.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn author(mut self, email: impl Into<String>) -> Self {
        self.author_email = email.into();
        self
    }

    pub fn authored_at(mut self, seconds: i64) -> Self {
        self.authored_at = seconds;
        self
    }

    pub fn fingerprint(mut self, fingerprint: Option<&str>) -> Self {
        self.fingerprint = fingerprint.map(str::to_string);
        self
    }

    fn files(&self) -> Vec<String> {
        extract_hunks(&self.diff, false).into_keys().collect()
    }
}

fn diff_fingerprint(diff: &str) -> Option<String> {
    let changed: Vec<String> = extract_hunks(diff, false)
        .into_iter()
        .flat_map(|(path, hunks)| {
            std::iter::once(path).chain(hunks.into_iter().flatten())
        })
        .collect();
    if changed.is_empty() {
        return None;
    }
    Oid::hash_object(ObjectType::Blob, changed.join("\n").as_bytes())
        .ok()
        .map(|oid| oid.to_string())
}

fn glob_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

/// In-memory repository with a single linear history, oldest commit first
pub struct MockRepository {
    name: String,
    commits: Vec<MockCommit>,
    tags: HashMap<String, String>,
    branches: HashMap<String, String>,
}

impl MockRepository {
    pub fn new(name: impl Into<String>) -> Self {
        MockRepository {
            name: name.into(),
            commits: Vec::new(),
            tags: HashMap::new(),
            branches: HashMap::new(),
        }
    }

    /// Append a commit on top of the history
    pub fn add_commit(&mut self, commit: MockCommit) {
        self.commits.push(commit);
    }

    /// Add a tag pointing at `sha`
    pub fn add_tag(&mut self, name: impl Into<String>, sha: impl Into<String>) {
        self.tags.insert(name.into(), sha.into());
    }

    pub fn set_branch(&mut self, name: impl Into<String>, sha: impl Into<String>) {
        self.branches.insert(name.into(), sha.into());
    }

    fn position(&self, rev: &str) -> Result<usize> {
        let sha = if rev == "HEAD" {
            self.commits.last().map(|c| c.sha.as_str())
        } else {
            self.tags
                .get(rev)
                .or_else(|| self.branches.get(rev))
                .map(String::as_str)
                .or(Some(rev))
        };

        sha.and_then(|sha| self.commits.iter().position(|c| c.sha.starts_with(sha)))
            .ok_or_else(|| LineageError::ref_not_found(rev, &self.name))
    }

    fn matching_tags(&self, pattern: Option<&str>) -> Vec<(&String, usize)> {
        let glob = pattern.and_then(glob_regex);
        self.tags
            .iter()
            .filter(|(name, _)| glob.as_ref().map_or(true, |re| re.is_match(name)))
            .filter_map(|(name, sha)| self.position(sha).ok().map(|pos| (name, pos)))
            .collect()
    }
}

impl Repository for MockRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, rev: &str) -> Result<String> {
        Ok(self.commits[self.position(rev)?].sha.clone())
    }

    fn commit(&self, rev: &str) -> Result<CommitRecord> {
        let commit = &self.commits[self.position(rev)?];
        let count = |prefix: char| {
            commit
                .diff
                .lines()
                .filter(|l| l.starts_with(prefix) && !l.starts_with("+++") && !l.starts_with("---"))
                .count()
        };

        Ok(CommitRecord {
            sha: commit.sha.clone(),
            author_email: commit.author_email.to_lowercase(),
            committer_email: commit.author_email.to_lowercase(),
            subject: commit.subject.clone(),
            message: commit.message.clone(),
            files: commit.files(),
            insertions: count('+'),
            deletions: count('-'),
            fingerprint: commit.fingerprint.clone(),
            authored_at: commit.authored_at,
            committed_at: commit.authored_at,
            upstream_ref: extract_upstream_ref(&commit.message),
        })
    }

    fn show(&self, rev: &str) -> Result<String> {
        let commit = &self.commits[self.position(rev)?];
        Ok(format!("commit {}\n\n    {}\n\n{}", commit.sha, commit.subject, commit.diff))
    }

    fn log(&self, query: &LogQuery) -> Result<Vec<String>> {
        let tip = self.position(&query.rev)?;
        let start = match &query.hide {
            Some(hide) => self.position(hide)? + 1,
            None => 0,
        };

        let mut shas = Vec::new();
        for commit in self.commits.iter().take(tip + 1).skip(start) {
            if query.since.map_or(false, |since| commit.authored_at < since) {
                continue;
            }
            if let Some(author) = &query.author {
                if !commit.author_email.to_lowercase().contains(&author.to_lowercase()) {
                    continue;
                }
            }
            if let Some(filter) = &query.message {
                if !filter.matches(&commit.message) {
                    continue;
                }
            }
            if !query.paths.is_empty() && !commit.files().iter().any(|f| query.paths.contains(f)) {
                continue;
            }
            shas.push(commit.sha.clone());
        }

        if !query.oldest_first {
            shas.reverse();
        }
        Ok(shas)
    }

    fn tag_names(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self
            .matching_tags(pattern)
            .into_iter()
            .map(|(name, _)| name.clone())
            .collect();
        tags.sort_by(|a, b| version_refname_cmp(a, b));
        Ok(tags)
    }

    fn tags_containing(&self, rev: &str, pattern: Option<&str>) -> Result<Vec<String>> {
        let target = self.position(rev)?;
        let mut tags: Vec<String> = self
            .matching_tags(pattern)
            .into_iter()
            .filter(|(_, pos)| *pos >= target)
            .map(|(name, _)| name.clone())
            .collect();
        tags.sort_by(|a, b| version_refname_cmp(a, b));
        Ok(tags)
    }

    fn tag_points(&self, rev: &str, since: Option<i64>) -> Result<Vec<TagPoint>> {
        let tip = self.position(rev)?;
        let mut tagged: Vec<(&String, usize)> = self
            .matching_tags(Some("v*"))
            .into_iter()
            .filter(|(name, pos)| *pos <= tip && is_release_tag_name(name))
            .filter(|(_, pos)| since.map_or(true, |since| self.commits[*pos].authored_at >= since))
            .collect();
        tagged.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Ok(tagged
            .into_iter()
            .map(|(name, pos)| TagPoint::new(name.clone(), self.commits[pos].sha.clone()))
            .collect())
    }

    fn release_points(&self, rev: &str, since: Option<i64>) -> Result<Vec<TagPoint>> {
        let tip = self.position(rev)?;
        Ok(self.commits[..=tip]
            .iter()
            .rev()
            .filter(|c| since.map_or(true, |since| c.authored_at >= since))
            .filter_map(|c| release_commit_tag(&c.subject).map(|tag| TagPoint::new(tag, c.sha.clone())))
            .collect())
    }

    fn has_path(&self, rev: &str, path: &str) -> Result<bool> {
        let tip = self.position(rev)?;
        Ok(self.commits[..=tip]
            .iter()
            .any(|c| c.files().iter().any(|f| f == path)))
    }
}
