use crate::domain::baseline::{is_release_tag_name, release_commit_tag, TagPoint};
use crate::domain::commit::{extract_upstream_ref, CommitRecord};
use crate::domain::version::version_refname_cmp;
use crate::error::{LineageError, Result};
use crate::git::{LogQuery, Repository};
use git2::{Commit, Diff, DiffFindOptions, DiffFormat, DiffOptions, Oid, Repository as Git2Repo, Sort};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// A working copy read through `git2`
pub struct Git2Repository {
    repo: Git2Repo,
    name: String,
    records: RefCell<HashMap<String, CommitRecord>>,
}

impl Git2Repository {
    /// Open the repository at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let repo = Git2Repo::open(path).map_err(|e| {
            LineageError::invalid_repo(format!("{}: {}", path.display(), e.message()))
        })?;
        Ok(Self::from_git2(repo))
    }

    /// Wrap an existing `git2::Repository`
    pub fn from_git2(repo: Git2Repo) -> Self {
        let name = repo
            .find_remote("origin")
            .ok()
            .and_then(|remote| remote.url().map(str::to_string))
            .or_else(|| repo.workdir().map(|dir| dir.display().to_string()))
            .unwrap_or_else(|| repo.path().display().to_string());

        Git2Repository {
            repo,
            name,
            records: RefCell::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &Git2Repo {
        &self.repo
    }

    /// Local path of the working copy.
    pub fn workdir(&self) -> &Path {
        self.repo.workdir().unwrap_or_else(|| self.repo.path())
    }

    fn find_commit(&self, rev: &str) -> Result<Commit<'_>> {
        let object = self
            .repo
            .revparse_single(rev)
            .map_err(|_| LineageError::ref_not_found(rev, &self.name))?;
        object
            .peel_to_commit()
            .map_err(|_| LineageError::ref_not_found(rev, &self.name))
    }

    fn commit_diff(&self, commit: &Commit<'_>, paths: &[String]) -> Result<Diff<'_>> {
        let tree = commit.tree()?;
        let parent_tree = if commit.parent_count() > 0 {
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        let mut options = DiffOptions::new();
        for path in paths {
            options.pathspec(path);
        }
        let mut diff =
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut options))?;
        if paths.is_empty() {
            diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;
        }
        Ok(diff)
    }

    fn build_record(&self, commit: &Commit<'_>) -> Result<CommitRecord> {
        let diff = self.commit_diff(commit, &[])?;
        let stats = diff.stats()?;

        let files: BTreeSet<String> = diff
            .deltas()
            .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
            .map(|path| path.to_string_lossy().into_owned())
            .collect();

        let fingerprint = if diff.deltas().len() == 0 {
            None
        } else {
            Some(diff.patchid(None)?.to_string())
        };

        let message = String::from_utf8_lossy(commit.message_bytes()).into_owned();
        Ok(CommitRecord {
            sha: commit.id().to_string(),
            author_email: commit.author().email().unwrap_or_default().to_lowercase(),
            committer_email: commit.committer().email().unwrap_or_default().to_lowercase(),
            subject: commit.summary().unwrap_or_default().to_string(),
            upstream_ref: extract_upstream_ref(&message),
            message,
            files: files.into_iter().collect(),
            insertions: stats.insertions(),
            deletions: stats.deletions(),
            fingerprint,
            authored_at: commit.author().when().seconds(),
            committed_at: commit.time().seconds(),
        })
    }

    fn walk(&self, tip: &str, hide: Option<&str>, oldest_first: bool) -> Result<Vec<Oid>> {
        let mut revwalk = self.repo.revwalk()?;
        let sorting = if oldest_first {
            Sort::TOPOLOGICAL | Sort::REVERSE
        } else {
            Sort::TOPOLOGICAL
        };
        revwalk.set_sorting(sorting)?;
        revwalk.push(self.find_commit(tip)?.id())?;
        if let Some(hide) = hide {
            revwalk.hide(self.find_commit(hide)?.id())?;
        }
        revwalk.map(|oid| oid.map_err(LineageError::from)).collect()
    }

    fn tagged_commits(&self, pattern: Option<&str>) -> Result<Vec<(String, Oid)>> {
        let mut tagged = Vec::new();
        for name in self.repo.tag_names(pattern)?.iter().flatten() {
            let reference = match self.repo.find_reference(&format!("refs/tags/{}", name)) {
                Ok(reference) => reference,
                Err(_) => continue,
            };
            match reference.peel_to_commit() {
                Ok(commit) => tagged.push((name.to_string(), commit.id())),
                Err(e) => debug!(tag = name, error = %e, "tag does not point at a commit"),
            }
        }
        Ok(tagged)
    }
}

impl Repository for Git2Repository {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, rev: &str) -> Result<String> {
        Ok(self.find_commit(rev)?.id().to_string())
    }

    fn commit(&self, rev: &str) -> Result<CommitRecord> {
        let commit = self.find_commit(rev)?;
        let sha = commit.id().to_string();
        if let Some(record) = self.records.borrow().get(&sha) {
            return Ok(record.clone());
        }

        let record = self.build_record(&commit)?;
        self.records.borrow_mut().insert(sha, record.clone());
        Ok(record)
    }

    fn show(&self, rev: &str) -> Result<String> {
        let commit = self.find_commit(rev)?;
        let diff = self.commit_diff(&commit, &[])?;

        let mut text = format!(
            "commit {}\nAuthor: {} <{}>\n\n",
            commit.id(),
            commit.author().name().unwrap_or_default(),
            commit.author().email().unwrap_or_default()
        );
        for line in String::from_utf8_lossy(commit.message_bytes()).lines() {
            text.push_str("    ");
            text.push_str(line);
            text.push('\n');
        }
        text.push('\n');

        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                text.push(line.origin());
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(text)
    }

    fn log(&self, query: &LogQuery) -> Result<Vec<String>> {
        let author = query.author.as_ref().map(|a| a.to_lowercase());
        let mut shas = Vec::new();

        for oid in self.walk(&query.rev, query.hide.as_deref(), query.oldest_first)? {
            let commit = self.repo.find_commit(oid)?;
            if commit.parent_count() > 1 {
                continue;
            }
            if let Some(since) = query.since {
                if commit.time().seconds() < since {
                    continue;
                }
            }
            if let Some(author) = &author {
                let email = commit.author().email().unwrap_or_default().to_lowercase();
                if !email.contains(author.as_str()) {
                    continue;
                }
            }
            if let Some(filter) = &query.message {
                if !filter.matches(&String::from_utf8_lossy(commit.message_bytes())) {
                    continue;
                }
            }
            if !query.paths.is_empty() && self.commit_diff(&commit, &query.paths)?.deltas().len() == 0
            {
                continue;
            }
            shas.push(oid.to_string());
        }

        Ok(shas)
    }

    fn tag_names(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self
            .repo
            .tag_names(pattern)?
            .iter()
            .flatten()
            .map(str::to_string)
            .collect();
        tags.sort_by(|a, b| version_refname_cmp(a, b));
        Ok(tags)
    }

    fn tags_containing(&self, rev: &str, pattern: Option<&str>) -> Result<Vec<String>> {
        let target = self.find_commit(rev)?.id();
        let mut tags = Vec::new();
        for (name, oid) in self.tagged_commits(pattern)? {
            if oid == target || self.repo.graph_descendant_of(oid, target)? {
                tags.push(name);
            }
        }
        tags.sort_by(|a, b| version_refname_cmp(a, b));
        Ok(tags)
    }

    fn tag_points(&self, rev: &str, since: Option<i64>) -> Result<Vec<TagPoint>> {
        let mut by_commit: HashMap<Oid, Vec<String>> = HashMap::new();
        for (name, oid) in self.tagged_commits(Some("v*"))? {
            if is_release_tag_name(&name) {
                by_commit.entry(oid).or_default().push(name);
            }
        }

        let mut points = Vec::new();
        for oid in self.walk(rev, None, false)? {
            let Some(names) = by_commit.get(&oid) else {
                continue;
            };
            if let Some(since) = since {
                if self.repo.find_commit(oid)?.time().seconds() < since {
                    continue;
                }
            }
            for name in names {
                points.push(TagPoint::new(name.clone(), oid.to_string()));
            }
        }
        Ok(points)
    }

    fn release_points(&self, rev: &str, since: Option<i64>) -> Result<Vec<TagPoint>> {
        let mut points = Vec::new();
        for oid in self.walk(rev, None, false)? {
            let commit = self.repo.find_commit(oid)?;
            if since.map_or(false, |since| commit.time().seconds() < since) {
                continue;
            }
            if let Some(tag) = commit.summary().and_then(release_commit_tag) {
                points.push(TagPoint::new(tag, oid.to_string()));
            }
        }
        Ok(points)
    }

    fn has_path(&self, rev: &str, path: &str) -> Result<bool> {
        let tree = self.find_commit(rev)?.tree()?;
        Ok(tree.get_path(Path::new(path)).is_ok())
    }
}
