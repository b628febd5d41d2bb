//! Repository access layer
//!
//! The engines never talk to `git2` directly. They depend on the
//! [Repository] trait, which has two implementations:
//!
//! - [repository::Git2Repository]: a staged working copy read through `git2`
//! - [mock::MockRepository]: an in-memory linear history for tests
//!
//! Staging remotes ([stager]), listing advertised refs ([remote]) and running
//! the external range-diff tool ([range_diff]) live next to the trait because
//! they produce or consume the same working copies.
//!
//! ```rust
//! # use patch_lineage::git::{LogQuery, Repository};
//! # fn example(repo: &dyn Repository) -> patch_lineage::error::Result<()> {
//! let shas = repo.rev_list(Some("v5.15"), "HEAD")?;
//! for sha in shas {
//!     let record = repo.commit(&sha)?;
//!     println!("{} {}", record.short_sha(), record.subject);
//! }
//! # Ok(())
//! # }
//! ```

pub mod mock;
pub mod range_diff;
pub mod remote;
pub mod repository;
pub mod stager;

pub use mock::{MockCommit, MockRepository};
pub use range_diff::RangeDiffTool;
pub use repository::Git2Repository;
pub use stager::{RemoteSpec, RepoHandle, RepoStager};

use crate::domain::baseline::TagPoint;
use crate::domain::commit::CommitRecord;
use crate::error::Result;

/// How a log query matches commit messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Some line of the message equals the text
    Line(String),
    /// The message contains the text anywhere
    Contains(String),
}

impl MessageFilter {
    pub fn matches(&self, message: &str) -> bool {
        match self {
            MessageFilter::Line(text) => message.lines().any(|line| line.trim_end() == text),
            MessageFilter::Contains(text) => message.contains(text.as_str()),
        }
    }
}

/// A `git log`-like query. Merge commits are never returned.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Tip of the walk
    pub rev: String,
    /// Exclude everything reachable from this revision
    pub hide: Option<String>,
    /// Only commits touching one of these paths
    pub paths: Vec<String>,
    /// Only commits whose author email matches (case-insensitive)
    pub author: Option<String>,
    /// Only commits committed at or after this time (seconds since the epoch)
    pub since: Option<i64>,
    pub message: Option<MessageFilter>,
    pub oldest_first: bool,
}

impl LogQuery {
    pub fn new(rev: impl Into<String>) -> Self {
        LogQuery {
            rev: rev.into(),
            ..Default::default()
        }
    }

    pub fn hide(mut self, rev: impl Into<String>) -> Self {
        self.hide = Some(rev.into());
        self
    }

    pub fn paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    pub fn author(mut self, email: impl Into<String>) -> Self {
        self.author = Some(email.into());
        self
    }

    pub fn since(mut self, since: Option<i64>) -> Self {
        self.since = since;
        self
    }

    pub fn message(mut self, filter: MessageFilter) -> Self {
        self.message = Some(filter);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.oldest_first = true;
        self
    }
}

/// Read access to one repository.
///
/// Revisions are anything the backend can resolve: full or abbreviated
/// shas, tag names, branch names, `HEAD`.
pub trait Repository {
    /// Human-readable identity for log lines (remote URL or path)
    fn name(&self) -> &str;

    /// Resolve a revision to a full commit sha
    ///
    /// # Returns
    /// * `Ok(String)` - 40-character hex sha
    /// * `Err` - `RefNotFound` if the revision does not name a commit
    fn resolve(&self, rev: &str) -> Result<String>;

    /// Load the record of a commit
    fn commit(&self, rev: &str) -> Result<CommitRecord>;

    /// Unified diff of a commit against its first parent
    fn show(&self, rev: &str) -> Result<String>;

    /// Shas matching `query`, newest first unless `oldest_first` is set
    fn log(&self, query: &LogQuery) -> Result<Vec<String>>;

    /// Tag names matching a glob, in `v:refname` order
    fn tag_names(&self, pattern: Option<&str>) -> Result<Vec<String>>;

    /// Tags (matching a glob) whose commit contains `rev`, in `v:refname` order
    fn tags_containing(&self, rev: &str, pattern: Option<&str>) -> Result<Vec<String>>;

    /// Release tags decorating `rev` or its ancestors, newest first
    ///
    /// # Arguments
    /// * `rev` - Tip of the scan
    /// * `since` - Only consider commits committed at or after this time
    fn tag_points(&self, rev: &str, since: Option<i64>) -> Result<Vec<TagPoint>>;

    /// `Linux X.Y...` release commits among `rev` and its ancestors, newest
    /// first, reported as tag points named `vX.Y...`
    fn release_points(&self, rev: &str, since: Option<i64>) -> Result<Vec<TagPoint>>;

    /// Whether `path` exists in the tree of `rev`
    fn has_path(&self, rev: &str, path: &str) -> Result<bool>;

    /// Non-merge commits in `from..to`, oldest first
    fn rev_list(&self, from: Option<&str>, to: &str) -> Result<Vec<String>> {
        let mut query = LogQuery::new(to).oldest_first();
        if let Some(from) = from {
            query = query.hide(from);
        }
        self.log(&query)
    }

    /// Fingerprint of a commit's change
    fn fingerprint(&self, rev: &str) -> Result<Option<String>> {
        Ok(self.commit(rev)?.fingerprint)
    }
}
