//! Finding the upstream release a revision is built on.

use crate::config::BaselineConfig;
use crate::domain::baseline::{derive_baseline, Baseline};
use crate::error::Result;
use crate::git::Repository;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Average month, in seconds
const MONTH_SECS: i64 = 2_629_746;

/// What marks a release in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineScan {
    /// `vX.Y[.Z]` tags on ancestors
    #[default]
    Tags,
    /// `Linux X.Y[.Z]` commit subjects, for trees that do not carry tags
    ReleaseCommits,
}

#[derive(Debug, Clone, Default)]
pub struct BaselineResolver {
    since_months: Option<u32>,
    scan: BaselineScan,
}

impl BaselineResolver {
    pub fn new(since_months: Option<u32>, scan: BaselineScan) -> Self {
        BaselineResolver { since_months, scan }
    }

    pub fn from_config(config: &BaselineConfig) -> Self {
        Self::new(config.since_months, config.scan)
    }

    fn since(&self) -> Option<i64> {
        let months = self.since_months?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        Some(now - i64::from(months) * MONTH_SECS)
    }

    /// Baseline of `rev`, or `None` when no release point is reachable.
    ///
    /// # Errors
    /// Propagates failures of the history scan itself.
    pub fn resolve(&self, repo: &dyn Repository, rev: &str, realtime: bool) -> Result<Option<Baseline>> {
        let since = self.since();
        let points = match self.scan {
            BaselineScan::Tags => repo.tag_points(rev, since)?,
            BaselineScan::ReleaseCommits => repo.release_points(rev, since)?,
        };
        debug!(rev, points = points.len(), realtime, "scanned release points");

        let baseline = derive_baseline(&points, realtime);
        match &baseline {
            Some(found) => info!(rev, version = %found.version, sha = %found.sha, "baseline"),
            None => info!(rev, repo = repo.name(), "no baseline found"),
        }
        Ok(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{MockCommit, MockRepository};

    fn repo() -> MockRepository {
        let mut repo = MockRepository::new("lts");
        for (sha, subject) in [
            ("c1", "Linux 5.15"),
            ("c2", "fix a"),
            ("c3", "Linux 5.15.1"),
            ("c4", "fix b"),
            ("c5", "Linux 5.16-rc1"),
            ("c6", "fix c"),
        ] {
            repo.add_commit(MockCommit::new(sha, subject, ""));
        }
        repo.add_tag("v5.15", "c1");
        repo.add_tag("v5.15.1", "c3");
        repo.add_tag("v5.16-rc1", "c5");
        repo
    }

    #[test]
    fn test_tags_pick_highest_base() {
        let repo = repo();
        let baseline = BaselineResolver::default().resolve(&repo, "c4", false).unwrap().unwrap();
        assert_eq!(baseline.version, "v5.15.1");
        assert_eq!(baseline.sha, "c3");

        let baseline = BaselineResolver::default().resolve(&repo, "HEAD", false).unwrap().unwrap();
        assert_eq!(baseline.version, "v5.16-rc1");
    }

    #[test]
    fn test_release_commits() {
        let repo = repo();
        let resolver = BaselineResolver::new(None, BaselineScan::ReleaseCommits);
        let baseline = resolver.resolve(&repo, "c2", false).unwrap().unwrap();
        assert_eq!(baseline.version, "v5.15");
        assert_eq!(baseline.sha, "c1");
    }

    #[test]
    fn test_realtime_without_rt_points_is_empty() {
        let repo = repo();
        assert!(BaselineResolver::default().resolve(&repo, "HEAD", true).unwrap().is_none());
    }

    #[test]
    fn test_since_window_excludes_old_history() {
        // Mock commits are all dated at the epoch
        let repo = repo();
        let resolver = BaselineResolver::new(Some(7), BaselineScan::Tags);
        assert!(resolver.resolve(&repo, "HEAD", false).unwrap().is_none());
    }
}
