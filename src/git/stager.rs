//! Keeping local working copies of remotes usable across runs.
//!
//! A working copy is created once and repaired on every later run: leftover
//! rebase state, local edits and stray files from an interrupted run are
//! thrown away before fetching.

use crate::boundary::RunWarning;
use crate::config::AuthConfig;
use crate::error::{LineageError, Result};
use crate::git::remote::remote_callbacks;
use crate::git::repository::Git2Repository;
use crate::retry::RetryPolicy;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AutotagOption, FetchOptions, FetchPrune, ObjectType, RepositoryState, ResetType, Status,
    StatusOptions,
};
use git2::Repository as Git2Repo;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A named remote to stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub name: String,
    pub url: String,
}

impl RemoteSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        RemoteSpec {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A local working copy and the remotes it tracks.
///
/// The first remote is cloned as `origin`; the others are added next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub remotes: Vec<RemoteSpec>,
    pub path: PathBuf,
    pub staged: bool,
}

impl RepoHandle {
    pub fn new(path: impl Into<PathBuf>, remotes: Vec<RemoteSpec>) -> Self {
        RepoHandle {
            remotes,
            path: path.into(),
            staged: false,
        }
    }
}

/// Clones, repairs and fetches working copies
pub struct RepoStager {
    auth: AuthConfig,
    retry: RetryPolicy,
}

impl RepoStager {
    pub fn new(auth: AuthConfig, retry: RetryPolicy) -> Self {
        RepoStager { auth, retry }
    }

    /// Bring the working copy at `handle.path` up to date with its remotes.
    ///
    /// # Arguments
    /// * `handle` - The working copy; marked staged on success
    /// * `checkout` - Commit to check out afterwards; failing to do so is
    ///   reported as a warning
    ///
    /// # Returns
    /// * `Ok((repo, warnings))` - The staged repository
    /// * `Err` - If cloning or fetching fails for good
    pub fn stage(
        &self,
        handle: &mut RepoHandle,
        checkout: Option<&str>,
    ) -> Result<(Git2Repository, Vec<RunWarning>)> {
        let origin = handle
            .remotes
            .first()
            .cloned()
            .ok_or_else(|| LineageError::config("No remote to stage"))?;

        let (repo, fresh) = match Git2Repo::open(&handle.path) {
            Ok(repo) => {
                info!(path = %handle.path.display(), "repairing existing working copy");
                self.repair(&repo)?;
                (repo, false)
            }
            Err(_) => (self.clone_origin(&origin.url, &handle.path)?, true),
        };

        for (index, spec) in handle.remotes.iter().enumerate() {
            let name = if index == 0 { "origin" } else { spec.name.as_str() };
            if index > 0 && spec.url == origin.url {
                debug!(remote = %spec.name, "same URL as origin, skipping");
                continue;
            }
            ensure_remote(&repo, name, &spec.url)?;
            if fresh && index == 0 {
                continue;
            }
            info!(remote = name, url = %spec.url, "fetching");
            self.retry.run(|| self.fetch(&repo, name, index == 0))?;
        }

        let mut warnings = Vec::new();
        if let Some(rev) = checkout {
            if let Err(e) = checkout_detached(&repo, rev) {
                warn!(reference = rev, error = %e, "checkout failed");
                warnings.push(RunWarning::CheckoutFailed {
                    reference: rev.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        handle.staged = true;
        Ok((Git2Repository::from_git2(repo), warnings))
    }

    fn fetch_options(&self, prune: bool, tags: AutotagOption) -> FetchOptions<'static> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(remote_callbacks(&self.auth));
        options.download_tags(tags);
        options.prune(if prune { FetchPrune::On } else { FetchPrune::Off });
        options
    }

    fn clone_origin(&self, url: &str, path: &Path) -> Result<Git2Repo> {
        let existed = path.exists();
        info!(url, path = %path.display(), "cloning");

        self.retry.run(|| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let result = RepoBuilder::new()
                .fetch_options(self.fetch_options(false, AutotagOption::All))
                .clone(url, path);
            if result.is_err() && !existed {
                let _ = fs::remove_dir_all(path);
            }
            result.map_err(LineageError::from)
        })
    }

    /// `--tags --force --prune`, and `--prune-tags` for `origin`.
    ///
    /// Heads and tags go in separate passes since libgit2 prunes every ref
    /// the fetched refspecs cover.
    fn fetch(&self, repo: &Git2Repo, name: &str, prune_tags: bool) -> Result<()> {
        let mut remote = repo.find_remote(name)?;
        let heads = format!("+refs/heads/*:refs/remotes/{}/*", name);
        let mut options = self.fetch_options(true, AutotagOption::None);
        remote.fetch(&[heads.as_str()], Some(&mut options), None)?;

        let mut options = self.fetch_options(prune_tags, AutotagOption::All);
        remote.fetch(&["+refs/tags/*:refs/tags/*"], Some(&mut options), None)?;
        Ok(())
    }

    fn repair(&self, repo: &Git2Repo) -> Result<()> {
        if repo.state() != RepositoryState::Clean {
            match repo.open_rebase(None) {
                Ok(mut rebase) => {
                    if let Err(e) = rebase.abort() {
                        debug!(error = %e, "rebase abort failed");
                    }
                }
                Err(e) => debug!(error = %e, "no rebase to abort"),
            }
            repo.cleanup_state()?;
        }

        let head = match repo.head().and_then(|h| h.peel(ObjectType::Commit)) {
            Ok(head) => head,
            Err(e) => {
                // Interrupted clone: nothing to reset, but leftovers still go
                debug!(error = %e, "no HEAD commit, nothing to reset");
                return remove_untracked(repo);
            }
        };
        repo.reset(&head, ResetType::Hard, None)?;
        remove_untracked(repo)?;
        repo.set_head_detached(head.id())?;
        Ok(())
    }
}

fn ensure_remote(repo: &Git2Repo, name: &str, url: &str) -> Result<()> {
    match repo.find_remote(name) {
        Ok(remote) if remote.url() == Some(url) => Ok(()),
        Ok(_) => {
            repo.remote_set_url(name, url)?;
            Ok(())
        }
        Err(_) => {
            info!(remote = name, url, "adding remote");
            repo.remote(name, url)?;
            Ok(())
        }
    }
}

/// `git clean -xdff`
fn remove_untracked(repo: &Git2Repo) -> Result<()> {
    let Some(workdir) = repo.workdir().map(Path::to_path_buf) else {
        return Ok(());
    };

    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .include_ignored(true)
        .recurse_untracked_dirs(false)
        .recurse_ignored_dirs(false);

    let statuses = repo.statuses(Some(&mut options))?;
    for entry in statuses.iter() {
        if !entry.status().intersects(Status::WT_NEW | Status::IGNORED) {
            continue;
        }
        let Some(relative) = entry.path() else {
            continue;
        };
        let path = workdir.join(relative);
        debug!(path = %path.display(), "removing untracked path");
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn checkout_detached(repo: &Git2Repo, rev: &str) -> Result<()> {
    let commit = repo.revparse_single(rev)?.peel_to_commit()?;
    repo.reset(commit.as_object(), ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(commit.id())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Repository;
    use git2::Signature;
    use tempfile::TempDir;

    fn source_repo(dir: &Path) -> Git2Repo {
        let repo = Git2Repo::init(dir).unwrap();
        commit(&repo, "a.txt", "one\n", "first");
        repo
    }

    fn commit(repo: &Git2Repo, file: &str, content: &str, message: &str) -> git2::Oid {
        fs::write(repo.workdir().unwrap().join(file), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Dev", "dev@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    #[test]
    fn test_clone_then_repair() {
        let src_dir = TempDir::new().unwrap();
        let source = source_repo(src_dir.path());
        let work = TempDir::new().unwrap();
        let path = work.path().join("job").join("linux");
        let url = src_dir.path().to_str().unwrap().to_string();

        let stager = RepoStager::new(AuthConfig::default(), RetryPolicy::none());
        let mut handle = RepoHandle::new(&path, vec![RemoteSpec::new("origin", &url)]);
        let (repo, warnings) = stager.stage(&mut handle, None).unwrap();
        assert!(handle.staged);
        assert!(warnings.is_empty());
        assert_eq!(repo.commit("HEAD").unwrap().subject, "first");
        drop(repo);

        fs::write(path.join("a.txt"), "local edit\n").unwrap();
        fs::write(path.join("stray.o"), "junk").unwrap();
        fs::create_dir_all(path.join("build/out")).unwrap();
        fs::write(path.join("build/out/x"), "junk").unwrap();
        let tip = commit(&source, "b.txt", "two\n", "second");

        let (repo, _) = stager.stage(&mut handle, Some(&tip.to_string())).unwrap();
        assert_eq!(fs::read_to_string(path.join("a.txt")).unwrap(), "one\n");
        assert!(!path.join("stray.o").exists());
        assert!(!path.join("build").exists());
        assert_eq!(repo.resolve("HEAD").unwrap(), tip.to_string());
    }

    #[test]
    fn test_extra_remote_is_added() {
        let a_dir = TempDir::new().unwrap();
        source_repo(a_dir.path());
        let b_dir = TempDir::new().unwrap();
        let b = source_repo(b_dir.path());
        let b_tip = commit(&b, "c.txt", "c\n", "only in b");

        let work = TempDir::new().unwrap();
        let path = work.path().join("repo");
        let stager = RepoStager::new(AuthConfig::default(), RetryPolicy::none());
        let mut handle = RepoHandle::new(
            &path,
            vec![
                RemoteSpec::new("side_b", a_dir.path().to_str().unwrap()),
                RemoteSpec::new("side_a", b_dir.path().to_str().unwrap()),
            ],
        );
        let (repo, _) = stager.stage(&mut handle, None).unwrap();
        assert!(repo.inner().find_remote("side_a").is_ok());
        assert_eq!(repo.resolve(&b_tip.to_string()).unwrap(), b_tip.to_string());
    }

    #[test]
    fn test_extra_remote_prunes_branches_keeps_tags() {
        let a_dir = TempDir::new().unwrap();
        source_repo(a_dir.path());
        let b_dir = TempDir::new().unwrap();
        let b = source_repo(b_dir.path());
        let head = b.head().unwrap().peel_to_commit().unwrap();
        b.branch("topic", &head, false).unwrap();
        b.tag_lightweight("v1.0", head.as_object(), false).unwrap();

        let work = TempDir::new().unwrap();
        let stager = RepoStager::new(AuthConfig::default(), RetryPolicy::none());
        let mut handle = RepoHandle::new(
            work.path().join("repo"),
            vec![
                RemoteSpec::new("origin", a_dir.path().to_str().unwrap()),
                RemoteSpec::new("side_a", b_dir.path().to_str().unwrap()),
            ],
        );
        let (repo, _) = stager.stage(&mut handle, None).unwrap();
        assert!(repo.inner().find_reference("refs/remotes/side_a/topic").is_ok());
        drop(repo);

        b.find_branch("topic", git2::BranchType::Local)
            .unwrap()
            .delete()
            .unwrap();
        b.tag_delete("v1.0").unwrap();

        let (repo, _) = stager.stage(&mut handle, None).unwrap();
        assert!(repo.inner().find_reference("refs/remotes/side_a/topic").is_err());
        assert!(repo.inner().find_reference("refs/tags/v1.0").is_ok());
    }

    #[test]
    fn test_interrupted_clone_is_cleaned() {
        let src_dir = TempDir::new().unwrap();
        let source = source_repo(src_dir.path());
        let tip = source.head().unwrap().target().unwrap();
        let url = src_dir.path().to_str().unwrap().to_string();

        let work = TempDir::new().unwrap();
        let path = work.path().join("half");
        let half = Git2Repo::init(&path).unwrap();
        half.remote("origin", &url).unwrap();
        fs::write(path.join("junk.txt"), "left over").unwrap();
        drop(half);

        let stager = RepoStager::new(AuthConfig::default(), RetryPolicy::none());
        let mut handle = RepoHandle::new(&path, vec![RemoteSpec::new("origin", &url)]);
        let (repo, warnings) = stager.stage(&mut handle, Some(&tip.to_string())).unwrap();
        assert!(warnings.is_empty());
        assert!(!path.join("junk.txt").exists());
        assert_eq!(repo.resolve("HEAD").unwrap(), tip.to_string());
    }

    #[test]
    fn test_failed_checkout_is_a_warning() {
        let src_dir = TempDir::new().unwrap();
        source_repo(src_dir.path());
        let work = TempDir::new().unwrap();
        let stager = RepoStager::new(AuthConfig::default(), RetryPolicy::none());
        let mut handle = RepoHandle::new(
            work.path().join("r"),
            vec![RemoteSpec::new("origin", src_dir.path().to_str().unwrap())],
        );
        let (_, warnings) = stager.stage(&mut handle, Some("feedface")).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], RunWarning::CheckoutFailed { .. }));
    }

    #[test]
    fn test_no_remotes() {
        let work = TempDir::new().unwrap();
        let stager = RepoStager::new(AuthConfig::default(), RetryPolicy::none());
        let mut handle = RepoHandle::new(work.path().join("r"), Vec::new());
        assert!(stager.stage(&mut handle, None).is_err());
    }
}
