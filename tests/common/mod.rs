//! A small kernel-like source repository built with git2.
//!
//! ```text
//! v6.1 ── a1 ─┬─ a2 "net: reworded" ── a3 "fs: dropped"       (lts-a)
//!             └─ b2 "net: reworded v2" ── b4 "drm: brand new"  (lts-b, HEAD)
//! ```
//!
//! `a2` and `b2` carry the same change under different messages; `b4` names
//! `a3` as its upstream commit.

#![allow(dead_code)]

use git2::{Oid, Repository, Signature, Time};
use std::path::Path;
use tempfile::TempDir;

pub struct SourceRepo {
    pub dir: TempDir,
    pub base: Oid,
    pub a1: Oid,
    pub a3: Oid,
    pub b4: Oid,
}

impl SourceRepo {
    pub fn url(&self) -> String {
        self.dir.path().to_str().unwrap().to_string()
    }
}

fn commit(
    repo: &Repository,
    parent: Option<Oid>,
    path: &str,
    content: &str,
    message: &str,
    email: &str,
    when: i64,
) -> Oid {
    let parent = parent.map(|oid| repo.find_commit(oid).unwrap());
    let base_tree = parent.as_ref().map(|c| c.tree().unwrap());
    let mut builder = repo.treebuilder(base_tree.as_ref()).unwrap();
    let blob = repo.blob(content.as_bytes()).unwrap();
    builder.insert(path, blob, 0o100644).unwrap();
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();

    let sig = Signature::new("Dev", email, &Time::new(when, 0)).unwrap();
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(None, &sig, &sig, message, &tree, &parents).unwrap()
}

fn lines(prefix: &str) -> String {
    (1..=5).map(|i| format!("{} line {}\n", prefix, i)).collect()
}

pub fn source_repo() -> SourceRepo {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let ours = "dev@intel.com";

    let base = commit(&repo, None, "Makefile", "VERSION = 6\nPATCHLEVEL = 1\n", "Linux 6.1", ours, 1_700_000_000);
    let a1 = commit(&repo, Some(base), "net_a.c", &lines("net a"), "net: same\n\nShared fix.\n", ours, 1_700_000_100);

    let body = "\n\nThe socket leaked on the error path.\n\nSigned-off-by: Dev <dev@intel.com>\n";
    let a2 = commit(&repo, Some(a1), "net_b.c", &lines("net b"), &format!("net: reworded{}", body), ours, 1_700_000_200);
    let a3 = commit(&repo, Some(a2), "fs_d.c", &lines("fs d"), "fs: dropped\n\nOnly on the old tree.\n", ours, 1_700_000_300);

    let b2 = commit(&repo, Some(a1), "net_b.c", &lines("net b"), &format!("net: reworded v2{}", body), ours, 1_700_000_400);
    let b4 = commit(
        &repo,
        Some(b2),
        "drm_e.c",
        &lines("drm e"),
        &format!("drm: brand new\n\nOnly on the new tree.\n\n[ Upstream commit {} ]\n", a3),
        "someone@example.com",
        1_700_000_500,
    );

    repo.tag_lightweight("v6.1", &repo.find_object(base, None).unwrap(), false)
        .unwrap();
    repo.branch("lts-a", &repo.find_commit(a3).unwrap(), false).unwrap();
    repo.branch("lts-b", &repo.find_commit(b4).unwrap(), false).unwrap();
    repo.set_head("refs/heads/lts-b").unwrap();

    SourceRepo { dir, base, a1, a3, b4 }
}

/// A second repository holding the same history, with `lts-a` as a local
/// branch, to serve as an upstream.
pub fn upstream_copy(source: &SourceRepo) -> TempDir {
    let dir = TempDir::new().unwrap();
    let repo = Repository::clone(&source.url(), dir.path()).unwrap();
    repo.branch("lts-a", &repo.find_commit(source.a3).unwrap(), false)
        .unwrap();
    dir
}

/// Whether `git range-diff` is available on this machine
pub fn has_range_diff() -> bool {
    std::process::Command::new("git")
        .args(["range-diff", "-h"])
        .output()
        .map(|out| {
            let text = [out.stdout, out.stderr].concat();
            String::from_utf8_lossy(&text).contains("range-diff")
        })
        .unwrap_or(false)
}

pub fn workspace_config(root: &Path) -> patch_lineage::config::Config {
    let mut config = patch_lineage::config::Config::default();
    config.workspace.root = Some(root.to_path_buf());
    config.retry.attempts = 1;
    config
}
