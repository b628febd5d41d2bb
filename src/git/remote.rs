//! Remote access: credentials, ref advertisement and reference resolution.

use crate::config::AuthConfig;
use crate::domain::reference::{classify_remote_refs, looks_like_sha, RefKind, ResolvedRef};
use crate::error::{LineageError, Result};
use crate::retry::RetryPolicy;
use git2::{Cred, CredentialType, Direction, Remote, RemoteCallbacks, Repository as Git2Repo};
use std::path::Path;
use tracing::{debug, error, info};

/// Where a reference is looked up
#[derive(Debug, Clone, Copy)]
pub enum RefTarget<'a> {
    /// A remote URL
    Url(&'a str),
    /// The `origin` remote of a local repository
    Local(&'a Path),
}

/// Credential callbacks for fetches and ref listing.
///
/// SSH keys are tried in order, then the agent, then git's default
/// credentials.
pub fn remote_callbacks(auth: &AuthConfig) -> RemoteCallbacks<'static> {
    let key_paths = auth.key_paths();
    let username = auth.username.clone();
    let use_agent = auth.use_agent;
    let mut tries = 0usize;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed_types| {
        tries += 1;
        if tries > key_paths.len() + 2 {
            return Err(git2::Error::from_str("no usable credentials"));
        }
        let user = username_from_url.unwrap_or(&username);

        if allowed_types.contains(CredentialType::SSH_KEY) {
            for key_path in key_paths.iter().filter(|p| p.exists()) {
                if let Ok(cred) = Cred::ssh_key(user, None, key_path, None) {
                    return Ok(cred);
                }
            }
            if use_agent {
                if let Ok(cred) = Cred::ssh_key_from_agent(user) {
                    return Ok(cred);
                }
            }
        }

        Cred::default()
    });
    callbacks
}

/// List the heads and tags a remote advertises, as `(refname, sha)` pairs.
pub fn list_remote_refs(url: &str, auth: &AuthConfig) -> Result<Vec<(String, String)>> {
    let mut remote = Remote::create_detached(url)?;
    let connection = remote.connect_auth(Direction::Fetch, Some(remote_callbacks(auth)), None)?;

    let refs = connection
        .list()?
        .iter()
        .filter(|head| head.name().starts_with("refs/heads/") || head.name().starts_with("refs/tags/"))
        .map(|head| (head.name().to_string(), head.oid().to_string()))
        .collect();
    Ok(refs)
}

fn origin_url(path: &Path) -> Result<String> {
    let repo = Git2Repo::open(path)?;
    let remote = repo.find_remote("origin")?;
    remote
        .url()
        .map(str::to_string)
        .ok_or_else(|| LineageError::invalid_repo(format!("{}: origin has no URL", path.display())))
}

/// Classify a user-given reference.
///
/// Hex strings are taken as shas without any lookup. Names are matched
/// against the target's advertised heads and tags; a target that cannot be
/// queried yields [`RefKind::InvalidRepo`].
///
/// # Errors
/// `AmbiguousRef` when a name matches several refs.
pub fn resolve_ref(
    raw: &str,
    target: RefTarget<'_>,
    auth: &AuthConfig,
    retry: &RetryPolicy,
) -> Result<ResolvedRef> {
    if looks_like_sha(raw) {
        debug!(reference = raw, "taking hex reference as a sha");
        return classify_remote_refs(raw, &[]);
    }

    let url = match target {
        RefTarget::Url(url) => url.to_string(),
        RefTarget::Local(path) => match origin_url(path) {
            Ok(url) => url,
            Err(e) => {
                error!(path = %path.display(), error = %e, "not a usable repository");
                return Ok(ResolvedRef::new(raw, RefKind::InvalidRepo, None));
            }
        },
    };

    let advertised = match retry.run(|| list_remote_refs(&url, auth)) {
        Ok(advertised) => advertised,
        Err(e) => {
            error!(url = %url, error = %e, "invalid repository");
            return Ok(ResolvedRef::new(raw, RefKind::InvalidRepo, None));
        }
    };

    let resolved = classify_remote_refs(raw, &advertised)?;
    info!(reference = raw, kind = %resolved.kind, sha = ?resolved.sha, "resolved reference");
    Ok(resolved)
}
