use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Everything the engines need to know about one commit.
///
/// Records are built by a [`crate::git::Repository`] backend and cached per
/// run, keyed by sha.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author_email: String,
    pub committer_email: String,
    pub subject: String,
    pub message: String,
    /// Touched paths, sorted and deduplicated
    pub files: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
    /// Whitespace-insensitive hash of the change itself; `None` for empty diffs
    pub fingerprint: Option<String>,
    /// Seconds since the epoch
    pub authored_at: i64,
    pub committed_at: i64,
    /// Upstream commit named in the message, see [`extract_upstream_ref`]
    pub upstream_ref: Option<String>,
}

impl CommitRecord {
    /// Abbreviated sha for log lines and terminal output.
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(12)]
    }

    /// Whether the author's address belongs to `domain`.
    pub fn is_contributor(&self, domain: &str) -> bool {
        is_contributor(&self.author_email, domain)
    }

    /// The upstream sha named in the message, without its `mainline:` or
    /// `lts:` label.
    pub fn upstream_sha(&self) -> Option<&str> {
        let raw = self.upstream_ref.as_deref()?;
        Some(raw.split_once(':').map_or(raw, |(_, sha)| sha))
    }
}

fn backport_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^\s*\[?\s*(?:upstream commit|commit) ([\da-f]{8,})(?: upstream\.?|)\s*\]?\s*$",
        )
        .expect("static backport pattern")
    })
}

fn origin_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(mainline|lts):\s*([\da-f]{8,})\s*$").expect("static origin pattern")
    })
}

/// Pull the upstream commit a backport names out of its message.
///
/// Recognizes stable-style `commit <sha> upstream.` and
/// `[ Upstream commit <sha> ]` lines, then `mainline: <sha>` / `lts: <sha>`
/// lines, which come back as `mainline:<sha>` / `lts:<sha>`.
pub fn extract_upstream_ref(message: &str) -> Option<String> {
    if let Some(caps) = backport_regex().captures(message) {
        return Some(caps[1].to_string());
    }
    origin_line_regex()
        .captures(message)
        .map(|caps| format!("{}:{}", caps[1].to_lowercase(), &caps[2]))
}

/// `dev@example.com` and `dev@corp.example.com` belong to `example.com`;
/// `dev@notexample.com` does not.
pub fn is_contributor(email: &str, domain: &str) -> bool {
    let email = email.trim().to_lowercase();
    let domain = domain.trim().trim_start_matches('@').to_lowercase();
    let Some((_, host)) = email.rsplit_once('@') else {
        return false;
    };
    host == domain || host.ends_with(&format!(".{}", domain))
}
