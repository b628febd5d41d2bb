use crate::analyzer::baseline::BaselineScan;
use crate::analyzer::matcher::MatchStrategy;
use crate::analyzer::provenance::DEFAULT_TAG_PATTERN;
use crate::error::{LineageError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "patch-lineage.toml";

/// Represents the complete configuration for patch-lineage.
///
/// Every section is optional in the file; missing sections take their defaults.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub baseline: BaselineConfig,

    /// Upstream repositories searched for provenance, in lookup order
    #[serde(default = "default_upstreams")]
    pub upstream: Vec<UpstreamConfig>,

    #[serde(default)]
    pub range_diff: RangeDiffConfig,
}

/// Where staged repositories live.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct WorkspaceConfig {
    /// Falls back to `$WORKSPACE`, then the current directory
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Credentials for fetching over ssh.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,

    /// Private keys tried in order; `~/.ssh/id_ed25519`, `id_rsa` and
    /// `id_ecdsa` when empty
    #[serde(default)]
    pub ssh_keys: Vec<PathBuf>,

    #[serde(default = "default_true")]
    pub use_agent: bool,
}

fn default_username() -> String {
    "git".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            username: default_username(),
            ssh_keys: Vec::new(),
            use_agent: true,
        }
    }
}

impl AuthConfig {
    /// Keys to offer, configured ones first.
    pub fn key_paths(&self) -> Vec<PathBuf> {
        if !self.ssh_keys.is_empty() {
            return self.ssh_keys.clone();
        }
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        ["id_ed25519", "id_rsa", "id_ecdsa"]
            .iter()
            .map(|key| home.join(".ssh").join(key))
            .collect()
    }
}

/// Retry policy for clone, fetch and ref listing.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: usize,

    /// Delay before each retry, in seconds
    #[serde(default = "default_intervals")]
    pub intervals_secs: Vec<u64>,

    /// Error texts that mark a failure as transient
    #[serde(default = "default_transient_markers")]
    pub transient_markers: Vec<String>,
}

fn default_attempts() -> usize {
    3
}

fn default_intervals() -> Vec<u64> {
    vec![5, 8, 13, 21, 34, 55]
}

fn default_transient_markers() -> Vec<String> {
    vec!["HTTP code 503".to_string()]
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: default_attempts(),
            intervals_secs: default_intervals(),
            transient_markers: default_transient_markers(),
        }
    }
}

impl RetryConfig {
    pub fn intervals(&self) -> Vec<Duration> {
        self.intervals_secs.iter().map(|s| Duration::from_secs(*s)).collect()
    }
}

/// Fuzzy patch matching.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MatchingConfig {
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,

    #[serde(default)]
    pub strategy: MatchStrategy,

    /// Retry a subject search as a substring search when the exact one fails
    #[serde(default = "default_true")]
    pub subject_fuzzy_fallback: bool,
}

fn default_min_ratio() -> f64 {
    0.8
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            min_ratio: default_min_ratio(),
            strategy: MatchStrategy::default(),
            subject_fuzzy_fallback: true,
        }
    }
}

/// Baseline detection.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BaselineConfig {
    /// Only scan history this many months back
    #[serde(default)]
    pub since_months: Option<u32>,

    /// Compare against the version declared in dated release tag names
    #[serde(default = "default_true")]
    pub check_base: bool,

    #[serde(default)]
    pub scan: BaselineScan,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        BaselineConfig {
            since_months: None,
            check_base: true,
            scan: BaselineScan::default(),
        }
    }
}

/// One upstream repository.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Release tags a provenance tag is picked from
    #[serde(default = "default_tag_pattern")]
    pub tag_pattern: String,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_tag_pattern() -> String {
    DEFAULT_TAG_PATTERN.to_string()
}

fn default_upstreams() -> Vec<UpstreamConfig> {
    vec![
        UpstreamConfig {
            name: "mainline".to_string(),
            url: "https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git".to_string(),
            branch: default_branch(),
            tag_pattern: default_tag_pattern(),
        },
        UpstreamConfig {
            name: "stable".to_string(),
            url: "https://git.kernel.org/pub/scm/linux/kernel/git/stable/linux.git".to_string(),
            branch: default_branch(),
            tag_pattern: default_tag_pattern(),
        },
    ]
}

/// The external range-diff command.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RangeDiffConfig {
    #[serde(default = "default_git_program")]
    pub program: String,

    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_git_program() -> String {
    "git".to_string()
}

impl Default for RangeDiffConfig {
    fn default() -> Self {
        RangeDiffConfig {
            program: default_git_program(),
            extra_args: Vec::new(),
        }
    }
}

impl Config {
    /// Workspace root: configured, else `$WORKSPACE`, else the current directory.
    pub fn workspace_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.workspace.root {
            return Ok(root.clone());
        }
        if let Some(root) = env::var_os("WORKSPACE").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(root));
        }
        Ok(env::current_dir()?)
    }

    /// Local path a remote is staged at: `<workspace>/job/<url path>`.
    pub fn repo_path(&self, url: &str) -> Result<PathBuf> {
        let project = url_project(url);
        if project.is_empty() {
            return Err(LineageError::config(format!(
                "Cannot derive a repository path from '{}'",
                url
            )));
        }
        Ok(self.workspace_root()?.join("job").join(project))
    }
}

/// Path part of a remote URL without leading/trailing slashes and `.git`.
///
/// Handles `scheme://host/path`, scp-like `user@host:path` and plain paths.
pub fn url_project(url: &str) -> String {
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/').map_or("", |(_, path)| path)
    } else if let Some((host, path)) = url.split_once(':') {
        if host.contains('/') {
            url
        } else {
            path
        }
    } else {
        url
    };

    let path = path.trim_matches('/');
    path.strip_suffix(".git").unwrap_or(path).trim_end_matches('/').to_string()
}

/// Loads configuration from file or returns defaults.
///
/// Attempts to load configuration in the following order:
/// 1. Custom path provided as parameter
/// 2. `patch-lineage.toml` in current directory
/// 3. `patch-lineage.toml` in the user config directory
/// 4. Default configuration if no file found
///
/// # Arguments
/// * `config_path` - Optional path to custom configuration file
///
/// # Returns
/// * `Ok(Config)` - Loaded or default configuration
/// * `Err` - If file exists but cannot be read or parsed
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config_str = if let Some(path) = config_path {
        fs::read_to_string(path).map_err(|e| {
            LineageError::config(format!("Cannot read config file '{}': {}", path, e))
        })?
    } else if Path::new(CONFIG_FILE).exists() {
        fs::read_to_string(CONFIG_FILE)?
    } else if let Some(config_dir) = dirs::config_dir() {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            fs::read_to_string(config_path)?
        } else {
            return Ok(Config::default());
        }
    } else {
        return Ok(Config::default());
    };

    let config: Config = toml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace: WorkspaceConfig::default(),
            auth: AuthConfig::default(),
            retry: RetryConfig::default(),
            matching: MatchingConfig::default(),
            baseline: BaselineConfig::default(),
            upstream: default_upstreams(),
            range_diff: RangeDiffConfig::default(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.matching.min_ratio) {
            return Err(LineageError::config(format!(
                "matching.min_ratio must be within 0..=1, got {}",
                self.matching.min_ratio
            )));
        }
        if self.retry.attempts == 0 {
            return Err(LineageError::config("retry.attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.intervals_secs, vec![5, 8, 13, 21, 34, 55]);
        assert_eq!(config.matching.min_ratio, 0.8);
        assert_eq!(config.matching.strategy, MatchStrategy::Best);
        assert_eq!(config.upstream.len(), 2);
        assert_eq!(config.upstream[0].name, "mainline");
        assert!(config.baseline.check_base);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [retry]
            attempts = 5

            [matching]
            strategy = "fast"

            [[upstream]]
            name = "mirror"
            url = "https://example.com/linux.git"
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.transient_markers, vec!["HTTP code 503".to_string()]);
        assert_eq!(config.matching.strategy, MatchStrategy::Fast);
        assert_eq!(config.upstream.len(), 1);
        assert_eq!(config.upstream[0].branch, "master");
        assert_eq!(config.upstream[0].tag_pattern, "v*");
    }

    #[test]
    fn test_empty_file_keeps_default_upstreams() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.upstream.len(), 2);
    }

    #[test]
    fn test_url_project() {
        assert_eq!(
            url_project("https://git.kernel.org/pub/scm/linux/kernel/git/stable/linux.git"),
            "pub/scm/linux/kernel/git/stable/linux"
        );
        assert_eq!(url_project("git@github.com:intel/linux-intel-lts.git"), "intel/linux-intel-lts");
        assert_eq!(url_project("ssh://git@host:29418/kernel/lts/"), "kernel/lts");
        assert_eq!(url_project("/srv/git/linux.git"), "srv/git/linux");
        assert_eq!(url_project("https://host"), "");
    }

    #[test]
    fn test_repo_path_uses_configured_root() {
        let mut config = Config::default();
        config.workspace.root = Some(PathBuf::from("/ws"));
        assert_eq!(
            config.repo_path("https://host/a/b.git").unwrap(),
            PathBuf::from("/ws/job/a/b")
        );
        assert!(config.repo_path("https://host").is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.matching.min_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
