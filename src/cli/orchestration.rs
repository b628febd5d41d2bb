//! Run pipeline.
//!
//! A run resolves both references, stages the repositories they live in,
//! finds each side's baseline, classifies side B's patches against side A's
//! with the selected mode, and finally looks the changed patches up
//! upstream. Domain errors (missing refs, ambiguous refs, inconsistent
//! baselines) abort the run; trouble with upstreams or individual provenance
//! lookups only adds warnings to the report.

use crate::analyzer::baseline::BaselineResolver;
use crate::analyzer::matcher::MatchOptions;
use crate::analyzer::provenance::{FingerprintIndex, Provenance, ProvenanceResolver, UpstreamSource};
use crate::analyzer::quilt::{build_quilt, fingerprints_in_range, QuiltComparator, QuiltFilter};
use crate::analyzer::range_diff::RangeDiffParser;
use crate::boundary::RunWarning;
use crate::config::{Config, UpstreamConfig};
use crate::domain::baseline::{check_consistency, is_realtime_ref};
use crate::domain::classification::{ClassifiedPatch, ClassifiedRange};
use crate::domain::commit::is_contributor;
use crate::domain::reference::{strip_origin, RefKind, ResolvedRef};
use crate::domain::tag::{sort_tags_grouped, TagSortOptions};
use crate::domain::version::VersionTag;
use crate::error::{LineageError, Result};
use crate::git::remote::{resolve_ref, RefTarget};
use crate::git::{Git2Repository, RangeDiffTool, RemoteSpec, RepoHandle, RepoStager, Repository};
use crate::retry::RetryPolicy;
use clap::ValueEnum;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// How the two sides are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub enum DiffMode {
    /// `git range-diff` on one working copy holding both sides
    #[value(name = "rangediff")]
    #[serde(rename = "rangediff")]
    RangeDiff,
    /// Commit-by-commit comparison, each side in its own working copy
    #[value(name = "quiltdiff")]
    #[serde(rename = "quiltdiff")]
    QuiltDiff,
    /// Every commit between A (default: B's baseline) and B, listed as new
    #[value(name = "quilt")]
    #[serde(rename = "quilt")]
    Quilt,
}

impl fmt::Display for DiffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffMode::RangeDiff => "rangediff",
            DiffMode::QuiltDiff => "quiltdiff",
            DiffMode::Quilt => "quilt",
        };
        write!(f, "{}", name)
    }
}

/// Parameters of one run, independent of how they were parsed
#[derive(Debug, Clone, PartialEq)]
pub struct RunArgs {
    pub repo_url_from: Option<String>,
    pub repo_url_to: String,
    pub ref_from: Option<String>,
    pub ref_to: String,
    pub base_from: Option<String>,
    pub base_to: Option<String>,
    pub mode: DiffMode,
    /// Keep only patches authored from this email domain
    pub contributor_domain: Option<String>,
    pub skip_upstream_scan: bool,
    /// Search upstream by author and subject too, not only by touched files
    pub exhaustive_upstream: bool,
    pub fingerprint_index: Option<PathBuf>,
    /// Leave out patches already in the stable series since this base
    pub exclude_stable: Option<String>,
    pub check_base: bool,
    /// Where to write the raw range-diff text
    pub diff_output: Option<PathBuf>,
}

impl RunArgs {
    pub fn new(repo_url_to: impl Into<String>, ref_to: impl Into<String>, mode: DiffMode) -> Self {
        RunArgs {
            repo_url_from: None,
            repo_url_to: repo_url_to.into(),
            ref_from: None,
            ref_to: ref_to.into(),
            base_from: None,
            base_to: None,
            mode,
            contributor_domain: None,
            skip_upstream_scan: false,
            exhaustive_upstream: false,
            fingerprint_index: None,
            exclude_stable: None,
            check_base: true,
            diff_output: None,
        }
    }
}

/// One side of the comparison after resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideReport {
    pub url: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub ref_kind: RefKind,
    pub sha: String,
    pub base: String,
    pub base_sha: String,
}

impl SideReport {
    /// The `base..tip` range of this side
    pub fn range(&self) -> String {
        format!("{}..{}", self.base_sha, self.sha)
    }
}

/// Everything a run produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub mode: DiffMode,
    pub side_a: SideReport,
    pub side_b: SideReport,
    pub same: Vec<ClassifiedPatch>,
    pub message_only: Vec<ClassifiedPatch>,
    pub updated: Vec<ClassifiedPatch>,
    pub new: Vec<ClassifiedPatch>,
    pub removed: Vec<ClassifiedPatch>,
    /// Keyed by the sha the lookup was made for
    pub provenance: BTreeMap<String, Provenance>,
    pub twisted: Vec<ClassifiedPatch>,
    pub warnings: Vec<RunWarning>,
}

impl RunReport {
    fn new(mode: DiffMode, side_a: SideReport, side_b: SideReport, patches: ClassifiedRange) -> Self {
        RunReport {
            mode,
            side_a,
            side_b,
            same: patches.same,
            message_only: patches.message_only,
            updated: patches.updated,
            new: patches.new,
            removed: patches.removed,
            provenance: BTreeMap::new(),
            twisted: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.same.len() + self.message_only.len() + self.updated.len() + self.new.len() + self.removed.len()
    }
}

/// `https://host/linux.git/` and `https://host/linux` name the same remote.
pub fn normalize_url(url: &str) -> &str {
    let url = url.strip_suffix('/').unwrap_or(url);
    url.strip_suffix(".git").unwrap_or(url)
}

/// A side before its baseline is known
struct Side {
    url: String,
    resolved: ResolvedRef,
}

struct Pipeline<'c> {
    config: &'c Config,
    args: &'c RunArgs,
    retry: RetryPolicy,
    stager: RepoStager,
    warnings: Vec<RunWarning>,
}

/// Execute one run.
///
/// # Errors
/// Fails on unresolvable, missing or ambiguous references, on a missing or
/// inconsistent baseline, and when staging or the range-diff tool fails.
pub fn run(args: &RunArgs, config: &Config) -> Result<RunReport> {
    let retry = RetryPolicy::from_config(&config.retry);
    let mut pipeline = Pipeline {
        config,
        args,
        stager: RepoStager::new(config.auth.clone(), retry.clone()),
        retry,
        warnings: Vec::new(),
    };
    pipeline.run()
}

impl<'c> Pipeline<'c> {
    fn run(&mut self) -> Result<RunReport> {
        let url_b = normalize_url(&self.args.repo_url_to).to_string();
        let url_a = self
            .args
            .repo_url_from
            .as_deref()
            .map(normalize_url)
            .unwrap_or(&url_b)
            .to_string();
        info!(
            mode = %self.args.mode,
            url_a = %url_a,
            url_b = %url_b,
            ref_from = ?self.args.ref_from,
            ref_to = %self.args.ref_to,
            "starting run"
        );

        let mut report = match self.args.mode {
            DiffMode::RangeDiff => self.range_diff(&url_a, &url_b)?,
            DiffMode::QuiltDiff => self.quilt_diff(&url_a, &url_b)?,
            DiffMode::Quilt => self.quilt(&url_b)?,
        };
        report.warnings.append(&mut self.warnings);
        Ok(report)
    }

    fn ref_from(&self) -> Result<&'c str> {
        let args: &'c RunArgs = self.args;
        args.ref_from
            .as_deref()
            .ok_or_else(|| LineageError::config(format!("--ref-from is required in {} mode", self.args.mode)))
    }

    /// Resolve a reference against its remote; anything unusable is fatal.
    fn resolve_side(&self, url: &str, raw: &str) -> Result<Side> {
        let raw = strip_origin(raw);
        let resolved = resolve_ref(raw, RefTarget::Url(url), &self.config.auth, &self.retry)?;
        if resolved.is_usable() {
            return Ok(Side {
                url: url.to_string(),
                resolved,
            });
        }
        match resolved.kind {
            RefKind::Missing => Err(LineageError::ref_not_found(raw, url)),
            _ => Err(LineageError::invalid_repo(url)),
        }
    }

    fn stage(&mut self, url: &str, remotes: Vec<RemoteSpec>, checkout: Option<&str>) -> Result<Git2Repository> {
        let mut handle = RepoHandle::new(self.config.repo_path(url)?, remotes);
        let (repo, warnings) = self.stager.stage(&mut handle, checkout)?;
        self.warnings.extend(warnings);
        Ok(repo)
    }

    /// Full sha and baseline of a staged side.
    ///
    /// `base_kinds` limits what an explicit base may resolve to.
    fn finish_side(
        &self,
        repo: &dyn Repository,
        side: Side,
        explicit_base: Option<&str>,
        base_kinds: &[RefKind],
    ) -> Result<SideReport> {
        // Hex refs were never checked against the remote
        let sha = match repo.resolve(side.resolved.revision()) {
            Err(_) if side.resolved.kind == RefKind::Sha => {
                return Err(LineageError::ref_not_found(&side.resolved.raw, &side.url));
            }
            resolved => resolved?,
        };

        let (base, base_sha) = match explicit_base.map(strip_origin) {
            Some(raw) => {
                let base = self.resolve_side(&side.url, raw)?;
                if !base_kinds.contains(&base.resolved.kind) {
                    return Err(LineageError::config(format!(
                        "Invalid base: {}, {} ({})",
                        side.url, raw, base.resolved.kind
                    )));
                }
                (raw.to_string(), repo.resolve(base.resolved.revision())?)
            }
            None => {
                let realtime = is_realtime_ref(&side.resolved.raw);
                let baseline = BaselineResolver::from_config(&self.config.baseline)
                    .resolve(repo, &sha, realtime)?
                    .ok_or_else(|| LineageError::MissingBaseline(side.resolved.raw.clone()))?;
                (baseline.version, baseline.sha)
            }
        };

        if self.args.check_base && self.config.baseline.check_base && side.resolved.kind == RefKind::Tag {
            check_consistency(&side.resolved.raw, &base)?;
        }

        info!(reference = %side.resolved.raw, %sha, %base, %base_sha, "side resolved");
        Ok(SideReport {
            url: side.url,
            reference: side.resolved.raw,
            ref_kind: side.resolved.kind,
            sha,
            base,
            base_sha,
        })
    }

    fn range_diff(&mut self, url_a: &str, url_b: &str) -> Result<RunReport> {
        let side_a = self.resolve_side(url_a, self.ref_from()?)?;
        let side_b = self.resolve_side(url_b, &self.args.ref_to)?;

        let remotes = vec![
            RemoteSpec::new("rangediff_b", url_b),
            RemoteSpec::new("rangediff_a", url_a),
        ];
        let repo = self.stage(url_b, remotes, None)?;

        let any_base = [RefKind::Sha, RefKind::Tag, RefKind::Branch];
        let side_a = self.finish_side(&repo, side_a, self.args.base_from.as_deref(), &any_base)?;
        let side_b = self.finish_side(&repo, side_b, self.args.base_to.as_deref(), &any_base)?;

        let text = RangeDiffTool::from_config(&self.config.range_diff).run(
            repo.workdir(),
            &side_a.range(),
            &side_b.range(),
        )?;
        if let Some(path) = &self.args.diff_output {
            info!(path = %path.display(), "writing raw range-diff");
            fs::write(path, &text)?;
        }

        let outcome = RangeDiffParser::new(&repo).parse(&text);
        let mut patches = outcome.patches;
        if let Some(domain) = &self.args.contributor_domain {
            patches = retain_contributors(patches, &repo, &repo, domain)?;
        }

        let mut report = RunReport::new(DiffMode::RangeDiff, side_a, side_b, patches);
        if !outcome.twisted.is_empty() {
            report.warnings.push(RunWarning::TwistedPairs {
                count: outcome.twisted.len(),
            });
        }
        report.twisted = outcome.twisted;
        self.check_empty(&report);
        self.add_provenance(&mut report, &repo, &repo)?;
        Ok(report)
    }

    fn quilt_diff(&mut self, url_a: &str, url_b: &str) -> Result<RunReport> {
        let side_a = self.resolve_side(url_a, self.ref_from()?)?;
        let side_b = self.resolve_side(url_b, &self.args.ref_to)?;

        let checkout_b = side_b.resolved.revision().to_string();
        let repo_b = self.stage(url_b, vec![RemoteSpec::new("origin", url_b)], Some(&checkout_b))?;
        let separate_a = if url_a == url_b {
            None
        } else {
            let checkout_a = side_a.resolved.revision().to_string();
            Some(self.stage(url_a, vec![RemoteSpec::new("origin", url_a)], Some(&checkout_a))?)
        };
        let repo_a: &Git2Repository = separate_a.as_ref().unwrap_or(&repo_b);

        let tag_or_sha = [RefKind::Sha, RefKind::Tag];
        let side_a = self.finish_side(repo_a, side_a, self.args.base_from.as_deref(), &tag_or_sha)?;
        let side_b = self.finish_side(&repo_b, side_b, self.args.base_to.as_deref(), &tag_or_sha)?;

        let args: &'c RunArgs = self.args;
        let excluded = match &args.exclude_stable {
            Some(base) => Some(self.stable_fingerprints(base)?),
            None => None,
        };
        let filter = QuiltFilter {
            exclude: excluded.as_ref(),
            contributor_domain: args.contributor_domain.as_deref(),
        };

        let quilt_a = build_quilt(repo_a, Some(&side_a.base_sha), &side_a.sha, filter)?;
        let quilt_b = build_quilt(&repo_b, Some(&side_b.base_sha), &side_b.sha, filter)?;
        let patches = QuiltComparator::new(self.match_options()).compare(repo_a, &quilt_a, &repo_b, &quilt_b)?;

        let mut report = RunReport::new(DiffMode::QuiltDiff, side_a, side_b, patches);
        self.check_empty(&report);
        self.add_provenance(&mut report, repo_a, &repo_b)?;
        Ok(report)
    }

    fn quilt(&mut self, url_b: &str) -> Result<RunReport> {
        let side_b = self.resolve_side(url_b, &self.args.ref_to)?;
        let side_a = match self.args.ref_from.as_deref() {
            Some(raw) => Some(self.resolve_side(url_b, raw)?),
            None => None,
        };

        let checkout_b = side_b.resolved.revision().to_string();
        let repo = self.stage(url_b, vec![RemoteSpec::new("origin", url_b)], Some(&checkout_b))?;
        let any_base = [RefKind::Sha, RefKind::Tag, RefKind::Branch];
        let side_b = self.finish_side(&repo, side_b, self.args.base_to.as_deref(), &any_base)?;
        let side_a = match side_a {
            Some(side) => self.finish_side(&repo, side, self.args.base_from.as_deref(), &any_base)?,
            None => SideReport {
                url: side_b.url.clone(),
                reference: side_b.base.clone(),
                ref_kind: RefKind::Tag,
                sha: side_b.base_sha.clone(),
                base: side_b.base.clone(),
                base_sha: side_b.base_sha.clone(),
            },
        };

        let filter = QuiltFilter {
            exclude: None,
            contributor_domain: self.args.contributor_domain.as_deref(),
        };
        let mut patches = ClassifiedRange::default();
        for (i, commit) in build_quilt(&repo, Some(&side_a.sha), &side_b.sha, filter)?
            .into_iter()
            .enumerate()
        {
            patches.push(ClassifiedPatch::new_in_b(i as u32 + 1, commit.sha, commit.subject));
        }
        info!(range = %format!("{}..{}", side_a.sha, side_b.sha), new = patches.new.len(), "quilt listed");

        let mut report = RunReport::new(DiffMode::Quilt, side_a, side_b, patches);
        self.check_empty(&report);
        self.add_provenance(&mut report, &repo, &repo)?;
        Ok(report)
    }

    fn match_options(&self) -> MatchOptions {
        MatchOptions::from_config(&self.config.matching)
    }

    fn check_empty(&mut self, report: &RunReport) {
        if report.total() > 0 {
            return;
        }
        for (name, side) in [("A", &report.side_a), ("B", &report.side_b)] {
            if side.base_sha == side.sha {
                self.warnings.push(RunWarning::EmptyRange {
                    side: name.to_string(),
                    range: side.range(),
                });
            }
        }
    }

    /// The stable upstream: the one named `stable`, else the last configured.
    fn stable_upstream(&self) -> Result<&'c UpstreamConfig> {
        let config: &'c Config = self.config;
        let upstreams = &config.upstream;
        upstreams
            .iter()
            .find(|u| u.name == "stable")
            .or_else(|| upstreams.last())
            .ok_or_else(|| LineageError::config("No upstream configured for stable exclusion"))
    }

    /// Fingerprints of the stable series from `base` to its latest point release.
    fn stable_fingerprints(&mut self, base: &str) -> Result<HashSet<String>> {
        let version = VersionTag::parse_strict(base)?;
        let upstream = self.stable_upstream()?;
        let url = normalize_url(&upstream.url).to_string();
        let stable = self.stage(&url, vec![RemoteSpec::new("origin", &url)], None)?;

        let series = version.series_key();
        let tags = stable.tag_names(Some(&format!("{}*", series)))?;
        let latest = latest_in_series(&tags, &series);
        let Some(latest) = latest.as_deref() else {
            warn!(base, "no stable releases found");
            return Ok(HashSet::new());
        };

        let fingerprints = fingerprints_in_range(&stable, Some(base), latest)?;
        info!(base, latest = %latest, excluded = fingerprints.len(), "stable fingerprints collected");
        Ok(fingerprints)
    }

    /// Look every changed patch up in the configured upstreams.
    fn add_provenance(
        &mut self,
        report: &mut RunReport,
        repo_a: &dyn Repository,
        repo_b: &dyn Repository,
    ) -> Result<()> {
        if self.args.skip_upstream_scan {
            info!("upstream scan skipped");
            return Ok(());
        }

        let index = match &self.args.fingerprint_index {
            Some(path) => Some(FingerprintIndex::load(path)?),
            None => None,
        };

        let config: &'c Config = self.config;
        let mut staged: Vec<(&'c UpstreamConfig, Git2Repository)> = Vec::new();
        for upstream in &config.upstream {
            let url = normalize_url(&upstream.url).to_string();
            match self.stage(&url, vec![RemoteSpec::new("origin", &url)], None) {
                Ok(repo) => staged.push((upstream, repo)),
                Err(e) => {
                    warn!(upstream = %upstream.name, error = %e, "upstream unavailable");
                    self.warnings.push(RunWarning::UpstreamUnavailable {
                        name: upstream.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if staged.is_empty() {
            return Ok(());
        }
        let sources: Vec<UpstreamSource<'_>> = staged
            .iter()
            .map(|(upstream, repo)| UpstreamSource {
                name: upstream.name.clone(),
                repo,
                rev: format!("origin/{}", upstream.branch),
                index: index.as_ref(),
                tag_pattern: &upstream.tag_pattern,
            })
            .collect();

        let resolver = ProvenanceResolver::new(self.match_options(), self.args.exhaustive_upstream);
        let pending: Vec<(String, bool)> = report
            .message_only
            .iter()
            .chain(&report.updated)
            .chain(&report.new)
            .chain(&report.removed)
            .filter_map(|p| match (&p.commit_b, &p.commit_a) {
                (Some(b), _) => Some((b.clone(), true)),
                (None, Some(a)) => Some((a.clone(), false)),
                (None, None) => None,
            })
            .collect();

        for (sha, on_b) in pending {
            let repo = if on_b { repo_b } else { repo_a };
            let found = repo
                .commit(&sha)
                .and_then(|commit| resolver.resolve(repo, &commit, &sources));
            match found {
                Ok(Some(provenance)) => {
                    report.provenance.insert(sha, provenance);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(commit = %sha, error = %e, "provenance lookup failed");
                    self.warnings.push(RunWarning::ProvenanceFailed {
                        commit: sha,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(found = report.provenance.len(), "provenance scan finished");
        Ok(())
    }
}

/// Newest release of `series` among `tags`; `v6.1*` also lists `v6.10`,
/// which belongs to another series.
fn latest_in_series(tags: &[String], series: &str) -> Option<String> {
    sort_tags_grouped(tags, &TagSortOptions::default())
        .into_iter()
        .find(|group| group.series == series)
        .and_then(|group| group.tags.last().cloned())
}

/// Drop patches whose commit was not authored from `domain`.
///
/// The B commit decides when there is one.
fn retain_contributors(
    patches: ClassifiedRange,
    repo_a: &dyn Repository,
    repo_b: &dyn Repository,
    domain: &str,
) -> Result<ClassifiedRange> {
    let mut kept = ClassifiedRange::default();
    for patch in patches.all() {
        let email = match (&patch.commit_b, &patch.commit_a) {
            (Some(b), _) => repo_b.commit(b)?.author_email,
            (None, Some(a)) => repo_a.commit(a)?.author_email,
            (None, None) => continue,
        };
        if is_contributor(&email, domain) {
            kept.push(patch.clone());
        }
    }
    Ok(kept)
}
