//! Hunk-level comparison of unified diffs.
//!
//! Two patches are "similar" when most of their hunks carry exactly the same
//! changed lines, regardless of line numbers and surrounding context.

use std::collections::BTreeMap;
use std::path::Path;

/// Changed lines of one `@@` hunk, `+`/`-` prefix included
pub type Hunk = Vec<String>;

/// Hunks per file path (the `a/` side of the `diff --git` header)
pub type FileHunks = BTreeMap<String, Vec<Hunk>>;

/// Matched and total hunk counts for one file or one patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HunkScore {
    pub matched: usize,
    pub total: usize,
}

impl HunkScore {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.matched == self.total
    }
}

/// Similarity of two whole patches
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatchRatio {
    pub ratio: f64,
    pub matched: usize,
    pub total: usize,
}

impl MatchRatio {
    pub fn is_perfect(&self) -> bool {
        self.total > 0 && self.matched == self.total
    }
}

enum Section {
    /// Before the first file header, or after a binary file
    Outside,
    /// Inside a file header, waiting for its first hunk
    Header,
    InHunk,
}

fn file_header_path(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("diff --git a/")?;
    let end = rest.find(" b/")?;
    let path = &rest[..end];
    if path.is_empty() || path.contains(char::is_whitespace) {
        return None;
    }
    Some(path)
}

fn flush(files: &mut FileHunks, file: &Option<String>, hunk: &mut Hunk) {
    if let Some(path) = file {
        if !hunk.is_empty() {
            files.entry(path.clone()).or_default().push(std::mem::take(hunk));
        }
    }
    hunk.clear();
}

/// Split a unified diff into hunks per file.
///
/// Only `+`/`-` lines are kept unless `with_context` is set. A binary file
/// maps to an empty hunk list.
pub fn extract_hunks(diff: &str, with_context: bool) -> FileHunks {
    let mut files = FileHunks::new();
    let mut current_file: Option<String> = None;
    let mut current_hunk: Hunk = Vec::new();
    let mut section = Section::Outside;

    for line in diff.lines() {
        if let Some(path) = file_header_path(line) {
            flush(&mut files, &current_file, &mut current_hunk);
            files.entry(path.to_string()).or_default();
            current_file = Some(path.to_string());
            section = Section::Header;
            continue;
        }

        match section {
            Section::Outside => {}
            Section::Header => {
                if line.starts_with("@@ ") {
                    section = Section::InHunk;
                } else if line.starts_with("Binary files a/") {
                    current_file = None;
                    section = Section::Outside;
                }
            }
            Section::InHunk => {
                if line.starts_with("@@ ") {
                    flush(&mut files, &current_file, &mut current_hunk);
                } else if with_context || line.starts_with('+') || line.starts_with('-') {
                    current_hunk.push(line.to_string());
                }
            }
        }
    }
    flush(&mut files, &current_file, &mut current_hunk);

    files
}

/// Count hunks of `a` that have an identical, not yet used, hunk in `b`.
///
/// Two empty lists are the same binary file and score 1/1.
pub fn similarity(a: &[Hunk], b: &[Hunk]) -> HunkScore {
    if a.is_empty() && b.is_empty() {
        return HunkScore {
            matched: 1,
            total: 1,
        };
    }

    let mut remaining: Vec<&Hunk> = b.iter().collect();
    let mut matched = 0;
    for hunk in a {
        if let Some(pos) = remaining.iter().position(|candidate| *candidate == hunk) {
            remaining.remove(pos);
            matched += 1;
        }
    }

    HunkScore {
        matched,
        total: a.len().max(b.len()),
    }
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Compare two diffs file by file.
///
/// Files present on one side only count their hunks as unmatched. A file
/// missing under the same path on the other side may still match a file
/// with the same basename, but only when every hunk matches.
pub fn similar_patches(diff_a: &str, diff_b: &str) -> MatchRatio {
    let a_files = extract_hunks(diff_a, false);
    let mut b_files = extract_hunks(diff_b, false);

    let mut matched = 0;
    let mut total = 0;

    for (path, a_hunks) in &a_files {
        let mut score = HunkScore {
            matched: 0,
            total: a_hunks.len(),
        };

        if let Some(b_hunks) = b_files.remove(path) {
            score = similarity(a_hunks, &b_hunks);
        } else {
            let name = basename(path);
            let renamed = b_files
                .iter()
                .filter(|(b_path, _)| basename(b_path) == name && !a_files.contains_key(*b_path))
                .map(|(b_path, b_hunks)| (b_path.clone(), similarity(a_hunks, b_hunks)))
                .find(|(_, candidate)| candidate.is_complete());
            if let Some((b_path, candidate)) = renamed {
                b_files.remove(&b_path);
                score = candidate;
            }
        }

        matched += score.matched;
        total += score.total;
    }

    total += b_files.values().map(Vec::len).sum::<usize>();

    let score = HunkScore { matched, total };
    MatchRatio {
        ratio: score.ratio(),
        matched,
        total,
    }
}
