//! Formatting for terminal output.
//!
//! Status lines go to stderr; stdout is reserved for the JSON report.

use crate::boundary::RunWarning;
use crate::cli::orchestration::{RunReport, SideReport};
use crate::domain::classification::ClassifiedPatch;
use console::style;

/// Format and print an error message in red.
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("ERROR:").red().bold(), message);
}

/// Format and print a success message with green checkmark.
pub fn display_success(message: &str) {
    eprintln!("{} {}", style("✓").green(), message);
}

/// Format and print a status message with yellow arrow.
pub fn display_status(message: &str) {
    eprintln!("{} {}", style("→").yellow(), message);
}

pub fn display_warning(warning: &RunWarning) {
    eprintln!("{} {}", style("⚠ WARNING:").yellow(), warning);
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}

/// `v5.15.3 (0123456789ab) -> lts-v5.15.3-230101T000000Z (fedcba987654)`
pub fn format_side(side: &SideReport) -> String {
    format!(
        "{} ({}) -> {} ({}, {})",
        side.base,
        short(&side.base_sha),
        side.reference,
        side.ref_kind,
        short(&side.sha)
    )
}

/// One patch as `seq  a-sha b-sha  subject`, `-` for a missing side.
pub fn format_patch(patch: &ClassifiedPatch) -> String {
    let side = |sha: &Option<String>| sha.as_deref().map_or("-".repeat(12), |s| short(s).to_string());
    format!(
        "{:>4}  {:<12} {:<12}  {}",
        patch.seq,
        side(&patch.commit_a),
        side(&patch.commit_b),
        patch.subject
    )
}

/// Print the per-category summary of a run.
///
/// Lists at most `limit` patches per changed category.
pub fn display_summary(report: &RunReport, limit: usize) {
    eprintln!("\n{}", style(format!("Comparison ({})", report.mode)).bold());
    eprintln!("  A: {}", format_side(&report.side_a));
    eprintln!("  B: {}", format_side(&report.side_b));

    eprintln!("\n{}", style("Patches:").underlined());
    eprintln!("  same:         {}", report.same.len());
    eprintln!("  message only: {}", report.message_only.len());
    eprintln!("  updated:      {}", style(report.updated.len()).cyan());
    eprintln!("  new:          {}", style(report.new.len()).green());
    eprintln!("  removed:      {}", style(report.removed.len()).red());

    for (title, patches) in [
        ("Updated", &report.updated),
        ("New", &report.new),
        ("Removed", &report.removed),
    ] {
        if patches.is_empty() {
            continue;
        }
        eprintln!("\n{}", style(title).bold());
        for patch in patches.iter().take(limit) {
            let mut line = format_patch(patch);
            if let Some(found) = patch.newest_commit().and_then(|sha| report.provenance.get(sha)) {
                let at = found.tag.as_deref().unwrap_or(&found.rev);
                line.push_str(&format!("  [{} {}]", found.upstream, at));
            }
            eprintln!("  {}", line);
        }
        if patches.len() > limit {
            eprintln!("  ... and {} more", patches.len() - limit);
        }
    }

    for warning in &report.warnings {
        display_warning(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::Classification;

    #[test]
    fn test_format_patch_pads_missing_side() {
        let patch = ClassifiedPatch::new_in_b(7, "0123456789abcdef", "net: add");
        assert_eq!(format_patch(&patch), "   7  ------------ 0123456789ab  net: add");
    }

    #[test]
    fn test_format_patch_both_sides() {
        let patch = ClassifiedPatch::paired(12, "aaaa", "bbbb", "mm: fix", Classification::Updated);
        assert_eq!(format_patch(&patch), "  12  aaaa         bbbb          mm: fix");
    }

    #[test]
    fn test_display_error() {
        // Visual verification test - output is printed to stderr
        display_error("test error");
    }
}
