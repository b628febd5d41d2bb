use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use patch_lineage::cli::{self, DiffMode, RunArgs};
use patch_lineage::{config, logging, ui};

#[derive(clap::Parser)]
#[command(
    name = "patch-lineage",
    about = "Classify the patches between two kernel trees and trace them upstream"
)]
struct Args {
    #[arg(long, help = "Repository URL of the newer tree")]
    repo_url_to: String,

    #[arg(long, help = "Repository URL of the older tree (default: --repo-url-to)")]
    repo_url_from: Option<String>,

    #[arg(long, help = "Tag, branch or sha of the newer tree")]
    ref_to: String,

    #[arg(long, help = "Tag, branch or sha of the older tree")]
    ref_from: Option<String>,

    #[arg(long, help = "Base of the older tree instead of the detected baseline")]
    base_from: Option<String>,

    #[arg(long, help = "Base of the newer tree instead of the detected baseline")]
    base_to: Option<String>,

    #[arg(long = "diff-type", value_enum, default_value = "rangediff")]
    mode: DiffMode,

    #[arg(long, help = "Only keep patches authored from this email domain")]
    contributor_domain: Option<String>,

    #[arg(long, help = "Skip the upstream provenance scan")]
    no_upstream_scan: bool,

    #[arg(long, help = "Also search upstream by author and subject")]
    exhaustive_upstream: bool,

    #[arg(long, help = "JSON map of known upstream fingerprints")]
    fingerprint_index: Option<PathBuf>,

    #[arg(long, value_name = "BASE", help = "Leave out patches already in the stable series since BASE")]
    exclude_stable: Option<String>,

    #[arg(long, help = "Do not compare the baseline with the one declared in release tag names")]
    no_check_base: bool,

    #[arg(long, help = "Write the raw range-diff text to this file")]
    diff_output: Option<PathBuf>,

    #[arg(short, long, help = "Write the JSON report to this file instead of stdout")]
    output: Option<PathBuf>,

    #[arg(long, help = "Replace an existing report file")]
    overwrite: bool,

    #[arg(short, long, help = "Custom configuration file path")]
    config: Option<String>,

    #[arg(long, help = "Log as JSON lines")]
    log_json: bool,
}

impl Args {
    fn run_args(&self) -> RunArgs {
        RunArgs {
            repo_url_from: self.repo_url_from.clone(),
            repo_url_to: self.repo_url_to.clone(),
            ref_from: self.ref_from.clone(),
            ref_to: self.ref_to.clone(),
            base_from: self.base_from.clone(),
            base_to: self.base_to.clone(),
            mode: self.mode,
            contributor_domain: self.contributor_domain.clone(),
            skip_upstream_scan: self.no_upstream_scan,
            exhaustive_upstream: self.exhaustive_upstream,
            fingerprint_index: self.fingerprint_index.clone(),
            exclude_stable: self.exclude_stable.clone(),
            check_base: !self.no_check_base,
            diff_output: self.diff_output.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_json);

    // Load configuration
    let config = match config::load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            ui::display_error(&format!("Error loading config: {}", e));
            std::process::exit(1);
        }
    };

    if let Err(e) = ui::check_output(args.output.as_deref(), args.overwrite) {
        ui::display_error(&e.to_string());
        std::process::exit(1);
    }

    ui::display_status(&format!(
        "Comparing {} with {} ({})",
        args.ref_from.as_deref().unwrap_or("<baseline>"),
        args.ref_to,
        args.mode
    ));

    let report = match cli::run(&args.run_args(), &config) {
        Ok(report) => report,
        Err(e) => {
            ui::display_error(&e.to_string());
            std::process::exit(if e.is_fatal_domain() { 2 } else { 1 });
        }
    };

    ui::display_summary(&report, 20);
    ui::write_report(&report, args.output.as_deref(), args.overwrite)?;
    if let Some(path) = &args.output {
        ui::display_success(&format!("Report written to {}", path.display()));
    }

    Ok(())
}
