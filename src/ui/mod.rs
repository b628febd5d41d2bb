//! User interface module - report output and formatting.
//!
//! Separates concerns:
//! - `formatter` - Terminal formatting
//! - This module - Writing the JSON report

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::cli::orchestration::RunReport;
use crate::error::{LineageError, Result};

pub mod formatter;

// Re-export formatter functions for convenience
pub use formatter::{
    display_error, display_status, display_success, display_summary, display_warning, format_patch,
    format_side,
};

/// Writes the report as pretty JSON.
///
/// # Arguments
/// * `report` - The run's result
/// * `output` - Target file; stdout when `None`
/// * `overwrite` - Replace an existing target file
///
/// # Returns
/// * `Ok(())` - If the report was written
/// * `Err` - If the target exists and `overwrite` is not set, or writing fails
pub fn write_report(report: &RunReport, output: Option<&Path>, overwrite: bool) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;

    match output {
        Some(path) => {
            check_output(Some(path), overwrite)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json + "\n")?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json)?;
        }
    }
    Ok(())
}

/// Fail early, before any work, when the report target is taken.
pub fn check_output(output: Option<&Path>, overwrite: bool) -> Result<()> {
    match output {
        Some(path) if path.exists() && !overwrite => Err(LineageError::config(format!(
            "Report '{}' already exists, use --overwrite to replace it",
            path.display()
        ))),
        _ => Ok(()),
    }
}
