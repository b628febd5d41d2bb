use crate::config::RangeDiffConfig;
use crate::error::{LineageError, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Runs `git range-diff` on a staged working copy
#[derive(Debug, Clone)]
pub struct RangeDiffTool {
    program: String,
    extra_args: Vec<String>,
}

impl RangeDiffTool {
    pub fn new(program: impl Into<String>) -> Self {
        RangeDiffTool {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &RangeDiffConfig) -> Self {
        RangeDiffTool {
            program: config.program.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Compare two `base..tip` ranges.
    ///
    /// # Arguments
    /// * `workdir` - Repository both ranges are reachable in
    /// * `range_a` - Older range, e.g. `v5.15..lts-a`
    /// * `range_b` - Newer range
    ///
    /// # Returns
    /// * `Ok(String)` - The tool's uncolored stdout
    /// * `Err` - If the tool cannot be started or exits with non-zero status
    pub fn run(&self, workdir: &Path, range_a: &str, range_b: &str) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(workdir)
            .arg("range-diff")
            .arg("--no-color")
            .args(&self.extra_args)
            .arg(range_a)
            .arg(range_b);

        let command = format!("{} range-diff {} {}", self.program, range_a, range_b);
        info!(%command, workdir = %workdir.display(), "running range-diff");

        let output = cmd.output().map_err(|e| LineageError::Command {
            command: command.clone(),
            code: None,
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(LineageError::Command {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = stdout.len(), "range-diff finished");
        Ok(stdout)
    }
}
