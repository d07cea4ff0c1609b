//! External post-processing of rendered output.
//!
//! The translated text of a job is written to `OUTPUT_DIR/<name>.orig` and
//! then each configured step runs as a `/bin/sh` script in the output
//! directory, after macro substitution:
//!
//! | Macro      | Value                                              |
//! |------------|----------------------------------------------------|
//! | `[NAME]`   | output name (`index.html.fr_FR` when multi-locale) |
//! | `[NAMEGZ]` | `[NAME].gz`                                        |
//! | `[INPUT]`  | `[NAME].orig`                                      |
//! | `[OUTPUT]` | `[NAME]`                                           |
//!
//! Steps run in order and the first failing step fails the job. `tidy`
//! exits with status 1 when it only has warnings, so that one case is
//! accepted.

use crate::job::Job;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Macro table for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macros {
    pub name: String,
}

impl Macros {
    pub fn for_job(job: &Job) -> Self {
        Self {
            name: job.output_name(),
        }
    }

    pub fn input(&self) -> String {
        format!("{}.orig", self.name)
    }

    pub fn name_gz(&self) -> String {
        format!("{}.gz", self.name)
    }

    /// Replace every `[NAME]`, `[NAMEGZ]`, `[INPUT]` and `[OUTPUT]` in `step`.
    pub fn expand(&self, step: &str) -> String {
        step.replace("[NAMEGZ]", &self.name_gz())
            .replace("[NAME]", &self.name)
            .replace("[INPUT]", &self.input())
            .replace("[OUTPUT]", &self.name)
    }
}

/// Write `content` for `job` into `output_dir` and run its post steps.
pub fn post_process(job: &Job, content: &str, output_dir: &Path) -> Result<(), PostProcessError> {
    let macros = Macros::for_job(job);
    let input = output_dir.join(macros.input());
    std::fs::write(&input, content).map_err(|source| PostProcessError::Write {
        path: input.clone(),
        source,
    })?;

    for step in job.post_steps.iter() {
        run_step(&macros.expand(step), output_dir)?;
    }
    Ok(())
}

fn run_step(script: &str, dir: &Path) -> Result<(), PostProcessError> {
    tracing::debug!(command = script, "post step");
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .current_dir(dir)
        .output()
        .map_err(|source| PostProcessError::Spawn {
            command: script.to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    if exit_is_tolerated(script, output.status.code()) {
        tracing::debug!(command = script, "tidy reported warnings");
        return Ok(());
    }
    Err(PostProcessError::Failed {
        command: script.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// `tidy` exits 1 for warnings-only runs.
pub fn exit_is_tolerated(command: &str, code: Option<i32>) -> bool {
    command.starts_with("tidy ") && code == Some(1)
}
