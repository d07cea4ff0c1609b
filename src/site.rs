//! Full site build: the render pipeline plus the steps around it.
//!
//! ```text
//! prep output ─▶ load catalogs ─▶ git metadata ─▶ enumerate jobs
//!      ─▶ queue + workers ─▶ wait ─▶ copies ─▶ links ─▶ save harvest
//! ```
//!
//! Every path in the [`BuildConfig`] is resolved against the `root` passed
//! to [`build_site`].

use crate::catalog::{CatalogError, CatalogSet};
use crate::config::{self, BuildConfig, CopyRule, LinkRule};
use crate::gitinfo::GitInfo;
use crate::job::{self, EnumerateError};
use crate::pipeline::{Pipeline, RenderError};
use crate::scheduler::{JobError, JobQueue, QueueError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("refusing to use {} as the output directory", .0.display())]
    UnsafeOutput(PathBuf),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot scan {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("symlinks are not supported on this platform")]
    LinksUnsupported,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Enumerate(#[from] EnumerateError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("render failed: {0}")]
    Render(#[from] JobError<RenderError>),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SiteError + '_ {
    move |source| SiteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What a build did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub languages: usize,
    pub jobs: usize,
    pub rendered: usize,
    pub skipped: usize,
    pub cached_assemblies: usize,
    pub copied_files: usize,
    pub links: usize,
    pub harvested: Option<(PathBuf, usize)>,
}

/// Build the whole site described by `config`, with paths relative to `root`.
pub fn build_site(config: &BuildConfig, root: &Path) -> Result<BuildSummary, SiteError> {
    let dirs = &config.directories;
    if dirs.output_dir.trim().is_empty() {
        return Err(SiteError::UnsafeOutput(PathBuf::from(&dirs.output_dir)));
    }
    let output_dir = root.join(&dirs.output_dir);
    prep_output(&output_dir)?;

    let catalogs = CatalogSet::load(
        &root.join(&config.catalogs.reference_file),
        &root.join(&config.catalogs.language_dir),
        &config.catalogs.reference_locale,
    )?;
    let git = GitInfo::collect(root);

    let pipeline = Arc::new(Pipeline::new(
        &catalogs,
        git,
        config.template.clone(),
        &output_dir,
    ));
    let jobs = job::enumerate_jobs(&config.artifacts, &root.join(&dirs.template_dir), &catalogs)?;
    let job_count = jobs.len();
    let workers = config::effective_threads(&config.options);
    tracing::info!(jobs = job_count, workers, "rendering");

    let stats = {
        let queue = JobQueue::start(Arc::clone(&pipeline), workers, config.options.queue_capacity)?;
        for job in jobs {
            queue.add(job)?;
        }
        queue.wait()?
    };

    let assets_dir = root.join(&dirs.assets_dir);
    let mut copied_files = 0;
    for rule in &config.copies {
        copied_files += copy_rule(rule, &assets_dir, &output_dir)?;
    }
    create_links(&output_dir, &config.links)?;

    let harvested = match &config.catalogs.harvest_file {
        Some(file) => {
            let path = root.join(file);
            let harvest = pipeline.harvested_catalog();
            harvest.save(&path)?;
            tracing::info!(path = %path.display(), messages = harvest.len(), "saved harvested catalog");
            Some((path, harvest.len()))
        }
        None => None,
    };

    Ok(BuildSummary {
        languages: catalogs.by_language.len(),
        jobs: job_count,
        rendered: stats.completed,
        skipped: stats.skipped,
        cached_assemblies: pipeline.assembly_cache().len(),
        copied_files,
        links: config.links.len(),
        harvested,
    })
}

/// Remove and recreate the output directory.
pub fn prep_output(output_dir: &Path) -> Result<(), SiteError> {
    let unsafe_target = output_dir.as_os_str().is_empty()
        || output_dir == Path::new(".")
        || output_dir.parent().is_none();
    if unsafe_target {
        return Err(SiteError::UnsafeOutput(output_dir.to_path_buf()));
    }
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).map_err(io_error(output_dir))?;
    }
    fs::create_dir_all(output_dir).map_err(io_error(output_dir))?;
    tracing::debug!(path = %output_dir.display(), "prepared output directory");
    Ok(())
}

fn copy_rule(rule: &CopyRule, assets_dir: &Path, output_dir: &Path) -> Result<usize, SiteError> {
    let from = assets_dir.join(&rule.from);
    let to = output_dir.join(&rule.to);
    let copied = copy_files(&from, &to, rule.recursive)?;
    tracing::info!(from = %from.display(), to = %to.display(), files = copied, "copied");
    Ok(copied)
}

/// Copy files from `from` into `to`, returning how many were copied.
///
/// Without `recursive` only the top-level files are copied. Editor backups
/// ending in `~` are skipped.
pub fn copy_files(from: &Path, to: &Path, recursive: bool) -> Result<usize, SiteError> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    fs::create_dir_all(to).map_err(io_error(to))?;

    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1).max_depth(max_depth).sort_by_file_name() {
        let entry = entry.map_err(|source| SiteError::Walk {
            path: from.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            if recursive {
                fs::create_dir_all(&target).map_err(io_error(&target))?;
            }
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with('~') {
            continue;
        }
        fs::copy(entry.path(), &target).map_err(io_error(&target))?;
        copied += 1;
    }
    Ok(copied)
}

/// Create each link inside `output_dir`, replacing whatever is there.
pub fn create_links(output_dir: &Path, links: &[LinkRule]) -> Result<(), SiteError> {
    for link in links {
        let path = output_dir.join(&link.name);
        if fs::symlink_metadata(&path).is_ok() {
            fs::remove_file(&path).map_err(io_error(&path))?;
        }
        symlink(Path::new(&link.target), &path)?;
        tracing::debug!(name = %link.name, target = %link.target, "linked");
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, path: &Path) -> Result<(), SiteError> {
    std::os::unix::fs::symlink(target, path).map_err(io_error(path))
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _path: &Path) -> Result<(), SiteError> {
    Err(SiteError::LinksUnsupported)
}
