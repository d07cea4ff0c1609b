//! Render jobs and their enumeration.
//!
//! A [`Job`] is one (artifact file, target language) rendering unit. Jobs are
//! enumerated up front from the configured [`ArtifactType`]s: every file of a
//! type gets a job for the reference locale, and multi-locale types also get
//! one job per language catalog.
//!
//! ```text
//! templates/
//! ├── html/               # ArtifactType { directory: "html", extension: ".html", multi_locale }
//! │   ├── index.html      # -> index.html.en_US, index.html.fr_FR, ...
//! │   ├── faq.html
//! │   └── inc/header.inc  # not an artifact; pulled in by PROCESS directives
//! └── css/
//!     └── site.css        # -> site.css
//! ```

use crate::catalog::{Catalog, CatalogSet, Locale};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum EnumerateError {
    #[error("cannot list artifact directory {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// One kind of artifact and how it is post-processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactType {
    /// Directory under the template directory holding this type's files.
    /// Also the root for `PROCESS` directives in those files.
    pub directory: String,
    /// File-name suffix selecting artifacts, e.g. `.html` or `.htaccess`.
    pub extension: String,
    /// Shell command templates run after rendering; see [`crate::postprocess`].
    #[serde(default)]
    pub post_steps: Vec<String>,
    /// Backslash-escape quotes in translated text.
    #[serde(default)]
    pub escape_quotes: bool,
    /// Render once per language in addition to the reference locale.
    #[serde(default)]
    pub multi_locale: bool,
    /// Exposed to templates as `.compress`.
    #[serde(default)]
    pub compress: bool,
}

/// One (artifact file, target language) rendering unit.
///
/// Immutable once built; consumed by exactly one worker.
#[derive(Debug, Clone)]
pub struct Job {
    /// File name of the root template, relative to `root_dir`.
    pub artifact: String,
    /// Catalog of the target language.
    pub catalog: Arc<Catalog>,
    /// Directory the artifact and its inclusions are resolved against.
    pub root_dir: PathBuf,
    pub post_steps: Arc<[String]>,
    pub escape_quotes: bool,
    pub multi_locale: bool,
    pub compress: bool,
}

impl Job {
    pub fn language(&self) -> &str {
        &self.catalog.language
    }

    pub fn locale(&self) -> Locale {
        self.catalog.locale()
    }

    pub fn source_path(&self) -> PathBuf {
        self.root_dir.join(&self.artifact)
    }

    /// Artifact name up to the first `.`, e.g. `index` for `index.html`.
    pub fn basename(&self) -> &str {
        self.artifact.split('.').next().unwrap_or_default()
    }

    /// Output file name: the artifact name, locale-qualified for multi-locale jobs.
    pub fn output_name(&self) -> String {
        if self.multi_locale {
            format!("{}.{}", self.artifact, self.language())
        } else {
            self.artifact.clone()
        }
    }

    /// Short identifier for logs and errors.
    pub fn label(&self) -> String {
        format!("{} [{}]", self.source_path().display(), self.language())
    }
}

/// Every job for `artifacts` under `template_dir`.
///
/// Each type's directory is listed non-recursively and in file-name order.
/// Editor backups ending in `~` are ignored.
pub fn enumerate_jobs(
    artifacts: &[ArtifactType],
    template_dir: &Path,
    catalogs: &CatalogSet,
) -> Result<Vec<Job>, EnumerateError> {
    let mut jobs = Vec::new();

    for kind in artifacts {
        let root_dir = template_dir.join(&kind.directory);
        let post_steps: Arc<[String]> = kind.post_steps.iter().cloned().collect();

        for name in artifact_files(&root_dir, &kind.extension)? {
            let job_for = |catalog: &Arc<Catalog>| Job {
                artifact: name.clone(),
                catalog: Arc::clone(catalog),
                root_dir: root_dir.clone(),
                post_steps: Arc::clone(&post_steps),
                escape_quotes: kind.escape_quotes,
                multi_locale: kind.multi_locale,
                compress: kind.compress,
            };

            jobs.push(job_for(&catalogs.reference));
            if kind.multi_locale {
                jobs.extend(catalogs.by_language.values().map(job_for));
            }
        }
    }

    tracing::debug!(jobs = jobs.len(), "enumerated jobs");
    Ok(jobs)
}

fn artifact_files(dir: &Path, extension: &str) -> Result<Vec<String>, EnumerateError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| EnumerateError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.ends_with('~') || !name.ends_with(extension) {
            continue;
        }
        names.push(name.to_string());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{catalog_set, write_file};
    use tempfile::TempDir;

    fn kind(directory: &str, extension: &str, multi_locale: bool) -> ArtifactType {
        ArtifactType {
            directory: directory.to_string(),
            extension: extension.to_string(),
            post_steps: vec!["mv [INPUT] [OUTPUT]".to_string()],
            escape_quotes: false,
            multi_locale,
            compress: true,
        }
    }

    fn three_languages() -> CatalogSet {
        catalog_set(
            &["Hello"],
            &[
                ("fr_FR", &[("Hello", "Bonjour")]),
                ("de_DE", &[("Hello", "Hallo")]),
                ("pt_BR", &[]),
            ],
        )
    }

    fn site() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "html/index.html", "");
        write_file(tmp.path(), "html/faq.html", "");
        write_file(tmp.path(), "html/faq.html~", "");
        write_file(tmp.path(), "html/notes.txt", "");
        write_file(tmp.path(), "html/inc/header.html", "");
        write_file(tmp.path(), "css/site.css", "");
        tmp
    }

    #[test]
    fn multi_locale_type_gets_reference_plus_each_language() {
        let tmp = site();
        let jobs = enumerate_jobs(&[kind("html", ".html", true)], tmp.path(), &three_languages()).unwrap();

        // 2 files * (3 languages + reference)
        assert_eq!(jobs.len(), 8);
        let index: Vec<_> = jobs
            .iter()
            .filter(|j| j.artifact == "index.html")
            .map(|j| j.language().to_string())
            .collect();
        assert_eq!(index, vec!["en_US", "de_DE", "fr_FR", "pt_BR"]);
    }

    #[test]
    fn single_locale_type_gets_one_job_per_file() {
        let tmp = site();
        let jobs = enumerate_jobs(&[kind("css", ".css", false)], tmp.path(), &three_languages()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].language(), "en_US");
        assert_eq!(jobs[0].root_dir, tmp.path().join("css"));
    }

    #[test]
    fn listing_skips_backups_other_extensions_and_subdirectories() {
        let tmp = site();
        let jobs = enumerate_jobs(&[kind("html", ".html", false)], tmp.path(), &three_languages()).unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.artifact.as_str()).collect();
        assert_eq!(names, vec!["faq.html", "index.html"]);
    }

    #[test]
    fn jobs_carry_type_flags_and_shared_steps() {
        let tmp = site();
        let jobs = enumerate_jobs(&[kind("html", ".html", true)], tmp.path(), &three_languages()).unwrap();
        assert!(jobs.iter().all(|j| j.compress && j.multi_locale && !j.escape_quotes));
        assert!(Arc::ptr_eq(&jobs[0].post_steps, &jobs[1].post_steps));
    }

    #[test]
    fn missing_type_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = enumerate_jobs(&[kind("php", ".php", false)], tmp.path(), &three_languages());
        assert!(matches!(result, Err(EnumerateError::Scan { .. })));
    }

    #[test]
    fn names_derived_from_artifact() {
        let catalogs = three_languages();
        let mut job = Job {
            artifact: "index.html".to_string(),
            catalog: Arc::clone(&catalogs.by_language["fr_FR"]),
            root_dir: PathBuf::from("templates/html"),
            post_steps: Arc::from(Vec::new()),
            escape_quotes: false,
            multi_locale: true,
            compress: false,
        };
        assert_eq!(job.basename(), "index");
        assert_eq!(job.output_name(), "index.html.fr_FR");
        assert_eq!(job.source_path(), PathBuf::from("templates/html/index.html"));

        job.multi_locale = false;
        job.artifact = ".htaccess".to_string();
        assert_eq!(job.basename(), "");
        assert_eq!(job.output_name(), ".htaccess");
    }
}
