//! Shared test utilities for the polysite test suite.
//!
//! Builders for catalog text and small on-disk template trees, so unit tests
//! can describe fixtures inline instead of shipping fixture files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_file(tmp.path(), "html/index.html", "<p>{{Hello}}</p>");
//! write_file(tmp.path(), "dl/fr_FR.po", &catalog_text("fr_FR", &[("Hello", "Bonjour")]));
//! ```

use crate::catalog::{Catalog, CatalogKind, CatalogSet};
use crate::gitinfo::GitInfo;
use crate::job::Job;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =========================================================================
// Files
// =========================================================================

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

// =========================================================================
// Catalogs
// =========================================================================

/// Render a catalog file: header paragraph (with `Language:` when non-empty)
/// followed by one paragraph per `(msgid, msgstr)` pair.
pub fn catalog_text(language: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = String::from("msgid \"\"\nmsgstr \"\"\n\"Project-Id-Version: test\\n\"\n");
    if !language.is_empty() {
        out.push_str(&format!("\"Language: {language}\\n\"\n"));
    }
    for (msgid, msgstr) in pairs {
        out.push_str(&format!("\nmsgid \"{msgid}\"\nmsgstr \"{msgstr}\"\n"));
    }
    // Trailing blank line: even a header-only file has two paragraphs.
    out.push('\n');
    out
}

/// A catalog set with reference messages `reference_ids` and one catalog per
/// `(language, pairs)` entry. The reference locale is `en_US`.
pub fn catalog_set(reference_ids: &[&str], languages: &[(&str, &[(&str, &str)])]) -> CatalogSet {
    let pairs: Vec<(&str, &str)> = reference_ids.iter().map(|id| (*id, "")).collect();
    let reference = Catalog::parse(&catalog_text("", &pairs), CatalogKind::Reference).unwrap();
    let translations = languages
        .iter()
        .map(|(language, pairs)| {
            Catalog::parse(&catalog_text(language, pairs), CatalogKind::Translation).unwrap()
        })
        .collect();
    CatalogSet::from_catalogs(reference, translations, "en_US")
}

// =========================================================================
// Jobs
// =========================================================================

/// A job for `artifact` under `root_dir`, rendered with `catalog`.
pub fn job(root_dir: &Path, artifact: &str, catalog: Arc<Catalog>, steps: &[&str], multi_locale: bool) -> Job {
    Job {
        artifact: artifact.to_string(),
        catalog,
        root_dir: root_dir.to_path_buf(),
        post_steps: steps.iter().map(|s| s.to_string()).collect(),
        escape_quotes: false,
        multi_locale,
        compress: false,
    }
}

/// Git metadata with fixed placeholder values.
pub fn git_info() -> GitInfo {
    GitInfo {
        revision_count: "42".to_string(),
        project_version: "1.2-40-gabcdef".to_string(),
        version: "1.2.42".to_string(),
        date: "Thu Oct 15 12:00:00 2026 +0000".to_string(),
        repository: "https://example.com/site.git".to_string(),
    }
}
