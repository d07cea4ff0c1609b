//! Translation catalogs.
//!
//! A [`Catalog`] holds every translation for one language, keyed by the
//! original (source-language) text, plus completion statistics computed
//! against the reference catalog. A [`CatalogSet`] bundles the reference
//! catalog with every language catalog found on disk.
//!
//! Catalogs are built once, before any rendering starts, and are shared
//! read-only (behind `Arc`) by all render workers afterwards.
//!
//! ## Files
//!
//! ```text
//! translations/
//! ├── site.pot          # reference catalog (no Language header required)
//! └── dl/
//!     ├── fr_FR.po      # Language: fr_FR
//!     └── pt/pt_BR.po   # discovered recursively
//! ```
//!
//! See [`parse`] for the paragraph format and [`save`] for the writer.

mod parse;
mod save;

pub use parse::FormatError;

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed catalog {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error("failed to scan catalog directory {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Whether a catalog file is the reference template or a translation.
///
/// Only translations must carry a `Language:` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Reference,
    Translation,
}

/// One translated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Original text; the lookup key.
    pub msgid: String,
    /// Translated text. Empty means "not translated yet".
    pub msgstr: String,
    /// Source reference comment (`#:` line), usually the file the text came from.
    pub comment: String,
}

/// The complete translation table for one language.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Locale code from the `Language:` header, e.g. `pt_BR`.
    pub language: String,
    /// Header paragraph fields.
    pub headers: BTreeMap<String, String>,
    /// Number of reference messages with a real translation here.
    pub translated: usize,
    /// Number of messages in the reference catalog.
    pub out_of: usize,
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    /// Parse catalog text. See the [`parse`] module for the format.
    pub fn parse(text: &str, kind: CatalogKind) -> Result<Self, FormatError> {
        parse::parse_catalog(text, kind)
    }

    /// Read and parse a catalog file.
    pub fn load(path: &Path, kind: CatalogKind) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, kind).map_err(|source| CatalogError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Add an entry. An existing entry with the same msgid is replaced in place.
    pub fn insert(&mut self, entry: CatalogEntry) {
        match self.index.get(&entry.msgid) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.msgid.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, msgid: &str) -> Option<&CatalogEntry> {
        self.index.get(msgid).map(|&pos| &self.entries[pos])
    }

    /// The translation for `msgid`, if present and non-empty.
    pub fn translation(&self, msgid: &str) -> Option<&str> {
        self.get(msgid)
            .map(|entry| entry.msgstr.as_str())
            .filter(|msgstr| !msgstr.is_empty())
    }

    /// Entries in file (insertion) order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn locale(&self) -> Locale {
        Locale::from_code(&self.language)
    }

    /// Recount `translated` / `out_of` against the reference catalog.
    ///
    /// A message counts as translated only when its translation is non-empty
    /// and differs from the original text.
    pub fn compute_stats(&mut self, reference: &Catalog) {
        self.out_of = reference.len();
        self.translated = reference
            .entries()
            .filter(|entry| {
                self.translation(&entry.msgid)
                    .is_some_and(|msgstr| msgstr != entry.msgid)
            })
            .count();
    }

    /// Completion in whole percent; 0 when the reference is empty.
    pub fn percent_translated(&self) -> usize {
        if self.out_of == 0 {
            0
        } else {
            self.translated * 100 / self.out_of
        }
    }
}

/// Locale-derived strings used by templates and reserved translation markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locale {
    /// Full code, e.g. `pt_BR`.
    pub locale: String,
    /// Language part, e.g. `pt`.
    pub lang: String,
    /// Uppercased language part, e.g. `PT`.
    pub lang_uc: String,
}

impl Locale {
    pub fn from_code(code: &str) -> Self {
        let lang = code.split('_').next().unwrap_or_default().to_string();
        Self {
            locale: code.to_string(),
            lang_uc: lang.to_uppercase(),
            lang,
        }
    }
}

/// The reference catalog plus every language catalog, keyed by language code.
#[derive(Debug, Clone)]
pub struct CatalogSet {
    pub reference: Arc<Catalog>,
    pub by_language: BTreeMap<String, Arc<Catalog>>,
}

impl CatalogSet {
    /// Load the reference catalog and every `*.po` file below `language_dir`.
    ///
    /// Language files are parsed in parallel. The reference catalog is
    /// labelled with `reference_locale` since it carries no language of its own.
    pub fn load(
        reference_file: &Path,
        language_dir: &Path,
        reference_locale: &str,
    ) -> Result<Self, CatalogError> {
        let reference = Catalog::load(reference_file, CatalogKind::Reference)?;

        let mut paths = Vec::new();
        for entry in WalkDir::new(language_dir).sort_by_file_name() {
            let entry = entry.map_err(|source| CatalogError::Walk {
                path: language_dir.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "po") {
                paths.push(entry.into_path());
            }
        }

        let translations = paths
            .par_iter()
            .map(|path| {
                tracing::debug!(path = %path.display(), "loading catalog");
                Catalog::load(path, CatalogKind::Translation)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_catalogs(reference, translations, reference_locale))
    }

    /// Assemble a set from already-parsed catalogs and compute statistics.
    pub fn from_catalogs(
        mut reference: Catalog,
        translations: Vec<Catalog>,
        reference_locale: &str,
    ) -> Self {
        reference.language = reference_locale.to_string();

        let mut by_language = BTreeMap::new();
        for mut catalog in translations {
            if catalog.language == reference_locale {
                tracing::warn!(
                    language = %catalog.language,
                    "skipping catalog for the reference locale"
                );
                continue;
            }
            catalog.compute_stats(&reference);
            tracing::info!(
                language = %catalog.language,
                translated = catalog.translated,
                out_of = catalog.out_of,
                "loaded catalog"
            );
            if let Some(previous) = by_language.insert(catalog.language.clone(), Arc::new(catalog)) {
                tracing::warn!(language = %previous.language, "duplicate catalog replaced");
            }
        }

        Self {
            reference: Arc::new(reference),
            by_language,
        }
    }

    /// Language codes of the non-reference catalogs, sorted.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.by_language.keys().map(String::as_str)
    }

    pub fn get(&self, language: &str) -> Option<&Arc<Catalog>> {
        self.by_language.get(language)
    }

    /// Template-facing view of the language map.
    pub fn summary_value(&self) -> serde_json::Value {
        let languages: serde_json::Map<String, serde_json::Value> = self
            .by_language
            .iter()
            .map(|(code, catalog)| {
                let locale = catalog.locale();
                let summary = serde_json::json!({
                    "language": code,
                    "lang": locale.lang,
                    "lang_uc": locale.lang_uc,
                    "translated": catalog.translated,
                    "out_of": catalog.out_of,
                    "percent": catalog.percent_translated(),
                    "headers": catalog.headers,
                });
                (code.clone(), summary)
            })
            .collect();
        serde_json::Value::Object(languages)
    }
}
