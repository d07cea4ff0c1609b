//! Build configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. The file is
//! optional: stock defaults describe a complete build, and a user file only
//! overrides what it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [directories]
//! template_dir = "templates"   # One subdirectory per artifact type
//! output_dir = "output"        # Wiped and recreated on every build
//! assets_dir = "."             # Base for [[copies]] sources
//!
//! [catalogs]
//! reference_file = "translations/site.pot"
//! language_dir = "translations/dl"   # *.po files, searched recursively
//! reference_locale = "en_US"
//! # harvest_file = "translations/site.newpot"
//!
//! [options]
//! # max_threads = 4           # Omit for auto = CPU cores
//! queue_capacity = 1
//!
//! [template]
//! open = "[%"
//! close = "%]"
//!
//! [[artifacts]]
//! directory = "html"
//! extension = ".html"
//! post_steps = ["mv [INPUT] [OUTPUT]"]
//! multi_locale = true
//! ```
//!
//! ## Partial Configuration
//!
//! Tables merge key by key. Arrays (including `[[artifacts]]`) replace the
//! stock array as a whole:
//!
//! ```toml
//! [options]
//! max_threads = 2
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::job::ArtifactType;
use crate::template::Delimiters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub directories: DirectoriesConfig,
    pub catalogs: CatalogsConfig,
    pub options: OptionsConfig,
    /// Delimiters of the templating pass.
    pub template: Delimiters,
    /// Artifact types to render, in enumeration order.
    pub artifacts: Vec<ArtifactType>,
    /// Static trees copied into the output after rendering.
    pub copies: Vec<CopyRule>,
    /// Symlinks created inside the output after copying.
    pub links: Vec<LinkRule>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            directories: DirectoriesConfig::default(),
            catalogs: CatalogsConfig::default(),
            options: OptionsConfig::default(),
            template: Delimiters::default(),
            artifacts: stock_artifacts(),
            copies: Vec::new(),
            links: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Delimiters { open, close } = &self.template;
        if open.is_empty() || close.is_empty() {
            return Err(ConfigError::Validation(
                "template.open and template.close must not be empty".into(),
            ));
        }
        if [open, close].iter().any(|d| d.contains("{{") || d.contains("}}")) {
            return Err(ConfigError::Validation(
                "template delimiters must not collide with {{ }} translation markers".into(),
            ));
        }
        if self.options.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "options.max_threads must be at least 1".into(),
            ));
        }
        if self.options.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "options.queue_capacity must be at least 1".into(),
            ));
        }
        if self.catalogs.reference_locale.is_empty() {
            return Err(ConfigError::Validation(
                "catalogs.reference_locale must not be empty".into(),
            ));
        }
        for artifact in &self.artifacts {
            if artifact.directory.is_empty() || artifact.extension.is_empty() {
                return Err(ConfigError::Validation(
                    "artifacts need a directory and an extension".into(),
                ));
            }
        }
        for link in &self.links {
            if link.name.is_empty() || link.name.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "links.name must be a plain file name, got {:?}",
                    link.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoriesConfig {
    /// Holds one subdirectory per artifact type.
    pub template_dir: String,
    /// Rendered site. Removed and recreated on every build.
    pub output_dir: String,
    /// Base directory for `[[copies]]` sources.
    pub assets_dir: String,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            template_dir: "templates".to_string(),
            output_dir: "output".to_string(),
            assets_dir: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogsConfig {
    /// Untranslated reference catalog.
    pub reference_file: String,
    /// Searched recursively for `*.po` language catalogs.
    pub language_dir: String,
    /// Locale the reference catalog renders as.
    pub reference_locale: String,
    /// Where to save the harvested reference catalog. Not saved when absent.
    pub harvest_file: Option<String>,
}

impl Default for CatalogsConfig {
    fn default() -> Self {
        Self {
            reference_file: "translations/site.pot".to_string(),
            language_dir: "translations/dl".to_string(),
            reference_locale: "en_US".to_string(),
            harvest_file: None,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    /// Maximum number of render workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
    /// Jobs buffered ahead of the workers before `add` blocks.
    pub queue_capacity: usize,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            queue_capacity: 1,
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &OptionsConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

/// A directory copied into the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyRule {
    /// Source, relative to `directories.assets_dir`.
    pub from: String,
    /// Destination, relative to the output directory.
    pub to: String,
    /// Copy subdirectories too; otherwise only top-level files.
    #[serde(default)]
    pub recursive: bool,
}

/// A symlink created inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkRule {
    pub name: String,
    pub target: String,
}

fn artifact(directory: &str, extension: &str, post_steps: &[&str]) -> ArtifactType {
    ArtifactType {
        directory: directory.to_string(),
        extension: extension.to_string(),
        post_steps: post_steps.iter().map(|s| s.to_string()).collect(),
        escape_quotes: false,
        multi_locale: false,
        compress: false,
    }
}

const GZIP_STEP: &str = "gzip -f -9 < [OUTPUT] > [NAMEGZ]";
const MOVE_STEP: &str = "mv [INPUT] [OUTPUT]";

fn stock_artifacts() -> Vec<ArtifactType> {
    vec![
        ArtifactType {
            compress: true,
            ..artifact("css", ".css", &["cssmin < [INPUT] > [OUTPUT]", GZIP_STEP])
        },
        ArtifactType {
            escape_quotes: true,
            multi_locale: true,
            compress: true,
            ..artifact("js", ".js", &["uglifyjs [INPUT] -o [OUTPUT] -c", GZIP_STEP])
        },
        ArtifactType {
            multi_locale: true,
            compress: true,
            ..artifact(
                "html",
                ".html",
                &[
                    "tidy -quiet -indent -asxhtml -utf8 -w 120 --show-warnings false < [INPUT] > [OUTPUT]",
                    "sed 's#/index.js#/index.js.gz#' < [OUTPUT] | gzip -f -9 > [NAMEGZ]",
                ],
            )
        },
        artifact("php", ".php", &[MOVE_STEP]),
        artifact("apache", ".htaccess", &[MOVE_STEP]),
        artifact("apache", ".example", &[MOVE_STEP]),
    ]
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(BuildConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay, arrays included, replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<BuildConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: BuildConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults when it is absent.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<BuildConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    if overlay.is_some() {
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Polysite Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Tables merge key by key with the defaults. Arrays, including the
# [[artifacts]] list, replace the defaults as a whole.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Directories (relative to the working directory)
# ---------------------------------------------------------------------------
[directories]
# One subdirectory per artifact type; PROCESS directives in a file resolve
# against that file's type directory.
template_dir = "templates"
# Rendered site. Deleted and recreated on every build.
output_dir = "output"
# Base for [[copies]] sources.
assets_dir = "."

# ---------------------------------------------------------------------------
# Translation catalogs
# ---------------------------------------------------------------------------
[catalogs]
# Untranslated reference catalog; needs no Language header.
reference_file = "translations/site.pot"
# Searched recursively for *.po files, each with a Language header.
language_dir = "translations/dl"
# Locale the reference catalog renders as.
reference_locale = "en_US"
# Save every translation marker met while rendering the reference locale.
# harvest_file = "translations/site.newpot"

# ---------------------------------------------------------------------------
# Worker pool
# ---------------------------------------------------------------------------
[options]
# Maximum render workers. Omit to use all CPU cores.
# Values above the core count are clamped down.
# max_threads = 4
# Jobs buffered ahead of the workers before the producer blocks.
queue_capacity = 1

# ---------------------------------------------------------------------------
# Template action delimiters
# ---------------------------------------------------------------------------
# Must not contain {{ or }}, which mark translatable text.
[template]
open = "[%"
close = "%]"

# ---------------------------------------------------------------------------
# Artifact types
# ---------------------------------------------------------------------------
# Every file in <template_dir>/<directory> ending in <extension> is rendered
# once for the reference locale, plus once per language when multi_locale.
#
# post_steps run in order with /bin/sh inside the output directory.
# Macros: [NAME] output name (index.html.fr_FR when multi_locale)
#         [NAMEGZ] [NAME].gz   [INPUT] [NAME].orig   [OUTPUT] [NAME]
# The rendered text is written to [INPUT]; the steps must produce [OUTPUT].
# Every type needs at least "mv [INPUT] [OUTPUT]".

[[artifacts]]
directory = "css"
extension = ".css"
post_steps = ["cssmin < [INPUT] > [OUTPUT]", "gzip -f -9 < [OUTPUT] > [NAMEGZ]"]
escape_quotes = false
multi_locale = false
compress = true

[[artifacts]]
directory = "js"
extension = ".js"
post_steps = ["uglifyjs [INPUT] -o [OUTPUT] -c", "gzip -f -9 < [OUTPUT] > [NAMEGZ]"]
# Translations land inside quoted script strings.
escape_quotes = true
multi_locale = true
compress = true

[[artifacts]]
directory = "html"
extension = ".html"
post_steps = [
    "tidy -quiet -indent -asxhtml -utf8 -w 120 --show-warnings false < [INPUT] > [OUTPUT]",
    "sed 's#/index.js#/index.js.gz#' < [OUTPUT] | gzip -f -9 > [NAMEGZ]",
]
escape_quotes = false
multi_locale = true
compress = true

[[artifacts]]
directory = "php"
extension = ".php"
post_steps = ["mv [INPUT] [OUTPUT]"]
escape_quotes = false
multi_locale = false
compress = false

[[artifacts]]
directory = "apache"
extension = ".htaccess"
post_steps = ["mv [INPUT] [OUTPUT]"]
escape_quotes = false
multi_locale = false
compress = false

[[artifacts]]
directory = "apache"
extension = ".example"
post_steps = ["mv [INPUT] [OUTPUT]"]
escape_quotes = false
multi_locale = false
compress = false

# ---------------------------------------------------------------------------
# Static copies and links (none by default)
# ---------------------------------------------------------------------------
# [[copies]]
# from = "images"          # relative to assets_dir
# to = "images"            # relative to output_dir
# recursive = false        # top-level files only
#
# [[links]]
# name = "isp"             # created inside output_dir
# target = "."
"##
}
