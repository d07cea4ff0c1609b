//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Stats
//!
//! ```text
//! Reference en_US (120 messages)
//! Languages
//! 001 de_DE 96/120 (80%)
//! 002 fr_FR 120/120 (100%)
//! ```
//!
//! ## Build
//!
//! ```text
//! Rendered 48 of 48 jobs in 3 languages
//!     Assembly cache: 12 templates
//!     Copied: 31 files
//!     Links: 2
//!     Harvest: 118 messages → translations/site.newpot
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::catalog::CatalogSet;
use crate::site::BuildSummary;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Stats
// ============================================================================

pub fn format_catalog_stats(catalogs: &CatalogSet) -> Vec<String> {
    let reference = &catalogs.reference;
    let mut lines = vec![format!(
        "Reference {} ({})",
        reference.language,
        plural(reference.len(), "message", "messages")
    )];

    if catalogs.by_language.is_empty() {
        lines.push(format!("{}No language catalogs", indent(1)));
        return lines;
    }

    lines.push("Languages".to_string());
    for (pos, (code, catalog)) in catalogs.by_language.iter().enumerate() {
        lines.push(format!(
            "{} {} {}/{} ({}%)",
            format_index(pos + 1),
            code,
            catalog.translated,
            catalog.out_of,
            catalog.percent_translated()
        ));
    }
    lines
}

pub fn print_catalog_stats(catalogs: &CatalogSet) {
    for line in format_catalog_stats(catalogs) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_summary(summary: &BuildSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Rendered {} of {} in {}",
        summary.rendered,
        plural(summary.jobs, "job", "jobs"),
        plural(summary.languages, "language", "languages")
    )];
    if summary.skipped > 0 {
        lines.push(format!("{}Skipped: {}", indent(1), summary.skipped));
    }
    lines.push(format!(
        "{}Assembly cache: {}",
        indent(1),
        plural(summary.cached_assemblies, "template", "templates")
    ));
    if summary.copied_files > 0 {
        lines.push(format!(
            "{}Copied: {}",
            indent(1),
            plural(summary.copied_files, "file", "files")
        ));
    }
    if summary.links > 0 {
        lines.push(format!("{}Links: {}", indent(1), summary.links));
    }
    if let Some((path, messages)) = &summary.harvested {
        lines.push(format!(
            "{}Harvest: {} → {}",
            indent(1),
            plural(*messages, "message", "messages"),
            path.display()
        ));
    }
    lines
}

pub fn print_build_summary(summary: &BuildSummary) {
    for line in format_build_summary(summary) {
        println!("{}", line);
    }
}
