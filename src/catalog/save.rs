//! Catalog serialization.
//!
//! Saved files always start with a synthetic header paragraph; the entries
//! follow in catalog order, one paragraph each, with every value quoted so
//! the file round-trips through the parser.

use super::{Catalog, CatalogEntry, CatalogError};
use std::fs;
use std::path::Path;

const FIXED_HEADER: &[&str] = &[
    "Project-Id-Version: PACKAGE VERSION",
    "PO-Revision-Date: YEAR-MO-DA HO:MI +ZONE",
    "Last-Translator: Unspecified Translator <translator@localhost>",
    "Language-Team: LANGUAGE <team@localhost>",
];

const ENCODING_HEADER: &[&str] = &[
    "MIME-Version: 1.0",
    "Content-Type: text/plain; charset=UTF-8",
    "Content-Transfer-Encoding: 8bit",
];

impl Catalog {
    /// Render the catalog in the on-disk format.
    pub fn to_po_string(&self) -> String {
        let mut out = String::new();
        write_paragraph(&mut out, "", "", &self.synthetic_header());
        for entry in self.entries() {
            let CatalogEntry {
                msgid,
                msgstr,
                comment,
            } = entry;
            write_paragraph(&mut out, comment, msgid, msgstr);
        }
        out
    }

    /// Write the catalog to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        tracing::info!(path = %path.display(), entries = self.len(), "saving catalog");
        fs::write(path, self.to_po_string()).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn synthetic_header(&self) -> String {
        let language = (!self.language.is_empty()).then(|| format!("Language: {}", self.language));
        FIXED_HEADER
            .iter()
            .map(|line| line.to_string())
            .chain(language)
            .chain(ENCODING_HEADER.iter().map(|line| line.to_string()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn write_paragraph(out: &mut String, comment: &str, msgid: &str, msgstr: &str) {
    if !comment.is_empty() {
        out.push_str("#: ");
        out.push_str(&quote(comment));
        out.push('\n');
    }
    out.push_str("msgid ");
    out.push_str(&quote(msgid));
    out.push_str("\nmsgstr ");
    out.push_str(&quote(msgstr));
    out.push_str("\n\n");
}

/// Quote a value, escaping everything [`unquote`](super::parse::unquote) resolves.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0B}' => out.push_str("\\v"),
            '\u{0C}' => out.push_str("\\f"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
