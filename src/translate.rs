//! Translation-marker substitution.
//!
//! Assembled text carries `{{ text }}` markers. Each marker's text is
//! normalized (trimmed, internal whitespace collapsed to single spaces) and
//! replaced by:
//!
//! - the job's locale strings for the reserved keywords `lang`, `langUC` and
//!   `locale`;
//! - otherwise the catalog's non-empty translation of the normalized text;
//! - otherwise the normalized text itself. A missing translation is never an
//!   error.
//!
//! Markers may span lines and are not nested. The scan is a single forward
//! pass, so a translation containing `{{` is emitted verbatim.

use crate::catalog::{Catalog, Locale};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("marker pattern is valid"));

// ASCII whitespace only; a no-break space is part of the message.
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\t\n\x0C\r ]+").expect("whitespace pattern is valid"));

/// Marker texts that resolve from the job's locale instead of the catalog.
pub const RESERVED: [&str; 3] = ["lang", "langUC", "locale"];

/// Trim and collapse ASCII whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Replace every marker in `content`.
pub fn translate(content: &str, catalog: &Catalog, locale: &Locale, escape_quotes: bool) -> String {
    MARKER
        .replace_all(content, |caps: &Captures| {
            let text = normalize(&caps[1]);
            let resolved = match text.as_str() {
                "lang" => locale.lang.clone(),
                "langUC" => locale.lang_uc.clone(),
                "locale" => locale.locale.clone(),
                _ => catalog
                    .translation(&text)
                    .map_or(text.clone(), str::to_string),
            };
            if escape_quotes {
                escape(&resolved)
            } else {
                resolved
            }
        })
        .into_owned()
}

/// Normalized texts of every non-reserved marker, in order of appearance.
pub fn markers(content: &str) -> Vec<String> {
    MARKER
        .captures_iter(content)
        .map(|caps| normalize(&caps[1]))
        .filter(|text| !RESERVED.contains(&text.as_str()))
        .collect()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '"' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogKind;
    use crate::test_helpers::catalog_text;

    fn french() -> Catalog {
        Catalog::parse(
            &catalog_text(
                "fr_FR",
                &[
                    ("Hello", "Bonjour"),
                    ("Your IPv6 address", "Votre adresse IPv6"),
                    ("Untranslated", ""),
                    ("Quote", "l'adresse \\\"IPv6\\\""),
                    ("Nested", "{{Hello}}"),
                ],
            ),
            CatalogKind::Translation,
        )
        .unwrap()
    }

    fn fr() -> Locale {
        Locale::from_code("fr_FR")
    }

    #[test]
    fn substitutes_translation() {
        let out = translate("<p>{{Hello}}</p>", &french(), &fr(), false);
        assert_eq!(out, "<p>Bonjour</p>");
    }

    #[test]
    fn normalizes_multiline_marker_before_lookup() {
        let out = translate("{{  Your\n   IPv6\taddress \n}}", &french(), &fr(), false);
        assert_eq!(out, "Votre adresse IPv6");
    }

    #[test]
    fn missing_or_empty_translation_falls_back_to_normalized_text() {
        let out = translate("{{ Not in catalog }}|{{Untranslated}}", &french(), &fr(), false);
        assert_eq!(out, "Not in catalog|Untranslated");
    }

    #[test]
    fn reserved_keywords_resolve_from_locale() {
        let mut catalog = french();
        catalog.insert(crate::catalog::CatalogEntry {
            msgid: "lang".to_string(),
            msgstr: "ignored".to_string(),
            comment: String::new(),
        });
        let out = translate("{{lang}} {{ langUC }} {{locale}}", &catalog, &Locale::from_code("pt_BR"), false);
        assert_eq!(out, "pt PT pt_BR");
    }

    #[test]
    fn escapes_quotes_when_asked() {
        let catalog = french();
        assert_eq!(translate("'{{Quote}}'", &catalog, &fr(), true), "'l\\'adresse \\\"IPv6\\\"'");
        assert_eq!(translate("{{Quote}}", &catalog, &fr(), false), "l'adresse \"IPv6\"");
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        assert_eq!(translate("{{Nested}}", &french(), &fr(), false), "{{Hello}}");
    }

    #[test]
    fn unterminated_marker_is_left_alone() {
        assert_eq!(translate("a {{Hello", &french(), &fr(), false), "a {{Hello");
    }

    #[test]
    fn no_break_space_is_kept_inside_markers() {
        let catalog = Catalog::parse(
            &catalog_text("fr_FR", &[("10\u{a0}km", "dix\u{a0}km")]),
            CatalogKind::Translation,
        )
        .unwrap();
        assert_eq!(translate("{{10\u{a0}km}}", &catalog, &fr(), false), "dix\u{a0}km");
        assert_eq!(translate("{{ 5\u{a0}\u{20ac} }}", &catalog, &fr(), false), "5\u{a0}\u{20ac}");
        assert_eq!(normalize("a \u{a0} b"), "a \u{a0} b");
    }

    #[test]
    fn markers_lists_harvestable_texts() {
        let found = markers("{{ Hello }} {{lang}} {{Your\nIPv6 address}} {{Hello}}");
        assert_eq!(found, vec!["Hello", "Your IPv6 address", "Hello"]);
    }
}
