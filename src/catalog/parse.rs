//! Paragraph parser for the catalog file format.
//!
//! A catalog file is a sequence of paragraphs separated by one blank line.
//! Inside a paragraph every line is either `token value` or a bare quoted
//! continuation line that is appended to the previous token's value:
//!
//! ```text
//! #: faq_whyipv6.html
//! msgid ""
//! "Note this is in addition to any NAT "
//! "you do at home."
//! msgstr "Bitte beachten Sie ..."
//! ```
//!
//! Quoted values use backslash escapes (`\n`, `\t`, `\"`, `\\`, `\xNN`,
//! `\uNNNN`, `\UNNNNNNNN`, three-digit octal). Unquoted values are kept
//! verbatim, which is how plain `#: file.html` comments come through.

use super::{Catalog, CatalogEntry, CatalogKind};
use std::collections::{BTreeMap, HashMap};
use std::str::Chars;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("expected at least two blank-line separated paragraphs, found {0}")]
    TooFewParagraphs(usize),
    #[error("missing header paragraph (empty msgid)")]
    MissingHeader,
    #[error("missing `Language:` header")]
    MissingLanguage,
    #[error("line {line}: {reason}")]
    BadString { line: usize, reason: String },
}

/// Parse the full text of a catalog file.
pub(crate) fn parse_catalog(text: &str, kind: CatalogKind) -> Result<Catalog, FormatError> {
    let text = text.replace("\r\n", "\n");
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    if paragraphs.len() < 2 {
        return Err(FormatError::TooFewParagraphs(paragraphs.len()));
    }

    let mut catalog = Catalog::default();
    let mut header: Option<String> = None;
    let mut line = 1;

    for paragraph in paragraphs {
        let mut fields = parse_paragraph(paragraph, line)?;
        line += paragraph.matches('\n').count() + 2;

        let msgid = fields.remove("msgid").unwrap_or_default();
        let msgstr = fields.remove("msgstr").unwrap_or_default();
        if msgid.is_empty() {
            if !msgstr.is_empty() {
                header = Some(msgstr);
            }
            continue;
        }
        catalog.insert(CatalogEntry {
            msgid,
            msgstr,
            comment: fields.remove("#:").unwrap_or_default(),
        });
    }

    let header = header.ok_or(FormatError::MissingHeader)?;
    catalog.headers = parse_headers(&header);
    catalog.language = catalog.headers.get("Language").cloned().unwrap_or_default();
    if catalog.language.is_empty() && kind == CatalogKind::Translation {
        return Err(FormatError::MissingLanguage);
    }
    Ok(catalog)
}

/// Split one paragraph into token → value, folding continuation lines.
///
/// `first_line` is the 1-based line number of the paragraph within the file,
/// used only for error messages.
fn parse_paragraph(paragraph: &str, first_line: usize) -> Result<HashMap<String, String>, FormatError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut token = String::new();

    for (offset, raw) in paragraph.lines().enumerate() {
        if raw.is_empty() {
            continue;
        }
        let rest = if raw.starts_with('"') {
            raw
        } else {
            let (key, rest) = raw.split_once(' ').unwrap_or((raw, ""));
            token = key.to_string();
            rest.trim_start()
        };
        let value = if rest.starts_with('"') {
            unquote(rest.trim_end()).map_err(|reason| FormatError::BadString {
                line: first_line + offset,
                reason,
            })?
        } else {
            rest.to_string()
        };
        fields.entry(token.clone()).or_default().push_str(&value);
    }
    Ok(fields)
}

/// Parse the header paragraph's `Key: value` lines.
fn parse_headers(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Remove the surrounding quotes of a string literal and resolve escapes.
///
/// `\xNN` and octal escapes produce raw bytes, so a multi-byte character may
/// be spelled as a run of them; the decoded bytes must form valid UTF-8.
pub(crate) fn unquote(quoted: &str) -> Result<String, String> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| format!("not a quoted string: {quoted}"))?;

    let mut out: Vec<u8> = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Err(format!("unescaped quote in {quoted}")),
            '\\' => {
                let escape = chars
                    .next()
                    .ok_or_else(|| format!("dangling backslash in {quoted}"))?;
                match escape {
                    'a' => out.push(0x07),
                    'b' => out.push(0x08),
                    'f' => out.push(0x0C),
                    'n' => out.push(b'\n'),
                    'r' => out.push(b'\r'),
                    't' => out.push(b'\t'),
                    'v' => out.push(0x0B),
                    '\\' | '"' | '\'' => push_char(&mut out, escape),
                    'x' => out.push(to_byte(digits(&mut chars, 2, 16)?)?),
                    'u' => push_char(&mut out, read_char(&mut chars, 4)?),
                    'U' => push_char(&mut out, read_char(&mut chars, 8)?),
                    '0'..='7' => {
                        let tail: String = chars.by_ref().take(2).collect();
                        out.push(to_byte(number(&format!("{escape}{tail}"), 3, 8)?)?);
                    }
                    other => return Err(format!("unknown escape \\{other} in {quoted}")),
                }
            }
            _ => push_char(&mut out, c),
        }
    }
    String::from_utf8(out).map_err(|_| format!("escapes in {quoted} are not valid UTF-8"))
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn digits(chars: &mut Chars<'_>, count: usize, radix: u32) -> Result<u32, String> {
    let code: String = chars.by_ref().take(count).collect();
    number(&code, count, radix)
}

fn number(code: &str, count: usize, radix: u32) -> Result<u32, String> {
    if code.len() != count {
        return Err(format!("short escape sequence `{code}`"));
    }
    u32::from_str_radix(code, radix).map_err(|e| format!("bad escape `{code}`: {e}"))
}

fn to_byte(value: u32) -> Result<u8, String> {
    u8::try_from(value).map_err(|_| format!("escape value {value:#o} is not a byte"))
}

fn read_char(chars: &mut Chars<'_>, count: usize) -> Result<char, String> {
    let value = digits(chars, count, 16)?;
    char::from_u32(value).ok_or_else(|| format!("invalid code point {value:#x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "msgid \"\"\nmsgstr \"\"\n\"Language: fr_FR\\n\"\n\"Content-Type: text/plain; charset=UTF-8\\n\"\n";

    #[test]
    fn unquote_plain_and_escaped() {
        assert_eq!(unquote(r#""hello""#).unwrap(), "hello");
        assert_eq!(unquote(r#""a\"b""#).unwrap(), "a\"b");
        assert_eq!(unquote(r#""line\nnext\ttab""#).unwrap(), "line\nnext\ttab");
        assert_eq!(unquote(r#""back\\slash""#).unwrap(), "back\\slash");
        assert_eq!(unquote(r#""\x41\u00e9\101""#).unwrap(), "AéA");
    }

    #[test]
    fn byte_escapes_decode_as_utf8() {
        assert_eq!(unquote(r#""caf\xc3\xa9""#).unwrap(), "café");
        assert_eq!(unquote(r#""caf\303\251""#).unwrap(), "café");
        assert_eq!(unquote(r#""\U0001F600""#).unwrap(), "\u{1F600}");
        assert!(unquote(r#""caf\xc3""#).is_err());
        assert!(unquote(r#""\777""#).is_err());
    }

    #[test]
    fn unquote_rejects_malformed() {
        assert!(unquote("hello").is_err());
        assert!(unquote("\"").is_err());
        assert!(unquote(r#""a"b""#).is_err());
        assert!(unquote(r#""dangling\""#).is_err());
        assert!(unquote(r#""\q""#).is_err());
        assert!(unquote(r#""\x4""#).is_err());
    }

    #[test]
    fn parses_entries_and_header() {
        let text = format!(
            "{HEADER}\n#: index.html\nmsgid \"Hello\"\nmsgstr \"Bonjour\"\n\nmsgid \"Bye\"\nmsgstr \"\"\n"
        );
        let catalog = parse_catalog(&text, CatalogKind::Translation).unwrap();

        assert_eq!(catalog.language, "fr_FR");
        assert_eq!(
            catalog.headers.get("Content-Type").map(String::as_str),
            Some("text/plain; charset=UTF-8")
        );
        assert_eq!(catalog.len(), 2);
        let hello = catalog.get("Hello").unwrap();
        assert_eq!(hello.msgstr, "Bonjour");
        assert_eq!(hello.comment, "index.html");
        assert_eq!(catalog.get("Bye").unwrap().msgstr, "");
    }

    #[test]
    fn continuation_lines_are_appended() {
        let text = format!(
            "{HEADER}\nmsgid \"\"\n\"Note this is in addition \"\n\"to any NAT.\"\nmsgstr \"\"\n\"Zusätzlich \"\n\"zu NAT.\"\n"
        );
        let catalog = parse_catalog(&text, CatalogKind::Translation).unwrap();

        let entry = catalog.get("Note this is in addition to any NAT.").unwrap();
        assert_eq!(entry.msgstr, "Zusätzlich zu NAT.");
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let text = format!("{HEADER}\nmsgid \"Hello\"\nmsgstr \"Salut\"\n").replace('\n', "\r\n");
        let catalog = parse_catalog(&text, CatalogKind::Translation).unwrap();
        assert_eq!(catalog.translation("Hello"), Some("Salut"));
    }

    #[test]
    fn single_paragraph_is_format_error() {
        let result = parse_catalog(HEADER, CatalogKind::Reference);
        assert_eq!(result.unwrap_err(), FormatError::TooFewParagraphs(1));
    }

    #[test]
    fn missing_header_is_format_error() {
        let text = "msgid \"Hello\"\nmsgstr \"\"\n\nmsgid \"Bye\"\nmsgstr \"\"\n";
        let result = parse_catalog(text, CatalogKind::Reference);
        assert_eq!(result.unwrap_err(), FormatError::MissingHeader);
    }

    #[test]
    fn language_required_only_for_translations() {
        let text = "msgid \"\"\nmsgstr \"Project-Id-Version: site\\n\"\n\nmsgid \"Hello\"\nmsgstr \"\"\n";

        let reference = parse_catalog(text, CatalogKind::Reference).unwrap();
        assert_eq!(reference.language, "");
        assert_eq!(reference.len(), 1);

        let result = parse_catalog(text, CatalogKind::Translation);
        assert_eq!(result.unwrap_err(), FormatError::MissingLanguage);
    }

    #[test]
    fn bad_escape_reports_line() {
        let text = format!("{HEADER}\nmsgid \"Hello\"\nmsgstr \"bad \\q\"\n");
        match parse_catalog(&text, CatalogKind::Translation) {
            Err(FormatError::BadString { line, .. }) => assert_eq!(line, 7),
            other => panic!("expected BadString, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_msgid_keeps_one_entry() {
        let text = format!(
            "{HEADER}\nmsgid \"Hello\"\nmsgstr \"Salut\"\n\nmsgid \"Hello\"\nmsgstr \"Bonjour\"\n"
        );
        let catalog = parse_catalog(&text, CatalogKind::Translation).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.translation("Hello"), Some("Bonjour"));
    }
}
