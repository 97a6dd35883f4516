//! Shared `;name=value` parameter parsing and the delimiter scanner.
//!
//! Several headers carry parameter lists whose values may be quoted or
//! enclosed in angle brackets, both of which suppress delimiter
//! interpretation. A naive split-on-character breaks a Contact list like
//! `"Mr. Watson" <sip:watson@foo>;q=0.7,"Mr. Watson" <mailto:watson@foo>`,
//! so everything that slices header values goes through [`scan_delimiter`],
//! which tracks a small quote/bracket stack.

use crate::error::{Error, Result};
use crate::lexer::is_token_char;
use crate::types::Params;

/// Finds the byte index of the next top-level occurrence of any of
/// `delims` in `s`, ignoring content inside double quotes (with backslash
/// escapes) and inside `< >` brackets.
pub fn scan_delimiter(s: &str, delims: &[char]) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut bracket_depth = 0usize;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => bracket_depth += 1,
            '>' if !in_quotes => bracket_depth = bracket_depth.saturating_sub(1),
            c if !in_quotes && bracket_depth == 0 && delims.contains(&c) => return Some(i),
            _ => {}
        }
    }
    None
}

/// Splits `s` on top-level occurrences of `delim`, quote/bracket aware.
pub fn split_top_level<'a>(s: &'a str, delim: char) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut rest = s;
    loop {
        match scan_delimiter(rest, &[delim]) {
            Some(i) => {
                parts.push(&rest[..i]);
                rest = &rest[i + delim.len_utf8()..];
            }
            None => {
                parts.push(rest);
                return parts;
            }
        }
    }
}

/// Parses a `name[=value](;name[=value])*` list. `base` is the byte offset
/// of `s` in the surrounding buffer, used for error positions.
///
/// Values may be token runs, quoted strings (stored unescaped), or
/// `< >`-enclosed text (stored verbatim, brackets included). A duplicate
/// parameter name is a fatal parse error; no header type is exempt.
pub fn parse_params(s: &str, base: usize) -> Result<Params> {
    let mut params = Params::new();
    let mut offset = 0usize;
    for piece in split_top_level(s, ';') {
        let piece_base = base + offset;
        offset += piece.len() + 1;
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (name, value) = match scan_delimiter(trimmed, &['=']) {
            Some(eq) => {
                let name = trimmed[..eq].trim();
                let value = parse_param_value(trimmed[eq + 1..].trim(), piece_base)?;
                (name, Some(value))
            }
            None => (trimmed, None),
        };
        if name.is_empty() || !name.chars().all(is_token_char) {
            return Err(Error::parse(
                piece_base,
                format!("invalid parameter name {name:?}"),
            ));
        }
        if !params.try_insert(name, value) {
            return Err(Error::parse(
                piece_base,
                format!("duplicate parameter name {name:?}"),
            ));
        }
    }
    Ok(params)
}

fn parse_param_value(raw: &str, position: usize) -> Result<String> {
    if raw.starts_with('"') {
        let mut lexer = crate::lexer::Lexer::new(raw);
        let value = lexer.quoted_string().map_err(|_| {
            Error::parse(position, "unterminated quoted parameter value")
        })?;
        if !lexer.rest().trim().is_empty() {
            return Err(Error::parse(
                position,
                "trailing characters after quoted parameter value",
            ));
        }
        Ok(value)
    } else if raw.starts_with('<') {
        if !raw.ends_with('>') {
            return Err(Error::parse(
                position,
                "unterminated bracketed parameter value",
            ));
        }
        Ok(raw.to_string())
    } else {
        Ok(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_ignores_quoted_and_bracketed_content() {
        let s = r#""Mr. Watson" <sip:watson@foo;x=1>;q=0.7"#;
        let idx = scan_delimiter(s, &[';']).unwrap();
        assert_eq!(&s[idx..idx + 2], ";q");
    }

    #[test]
    fn split_contact_list_with_embedded_commas() {
        let s = r#""Watson, Mr." <sip:watson@foo>;q=0.7,"Mr. Watson" <mailto:watson@foo>;q=0.1"#;
        let parts = split_top_level(s, ',');
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("sip:watson@foo"));
        assert!(parts[1].contains("mailto:watson@foo"));
    }

    #[test]
    fn parses_flags_quoted_and_bracketed_values() {
        let params = parse_params(r#"lr;reason="gone home";uri=<sip:a@b;lr>"#, 0).unwrap();
        assert!(params.contains("lr"));
        assert_eq!(params.get("reason"), Some("gone home"));
        assert_eq!(params.get("uri"), Some("<sip:a@b;lr>"));
    }

    #[test]
    fn duplicate_parameter_name_is_fatal() {
        let err = parse_params("q=0.7;Q=0.1", 10).unwrap_err();
        match err {
            Error::Parse { position, message } => {
                assert!(message.contains("duplicate"));
                assert!(position >= 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_parameter_name_rejected() {
        assert!(parse_params("na me=1", 0).is_err());
    }
}
