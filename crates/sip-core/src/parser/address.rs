//! Address parsing: `display-name <uri>`, bare `uri`, and the wildcard.

use crate::error::{Error, Result};
use crate::lexer::{is_token_char, Lexer};
use crate::parser::params::{parse_params, scan_delimiter, split_top_level};
use crate::parser::uri::parse_uri;
use crate::types::{Address, AddressKind, Params};

/// Parses one address element (no commas at top level). `base` is the byte
/// offset of `s` in the surrounding buffer.
pub fn parse_address(s: &str, base: usize) -> Result<Address> {
    let trimmed = s.trim();
    let base = base + (s.len() - s.trim_start().len());
    if trimmed.is_empty() {
        return Err(Error::parse(base, "empty address"));
    }

    // Contact wildcard: a lone '*', optionally with parameters.
    if trimmed == "*" {
        return Ok(Address::wildcard());
    }
    if let Some(rest) = trimmed.strip_prefix('*') {
        if let Some(params_str) = rest.trim_start().strip_prefix(';') {
            let mut addr = Address::wildcard();
            addr.params = parse_params(params_str, base)?;
            return Ok(addr);
        }
    }

    if let Some(langle) = scan_top_level_langle(trimmed) {
        // name-addr form: optional display name, then <uri>, then params.
        let display = trimmed[..langle].trim();
        let display_name = parse_display_name(display, base)?;
        let after_langle = &trimmed[langle + 1..];
        let rangle = after_langle
            .find('>')
            .ok_or_else(|| Error::parse(base + langle, "unterminated '<' in address"))?;
        let uri = parse_uri(after_langle[..rangle].trim(), base + langle + 1)?;
        let tail = after_langle[rangle + 1..].trim_start();
        let params = match tail.strip_prefix(';') {
            Some(param_str) => parse_params(param_str, base + langle + rangle + 2)?,
            None if tail.is_empty() => Params::new(),
            None => {
                return Err(Error::parse(
                    base + langle + rangle + 1,
                    format!("unexpected text after address: {tail:?}"),
                ));
            }
        };
        let mut addr = Address::name_addr(display_name, uri);
        addr.params = params;
        Ok(addr)
    } else {
        // addr-spec form: the URI runs to the first top-level ';'.
        let uri_end = scan_delimiter(trimmed, &[';']).unwrap_or(trimmed.len());
        let uri = parse_uri(trimmed[..uri_end].trim(), base)?;
        let mut addr = Address::new(uri);
        if uri_end < trimmed.len() {
            addr.params = parse_params(&trimmed[uri_end + 1..], base + uri_end + 1)?;
        }
        Ok(addr)
    }
}

/// Parses a comma-separated address list (Contact, Route, Record-Route).
pub fn parse_address_list(s: &str, base: usize) -> Result<Vec<Address>> {
    let mut addresses = Vec::new();
    let mut offset = 0usize;
    for piece in split_top_level(s, ',') {
        addresses.push(parse_address(piece, base + offset)?);
        offset += piece.len() + 1;
    }
    Ok(addresses)
}

/// Finds a `<` outside quotes. Unlike [`scan_delimiter`] this must not
/// skip bracketed content, since the bracket itself is the target.
fn scan_top_level_langle(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_display_name(display: &str, base: usize) -> Result<Option<String>> {
    if display.is_empty() {
        return Ok(None);
    }
    if display.starts_with('"') {
        let mut lexer = Lexer::new(display);
        let name = lexer.quoted_string()?;
        if !lexer.rest().trim().is_empty() {
            return Err(Error::parse(base, "trailing text after quoted display name"));
        }
        Ok(Some(name))
    } else {
        // Unquoted display names are a sequence of tokens.
        if !display
            .chars()
            .all(|c| is_token_char(c) || c == ' ' || c == '\t')
        {
            return Err(Error::parse(
                base,
                format!("invalid unquoted display name {display:?}"),
            ));
        }
        Ok(Some(display.to_string()))
    }
}
