//! URL-encoded field decoding, percent-encoding and HTML entity escaping.
//!
//! These functions are stateless and never fail: malformed input degrades to an
//! empty or partially decoded result.

use std::collections::HashMap;

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Decodes an `application/x-www-form-urlencoded` style body into a map.
///
/// The body is split on `&`, and every segment on its first `=`. Segments without
/// `=` are dropped and a later duplicate key overwrites an earlier one. Keys and
/// values are returned as they appear; no percent-decoding is applied.
///
/// ```
/// use ember_http::form::decode_form_body;
///
/// let fields = decode_form_body("a=1&b=2&a=3");
/// assert_eq!(fields["a"], "3");
/// assert_eq!(fields["b"], "2");
/// ```
pub fn decode_form_body(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for segment in body.split('&') {
        if let Some((key, value)) = segment.split_once('=') {
            fields.insert(key.to_string(), value.to_string());
        }
    }
    fields
}

/// Decodes the query string of `url` (everything after the first `?`).
///
/// Returns an empty map when `url` has no query.
pub fn decode_query_string(url: &str) -> HashMap<String, String> {
    match url.split_once('?') {
        Some((_, query)) => decode_form_body(&format!("&{query}")),
        None => HashMap::new(),
    }
}

/// Everything except `[A-Za-z0-9._~-]` is percent-encoded.
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'~').remove(b'-');

/// Percent-encodes every byte outside `[A-Za-z0-9._~-]`.
pub fn url_encode(input: impl AsRef<[u8]>) -> String {
    percent_encode(input.as_ref(), URL_ENCODE_SET).to_string()
}

/// Percent-decodes `%XX` sequences into raw bytes.
///
/// A `%` that is not followed by two hex digits is kept as a literal character.
pub fn url_decode_bytes(input: &str) -> Vec<u8> {
    percent_decode_str(input).collect()
}

/// Percent-decodes `input`, replacing invalid UTF-8 in the result.
pub fn url_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

const HTML_ENTITIES: [(char, &str); 6] =
    [('&', "&amp;"), ('<', "&lt;"), ('>', "&gt;"), ('"', "&quot;"), ('\'', "&apos;"), ('\\', "&bsol;")];

/// Escapes `< > & " ' \` into their HTML entities in a single left-to-right pass.
pub fn html_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match HTML_ENTITIES.iter().find(|(raw, _)| *raw == c) {
            Some((_, entity)) => escaped.push_str(entity),
            None => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`html_escape`]. Unknown entities are left untouched.
pub fn html_unescape(input: &str) -> String {
    let mut unescaped = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('&') {
        unescaped.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match HTML_ENTITIES.iter().find(|(_, entity)| rest.starts_with(entity)) {
            Some((raw, entity)) => {
                unescaped.push(*raw);
                rest = &rest[entity.len()..];
            }
            None => {
                unescaped.push('&');
                rest = &rest[1..];
            }
        }
    }
    unescaped.push_str(rest);
    unescaped
}
