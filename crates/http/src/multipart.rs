//! `multipart/form-data` decoding over a raw request (headers followed by body).
//!
//! The boundary is read from the `boundary=` parameter in the raw headers and the
//! body is split on `--<boundary>`. Plain parts become form fields, parts carrying a
//! `filename=` attribute are written to disk through a path template.
//!
//! Malformed or boundary-less input yields an empty result, never an error.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::utils::{random_token, sha256_hex, DEFAULT_TOKEN_LEN};

/// Default upper bound for a form field name or value
pub const DEFAULT_MAX_VALUE_LENGTH: usize = 512;

/// Default upper bound for the size of a single uploaded file
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 100_000_000;

/// An uploaded file written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    /// the form field name
    pub name: String,
    /// the reported file name with path separators stripped
    pub filename: String,
    /// where the content was written
    pub path: PathBuf,
    /// SHA-256 of the field name, as used for the `%h` placeholder
    pub hash: String,
    /// total size of all parts sharing this field name
    pub size: usize,
}

/// One part of a multipart body, split into its header block and content.
struct Part<'a> {
    headers: &'a [u8],
    content: &'a [u8],
}

/// Extracts the plain (non-file) fields of a multipart body.
///
/// Parts whose name or trimmed value is longer than `max_value_length` are skipped.
pub fn parse_multipart_fields(raw_request: &[u8], max_value_length: usize) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    for part in split_parts(raw_request) {
        if find(part.headers, b"filename=").is_some() {
            continue;
        }

        let Some(name) = find(part.headers, b"name=").and_then(|pos| quoted_value(&part.headers[pos..])) else {
            continue;
        };
        if name.len() > max_value_length || name.is_empty() {
            continue;
        }

        let value = trim(part.content);
        if value.len() > max_value_length {
            continue;
        }

        fields.insert(String::from_utf8_lossy(name).into_owned(), String::from_utf8_lossy(value).into_owned());
    }

    fields
}

/// Writes the file parts of a multipart body to disk and returns their records.
///
/// The destination path is derived from `path_template` by substituting, in this order,
/// `%f` with the field name, `%h` with the SHA-256 of the field name and `%r` with a fresh
/// random token. Each step runs over the output of the previous one, so a field name that
/// itself contains `%h` or `%r` is substituted again by the later steps.
///
/// Parts larger than `max_chunk_size` are skipped. Parts sharing a field name with an
/// earlier part only add their size to the earlier record; their content is not written.
pub fn parse_multipart_files(raw_request: &[u8], path_template: &str, max_chunk_size: usize) -> Vec<MultipartFile> {
    let mut files: Vec<MultipartFile> = Vec::new();

    for part in split_parts(raw_request) {
        let Some(filename) = file_name(part.headers) else {
            continue;
        };
        let Some(name) = field_name(part.headers) else {
            continue;
        };

        let data = trim(part.content);
        if data.is_empty() {
            continue;
        }
        if data.len() > max_chunk_size {
            debug!(field = %name, size = data.len(), max_chunk_size, "multipart file too large, skipped");
            continue;
        }

        if let Some(existing) = files.iter_mut().find(|file| file.name == name) {
            existing.size += data.len();
            continue;
        }

        let hash = sha256_hex(name.as_bytes());
        let path = PathBuf::from(expand_template(path_template, &name, &hash));

        if let Err(e) = write_file(&path, data) {
            warn!(cause = %e, path = %path.display(), "failed to write multipart file");
            continue;
        }

        files.push(MultipartFile { name, filename, path, hash, size: data.len() });
    }

    files
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let result = fs::File::create(path).and_then(|mut file| file.write_all(data));
    if result.is_err() {
        // remove whatever part of the file made it to disk
        let _ = fs::remove_file(path);
    }
    result
}

fn expand_template(template: &str, name: &str, hash: &str) -> String {
    let path = template.replace("%f", name);
    let path = path.replace("%h", hash);

    let mut pieces = path.split("%r");
    let mut expanded = pieces.next().unwrap_or_default().to_string();
    for piece in pieces {
        expanded.push_str(&random_token(DEFAULT_TOKEN_LEN));
        expanded.push_str(piece);
    }
    expanded
}

/// Reads the multipart boundary from the raw headers and returns the part delimiter `--<boundary>`.
fn delimiter(raw_request: &[u8]) -> Option<Vec<u8>> {
    const BOUNDARY: &[u8] = b"boundary=";

    let start = find(raw_request, BOUNDARY)? + BOUNDARY.len();
    let end = find(&raw_request[start..], b"\r\n")? + start;

    let boundary = trim(&raw_request[start..end]);
    let boundary = boundary.strip_prefix(b"\"").and_then(|b| b.strip_suffix(b"\"")).unwrap_or(boundary);
    if boundary.is_empty() {
        return None;
    }

    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary);
    Some(delimiter)
}

fn split_parts(raw_request: &[u8]) -> Vec<Part<'_>> {
    let Some(delimiter) = delimiter(raw_request) else {
        return Vec::new();
    };

    let mut parts = Vec::new();
    let mut rest = raw_request;
    let mut preamble = true;

    loop {
        let (token, next) = match find(rest, &delimiter) {
            Some(pos) => (&rest[..pos], Some(&rest[pos + delimiter.len()..])),
            None => (rest, None),
        };

        // everything before the first delimiter is the http head and preamble
        if !preamble && !token.is_empty() && !token.starts_with(b"--") {
            if let Some(header_end) = find(token, b"\r\n\r\n") {
                parts.push(Part { headers: &token[..header_end], content: &token[header_end + 4..] });
            }
        }
        preamble = false;

        match next {
            Some(next) => rest = next,
            None => break,
        }
    }

    parts
}

fn file_name(headers: &[u8]) -> Option<String> {
    const FILENAME: &[u8] = b"filename=";

    let pos = find(headers, FILENAME)?;
    if pos == 0 || !matches!(headers[pos - 1], b' ' | b';') {
        return None;
    }

    let filename: String =
        String::from_utf8_lossy(quoted_value(&headers[pos..])?).chars().filter(|c| !matches!(c, '/' | '\\')).collect();
    (!filename.is_empty()).then_some(filename)
}

fn field_name(headers: &[u8]) -> Option<String> {
    let pos = find(headers, b" name=").or_else(|| find(headers, b";name="))?;
    let name = quoted_value(&headers[pos..])?;
    (!name.is_empty()).then(|| String::from_utf8_lossy(name).into_owned())
}

/// Returns the text between the first pair of double quotes in `src`.
fn quoted_value(src: &[u8]) -> Option<&[u8]> {
    let start = src.iter().position(|b| *b == b'"')? + 1;
    let len = src[start..].iter().position(|b| *b == b'"')?;
    Some(&src[start..start + len])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn trim(src: &[u8]) -> &[u8] {
    let is_space = |b: &u8| matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c);
    let Some(start) = src.iter().position(|b| !is_space(b)) else {
        return &[];
    };
    let end = src.iter().rposition(|b| !is_space(b)).map_or(src.len(), |end| end + 1);
    &src[start..end]
}
