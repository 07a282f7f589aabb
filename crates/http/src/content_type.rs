//! File extension to MIME type lookup.

/// Returns the MIME type for `file_name` based on its extension,
/// falling back to `application/octet-stream`.
///
/// ```
/// use ember_http::content_type::content_type_for;
///
/// assert_eq!(content_type_for("index.html"), "text/html");
/// assert_eq!(content_type_for("README"), "application/octet-stream");
/// ```
pub fn content_type_for(file_name: &str) -> &'static str {
    mime_guess::from_path(file_name).first_raw().unwrap_or("application/octet-stream")
}
