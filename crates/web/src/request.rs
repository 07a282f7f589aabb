//! The request handed to the application [`Handler`](crate::Handler).
//!
//! A [`Request`] is built once per connection from the framed [`RawRequest`] and is
//! read-only afterwards. Query parameters, cookies and url-encoded body fields are
//! decoded eagerly; multipart bodies are parsed on demand from the raw bytes.

use std::collections::HashMap;

use bytes::Bytes;
use ember_http::cookie::{parse_cookie_header, Cookie};
use ember_http::form::{decode_form_body, decode_query_string};
use ember_http::multipart::{parse_multipart_fields, parse_multipart_files, MultipartFile};
use ember_http::protocol::RawRequest;
use http::header::{CONTENT_TYPE, COOKIE, USER_AGENT};
use http::{HeaderMap, Method, Version};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::session::SessionMap;

#[derive(Debug, Clone)]
pub struct Request {
    endpoint: String,
    query: HashMap<String, String>,
    content_type: String,
    body: String,
    raw_body: Bytes,
    method: Method,
    client_address: String,
    user_agent: String,
    version: Version,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    session: SessionMap,
    session_id: String,
    fields: HashMap<String, String>,
}

impl Request {
    /// Builds a request from its framed form. `client_address` is the resolved address
    /// of the client, which may differ from the socket peer behind a proxy.
    pub fn from_raw(raw: RawRequest, client_address: impl Into<String>) -> Self {
        let (header, body, raw_body) = raw.into_parts();

        let uri = header.uri();
        let endpoint = uri.path().to_string();
        let query = uri.path_and_query().map(|pq| decode_query_string(pq.as_str())).unwrap_or_default();

        let content_type = header.header_str(CONTENT_TYPE).unwrap_or_default().to_string();
        let user_agent = header.header_str(USER_AGENT).unwrap_or_default().to_string();
        let cookies =
            header.headers().get_all(COOKIE).iter().filter_map(|v| v.to_str().ok()).flat_map(parse_cookie_header).collect();

        let body = String::from_utf8_lossy(&body).into_owned();
        let fields = decode_form_body(&body);

        let inner = header.into_inner();
        let (parts, ()) = inner.into_parts();

        Self {
            endpoint,
            query,
            content_type,
            body,
            raw_body,
            method: parts.method,
            client_address: client_address.into(),
            user_agent,
            version: parts.version,
            headers: parts.headers,
            cookies,
            session: SessionMap::new(),
            session_id: String::new(),
            fields,
        }
    }

    pub(crate) fn cookies_mut(&mut self) -> &mut Vec<Cookie> {
        &mut self.cookies
    }

    pub(crate) fn attach_session(&mut self, session_id: String, session: SessionMap) {
        self.session_id = session_id;
        self.session = session;
    }

    /// The request path without the query string.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// The declared `Content-Type`, empty if the header is missing.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The body as text, invalid UTF-8 replaced.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The request exactly as received, head and body.
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// The resolved session, empty without a valid session.
    pub fn session(&self) -> &SessionMap {
        &self.session
    }

    /// The resolved session id, empty without a valid session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The body decoded as `key=value` pairs joined by `&`, without percent-decoding.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Deserializes the url-encoded body into `T`, percent-decoding keys and values.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        serde_urlencoded::from_str(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// The plain fields of a `multipart/form-data` body.
    pub fn multipart_fields(&self, max_value_length: usize) -> HashMap<String, String> {
        parse_multipart_fields(&self.raw_body, max_value_length)
    }

    /// Writes the uploaded files of a `multipart/form-data` body to disk.
    ///
    /// See [`parse_multipart_files`] for the path template placeholders. The file IO runs
    /// on the blocking thread pool.
    pub async fn multipart_files(&self, path_template: impl Into<String>, max_chunk_size: usize) -> Vec<MultipartFile> {
        let raw = self.raw_body.clone();
        let template = path_template.into();
        match tokio::task::spawn_blocking(move || parse_multipart_files(&raw, &template, max_chunk_size)).await {
            Ok(files) => files,
            Err(e) => {
                warn!(cause = %e, "multipart upload task failed");
                Vec::new()
            }
        }
    }
}
