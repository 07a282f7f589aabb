//! The response a handler returns.
//!
//! Besides status, body and headers, a [`Response`] carries the side effects the server
//! applies on the handler's behalf: cookies to set and delete, session updates, a
//! redirect, and the request to stop the server once this response is written.
//!
//! ```
//! use ember_http::cookie::Cookie;
//! use ember_web::Response;
//! use http::StatusCode;
//!
//! let response = Response::new()
//!     .status(StatusCode::CREATED)
//!     .body(r#"{"ok":true}"#)
//!     .cookie(Cookie::new("theme", "dark"))
//!     .session("user", "ada");
//!
//! assert_eq!(response.status_code(), StatusCode::CREATED);
//! assert_eq!(response.content_type_value(), "application/json");
//! ```

use bytes::Bytes;
use ember_http::cookie::{serialize_delete_cookie, serialize_set_cookie, Cookie};
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::session::SessionMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectKind {
    /// 307, the client keeps method and body
    #[default]
    Temporary,
    /// 301
    Permanent,
}

impl RedirectKind {
    pub fn status(self) -> StatusCode {
        match self {
            RedirectKind::Temporary => StatusCode::TEMPORARY_REDIRECT,
            RedirectKind::Permanent => StatusCode::MOVED_PERMANENTLY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    body: Bytes,
    content_type: String,
    allow_origin: String,
    stop_server: bool,
    cookies: Vec<Cookie>,
    delete_cookies: Vec<String>,
    session: SessionMap,
    redirect: Option<(String, RedirectKind)>,
    headers: Vec<(String, String)>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::new(),
            content_type: mime::APPLICATION_JSON.to_string(),
            allow_origin: "*".to_string(),
            stop_server: false,
            cookies: Vec::new(),
            delete_cookies: Vec::new(),
            session: SessionMap::new(),
            redirect: None,
            headers: Vec::new(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `text/plain` response.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::new().body(body).content_type(mime::TEXT_PLAIN_UTF_8.as_ref())
    }

    /// A response whose body is `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new().body(serde_json::to_vec(value)?))
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets `Access-Control-Allow-Origin`, `*` by default.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allow_origin = origin.into();
        self
    }

    /// Stops the whole server after this response has been written.
    pub fn stop_server(mut self) -> Self {
        self.stop_server = true;
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn delete_cookie(mut self, name: impl Into<String>) -> Self {
        self.delete_cookies.push(name.into());
        self
    }

    /// Sets `key` in the session of this request, creating the session if needed.
    pub fn session(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session.insert(key.into(), value.into());
        self
    }

    /// Redirects with `307 Temporary Redirect`, replacing the status.
    pub fn redirect(self, location: impl Into<String>) -> Self {
        self.redirect_with(location, RedirectKind::Temporary)
    }

    /// Redirects with `301 Moved Permanently`, replacing the status.
    pub fn permanent_redirect(self, location: impl Into<String>) -> Self {
        self.redirect_with(location, RedirectKind::Permanent)
    }

    pub fn redirect_with(mut self, location: impl Into<String>, kind: RedirectKind) -> Self {
        self.redirect = Some((location.into(), kind));
        self
    }

    /// Adds a header. A later header with the same name replaces an earlier one, and
    /// `Content-Type` and `Access-Control-Allow-Origin` always come from their own setters.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type_value(&self) -> &str {
        &self.content_type
    }

    pub fn allow_origin_value(&self) -> &str {
        &self.allow_origin
    }

    pub fn stops_server(&self) -> bool {
        self.stop_server
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn delete_cookies(&self) -> &[String] {
        &self.delete_cookies
    }

    pub fn session_updates(&self) -> &SessionMap {
        &self.session
    }

    pub fn redirect_target(&self) -> Option<(&str, RedirectKind)> {
        self.redirect.as_ref().map(|(location, kind)| (location.as_str(), *kind))
    }

    pub(crate) fn push_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub(crate) fn push_delete_cookie(&mut self, name: String) {
        self.delete_cookies.push(name);
    }

    /// Renders the wire response.
    ///
    /// Header order: `Set-Cookie` for every set cookie, then for every deleted cookie,
    /// then `Location`, the custom headers, `Content-Type` and `Access-Control-Allow-Origin`.
    /// Values that are not valid header text are dropped with a warning.
    pub fn into_http(self) -> http::Response<Bytes> {
        let status = self.redirect.as_ref().map_or(self.status, |(_, kind)| kind.status());

        let mut response = http::Response::new(self.body);
        *response.status_mut() = status;
        let headers = response.headers_mut();

        let set_cookies = self.cookies.iter().filter_map(serialize_set_cookie);
        let delete_cookies = self.delete_cookies.iter().map(|name| serialize_delete_cookie(name));
        for value in set_cookies.chain(delete_cookies) {
            match HeaderValue::try_from(value) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => warn!(cause = %e, "dropping cookie that is not valid header text"),
            }
        }

        if let Some((location, _)) = &self.redirect {
            match HeaderValue::try_from(location.as_str()) {
                Ok(value) => {
                    headers.insert(LOCATION, value);
                }
                Err(e) => warn!(cause = %e, "dropping invalid redirect location"),
            }
        }

        for (name, value) in &self.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "dropping invalid header"),
            }
        }

        for (name, value) in [(CONTENT_TYPE, &self.content_type), (ACCESS_CONTROL_ALLOW_ORIGIN, &self.allow_origin)] {
            match HeaderValue::try_from(value.as_str()) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!(header = %name, "dropping invalid header"),
            }
        }

        response
    }
}

impl From<&'static str> for Response {
    fn from(body: &'static str) -> Self {
        Self::new().body(body)
    }
}

impl From<String> for Response {
    fn from(body: String) -> Self {
        Self::new().body(body)
    }
}

impl From<StatusCode> for Response {
    fn from(status: StatusCode) -> Self {
        Self::new().status(status)
    }
}
