//! Cookie parsing and `Set-Cookie` serialization.
//!
//! Request cookies are parsed from the `Cookie` header into [`Cookie`] records.
//! Response cookies are serialized with a fixed attribute order:
//! `name=value; Expires; HttpOnly; Secure; Path; Domain; SameSite; attributes; extra attributes`.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";
const LATEST_HTTP_DATE: &str = "Fri, 31 Dec 9999 23:59:59 GMT";
/// first second of the year 10000
const LATEST_HTTP_DATE_LIMIT: Duration = Duration::from_secs(253_402_300_800);

/// The `SameSite` cookie policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }

    /// Parses one of the three canonical tokens, case-sensitively.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "Strict" => Some(SameSite::Strict),
            "Lax" => Some(SameSite::Lax),
            "None" => Some(SameSite::None),
            _ => None,
        }
    }
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a cookie expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// No explicit expiry; the cookie lives for the browser session.
    #[default]
    Session,
    At(SystemTime),
}

impl Expiry {
    /// Builds an expiry from unix milliseconds: `0` means session scoped and any
    /// negative value means the epoch.
    pub fn from_unix_millis(millis: i64) -> Self {
        match millis {
            0 => Expiry::Session,
            m if m < 0 => Expiry::At(UNIX_EPOCH),
            m => Expiry::At(
                UNIX_EPOCH
                    .checked_add(Duration::from_millis(m.unsigned_abs()))
                    .unwrap_or(UNIX_EPOCH + LATEST_HTTP_DATE_LIMIT),
            ),
        }
    }
}

/// A cookie, either received in a request or to be set by a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: Expiry,
    pub path: String,
    pub domain: String,
    pub same_site: Option<SameSite>,
    pub http_only: bool,
    pub secure: bool,
    /// free-form attributes emitted verbatim, in order
    pub attributes: Vec<String>,
    /// `key=value` attributes emitted after the free-form ones
    pub extra_attributes: BTreeMap<String, String>,
}

impl Cookie {
    /// Creates a session cookie scoped to `/` with `SameSite=Strict`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: Expiry::Session,
            path: "/".to_string(),
            domain: String::new(),
            same_site: Some(SameSite::Strict),
            http_only: false,
            secure: false,
            attributes: Vec::new(),
            extra_attributes: BTreeMap::new(),
        }
    }

    pub fn expires(mut self, expires: Expiry) -> Self {
        self.expires = expires;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.push(attribute.into());
        self
    }

    pub fn extra_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_attributes.insert(key.into(), value.into());
        self
    }
}

/// Parses a `Cookie` request header value.
///
/// The value is split on `;`, each segment on its first `=`, and one leading space is
/// trimmed from the name. Segments with an empty name or value are dropped.
pub fn parse_cookie_header(header_value: &str) -> Vec<Cookie> {
    header_value
        .split(';')
        .filter_map(|segment| {
            let (name, value) = segment.split_once('=')?;
            let name = name.strip_prefix(' ').unwrap_or(name);
            (!name.is_empty() && !value.is_empty()).then(|| Cookie::new(name, value))
        })
        .collect()
}

fn http_date(time: SystemTime) -> String {
    // httpdate only represents the years 1970 to 9999
    match time.duration_since(UNIX_EPOCH) {
        Err(_) => EPOCH_HTTP_DATE.to_string(),
        Ok(since_epoch) if since_epoch >= LATEST_HTTP_DATE_LIMIT => LATEST_HTTP_DATE.to_string(),
        Ok(_) => httpdate::fmt_http_date(time),
    }
}

/// Serializes `cookie` as a `Set-Cookie` header value.
///
/// Returns `None` for a cookie with an empty name or value, which is never emitted.
pub fn serialize_set_cookie(cookie: &Cookie) -> Option<String> {
    if cookie.name.is_empty() || cookie.value.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(64);
    // writing into a String can't fail
    let _ = write!(out, "{}={}; ", cookie.name, cookie.value);

    match cookie.expires {
        Expiry::At(time) => {
            let _ = write!(out, "Expires={}; ", http_date(time));
        }
        Expiry::Session => out.push_str("Expires=session; "),
    }
    if cookie.http_only {
        out.push_str("HttpOnly; ");
    }
    if cookie.secure {
        out.push_str("Secure; ");
    }
    if !cookie.path.is_empty() {
        let _ = write!(out, "Path={}; ", cookie.path);
    }
    if !cookie.domain.is_empty() {
        let _ = write!(out, "Domain={}; ", cookie.domain);
    }
    if let Some(same_site) = cookie.same_site {
        let _ = write!(out, "SameSite={same_site}; ");
    }
    for attribute in &cookie.attributes {
        let _ = write!(out, "{attribute}; ");
    }
    for (key, value) in &cookie.extra_attributes {
        let _ = write!(out, "{key}={value}; ");
    }

    Some(out)
}

/// Serializes a `Set-Cookie` value that deletes cookie `name`.
///
/// The deletion always targets `Path=/`, whatever path the cookie was set with.
pub fn serialize_delete_cookie(name: &str) -> String {
    format!("{name}=; Expires={EPOCH_HTTP_DATE}; Max-Age=0; Path=/; ")
}
