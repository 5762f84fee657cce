//! Cookie transport.
//!
//! The store never talks to an HTTP stack directly. It reads one named cookie
//! through [`RequestCookies`] and emits one [`Cookie`] through
//! [`ResponseCookies`]. Both are implemented for the `http` crate's
//! `HeaderMap`, `Request` and `Response`, which covers axum and hyper.
//! Building, rendering and parsing cookies is left to the `cookie` crate.

use cookie::time::{Duration, OffsetDateTime};
use cookie::{Cookie, CookieBuilder};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request, Response};

use crate::config::SessionOptions;
use crate::error::{Result, SessionError};

/// Cookie carrying `value` with the attributes from `options`.
///
/// `Expires` is set alongside `Max-Age` for clients that ignore the latter.
#[must_use]
pub fn session_cookie(
    name: impl Into<String>,
    value: impl Into<String>,
    options: &SessionOptions,
) -> Cookie<'static> {
    let max_age = Duration::seconds(options.max_age);
    let mut builder = with_options(Cookie::build((name.into(), value.into())), options).max_age(max_age);
    if let Some(expires) = OffsetDateTime::now_utc().checked_add(max_age) {
        builder = builder.expires(expires);
    }
    builder.build()
}

/// Empty cookie that makes the browser drop `name` immediately.
///
/// # Examples
///
/// ```
/// # use docstore_sessions::{SessionOptions, cookies::removal_cookie};
/// let header = removal_cookie("app", &SessionOptions::default()).to_string();
/// assert!(header.starts_with("app=;"));
/// assert!(header.contains("Max-Age=0"));
/// assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:01 GMT"));
/// ```
#[must_use]
pub fn removal_cookie(name: impl Into<String>, options: &SessionOptions) -> Cookie<'static> {
    with_options(Cookie::build((name.into(), String::new())), options)
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH + Duration::SECOND)
        .build()
}

fn with_options(mut builder: CookieBuilder<'static>, options: &SessionOptions) -> CookieBuilder<'static> {
    builder = builder.http_only(options.http_only).secure(options.secure);
    if !options.path.is_empty() {
        builder = builder.path(options.path.clone());
    }
    if let Some(domain) = options.domain.as_deref().filter(|domain| !domain.is_empty()) {
        builder = builder.domain(domain.to_string());
    }
    if let Some(same_site) = options.same_site {
        builder = builder.same_site(same_site);
    }
    builder
}

/// Read side of the HTTP collaborator.
pub trait RequestCookies {
    /// Value of the cookie called `name`, if the request carries one.
    fn cookie(&self, name: &str) -> Option<String>;
}

/// Write side of the HTTP collaborator.
pub trait ResponseCookies {
    /// Add `cookie` to the response.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CookieWrite`] if the cookie cannot be
    /// represented in the response.
    fn set_cookie(&mut self, cookie: &Cookie<'_>) -> Result<()>;
}

impl RequestCookies for HeaderMap {
    fn cookie(&self, name: &str) -> Option<String> {
        self.get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| Cookie::split_parse(header))
            .filter_map(std::result::Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value_trimmed().to_string())
    }
}

impl ResponseCookies for HeaderMap {
    fn set_cookie(&mut self, cookie: &Cookie<'_>) -> Result<()> {
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| SessionError::CookieWrite(e.to_string()))?;
        self.append(SET_COOKIE, value);
        Ok(())
    }
}

impl<B> RequestCookies for Request<B> {
    fn cookie(&self, name: &str) -> Option<String> {
        self.headers().cookie(name)
    }
}

impl<B> ResponseCookies for Response<B> {
    fn set_cookie(&mut self, cookie: &Cookie<'_>) -> Result<()> {
        self.headers_mut().set_cookie(cookie)
    }
}

impl ResponseCookies for Vec<Cookie<'static>> {
    fn set_cookie(&mut self, cookie: &Cookie<'_>) -> Result<()> {
        self.push(cookie.clone().into_owned());
        Ok(())
    }
}
