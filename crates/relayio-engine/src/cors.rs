//! Cross origin resource sharing for engine.io responses.
//!
//! [`cors_headers`] decides which headers a response gets from a [`CorsConfig`]
//! and the `Origin` of the request. Preflight `OPTIONS` requests are answered with a `204`.
//! ```rust
//! # use relayio_engine::cors::{CorsConfig, CorsOrigin, cors_headers};
//! # use http::HeaderValue;
//! let config = CorsConfig::default()
//!     .origin(CorsOrigin::List(vec!["https://example.com".into()]))
//!     .credentials(true);
//! let origin = HeaderValue::from_static("https://example.com");
//! let headers = cors_headers(&config, Some(&origin), false);
//! assert_eq!(headers["access-control-allow-origin"], "https://example.com");
//! ```
use std::time::Duration;

use http::{
    HeaderMap, HeaderName, HeaderValue, Method,
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
        ACCESS_CONTROL_MAX_AGE, VARY,
    },
};
use regex::Regex;

/// The origins allowed to reach the server.
#[derive(Debug, Clone, Default)]
pub enum CorsOrigin {
    /// Any origin, `*` unless credentials are allowed in which case the request origin is reflected
    #[default]
    Any,
    /// A single fixed origin, always sent as is
    Exact(String),
    /// The request origin is reflected if it is one of these
    List(Vec<String>),
    /// The request origin is reflected if it matches this pattern
    Regex(Regex),
    /// No cross origin header at all
    Disabled,
}

/// Cross origin settings of an engine.io server.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins
    pub origin: CorsOrigin,
    /// Methods allowed on preflight requests. Defaults to `GET` and `POST`.
    pub methods: Vec<Method>,
    /// Headers allowed on preflight requests
    pub allowed_headers: Vec<HeaderName>,
    /// Headers the client may read from the responses
    pub exposed_headers: Vec<HeaderName>,
    /// Allow cookies and authorization headers
    pub credentials: bool,
    /// How long a preflight answer may be cached
    pub max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: CorsOrigin::Any,
            methods: vec![Method::GET, Method::POST],
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            credentials: false,
            max_age: None,
        }
    }
}

impl CorsConfig {
    /// Set the allowed origins
    pub fn origin(mut self, origin: CorsOrigin) -> Self {
        self.origin = origin;
        self
    }
    /// Set the methods allowed on preflight requests
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }
    /// Set the headers allowed on preflight requests
    pub fn allowed_headers(mut self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        self.allowed_headers = headers.into_iter().collect();
        self
    }
    /// Set the headers exposed to the client
    pub fn exposed_headers(mut self, headers: impl IntoIterator<Item = HeaderName>) -> Self {
        self.exposed_headers = headers.into_iter().collect();
        self
    }
    /// Allow credentials
    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }
    /// Set the preflight cache duration
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Compute the cross origin headers of a response.
///
/// `preflight` adds the methods, allowed headers and max age answers of an `OPTIONS` request,
/// exposed headers are only set on other responses.
/// A request origin that is not allowed gets no `Access-Control-Allow-Origin` header.
pub fn cors_headers(
    config: &CorsConfig,
    request_origin: Option<&HeaderValue>,
    preflight: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let allow_origin = match (&config.origin, request_origin) {
        (CorsOrigin::Disabled, _) => return headers,
        (CorsOrigin::Any, Some(origin)) if config.credentials => {
            headers.insert(VARY, HeaderValue::from_static("Origin"));
            Some(origin.clone())
        }
        (CorsOrigin::Any, _) => Some(HeaderValue::from_static("*")),
        (CorsOrigin::Exact(origin), _) => {
            headers.insert(VARY, HeaderValue::from_static("Origin"));
            HeaderValue::from_str(origin).ok()
        }
        (CorsOrigin::List(list), Some(origin)) => {
            headers.insert(VARY, HeaderValue::from_static("Origin"));
            let allowed = origin
                .to_str()
                .is_ok_and(|o| list.iter().any(|allowed| allowed == o));
            allowed.then(|| origin.clone())
        }
        (CorsOrigin::Regex(re), Some(origin)) => {
            headers.insert(VARY, HeaderValue::from_static("Origin"));
            let allowed = origin.to_str().is_ok_and(|o| re.is_match(o));
            allowed.then(|| origin.clone())
        }
        (CorsOrigin::List(_) | CorsOrigin::Regex(_), None) => None,
    };

    let Some(allow_origin) = allow_origin else {
        return headers;
    };
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    if config.credentials {
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }

    if preflight {
        let methods = config.methods.iter().map(Method::as_str);
        if let Some(value) = join(methods) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        let allowed = config.allowed_headers.iter().map(HeaderName::as_str);
        if let Some(value) = join(allowed) {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }
        if let Some(max_age) = config.max_age {
            headers.insert(ACCESS_CONTROL_MAX_AGE, max_age.as_secs().into());
        }
    } else if let Some(value) = join(config.exposed_headers.iter().map(HeaderName::as_str)) {
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
    headers
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> Option<HeaderValue> {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        None
    } else {
        HeaderValue::from_str(&joined).ok()
    }
}
