//! Request descriptions handed to the transport.
//!
//! Callers describe *where* a request goes with an [`Endpoint`]; the
//! dispatcher validates it and freezes it, together with the method and body,
//! into an immutable [`RequestDescriptor`].

use crate::{Error, Result};
use core::fmt;
use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;

pub const CONTENT_TYPE: &str = "Content-Type";

/// Percent-encodes key/value pairs as `k1=v1&k2=v2`, in iteration order.
///
/// Encoding follows HTML form rules: reserved bytes become `%XX` and a space
/// becomes `+`. An empty collection encodes to an empty string.
pub fn urlencode<I, K, V>(args: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(args)
        .finish()
}

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body encoding of a POST request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Form,
}

impl ContentType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// Target address, query arguments and extra headers of a request.
///
/// # Example
/// ```
/// use netloop::Endpoint;
///
/// let endpoint = Endpoint::new("https://api.example.com/items")
///     .query("page", "2")
///     .header("Authorization", "Bearer token");
/// assert_eq!(endpoint.url(), "https://api.example.com/items");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Appends a query argument. Arguments are encoded in insertion order.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends a header sent with the request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolves the address and query string into an absolute `http(s)` URL.
    fn resolve(&self) -> Result<Url> {
        let base = self.url.trim();
        if base.is_empty() {
            return Err(Error::invalid_argument("target address cannot be empty"));
        }

        let qs = urlencode(self.query.iter().map(|(k, v)| (k, v)));
        let full = match (qs.is_empty(), base.contains('?')) {
            (true, _) => base.to_string(),
            (false, false) => format!("{base}?{qs}"),
            (false, true) => format!("{base}&{qs}"),
        };

        let url = Url::parse(&full)
            .map_err(|e| Error::invalid_argument(format!("invalid target address '{full}': {e}")))?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(Error::invalid_argument(format!(
                "target address '{full}' is not an http(s) URL"
            )));
        }
        Ok(url)
    }

    fn checked_headers(&self) -> Result<Vec<(String, String)>> {
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::invalid_argument(format!("invalid header name '{name}'")))?;
            HeaderValue::from_str(value).map_err(|_| {
                Error::invalid_argument(format!("invalid value for header '{name}'"))
            })?;
        }
        Ok(self.headers.clone())
    }
}

/// A validated, immutable request ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    url: Url,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<String>,
    content_type: Option<ContentType>,
}

impl RequestDescriptor {
    /// Describes a GET of `endpoint` with its query string appended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the address is empty or not a
    /// well-formed `http(s)` URL, or if a header cannot be sent as given.
    pub fn get(endpoint: &Endpoint) -> Result<Self> {
        Ok(Self {
            url: endpoint.resolve()?,
            method: Method::Get,
            headers: endpoint.checked_headers()?,
            body: None,
            content_type: None,
        })
    }

    /// Describes a POST of a JSON document. `None` is sent as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an invalid address.
    pub fn post_json(endpoint: &Endpoint, body: Option<&Value>) -> Result<Self> {
        let body = body.map_or_else(|| "{}".to_string(), Value::to_string);
        Self::post(endpoint, body, ContentType::Json)
    }

    /// Describes a POST of form-encoded fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an invalid address.
    pub fn post_form<I, K, V>(endpoint: &Endpoint, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::post(endpoint, urlencode(fields), ContentType::Form)
    }

    fn post(endpoint: &Endpoint, body: String, content_type: ContentType) -> Result<Self> {
        let url = endpoint.resolve()?;

        // The declared body encoding always wins over a caller-supplied one.
        let mut headers = endpoint.checked_headers()?;
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_TYPE));
        headers.push((CONTENT_TYPE.to_string(), content_type.as_str().to_string()));

        Ok(Self {
            url,
            method: Method::Post,
            headers,
            body: Some(body),
            content_type: Some(content_type),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }
}
