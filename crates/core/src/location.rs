//! Parsing of URLs announced in `Location` headers or recovered from the cache.

/// Error type for URL parsing failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for crate::Error {
    fn from(err: UrlError) -> Self {
        crate::Error::InvalidUrl(err.to_string())
    }
}

/// Parse an absolute http(s) URL.
///
/// Unlike a user-typed address, a header value is never given a default
/// scheme: relative or scheme-less values are rejected. Leading and trailing
/// whitespace is ignored. The host is lowercased by the parser.
pub fn parse_absolute(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = url::Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::InvalidUrl("missing host".into()));
    }

    Ok(parsed)
}

/// Parse a URL stored as a cache value.
///
/// The value must be UTF-8 and no longer than `max_len` bytes.
pub fn parse_recorded(value: &[u8], max_len: usize) -> Result<url::Url, UrlError> {
    if value.len() > max_len {
        return Err(UrlError::InvalidUrl(format!("{} bytes exceeds {max_len}", value.len())));
    }
    let text = std::str::from_utf8(value).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    parse_absolute(text)
}
