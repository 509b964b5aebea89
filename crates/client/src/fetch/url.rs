//! URL resolution and comparison for intercepted requests.

use regex::Regex;
use url::Url;

/// Error type for URL resolution failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for precache_core::Error {
    fn from(err: UrlError) -> Self {
        precache_core::Error::InvalidUrl(err.to_string())
    }
}

/// Resolve a possibly relative URL against the gateway origin.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Join relative paths onto `origin`
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn resolve(origin: &Url, input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        parsed
            .set_host(Some(&lowered))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Whether two URLs share scheme, host and port.
pub fn is_same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Drop query parameters whose name matches any of `patterns`.
///
/// Returns the URL unchanged (including a bare `?`) when nothing matches.
pub fn strip_params(url: &Url, patterns: &[Regex]) -> Url {
    if patterns.is_empty() || url.query().is_none() {
        return url.clone();
    }

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let kept: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(name, _)| !patterns.iter().any(|p| p.is_match(name)))
        .collect();

    if kept.len() == pairs.len() {
        return url.clone();
    }

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    stripped
}
