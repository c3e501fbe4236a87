//! Affiliate redirect targets
//!
//! A visitor is sent to the affiliate base URL with the issued code in the `our_param`
//! query parameter. Other query parameters on the base URL are kept.

use crate::error::{MappingError, Result};
use url::Url;

/// Query parameter carrying the issued code
pub const CODE_QUERY_PARAM: &str = "our_param";

/// Parse an affiliate base URL, accepting only http and https
pub fn parse_base_url(base: &str) -> Result<Url> {
    let url = Url::parse(base).map_err(|e| {
        MappingError::config(format!("Invalid affiliate base URL '{}': {}", base, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(MappingError::config(format!(
            "Affiliate base URL must use http or https, got '{}'",
            other
        ))),
    }
}

/// Redirect target for `code`, replacing any `our_param` already on `base`
pub fn redirect_url(base: &str, code: &str) -> Result<Url> {
    let mut url = parse_base_url(base)?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| *name != CODE_QUERY_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(CODE_QUERY_PARAM, code);

    Ok(url)
}
