use super::TokenError;
use crate::metrics;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Response headers that may carry the token directly, in priority order.
const TOKEN_HEADERS: [&str; 3] = ["x-token", "token", "x-auth-token"];

/// Run the bootstrap handshake for one channel.
///
/// `client` must not follow redirects; the token usually hides in the
/// `Location` of the first redirect.
pub async fn fetch_token(
    client: &Client,
    url: &Url,
    headers: HeaderMap,
    timeout: Duration,
) -> Result<String, TokenError> {
    debug!("Bootstrapping token from {}", url);

    let result = async {
        let response = client
            .get(url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await?;
        extract_token(response.status(), response.headers(), url)
    }
    .await;

    match &result {
        Ok(_) => metrics::record_token_bootstrap("ok"),
        Err(e) => {
            warn!("Token bootstrap from {} failed: {}", url, e);
            metrics::record_token_bootstrap("error");
        }
    }
    result
}

/// Pull the token out of a bootstrap response.
///
/// Header tokens win. Otherwise a redirect's `Location` (resolved against
/// `request_url`) must carry a `token` query parameter.
pub fn extract_token(
    status: StatusCode,
    headers: &HeaderMap,
    request_url: &Url,
) -> Result<String, TokenError> {
    if !(status.is_success() || status.is_redirection()) {
        return Err(TokenError::Status(status));
    }

    for name in TOKEN_HEADERS {
        if let Some(token) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            return Ok(token.to_string());
        }
    }

    let location = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(TokenError::Missing)?;
    let location = request_url
        .join(location)
        .map_err(|e| TokenError::InvalidUrl(format!("{location}: {e}")))?;

    location
        .query_pairs()
        .find(|(key, value)| key == "token" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
        .ok_or(TokenError::Missing)
}
