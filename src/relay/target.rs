//! Turning relay query parameters into a concrete target URL and profile.

use crate::error::{RelayError, Result};
use crate::profile::{OriginProfile, ProfileTable};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

/// Percent-decoding passes tolerated for clients that double-encode `url`.
const MAX_DECODE_PASSES: usize = 3;

/// Query parameters accepted by the relay endpoint.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RelayParams {
    pub url: Option<String>,
    /// Profile key. A hint when `url` is given, otherwise the base for `path`.
    pub domain: Option<String>,
    pub path: Option<String>,
}

/// A resolved relay target. Not yet checked by the allow-list guard.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    pub profile: Arc<OriginProfile>,
}

impl RelayParams {
    /// Resolve the target URL and the origin profile that will fetch it.
    pub fn resolve(&self, profiles: &ProfileTable) -> Result<Target> {
        if let Some(raw) = non_empty(self.url.as_deref()) {
            let url = parse_target_url(raw)?;
            let profile = profiles.resolve(
                non_empty(self.domain.as_deref()),
                url.host_str().unwrap_or_default(),
            )?;
            return Ok(Target { url, profile });
        }

        let Some(domain) = non_empty(self.domain.as_deref()) else {
            return Err(RelayError::MissingParameter("url"));
        };

        let profile = profiles
            .get(domain)
            .ok_or_else(|| RelayError::UnknownProfile(domain.to_string()))?;
        let base = profile.base_url.as_ref().ok_or_else(|| {
            RelayError::InvalidTarget(format!("profile '{domain}' has no base URL for paths"))
        })?;
        let path = non_empty(self.path.as_deref()).ok_or(RelayError::MissingParameter("path"))?;

        let url = base
            .join(path.trim_start_matches('/'))
            .map_err(|e| RelayError::InvalidTarget(format!("{path}: {e}")))?;

        Ok(Target { url, profile })
    }
}

/// Parse an absolute target URL, undoing up to [`MAX_DECODE_PASSES`] layers
/// of percent-encoding.
pub fn parse_target_url(raw: &str) -> Result<Url> {
    let mut candidate = raw.trim().to_string();

    for pass in 0..MAX_DECODE_PASSES {
        if let Ok(url) = Url::parse(&candidate) {
            return Ok(url);
        }
        if pass + 1 == MAX_DECODE_PASSES || !candidate.contains('%') {
            break;
        }
        candidate = urlencoding::decode(&candidate)
            .map_err(|_| RelayError::InvalidTarget(raw.to_string()))?
            .into_owned();
    }

    Err(RelayError::InvalidTarget(raw.to_string()))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
