//! Origin request builder: outbound method, headers and timeouts.

use crate::config::Config;
use crate::profile::{EmbedPolicy, OriginProfile};
use crate::relay::classify::{BodyKind, shape_of};
use crate::relay::target::Target;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Per-fetch total timeouts. Connect timeout lives on the client itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub manifest: Duration,
    /// `None` lets large segment downloads run as long as they need.
    pub segment: Option<Duration>,
}

impl FetchTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            manifest: Duration::from_secs(config.manifest_timeout_secs),
            segment: (config.segment_timeout_secs > 0)
                .then(|| Duration::from_secs(config.segment_timeout_secs)),
        }
    }
}

/// One inbound relay request, ready to be turned into an origin fetch.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    pub target: Url,
    pub profile: Arc<OriginProfile>,
    pub range: Option<HeaderValue>,
    pub client_user_agent: Option<HeaderValue>,
}

impl RelayRequest {
    /// Capture the subset of inbound headers the relay may forward.
    pub fn new(method: Method, target: Target, inbound: &HeaderMap) -> Self {
        Self {
            method,
            target: target.url,
            profile: target.profile,
            range: inbound.get(header::RANGE).cloned(),
            client_user_agent: inbound.get(header::USER_AGENT).cloned(),
        }
    }

    /// Range goes upstream only for segment-shaped URLs.
    pub fn forwards_range(&self) -> bool {
        self.range.is_some() && shape_of(&self.target) == BodyKind::Binary
    }

    /// Headers for the origin fetch: profile headers, User-Agent, embed
    /// identity, then Range when `with_range` and allowed.
    pub fn headers(&self, with_range: bool) -> HeaderMap {
        let mut headers = profile_headers(&self.profile, self.client_user_agent.as_ref());

        if with_range
            && self.forwards_range()
            && let Some(range) = &self.range
        {
            headers.insert(header::RANGE, range.clone());
        }

        headers
    }

    pub fn build(&self, client: &Client, timeouts: &FetchTimeouts, with_range: bool) -> RequestBuilder {
        let builder = client
            .request(self.method.clone(), self.target.clone())
            .headers(self.headers(with_range));

        let timeout = if shape_of(&self.target) == BodyKind::Playlist {
            Some(timeouts.manifest)
        } else {
            timeouts.segment
        };

        match timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}

/// Headers a profile sends on every fetch, including token bootstraps.
pub fn profile_headers(profile: &OriginProfile, client_user_agent: Option<&HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &profile.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Skipping invalid header '{}' in profile '{}'", name, profile.id),
        }
    }

    let user_agent = match client_user_agent {
        Some(ua) if profile.forward_client_user_agent => Some(ua.clone()),
        _ => profile
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok()),
    };
    if let Some(ua) = user_agent {
        headers.insert(header::USER_AGENT, ua);
    }

    match &profile.embed {
        EmbedPolicy::Anonymous => {
            headers.remove(header::REFERER);
            headers.remove(header::ORIGIN);
        }
        EmbedPolicy::Embedded { referer, origin } => {
            if let Ok(referer) = HeaderValue::from_str(referer) {
                headers.insert(header::REFERER, referer);
            }
            if let Some(origin) = origin.as_deref().and_then(|o| HeaderValue::from_str(o).ok()) {
                headers.insert(header::ORIGIN, origin);
            }
        }
    }

    headers
}
