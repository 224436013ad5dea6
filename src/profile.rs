//! Origin profiles: per-origin header quirks and host ownership.
//!
//! Each third-party origin expects a slightly different request shape
//! (User-Agent, Referer/Origin of the embedding site, Accept values). A
//! profile captures that shape once; the relay picks a profile per request
//! from an explicit hint or from the target hostname, falling back to
//! [`GENERIC_PROFILE_ID`].

use crate::error::{RelayError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Id of the fallback browser profile used for unknown origins.
pub const GENERIC_PROFILE_ID: &str = "generic";

/// Desktop Chrome on Windows, accepted by most origins.
pub const CHROME_WINDOWS_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Desktop Chrome on macOS, matching the embed pages of the live-TV origin.
pub const CHROME_MAC_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

const HLS_ACCEPT: &str = "application/vnd.apple.mpegurl, application/x-mpegURL, */*";
const HLS_OR_BINARY_ACCEPT: &str =
    "application/vnd.apple.mpegurl, application/x-mpegURL, application/octet-stream, */*";

/// A host allow-list entry: either an exact hostname or `*.suffix`.
///
/// `*.example.com` matches `example.com` itself and any subdomain at a label
/// boundary. It never matches `badexample.com`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum HostPattern {
    Exact(String),
    Suffix(String),
}

impl HostPattern {
    /// Parse a pattern string (`host` or `*.suffix`).
    pub fn parse(pattern: &str) -> Self {
        let pattern = normalize_host(pattern);
        match pattern.strip_prefix("*.") {
            Some(suffix) => HostPattern::Suffix(suffix.to_string()),
            None => HostPattern::Exact(pattern),
        }
    }

    /// Whether an already-normalized hostname matches this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(exact) => host == exact,
            HostPattern::Suffix(suffix) => {
                if host == suffix {
                    return true;
                }
                host.len() > suffix.len()
                    && host.ends_with(suffix.as_str())
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
            }
        }
    }
}

impl From<String> for HostPattern {
    fn from(value: String) -> Self {
        HostPattern::parse(&value)
    }
}

/// Lowercase a hostname and drop a single trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase()
}

/// How the relay presents itself to the origin's anti-hotlink checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedPolicy {
    /// No Referer or Origin header at all. Some CDNs reject any foreign Referer.
    #[default]
    Anonymous,
    /// Pretend to be embedded in the origin's expected site.
    Embedded {
        referer: String,
        #[serde(default)]
        origin: Option<String>,
    },
}

/// Channel URL templates for `/channel/{profile}/{channel}`.
///
/// Both templates substitute `{channel}`. When `bootstrap_url` is set the
/// manifest is token-gated and the bootstrap handshake runs first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelTemplate {
    pub manifest_url: String,
    #[serde(default)]
    pub bootstrap_url: Option<String>,
}

impl ChannelTemplate {
    pub fn manifest_for(&self, channel: &str) -> String {
        self.manifest_url.replace("{channel}", channel)
    }

    pub fn bootstrap_for(&self, channel: &str) -> Option<String> {
        self.bootstrap_url
            .as_ref()
            .map(|template| template.replace("{channel}", channel))
    }
}

/// Request shape and host ownership for one origin. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OriginProfile {
    pub id: String,
    #[serde(default)]
    pub hosts: Vec<HostPattern>,
    /// Extra headers sent on every fetch (Accept, Accept-Language, ...).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Send the player's own User-Agent instead of `user_agent`.
    #[serde(default)]
    pub forward_client_user_agent: bool,
    #[serde(default)]
    pub embed: EmbedPolicy,
    /// Base for `domain=<id>&path=<relative>` targets.
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Forced Content-Type for binary segments (origins that lie about it).
    #[serde(default)]
    pub segment_content_type: Option<String>,
    #[serde(default)]
    pub channel: Option<ChannelTemplate>,
}

impl OriginProfile {
    pub fn requires_token(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| channel.bootstrap_url.is_some())
    }

    pub fn serves_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|pattern| pattern.matches(host))
    }

    /// A bare profile with only an id, used as a building block.
    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            hosts: Vec::new(),
            headers: BTreeMap::new(),
            user_agent: None,
            forward_client_user_agent: false,
            embed: EmbedPolicy::Anonymous,
            base_url: None,
            segment_content_type: None,
            channel: None,
        }
    }
}

/// Lookup table over all configured profiles.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: Vec<Arc<OriginProfile>>,
    generic: Arc<OriginProfile>,
}

impl ProfileTable {
    /// Build the table. A `generic` profile is added if none was supplied.
    pub fn new(profiles: Vec<OriginProfile>) -> Self {
        let mut profiles: Vec<Arc<OriginProfile>> = profiles.into_iter().map(Arc::new).collect();

        let generic = match profiles.iter().find(|p| p.id == GENERIC_PROFILE_ID) {
            Some(generic) => generic.clone(),
            None => {
                let generic = Arc::new(generic_profile());
                profiles.push(generic.clone());
                generic
            }
        };

        Self { profiles, generic }
    }

    pub fn get(&self, id: &str) -> Option<Arc<OriginProfile>> {
        self.profiles.iter().find(|p| p.id == id).cloned()
    }

    /// First profile whose host patterns claim `host`.
    pub fn for_host(&self, host: &str) -> Option<Arc<OriginProfile>> {
        let host = normalize_host(host);
        self.profiles.iter().find(|p| p.serves_host(&host)).cloned()
    }

    /// Pick the profile for a request: explicit hint, then host, then generic.
    ///
    /// # Errors
    /// Returns [`RelayError::UnknownProfile`] when a hint names no profile.
    pub fn resolve(&self, hint: Option<&str>, host: &str) -> Result<Arc<OriginProfile>> {
        if let Some(hint) = hint {
            return self
                .get(hint)
                .ok_or_else(|| RelayError::UnknownProfile(hint.to_string()));
        }

        match self.for_host(host) {
            Some(profile) => {
                debug!("Matched origin profile '{}' for host {}", profile.id, host);
                Ok(profile)
            }
            None => Ok(self.generic.clone()),
        }
    }

    pub fn generic(&self) -> Arc<OriginProfile> {
        self.generic.clone()
    }

    /// Every host pattern declared by any profile.
    pub fn host_patterns(&self) -> impl Iterator<Item = &HostPattern> {
        self.profiles.iter().flat_map(|p| p.hosts.iter())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Replace built-in profiles by id with `overrides`, appending new ones.
pub fn merge_profiles(
    builtin: Vec<OriginProfile>,
    overrides: Vec<OriginProfile>,
) -> Vec<OriginProfile> {
    let mut merged = builtin;
    for profile in overrides {
        match merged.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => merged.push(profile),
        }
    }
    merged
}

/// Read a JSON array of profiles from disk.
pub fn load_profiles_file(path: &Path) -> std::result::Result<Vec<OriginProfile>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let profiles: Vec<OriginProfile> = serde_json::from_str(&raw)?;
    Ok(profiles)
}

fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn hosts(patterns: &[&str]) -> Vec<HostPattern> {
    patterns.iter().map(|p| HostPattern::parse(p)).collect()
}

fn generic_profile() -> OriginProfile {
    OriginProfile {
        user_agent: Some(CHROME_WINDOWS_UA.to_string()),
        headers: headers(&[("Accept", "*/*"), ("Accept-Language", "en-US,en;q=0.9")]),
        ..OriginProfile::named(GENERIC_PROFILE_ID)
    }
}

/// The origin table shipped with the relay. `PROFILES_FILE` entries with the
/// same id replace these.
pub fn builtin_profiles() -> Vec<OriginProfile> {
    vec![
        generic_profile(),
        OriginProfile {
            hosts: hosts(&["*.fremtv.lol", "*.directfr.lat"]),
            user_agent: Some(CHROME_MAC_UA.to_string()),
            headers: headers(&[
                ("Accept", HLS_ACCEPT),
                ("Accept-Language", "fr-FR,fr;q=0.7,en;q=0.6"),
            ]),
            embed: EmbedPolicy::Embedded {
                referer: "https://directfr.lat/".to_string(),
                origin: Some("https://directfr.lat".to_string()),
            },
            channel: Some(ChannelTemplate {
                manifest_url: "https://fremtv.lol/live/{channel}.m3u8".to_string(),
                bootstrap_url: Some("https://fremtv.lol/live/{channel}.m3u8".to_string()),
            }),
            ..OriginProfile::named("livetv")
        },
        OriginProfile {
            hosts: hosts(&["*.netplus.ch"]),
            user_agent: Some(CHROME_WINDOWS_UA.to_string()),
            headers: headers(&[
                ("Accept", HLS_OR_BINARY_ACCEPT),
                ("Accept-Language", "fr-FR,fr;q=0.9,en;q=0.8"),
                ("Cache-Control", "no-cache"),
            ]),
            embed: EmbedPolicy::Embedded {
                referer: "https://viamotionhsi.netplus.ch/".to_string(),
                origin: Some("https://viamotionhsi.netplus.ch".to_string()),
            },
            base_url: Url::parse("https://viamotionhsi.netplus.ch/live/eds/").ok(),
            ..OriginProfile::named("netplus")
        },
        OriginProfile {
            hosts: hosts(&["simulcast-p.ftven.fr"]),
            user_agent: Some(CHROME_WINDOWS_UA.to_string()),
            headers: headers(&[
                ("Accept", HLS_OR_BINARY_ACCEPT),
                ("Accept-Language", "fr-FR,fr;q=0.9,en;q=0.8"),
                ("Cache-Control", "no-cache"),
            ]),
            base_url: Url::parse("https://simulcast-p.ftven.fr/").ok(),
            ..OriginProfile::named("ftven")
        },
        OriginProfile {
            hosts: hosts(&["artesimulcast.akamaized.net"]),
            user_agent: Some(CHROME_WINDOWS_UA.to_string()),
            headers: headers(&[("Accept", HLS_OR_BINARY_ACCEPT)]),
            base_url: Url::parse("https://artesimulcast.akamaized.net/hls/live/2031003/artelive_fr/")
                .ok(),
            ..OriginProfile::named("arte")
        },
        OriginProfile {
            hosts: hosts(&["dcpv2eq7lu6ve.cloudfront.net", "video.pscp.tv"]),
            user_agent: Some(CHROME_WINDOWS_UA.to_string()),
            forward_client_user_agent: true,
            headers: headers(&[("Accept", "*/*")]),
            segment_content_type: Some("video/mp2t".to_string()),
            ..OriginProfile::named("cloudfront")
        },
        OriginProfile {
            hosts: hosts(&["*.darkibox.com"]),
            user_agent: Some(CHROME_WINDOWS_UA.to_string()),
            embed: EmbedPolicy::Embedded {
                referer: "https://darkibox.com/".to_string(),
                origin: Some("https://darkibox.com".to_string()),
            },
            ..OriginProfile::named("darkibox")
        },
        OriginProfile {
            hosts: hosts(&["*.vidmoly.net", "*.vidmoly.to"]),
            user_agent: Some(CHROME_WINDOWS_UA.to_string()),
            embed: EmbedPolicy::Embedded {
                referer: "https://vidmoly.net/".to_string(),
                origin: None,
            },
            ..OriginProfile::named("vidmoly")
        },
    ]
}
