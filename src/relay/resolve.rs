//! URL resolution and relay link construction.

use crate::profile::normalize_host;
use url::Url;

/// Resolve a URI found inside a manifest against the manifest's final URL.
///
/// Handles absolute, scheme-relative (`//host/x`), root-relative (`/x`),
/// dot-segment (`../x`) and plain relative references.
pub fn resolve(base: &Url, reference: &str) -> Result<Url, url::ParseError> {
    base.join(reference.trim())
}

/// The relay's own public endpoint, used to build and recognize relay links.
#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    /// `/relay` or `https://relay.example/relay`
    prefix: String,
    /// Always the path component (`/relay`)
    path: String,
    public_host: Option<String>,
}

impl RelayEndpoint {
    pub fn new(path: &str, public_base: Option<&Url>) -> Self {
        let prefix = match public_base {
            Some(base) => format!("{}{}", base.as_str().trim_end_matches('/'), path),
            None => path.to_string(),
        };

        Self {
            prefix,
            path: path.to_string(),
            public_host: public_base.and_then(|b| b.host_str()).map(normalize_host),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `<endpoint>?url=<percent-encoded absolute URL>`
    pub fn link(&self, target: &Url) -> String {
        format!("{}?url={}", self.prefix, urlencoding::encode(target.as_str()))
    }

    /// Whether a raw manifest reference is already a link to this relay.
    pub fn is_relay_reference(&self, reference: &str) -> bool {
        let reference = reference.trim();
        [self.prefix.as_str(), self.path.as_str()]
            .iter()
            .any(|prefix| {
                reference
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('?'))
            })
    }

    /// Whether an absolute URL points back at this relay.
    ///
    /// Matches the configured public host, or any host serving the relay
    /// path with a `url` parameter (the host may be unknown when the relay
    /// sits behind a proxy).
    pub fn is_relay_target(&self, target: &Url) -> bool {
        if let (Some(public_host), Some(host)) = (&self.public_host, target.host_str())
            && normalize_host(host) == *public_host
        {
            return true;
        }

        target.path() == self.path && target.query_pairs().any(|(key, _)| key == "url")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://origin.example/live/ch1/index.m3u8").unwrap()
    }

    #[test]
    fn resolves_relative_segment() {
        assert_eq!(
            resolve(&base(), "seg1.ts").unwrap().as_str(),
            "https://origin.example/live/ch1/seg1.ts"
        );
    }

    #[test]
    fn resolves_root_relative_and_dot_segments() {
        assert_eq!(
            resolve(&base(), "/vod/a.ts").unwrap().as_str(),
            "https://origin.example/vod/a.ts"
        );
        assert_eq!(
            resolve(&base(), "../ch2/index.m3u8").unwrap().as_str(),
            "https://origin.example/live/ch2/index.m3u8"
        );
    }

    #[test]
    fn resolves_scheme_relative() {
        assert_eq!(
            resolve(&base(), "//cdn.example/x.ts").unwrap().as_str(),
            "https://cdn.example/x.ts"
        );
    }

    #[test]
    fn keeps_absolute_and_query() {
        assert_eq!(
            resolve(&base(), "https://other.example/a.ts?token=abc").unwrap().as_str(),
            "https://other.example/a.ts?token=abc"
        );
        assert_eq!(
            resolve(&base(), "seg.ts?token=abc").unwrap().as_str(),
            "https://origin.example/live/ch1/seg.ts?token=abc"
        );
    }

    #[test]
    fn link_percent_encodes_target() {
        let endpoint = RelayEndpoint::new("/relay", None);
        let target = Url::parse("https://origin.example/live/ch1/seg1.ts").unwrap();
        assert_eq!(
            endpoint.link(&target),
            "/relay?url=https%3A%2F%2Forigin.example%2Flive%2Fch1%2Fseg1.ts"
        );
    }

    #[test]
    fn link_round_trips_through_decoding() {
        let endpoint = RelayEndpoint::new("/relay", None);
        let target = resolve(&base(), "seg 1.ts?a=1&b=2").unwrap();
        let link = endpoint.link(&target);
        let encoded = link.strip_prefix("/relay?url=").unwrap();
        assert_eq!(urlencoding::decode(encoded).unwrap(), target.as_str());
    }

    #[test]
    fn absolute_prefix_with_public_base() {
        let public = Url::parse("https://relay.example.com/").unwrap();
        let endpoint = RelayEndpoint::new("/relay", Some(&public));
        assert_eq!(endpoint.prefix(), "https://relay.example.com/relay");

        let target = Url::parse("https://origin.example/a.ts").unwrap();
        assert!(endpoint.link(&target).starts_with("https://relay.example.com/relay?url="));
    }

    #[test]
    fn recognizes_relay_references() {
        let public = Url::parse("https://relay.example.com").unwrap();
        let endpoint = RelayEndpoint::new("/relay", Some(&public));

        assert!(endpoint.is_relay_reference("/relay?url=https%3A%2F%2Fa"));
        assert!(endpoint.is_relay_reference("https://relay.example.com/relay?url=x"));
        assert!(!endpoint.is_relay_reference("/relayed/seg.ts"));
        assert!(!endpoint.is_relay_reference("seg1.ts"));
    }

    #[test]
    fn recognizes_relay_targets() {
        let public = Url::parse("https://relay.example.com").unwrap();
        let endpoint = RelayEndpoint::new("/relay", Some(&public));

        let own_host = Url::parse("https://RELAY.example.com/anything").unwrap();
        assert!(endpoint.is_relay_target(&own_host));

        let other_relay = Url::parse("https://mirror.example/relay?url=https%3A%2F%2Fx").unwrap();
        assert!(endpoint.is_relay_target(&other_relay));

        let normal = Url::parse("https://origin.example/relay/seg.ts").unwrap();
        assert!(!endpoint.is_relay_target(&normal));
    }
}
