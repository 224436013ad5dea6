use crate::profile::{self, HostPattern, OriginProfile};
use std::env;
use std::path::PathBuf;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Path of the relay endpoint as seen by players (default `/relay`)
    pub relay_endpoint: String,
    /// Public origin of this relay. When set, rewritten links are absolute.
    pub public_base_url: Option<Url>,
    /// Extra allow-listed hosts on top of every profile's hosts
    pub allowed_hosts: Vec<HostPattern>,
    /// Origin profile table (built-ins merged with `PROFILES_FILE`)
    pub profiles: Vec<OriginProfile>,
    /// Reject private/loopback/link-local IP literals even when allow-listed
    pub block_private_networks: bool,
    /// Timeout for manifest and token bootstrap fetches
    pub manifest_timeout_secs: u64,
    /// Total timeout for segment fetches (0 = none)
    pub segment_timeout_secs: u64,
    /// TCP/TLS connect timeout for every outbound fetch
    pub connect_timeout_secs: u64,
    /// Lifetime of a bootstrapped origin token
    pub token_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let relay_endpoint = env::var("RELAY_ENDPOINT").unwrap_or_else(|_| "/relay".to_string());
        if !relay_endpoint.starts_with('/') || relay_endpoint.contains('?') {
            return Err(format!("RELAY_ENDPOINT must be an absolute path: {relay_endpoint}").into());
        }

        let public_base_url = match env::var("PUBLIC_BASE_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(Url::parse(raw.trim())?),
            _ => None,
        };

        let allowed_hosts = env::var("ALLOWED_HOSTS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(HostPattern::parse)
            .collect();

        let overrides = match env::var("PROFILES_FILE") {
            Ok(path) if !path.trim().is_empty() => {
                profile::load_profiles_file(&PathBuf::from(path.trim()))?
            }
            _ => Vec::new(),
        };
        let profiles = profile::merge_profiles(profile::builtin_profiles(), overrides);

        let block_private_networks = env::var("BLOCK_PRIVATE_NETWORKS")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        Ok(Config {
            port,
            is_dev,
            relay_endpoint,
            public_base_url,
            allowed_hosts,
            profiles,
            block_private_networks,
            manifest_timeout_secs: secs_var("MANIFEST_TIMEOUT_SECS", 15),
            segment_timeout_secs: secs_var("SEGMENT_TIMEOUT_SECS", 0),
            connect_timeout_secs: secs_var("CONNECT_TIMEOUT_SECS", 10),
            token_ttl_secs: secs_var("TOKEN_TTL_SECS", 8),
        })
    }
}

fn secs_var(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "DEV_MODE",
        "PORT",
        "RELAY_ENDPOINT",
        "PUBLIC_BASE_URL",
        "ALLOWED_HOSTS",
        "PROFILES_FILE",
        "BLOCK_PRIVATE_NETWORKS",
        "MANIFEST_TIMEOUT_SECS",
        "SEGMENT_TIMEOUT_SECS",
        "CONNECT_TIMEOUT_SECS",
        "TOKEN_TTL_SECS",
    ];

    /// Clear every relay variable, set `set`, run `f`, then restore.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            ALL_VARS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK; no other thread touches env vars concurrently.
            unsafe { std::env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { std::env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn dev_mode_uses_defaults() {
        with_env(&[("DEV_MODE", "true")], || {
            let config = Config::from_env().expect("should succeed in dev mode");
            assert!(config.is_dev);
            assert_eq!(config.port, 3000);
            assert_eq!(config.relay_endpoint, "/relay");
            assert!(config.public_base_url.is_none());
            assert!(config.allowed_hosts.is_empty());
            assert!(config.block_private_networks);
            assert_eq!(config.manifest_timeout_secs, 15);
            assert_eq!(config.segment_timeout_secs, 0);
            assert_eq!(config.connect_timeout_secs, 10);
            assert_eq!(config.token_ttl_secs, 8);
            assert!(config.profiles.iter().any(|p| p.id == "generic"));
        });
    }

    #[test]
    fn prod_mode_requires_port() {
        with_env(&[], || {
            let result = Config::from_env();
            assert!(result.is_err(), "Should fail without PORT in prod mode");
        });
    }

    #[test]
    fn prod_mode_with_port_succeeds() {
        with_env(&[("PORT", "8080")], || {
            let config = Config::from_env().unwrap();
            assert!(!config.is_dev);
            assert_eq!(config.port, 8080);
        });
    }

    #[test]
    fn allowed_hosts_are_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("ALLOWED_HOSTS", "cdn.example.com, *.media.example ,,"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(
                    config.allowed_hosts,
                    vec![
                        HostPattern::Exact("cdn.example.com".to_string()),
                        HostPattern::Suffix("media.example".to_string()),
                    ]
                );
            },
        );
    }

    #[test]
    fn relay_endpoint_must_be_a_path() {
        with_env(
            &[("DEV_MODE", "true"), ("RELAY_ENDPOINT", "relay")],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn public_base_url_is_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("PUBLIC_BASE_URL", "https://relay.example.com"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(
                    config.public_base_url.unwrap().host_str(),
                    Some("relay.example.com")
                );
            },
        );
    }

    #[test]
    fn invalid_public_base_url_is_rejected() {
        with_env(
            &[("DEV_MODE", "true"), ("PUBLIC_BASE_URL", "not a url")],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn private_network_blocking_can_be_disabled() {
        with_env(
            &[("DEV_MODE", "true"), ("BLOCK_PRIVATE_NETWORKS", "false")],
            || {
                let config = Config::from_env().unwrap();
                assert!(!config.block_private_networks);
            },
        );
    }

    #[test]
    fn timeouts_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("MANIFEST_TIMEOUT_SECS", "30"),
                ("SEGMENT_TIMEOUT_SECS", "120"),
                ("TOKEN_TTL_SECS", "20"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.manifest_timeout_secs, 30);
                assert_eq!(config.segment_timeout_secs, 120);
                assert_eq!(config.token_ttl_secs, 20);
            },
        );
    }

    #[test]
    fn unparseable_timeout_falls_back_to_default() {
        with_env(
            &[("DEV_MODE", "true"), ("TOKEN_TTL_SECS", "soon")],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.token_ttl_secs, 8);
            },
        );
    }

    #[test]
    fn profiles_file_overrides_builtins() {
        let path = std::env::temp_dir().join(format!(
            "hls-relay-profiles-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"[{"id": "vidmoly", "user_agent": "override"}, {"id": "custom", "hosts": ["media.custom.example"]}]"#,
        )
        .unwrap();

        with_env(
            &[
                ("DEV_MODE", "true"),
                ("PROFILES_FILE", path.to_str().unwrap()),
            ],
            || {
                let config = Config::from_env().unwrap();
                let vidmoly = config.profiles.iter().find(|p| p.id == "vidmoly").unwrap();
                assert_eq!(vidmoly.user_agent.as_deref(), Some("override"));
                assert!(config.profiles.iter().any(|p| p.id == "custom"));
            },
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_profiles_file_is_an_error() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("PROFILES_FILE", "/nonexistent/hls-relay/profiles.json"),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }
}
