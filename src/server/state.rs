use crate::{
    config::Config,
    extractor::ExtractorRegistry,
    profile::ProfileTable,
    relay::{FetchTimeouts, RelayEndpoint},
    server::url_validation::AllowListGuard,
    token::TokenStore,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::{Client, redirect};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MAX_REDIRECTS: usize = 10;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub profiles: Arc<ProfileTable>,
    pub guard: Arc<AllowListGuard>,
    pub endpoint: Arc<RelayEndpoint>,
    pub timeouts: FetchTimeouts,
    /// Shared HTTP client for connection pooling (follows redirects)
    pub http_client: Client,
    /// Client for token handshakes; redirects are read, not followed
    pub bootstrap_client: Client,
    pub tokens: TokenStore,
    pub extractors: ExtractorRegistry,
    /// Root of every in-flight segment stream's abort token
    pub shutdown: CancellationToken,
    pub metrics: Option<PrometheusHandle>,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Self {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        let profiles = ProfileTable::new(config.profiles.clone());
        let endpoint = RelayEndpoint::new(&config.relay_endpoint, config.public_base_url.as_ref());
        let guard = Arc::new(AllowListGuard::new(
            &profiles,
            &config.allowed_hosts,
            config.block_private_networks,
            endpoint.clone(),
        ));

        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(connect_timeout)
            .redirect(guarded_redirects(guard.clone()))
            .build()
            .expect("Failed to create HTTP client");

        let bootstrap_client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .expect("Failed to create bootstrap HTTP client");

        let timeouts = FetchTimeouts::from_config(&config);
        let tokens = TokenStore::new(Duration::from_secs(config.token_ttl_secs));
        let extractors = ExtractorRegistry::with_defaults(timeouts.manifest);

        Self {
            config: Arc::new(config),
            profiles: Arc::new(profiles),
            guard,
            endpoint: Arc::new(endpoint),
            timeouts,
            http_client,
            bootstrap_client,
            tokens,
            extractors,
            shutdown: CancellationToken::new(),
            metrics: crate::metrics::init(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

/// Follow redirects only to targets the guard would accept.
///
/// A refused hop stops redirection and hands the 3xx back to the handler,
/// which reports it as an upstream failure.
fn guarded_redirects(guard: Arc<AllowListGuard>) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if let Err(e) = guard.check(attempt.url()) {
            warn!(
                target: "relay::security",
                "Refused redirect from {} to {}: {}",
                attempt.previous().last().map(|u| u.as_str()).unwrap_or("?"),
                attempt.url(),
                e
            );
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}
