//! HLS media relay.
//!
//! Fetches origin playlists and segments on a player's behalf with the
//! headers each origin expects, rewrites playlist URIs so every follow-up
//! request comes back through the relay, and guards every outbound fetch
//! with a host allow-list.

pub mod config;
pub mod error;
pub mod extractor;
pub mod hls;
pub mod metrics;
pub mod profile;
pub mod relay;
pub mod server;
pub mod subtitle;
pub mod token;
