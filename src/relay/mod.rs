//! Relay core: target resolution, origin requests, classification and passthrough.
//!
//! Playlist rewriting lives in [`crate::hls`]; the HTTP
//! handlers in [`crate::server::handlers`] wire these pieces together.

pub mod classify;
pub mod passthrough;
pub mod request;
pub mod resolve;
pub mod target;

pub use classify::{BodyKind, classify};
pub use request::{FetchTimeouts, RelayRequest};
pub use resolve::{RelayEndpoint, resolve};
pub use target::{RelayParams, Target};
