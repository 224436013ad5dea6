pub mod channel;
pub mod extract;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod subtitle;
