//! Outbound and inbound transport helpers.
//!
//! - [`retry`]: fixed-delay retry schedule shared by every outbound call
//! - [`signing`]: HMAC-SHA256 body signatures carried in the `HashSHA256` header
//! - [`compress`]: gzip bodies
//! - [`encrypt`]: optional RSA payload encryption of single-metric requests
//! - [`client`]: the HTTP client used by the agent
//! - [`subnet`]: trusted subnet checks on the `X-Real-IP` header

pub mod client;
pub mod compress;
pub mod encrypt;
pub mod retry;
pub mod signing;
pub mod subnet;

pub use client::{HttpClient, MetricsClient};
pub use retry::RetrySchedule;
pub use subnet::TrustedSubnet;
