//! pulse core library
//!
//! Metric model, repository backends, transport helpers and the agent pipeline shared by
//! the `pulse-agent` and `pulse-server` binaries.

pub mod agent;
pub mod config;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod shutdown;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export commonly used items
pub use agent::Agent;
pub use config::{AgentConfig, BackendKind, ServerConfig};
pub use error::{PulseError, Result};
pub use observability::init as init_observability;
pub use storage::{MemoryRepository, Repository, SnapshotRepository, SqlRepository};
pub use types::{MetricKind, MetricName, MetricRecord, MetricValue, Metrics};
