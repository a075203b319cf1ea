//! Self-update executor (C8) and its supporting semver/health/history
//! utilities.

pub mod executor;
pub mod health;
pub mod semver;
pub mod store;

pub use executor::{Diagnostics, ExecutorError, ExecutorState, UpdateExecutor};
pub use health::HealthCheckConfig;
pub use store::{DurableStore, HistoryRing, UpdateRecord, UpdateStatus};
