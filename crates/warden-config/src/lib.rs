//! # warden-config
//!
//! Deployment configuration for the governance core, loaded from
//! `warden.toml`. Every tunable the components consume — bucket sizes,
//! breaker thresholds, the confidence decay curve, scheduled jobs — lives
//! here, per deployment and never per fingerprint.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    BreakerConfig, ConfidenceConfig, GovernorConfig, JobConfig, LoggingConfig, StoreConfig,
    WardenConfig,
};
