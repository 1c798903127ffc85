//! Configuration for the Beacon telemetry pipeline.
//!
//! Numeric limits (batch sizes, retry ceilings, grace windows) arrive from
//! a configuration collaborator and may change at runtime; components read
//! them through a shared [`ConfigHandle`] instead of captured copies.

mod handle;
mod settings;

pub use handle::ConfigHandle;
pub use settings::{
    BatchLimits, BeaconConfig, CacheLimits, ConfigError, Endpoints, RetryLimits, SessionLimits,
    UploadSettings,
};
