//! Upload coordinator for the Beacon telemetry pipeline.
//!
//! Payloads are first written to a local cache, and only then dispatched
//! to the collector; the caller is acknowledged as soon as the cache write
//! lands, so batches and sessions can be forgotten locally long before the
//! network cooperates. Failed entries stay cached and are re-sent when
//! connectivity returns or at the next launch.

mod cache;
mod client;
mod coordinator;
mod error;

pub use cache::{CachedUpload, UploadCache};
pub use client::{Dispatcher, HttpDispatcher, UploadRequest};
pub use coordinator::{UploadCoordinator, UploadHandle};
pub use error::{UploadError, UploadResult};
