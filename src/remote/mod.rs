//! Contract for the remote service that owns the live configuration.
//!
//! The engine never assumes exclusive ownership of the remote object. Every
//! write goes through [`ConfigurationService::apply_configuration`] with the
//! token from the most recent read; the service rejects stale tokens, which
//! is the only lost-update protection available.

pub mod file;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use crate::models::{ConcurrencyToken, Payload};
use crate::Result;

pub use file::FileConfigurationService;
pub use memory::MemoryConfigurationService;

/// Live configuration together with the token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Full configuration document.
    pub payload: Payload,
    /// Token that must accompany the next write.
    pub token: ConcurrencyToken,
}

/// Read and compare-and-swap access to remote configuration objects.
pub trait ConfigurationService: Send + Sync {
    /// Read the current configuration of `target_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the target is unknown, `AppError::Io`
    /// on transport failure.
    fn fetch_current(
        &self,
        target_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteConfig>> + Send + '_>>;

    /// Replace the configuration of `target_id` if `token` is still current.
    ///
    /// Returns the token of the newly written configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if `token` is stale, `AppError::NotFound`
    /// if the target is unknown, `AppError::Io` on transport failure.
    fn apply_configuration(
        &self,
        target_id: &str,
        payload: Payload,
        token: ConcurrencyToken,
    ) -> Pin<Box<dyn Future<Output = Result<ConcurrencyToken>> + Send + '_>>;
}
