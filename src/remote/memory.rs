//! In-process configuration service with counter tokens.
//!
//! Tokens are `t1`, `t2`, ... per target and advance on every write. Hooks
//! let a caller play "another actor" writing out of band, either right away
//! or just before the next apply.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{ConfigurationService, RemoteConfig};
use crate::models::{ConcurrencyToken, Payload};
use crate::{AppError, Result};

#[derive(Debug)]
struct TargetState {
    payload: Payload,
    version: u64,
}

impl TargetState {
    fn token(&self) -> ConcurrencyToken {
        ConcurrencyToken::new(format!("t{}", self.version))
    }

    fn write(&mut self, payload: Payload) -> ConcurrencyToken {
        self.payload = payload;
        self.version += 1;
        self.token()
    }
}

#[derive(Debug, Default)]
struct Inner {
    targets: HashMap<String, TargetState>,
    interfere_before_apply: HashMap<String, Payload>,
    drift_after_apply: HashMap<String, Payload>,
    unavailable: bool,
    applies: u64,
}

/// Configuration service backed by a map, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryConfigurationService {
    inner: Mutex<Inner>,
}

impl MemoryConfigurationService {
    /// Service with no targets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a target, returning its new token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn insert(&self, target_id: &str, payload: Payload) -> Result<ConcurrencyToken> {
        let mut inner = self.lock()?;
        match inner.targets.get_mut(target_id) {
            Some(state) => Ok(state.write(payload)),
            None => {
                let state = TargetState {
                    payload,
                    version: 1,
                };
                let token = state.token();
                inner.targets.insert(target_id.to_owned(), state);
                Ok(token)
            }
        }
    }

    /// Current payload of a target, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn current(&self, target_id: &str) -> Result<Option<Payload>> {
        Ok(self
            .lock()?
            .targets
            .get(target_id)
            .map(|state| state.payload.clone()))
    }

    /// Write as another actor would, advancing the token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown targets.
    pub fn write_out_of_band(&self, target_id: &str, payload: Payload) -> Result<ConcurrencyToken> {
        let mut inner = self.lock()?;
        let state = inner
            .targets
            .get_mut(target_id)
            .ok_or_else(|| AppError::NotFound(format!("remote target '{target_id}'")))?;
        Ok(state.write(payload))
    }

    /// Have another actor write `payload` immediately before the next apply
    /// to `target_id` is checked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn interfere_before_next_apply(&self, target_id: &str, payload: Payload) -> Result<()> {
        self.lock()?
            .interfere_before_apply
            .insert(target_id.to_owned(), payload);
        Ok(())
    }

    /// Replace the stored document with `payload` right after the next
    /// successful apply, as a normalizing backend would.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn drift_after_next_apply(&self, target_id: &str, payload: Payload) -> Result<()> {
        self.lock()?
            .drift_after_apply
            .insert(target_id.to_owned(), payload);
        Ok(())
    }

    /// Make every call fail with `AppError::Io` until switched back.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn set_unavailable(&self, unavailable: bool) -> Result<()> {
        self.lock()?.unavailable = unavailable;
        Ok(())
    }

    /// Number of apply calls received, accepted or not.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the internal lock is poisoned.
    pub fn apply_calls(&self) -> Result<u64> {
        Ok(self.lock()?.applies)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Io("memory configuration service mutex poisoned".into()))
    }
}

impl ConfigurationService for MemoryConfigurationService {
    fn fetch_current(
        &self,
        target_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteConfig>> + Send + '_>> {
        let target_id = target_id.to_owned();
        Box::pin(async move {
            let inner = self.lock()?;
            if inner.unavailable {
                return Err(AppError::Io("remote service unavailable".into()));
            }
            let state = inner
                .targets
                .get(&target_id)
                .ok_or_else(|| AppError::NotFound(format!("remote target '{target_id}'")))?;
            Ok(RemoteConfig {
                payload: state.payload.clone(),
                token: state.token(),
            })
        })
    }

    fn apply_configuration(
        &self,
        target_id: &str,
        payload: Payload,
        token: ConcurrencyToken,
    ) -> Pin<Box<dyn Future<Output = Result<ConcurrencyToken>> + Send + '_>> {
        let target_id = target_id.to_owned();
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.applies += 1;
            if inner.unavailable {
                return Err(AppError::Io("remote service unavailable".into()));
            }
            let interference = inner.interfere_before_apply.remove(&target_id);
            let drift = inner.drift_after_apply.remove(&target_id);
            let state = inner
                .targets
                .get_mut(&target_id)
                .ok_or_else(|| AppError::NotFound(format!("remote target '{target_id}'")))?;

            if let Some(other) = interference {
                state.write(other);
            }
            if state.token() != token {
                return Err(AppError::Conflict(format!(
                    "token {token} is stale for '{target_id}' (current {})",
                    state.token()
                )));
            }

            let mut new_token = state.write(payload);
            if let Some(drifted) = drift {
                new_token = state.write(drifted);
            }
            debug!(target_id = %target_id, %new_token, "configuration applied");
            Ok(new_token)
        })
    }
}
