//! Idempotent resource bootstrapper.
//!
//! [`Bootstrapper::ensure`] makes sure the singleton record for a resource
//! exists and returns its payload:
//!
//! 1. Read the record. Any read error other than not-found aborts.
//! 2. Present: adopt it verbatim (after decoding and validation). Existing
//!    material is never regenerated or overwritten.
//! 3. Absent: generate a payload and insert it. A conflict means another run
//!    won the race; re-read and adopt the winner. Other insert failures are
//!    retried up to [`RetryPolicy::attempts`] with a fixed delay, except
//!    authorisation failures which abort at once.
//!
//! There is no locking. Concurrent runs converge because every loser adopts
//! the single winning row.

use tracing::{error, info, warn};

use crate::{
    config::{Config, RetryPolicy},
    error::AppError,
    resource::Resource,
    store::{RemoteStore, SingletonKey, StoreError},
};

/// How the returned payload came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This run inserted the record.
    Created,
    /// The record already existed.
    Adopted,
    /// This run lost an insert race and took the winner's record.
    AdoptedAfterConflict,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Created => "created",
            Origin::Adopted => "adopted",
            Origin::AdoptedAfterConflict => "adopted-after-conflict",
        }
    }
}

/// Result of a successful [`Bootstrapper::ensure`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured<R> {
    pub payload: R,
    pub origin: Origin,
}

pub struct Bootstrapper<S> {
    store: S,
    config: Config,
}

impl<S: RemoteStore> Bootstrapper<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { store, config }
    }

    /// Ensure exactly one record exists for `R` and return its payload.
    pub async fn ensure<R: Resource>(&self) -> Result<Ensured<R>, AppError> {
        let key = R::key(&self.config);

        if let Some(record) = self.store.find_singleton(&key).await? {
            let payload = R::from_record(&record)?;
            info!(resource = R::NAME, %key, payload = %payload.describe(), "record exists, adopting");
            return Ok(Ensured { payload, origin: Origin::Adopted });
        }

        info!(resource = R::NAME, %key, "record absent, creating");
        let payload = R::generate(&self.config);
        self.create(&key, payload).await
    }

    async fn create<R: Resource>(&self, key: &SingletonKey, payload: R) -> Result<Ensured<R>, AppError> {
        let RetryPolicy { attempts, delay } = self.config.retry;
        let mut attempt = 1;

        loop {
            match self.store.insert_if_absent(key, payload.to_fields()).await {
                Ok(record) => {
                    let stored = R::from_record(&record)?;
                    info!(resource = R::NAME, %key, attempt, payload = %stored.describe(), "record created");
                    return Ok(Ensured { payload: stored, origin: Origin::Created });
                }
                Err(StoreError::Conflict(detail)) => {
                    warn!(resource = R::NAME, %key, %detail, "insert conflict, adopting existing record");
                    return self.adopt_after_conflict(key, detail).await;
                }
                Err(e) if !e.is_retryable() => {
                    error!(resource = R::NAME, %key, error = %e, "insert failed, not retrying");
                    return Err(e.into());
                }
                Err(e) if attempt >= attempts => {
                    error!(resource = R::NAME, %key, attempts, error = %e, "insert failed, retries exhausted");
                    return Err(AppError::RetryExhausted { resource: R::NAME, attempts, last: e });
                }
                Err(e) => {
                    warn!(
                        resource = R::NAME,
                        %key,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "insert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn adopt_after_conflict<R: Resource>(
        &self,
        key: &SingletonKey,
        detail: String,
    ) -> Result<Ensured<R>, AppError> {
        match self.store.find_singleton(key).await? {
            Some(record) => {
                let payload = R::from_record(&record)?;
                info!(resource = R::NAME, %key, payload = %payload.describe(), "adopted record from concurrent run");
                Ok(Ensured { payload, origin: Origin::AdoptedAfterConflict })
            }
            // The row exists but this credential cannot see it (e.g. a read policy).
            None => Err(StoreError::Conflict(format!("{detail}; existing record for {key} is not readable")).into()),
        }
    }
}
