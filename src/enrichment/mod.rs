//! Optional per-movie enrichment from an external metadata service.

pub mod rate_gate;
pub mod tmdb_client;

use std::time::Duration;

use log::info;

use crate::documents::ExternalData;
use crate::identity_mapper::NaturalId;

const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Keys a provider may use to find one movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentLookup {
    pub movie_id: NaturalId,
    pub tmdb_id: Option<u64>,
}

/// Result of a lookup that reached a definitive answer.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    Found(ExternalData),
    NotFound,
}

/// Interface implemented by metadata services. Implementations must be
/// shareable across worker threads and must route every outbound request
/// through one shared rate gate.
pub trait MetadataProvider: Send + Sync {
    /// `Err` only after retries are exhausted or on a non-retryable failure;
    /// a definitive miss is `Ok(EnrichmentOutcome::NotFound)`.
    fn fetch(&self, lookup: &EnrichmentLookup) -> Result<EnrichmentOutcome, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    /// Network error, timeout or 5xx.
    Transient,
    RateLimited,
    NotFound,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FetchFailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FetchFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchFailureKind::Transient | FetchFailureKind::RateLimited
        )
    }
}

/// Bounded retry with exponential backoff for retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(6);
        let multiplier = 1u32 << exponent;
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    pub fn run<T, F>(&self, label: &str, mut operation: F) -> Result<T, FetchFailure>
    where
        F: FnMut() -> Result<T, FetchFailure>,
    {
        let mut retries = 0u32;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(failure) if failure.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    let backoff = self.backoff_delay(retries);
                    info!(
                        "Enrichment[{label}]: attempt {retries} failed ({}), retrying in {:?}",
                        failure.message, backoff
                    );
                    std::thread::sleep(backoff);
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}
