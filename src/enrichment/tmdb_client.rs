//! TMDB metadata provider backed by `ureq`.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::EnrichmentConfig;
use crate::documents::{CastMember, ExternalData};
use crate::enrichment::rate_gate::RateGate;
use crate::enrichment::{
    EnrichmentLookup, EnrichmentOutcome, FetchFailure, FetchFailureKind, MetadataProvider,
    RetryPolicy,
};

const POSTER_SIZE: &str = "w500";
const PROFILE_SIZE: &str = "w185";
const DIRECTOR_JOB: &str = "Director";
const USER_AGENT: &str = concat!("lensdocs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TmdbMovieDetails {
    overview: Option<String>,
    poster_path: Option<String>,
    runtime: Option<u32>,
    budget: Option<u64>,
    revenue: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TmdbCredits {
    cast: Vec<TmdbCastEntry>,
    crew: Vec<TmdbCrewEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TmdbCastEntry {
    name: String,
    order: u32,
    profile_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TmdbCrewEntry {
    name: String,
    job: String,
}

/// Fetches movie details and credits, two gated requests per movie.
pub struct TmdbClient {
    http_client: ureq::Agent,
    api_key: String,
    base_url: String,
    image_base_url: String,
    max_cast: usize,
    retry_policy: RetryPolicy,
    rate_gate: Arc<RateGate>,
}

impl TmdbClient {
    /// Builds a client that draws request slots from `rate_gate`.
    pub fn new(config: &EnrichmentConfig, rate_gate: Arc<RateGate>) -> Result<Self, String> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err("TMDB enrichment requires an API key (TMDB_API_KEY)".to_string());
        }
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build();

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            image_base_url: config.image_base_url.trim_end_matches('/').to_string(),
            max_cast: config.max_cast,
            retry_policy: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
            rate_gate,
        })
    }

    fn request_url(&self, path: &str) -> String {
        format!(
            "{}/{path}?api_key={}",
            self.base_url,
            urlencoding::encode(&self.api_key)
        )
    }

    fn classify_ureq_failure(error: &ureq::Error) -> FetchFailureKind {
        match error {
            ureq::Error::Status(code, _) => match code {
                404 => FetchFailureKind::NotFound,
                429 => FetchFailureKind::RateLimited,
                408 | 500..=599 => FetchFailureKind::Transient,
                _ => FetchFailureKind::Hard,
            },
            ureq::Error::Transport(_) => FetchFailureKind::Transient,
        }
    }

    /// One gated request; `path` never carries the credential, so it is safe
    /// to log.
    fn get_json_once<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchFailure> {
        self.rate_gate.acquire();
        let response = self
            .http_client
            .get(&self.request_url(path))
            .set("Accept", "application/json")
            .call()
            .map_err(|error| {
                let kind = Self::classify_ureq_failure(&error);
                let message = match &error {
                    ureq::Error::Status(code, _) => format!("{path}: HTTP {code}"),
                    ureq::Error::Transport(transport) => format!("{path}: {}", transport.kind()),
                };
                FetchFailure::new(kind, message)
            })?;
        response.into_json::<T>().map_err(|error| {
            let kind = if matches!(
                error.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                FetchFailureKind::Transient
            } else {
                FetchFailureKind::Hard
            };
            FetchFailure::new(kind, format!("{path}: invalid response body: {error}"))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, label: &str, path: &str) -> Result<T, FetchFailure> {
        self.retry_policy
            .run(label, || self.get_json_once::<T>(path))
    }

    fn image_url(&self, size: &str, path: Option<&str>) -> Option<String> {
        path.map(str::trim)
            .filter(|path| !path.is_empty())
            .map(|path| format!("{}/{size}{path}", self.image_base_url))
    }

    fn build_external_data(&self, details: TmdbMovieDetails, credits: TmdbCredits) -> ExternalData {
        let mut cast_entries = credits.cast;
        cast_entries.sort_by_key(|entry| entry.order);
        let cast = cast_entries
            .into_iter()
            .filter(|entry| !entry.name.trim().is_empty())
            .take(self.max_cast)
            .map(|entry| CastMember {
                profile_url: self.image_url(PROFILE_SIZE, entry.profile_path.as_deref()),
                name: entry.name,
            })
            .collect();
        let director = credits
            .crew
            .into_iter()
            .find(|entry| entry.job == DIRECTOR_JOB)
            .map(|entry| entry.name);

        ExternalData {
            poster_url: self.image_url(POSTER_SIZE, details.poster_path.as_deref()),
            overview: details.overview.filter(|overview| !overview.trim().is_empty()),
            cast,
            director,
            runtime: details.runtime.filter(|runtime| *runtime > 0),
            budget: details.budget.filter(|budget| *budget > 0),
            revenue: details.revenue.filter(|revenue| *revenue > 0),
            tmdb_fetched: true,
        }
    }
}

impl MetadataProvider for TmdbClient {
    fn fetch(&self, lookup: &EnrichmentLookup) -> Result<EnrichmentOutcome, String> {
        let Some(tmdb_id) = lookup.tmdb_id else {
            return Ok(EnrichmentOutcome::NotFound);
        };
        let label = format!("movie:{}", lookup.movie_id);

        let details = match self.get_json::<TmdbMovieDetails>(&label, &format!("movie/{tmdb_id}"))
        {
            Ok(details) => details,
            Err(failure) if failure.kind == FetchFailureKind::NotFound => {
                debug!("Enrichment[{label}]: TMDB has no movie {tmdb_id}");
                return Ok(EnrichmentOutcome::NotFound);
            }
            Err(failure) => return Err(failure.message),
        };
        let credits = match self
            .get_json::<TmdbCredits>(&label, &format!("movie/{tmdb_id}/credits"))
        {
            Ok(credits) => credits,
            Err(failure) if failure.kind == FetchFailureKind::NotFound => TmdbCredits::default(),
            Err(failure) => return Err(failure.message),
        };

        Ok(EnrichmentOutcome::Found(
            self.build_external_data(details, credits),
        ))
    }
}
