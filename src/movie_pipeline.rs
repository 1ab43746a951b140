//! Movie assembly pass: streams the primary movie source once and joins every
//! side-input onto each row, writing documents in source row order.

use std::io::{Read, Write};
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::config::IdentityMode;
use crate::documents::{timestamp_now, ExternalData, MovieDoc};
use crate::enrichment::{EnrichmentLookup, EnrichmentOutcome, MetadataProvider};
use crate::identity_mapper::{IdentityMapper, NaturalId};
use crate::ndjson::NdjsonWriter;
use crate::record_reader::RecordReader;
use crate::side_inputs::SideInputs;

/// Genre field value that stands for an empty genre list.
pub const NO_GENRES_SENTINEL: &str = "(no genres listed)";
const GENRE_DELIMITER: char = '|';
/// Rows assembled per batch when enrichment fans out to workers.
const ROWS_PER_WORKER_BATCH: usize = 8;

static YEAR_SUFFIX: OnceLock<Option<Regex>> = OnceLock::new();

fn year_suffix_pattern() -> Option<&'static Regex> {
    YEAR_SUFFIX
        .get_or_init(|| Regex::new(r"\((\d{4})\)\s*$").ok())
        .as_ref()
}

/// Splits a trailing `(YYYY)` off a raw title. Without a match the trimmed
/// title is returned unchanged and the year is absent.
pub fn parse_title_and_year(raw: &str) -> (String, Option<i32>) {
    let trimmed = raw.trim();
    let Some(captures) = year_suffix_pattern().and_then(|pattern| pattern.captures(trimmed)) else {
        return (trimmed.to_string(), None);
    };
    let (Some(whole), Some(digits)) = (captures.get(0), captures.get(1)) else {
        return (trimmed.to_string(), None);
    };
    let Ok(year) = digits.as_str().parse::<i32>() else {
        return (trimmed.to_string(), None);
    };
    let title = trimmed[..whole.start()].trim();
    if title.is_empty() {
        return (trimmed.to_string(), Some(year));
    }
    (title.to_string(), Some(year))
}

/// Splits the pipe-delimited genre field, dropping blanks and the sentinel.
pub fn parse_genres(raw: &str) -> Vec<String> {
    raw.split(GENRE_DELIMITER)
        .map(str::trim)
        .filter(|genre| !genre.is_empty() && *genre != NO_GENRES_SENTINEL)
        .map(str::to_string)
        .collect()
}

/// Counters reported by one movie pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoviePassStats {
    pub written: usize,
    pub rows_skipped: usize,
    pub enrichment_found: usize,
    pub enrichment_not_found: usize,
    pub enrichment_failed: usize,
}

/// Collaborators and policy for one movie pass. The enrichment provider is
/// optional; every side-input inside `side_inputs` may be empty.
pub struct MoviePipeline<'a> {
    side_inputs: &'a SideInputs,
    item_mapper: &'a IdentityMapper,
    identity_mode: IdentityMode,
    enricher: Option<&'a dyn MetadataProvider>,
    workers: usize,
}

impl<'a> MoviePipeline<'a> {
    pub fn new(
        side_inputs: &'a SideInputs,
        item_mapper: &'a IdentityMapper,
        identity_mode: IdentityMode,
    ) -> Self {
        Self {
            side_inputs,
            item_mapper,
            identity_mode,
            enricher: None,
            workers: 1,
        }
    }

    /// Enables enrichment; `workers > 1` fetches each batch concurrently.
    pub fn with_enricher(mut self, enricher: &'a dyn MetadataProvider, workers: usize) -> Self {
        self.enricher = Some(enricher);
        self.workers = workers.max(1);
        self
    }

    fn batch_size(&self) -> usize {
        match self.enricher {
            Some(_) if self.workers > 1 => self.workers * ROWS_PER_WORKER_BATCH,
            _ => 1,
        }
    }

    fn resolve_index(&self, movie_id: NaturalId) -> Option<usize> {
        match self.identity_mode {
            IdentityMode::Off => None,
            IdentityMode::Lookup => self.item_mapper.get(movie_id),
            IdentityMode::Create => Some(self.item_mapper.get_or_create(movie_id)),
        }
    }

    /// Assembles a document without enrichment or timestamps.
    fn assemble(&self, movie_id: NaturalId, raw_title: &str, raw_genres: &str) -> MovieDoc {
        let (title, year) = parse_title_and_year(raw_title);
        MovieDoc {
            movie_id,
            i_idx: self.resolve_index(movie_id),
            title,
            year,
            genres: parse_genres(raw_genres),
            links: self.side_inputs.links_for(movie_id).cloned(),
            genome_tags: self.side_inputs.genome_tags_for(movie_id),
            user_tags: self.side_inputs.user_tags_for(movie_id),
            rating_stats: self.side_inputs.rating_stats_for(movie_id),
            external_data: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn lookup_for(&self, doc: &MovieDoc) -> EnrichmentLookup {
        EnrichmentLookup {
            movie_id: doc.movie_id,
            tmdb_id: doc.links.as_ref().and_then(|links| links.tmdb_id()),
        }
    }

    fn fetch_batch(
        &self,
        enricher: &dyn MetadataProvider,
        lookups: &[EnrichmentLookup],
    ) -> Vec<Result<EnrichmentOutcome, String>> {
        if self.workers <= 1 || lookups.len() <= 1 {
            return lookups.iter().map(|lookup| enricher.fetch(lookup)).collect();
        }
        let chunk_len = lookups.len().div_ceil(self.workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = lookups
                .chunks(chunk_len)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|lookup| enricher.fetch(lookup))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(lookups.chunks(chunk_len))
                .flat_map(|(handle, chunk)| {
                    handle.join().unwrap_or_else(|_| {
                        chunk
                            .iter()
                            .map(|_| Err("enrichment worker panicked".to_string()))
                            .collect()
                    })
                })
                .collect()
        })
    }

    fn record_outcome(
        stats: &mut MoviePassStats,
        movie_id: NaturalId,
        result: Result<EnrichmentOutcome, String>,
    ) -> ExternalData {
        match result {
            Ok(EnrichmentOutcome::Found(data)) => {
                stats.enrichment_found += 1;
                data
            }
            Ok(EnrichmentOutcome::NotFound) => {
                stats.enrichment_not_found += 1;
                debug!("Enrichment[movie:{movie_id}]: not found");
                ExternalData::not_fetched()
            }
            Err(error) => {
                stats.enrichment_failed += 1;
                warn!("Enrichment[movie:{movie_id}]: giving up: {error}");
                ExternalData::not_fetched()
            }
        }
    }

    fn flush_batch<W: Write>(
        &self,
        batch: &mut Vec<MovieDoc>,
        writer: &mut NdjsonWriter<W>,
        stats: &mut MoviePassStats,
    ) -> Result<(), String> {
        if let Some(enricher) = self.enricher {
            let lookups: Vec<EnrichmentLookup> =
                batch.iter().map(|doc| self.lookup_for(doc)).collect();
            let results = self.fetch_batch(enricher, &lookups);
            for (doc, result) in batch.iter_mut().zip(results) {
                doc.external_data = Some(Self::record_outcome(stats, doc.movie_id, result));
            }
        }
        for mut doc in batch.drain(..) {
            let now = timestamp_now();
            doc.created_at = now.clone();
            doc.updated_at = now;
            writer.write(&doc)?;
            stats.written += 1;
        }
        Ok(())
    }

    /// Streams every row of `reader` into `writer`. Only write failures are
    /// errors; malformed rows are skipped and counted.
    pub fn run<R: Read, W: Write>(
        &self,
        reader: &mut RecordReader<R>,
        writer: &mut NdjsonWriter<W>,
    ) -> Result<MoviePassStats, String> {
        let id_column = reader.column("movieId", 0);
        let title_column = reader.column("title", 1);
        let genres_column = reader.column("genres", 2);
        let batch_size = self.batch_size();

        let mut stats = MoviePassStats::default();
        let mut batch: Vec<MovieDoc> = Vec::with_capacity(batch_size);
        while let Some(row) = reader.next_row() {
            let Some(movie_id) = row.parse::<NaturalId>(id_column) else {
                reader.skip_row(&row, "unparseable movieId");
                continue;
            };
            let raw_title = row.field(title_column).unwrap_or_default();
            if raw_title.trim().is_empty() {
                reader.skip_row(&row, "missing title");
                continue;
            }
            let raw_genres = row.field(genres_column).unwrap_or_default();
            batch.push(self.assemble(movie_id, raw_title, raw_genres));
            if batch.len() >= batch_size {
                self.flush_batch(&mut batch, writer, &mut stats)?;
            }
        }
        reader.ensure_complete()?;
        self.flush_batch(&mut batch, writer, &mut stats)?;

        stats.rows_skipped = reader.rows_skipped();
        Ok(stats)
    }
}
