//! Final counts and flags handed to the report generator.

use std::path::Path;

use log::info;
use serde::Serialize;

use crate::movie_pipeline::MoviePassStats;
use crate::ratings_export::RatingsExportStats;
use crate::side_inputs::SideInputReport;
use crate::similarity_remapper::SimilarityStats;

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCounts {
    pub movies: usize,
    pub ratings: usize,
    pub users: usize,
    pub similarities: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRows {
    pub movies: usize,
    pub ratings: usize,
    pub side_inputs: usize,
    pub similarities: usize,
    pub identity_maps: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentCounts {
    pub enabled: bool,
    pub found: usize,
    pub not_found: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub documents_written: CollectionCounts,
    pub rows_skipped: SkippedRows,
    /// Side sources that were missing or unreadable.
    pub side_input_warnings: usize,
    pub enrichment: EnrichmentCounts,
    pub neighbors_dropped: usize,
    pub subjects_dropped: usize,
    pub movie_identities: usize,
    pub user_identities: usize,
    pub item_map_persisted: bool,
    pub user_map_persisted: bool,
}

impl RunSummary {
    pub fn record_side_inputs(&mut self, report: &SideInputReport) {
        self.side_input_warnings += report.degraded_sources;
        self.rows_skipped.side_inputs += report.rows_skipped;
    }

    pub fn record_movies(&mut self, stats: &MoviePassStats) {
        self.documents_written.movies = stats.written;
        self.rows_skipped.movies = stats.rows_skipped;
        self.enrichment.found = stats.enrichment_found;
        self.enrichment.not_found = stats.enrichment_not_found;
        self.enrichment.failed = stats.enrichment_failed;
    }

    pub fn record_ratings(&mut self, stats: &RatingsExportStats) {
        self.documents_written.ratings = stats.ratings_written;
        self.documents_written.users = stats.users_written;
        self.rows_skipped.ratings = stats.rows_skipped;
    }

    pub fn record_similarities(&mut self, stats: &SimilarityStats) {
        self.documents_written.similarities = stats.written;
        self.rows_skipped.similarities = stats.rows_skipped;
        self.neighbors_dropped = stats.neighbors_dropped;
        self.subjects_dropped = stats.subjects_dropped;
    }

    pub fn log(&self) {
        let written = &self.documents_written;
        let skipped = &self.rows_skipped;
        info!(
            "Run summary: movies={} ratings={} users={} similarities={}",
            written.movies, written.ratings, written.users, written.similarities
        );
        info!(
            "Rows skipped: movies={} ratings={} side_inputs={} similarities={} identity_maps={}; degraded side sources={}",
            skipped.movies,
            skipped.ratings,
            skipped.side_inputs,
            skipped.similarities,
            skipped.identity_maps,
            self.side_input_warnings
        );
        if self.enrichment.enabled {
            info!(
                "Enrichment: found={} not_found={} failed={}",
                self.enrichment.found, self.enrichment.not_found, self.enrichment.failed
            );
        }
        info!(
            "Identities: movies={} (persisted={}) users={} (persisted={}); neighbors dropped={} subjects dropped={}",
            self.movie_identities,
            self.item_map_persisted,
            self.user_identities,
            self.user_map_persisted,
            self.neighbors_dropped,
            self.subjects_dropped
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<(), String> {
        let serialized = serde_json::to_string_pretty(self)
            .map_err(|error| format!("Failed to serialize run summary: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write {}: {error}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::RunSummary;
    use crate::movie_pipeline::MoviePassStats;
    use crate::similarity_remapper::SimilarityStats;

    #[test]
    fn test_summary_serializes_counts_for_report() {
        let mut summary = RunSummary::default();
        summary.enrichment.enabled = true;
        summary.record_movies(&MoviePassStats {
            written: 3,
            rows_skipped: 1,
            enrichment_found: 2,
            enrichment_not_found: 0,
            enrichment_failed: 1,
        });
        summary.record_similarities(&SimilarityStats {
            written: 2,
            rows_skipped: 0,
            neighbors_dropped: 4,
            subjects_dropped: 1,
        });

        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join(super::RUN_SUMMARY_FILE);
        summary.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["documentsWritten"]["movies"], 3);
        assert_eq!(value["documentsWritten"]["similarities"], 2);
        assert_eq!(value["rowsSkipped"]["movies"], 1);
        assert_eq!(value["enrichment"]["failed"], 1);
        assert_eq!(value["neighborsDropped"], 4);
        assert_eq!(value["itemMapPersisted"], false);
    }
}
