//! Keyed side-inputs joined onto each movie document.
//!
//! Every source is optional: a missing or unreadable file yields an empty
//! mapping and a warning, and the matching document field is simply absent.
//! Per-movie rating statistics come from the ratings pass and are taken over
//! as they are.

pub mod genome;
pub mod links;
pub mod rating_stats;
pub mod user_tags;

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::config::{InputConfig, TagsConfig};
use crate::documents::{GenomeTag, MovieLinks, RatingStats};
use crate::identity_mapper::NaturalId;
use rating_stats::RatingAccumulator;

/// Mapping produced by one loader plus its row-level skip count.
#[derive(Debug)]
pub struct SideTable<T> {
    pub entries: HashMap<i64, T>,
    pub rows_skipped: usize,
}

impl<T> Default for SideTable<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            rows_skipped: 0,
        }
    }
}

/// Loader outcome totals for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideInputReport {
    /// Sources that were missing or unreadable.
    pub degraded_sources: usize,
    pub rows_skipped: usize,
}

/// All side-loaded mappings, each independently defaultable to empty.
#[derive(Debug, Default)]
pub struct SideInputs {
    pub links: HashMap<NaturalId, MovieLinks>,
    pub genome_tags: HashMap<NaturalId, Vec<GenomeTag>>,
    pub user_tags: HashMap<NaturalId, Vec<String>>,
    pub rating_stats: HashMap<NaturalId, RatingAccumulator>,
}

impl SideInputs {
    /// Loads every side source named in `input`. `rating_stats` is the output
    /// of the ratings pass; the ratings source is not read again here.
    pub fn load(
        input: &InputConfig,
        tags: &TagsConfig,
        rating_stats: HashMap<NaturalId, RatingAccumulator>,
    ) -> (Self, SideInputReport) {
        let mut report = SideInputReport::default();

        let links = load_or_empty(
            "links",
            &input.path_of(&input.links_file),
            &mut report,
            links::load_links,
        );
        let tag_names = load_or_empty(
            "genome tags",
            &input.path_of(&input.genome_tags_file),
            &mut report,
            genome::load_genome_tag_names,
        );
        let genome_tags = if tag_names.is_empty() {
            warn!("Genome scores skipped: no genome tag names available");
            HashMap::new()
        } else {
            load_or_empty(
                "genome scores",
                &input.path_of(&input.genome_scores_file),
                &mut report,
                |path| {
                    genome::load_genome_scores(
                        path,
                        &tag_names,
                        tags.min_relevance,
                        tags.top_genome_tags,
                    )
                },
            )
        };
        let user_tags = load_or_empty(
            "user tags",
            &input.path_of(&input.tags_file),
            &mut report,
            |path| user_tags::load_user_tags(path, tags.top_user_tags),
        );

        (
            Self {
                links,
                genome_tags,
                user_tags,
                rating_stats,
            },
            report,
        )
    }

    pub fn links_for(&self, movie_id: NaturalId) -> Option<&MovieLinks> {
        self.links.get(&movie_id)
    }

    pub fn genome_tags_for(&self, movie_id: NaturalId) -> Vec<GenomeTag> {
        self.genome_tags.get(&movie_id).cloned().unwrap_or_default()
    }

    pub fn user_tags_for(&self, movie_id: NaturalId) -> Vec<String> {
        self.user_tags.get(&movie_id).cloned().unwrap_or_default()
    }

    pub fn rating_stats_for(&self, movie_id: NaturalId) -> Option<RatingStats> {
        self.rating_stats
            .get(&movie_id)
            .and_then(RatingAccumulator::to_stats)
    }
}

fn load_or_empty<T, F>(
    label: &str,
    path: &Path,
    report: &mut SideInputReport,
    loader: F,
) -> HashMap<i64, T>
where
    F: FnOnce(&Path) -> Result<SideTable<T>, String>,
{
    match loader(path) {
        Ok(table) => {
            info!(
                "Loaded {label}: {} keys ({} rows skipped)",
                table.entries.len(),
                table.rows_skipped
            );
            report.rows_skipped += table.rows_skipped;
            table.entries
        }
        Err(error) => {
            warn!("Side input '{label}' unavailable, continuing without it: {error}");
            report.degraded_sources += 1;
            HashMap::new()
        }
    }
}
