//! Rewrites precomputed neighbor lists in terms of mapper-resolved indices.

use std::collections::HashMap;
use std::io::{Read, Write};

use log::debug;

use crate::documents::{timestamp_now, Neighbor, SimilarityDoc};
use crate::identity_mapper::{IdentityMapper, NaturalId};
use crate::ndjson::NdjsonWriter;
use crate::record_reader::RecordReader;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimilarityStats {
    pub written: usize,
    pub rows_skipped: usize,
    pub neighbors_dropped: usize,
    pub subjects_dropped: usize,
}

/// One subject with its neighbors in file (rank) order.
#[derive(Debug, Clone, PartialEq)]
struct NeighborList {
    movie_id: NaturalId,
    neighbors: Vec<(NaturalId, f64)>,
}

/// Groups `movieId,neighborMovieId,sim` rows by subject, first-seen order.
fn read_neighbor_lists<R: Read>(reader: &mut RecordReader<R>) -> Vec<NeighborList> {
    let subject_column = reader.column("movieId", 0);
    let neighbor_column = reader.column("neighborMovieId", 1);
    let sim_column = reader.column("sim", 2);

    let mut lists: Vec<NeighborList> = Vec::new();
    let mut positions: HashMap<NaturalId, usize> = HashMap::new();
    while let Some(row) = reader.next_row() {
        let parsed = row.parse::<NaturalId>(subject_column).and_then(|subject| {
            let neighbor = row.parse::<NaturalId>(neighbor_column)?;
            let sim = row.parse::<f64>(sim_column).filter(|sim| sim.is_finite())?;
            Some((subject, neighbor, sim))
        });
        let Some((subject, neighbor, sim)) = parsed else {
            reader.skip_row(&row, "unparseable similarity row");
            continue;
        };
        let position = *positions.entry(subject).or_insert_with(|| {
            lists.push(NeighborList {
                movie_id: subject,
                neighbors: Vec::new(),
            });
            lists.len() - 1
        });
        lists[position].neighbors.push((neighbor, sim));
    }
    lists
}

pub struct SimilarityRemapper<'a> {
    item_mapper: &'a IdentityMapper,
    allocate: bool,
    k: usize,
    metric: String,
}

impl<'a> SimilarityRemapper<'a> {
    /// `allocate` is true only in create mode; otherwise unknown identifiers
    /// are treated as absent.
    pub fn new(item_mapper: &'a IdentityMapper, allocate: bool, k: usize, metric: &str) -> Self {
        Self {
            item_mapper,
            allocate,
            k: k.max(1),
            metric: metric.to_string(),
        }
    }

    fn remap(&self, list: NeighborList, stats: &mut SimilarityStats) -> Option<SimilarityDoc> {
        let Some(i_idx) = self.item_mapper.resolve(list.movie_id, self.allocate) else {
            debug!(
                "Similarities: dropping subject {} with {} neighbors, no index",
                list.movie_id,
                list.neighbors.len()
            );
            stats.subjects_dropped += 1;
            return None;
        };

        let mut neighbors = Vec::with_capacity(self.k.min(list.neighbors.len()));
        for (movie_id, sim) in list.neighbors {
            if neighbors.len() >= self.k {
                break;
            }
            match self.item_mapper.resolve(movie_id, self.allocate) {
                Some(neighbor_idx) => neighbors.push(Neighbor {
                    movie_id,
                    i_idx: neighbor_idx,
                    sim,
                }),
                None => stats.neighbors_dropped += 1,
            }
        }

        Some(SimilarityDoc {
            id: format!("{}:{}", list.movie_id, self.metric),
            movie_id: list.movie_id,
            i_idx,
            metric: self.metric.clone(),
            k: self.k,
            neighbors,
            updated_at: timestamp_now(),
        })
    }

    pub fn run<R: Read, W: Write>(
        &self,
        reader: &mut RecordReader<R>,
        writer: &mut NdjsonWriter<W>,
    ) -> Result<SimilarityStats, String> {
        let lists = read_neighbor_lists(reader);
        reader.ensure_complete()?;
        let mut stats = SimilarityStats {
            rows_skipped: reader.rows_skipped(),
            ..SimilarityStats::default()
        };
        for list in lists {
            if let Some(document) = self.remap(list, &mut stats) {
                writer.write(&document)?;
                stats.written += 1;
            }
        }
        Ok(stats)
    }
}
