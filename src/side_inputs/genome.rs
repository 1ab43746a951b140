//! Genome tag dictionary and per-movie top-K relevance selection.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::documents::GenomeTag;
use crate::identity_mapper::NaturalId;
use crate::record_reader::RecordReader;
use crate::side_inputs::SideTable;

/// Per-movie candidate lists are compacted once they grow past this many
/// multiples of `top_k`, keeping memory proportional to movies, not rows.
const CANDIDATE_COMPACTION_FACTOR: usize = 4;

/// Tag id and relevance pair before name resolution.
type ScoredTag = (i64, f64);

/// Reads the `tagId,tag` dictionary.
pub fn read_genome_tag_names<R: Read>(reader: &mut RecordReader<R>) -> SideTable<String> {
    let id_column = reader.column("tagId", 0);
    let name_column = reader.column("tag", 1);

    let mut entries = HashMap::new();
    while let Some(row) = reader.next_row() {
        let Some(tag_id) = row.parse::<i64>(id_column) else {
            reader.skip_row(&row, "unparseable tagId");
            continue;
        };
        let Some(name) = row
            .field(name_column)
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            reader.skip_row(&row, "empty tag name");
            continue;
        };
        entries.insert(tag_id, name.to_string());
    }
    SideTable {
        entries,
        rows_skipped: reader.rows_skipped(),
    }
}

pub fn load_genome_tag_names(path: &Path) -> Result<SideTable<String>, String> {
    let mut reader = RecordReader::open(path)?;
    let table = read_genome_tag_names(&mut reader);
    reader.ensure_complete()?;
    Ok(table)
}

fn compare_candidates(left: &ScoredTag, right: &ScoredTag) -> Ordering {
    right
        .1
        .partial_cmp(&left.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| left.0.cmp(&right.0))
}

/// Highest relevance first, ties by ascending tag id, at most `top_k`.
pub fn select_top_genome_tags(mut candidates: Vec<ScoredTag>, top_k: usize) -> Vec<ScoredTag> {
    candidates.sort_by(compare_candidates);
    candidates.truncate(top_k);
    candidates
}

/// Reads `movieId,tagId,relevance` rows, keeping only named tags at or above
/// `min_relevance` and the `top_k` best of those per movie.
pub fn read_genome_scores<R: Read>(
    reader: &mut RecordReader<R>,
    tag_names: &HashMap<i64, String>,
    min_relevance: f64,
    top_k: usize,
) -> SideTable<Vec<GenomeTag>> {
    let movie_column = reader.column("movieId", 0);
    let tag_column = reader.column("tagId", 1);
    let relevance_column = reader.column("relevance", 2);
    let compaction_threshold = top_k.saturating_mul(CANDIDATE_COMPACTION_FACTOR).max(1);

    let mut candidates: HashMap<NaturalId, Vec<ScoredTag>> = HashMap::new();
    let mut unnamed = 0usize;
    while let Some(row) = reader.next_row() {
        let (Some(movie_id), Some(tag_id), Some(relevance)) = (
            row.parse::<NaturalId>(movie_column),
            row.parse::<i64>(tag_column),
            row.parse::<f64>(relevance_column),
        ) else {
            reader.skip_row(&row, "unparseable genome score");
            continue;
        };
        if !relevance.is_finite() || relevance < min_relevance {
            continue;
        }
        if !tag_names.contains_key(&tag_id) {
            unnamed += 1;
            continue;
        }
        let list = candidates.entry(movie_id).or_default();
        list.push((tag_id, relevance));
        if list.len() > compaction_threshold {
            list.sort_by(compare_candidates);
            list.truncate(top_k);
        }
    }
    if unnamed > 0 {
        debug!(
            "{}: ignored {unnamed} qualifying scores for tags missing from the dictionary",
            reader.label()
        );
    }

    let entries = candidates
        .into_iter()
        .map(|(movie_id, list)| {
            let tags = select_top_genome_tags(list, top_k)
                .into_iter()
                .filter_map(|(tag_id, relevance)| {
                    tag_names.get(&tag_id).map(|name| GenomeTag {
                        tag: name.clone(),
                        relevance,
                    })
                })
                .collect();
            (movie_id, tags)
        })
        .collect();
    SideTable {
        entries,
        rows_skipped: reader.rows_skipped(),
    }
}

pub fn load_genome_scores(
    path: &Path,
    tag_names: &HashMap<i64, String>,
    min_relevance: f64,
    top_k: usize,
) -> Result<SideTable<Vec<GenomeTag>>, String> {
    let mut reader = RecordReader::open(path)?;
    let table = read_genome_scores(&mut reader, tag_names, min_relevance, top_k);
    reader.ensure_complete()?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{read_genome_scores, read_genome_tag_names, select_top_genome_tags};
    use crate::record_reader::RecordReader;

    fn names() -> HashMap<i64, String> {
        HashMap::from([
            (1, "dark".to_string()),
            (2, "funny".to_string()),
            (3, "pixar animation".to_string()),
            (4, "toys".to_string()),
        ])
    }

    #[test]
    fn test_threshold_then_top_k_keeps_two_highest_in_order() {
        let data = "movieId,tagId,relevance\n1,1,0.9\n1,2,0.3\n1,3,0.6\n1,4,0.5\n";
        let mut reader = RecordReader::from_reader("genome-scores", data.as_bytes()).unwrap();
        let table = read_genome_scores(&mut reader, &names(), 0.5, 2);

        let tags = &table.entries[&1];
        let relevances: Vec<f64> = tags.iter().map(|tag| tag.relevance).collect();
        assert_eq!(relevances, vec![0.9, 0.6]);
        assert_eq!(tags[0].tag, "dark");
        assert_eq!(tags[1].tag, "pixar animation");
    }

    #[test]
    fn test_ties_break_by_ascending_tag_id() {
        let selected = select_top_genome_tags(vec![(9, 0.7), (3, 0.7), (5, 0.8), (1, 0.7)], 3);
        assert_eq!(selected, vec![(5, 0.8), (1, 0.7), (3, 0.7)]);
    }

    #[test]
    fn test_compaction_does_not_change_the_selected_set() {
        let mut data = String::from("movieId,tagId,relevance\n");
        for tag_id in 0..50 {
            data.push_str(&format!("7,{tag_id},{}\n", 0.5 + (tag_id % 10) as f64 / 100.0));
        }
        let names: HashMap<i64, String> =
            (0..50).map(|tag_id| (tag_id, format!("tag{tag_id}"))).collect();
        let mut reader = RecordReader::from_reader("genome-scores", data.as_bytes()).unwrap();
        let table = read_genome_scores(&mut reader, &names, 0.5, 2);

        let tags: Vec<&str> = table.entries[&7].iter().map(|tag| tag.tag.as_str()).collect();
        assert_eq!(tags, vec!["tag9", "tag19"]);
    }

    #[test]
    fn test_unnamed_tags_and_movies_below_threshold_are_absent() {
        let data = "movieId,tagId,relevance\n1,99,0.95\n2,1,0.1\n3,x,0.9\n";
        let mut reader = RecordReader::from_reader("genome-scores", data.as_bytes()).unwrap();
        let table = read_genome_scores(&mut reader, &names(), 0.5, 10);

        assert!(table.entries.is_empty());
        assert_eq!(table.rows_skipped, 1);
    }

    #[test]
    fn test_tag_dictionary_skips_blank_names() {
        let data = "tagId,tag\n1,007\n2,\n3,18th century\n";
        let mut reader = RecordReader::from_reader("genome-tags", data.as_bytes()).unwrap();
        let table = read_genome_tag_names(&mut reader);
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[&1], "007");
        assert_eq!(table.rows_skipped, 1);
    }
}
