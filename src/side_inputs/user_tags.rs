//! Free-text user tags aggregated per movie by frequency.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::identity_mapper::NaturalId;
use crate::record_reader::RecordReader;
use crate::side_inputs::SideTable;

/// Tag occurrences for one movie in first-seen order.
#[derive(Debug, Default)]
struct TagFrequencies {
    ordered: Vec<(String, usize)>,
    positions: HashMap<String, usize>,
}

impl TagFrequencies {
    fn record(&mut self, key: String, display: String) {
        match self.positions.get(&key) {
            Some(position) => self.ordered[*position].1 += 1,
            None => {
                self.positions.insert(key, self.ordered.len());
                self.ordered.push((display, 1));
            }
        }
    }

    /// Most frequent first; the stable sort keeps first-seen order on ties.
    fn top(mut self, top_k: usize) -> Vec<String> {
        self.ordered.sort_by(|left, right| right.1.cmp(&left.1));
        self.ordered
            .into_iter()
            .take(top_k)
            .map(|(display, _)| display)
            .collect()
    }
}

/// Collapses inner whitespace. Returns the grouping key (lowercased) and the
/// display form (first-seen spelling), or `None` for blank tags.
pub fn normalize_tag(raw: &str) -> Option<(String, String)> {
    let display = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if display.is_empty() {
        return None;
    }
    Some((display.to_lowercase(), display))
}

/// Reads `userId,movieId,tag,timestamp` rows into the `top_k` most frequent
/// tags per movie.
pub fn read_user_tags<R: Read>(reader: &mut RecordReader<R>, top_k: usize) -> SideTable<Vec<String>> {
    let movie_column = reader.column("movieId", 1);
    let tag_column = reader.column("tag", 2);

    let mut frequencies: HashMap<NaturalId, TagFrequencies> = HashMap::new();
    while let Some(row) = reader.next_row() {
        let Some(movie_id) = row.parse::<NaturalId>(movie_column) else {
            reader.skip_row(&row, "unparseable movieId");
            continue;
        };
        let Some((key, display)) = row.field(tag_column).and_then(normalize_tag) else {
            reader.skip_row(&row, "blank tag");
            continue;
        };
        frequencies.entry(movie_id).or_default().record(key, display);
    }

    let entries = frequencies
        .into_iter()
        .map(|(movie_id, tags)| (movie_id, tags.top(top_k)))
        .collect();
    SideTable {
        entries,
        rows_skipped: reader.rows_skipped(),
    }
}

pub fn load_user_tags(path: &Path, top_k: usize) -> Result<SideTable<Vec<String>>, String> {
    let mut reader = RecordReader::open(path)?;
    let table = read_user_tags(&mut reader, top_k);
    reader.ensure_complete()?;
    Ok(table)
}
