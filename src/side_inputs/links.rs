//! Cross-catalog links keyed by movie.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::documents::MovieLinks;
use crate::identity_mapper::NaturalId;
use crate::record_reader::RecordReader;
use crate::side_inputs::SideTable;

fn imdb_reference(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(numeric) => Some(format!("tt{numeric:07}")),
        Err(_) => Some(trimmed.to_string()),
    }
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Reads `movieId,imdbId,tmdbId` rows. A repeated movie keeps its last row.
pub fn read_links<R: Read>(reader: &mut RecordReader<R>) -> SideTable<MovieLinks> {
    let movie_column = reader.column("movieId", 0);
    let imdb_column = reader.column("imdbId", 1);
    let tmdb_column = reader.column("tmdbId", 2);

    let mut entries: HashMap<NaturalId, MovieLinks> = HashMap::new();
    while let Some(row) = reader.next_row() {
        let Some(movie_id) = row.parse::<NaturalId>(movie_column) else {
            reader.skip_row(&row, "unparseable movieId");
            continue;
        };
        let links = MovieLinks {
            movielens: movie_id.to_string(),
            imdb: row.field(imdb_column).and_then(imdb_reference),
            tmdb: non_empty(row.field(tmdb_column)),
        };
        entries.insert(movie_id, links);
    }
    SideTable {
        entries,
        rows_skipped: reader.rows_skipped(),
    }
}

pub fn load_links(path: &Path) -> Result<SideTable<MovieLinks>, String> {
    let mut reader = RecordReader::open(path)?;
    let table = read_links(&mut reader);
    reader.ensure_complete()?;
    Ok(table)
}
