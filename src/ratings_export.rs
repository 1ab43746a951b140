//! Ratings and users collections, produced from a single pass over the
//! ratings source. The same pass folds per-movie rating statistics for the
//! movie pass.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

use crate::config::IdentityMode;
use crate::documents::{timestamp_now, unix_to_rfc3339, RatingDoc, UserDoc};
use crate::identity_mapper::{IdentityMapper, NaturalId, SequentialIndex};
use crate::ndjson::NdjsonWriter;
use crate::record_reader::RecordReader;
use crate::side_inputs::rating_stats::{RatingAccumulator, RatingColumns};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingsExportStats {
    pub ratings_written: usize,
    pub users_written: usize,
    pub rows_skipped: usize,
}

/// Output of the ratings pass. `movie_ratings` holds one accumulator per
/// movie seen in a valid row, whether or not any collection was written.
#[derive(Debug, Default)]
pub struct RatingsPass {
    pub stats: RatingsExportStats,
    pub movie_ratings: HashMap<NaturalId, RatingAccumulator>,
}

#[derive(Default)]
struct UserState {
    accumulator: RatingAccumulator,
    index: Option<SequentialIndex>,
}

pub struct RatingsExport<'a> {
    user_mapper: &'a IdentityMapper,
    identity_mode: IdentityMode,
}

impl<'a> RatingsExport<'a> {
    pub fn new(user_mapper: &'a IdentityMapper, identity_mode: IdentityMode) -> Self {
        Self {
            user_mapper,
            identity_mode,
        }
    }

    fn resolve_user(&self, user_id: NaturalId) -> Option<SequentialIndex> {
        match self.identity_mode {
            IdentityMode::Off => None,
            mode => self
                .user_mapper
                .resolve(user_id, mode == IdentityMode::Create),
        }
    }

    /// Writes one rating document per valid row and, once the source is
    /// exhausted, one user document per distinct user ordered by `userId`.
    /// Either writer may be absent when its collection is disabled. Every
    /// occurrence of a duplicate row is counted.
    pub fn run<R: Read, W: Write>(
        &self,
        reader: &mut RecordReader<R>,
        mut ratings_writer: Option<&mut NdjsonWriter<W>>,
        users_writer: Option<&mut NdjsonWriter<W>>,
    ) -> Result<RatingsPass, String> {
        let columns = RatingColumns::resolve(reader);
        let mut stats = RatingsExportStats::default();
        let mut movie_ratings: HashMap<NaturalId, RatingAccumulator> = HashMap::new();
        let mut users: BTreeMap<NaturalId, UserState> = BTreeMap::new();

        while let Some(row) = reader.next_row() {
            let Some(rating) = columns.parse(&row) else {
                reader.skip_row(&row, "unparseable rating row");
                continue;
            };
            movie_ratings
                .entry(rating.movie_id)
                .or_default()
                .record(rating.rating, rating.timestamp);
            if let Some(writer) = ratings_writer.as_deref_mut() {
                writer.write(&RatingDoc {
                    user_id: rating.user_id,
                    movie_id: rating.movie_id,
                    rating: rating.rating,
                    timestamp: rating.timestamp,
                })?;
                stats.ratings_written += 1;
            }
            if users_writer.is_some() {
                let state = users.entry(rating.user_id).or_insert_with(|| UserState {
                    accumulator: RatingAccumulator::default(),
                    index: self.resolve_user(rating.user_id),
                });
                state.accumulator.record(rating.rating, rating.timestamp);
            }
        }
        reader.ensure_complete()?;

        if let Some(writer) = users_writer {
            for (user_id, state) in users {
                let Some(average_rating) = state.accumulator.mean() else {
                    continue;
                };
                writer.write(&UserDoc {
                    user_id,
                    u_idx: state.index,
                    ratings_count: state.accumulator.count(),
                    average_rating,
                    last_rated_at: state.accumulator.last_timestamp().and_then(unix_to_rfc3339),
                    created_at: timestamp_now(),
                })?;
                stats.users_written += 1;
            }
        }

        stats.rows_skipped = reader.rows_skipped();
        Ok(RatingsPass {
            stats,
            movie_ratings,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::Value;

    use super::RatingsExport;
    use crate::config::IdentityMode;
    use crate::identity_mapper::{IdentityKind, IdentityMapper};
    use crate::ndjson::NdjsonWriter;
    use crate::record_reader::tests::FailingSource;
    use crate::record_reader::RecordReader;

    const RATINGS: &str = "userId,movieId,rating,timestamp\n\
                           7,1,4.0,100\n\
                           3,1,3.0,10\n\
                           7,2,5.0,50\n\
                           x,2,5.0,50\n\
                           3,2,2.0,300\n\
                           7,3,nan,60\n";

    fn lines(writer: NdjsonWriter<Vec<u8>>) -> Vec<Value> {
        let (bytes, _) = writer.finish().unwrap();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_ratings_and_users_from_one_pass() {
        let mapper = IdentityMapper::new(IdentityKind::User);
        let export = RatingsExport::new(&mapper, IdentityMode::Create);
        let mut reader = RecordReader::from_reader("ratings", RATINGS.as_bytes()).unwrap();
        let mut ratings = NdjsonWriter::new("ratings", Vec::new());
        let mut users = NdjsonWriter::new("users", Vec::new());

        let stats = export
            .run(&mut reader, Some(&mut ratings), Some(&mut users))
            .unwrap()
            .stats;

        assert_eq!(stats.ratings_written, 4);
        assert_eq!(stats.users_written, 2);
        assert_eq!(stats.rows_skipped, 2);

        let ratings = lines(ratings);
        assert_eq!(ratings[0]["userId"], 7);
        assert_eq!(ratings[0]["rating"], 4.0);
        assert_eq!(ratings[3]["timestamp"], 300);

        let users = lines(users);
        assert_eq!(users[0]["userId"], 3);
        assert_eq!(users[0]["uIdx"], 1);
        assert_eq!(users[0]["ratingsCount"], 2);
        assert_eq!(users[0]["averageRating"], 2.5);
        assert_eq!(users[0]["lastRatedAt"], "1970-01-01T00:05:00Z");
        assert_eq!(users[1]["userId"], 7);
        assert_eq!(users[1]["uIdx"], 0);
        assert_eq!(users[1]["averageRating"], 4.5);
        assert!(users[1]["createdAt"].is_string());
        assert!(mapper.has_changed());
    }

    #[test]
    fn test_lookup_mode_leaves_unknown_users_unindexed() {
        let mapper = IdentityMapper::with_entries(IdentityKind::User, HashMap::from([(7, 4)]));
        let export = RatingsExport::new(&mapper, IdentityMode::Lookup);
        let mut reader = RecordReader::from_reader("ratings", RATINGS.as_bytes()).unwrap();
        let mut users = NdjsonWriter::new("users", Vec::new());

        let stats = export.run(&mut reader, None, Some(&mut users)).unwrap().stats;

        assert_eq!(stats.ratings_written, 0);
        let users = lines(users);
        assert!(users[0].get("uIdx").is_none());
        assert_eq!(users[1]["uIdx"], 4);
        assert!(!mapper.has_changed());
    }

    #[test]
    fn test_disabled_users_collection_allocates_nothing() {
        let mapper = IdentityMapper::new(IdentityKind::User);
        let export = RatingsExport::new(&mapper, IdentityMode::Create);
        let mut reader = RecordReader::from_reader("ratings", RATINGS.as_bytes()).unwrap();
        let mut ratings = NdjsonWriter::new("ratings", Vec::new());

        let stats = export.run(&mut reader, Some(&mut ratings), None).unwrap().stats;

        assert_eq!(stats.ratings_written, 4);
        assert_eq!(stats.users_written, 0);
        assert_eq!(mapper.count(), 0);
    }

    #[test]
    fn test_movie_statistics_group_by_movie_and_skip_malformed_rows() {
        let data = "userId,movieId,rating,timestamp\n\
                    1,10,3.0,10\n\
                    2,10,5.0,30\n\
                    3,10,4.0,20\n\
                    1,20,abc,6\n\
                    1,,4.0,7\n\
                    1,20,NaN,8\n\
                    4,20,2.0,5\n";
        let mapper = IdentityMapper::new(IdentityKind::User);
        let export = RatingsExport::new(&mapper, IdentityMode::Off);
        let mut reader = RecordReader::from_reader("ratings", data.as_bytes()).unwrap();

        let pass = export.run::<_, Vec<u8>>(&mut reader, None, None).unwrap();

        assert_eq!(pass.stats.rows_skipped, 3);
        assert_eq!(pass.movie_ratings.len(), 2);
        let movie = &pass.movie_ratings[&10];
        assert_eq!(movie.count(), 3);
        assert_eq!(movie.mean(), Some(4.0));
        assert_eq!(movie.last_timestamp(), Some(30));
        assert_eq!(pass.movie_ratings[&20].count(), 1);
        assert_eq!(mapper.count(), 0);
    }

    #[test]
    fn test_duplicate_rows_are_each_counted() {
        let data = "userId,movieId,rating,timestamp\n\
                    1,10,4.0,10\n\
                    1,10,4.0,10\n";
        let mapper = IdentityMapper::new(IdentityKind::User);
        let export = RatingsExport::new(&mapper, IdentityMode::Off);
        let mut reader = RecordReader::from_reader("ratings", data.as_bytes()).unwrap();
        let mut users = NdjsonWriter::new("users", Vec::new());

        let pass = export.run(&mut reader, None, Some(&mut users)).unwrap();

        assert_eq!(pass.movie_ratings[&10].count(), 2);
        assert_eq!(lines(users)[0]["ratingsCount"], 2);
    }

    #[test]
    fn test_read_failure_fails_the_pass_before_users_are_written() {
        let mapper = IdentityMapper::new(IdentityKind::User);
        let export = RatingsExport::new(&mapper, IdentityMode::Create);
        let source = FailingSource::new("userId,movieId,rating,timestamp\n7,1,4.0,100\n");
        let mut reader = RecordReader::from_reader("ratings", source).unwrap();
        let mut users = NdjsonWriter::new("users", Vec::new());

        let result = export.run(&mut reader, None, Some(&mut users));

        let error = result.unwrap_err();
        assert!(error.contains("ratings"));
        assert!(error.contains("disk gone"));
        assert!(lines(users).is_empty());
    }
}
