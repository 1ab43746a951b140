//! Streaming rating aggregation shared by movie stats and user documents.

use std::io::Read;

use crate::documents::{unix_to_rfc3339, RatingStats};
use crate::identity_mapper::NaturalId;
use crate::record_reader::{RecordReader, Row};

/// Running per-key state for one pass over the ratings source. Holds a sum,
/// never a running mean, and never the individual ratings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingAccumulator {
    count: u64,
    sum: f64,
    max_timestamp: Option<i64>,
}

impl RatingAccumulator {
    pub fn record(&mut self, rating: f64, timestamp: i64) {
        self.count += 1;
        self.sum += rating;
        self.max_timestamp = Some(
            self.max_timestamp
                .map_or(timestamp, |current| current.max(timestamp)),
        );
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean computed at read time.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Most recent (maximum) timestamp seen, not the last one read.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.max_timestamp
    }

    pub fn to_stats(&self) -> Option<RatingStats> {
        Some(RatingStats {
            average: self.mean()?,
            count: self.count,
            last_rated_at: self.max_timestamp.and_then(unix_to_rfc3339),
        })
    }
}

/// A validated ratings row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingRow {
    pub user_id: NaturalId,
    pub movie_id: NaturalId,
    pub rating: f64,
    pub timestamp: i64,
}

/// Resolved column positions of the ratings source.
#[derive(Debug, Clone, Copy)]
pub struct RatingColumns {
    user_id: usize,
    movie_id: usize,
    rating: usize,
    timestamp: usize,
}

impl RatingColumns {
    pub fn resolve<R: Read>(reader: &RecordReader<R>) -> Self {
        Self {
            user_id: reader.column("userId", 0),
            movie_id: reader.column("movieId", 1),
            rating: reader.column("rating", 2),
            timestamp: reader.column("timestamp", 3),
        }
    }

    /// Parses every field or rejects the row as a whole.
    pub fn parse(&self, row: &Row) -> Option<RatingRow> {
        let rating = row.parse::<f64>(self.rating).filter(|value| value.is_finite())?;
        Some(RatingRow {
            user_id: row.parse(self.user_id)?,
            movie_id: row.parse(self.movie_id)?,
            rating,
            timestamp: row.parse(self.timestamp)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{RatingAccumulator, RatingColumns};
    use crate::record_reader::RecordReader;

    #[test]
    fn test_accumulator_uses_max_timestamp_not_last_seen() {
        let mut accumulator = RatingAccumulator::default();
        accumulator.record(3.0, 10);
        accumulator.record(5.0, 30);
        accumulator.record(4.0, 20);

        assert_eq!(accumulator.count(), 3);
        assert_eq!(accumulator.mean(), Some(4.0));
        assert_eq!(accumulator.last_timestamp(), Some(30));

        let stats = accumulator.to_stats().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average, 4.0);
        assert_eq!(stats.last_rated_at.as_deref(), Some("1970-01-01T00:00:30Z"));
    }

    #[test]
    fn test_empty_accumulator_has_no_stats() {
        assert_eq!(RatingAccumulator::default().mean(), None);
        assert!(RatingAccumulator::default().to_stats().is_none());
    }

    #[test]
    fn test_rating_rows_reject_any_unparseable_field() {
        let data = "userId,movieId,rating,timestamp\n\
                    1,10,3.0,10\n\
                    1,20,abc,6\n\
                    1,,4.0,7\n\
                    1,20,NaN,8\n";
        let mut reader = RecordReader::from_reader("ratings", data.as_bytes()).unwrap();
        let columns = RatingColumns::resolve(&reader);

        let mut parsed = Vec::new();
        while let Some(row) = reader.next_row() {
            parsed.push(columns.parse(&row));
        }

        assert_eq!(parsed.len(), 4);
        let first = parsed[0].unwrap();
        assert_eq!((first.user_id, first.movie_id, first.timestamp), (1, 10, 10));
        assert_eq!(first.rating, 3.0);
        assert!(parsed[1..].iter().all(Option::is_none));
    }
}
