//! Output document shapes, one per NDJSON collection.

use serde::Serialize;

use crate::identity_mapper::{NaturalId, SequentialIndex};

/// Cross-catalog identifiers for one movie.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovieLinks {
    pub movielens: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imdb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmdb: Option<String>,
}

impl MovieLinks {
    /// Numeric TMDB id, used as the enrichment lookup key.
    pub fn tmdb_id(&self) -> Option<u64> {
        self.tmdb.as_deref().and_then(|value| value.parse().ok())
    }
}

/// Genome tag attached to a movie with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenomeTag {
    pub tag: String,
    pub relevance: f64,
}

/// Aggregated rating statistics for one movie.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingStats {
    pub average: f64,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rated_at: Option<String>,
}

/// Cast member returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastMember {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

/// Externally fetched enrichment. `tmdb_fetched == false` marks a movie the
/// service could not (or was not able to) describe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cast: Vec<CastMember>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue: Option<u64>,
    pub tmdb_fetched: bool,
}

impl ExternalData {
    /// Marker payload for a movie whose lookup did not produce data.
    pub fn not_fetched() -> Self {
        Self::default()
    }
}

/// Denormalized movie document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieDoc {
    pub movie_id: NaturalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i_idx: Option<SequentialIndex>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<MovieLinks>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genome_tags: Vec<GenomeTag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_stats: Option<RatingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_data: Option<ExternalData>,
    pub created_at: String,
    pub updated_at: String,
}

/// One individual rating.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingDoc {
    pub user_id: NaturalId,
    pub movie_id: NaturalId,
    pub rating: f64,
    pub timestamp: i64,
}

/// One distinct rating user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub user_id: NaturalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub u_idx: Option<SequentialIndex>,
    pub ratings_count: u64,
    pub average_rating: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rated_at: Option<String>,
    pub created_at: String,
}

/// Neighbor entry in a similarity document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub movie_id: NaturalId,
    pub i_idx: SequentialIndex,
    pub sim: f64,
}

/// Precomputed neighbor list rewritten in resolved indices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub movie_id: NaturalId,
    pub i_idx: SequentialIndex,
    pub metric: String,
    pub k: usize,
    pub neighbors: Vec<Neighbor>,
    pub updated_at: String,
}

/// Current UTC time as RFC 3339 with second precision.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Unix seconds rendered as RFC 3339; `None` for out-of-range values.
pub fn unix_to_rfc3339(seconds: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(seconds, 0)
        .map(|moment| moment.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::{unix_to_rfc3339, ExternalData, MovieDoc, MovieLinks, SimilarityDoc};

    #[test]
    fn test_movie_doc_omits_absent_fields_and_keeps_empty_genres() {
        let doc = MovieDoc {
            movie_id: 1,
            i_idx: None,
            title: "Toy Story".to_string(),
            year: Some(1995),
            genres: Vec::new(),
            links: None,
            genome_tags: Vec::new(),
            user_tags: Vec::new(),
            rating_stats: None,
            external_data: Some(ExternalData::not_fetched()),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        };
        let rendered = serde_json::to_string(&doc).unwrap();
        assert_eq!(
            rendered,
            r#"{"movieId":1,"title":"Toy Story","year":1995,"genres":[],"externalData":{"tmdbFetched":false},"createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#
        );
    }

    #[test]
    fn test_similarity_doc_uses_underscore_id_and_index_key() {
        let doc = SimilarityDoc {
            id: "1:cosine".to_string(),
            movie_id: 1,
            i_idx: 0,
            metric: "cosine".to_string(),
            k: 20,
            neighbors: Vec::new(),
            updated_at: "t".to_string(),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], "1:cosine");
        assert_eq!(value["iIdx"], 0);
    }

    #[test]
    fn test_tmdb_id_parses_numeric_links_only() {
        let links = MovieLinks {
            movielens: "1".to_string(),
            imdb: None,
            tmdb: Some("862".to_string()),
        };
        assert_eq!(links.tmdb_id(), Some(862));
        let blank = MovieLinks::default();
        assert_eq!(blank.tmdb_id(), None);
    }

    #[test]
    fn test_unix_to_rfc3339_formats_utc_seconds() {
        assert_eq!(unix_to_rfc3339(30).as_deref(), Some("1970-01-01T00:00:30Z"));
    }
}
