//! Persistent run configuration model and defaults.

use std::path::PathBuf;

/// Root configuration loaded from `lensdocs.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Source file locations.
    pub input: InputConfig,
    #[serde(default)]
    /// Output directory.
    pub output: OutputConfig,
    #[serde(default)]
    /// Genome/user tag selection policy.
    pub tags: TagsConfig,
    #[serde(default)]
    /// Sequential index allocation and persistence.
    pub identity: IdentityConfig,
    #[serde(default)]
    /// External metadata enrichment.
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    /// Precomputed similarity remapping.
    pub similarity: SimilarityConfig,
    #[serde(default)]
    /// Which output collections are produced.
    pub collections: CollectionsConfig,
}

/// Input directory and per-source file names.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct InputConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_movies_file")]
    pub movies_file: String,
    #[serde(default = "default_ratings_file")]
    pub ratings_file: String,
    #[serde(default = "default_links_file")]
    pub links_file: String,
    #[serde(default = "default_tags_file")]
    pub tags_file: String,
    #[serde(default = "default_genome_tags_file")]
    pub genome_tags_file: String,
    #[serde(default = "default_genome_scores_file")]
    pub genome_scores_file: String,
    #[serde(default = "default_item_map_file")]
    pub item_map_file: String,
    #[serde(default = "default_user_map_file")]
    pub user_map_file: String,
    #[serde(default = "default_similarities_file")]
    pub similarities_file: String,
}

/// Output location for NDJSON collections and the run summary.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
}

/// Top-K selection policy for genome and user tags.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TagsConfig {
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    #[serde(default = "default_top_tags")]
    pub top_genome_tags: usize,
    #[serde(default = "default_top_tags")]
    pub top_user_tags: usize,
}

/// How unseen natural identifiers are treated.
#[derive(
    Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// No index is attached to movie documents.
    Off,
    /// Existing indices are attached; unknown identifiers stay unindexed.
    Lookup,
    /// Unknown identifiers receive a freshly allocated index.
    #[default]
    Create,
}

/// Identity allocation preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize, Default)]
pub struct IdentityConfig {
    #[serde(default)]
    pub mode: IdentityMode,
    /// Rewrite the mapping tables when new identifiers were allocated.
    #[serde(default)]
    pub persist_updates: bool,
}

/// External metadata service settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Service credential. Usually supplied through `TMDB_API_KEY` instead.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_tmdb_base_url")]
    pub base_url: String,
    #[serde(default = "default_tmdb_image_base_url")]
    pub image_base_url: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_cast")]
    pub max_cast: usize,
}

/// Precomputed neighbor list settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SimilarityConfig {
    #[serde(default = "default_similarity_k")]
    pub k: usize,
    #[serde(default = "default_similarity_metric")]
    pub metric: String,
}

/// Per-collection toggles.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CollectionsConfig {
    #[serde(default = "default_true")]
    pub movies: bool,
    #[serde(default = "default_true")]
    pub ratings: bool,
    #[serde(default = "default_true")]
    pub users: bool,
    #[serde(default = "default_true")]
    pub similarities: bool,
}

impl InputConfig {
    /// Joins a configured file name onto the data directory.
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            movies_file: default_movies_file(),
            ratings_file: default_ratings_file(),
            links_file: default_links_file(),
            tags_file: default_tags_file(),
            genome_tags_file: default_genome_tags_file(),
            genome_scores_file: default_genome_scores_file(),
            item_map_file: default_item_map_file(),
            user_map_file: default_user_map_file(),
            similarities_file: default_similarities_file(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
        }
    }
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            min_relevance: default_min_relevance(),
            top_genome_tags: default_top_tags(),
            top_user_tags: default_top_tags(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: default_tmdb_base_url(),
            image_base_url: default_tmdb_image_base_url(),
            requests_per_second: default_requests_per_second(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            workers: default_workers(),
            max_cast: default_max_cast(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            k: default_similarity_k(),
            metric: default_similarity_metric(),
        }
    }
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            movies: true,
            ratings: true,
            users: true,
            similarities: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_movies_file() -> String {
    "movies.csv".to_string()
}

fn default_ratings_file() -> String {
    "ratings.csv".to_string()
}

fn default_links_file() -> String {
    "links.csv".to_string()
}

fn default_tags_file() -> String {
    "tags.csv".to_string()
}

fn default_genome_tags_file() -> String {
    "genome-tags.csv".to_string()
}

fn default_genome_scores_file() -> String {
    "genome-scores.csv".to_string()
}

fn default_item_map_file() -> String {
    "item_map.csv".to_string()
}

fn default_user_map_file() -> String {
    "user_map.csv".to_string()
}

fn default_similarities_file() -> String {
    "item_topk_cosine_conc.csv".to_string()
}

fn default_min_relevance() -> f64 {
    0.5
}

fn default_top_tags() -> usize {
    10
}

fn default_tmdb_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_tmdb_image_base_url() -> String {
    "https://image.tmdb.org/t/p".to_string()
}

fn default_requests_per_second() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_workers() -> usize {
    1
}

fn default_max_cast() -> usize {
    10
}

fn default_similarity_k() -> usize {
    20
}

fn default_similarity_metric() -> String {
    "cosine".to_string()
}

/// Clamps loaded values into ranges the pipeline can honor.
pub fn sanitize_config(config: Config) -> Config {
    let min_relevance = if config.tags.min_relevance.is_finite() {
        config.tags.min_relevance.clamp(0.0, 1.0)
    } else {
        default_min_relevance()
    };
    let metric = if config.similarity.metric.trim().is_empty() {
        default_similarity_metric()
    } else {
        config.similarity.metric.trim().to_string()
    };

    Config {
        tags: TagsConfig {
            min_relevance,
            top_genome_tags: config.tags.top_genome_tags.clamp(1, 100),
            top_user_tags: config.tags.top_user_tags.clamp(1, 100),
        },
        enrichment: EnrichmentConfig {
            requests_per_second: config.enrichment.requests_per_second.clamp(1, 50),
            max_retries: config.enrichment.max_retries.min(10),
            retry_base_delay_ms: config.enrichment.retry_base_delay_ms.clamp(10, 8_000),
            workers: config.enrichment.workers.clamp(1, 16),
            max_cast: config.enrichment.max_cast.clamp(1, 50),
            ..config.enrichment
        },
        similarity: SimilarityConfig {
            k: config.similarity.k.clamp(1, 1_000),
            metric,
        },
        ..config
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{sanitize_config, Config, IdentityMode};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.input.data_dir, PathBuf::from("data"));
        assert_eq!(config.input.movies_file, "movies.csv");
        assert_eq!(config.input.similarities_file, "item_topk_cosine_conc.csv");
        assert_eq!(config.output.out_dir, PathBuf::from("out"));
        assert!((config.tags.min_relevance - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.tags.top_genome_tags, 10);
        assert_eq!(config.tags.top_user_tags, 10);
        assert_eq!(config.identity.mode, IdentityMode::Create);
        assert!(!config.identity.persist_updates);
        assert!(!config.enrichment.enabled);
        assert_eq!(config.enrichment.requests_per_second, 4);
        assert_eq!(config.enrichment.workers, 1);
        assert_eq!(config.similarity.k, 20);
        assert_eq!(config.similarity.metric, "cosine");
        assert!(config.collections.movies && config.collections.similarities);
    }

    #[test]
    fn test_partial_toml_fills_missing_fields_with_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [tags]
            top_genome_tags = 5

            [identity]
            mode = "lookup"
            persist_updates = true
            "#,
        )
        .expect("config should parse");

        assert_eq!(parsed.tags.top_genome_tags, 5);
        assert_eq!(parsed.tags.top_user_tags, 10);
        assert_eq!(parsed.identity.mode, IdentityMode::Lookup);
        assert!(parsed.identity.persist_updates);
        assert_eq!(parsed.input.ratings_file, "ratings.csv");
        assert_eq!(parsed.enrichment.base_url, "https://api.themoviedb.org/3");
    }

    #[test]
    fn test_sanitize_config_clamps_out_of_range_values() {
        let mut config = Config::default();
        config.tags.min_relevance = 3.0;
        config.tags.top_genome_tags = 0;
        config.enrichment.requests_per_second = 0;
        config.enrichment.workers = 64;
        config.enrichment.max_retries = 99;
        config.similarity.k = 0;
        config.similarity.metric = "  ".to_string();

        let sanitized = sanitize_config(config);

        assert!((sanitized.tags.min_relevance - 1.0).abs() < f64::EPSILON);
        assert_eq!(sanitized.tags.top_genome_tags, 1);
        assert_eq!(sanitized.enrichment.requests_per_second, 1);
        assert_eq!(sanitized.enrichment.workers, 16);
        assert_eq!(sanitized.enrichment.max_retries, 10);
        assert_eq!(sanitized.similarity.k, 1);
        assert_eq!(sanitized.similarity.metric, "cosine");
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = Config::default();
        config.enrichment.api_key = "secret".to_string();
        let rendered = toml::to_string(&config).expect("config should serialize");
        assert!(!rendered.contains("secret"));
    }
}
