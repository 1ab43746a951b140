mod config;
mod documents;
mod enrichment;
mod identity_mapper;
mod movie_pipeline;
mod ndjson;
mod ratings_export;
mod record_reader;
mod run_summary;
mod side_inputs;
mod similarity_remapper;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};

use config::{sanitize_config, Config, IdentityMode};
use documents::timestamp_now;
use enrichment::rate_gate::RateGate;
use enrichment::tmdb_client::TmdbClient;
use identity_mapper::{IdentityKind, IdentityMapper, NaturalId};
use movie_pipeline::MoviePipeline;
use ndjson::NdjsonWriter;
use ratings_export::{RatingsExport, RatingsPass};
use record_reader::RecordReader;
use run_summary::{RunSummary, RUN_SUMMARY_FILE};
use side_inputs::rating_stats::RatingAccumulator;
use side_inputs::SideInputs;
use similarity_remapper::SimilarityRemapper;

const CONFIG_DIR_NAME: &str = "lensdocs";
const CONFIG_FILE_NAME: &str = "lensdocs.toml";

/// Converts a MovieLens-style dataset into NDJSON collections.
#[derive(Debug, Parser)]
#[command(name = "lensdocs", version, about)]
struct Args {
    /// Configuration file (defaults to the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Enrich movies with TMDB metadata.
    #[arg(long)]
    fetch_external: bool,
    #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
    tmdb_api_key: Option<String>,
    /// TMDB requests per second.
    #[arg(long)]
    tmdb_rate_limit: Option<u32>,
    /// Persist newly allocated identities back to the mapping tables.
    #[arg(long)]
    update_mappings: bool,
    #[arg(long)]
    min_relevance: Option<f64>,
    #[arg(long)]
    top_genome_tags: Option<usize>,
    #[arg(long, value_enum)]
    identity_mode: Option<IdentityMode>,
    #[arg(short, long)]
    verbose: bool,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn load_config(explicit_path: Option<&Path>) -> Result<Config, String> {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|path| path.exists()) {
            Some(path) => path,
            None => {
                info!("No config file found, using defaults");
                return Ok(Config::default());
            }
        },
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|error| format!("Failed to read config {}: {error}", path.display()))?;
    let config = toml::from_str::<Config>(&content)
        .map_err(|error| format!("Failed to parse config {}: {error}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(data_dir) = &args.data_dir {
        config.input.data_dir = data_dir.clone();
    }
    if let Some(out_dir) = &args.out_dir {
        config.output.out_dir = out_dir.clone();
    }
    if args.fetch_external {
        config.enrichment.enabled = true;
    }
    if let Some(api_key) = &args.tmdb_api_key {
        config.enrichment.api_key = api_key.clone();
    }
    if let Some(rate) = args.tmdb_rate_limit {
        config.enrichment.requests_per_second = rate;
    }
    if args.update_mappings {
        config.identity.persist_updates = true;
    }
    if let Some(min_relevance) = args.min_relevance {
        config.tags.min_relevance = min_relevance;
    }
    if let Some(top_genome_tags) = args.top_genome_tags {
        config.tags.top_genome_tags = top_genome_tags;
    }
    if let Some(mode) = args.identity_mode {
        config.identity.mode = mode;
    }
    config
}

/// A missing or unreadable table yields an empty mapper.
fn load_mapper(kind: IdentityKind, path: &Path, summary: &mut RunSummary) -> IdentityMapper {
    if !path.exists() {
        warn!(
            "Identity table {} not found, starting with an empty mapping",
            path.display()
        );
        return IdentityMapper::new(kind);
    }
    match IdentityMapper::load(kind, path) {
        Ok((mapper, rows_skipped)) => {
            info!(
                "Loaded {} {} mappings from {} ({rows_skipped} rows skipped)",
                mapper.count(),
                kind.index_column(),
                path.display()
            );
            summary.rows_skipped.identity_maps += rows_skipped;
            mapper
        }
        Err(error) => {
            warn!("Identity table unusable, starting with an empty mapping: {error}");
            summary.side_input_warnings += 1;
            IdentityMapper::new(kind)
        }
    }
}

fn build_enricher(config: &Config) -> Result<Option<TmdbClient>, String> {
    if !config.enrichment.enabled {
        return Ok(None);
    }
    let rate_gate = Arc::new(RateGate::per_second(
        config.enrichment.requests_per_second,
    ));
    info!(
        "TMDB enrichment enabled: one request every {:?}, {} worker(s)",
        rate_gate.interval(),
        config.enrichment.workers
    );
    let client = TmdbClient::new(&config.enrichment, rate_gate)?;
    Ok(Some(client))
}

fn export_movies(
    config: &Config,
    side_inputs: &SideInputs,
    item_mapper: &IdentityMapper,
    summary: &mut RunSummary,
) -> Result<(), String> {
    let enricher = build_enricher(config)?;
    let mut reader = RecordReader::open(&config.input.path_of(&config.input.movies_file))?;
    let mut writer = NdjsonWriter::create(&config.output.out_dir.join("movies.ndjson"))?;

    let mut pipeline = MoviePipeline::new(side_inputs, item_mapper, config.identity.mode);
    if let Some(client) = enricher.as_ref() {
        pipeline = pipeline.with_enricher(client, config.enrichment.workers);
    }
    let stats = pipeline.run(&mut reader, &mut writer)?;
    writer.finish()?;

    info!(
        "Wrote {} movie documents from {} rows ({} skipped)",
        stats.written,
        reader.rows_read(),
        stats.rows_skipped
    );
    summary.enrichment.enabled = enricher.is_some();
    summary.record_movies(&stats);
    Ok(())
}

fn ratings_pass(config: &Config, user_mapper: &IdentityMapper) -> Result<RatingsPass, String> {
    let mut reader = RecordReader::open(&config.input.path_of(&config.input.ratings_file))?;
    let out_dir = &config.output.out_dir;
    let mut ratings_writer = if config.collections.ratings {
        Some(NdjsonWriter::create(&out_dir.join("ratings.ndjson"))?)
    } else {
        None
    };
    let mut users_writer = if config.collections.users {
        Some(NdjsonWriter::create(&out_dir.join("users.ndjson"))?)
    } else {
        None
    };

    let pass = RatingsExport::new(user_mapper, config.identity.mode).run(
        &mut reader,
        ratings_writer.as_mut(),
        users_writer.as_mut(),
    )?;
    for writer in [ratings_writer, users_writer].into_iter().flatten() {
        writer.finish()?;
    }
    Ok(pass)
}

/// Reads the ratings source once. The returned per-movie statistics feed the
/// movie pass. When neither the ratings nor the users collection is enabled
/// the source is only a side input and a failure degrades to empty.
fn export_ratings(
    config: &Config,
    user_mapper: &IdentityMapper,
    summary: &mut RunSummary,
) -> Result<HashMap<NaturalId, RatingAccumulator>, String> {
    let writes_collections = config.collections.ratings || config.collections.users;
    let pass = match ratings_pass(config, user_mapper) {
        Ok(pass) => pass,
        Err(error) if !writes_collections => {
            warn!("Side input 'rating statistics' unavailable, continuing without it: {error}");
            summary.side_input_warnings += 1;
            return Ok(HashMap::new());
        }
        Err(error) => return Err(error),
    };

    let stats = &pass.stats;
    info!(
        "Wrote {} rating and {} user documents; rating statistics for {} movies ({} rows skipped)",
        stats.ratings_written,
        stats.users_written,
        pass.movie_ratings.len(),
        stats.rows_skipped
    );
    summary.record_ratings(stats);
    Ok(pass.movie_ratings)
}

/// The similarity source is optional; only a write failure is an error.
fn export_similarities(
    config: &Config,
    item_mapper: &IdentityMapper,
    summary: &mut RunSummary,
) -> Result<(), String> {
    let path = config.input.path_of(&config.input.similarities_file);
    let mut reader = match RecordReader::open(&path) {
        Ok(reader) => reader,
        Err(error) => {
            warn!("Similarity source unavailable, skipping collection: {error}");
            summary.side_input_warnings += 1;
            return Ok(());
        }
    };
    let mut writer = NdjsonWriter::create(&config.output.out_dir.join("similarities.ndjson"))?;
    let remapper = SimilarityRemapper::new(
        item_mapper,
        config.identity.mode == IdentityMode::Create,
        config.similarity.k,
        &config.similarity.metric,
    );
    let stats = remapper.run(&mut reader, &mut writer)?;
    writer.finish()?;

    info!(
        "Wrote {} similarity documents ({} neighbors and {} subjects dropped)",
        stats.written, stats.neighbors_dropped, stats.subjects_dropped
    );
    summary.record_similarities(&stats);
    Ok(())
}

fn run(config: &Config) -> Result<RunSummary, String> {
    let mut summary = RunSummary {
        started_at: timestamp_now(),
        ..RunSummary::default()
    };
    let input = &config.input;
    let out_dir = &config.output.out_dir;
    std::fs::create_dir_all(out_dir)
        .map_err(|error| format!("Failed to create {}: {error}", out_dir.display()))?;

    let item_map_path = input.path_of(&input.item_map_file);
    let user_map_path = input.path_of(&input.user_map_file);
    let item_mapper = load_mapper(IdentityKind::Movie, &item_map_path, &mut summary);
    let user_mapper = load_mapper(IdentityKind::User, &user_map_path, &mut summary);

    let collections = &config.collections;
    let movie_ratings = if collections.movies || collections.ratings || collections.users {
        export_ratings(config, &user_mapper, &mut summary)?
    } else {
        HashMap::new()
    };
    if collections.movies {
        let (side_inputs, report) = SideInputs::load(input, &config.tags, movie_ratings);
        summary.record_side_inputs(&report);
        export_movies(config, &side_inputs, &item_mapper, &mut summary)?;
    }
    if collections.similarities {
        export_similarities(config, &item_mapper, &mut summary)?;
    }

    let persist = config.identity.persist_updates;
    summary.item_map_persisted = item_mapper.persist_if_changed(&item_map_path, persist)?;
    summary.user_map_persisted = user_mapper.persist_if_changed(&user_map_path, persist)?;
    if !persist && (item_mapper.has_changed() || user_mapper.has_changed()) {
        info!("New identities were allocated but not persisted (use --update-mappings)");
    }
    summary.movie_identities = item_mapper.count();
    summary.user_identities = user_mapper.count();
    summary.finished_at = timestamp_now();

    summary.write_json(&out_dir.join(RUN_SUMMARY_FILE))?;
    Ok(summary)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = sanitize_config(apply_overrides(
        load_config(args.config.as_deref())?,
        &args,
    ));
    let summary = run(&config)?;
    summary.log();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::{apply_overrides, load_config, run, Args};
    use crate::config::{sanitize_config, Config, IdentityMode};

    const MOVIES: &str = "movieId,title,genres\n\
                          1,Toy Story (1995),Adventure|Animation\n\
                          2,\"American President, The (1995)\",Comedy|Drama|Romance\n";
    const RATINGS: &str = "userId,movieId,rating,timestamp\n\
                           1,1,4.0,964982703\n\
                           1,2,5.0,964981247\n\
                           2,1,3.0,964982224\n";

    fn config_for(data_dir: &std::path::Path, out_dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.input.data_dir = data_dir.to_path_buf();
        config.output.out_dir = out_dir.to_path_buf();
        config
    }

    #[test]
    fn test_overrides_take_precedence_over_file_values() {
        let args = Args::parse_from([
            "lensdocs",
            "--data-dir",
            "/tmp/ml",
            "--tmdb-rate-limit",
            "500",
            "--identity-mode",
            "lookup",
            "--update-mappings",
        ]);
        let config = sanitize_config(apply_overrides(Config::default(), &args));

        assert_eq!(config.input.data_dir, std::path::PathBuf::from("/tmp/ml"));
        assert_eq!(config.enrichment.requests_per_second, 50);
        assert_eq!(config.identity.mode, IdentityMode::Lookup);
        assert!(config.identity.persist_updates);
    }

    #[test]
    fn test_partial_config_file_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lensdocs.toml");
        fs::write(&path, "[tags]\ntop_user_tags = 3\n").unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.tags.top_user_tags, 3);
        assert_eq!(config.tags.top_genome_tags, 10);
        assert_eq!(config.input.movies_file, "movies.csv");
    }

    #[test]
    fn test_missing_movie_source_is_fatal() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let result = run(&config_for(data.path(), out.path()));
        assert!(result.is_err());
    }

    #[test]
    fn test_run_writes_collections_and_persists_identities() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(data.path().join("movies.csv"), MOVIES).unwrap();
        fs::write(data.path().join("ratings.csv"), RATINGS).unwrap();
        let mut config = config_for(data.path(), out.path());
        config.identity.persist_updates = true;

        let summary = run(&config).unwrap();

        assert_eq!(summary.documents_written.movies, 2);
        assert_eq!(summary.documents_written.ratings, 3);
        assert_eq!(summary.documents_written.users, 2);
        assert_eq!(summary.documents_written.similarities, 0);
        assert!(summary.item_map_persisted);
        assert!(summary.user_map_persisted);
        // links, genome tags, user tags and similarities are absent.
        assert_eq!(summary.side_input_warnings, 4);

        let movies = fs::read_to_string(out.path().join("movies.ndjson")).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(movies.lines().nth(1).unwrap()).unwrap();
        assert_eq!(second["title"], "American President, The");
        assert_eq!(second["iIdx"], 1);
        assert_eq!(second["ratingStats"]["count"], 1);

        let item_map = fs::read_to_string(data.path().join("item_map.csv")).unwrap();
        assert_eq!(item_map, "movieId,iIdx\n1,0\n2,1\n");
        assert!(out.path().join("run_summary.json").exists());

        // A second run reuses the persisted table and has nothing to persist.
        let rerun = run(&config).unwrap();
        assert!(!rerun.item_map_persisted);
        assert_eq!(rerun.movie_identities, 2);
    }

    #[test]
    fn test_malformed_rating_rows_are_counted_once() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(data.path().join("movies.csv"), MOVIES).unwrap();
        fs::write(
            data.path().join("ratings.csv"),
            format!("{RATINGS}3,1,bad,964982000\n"),
        )
        .unwrap();

        let summary = run(&config_for(data.path(), out.path())).unwrap();

        assert_eq!(summary.rows_skipped.ratings, 1);
        assert_eq!(summary.rows_skipped.side_inputs, 0);
        assert_eq!(summary.documents_written.ratings, 3);
        let movies = fs::read_to_string(out.path().join("movies.ndjson")).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(movies.lines().next().unwrap()).unwrap();
        assert_eq!(first["ratingStats"]["count"], 2);
    }

    #[test]
    fn test_missing_ratings_degrade_when_only_movies_are_exported() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(data.path().join("movies.csv"), MOVIES).unwrap();
        let mut config = config_for(data.path(), out.path());
        config.collections.ratings = false;
        config.collections.users = false;
        config.collections.similarities = false;

        let summary = run(&config).unwrap();

        assert_eq!(summary.documents_written.movies, 2);
        // links, genome tags, user tags and ratings are absent.
        assert_eq!(summary.side_input_warnings, 4);
        assert!(!out.path().join("ratings.ndjson").exists());
        let movies = fs::read_to_string(out.path().join("movies.ndjson")).unwrap();
        assert!(!movies.contains("ratingStats"));
    }
}
