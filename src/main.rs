//! # playbias
//!
//! Command-line front end of the bias engine: imports a track library into
//! SQLite, inspects saved bias trees and generates playlists from them.
//!
//! ## Logging
//!
//! Controlled via `RUST_LOG`:
//! - `RUST_LOG=debug playbias generate tree.json` - Solver and lookup decisions
//! - `RUST_LOG=playbias::bias=trace playbias generate tree.json` - Every bias event

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info, warn};
use playbias::backend::MemoryBackend;
use playbias::bias::outline;
use playbias::config::RuntimeConfig;
use playbias::db::{self, SqliteBackend};
use playbias::factory::{BiasFactory, Services};
use playbias::similarity::{SimilarArtistCache, SimilarityTable};
use playbias::solver::{BiasSolver, BiasedPlaylist};
use playbias::track::TrackPtr;
use playbias::track_set::{TrackCollection, TrackCollectionPtr};
use playbias::{cli, completion};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn runtime_config(args: &cli::Args) -> RuntimeConfig {
    let config = RuntimeConfig::new().unwrap_or_else(|e| {
        warn!("Using default locations: {e:#}");
        RuntimeConfig::default()
    });
    match &args.db {
        Some(path) => config.with_db_path(path.clone()),
        None => config,
    }
}

/// Bias factory backed by the library database and the similar artist data.
fn library_factory(args: &cli::Args, config: &RuntimeConfig) -> Result<Arc<BiasFactory>> {
    let backend = SqliteBackend::background(db::open(&config.db_path)?);
    let table = match &args.similar {
        Some(path) => SimilarityTable::load(path)?,
        None => SimilarityTable::default(),
    };
    let cache = SimilarArtistCache::load(
        &config.similar_cache_path,
        config.settings.similar_max_age(),
    )?;
    let purged = cache.purge_expired();
    if purged > 0 {
        debug!("Dropped {purged} expired similar artist entries.");
    }
    let services = Services::new(backend)
        .with_similarity(Arc::new(table), Arc::new(cache))
        .with_cache_ttl(config.settings.cache_ttl());
    Ok(BiasFactory::builder(services).with_builtin().build())
}

/// Factory that never touches the library, for listing and templates.
fn offline_factory() -> Arc<BiasFactory> {
    BiasFactory::builder(Services::new(MemoryBackend::new(Vec::new())))
        .with_builtin()
        .build()
}

fn load_playlist(factory: &BiasFactory, file: &Path) -> Result<Arc<BiasedPlaylist>> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let fragment = playbias::bias::Fragment::from_json(&json)
        .with_context(|| format!("Invalid bias tree in {}", file.display()))?;
    BiasedPlaylist::from_fragment(factory, &fragment)
}

fn load_universe(config: &RuntimeConfig) -> Result<TrackCollectionPtr> {
    let conn = db::open(&config.db_path)?;
    let tracks = db::load_tracks(&conn)?;
    if tracks.is_empty() {
        bail!(
            "The library at {} is empty. Import tracks first: playbias import <tracks.json>",
            config.db_path.display()
        );
    }
    info!("Loaded {} tracks from {}", tracks.len(), config.db_path.display());
    Ok(TrackCollection::new(tracks.into_iter().map(Arc::new)))
}

fn resolve_uids(universe: &TrackCollection, uids: &[String]) -> Result<Vec<TrackPtr>> {
    uids.iter()
        .map(|uid| {
            universe
                .index_of(uid)
                .and_then(|index| universe.track(index))
                .cloned()
                .with_context(|| format!("Track `{uid}' is not in the library"))
        })
        .collect()
}

fn print_tracks(tracks: &[TrackPtr], json: bool) -> Result<()> {
    if json {
        let records: Vec<&playbias::track::Track> = tracks.iter().map(|track| track.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for (position, track) in tracks.iter().enumerate() {
        println!(
            "{:>3}  {:<24} {} - {}",
            position + 1,
            track.uid,
            track.artist,
            track.title
        );
    }
    Ok(())
}

/// Main entry point for playbias.
///
/// Initializes logging, parses command-line arguments and runs the command.
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    match &args.command {
        cli::Command::Import { path } => {
            let config = runtime_config(&args);
            info!("Importing tracks from: {}", path.display());
            let tracks = db::read_json(path)?;
            let mut conn = db::open(&config.db_path)?;
            let imported = db::import_tracks(&mut conn, &tracks)?;
            println!(
                "Imported {imported} tracks, {} in the library at {}",
                db::track_count(&conn)?,
                config.db_path.display()
            );
        }
        cli::Command::Biases => {
            for provider in offline_factory().providers() {
                println!(
                    "{:<14} {:<22} {}",
                    provider.name(),
                    provider.display_name(),
                    provider.description()
                );
            }
        }
        cli::Command::Template { name } => {
            let bias = offline_factory().create(name)?;
            println!("{}", bias.to_fragment().to_json()?);
        }
        cli::Command::Show { file } => {
            let playlist = load_playlist(&offline_factory(), file)?;
            let title = playlist.title();
            if !title.is_empty() {
                println!("{title}");
            }
            print!("{}", outline(&playlist.bias()));
        }
        cli::Command::Generate { file, count, context, timeout_ms, json } => {
            let config = runtime_config(&args);
            let factory = library_factory(&args, &config)?;
            let playlist = load_playlist(&factory, file)?;
            let universe = load_universe(&config)?;
            let context = resolve_uids(&universe, context)?;
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.settings.solver_timeout());

            info!("Generating {count} tracks for \"{}\"", playlist.title());
            let solver = BiasSolver::new(playlist.bias(), universe)
                .with_context(context)
                .with_timeout(timeout);
            let tracks = solver.solve(*count);
            print_tracks(&tracks, *json)?;
            if !json {
                println!("energy {:.3}", solver.energy(&tracks));
            }
        }
        cli::Command::Energy { file, uids, context } => {
            let config = runtime_config(&args);
            let factory = library_factory(&args, &config)?;
            let playlist = load_playlist(&factory, file)?;
            let universe = load_universe(&config)?;
            let mut tracks = resolve_uids(&universe, uids)?;
            if *context > tracks.len() {
                bail!("--context {context} is larger than the {} given tracks", tracks.len());
            }
            let rated = tracks.split_off(*context);
            let solver = BiasSolver::new(playlist.bias(), universe).with_context(tracks);
            println!("{:.3}", solver.energy(&rated));
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
        }
        cli::Command::CompleteBiases => {
            completion::print_bias_completions(&offline_factory())?;
        }
    }

    Ok(())
}
