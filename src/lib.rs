//! Constraint-driven dynamic playlists built from composable biases.
//!
//! Core modules:
//! - [`track_set`] - Universes of tracks and the set algebra over them
//! - [`bias`] - The bias contract, leaf biases and composites
//! - [`factory`] - Registry that creates and loads biases by name
//! - [`solver`] - Playlist generation from a bias tree
//!
//! ### Supporting Modules
//!
//! - [`track`] - Track metadata records
//! - [`backend`] - Query contract and the in-memory backend
//! - [`db`] - SQLite library database and backend
//! - [`similarity`] - Similar artist service and its disk cache
//! - [`config`] - Configuration and data directory management
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use playbias::backend::MemoryBackend;
//! use playbias::bias::{GroupBias, UniqueBias};
//! use playbias::factory::{BiasFactory, Services};
//! use playbias::solver::BiasSolver;
//! use playbias::track::Track;
//! use playbias::track_set::TrackCollection;
//!
//! let tracks: Vec<_> = (0..20)
//!     .map(|i| Track::new(format!("track-{i}")).with_genre("Jazz").into_ptr())
//!     .collect();
//! let factory = BiasFactory::builder(Services::new(MemoryBackend::new(tracks.clone())))
//!     .with_builtin()
//!     .build();
//!
//! // "jazz, never twice"
//! let jazz = factory.from_json(
//!     r#"{"tag":"tagMatchBias","children":[{"tag":"field","text":"genre"},
//!         {"tag":"value","text":"Jazz"},{"tag":"condition","text":"equals"}]}"#,
//! )?;
//! let root = GroupBias::and(vec![jazz, UniqueBias::new()]);
//!
//! let solver = BiasSolver::new(root, TrackCollection::new(tracks));
//! let playlist = solver.solve(10);
//! println!("energy {:.3}", solver.energy(&playlist));
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Asynchronous Answers
//!
//! Biases backed by a [`backend::QueryBackend`] or a
//! [`similarity::SimilarityService`] may answer later. They return an
//! outstanding [`track_set::TrackSet`] and deliver the real one as a
//! [`bias::BiasEvent::ResultReady`]. The [`solver::BiasSolver`] waits for it
//! with a timeout and falls back to a random track.
//!
//! ## Error Handling
//!
//! Fallible operations return `anyhow::Result`. Failed lookups are logged and
//! count as matching nothing. Misusing the set algebra (mixing universes,
//! touching outstanding sets) panics.

pub mod backend;
pub mod bias;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod factory;
pub mod similarity;
pub mod solver;
pub mod track;
pub mod track_set;
