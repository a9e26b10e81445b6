//! # Configuration Module
//!
//! Data directory setup and user settings for playbias.
//!
//! ## Data Storage
//!
//! Everything lives in the platform-standard data directory:
//! - Linux: `~/.local/share/playbias/`
//! - macOS: `~/Library/Application Support/playbias/`
//! - Windows: `%APPDATA%\playbias\`
//!
//! | File | Content |
//! |------|---------|
//! | `library.db` | imported tracks (SQLite) |
//! | `similar_artists.json` | similar artist answers with their age |
//! | `config.json` | optional [`Settings`] overrides |
//!
//! ## Settings
//!
//! `config.json` may set any subset of the [`Settings`] fields; missing
//! fields and a missing file fall back to the defaults:
//!
//! ```json
//! { "cache_ttl_secs": 60, "solver_timeout_ms": 2000 }
//! ```

use crate::bias::simple_match::DEFAULT_CACHE_TTL;
use crate::factory::DEFAULT_SIMILAR_MAX_AGE;
use crate::solver::DEFAULT_SOLVER_TIMEOUT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "playbias";
const DB_FILE: &str = "library.db";
const SIMILAR_CACHE_FILE: &str = "similar_artists.json";
const CONFIG_FILE: &str = "config.json";

/// Returns the playbias data directory, creating it if needed.
///
/// # Errors
///
/// Fails when the system data directory cannot be determined or the
/// `playbias` subdirectory cannot be created.
///
/// # Examples
///
/// ```no_run
/// use playbias::config::get_data_dir;
///
/// let dir = get_data_dir()?;
/// println!("Data location: {}", dir.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;
    app_dir(&data_dir)
}

/// Path of the library database, `<data>/playbias/library.db`.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Path of the similar artist cache file.
pub fn get_similar_cache_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(SIMILAR_CACHE_FILE))
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

fn app_dir(base: &Path) -> Result<PathBuf> {
    let dir = base.join(APP_DIR);
    fs::create_dir_all(&dir).with_context(|| {
        format!(
            "Failed to create playbias data directory at {}. Please check file permissions.",
            dir.display()
        )
    })?;
    Ok(dir)
}

/// User tunables read from `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Lifetime of cached query results of the matching biases.
    pub cache_ttl_secs: u64,
    /// Age after which a similar artist answer is asked again.
    pub similar_max_age_secs: u64,
    /// How long generation waits for a bias that has not answered yet.
    pub solver_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            similar_max_age_secs: DEFAULT_SIMILAR_MAX_AGE.as_secs(),
            solver_timeout_ms: DEFAULT_SOLVER_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Settings {
    /// Reads settings from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults.", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn similar_max_age(&self) -> Duration {
        Duration::from_secs(self.similar_max_age_secs)
    }

    #[must_use]
    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the library database
    pub db_path: PathBuf,
    /// Path to the similar artist cache
    pub similar_cache_path: PathBuf,
    pub settings: Settings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from(DB_FILE)),
            similar_cache_path: get_similar_cache_path()
                .unwrap_or_else(|_| PathBuf::from(SIMILAR_CACHE_FILE)),
            settings: Settings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Standard locations plus the settings of `config.json`.
    pub fn new() -> Result<Self> {
        Ok(Self {
            db_path: get_db_path()?,
            similar_cache_path: get_similar_cache_path()?,
            settings: Settings::load(&get_config_path()?)?,
        })
    }

    /// Everything inside `dir` instead of the platform data directory.
    pub fn in_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            db_path: dir.join(DB_FILE),
            similar_cache_path: dir.join(SIMILAR_CACHE_FILE),
            settings: Settings::load(&dir.join(CONFIG_FILE))?,
        })
    }

    #[must_use]
    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    #[must_use]
    pub fn with_similar_cache_path(mut self, path: PathBuf) -> Self {
        self.similar_cache_path = path;
        self
    }
}
