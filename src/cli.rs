//! # Command-Line Interface Module
//!
//! Clap derive definitions of the `playbias` binary.
//!
//! ## Commands
//!
//! - `import`: Load a JSON track list into the library database
//! - `biases`: List the registered bias types
//! - `template`: Print a new bias of one type as JSON, ready for editing
//! - `show`: Describe a saved playlist or bias tree
//! - `generate`: Fill a playlist from a saved bias tree
//! - `energy`: Rate how well a list of tracks satisfies a bias tree
//!
//! ## Examples
//!
//! ```bash
//! playbias import ~/exports/library.json
//! playbias template partBias > evening.json
//! playbias generate evening.json --count 20
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser)]
#[command(name = "playbias")]
#[command(about = "playbias: constraint-driven dynamic playlists from composable biases")]
#[command(version)]
pub struct Args {
    /// Library database to use instead of the one in the data directory
    #[arg(long, global = true, env = "PLAYBIAS_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// JSON table of similar artists (`{"artist": ["similar", ...]}`)
    #[arg(long, global = true, env = "PLAYBIAS_SIMILAR", value_hint = clap::ValueHint::FilePath)]
    pub similar: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Import tracks from a JSON file into the library database
    ///
    /// The file holds an array of track objects. Only `uid` is required;
    /// tracks already in the database are replaced.
    Import {
        /// JSON file with the tracks
        #[arg(value_hint = clap::ValueHint::FilePath)]
        path: PathBuf,
    },

    /// List the registered bias types
    Biases,

    /// Print a freshly created bias as JSON
    Template {
        /// Registered name of the bias type, e.g. `partBias`
        name: String,
    },

    /// Describe a saved playlist or bias tree
    Show {
        /// JSON file with a `playlist` or a single bias
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Generate tracks satisfying a saved bias tree
    Generate {
        /// JSON file with a `playlist` or a single bias
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Number of tracks to generate
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Uids of tracks already played, in order
        #[arg(long = "after", value_name = "UID")]
        context: Vec<String>,

        /// Milliseconds to wait for a bias that has not answered yet
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the tracks as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Rate a list of tracks against a saved bias tree (0 is perfect)
    Energy {
        /// JSON file with a `playlist` or a single bias
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Uids of the rated tracks, in playlist order
        #[arg(required = true)]
        uids: Vec<String>,

        /// How many of the leading uids are context that is not rated
        #[arg(long, default_value = "0")]
        context: usize,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Print registered bias names (used by completion scripts)
    #[command(hide = true)]
    CompleteBiases,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_generate_arguments() {
        let args = Args::try_parse_from([
            "playbias", "--db", "lib.db", "generate", "tree.json", "-n", "5", "--after", "a",
            "--after", "b",
        ])
        .unwrap();
        assert_eq!(args.db, Some(PathBuf::from("lib.db")));
        match args.command {
            Command::Generate { file, count, context, timeout_ms, json } => {
                assert_eq!(file, PathBuf::from("tree.json"));
                assert_eq!(count, 5);
                assert_eq!(context, vec!["a", "b"]);
                assert_eq!(timeout_ms, None);
                assert!(!json);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_energy_needs_uids() {
        assert!(Args::try_parse_from(["playbias", "energy", "tree.json"]).is_err());
    }

    #[test]
    fn test_shell_values() {
        let args = Args::try_parse_from(["playbias", "completion", "power-shell"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Completion { shell: Shell::PowerShell }
        ));
    }
}
