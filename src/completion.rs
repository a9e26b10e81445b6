//! # Shell Completion Module
//!
//! Completion scripts for the `playbias` binary, plus the bias name list the
//! scripts can offer for `playbias template`.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! playbias completion bash > ~/.local/share/bash-completion/completions/playbias
//!
//! # Generate zsh completions
//! playbias completion zsh > ~/.config/zsh/completions/_playbias
//!
//! # Offer bias names for `template` in fish
//! complete -c playbias -f -n '__fish_seen_subcommand_from template' -a '(playbias complete-biases)'
//! ```

use crate::factory::BiasFactory;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Registered bias names with their descriptions, tab separated, sorted by
/// name. Fish shows the part after the tab as a hint.
#[must_use]
pub fn get_bias_completions(factory: &BiasFactory) -> Vec<String> {
    let mut completions: Vec<String> = factory
        .providers()
        .iter()
        .map(|provider| format!("{}\t{}", provider.name(), provider.display_name()))
        .collect();
    completions.sort();
    completions
}

/// Print bias names for shell completion
pub fn print_bias_completions(factory: &BiasFactory) -> io::Result<()> {
    let mut out = io::stdout().lock();
    for completion in get_bias_completions(factory) {
        writeln!(out, "{completion}")?;
    }
    Ok(())
}
