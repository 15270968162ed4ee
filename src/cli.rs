//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::loader::{LoaderOptions, PhonyCycleAction, ScopingMode};

/// Load C build manifests into a Ninja-style build graph.
#[derive(Debug, Parser, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Manifest to load: a C source compiled to a shared module, or JSON.
    #[arg(short, long, value_name = "FILE", default_value = "build.c")]
    pub file: PathBuf,

    /// Run as if started in this directory.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Enable verbose diagnostic logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Handling of phony edges that list their own output as an input.
    #[arg(long, value_enum, value_name = "ACTION", default_value_t = PhonyCycleAction::Warn)]
    pub phony_cycle: PhonyCycleAction,

    /// Let edge-local bindings see earlier bindings on the same edge.
    #[arg(long)]
    pub strict_scoping: bool,

    /// Subcommand to execute; defaults to `check` when omitted.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply the default command if none was specified.
    #[must_use]
    pub fn with_default_command(mut self) -> Self {
        if self.command.is_none() {
            self.command = Some(Commands::Check);
        }
        self
    }

    /// Loader settings selected on the command line.
    #[must_use]
    pub const fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            phony_cycle_action: self.phony_cycle,
            scoping: if self.strict_scoping {
                ScopingMode::Strict
            } else {
                ScopingMode::Compat
            },
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            file: PathBuf::from("build.c"),
            directory: None,
            verbose: false,
            phony_cycle: PhonyCycleAction::Warn,
            strict_scoping: false,
            command: None,
        }
        .with_default_command()
    }
}

/// Available top-level commands.
#[derive(Debug, Subcommand, PartialEq, Eq, Clone)]
pub enum Commands {
    /// Load the manifest and summarise the resulting graph.
    Check,
    /// List every output with the rule that builds it.
    Targets,
    /// Print the commands needed to build targets (all edges if none given).
    Commands {
        /// Targets whose commands to print, dependencies first.
        targets: Vec<String>,
    },
    /// Report the jobserver advertised through `MAKEFLAGS`.
    Jobserver {
        /// Connect and count the slots that can be acquired right now.
        #[arg(long)]
        probe: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_to_check() {
        let cli = Cli::try_parse_from(["cnobi"])
            .expect("parse")
            .with_default_command();
        assert_eq!(cli, Cli::default());
        assert_eq!(cli.loader_options(), LoaderOptions::default());
    }

    #[rstest]
    #[case(&["cnobi", "--phony-cycle", "err"], PhonyCycleAction::Error, ScopingMode::Compat)]
    #[case(&["cnobi", "--strict-scoping"], PhonyCycleAction::Warn, ScopingMode::Strict)]
    fn loader_options_follow_flags(
        #[case] args: &[&str],
        #[case] phony: PhonyCycleAction,
        #[case] scoping: ScopingMode,
    ) {
        let options = Cli::try_parse_from(args).expect("parse").loader_options();
        assert_eq!(options.phony_cycle_action, phony);
        assert_eq!(options.scoping, scoping);
    }

    #[rstest]
    fn parses_commands_with_targets() {
        let cli = Cli::try_parse_from(["cnobi", "-C", "out", "commands", "a.o", "b.o"])
            .expect("parse");
        assert_eq!(cli.directory, Some(PathBuf::from("out")));
        assert_eq!(
            cli.command,
            Some(Commands::Commands {
                targets: vec!["a.o".into(), "b.o".into()],
            })
        );
    }

    #[rstest]
    fn rejects_unknown_phony_cycle_action() {
        assert!(Cli::try_parse_from(["cnobi", "--phony-cycle", "ignore"]).is_err());
    }
}
