// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Compile task/flow configuration into a dispatch table.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the nodes document (TOML).
    #[arg(long, value_name = "PATH", default_value = "nodes.toml")]
    pub nodes: String,

    /// Path to a flow document (TOML). May be given multiple times.
    #[arg(long, value_name = "PATH", required = true)]
    pub flow: Vec<String>,

    /// Write the dispatch table here instead of stdout.
    #[arg(long, value_name = "PATH")]
    pub output: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print a summary, but don't emit the table.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_is_repeatable() {
        let args = CliArgs::try_parse_from([
            "flowdag",
            "--nodes",
            "n.toml",
            "--flow",
            "a.toml",
            "--flow",
            "b.toml",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.flow, vec!["a.toml", "b.toml"]);
        assert!(args.dry_run);
        assert!(args.output.is_none());
    }

    #[test]
    fn at_least_one_flow_document() {
        assert!(CliArgs::try_parse_from(["flowdag", "--nodes", "n.toml"]).is_err());
    }
}
