// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `uibuild`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "uibuild",
    version,
    about = "Incremental build orchestrator for a multi-package front-end workspace.",
    long_about = None
)]
pub struct CliArgs {
    /// Packages to build (with their workspace dependencies).
    ///
    /// Builds every package when omitted.
    #[arg(value_name = "PACKAGE")]
    pub packages: Vec<String>,

    /// Keep running and rebuild on file changes.
    #[arg(short, long)]
    pub watch: bool,

    /// Production asset treatment (minified, no sourcemaps).
    #[arg(short, long)]
    pub prod: bool,

    /// Set the debug flag in the client bootstrap script.
    #[arg(short, long)]
    pub debug: bool,

    /// Type-check `tests` directories too.
    #[arg(long)]
    pub test: bool,

    /// Remove build-temp and output directories before building.
    #[arg(short, long)]
    pub clean: bool,

    /// Skip the type-check stage (no manifest is published).
    #[arg(long)]
    pub no_typecheck: bool,

    /// Skip the style stage (no manifest is published).
    #[arg(long)]
    pub no_style: bool,

    /// Inject a remote console logger posting to this URL into the bootstrap script.
    #[arg(long, value_name = "URL")]
    pub remote_log: Option<String>,

    /// Repository root. Defaults to the current working directory.
    #[arg(long, value_name = "DIR")]
    pub root: Option<String>,

    /// Path to the config file (TOML), relative to the root.
    #[arg(long, value_name = "PATH", default_value = "uibuild.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `UIBUILD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse packages and print the build order without building.
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
