//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// TestMind: AI-assisted test generation and self-healing.
#[derive(Debug, Parser)]
#[command(name = "testmind", version, about)]
pub struct Cli {
    /// Target project root
    #[arg(long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a default .testmind.yml into the project
    Init(InitArgs),
    /// Index the project into the vector store
    Index(IndexArgs),
    /// Generate tests for a file (Diff-First)
    Generate(GenerateArgs),
    /// Heal failing tests from a runner report
    Heal(HealArgs),
    /// Show engine statistics
    Stats,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Compact the vector store after indexing
    #[arg(long)]
    pub optimize: bool,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Source file, relative to the project root
    pub file: String,

    /// Target one function instead of the file's default export
    #[arg(long)]
    pub function: Option<String>,

    /// Override the configured test framework
    #[arg(long)]
    pub framework: Option<String>,

    /// Apply without the interactive prompt
    #[arg(long, conflicts_with = "dry_run")]
    pub apply: bool,

    /// Print the diff and exit without writing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct HealArgs {
    /// JSON failure report produced by the test-runner adapter
    pub report: PathBuf,

    /// Write the markdown report here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}
