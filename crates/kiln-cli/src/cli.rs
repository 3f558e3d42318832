use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln: inspect bundles, branch headers, and indexes",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Verify a bundle file and list its roots and blocks
    Bundle(BundleArgs),
    /// Show the header of a branch
    Header(HeaderArgs),
    /// Index a JSON-lines file of documents by one field and query it
    Index(IndexArgs),
}

#[derive(Args)]
pub struct BundleArgs {
    pub path: PathBuf,
}

/// Where the database lives. Without any flag the default data directory
/// is used.
#[derive(Args, Clone, Debug, Default)]
pub struct StorageArgs {
    /// TOML storage configuration file
    #[arg(long, conflicts_with_all = ["data_dir", "url", "memory"])]
    pub config: Option<PathBuf>,
    /// Local data directory
    #[arg(long, conflicts_with_all = ["url", "memory"])]
    pub data_dir: Option<PathBuf>,
    /// Remote endpoint URL
    #[arg(long, conflicts_with = "memory")]
    pub url: Option<String>,
    /// Keep everything in memory
    #[arg(long)]
    pub memory: bool,
    /// Database name
    #[arg(long, default_value = "default")]
    pub name: String,
    /// Never write to storage
    #[arg(long)]
    pub readonly: bool,
}

#[derive(Args)]
pub struct HeaderArgs {
    #[command(flatten)]
    pub storage: StorageArgs,
    #[arg(long, default_value = "main")]
    pub branch: String,
}

#[derive(Args)]
pub struct IndexArgs {
    /// JSON-lines file; each line is a document with a string `_id`
    pub docs: PathBuf,
    /// Field whose value becomes the index key
    #[arg(long)]
    pub field: String,
    /// Exact key to look up, as JSON
    #[arg(long, conflicts_with_all = ["low", "high"])]
    pub key: Option<String>,
    /// Inclusive lower bound, as JSON
    #[arg(long, requires = "high")]
    pub low: Option<String>,
    /// Inclusive upper bound, as JSON
    #[arg(long, requires = "low")]
    pub high: Option<String>,
    /// Persist the index roots under this branch
    #[arg(long)]
    pub branch: Option<String>,
    #[command(flatten)]
    pub storage: StorageArgs,
}
