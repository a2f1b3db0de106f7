use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hive_types::ManifestKey;

#[derive(Parser)]
#[command(
    name = "hive",
    about = "Hive: content-addressed object store with versioned manifests",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory
    #[arg(short, long, global = true, default_value = ".")]
    pub store: PathBuf,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a store
    Init(InitArgs),
    /// Import a directory as a manifest
    Import(ImportArgs),
    /// Write a manifest's tree to a directory
    Export(ExportArgs),
    /// List manifests
    List(ListArgs),
    /// Show a manifest and its tree
    Show(ShowArgs),
    /// Print one file of a manifest
    Cat(CatArgs),
    /// Delete a manifest
    Delete(DeleteArgs),
    /// Delete all but the newest numeric tags of a name
    Retain(RetainArgs),
    /// Show changes between two manifests
    Diff(DiffArgs),
    /// Compare a manifest with a directory
    Verify(VerifyArgs),
    /// Check objects and manifests for corruption
    Fsck(FsckArgs),
    /// Delete objects no manifest reaches
    Prune(PruneArgs),
    /// Copy manifests and their objects into another store
    Copy(CopyArgs),
    /// Send manifests to a remote
    Push(PushArgs),
    /// Receive manifests from a remote
    Fetch(FetchArgs),
    /// Write manifests and their objects to a bundle file
    Bundle(BundleArgs),
    /// Apply a bundle file
    Unbundle(UnbundleArgs),
    /// Show or set store configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct ImportArgs {
    pub source: PathBuf,
    /// `name:tag`, or a bare name to allocate the next numeric tag
    pub key: String,
    /// Manifest label, `name=value`
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args)]
pub struct ExportArgs {
    pub key: ManifestKey,
    pub target: PathBuf,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(default_value = "")]
    pub prefix: String,
}

#[derive(Args)]
pub struct ShowArgs {
    pub key: ManifestKey,
    #[arg(long)]
    pub depth: Option<usize>,
}

#[derive(Args)]
pub struct CatArgs {
    pub key: ManifestKey,
    pub path: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub key: ManifestKey,
}

#[derive(Args)]
pub struct RetainArgs {
    pub name: String,
    #[arg(short, long, default_value = "5")]
    pub keep: usize,
}

#[derive(Args)]
pub struct DiffArgs {
    pub old: ManifestKey,
    pub new: ManifestKey,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub key: ManifestKey,
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct FsckArgs {
    /// Manifests to check; all if none
    pub keys: Vec<ManifestKey>,
    /// Report damaged objects without deleting them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct PruneArgs {}

#[derive(Args)]
pub struct CopyArgs {
    pub destination: PathBuf,
    #[arg(required = true)]
    pub keys: Vec<ManifestKey>,
    /// Allow objects the destination already holds to be absent here
    #[arg(long)]
    pub partial: bool,
}

#[derive(Args)]
pub struct PushArgs {
    /// Remote address, e.g. `file:///srv/hive` or `jar:backup.hivb`
    pub remote: String,
    #[arg(required = true)]
    pub keys: Vec<ManifestKey>,
}

#[derive(Args)]
pub struct FetchArgs {
    pub remote: String,
    #[arg(required = true)]
    pub keys: Vec<ManifestKey>,
}

#[derive(Args)]
pub struct BundleArgs {
    pub output: PathBuf,
    #[arg(required = true)]
    pub keys: Vec<ManifestKey>,
}

#[derive(Args)]
pub struct UnbundleArgs {
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ConfigArgs {
    pub key: Option<String>,
    pub value: Option<String>,
}
