//! UpdateKit CLI Module
//! Command-line interface for driving the update engine

use crate::engine::updater::layout::{LayoutError, UpdaterLayout};
use crate::engine::updater::manifest::Channel;
use crate::engine::updater::verify::KeyType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "updatekit")]
#[command(author = "UpdateKit Team")]
#[command(version)]
#[command(about = "Signed, delta-based, rollback-safe application updates", long_about = None)]
pub struct Cli {
    /// Updater data directory (defaults to the per-user data dir)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Version of the running build, used before any update is applied
    #[arg(long, global = true, default_value = env!("CARGO_PKG_VERSION"))]
    pub current_version: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a config file and create the data directories
    Init {
        /// URL of the signed manifest
        #[arg(short, long)]
        manifest_url: String,

        /// Release channel (stable, beta, dev)
        #[arg(short, long, default_value = "stable")]
        channel: Channel,

        /// Signature scheme of the public key
        #[arg(short, long, default_value = "ed25519")]
        key_type: KeyType,

        /// Public key (hex for ed25519); manifests must then be signed
        #[arg(long, conflicts_with = "public_key_file")]
        public_key: Option<String>,

        /// Read the public key from a file, e.g. an RSA PEM key
        #[arg(long)]
        public_key_file: Option<PathBuf>,
    },

    /// Run one check cycle, downloading and installing as configured
    Check {
        /// Do not report failures or "up to date"
        #[arg(short, long)]
        silent: bool,
    },

    /// Check, download and install an update
    Update {
        /// Confirm breaking updates
        #[arg(short, long)]
        yes: bool,
    },

    /// Show applied state and snapshot
    Status,

    /// Restore the snapshot taken before the last update
    Rollback,

    /// Delete staged files
    ClearCache,

    /// Run periodic checks until interrupted
    Watch,
}

impl Cli {
    pub fn layout(&self) -> Result<UpdaterLayout, LayoutError> {
        match &self.dir {
            Some(dir) => Ok(UpdaterLayout::with_base_dir(dir.clone())),
            None => UpdaterLayout::new(),
        }
    }
}
