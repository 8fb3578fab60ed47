//! Command implementations for fotactl CLI

pub mod assemble;
pub mod keys;
pub mod stage;

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum KeysCommands {
    /// Generate a random key pair and write it as a key file
    Generate {
        /// Output key file path
        #[arg(short, long)]
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// File name of the manifest inside a package directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// File name of chunk `n` inside a package directory
pub fn chunk_file_name(index: u32) -> String {
    format!("chunk_{}.json", index)
}

/// File name of the binary frame for chunk `n` inside a package directory
pub fn frame_file_name(index: u32) -> String {
    format!("chunk_{}.bin", index)
}
