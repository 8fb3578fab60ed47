//! fotactl - EcoWatt firmware over the air tooling
//!
//! Offline operator and device tooling for the chunked FOTA protocol:
//! key generation, manifest preview, package export and device-side
//! verification of exported packages.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod context;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::KeysCommands;
use crate::context::Context;
use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "fotactl")]
#[command(about = "EcoWatt FOTA tooling - stage, package and verify firmware images")]
#[command(version)]
#[command(long_about = "
fotactl stages firmware images for the EcoWatt chunked update protocol.
Images are encrypted with AES-128-CTR and every chunk carries an
HMAC-SHA256 tag. Packages exported here can be verified and decrypted
with the same pre-shared keys a device holds.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (chunk size and key source)
    #[arg(long, global = true, env = "FOTACTL_CONFIG")]
    config: Option<PathBuf>,

    /// Key file, overriding the configured key source
    #[arg(long, global = true, env = "FOTACTL_KEYS")]
    keys: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Key management commands
    #[command(subcommand)]
    Keys(KeysCommands),

    /// Stage a firmware image and print its manifest
    Manifest {
        /// Firmware binary
        firmware: PathBuf,
        /// Version identifier
        #[arg(long)]
        version: String,
        /// Chunk size in bytes, overriding the configuration
        #[arg(long)]
        chunk_size: Option<u32>,
    },

    /// Stage a firmware image and export its manifest and every chunk
    Package {
        /// Firmware binary
        firmware: PathBuf,
        /// Version identifier
        #[arg(long)]
        version: String,
        /// Output directory
        #[arg(long)]
        out_dir: PathBuf,
        /// Chunk size in bytes, overriding the configuration
        #[arg(long)]
        chunk_size: Option<u32>,
        /// Also write compact binary frames
        #[arg(long)]
        binary: bool,
    },

    /// Verify and decrypt an exported package like a device would
    Assemble {
        /// Package directory
        #[arg(long)]
        dir: PathBuf,
        /// Output image path
        #[arg(long)]
        out: PathBuf,
        /// Device identifier used in reports
        #[arg(long, default_value = "fotactl")]
        device_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "fotactl={0},ecowatt_fota={0},ecowatt_fota_crypto={0}",
                    log_level
                )
                .into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = execute_command(&cli).await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);

            std::process::exit(exit_code);
        }
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let ctx = Context {
        json: cli.json,
        config: cli.config.clone(),
        keys: cli.keys.clone(),
    };

    match &cli.command {
        Commands::Keys(cmd) => commands::keys::execute(cmd, &ctx).await,
        Commands::Manifest {
            firmware,
            version,
            chunk_size,
        } => commands::stage::manifest(&ctx, firmware, version, *chunk_size).await,
        Commands::Package {
            firmware,
            version,
            out_dir,
            chunk_size,
            binary,
        } => {
            commands::stage::package(&ctx, firmware, version, out_dir, *chunk_size, *binary).await
        }
        Commands::Assemble {
            dir,
            out,
            device_id,
        } => commands::assemble::execute(&ctx, dir, out, device_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_keys_generate() -> TestResult {
        let cli = Cli::try_parse_from(["fotactl", "keys", "generate", "--out", "keys.json"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        assert!(matches!(
            cli.command,
            Commands::Keys(KeysCommands::Generate { force: false, .. })
        ));
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from([
            "fotactl",
            "manifest",
            "fw.bin",
            "--version",
            "1.0",
            "--json",
            "-vv",
            "--keys",
            "k.json",
        ])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.keys, Some(PathBuf::from("k.json")));
        Ok(())
    }

    #[test]
    fn parse_package_options() -> TestResult {
        let cli = Cli::try_parse_from([
            "fotactl",
            "package",
            "fw.bin",
            "--version",
            "2.0",
            "--out-dir",
            "pkg",
            "--chunk-size",
            "512",
            "--binary",
        ])?;
        match cli.command {
            Commands::Package {
                chunk_size, binary, ..
            } => {
                assert_eq!(chunk_size, Some(512));
                assert!(binary);
            }
            other => return Err(format!("unexpected command {:?}", other).into()),
        }
        Ok(())
    }

    #[test]
    fn parse_assemble_default_device_id() -> TestResult {
        let cli = Cli::try_parse_from(["fotactl", "assemble", "--dir", "pkg", "--out", "fw.bin"])?;
        match cli.command {
            Commands::Assemble { device_id, .. } => assert_eq!(device_id, "fotactl"),
            other => return Err(format!("unexpected command {:?}", other).into()),
        }
        Ok(())
    }

    #[test]
    fn manifest_requires_version() {
        assert!(Cli::try_parse_from(["fotactl", "manifest", "fw.bin"]).is_err());
    }
}
