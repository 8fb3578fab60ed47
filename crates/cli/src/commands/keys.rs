//! Key file generation

use anyhow::{Context as _, Result};
use ecowatt_fota_crypto::{FotaKeys, KeyFile};
use std::path::Path;
use tracing::info;

use crate::commands::KeysCommands;
use crate::context::Context;
use crate::error::CliError;
use crate::output;

/// Execute keys command
pub async fn execute(cmd: &KeysCommands, ctx: &Context) -> Result<()> {
    match cmd {
        KeysCommands::Generate { out, force } => generate(out, *force, ctx.json),
    }
}

fn generate(out: &Path, force: bool, json: bool) -> Result<()> {
    if out.exists() && !force {
        return Err(CliError::ValidationError(format!(
            "{} already exists (use --force to overwrite)",
            out.display()
        ))
        .into());
    }

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(CliError::from)?;
    }

    let keys = FotaKeys::generate();
    KeyFile::from_keys(&keys)
        .save(out)
        .map_err(|e| CliError::IoError(std::io::Error::other(e.to_string())))
        .with_context(|| format!("Failed to write key file {}", out.display()))?;

    info!(path = %out.display(), "Generated key file");
    output::print_keys_generated(out, json);
    Ok(())
}
