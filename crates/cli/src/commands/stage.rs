//! Offline staging: manifest preview and package export

use anyhow::{Context as _, Result};
use ecowatt_fota::{FotaService, UploadResponse};
use ecowatt_fota_crypto::ChunkResponse;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{debug, info};

use crate::commands::{MANIFEST_FILE, chunk_file_name, frame_file_name};
use crate::context::Context;
use crate::error::CliError;
use crate::output::{self, PackageSummary};

async fn stage(
    ctx: &Context,
    firmware: &Path,
    version: &str,
    chunk_size: Option<u32>,
) -> Result<(FotaService, UploadResponse)> {
    let content = tokio::fs::read(firmware)
        .await
        .map_err(CliError::from)
        .with_context(|| format!("Failed to read firmware {}", firmware.display()))?;

    let service = ctx.offline_service(chunk_size).await?;
    let upload = service
        .upload(&content, version)
        .await
        .map_err(CliError::from)?;
    debug!(version, size = content.len(), "Staged firmware offline");
    Ok((service, upload))
}

/// Stage a firmware file and print the upload response
pub async fn manifest(
    ctx: &Context,
    firmware: &Path,
    version: &str,
    chunk_size: Option<u32>,
) -> Result<()> {
    let (_, upload) = stage(ctx, firmware, version, chunk_size).await?;
    output::print_upload(&upload, ctx.json);
    Ok(())
}

/// Stage a firmware file and write its manifest and every chunk to a directory
pub async fn package(
    ctx: &Context,
    firmware: &Path,
    version: &str,
    out_dir: &Path,
    chunk_size: Option<u32>,
    binary: bool,
) -> Result<()> {
    let (service, upload) = stage(ctx, firmware, version, chunk_size).await?;
    let manifest = &upload.manifest;

    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(CliError::from)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let manifest_json = serde_json::to_string_pretty(manifest).map_err(CliError::from)?;
    tokio::fs::write(out_dir.join(MANIFEST_FILE), manifest_json)
        .await
        .map_err(CliError::from)?;

    let progress = if ctx.json {
        None
    } else {
        let pb = ProgressBar::new(u64::from(manifest.total_chunks));
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("#>-");
        pb.set_style(style);
        Some(pb)
    };

    for index in 0..manifest.total_chunks {
        let sealed = service
            .get_chunk(&manifest.version, index)
            .await
            .map_err(CliError::from)?;

        let chunk_json = ChunkResponse::from(&sealed).to_json().map_err(|e| {
            CliError::ValidationError(format!("Failed to encode chunk {}: {}", index, e))
        })?;
        tokio::fs::write(out_dir.join(chunk_file_name(index)), chunk_json)
            .await
            .map_err(CliError::from)?;

        if binary {
            let frame = sealed.to_frame().map_err(|e| {
                CliError::ValidationError(format!("Failed to frame chunk {}: {}", index, e))
            })?;
            tokio::fs::write(out_dir.join(frame_file_name(index)), frame)
                .await
                .map_err(CliError::from)?;
        }

        if let Some(pb) = &progress {
            pb.set_position(u64::from(index) + 1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("done");
    }

    info!(
        version = %manifest.version,
        chunks = manifest.total_chunks,
        dir = %out_dir.display(),
        "Wrote firmware package"
    );

    output::print_package(
        &PackageSummary {
            manifest: manifest.clone(),
            out_dir: out_dir.display().to_string(),
            binary_frames: binary,
        },
        ctx.json,
    );
    Ok(())
}
