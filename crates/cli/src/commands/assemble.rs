//! Device-side assembly of an exported package

use anyhow::{Context as _, Result};
use ecowatt_fota::{DownloadSession, Manifest, ReportStatus};
use ecowatt_fota_crypto::{ChunkResponse, SealedChunk};
use std::path::Path;
use tracing::{info, warn};

use crate::commands::{MANIFEST_FILE, chunk_file_name, frame_file_name};
use crate::context::Context;
use crate::error::CliError;
use crate::output::{self, AssembleSummary};

async fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Err(CliError::NotFound(format!("{}", path.display())).into());
    }
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(CliError::from)?;
    let manifest: Manifest = serde_json::from_str(&content)
        .map_err(CliError::from)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(manifest)
}

/// Load chunk `index` as JSON, falling back to its binary frame
async fn read_chunk(dir: &Path, index: u32) -> Result<SealedChunk> {
    let json_path = dir.join(chunk_file_name(index));
    if json_path.exists() {
        let content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(CliError::from)?;
        let response: ChunkResponse = serde_json::from_str(&content)
            .map_err(CliError::from)
            .with_context(|| format!("Failed to parse {}", json_path.display()))?;
        let sealed = SealedChunk::try_from(&response)
            .map_err(|e| CliError::ValidationError(format!("chunk {}: {}", index, e)))?;
        return Ok(sealed);
    }

    let frame_path = dir.join(frame_file_name(index));
    if frame_path.exists() {
        let frame = tokio::fs::read(&frame_path).await.map_err(CliError::from)?;
        let sealed = SealedChunk::from_frame(&frame)
            .map_err(|e| CliError::ValidationError(format!("chunk {}: {}", index, e)))?;
        return Ok(sealed);
    }

    Err(CliError::NotFound(format!("chunk {} in {}", index, dir.display())).into())
}

/// Verify, decrypt and write the image from a package directory
pub async fn execute(ctx: &Context, dir: &Path, out: &Path, device_id: &str) -> Result<()> {
    let manifest = read_manifest(dir).await?;
    let cipher = ctx.cipher().await?;
    let mut session = DownloadSession::new(manifest, cipher).map_err(CliError::from)?;

    while !session.is_complete() {
        let index = session.next_chunk();
        let chunk = read_chunk(dir, index).await?;
        session.accept_sealed(&chunk).map_err(CliError::from)?;
    }

    let total = session.next_chunk();
    let done = session.report(device_id, ReportStatus::Done, total);
    let rejected = session.report(device_id, ReportStatus::ShaFail, total);
    let image = match session.finish() {
        Ok(image) => image,
        Err(e) => {
            warn!(report = ?rejected, "Firmware rejected");
            return Err(CliError::from(e).into());
        }
    };

    tokio::fs::write(out, &image)
        .await
        .map_err(CliError::from)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    info!(report = ?done, "Firmware assembled");

    output::print_assembled(
        &AssembleSummary {
            size: image.len() as u64,
            out: out.display().to_string(),
            report: done,
        },
        ctx.json,
    );
    Ok(())
}
