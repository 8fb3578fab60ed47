//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use ecowatt_fota::{DeviceReport, Manifest, UploadResponse};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

use crate::error::CliError;

/// Result of `package`
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub manifest: Manifest,
    pub out_dir: String,
    pub binary_frames: bool,
}

/// Result of `assemble`
#[derive(Debug, Clone, Serialize)]
pub struct AssembleSummary {
    pub size: u64,
    pub out: String,
    pub report: DeviceReport,
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format output as JSON: {}", e),
    }
}

fn error_type_name(error: &Error) -> &'static str {
    match error.downcast_ref::<CliError>() {
        Some(CliError::NotFound(_)) => "not_found",
        Some(CliError::ValidationError(_)) => "validation",
        Some(CliError::InvalidConfiguration(_)) => "configuration",
        Some(CliError::VerificationFailed(_)) => "verification",
        Some(CliError::IoError(_)) => "io",
        Some(CliError::JsonError(_)) => "json",
        None => "internal",
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    print_json(&json!({
        "success": false,
        "error": {
            "message": format!("{:#}", error),
            "type": error_type_name(error)
        }
    }));
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn print_manifest_human(manifest: &Manifest) {
    println!("  {:<13} {}", "Version:".bold(), manifest.version);
    println!("  {:<13} {} bytes", "Size:".bold(), manifest.size_bytes);
    println!("  {:<13} {}", "SHA-256:".bold(), manifest.sha256_hex);
    println!("  {:<13} {} bytes", "Chunk size:".bold(), manifest.chunk_size);
    println!("  {:<13} {}", "Chunks:".bold(), manifest.total_chunks);
    println!("  {:<13} {}", "IV:".bold(), manifest.iv_hex.dimmed());
}

/// Print the staged upload response
pub fn print_upload(upload: &UploadResponse, json: bool) {
    if json {
        match serde_json::to_value(upload) {
            Ok(value) => print_json(&value),
            Err(e) => eprintln!("Failed to format upload as JSON: {}", e),
        }
    } else {
        println!("{}", "Firmware staged".green().bold());
        print_manifest_human(&upload.manifest);
    }
}

/// Print a package export summary
pub fn print_package(summary: &PackageSummary, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "package": summary
        }));
    } else {
        println!(
            "{} {} chunks written to {}",
            "✓".green(),
            summary.manifest.total_chunks,
            summary.out_dir.bold()
        );
        print_manifest_human(&summary.manifest);
        if summary.binary_frames {
            println!("  Binary frames written alongside JSON chunks");
        }
    }
}

/// Print an assembly summary
pub fn print_assembled(summary: &AssembleSummary, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "assembled": summary
        }));
    } else {
        println!(
            "{} Firmware {} verified ({} chunks, {} bytes)",
            "✓".green(),
            summary.report.version.bold(),
            summary.report.chunk,
            summary.size
        );
        println!("  Written to {}", summary.out);
    }
}

/// Print key generation result
pub fn print_keys_generated(path: &Path, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "key_file": path.display().to_string()
        }));
    } else {
        println!("{} Key file written to {}", "✓".green(), path.display());
        println!(
            "  {}",
            "Distribute these keys to devices out of band; keep the file private.".yellow()
        );
    }
}
