// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fallback artifacts for jobs that could not be converted.
//
// Every failed job leaves a `{stem}_failed.txt` diagnostic record. When
// enabled and not too large, the untouched job bytes are also written as
// `{stem}_raw.prn` so the job can be re-printed or inspected later.
//
// These files are reported in logs only. They never become output files of
// the job's `ConversionOutcome`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use virtprint_core::config::FallbackConfig;
use virtprint_core::error::{Result, VirtprintError};
use virtprint_core::types::{OutputFormat, PrintJob};

use super::namer::{JobStem, OutputNamer, reserve};

/// Leading bytes shown as hex in the diagnostic record.
const HEX_PREVIEW_LEN: usize = 64;

/// Why a job failed, as recorded in its diagnostic file.
#[derive(Debug, Clone, Copy)]
pub struct FailureRecord<'a> {
    pub job: &'a PrintJob,
    pub output_format: OutputFormat,
    pub reason: &'a str,
    /// SHA-256 of the raw bytes, lowercase hex.
    pub sha256: &'a str,
}

/// Files written for one failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackArtifact {
    pub diagnostic: PathBuf,
    pub raw: Option<PathBuf>,
}

pub struct FallbackWriter {
    namer: Arc<OutputNamer>,
    config: FallbackConfig,
}

impl FallbackWriter {
    pub fn new(namer: Arc<OutputNamer>, config: FallbackConfig) -> Self {
        Self { namer, config }
    }

    /// Write the fallback artifact for a failed job.
    ///
    /// If a name derived from `stem` is already taken, a fresh stem is
    /// allocated once and the write retried.
    #[instrument(skip_all, fields(job_id = %record.job.id, stem = %stem))]
    pub async fn write(&self, stem: &JobStem, record: &FailureRecord<'_>) -> Result<FallbackArtifact> {
        match self.write_with_stem(stem, record).await {
            Err(VirtprintError::NamingCollision(path)) => {
                let fresh = self.namer.allocate(record.job.sealed_at);
                warn!(
                    taken = %path.display(),
                    retry_stem = %fresh,
                    "fallback name taken; retrying with a new name"
                );
                self.write_with_stem(&fresh, record).await
            }
            other => other,
        }
    }

    async fn write_with_stem(
        &self,
        stem: &JobStem,
        record: &FailureRecord<'_>,
    ) -> Result<FallbackArtifact> {
        let job = record.job;
        let raw = if !self.config.keep_raw {
            None
        } else if job.raw_data.len() > self.config.max_raw_bytes {
            warn!(
                bytes = job.raw_data.len(),
                max_raw_bytes = self.config.max_raw_bytes,
                "raw dump skipped; job exceeds fallback.max_raw_bytes"
            );
            None
        } else {
            let path = stem.artifact_path("raw", "prn");
            write_new(&path, &job.raw_data).await?;
            Some(path)
        };

        let diagnostic = stem.artifact_path("failed", "txt");
        let text = diagnostic_text(record, raw.as_deref());
        if let Err(e) = write_new(&diagnostic, text.as_bytes()).await {
            if let Some(raw) = &raw {
                let _ = tokio::fs::remove_file(raw).await;
            }
            return Err(e);
        }

        info!(
            diagnostic = %diagnostic.display(),
            raw = ?raw.as_ref().map(|p| p.display().to_string()),
            "fallback artifact written"
        );
        Ok(FallbackArtifact { diagnostic, raw })
    }
}

async fn write_new(path: &Path, contents: &[u8]) -> Result<()> {
    reserve(path).await?;
    let written = tokio::fs::write(path, contents).await.map_err(VirtprintError::Io);
    discard_on_error(path, written).await
}

/// Remove a reserved file whose contents could not be written.
async fn discard_on_error(path: &Path, written: Result<()>) -> Result<()> {
    if written.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}

fn diagnostic_text(record: &FailureRecord<'_>, raw: Option<&Path>) -> String {
    let job = record.job;
    let preview = &job.raw_data[..job.raw_data.len().min(HEX_PREVIEW_LEN)];
    let hex_preview = preview
        .chunks(16)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n  ");

    let mut text = String::new();
    // `write!` into a String cannot fail.
    let _ = writeln!(text, "virtprint: job could not be converted");
    let _ = writeln!(text);
    let _ = writeln!(text, "job_id:          {}", job.id);
    let _ = writeln!(text, "reason:          {}", record.reason);
    let _ = writeln!(text, "detected_format: {}", job.detected_format);
    let _ = writeln!(text, "output_format:   {}", record.output_format);
    let _ = writeln!(text, "size_bytes:      {}", job.raw_data.len());
    let _ = writeln!(text, "sha256:          {}", record.sha256);
    let _ = writeln!(text, "peer:            {}", job.peer);
    let _ = writeln!(text, "connection:      {}", job.connection);
    let _ = writeln!(text, "received_at:     {}", job.received_at.to_rfc3339());
    let _ = writeln!(text, "sealed_at:       {}", job.sealed_at.to_rfc3339());
    let _ = writeln!(text, "seal_reason:     {}", job.seal_reason);
    let _ = writeln!(
        text,
        "raw_dump:        {}",
        raw.map_or_else(|| "not written".to_string(), |p| p.display().to_string())
    );
    let _ = writeln!(text, "first_bytes:");
    let _ = writeln!(text, "  {hex_preview}");
    text
}
