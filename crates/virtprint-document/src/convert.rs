// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion dispatch: one engine run per sealed job.
//
// `plan` is the fixed table from (input format, output settings) to what
// happens to the bytes:
//
//   Unknown input          never dispatched (UnknownFormat)
//   RAW output             bytes copied unchanged as .prn
//   PS -> PS, PDF -> PDF   bytes copied unchanged
//   everything else        rendered by Ghostscript (PS, PDF) or GhostXPS (XPS)
//
// Rendering happens in a staging directory inside the output directory. Only
// when the engine succeeds in time are its files moved to their final names,
// so a job either has its complete set of output files or none at all.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use virtprint_core::config::OutputConfig;
use virtprint_core::error::{Result, VirtprintError};
use virtprint_core::types::{ColorDepth, InputFormat, OutputFormat};

use crate::engine::{ConversionEngine, EngineInvocation, ResolvedEngines};
use crate::output::{JobStem, reserve};

/// Prefix of per-job staging directories inside the output directory.
const STAGING_PREFIX: &str = ".virtprint-staging-";

/// Which external engine renders a given input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Ghostscript,
    Gxps,
}

impl EngineKind {
    fn for_input(format: InputFormat) -> Self {
        match format {
            InputFormat::Xps => Self::Gxps,
            _ => Self::Ghostscript,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Ghostscript => "Ghostscript",
            Self::Gxps => "GhostXPS",
        }
    }
}

/// What the dispatcher will do with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionPlan {
    /// Write the job bytes unchanged.
    Passthrough,
    /// Run an engine with the given output device.
    Render {
        engine: EngineKind,
        device: &'static str,
        /// Device-specific arguments, after the common ones.
        extra_args: Vec<String>,
    },
}

/// Map an input format and the output settings to a conversion plan.
///
/// Returns `None` for `Unknown` input, which is never dispatched.
pub fn plan(input: InputFormat, output: &OutputConfig) -> Option<ConversionPlan> {
    if !input.is_known() {
        return None;
    }

    let passthrough = match output.format {
        OutputFormat::Raw => true,
        OutputFormat::PostScript => input == InputFormat::PostScript,
        OutputFormat::Pdf => input == InputFormat::Pdf,
        _ => false,
    };
    if passthrough {
        return Some(ConversionPlan::Passthrough);
    }

    let depth = output.color_depth;
    let device = match output.format {
        OutputFormat::Pdf => "pdfwrite",
        OutputFormat::PostScript => "ps2write",
        OutputFormat::Png => match depth {
            ColorDepth::Color24 => "png16m",
            ColorDepth::Gray8 => "pnggray",
            ColorDepth::Mono1 => "pngmono",
        },
        // JPEG has no bilevel mode; 1bit falls back to grayscale.
        OutputFormat::Jpeg => match depth {
            ColorDepth::Color24 => "jpeg",
            ColorDepth::Gray8 | ColorDepth::Mono1 => "jpeggray",
        },
        OutputFormat::Tiff => match depth {
            ColorDepth::Color24 => "tiff24nc",
            ColorDepth::Gray8 => "tiffgray",
            ColorDepth::Mono1 => "tiffg4",
        },
        OutputFormat::Raw => return Some(ConversionPlan::Passthrough),
    };

    let mut extra_args = Vec::new();
    if output.format.is_multi_page() {
        extra_args.push("-dTextAlphaBits=4".to_string());
        extra_args.push("-dGraphicsAlphaBits=4".to_string());
    }
    if output.format == OutputFormat::Jpeg {
        extra_args.push(format!("-dJPEGQ={}", output.jpeg_quality));
    }

    Some(ConversionPlan::Render {
        engine: EngineKind::for_input(input),
        device,
        extra_args,
    })
}

/// Runs the conversion for sealed jobs and places the results.
pub struct ConversionDispatcher {
    output: OutputConfig,
    engines: ResolvedEngines,
    timeout: Duration,
    runner: Arc<dyn ConversionEngine>,
}

impl ConversionDispatcher {
    pub fn new(
        output: OutputConfig,
        engines: ResolvedEngines,
        timeout: Duration,
        runner: Arc<dyn ConversionEngine>,
    ) -> Self {
        Self {
            output,
            engines,
            timeout,
            runner,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output.format
    }

    /// Convert one job. On success the returned files are non-empty and in
    /// page order; on error nothing is left in the output directory.
    #[instrument(skip(self, raw, stem), fields(stem = %stem, bytes = raw.len()))]
    pub async fn dispatch(
        &self,
        raw: &[u8],
        format: InputFormat,
        stem: &JobStem,
    ) -> Result<Vec<PathBuf>> {
        let plan = plan(format, &self.output)
            .ok_or(VirtprintError::UnknownFormat { size: raw.len() })?;

        match plan {
            ConversionPlan::Passthrough => self.passthrough(raw, stem).await,
            ConversionPlan::Render {
                engine,
                device,
                extra_args,
            } => {
                self.render(raw, format, stem, engine, device, &extra_args)
                    .await
            }
        }
    }

    async fn passthrough(&self, raw: &[u8], stem: &JobStem) -> Result<Vec<PathBuf>> {
        let path = stem.page_path(0, self.output.format.extension());
        reserve(&path).await?;
        if let Err(e) = tokio::fs::write(&path, raw).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        info!(path = %path.display(), "job written unchanged");
        Ok(vec![path])
    }

    async fn render(
        &self,
        raw: &[u8],
        format: InputFormat,
        stem: &JobStem,
        engine: EngineKind,
        device: &str,
        extra_args: &[String],
    ) -> Result<Vec<PathBuf>> {
        let program = match engine {
            EngineKind::Ghostscript => self.engines.ghostscript.clone(),
            EngineKind::Gxps => self.engines.gxps.clone(),
        }
        .ok_or_else(|| {
            VirtprintError::ConversionEngine(format!("{} is not available", engine.name()))
        })?;

        // Removed on drop, whatever happens below.
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(stem.directory())?;

        let input_path = staging
            .path()
            .join(format!("input.{}", format.staging_extension()));
        tokio::fs::write(&input_path, raw).await?;

        let extension = self.output.format.extension();
        let multi_page = self.output.format.is_multi_page();
        let output_pattern = if multi_page {
            staging.path().join(format!("page-%05d.{extension}"))
        } else {
            staging.path().join(format!("output.{extension}"))
        };

        let invocation = EngineInvocation {
            program,
            args: engine_args(
                device,
                self.output.dpi,
                extra_args,
                &output_pattern,
                &input_path,
            ),
        };
        debug!(command = %invocation.display(), "dispatching to conversion engine");

        match tokio::time::timeout(self.timeout, self.runner.run(&invocation)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "conversion engine timed out; discarding partial output"
                );
                return Err(VirtprintError::ConversionTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }

        let produced = collect_outputs(staging.path(), extension, multi_page).await?;
        if produced.is_empty() {
            return Err(VirtprintError::ConversionEngine(
                "engine reported success but produced no output".into(),
            ));
        }

        let placed = place_outputs(&produced, stem, extension, multi_page).await?;
        info!(files = placed.len(), first = %placed[0].display(), "conversion complete");
        Ok(placed)
    }
}

fn engine_args(
    device: &str,
    dpi: u32,
    extra_args: &[String],
    output_pattern: &Path,
    input: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-dNOPAUSE",
        "-dBATCH",
        "-dSAFER",
        "-dQUIET",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(format!("-sDEVICE={device}").into());
    args.push(format!("-r{dpi}").into());
    args.extend(extra_args.iter().map(OsString::from));

    let mut output_arg = OsString::from("-sOutputFile=");
    output_arg.push(output_pattern.as_os_str());
    args.push(output_arg);
    args.push(input.as_os_str().to_owned());
    args
}

/// Non-empty engine output files in the staging directory, in page order.
async fn collect_outputs(
    staging: &Path,
    extension: &str,
    multi_page: bool,
) -> Result<Vec<PathBuf>> {
    if !multi_page {
        let path = staging.join(format!("output.{extension}"));
        return Ok(match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => vec![path],
            _ => Vec::new(),
        });
    }

    let suffix = format!(".{extension}");
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(staging).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(ordinal) = name
            .to_str()
            .and_then(|n| n.strip_prefix("page-"))
            .and_then(|n| n.strip_suffix(suffix.as_str()))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if entry.metadata().await?.len() > 0 {
            pages.push((ordinal, entry.path()));
        }
    }
    pages.sort_by_key(|(ordinal, _)| *ordinal);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

/// Move staged files to their final names. On failure, files already moved
/// are removed again.
async fn place_outputs(
    produced: &[PathBuf],
    stem: &JobStem,
    extension: &str,
    multi_page: bool,
) -> Result<Vec<PathBuf>> {
    let mut placed = Vec::with_capacity(produced.len());
    for (i, source) in produced.iter().enumerate() {
        let index = if multi_page { i + 1 } else { 0 };
        let dest = stem.page_path(index, extension);
        let moved = match reserve(&dest).await {
            Ok(()) => tokio::fs::rename(source, &dest)
                .await
                .map_err(VirtprintError::Io),
            Err(e) => Err(e),
        };
        if let Err(e) = moved {
            // A reserved-but-unfilled name is removed too, unless it was
            // somebody else's file.
            if !matches!(e, VirtprintError::NamingCollision(_)) {
                let _ = tokio::fs::remove_file(&dest).await;
            }
            for path in &placed {
                let _ = tokio::fs::remove_file(path).await;
            }
            return Err(e);
        }
        placed.push(dest);
    }
    Ok(placed)
}
