// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion engine boundary.
//
// The renderer (Ghostscript, GhostXPS) is an external process. We hand it a
// staged input file and an output pattern, and look only at its exit status
// and the files it leaves behind.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use virtprint_core::config::EngineConfig;
use virtprint_core::error::{Result, VirtprintError};

/// Longest stderr excerpt carried in an engine error.
const STDERR_EXCERPT: usize = 2048;

/// One engine run: the executable and its full argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl EngineInvocation {
    /// The command line as a single string, for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Something that can execute an [`EngineInvocation`].
///
/// Implementations must stop the engine when the returned future is dropped,
/// so that a caller-side timeout actually ends the work.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    async fn run(&self, invocation: &EngineInvocation) -> Result<()>;
}

/// Runs the engine as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEngine;

#[async_trait]
impl ConversionEngine for ProcessEngine {
    async fn run(&self, invocation: &EngineInvocation) -> Result<()> {
        let started_at = Instant::now();
        debug!(command = %invocation.display(), "starting conversion engine");

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    VirtprintError::ConversionEngine(format!(
                        "engine not found: {}",
                        invocation.program.display()
                    ))
                } else {
                    VirtprintError::ConversionEngine(format!(
                        "spawn {}: {e}",
                        invocation.program.display()
                    ))
                }
            })?;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        if !output.stdout.is_empty() {
            debug!(stdout = %String::from_utf8_lossy(&output.stdout), "engine stdout");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = excerpt(stderr.trim());
            warn!(
                program = %invocation.program.display(),
                exit_code = ?output.status.code(),
                elapsed_ms,
                stderr = %stderr,
                "conversion engine failed"
            );
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(VirtprintError::ConversionEngine(if stderr.is_empty() {
                format!("exit status {code}")
            } else {
                format!("exit status {code}: {stderr}")
            }));
        }

        debug!(elapsed_ms, "conversion engine finished");
        Ok(())
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= STDERR_EXCERPT {
        return text;
    }
    let mut end = STDERR_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Engine executables as found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEngines {
    pub ghostscript: Option<PathBuf>,
    pub gxps: Option<PathBuf>,
}

impl ResolvedEngines {
    /// Look up the configured executables. Missing ones are logged; jobs
    /// that need them will fail into the fallback path.
    pub fn resolve(config: &EngineConfig) -> Self {
        let ghostscript = locate_program(&config.ghostscript);
        let gxps = locate_program(&config.gxps);
        if ghostscript.is_none() {
            warn!(
                program = %config.ghostscript.display(),
                "Ghostscript not found; PostScript and PDF jobs will fail to convert"
            );
        }
        if gxps.is_none() {
            warn!(
                program = %config.gxps.display(),
                "GhostXPS not found; XPS jobs will fail to convert"
            );
        }
        Self { ghostscript, gxps }
    }
}

/// Resolve `program` to an existing file: paths are checked as given, bare
/// names are searched in `PATH`.
pub fn locate_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        let suffix = std::env::consts::EXE_SUFFIX;
        if suffix.is_empty() {
            return None;
        }
        let mut with_suffix = candidate.into_os_string();
        with_suffix.push(suffix);
        let with_suffix = PathBuf::from(with_suffix);
        with_suffix.is_file().then_some(with_suffix)
    })
}
