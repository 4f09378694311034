// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resolved configuration.
//
// Built once at startup (see `virtprint-app`), validated, and passed by
// reference to every component. Nothing reads ambient global settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VirtprintError};
use crate::types::{ColorDepth, OutputFormat};

/// Standard RAW / JetDirect port.
pub const DEFAULT_PORT: u16 = 9100;

/// Loopback only; the printer queue lives on the same machine.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Valid raster resolution range (dots per inch).
pub const DPI_RANGE: std::ops::RangeInclusive<u32> = 72..=1200;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtprintConfig {
    pub listener: ListenerConfig,
    pub output: OutputConfig,
    pub engine: EngineConfig,
    pub callback: CallbackConfig,
    pub fallback: FallbackConfig,
    pub logging: LoggingConfig,
}

/// TCP endpoint and job-boundary settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    /// Silence on a connection with an open job that seals the job.
    ///
    /// This is a heuristic: a client pausing longer than this mid-job splits
    /// the job in two, and back-to-back jobs sent with shorter gaps merge.
    pub idle_timeout_ms: u64,
    /// Silence on a connection with no open job after which it is closed.
    pub connection_timeout_ms: u64,
    /// A job reaching this many bytes is sealed and the connection closed.
    pub max_job_bytes: usize,
    /// How long in-flight jobs get to finish once shutdown starts.
    pub shutdown_grace_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            idle_timeout_ms: 10_000,
            connection_timeout_ms: 300_000,
            max_job_bytes: 256 * 1024 * 1024,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ListenerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Where converted files go and what they look like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub format: OutputFormat,
    pub dpi: u32,
    pub color_depth: ColorDepth,
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("virtprint-output"),
            format: OutputFormat::Pdf,
            dpi: 300,
            color_depth: ColorDepth::Color24,
            jpeg_quality: 90,
        }
    }
}

/// External conversion engine locations and budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ghostscript, used for PostScript and PDF input.
    pub ghostscript: PathBuf,
    /// GhostXPS, used for XPS input.
    pub gxps: PathBuf,
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ghostscript: PathBuf::from(if cfg!(windows) { "gswin64c" } else { "gs" }),
            gxps: PathBuf::from(if cfg!(windows) { "gxpswin64" } else { "gxps" }),
            timeout_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which post-processing collaborator receives finished jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackKind {
    /// Log a summary of each job.
    Log,
    /// Run an external program with the job as JSON on stdin.
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub kind: CallbackKind,
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            kind: CallbackKind::Log,
            program: None,
            args: Vec::new(),
            timeout_ms: 30_000,
        }
    }
}

impl CallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What is kept when a job cannot be converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Write the raw job bytes next to the diagnostic record.
    pub keep_raw: bool,
    /// Raw dumps larger than this are skipped (the diagnostic is still written).
    pub max_raw_bytes: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            keep_raw: true,
            max_raw_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl VirtprintConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let l = &self.listener;
        if l.host.trim().is_empty() {
            return Err(VirtprintError::Config("listener.host must not be empty".into()));
        }
        if l.idle_timeout_ms == 0 {
            return Err(VirtprintError::Config(
                "listener.idle_timeout_ms must be greater than zero".into(),
            ));
        }
        if l.connection_timeout_ms < l.idle_timeout_ms {
            return Err(VirtprintError::Config(format!(
                "listener.connection_timeout_ms ({}) must not be shorter than idle_timeout_ms ({})",
                l.connection_timeout_ms, l.idle_timeout_ms
            )));
        }
        if l.max_job_bytes == 0 {
            return Err(VirtprintError::Config(
                "listener.max_job_bytes must be greater than zero".into(),
            ));
        }

        let o = &self.output;
        if o.directory.as_os_str().is_empty() {
            return Err(VirtprintError::Config("output.directory must be set".into()));
        }
        if !DPI_RANGE.contains(&o.dpi) {
            return Err(VirtprintError::Config(format!(
                "output.dpi {} outside {}..={}",
                o.dpi,
                DPI_RANGE.start(),
                DPI_RANGE.end()
            )));
        }
        if !(1..=100).contains(&o.jpeg_quality) {
            return Err(VirtprintError::Config(format!(
                "output.jpeg_quality {} outside 1..=100",
                o.jpeg_quality
            )));
        }

        if self.engine.timeout_ms == 0 {
            return Err(VirtprintError::Config(
                "engine.timeout_ms must be greater than zero".into(),
            ));
        }

        if self.callback.kind == CallbackKind::Command && self.callback.program.is_none() {
            return Err(VirtprintError::Config(
                "callback.kind = \"command\" requires callback.program".into(),
            ));
        }
        if self.callback.timeout_ms == 0 {
            return Err(VirtprintError::Config(
                "callback.timeout_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
