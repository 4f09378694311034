// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the virtprint job pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder for metadata the print stream did not carry.
pub const UNKNOWN: &str = "unknown";

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of an accepted TCP connection (sequential per listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Page-description format carried by a print stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputFormat {
    #[serde(rename = "PostScript")]
    PostScript,
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "XPS")]
    Xps,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl InputFormat {
    /// Display name, also used in `JobInfo` and callback payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PostScript => "PostScript",
            Self::Pdf => "PDF",
            Self::Xps => "XPS",
            Self::Unknown => "Unknown",
        }
    }

    /// File extension used when staging the raw bytes for the engine.
    pub fn staging_extension(&self) -> &'static str {
        match self {
            Self::PostScript => "ps",
            Self::Pdf => "pdf",
            Self::Xps => "xps",
            Self::Unknown => "bin",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested output kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "PNG")]
    Png,
    #[serde(rename = "JPEG")]
    Jpeg,
    #[serde(rename = "TIFF")]
    Tiff,
    /// PostScript.
    #[serde(rename = "PS")]
    PostScript,
    /// The job bytes, unchanged.
    #[serde(rename = "RAW")]
    Raw,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Tiff => "TIFF",
            Self::PostScript => "PS",
            Self::Raw => "RAW",
        }
    }

    /// Extension of the files written to the output directory.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tiff",
            Self::PostScript => "ps",
            Self::Raw => "prn",
        }
    }

    /// Raster formats produce one file per page; everything else one file per job.
    pub fn is_multi_page(&self) -> bool {
        matches!(self, Self::Png | Self::Jpeg | Self::Tiff)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PDF" => Ok(Self::Pdf),
            "PNG" => Ok(Self::Png),
            "JPEG" | "JPG" => Ok(Self::Jpeg),
            "TIFF" | "TIF" => Ok(Self::Tiff),
            "PS" | "POSTSCRIPT" => Ok(Self::PostScript),
            "RAW" | "PRN" => Ok(Self::Raw),
            other => Err(format!(
                "unsupported output format '{other}' (expected PDF, PNG, JPEG, TIFF, PS or RAW)"
            )),
        }
    }
}

/// Colour depth of raster output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorDepth {
    /// Full colour.
    #[serde(rename = "24bit")]
    Color24,
    /// Grayscale.
    #[serde(rename = "8bit")]
    Gray8,
    /// Black and white.
    #[serde(rename = "1bit")]
    Mono1,
}

impl FromStr for ColorDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "24bit" | "color" | "colour" => Ok(Self::Color24),
            "8bit" | "gray" | "grey" | "grayscale" => Ok(Self::Gray8),
            "1bit" | "mono" | "monochrome" => Ok(Self::Mono1),
            other => Err(format!(
                "unsupported colour depth '{other}' (expected 24bit, 8bit or 1bit)"
            )),
        }
    }
}

/// Why a job stopped accepting bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SealReason {
    /// The client closed its side of the connection.
    PeerClosed,
    /// No bytes arrived for the configured idle timeout.
    IdleTimeout,
    /// The job reached `listener.max_job_bytes`.
    SizeLimit,
    /// The connection failed mid-stream; the partial data is the job.
    ConnectionError,
    /// The listener is shutting down.
    Shutdown,
}

impl std::fmt::Display for SealReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer-closed",
            Self::IdleTimeout => "idle-timeout",
            Self::SizeLimit => "size-limit",
            Self::ConnectionError => "connection-error",
            Self::Shutdown => "shutdown",
        })
    }
}

/// A sealed print job.
///
/// Only the job accumulator creates these, at the moment it seals. The value
/// is moved into the job pipeline, which consumes it exactly once.
#[derive(Debug)]
pub struct PrintJob {
    pub id: JobId,
    pub connection: ConnectionId,
    pub peer: SocketAddr,
    /// Position in the listener-wide seal order (0-based).
    pub sequence: u64,
    pub raw_data: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
    pub detected_format: InputFormat,
    pub seal_reason: SealReason,
}

/// Result status of one conversion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// What the conversion produced for one job.
///
/// `Success` always carries at least one file, in page order; `Failed`
/// never carries any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    status: OutcomeStatus,
    output_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
}

impl ConversionOutcome {
    /// A successful outcome. Returns `None` for an empty file list.
    pub fn success(output_files: Vec<PathBuf>) -> Option<Self> {
        if output_files.is_empty() {
            return None;
        }
        Some(Self {
            status: OutcomeStatus::Success,
            output_files,
            failure_reason: None,
        })
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            output_files: Vec::new(),
            failure_reason: Some(reason.into()),
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Output files in page order (empty when failed).
    pub fn output_files(&self) -> &[PathBuf] {
        &self.output_files
    }

    /// The output files, or `None` as the "no files" marker for failures.
    pub fn files(&self) -> Option<&[PathBuf]> {
        match self.status {
            OutcomeStatus::Success => Some(&self.output_files),
            OutcomeStatus::Failed => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

/// Job metadata handed to the post-processing callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub job_id: JobId,
    /// Best-effort; [`UNKNOWN`] when the stream names no document.
    pub document_name: String,
    /// Best-effort; [`UNKNOWN`] when the stream names no user.
    pub user_name: String,
    /// Best-effort page count.
    pub page_count: Option<u32>,
    pub format: InputFormat,
    pub output_format: OutputFormat,
    pub received_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
    pub peer: SocketAddr,
    pub data_size: usize,
    /// SHA-256 of the raw job bytes, lowercase hex.
    pub sha256: String,
    pub seal_reason: SealReason,
}

/// Lifecycle state of the job listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}
