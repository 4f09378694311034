// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for virtprint.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all virtprint operations.
#[derive(Debug, Error)]
pub enum VirtprintError {
    // -- Job pipeline errors --
    #[error("could not identify the print data format ({size} bytes)")]
    UnknownFormat { size: usize },

    #[error("conversion engine exceeded its {timeout_ms} ms budget")]
    ConversionTimeout { timeout_ms: u64 },

    #[error("conversion engine failed: {0}")]
    ConversionEngine(String),

    #[error("output path already exists: {}", .0.display())]
    NamingCollision(PathBuf),

    #[error("post-processing callback failed: {0}")]
    Callback(String),

    // -- Network errors --
    #[error("connection error: {0}")]
    Connection(String),

    #[error("listener error: {0}")]
    Listener(String),

    // -- Document inspection --
    #[error("PDF inspection failed: {0}")]
    PdfError(String),

    // -- Startup --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, VirtprintError>;
