// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collision-free output file names.
//
// Every job gets a stem `{YYYYmmdd_HHMMSS}_job{NNNNNN}`: the local seal time
// plus a process-wide counter. Files derived from one stem:
//
//   {stem}.pdf                single-file output (index 0)
//   {stem}_p00001.png ...     one file per page, zero-padded so a name sort
//                             is page order
//   {stem}_failed.txt         fallback diagnostic
//   {stem}_raw.prn            fallback raw dump
//
// A name is only handed out once per process, and `reserve` refuses to
// reuse a path that already exists on disk, so nothing is ever overwritten.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local, Utc};
use tokio::fs::OpenOptions;

use virtprint_core::error::{Result, VirtprintError};

/// Hands out job stems for one output directory.
#[derive(Debug)]
pub struct OutputNamer {
    directory: PathBuf,
    next: AtomicU64,
}

impl OutputNamer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh stem for a job sealed at `sealed_at`.
    pub fn allocate(&self, sealed_at: DateTime<Utc>) -> JobStem {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let timestamp = sealed_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        JobStem {
            directory: self.directory.clone(),
            stem: format!("{timestamp}_job{n:06}"),
        }
    }
}

/// The name prefix shared by every file of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStem {
    directory: PathBuf,
    stem: String,
}

impl JobStem {
    pub fn as_str(&self) -> &str {
        &self.stem
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of output file `index`: 0 for single-file formats, the 1-based
    /// page ordinal for per-page formats.
    pub fn page_path(&self, index: usize, extension: &str) -> PathBuf {
        if index == 0 {
            self.directory.join(format!("{}.{extension}", self.stem))
        } else {
            self.directory
                .join(format!("{}_p{index:05}.{extension}", self.stem))
        }
    }

    /// Path of an auxiliary artifact, e.g. `{stem}_failed.txt`.
    pub fn artifact_path(&self, suffix: &str, extension: &str) -> PathBuf {
        self.directory
            .join(format!("{}_{suffix}.{extension}", self.stem))
    }
}

impl std::fmt::Display for JobStem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stem)
    }
}

/// Claim `path` by creating it empty. Fails with `NamingCollision` if the
/// file already exists.
pub async fn reserve(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(VirtprintError::NamingCollision(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
