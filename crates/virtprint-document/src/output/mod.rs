// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output directory layout: file naming and fallback artifacts.

pub mod fallback;
pub mod namer;

pub use fallback::{FailureRecord, FallbackArtifact, FallbackWriter};
pub use namer::{JobStem, OutputNamer, reserve};
