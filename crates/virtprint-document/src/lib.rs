// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// virtprint-document: everything that looks at or produces job documents.
//
// Provides format sniffing, best-effort metadata extraction (PostScript DSC
// and PJL, PDF, XPS), conversion dispatch to an external engine, and the
// output directory layout (file naming, fallback artifacts).

pub mod convert;
pub mod engine;
pub mod integrity;
pub mod metadata;
pub mod output;
pub mod pdf;
pub mod sniff;

// Re-export the primary items so callers can use `virtprint_document::sniff` etc.
pub use convert::{ConversionDispatcher, ConversionPlan, EngineKind, plan};
pub use engine::{ConversionEngine, EngineInvocation, ProcessEngine, ResolvedEngines, locate_program};
pub use integrity::hash_bytes;
pub use metadata::{DocumentMetadata, inspect};
pub use output::{FailureRecord, FallbackArtifact, FallbackWriter, JobStem, OutputNamer};
pub use pdf::PdfReader;
pub use sniff::{SNIFF_WINDOW, sniff, verdict_may_change};
