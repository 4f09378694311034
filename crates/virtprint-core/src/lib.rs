// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// virtprint: Core types, error definitions, and the immutable configuration
// object shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::VirtprintConfig;
pub use error::VirtprintError;
pub use types::*;
