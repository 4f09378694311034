// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// virtprint-print: the network side of the virtual printer: TCP job
// listener, per-connection job accumulation, the conversion pipeline, and
// ordered delivery to the post-processing callback.

pub mod accumulator;
pub mod callback;
pub mod listener;
pub mod pipeline;
pub mod raw_client;

pub use accumulator::{AppendOutcome, JobAccumulator};
pub use callback::{
    CallbackInvoker, CallbackTicket, CallbackWorker, CommandCallback, JobCallback, LogCallback,
};
pub use listener::JobListener;
pub use pipeline::{JobPipeline, JobReport};
pub use raw_client::send_raw;
