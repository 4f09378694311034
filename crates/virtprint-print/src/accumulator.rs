// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-connection job accumulator.
//
// Two states per job: open (buffering bytes) and sealed. The accumulator
// starts with no job; the first byte opens one. `seal` moves the buffer out
// as a `PrintJob` and returns the accumulator to the no-job state, ready for
// the next job on the same connection.
//
// The format is re-sniffed as bytes arrive, until it is recognised or the
// sniff window is full. The verdict at seal time is final.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use virtprint_core::types::{ConnectionId, InputFormat, JobId, PrintJob, SealReason};
use virtprint_document::{sniff, verdict_may_change};

/// Result of feeding bytes to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// All bytes were buffered.
    Appended,
    /// The job hit its size limit. Bytes past the limit were dropped and the
    /// job must be sealed with [`SealReason::SizeLimit`].
    LimitReached,
}

#[derive(Debug)]
struct OpenJob {
    id: JobId,
    data: Vec<u8>,
    received_at: DateTime<Utc>,
    detected: InputFormat,
}

/// Buffers the bytes of one connection into successive print jobs.
#[derive(Debug)]
pub struct JobAccumulator {
    connection: ConnectionId,
    peer: SocketAddr,
    max_job_bytes: usize,
    open: Option<OpenJob>,
}

impl JobAccumulator {
    pub fn new(connection: ConnectionId, peer: SocketAddr, max_job_bytes: usize) -> Self {
        Self {
            connection,
            peer,
            max_job_bytes,
            open: None,
        }
    }

    /// Whether a job is currently open (has at least one byte).
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Bytes buffered in the open job.
    pub fn buffered(&self) -> usize {
        self.open.as_ref().map_or(0, |job| job.data.len())
    }

    /// Current format verdict for the open job.
    pub fn detected_format(&self) -> InputFormat {
        self.open
            .as_ref()
            .map_or(InputFormat::Unknown, |job| job.detected)
    }

    /// Append bytes in arrival order, opening a new job if none is open.
    pub fn append(&mut self, bytes: &[u8]) -> AppendOutcome {
        if bytes.is_empty() {
            return AppendOutcome::Appended;
        }

        let connection = self.connection;
        let job = self.open.get_or_insert_with(|| {
            let id = JobId::new();
            debug!(%connection, job_id = %id, "job opened");
            OpenJob {
                id,
                data: Vec::new(),
                received_at: Utc::now(),
                detected: InputFormat::Unknown,
            }
        });

        let room = self.max_job_bytes.saturating_sub(job.data.len());
        let (accepted, outcome) = if bytes.len() >= room {
            (&bytes[..room], AppendOutcome::LimitReached)
        } else {
            (bytes, AppendOutcome::Appended)
        };

        let before = job.data.len();
        job.data.extend_from_slice(accepted);

        if job.detected == InputFormat::Unknown && verdict_may_change(before) {
            job.detected = sniff(&job.data);
            if job.detected.is_known() {
                debug!(%connection, job_id = %job.id, format = %job.detected, "format detected");
            }
        }

        trace!(%connection, buffered = job.data.len(), "bytes appended");
        outcome
    }

    /// Seal the open job, if any.
    ///
    /// `sequence` is the job's position in the listener-wide seal order.
    pub fn seal(&mut self, reason: SealReason, sequence: u64) -> Option<PrintJob> {
        let job = self.open.take()?;
        Some(PrintJob {
            id: job.id,
            connection: self.connection,
            peer: self.peer,
            sequence,
            raw_data: job.data,
            received_at: job.received_at,
            sealed_at: Utc::now(),
            detected_format: job.detected,
            seal_reason: reason,
        })
    }
}
