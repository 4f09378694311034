// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP job listener (JetDirect style, default port 9100).
//
// Each accepted connection gets its own task and its own `JobAccumulator`.
// The wire carries the page-description language itself with no framing, so
// job boundaries come from the connection:
//
//   peer closes          seal the open job, close
//   idle timeout         seal the open job, keep the connection for more jobs
//   connection timeout   no open job and nothing arriving: close
//   size limit           seal what fits, close
//   read error           seal the partial job as-is, close
//
// A sealed job takes a callback ticket (its place in seal order) and runs
// through the pipeline in a task of its own, so a slow conversion never
// stalls reading on any connection.
//
// # Shutdown
//
// `stop` stops accepting, makes every connection seal its open job, then
// waits up to the grace period for in-flight jobs. Jobs still running after
// that are abandoned: their engine is killed and no callback is made.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use virtprint_core::config::VirtprintConfig;
use virtprint_core::error::{Result, VirtprintError};
use virtprint_core::types::{ConnectionId, SealReason, ServerStatus};

use crate::accumulator::{AppendOutcome, JobAccumulator};
use crate::callback::CallbackInvoker;
use crate::pipeline::JobPipeline;

/// Bytes read from a socket per call.
const READ_CHUNK: usize = 8192;

/// Pause after a failed `accept` (descriptor exhaustion and the like).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming connections.
#[async_trait]
trait Accept: Send + Sync {
    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// State shared by the accept loop, connection tasks, and job tasks.
struct Shared {
    config: Arc<VirtprintConfig>,
    pipeline: Arc<JobPipeline>,
    callbacks: CallbackInvoker,
    /// Stop accepting; connections seal their open job and close.
    shutdown: CancellationToken,
    /// Drop in-flight pipeline work.
    abandon: CancellationToken,
    tracker: TaskTracker,
    active_connections: AtomicU32,
    jobs_in_flight: AtomicUsize,
    next_connection: AtomicU64,
}

/// The TCP endpoint that looks like a printer.
pub struct JobListener {
    config: Arc<VirtprintConfig>,
    pipeline: Arc<JobPipeline>,
    callbacks: Option<CallbackInvoker>,
    status: ServerStatus,
    local_addr: Option<SocketAddr>,
    shared: Option<Arc<Shared>>,
    task_handle: Option<JoinHandle<()>>,
}

impl JobListener {
    /// Create a listener in `Stopped` state. Call [`start`](Self::start) to
    /// bind and begin accepting.
    pub fn new(
        config: Arc<VirtprintConfig>,
        pipeline: Arc<JobPipeline>,
        callbacks: CallbackInvoker,
    ) -> Self {
        Self {
            config,
            pipeline,
            callbacks: Some(callbacks),
            status: ServerStatus::Stopped,
            local_addr: None,
            shared: None,
            task_handle: None,
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// The bound address, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.shared
            .as_ref()
            .map_or(0, |s| s.active_connections.load(Ordering::Relaxed))
    }

    /// Bind the configured address and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// `Listener` if the address cannot be bound, or if the listener was
    /// already stopped (a stopped listener cannot be restarted).
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "listener already running");
            return Ok(addr);
        }
        let callbacks = self
            .callbacks
            .clone()
            .ok_or_else(|| VirtprintError::Listener("listener was stopped".into()))?;

        self.status = ServerStatus::Starting;
        let bind_addr = self.config.listener.bind_address();
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(VirtprintError::Listener(format!("bind {bind_addr}: {e}")));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| VirtprintError::Listener(format!("local address: {e}")))?;

        info!(
            addr = %local_addr,
            idle_timeout_ms = self.config.listener.idle_timeout_ms,
            "virtual printer listening"
        );

        let shared = Arc::new(Shared {
            config: Arc::clone(&self.config),
            pipeline: Arc::clone(&self.pipeline),
            callbacks,
            shutdown: CancellationToken::new(),
            abandon: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active_connections: AtomicU32::new(0),
            jobs_in_flight: AtomicUsize::new(0),
            next_connection: AtomicU64::new(1),
        });

        let loop_shared = Arc::clone(&shared);
        self.task_handle = Some(tokio::spawn(async move {
            accept_loop(listener, loop_shared).await;
        }));
        self.shared = Some(shared);
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;
        Ok(local_addr)
    }

    /// Stop accepting, seal open jobs, and wait out the grace period.
    ///
    /// Releases this listener's handle on the callback invoker, so the
    /// callback worker can finish once every job is delivered.
    pub async fn stop(&mut self) -> Result<()> {
        self.callbacks = None;
        if self.status != ServerStatus::Running {
            return Ok(());
        }
        let Some(shared) = self.shared.take() else {
            return Ok(());
        };

        info!(addr = ?self.local_addr, "stopping virtual printer");
        shared.shutdown.cancel();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| VirtprintError::Listener(format!("accept loop join: {e}")))?;
        }

        shared.tracker.close();
        let grace = self.config.listener.shutdown_grace();
        if tokio::time::timeout(grace, shared.tracker.wait()).await.is_err() {
            warn!(
                jobs = shared.jobs_in_flight.load(Ordering::SeqCst),
                grace_ms = grace.as_millis() as u64,
                "grace period over; abandoning incomplete jobs without callback"
            );
            shared.abandon.cancel();
            shared.tracker.wait().await;
        }

        self.status = ServerStatus::Stopped;
        info!(addr = ?self.local_addr, "virtual printer stopped");
        Ok(())
    }
}

async fn accept_loop<A: Accept>(listener: A, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                debug!("accept loop received shutdown signal");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let connection = ConnectionId(
                            shared.next_connection.fetch_add(1, Ordering::Relaxed),
                        );
                        info!(%connection, %peer, "connection accepted");
                        let state = Arc::clone(&shared);
                        shared.tracker.spawn(async move {
                            state.active_connections.fetch_add(1, Ordering::Relaxed);
                            handle_connection(stream, peer, connection, &state).await;
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            info!(%connection, %peer, "connection closed");
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        tokio::select! {
                            _ = shared.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Read one connection until it ends, sealing jobs at their boundaries.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    shared: &Arc<Shared>,
) {
    let listener_config = &shared.config.listener;
    let mut accumulator = JobAccumulator::new(connection, peer, listener_config.max_job_bytes);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let wait = if accumulator.is_open() {
            listener_config.idle_timeout()
        } else {
            listener_config.connection_timeout()
        };

        let read = tokio::select! {
            _ = shared.shutdown.cancelled() => {
                seal_and_dispatch(&mut accumulator, SealReason::Shutdown, shared);
                break;
            }
            read = tokio::time::timeout(wait, stream.read(&mut buf)) => read,
        };

        match read {
            Err(_elapsed) if accumulator.is_open() => {
                seal_and_dispatch(&mut accumulator, SealReason::IdleTimeout, shared);
            }
            Err(_elapsed) => {
                debug!(%connection, "no data within connection timeout; closing");
                break;
            }
            Ok(Ok(0)) => {
                seal_and_dispatch(&mut accumulator, SealReason::PeerClosed, shared);
                break;
            }
            Ok(Ok(n)) => {
                if accumulator.append(&buf[..n]) == AppendOutcome::LimitReached {
                    warn!(
                        %connection,
                        max_job_bytes = listener_config.max_job_bytes,
                        "job reached size limit; closing connection"
                    );
                    seal_and_dispatch(&mut accumulator, SealReason::SizeLimit, shared);
                    break;
                }
            }
            Ok(Err(e)) => {
                let err = VirtprintError::Connection(format!("read from {peer}: {e}"));
                warn!(%connection, error = %err, "connection failed; keeping partial job");
                seal_and_dispatch(&mut accumulator, SealReason::ConnectionError, shared);
                break;
            }
        }
    }
}

/// Seal the open job, if any, and run it through the pipeline in its own task.
fn seal_and_dispatch(accumulator: &mut JobAccumulator, reason: SealReason, shared: &Arc<Shared>) {
    if !accumulator.is_open() {
        return;
    }
    let ticket = shared.callbacks.ticket();
    let Some(job) = accumulator.seal(reason, ticket.sequence()) else {
        return;
    };

    let job_id = job.id;
    info!(
        %job_id,
        connection = %job.connection,
        sequence = job.sequence,
        bytes = job.raw_data.len(),
        format = %job.detected_format,
        trigger = %reason,
        "job sealed"
    );

    let state = Arc::clone(shared);
    state.jobs_in_flight.fetch_add(1, Ordering::SeqCst);
    shared.tracker.spawn(async move {
        tokio::select! {
            report = state.pipeline.process(job) => {
                if let Some(artifact) = &report.fallback {
                    info!(
                        %job_id,
                        diagnostic = %artifact.diagnostic.display(),
                        "job kept as fallback artifact"
                    );
                }
                ticket.deliver(report.outcome, report.info);
            }
            _ = state.abandon.cancelled() => {
                warn!(%job_id, "job incomplete at shutdown; abandoned");
            }
        }
        state.jobs_in_flight.fetch_sub(1, Ordering::SeqCst);
    });
}
