// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Post-processing callbacks.
//
// Every sealed job that completes the pipeline is reported exactly once to a
// `JobCallback`, in the order jobs sealed. Ordering is enforced by tickets:
// a ticket takes the next sequence number when its job seals, and a single
// worker task delivers results strictly by sequence, holding back results
// that finish early. A ticket dropped without delivering (job abandoned at
// shutdown, pipeline task panicked) releases its slot so later jobs are not
// held up.
//
// Each call runs in its own task under a time cap. A call past the cap is
// cancelled, which kills a command callback's program. A callback that
// errors, panics, or overruns is logged; it never affects other jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use virtprint_core::config::{CallbackConfig, CallbackKind};
use virtprint_core::error::{Result, VirtprintError};
use virtprint_core::types::{ConversionOutcome, JobInfo};

/// The post-processing collaborator.
///
/// `outcome.files()` is `None` for failed jobs. The call is dropped when it
/// runs past the configured cap, so implementations must not block the
/// runtime.
#[async_trait]
pub trait JobCallback: Send + Sync {
    async fn notify(&self, outcome: &ConversionOutcome, info: &JobInfo) -> Result<()>;
}

/// Logs a summary of each job.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCallback;

#[async_trait]
impl JobCallback for LogCallback {
    async fn notify(&self, outcome: &ConversionOutcome, info: &JobInfo) -> Result<()> {
        match outcome.files() {
            Some(files) => {
                info!(
                    job_id = %info.job_id,
                    document = %info.document_name,
                    user = %info.user_name,
                    pages = ?info.page_count,
                    format = %info.format,
                    output_format = %info.output_format,
                    files = files.len(),
                    "print job completed"
                );
                for file in files {
                    info!(job_id = %info.job_id, path = %file.display(), "  output file");
                }
            }
            None => {
                warn!(
                    job_id = %info.job_id,
                    document = %info.document_name,
                    format = %info.format,
                    reason = outcome.failure_reason().unwrap_or("unknown"),
                    "print job failed"
                );
            }
        }
        Ok(())
    }
}

/// Runs an external program per job.
///
/// The program receives a JSON document on stdin:
///
/// ```json
/// {"status": "success", "output_files": ["/out/..pdf"], "failure_reason": null, "job_info": {..}}
/// ```
///
/// plus `VIRTPRINT_STATUS` and `VIRTPRINT_JOB_ID` in its environment. A
/// non-zero exit is a callback error. A program still running when the call
/// is cancelled is killed.
#[derive(Debug, Clone)]
pub struct CommandCallback {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCallback {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl JobCallback for CommandCallback {
    async fn notify(&self, outcome: &ConversionOutcome, info: &JobInfo) -> Result<()> {
        let status = if outcome.is_success() { "success" } else { "failed" };
        let payload = json!({
            "status": status,
            "output_files": outcome.files(),
            "failure_reason": outcome.failure_reason(),
            "job_info": info,
        });
        let payload = serde_json::to_vec(&payload)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("VIRTPRINT_STATUS", status)
            .env("VIRTPRINT_JOB_ID", info.job_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VirtprintError::Callback(format!("spawn {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that ignores stdin may close it early; that is fine.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "callback program did not read the full payload");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| VirtprintError::Callback(format!("wait: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VirtprintError::Callback(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Build the configured callback.
pub fn from_config(config: &CallbackConfig) -> Result<Arc<dyn JobCallback>> {
    match config.kind {
        CallbackKind::Log => Ok(Arc::new(LogCallback)),
        CallbackKind::Command => {
            let program = config.program.clone().ok_or_else(|| {
                VirtprintError::Config("callback.kind = \"command\" requires callback.program".into())
            })?;
            Ok(Arc::new(CommandCallback::new(program, config.args.clone())))
        }
    }
}

// ---------------------------------------------------------------------------
// Ordered delivery
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Delivery {
    Report {
        outcome: ConversionOutcome,
        info: JobInfo,
    },
    Skipped,
}

#[derive(Debug)]
struct Message {
    sequence: u64,
    delivery: Delivery,
}

/// Hands out tickets; cheap to clone.
#[derive(Clone)]
pub struct CallbackInvoker {
    tx: mpsc::UnboundedSender<Message>,
    next_sequence: Arc<AtomicU64>,
}

/// The task delivering results to the callback.
pub struct CallbackWorker {
    handle: JoinHandle<()>,
}

impl CallbackInvoker {
    /// Start the delivery worker for `callback`, each call capped at `cap`.
    pub fn spawn(callback: Arc<dyn JobCallback>, cap: Duration) -> (Self, CallbackWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(delivery_loop(rx, callback, cap));
        (
            Self {
                tx,
                next_sequence: Arc::new(AtomicU64::new(0)),
            },
            CallbackWorker { handle },
        )
    }

    /// Reserve the next slot in seal order. Call at the moment a job seals.
    pub fn ticket(&self) -> CallbackTicket {
        CallbackTicket {
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            tx: Some(self.tx.clone()),
        }
    }
}

impl CallbackWorker {
    /// Wait until every outstanding ticket is resolved and delivered.
    ///
    /// Returns once all `CallbackInvoker` clones and tickets are dropped.
    pub async fn finish(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "callback worker terminated abnormally");
        }
    }
}

/// One job's slot in the delivery order.
#[derive(Debug)]
pub struct CallbackTicket {
    sequence: u64,
    tx: Option<mpsc::UnboundedSender<Message>>,
}

impl CallbackTicket {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Queue the job's result for delivery.
    pub fn deliver(mut self, outcome: ConversionOutcome, info: JobInfo) {
        if let Some(tx) = self.tx.take() {
            let message = Message {
                sequence: self.sequence,
                delivery: Delivery::Report { outcome, info },
            };
            if tx.send(message).is_err() {
                warn!(sequence = self.sequence, "callback worker gone; result not delivered");
            }
        }
    }
}

impl Drop for CallbackTicket {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!(sequence = self.sequence, "callback slot released without a result");
            let _ = tx.send(Message {
                sequence: self.sequence,
                delivery: Delivery::Skipped,
            });
        }
    }
}

async fn delivery_loop(
    mut rx: mpsc::UnboundedReceiver<Message>,
    callback: Arc<dyn JobCallback>,
    cap: Duration,
) {
    let mut next = 0u64;
    let mut held: BTreeMap<u64, Delivery> = BTreeMap::new();

    while let Some(message) = rx.recv().await {
        held.insert(message.sequence, message.delivery);
        while let Some(delivery) = held.remove(&next) {
            next += 1;
            run_one(&callback, delivery, cap).await;
        }
    }

    // Every sender is gone, so no gap can be filled any more.
    for (_, delivery) in std::mem::take(&mut held) {
        run_one(&callback, delivery, cap).await;
    }
    debug!("callback worker finished");
}

async fn run_one(callback: &Arc<dyn JobCallback>, delivery: Delivery, cap: Duration) {
    let Delivery::Report { outcome, info } = delivery else {
        return;
    };

    let job_id = info.job_id;
    let callback = Arc::clone(callback);
    let mut call = tokio::spawn(async move { callback.notify(&outcome, &info).await });

    match tokio::time::timeout(cap, &mut call).await {
        Ok(Ok(Ok(()))) => debug!(%job_id, "callback delivered"),
        Ok(Ok(Err(e))) => warn!(%job_id, error = %e, "post-processing callback failed"),
        Ok(Err(e)) => error!(%job_id, error = %e, "post-processing callback panicked"),
        Err(_) => {
            call.abort();
            warn!(
                %job_id,
                cap_ms = cap.as_millis() as u64,
                "post-processing callback exceeded its time cap; cancelled"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;
    use virtprint_core::types::{InputFormat, JobId, OutputFormat, SealReason, UNKNOWN};

    /// Records every notification, in delivery order.
    #[derive(Default)]
    pub(crate) struct RecordingCallback {
        pub(crate) calls: Mutex<Vec<(ConversionOutcome, JobInfo)>>,
    }

    #[async_trait]
    impl JobCallback for RecordingCallback {
        async fn notify(&self, outcome: &ConversionOutcome, info: &JobInfo) -> Result<()> {
            self.calls.lock().unwrap().push((outcome.clone(), info.clone()));
            Ok(())
        }
    }

    struct FailingCallback;

    #[async_trait]
    impl JobCallback for FailingCallback {
        async fn notify(&self, _: &ConversionOutcome, _: &JobInfo) -> Result<()> {
            Err(VirtprintError::Callback("smtp unreachable".into()))
        }
    }

    pub(crate) fn info(name: &str) -> JobInfo {
        let now = Utc::now();
        JobInfo {
            job_id: JobId::new(),
            document_name: name.to_string(),
            user_name: UNKNOWN.to_string(),
            page_count: Some(1),
            format: InputFormat::PostScript,
            output_format: OutputFormat::Pdf,
            received_at: now,
            sealed_at: now,
            peer: "127.0.0.1:1".parse().unwrap(),
            data_size: 10,
            sha256: String::new(),
            seal_reason: SealReason::PeerClosed,
        }
    }

    fn names(recorder: &RecordingCallback) -> Vec<String> {
        recorder
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, info)| info.document_name.clone())
            .collect()
    }

    #[tokio::test]
    async fn delivers_in_seal_order() {
        let recorder = Arc::new(RecordingCallback::default());
        let (invoker, worker) = CallbackInvoker::spawn(recorder.clone(), Duration::from_secs(5));

        let first = invoker.ticket();
        let second = invoker.ticket();
        let third = invoker.ticket();

        // Finish out of order.
        third.deliver(ConversionOutcome::failed("x"), info("third"));
        second.deliver(ConversionOutcome::failed("x"), info("second"));
        first.deliver(ConversionOutcome::failed("x"), info("first"));

        drop(invoker);
        worker.finish().await;
        assert_eq!(names(&recorder), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn dropped_ticket_does_not_block_later_jobs() {
        let recorder = Arc::new(RecordingCallback::default());
        let (invoker, worker) = CallbackInvoker::spawn(recorder.clone(), Duration::from_secs(5));

        let abandoned = invoker.ticket();
        let later = invoker.ticket();
        later.deliver(ConversionOutcome::failed("x"), info("later"));
        drop(abandoned);

        drop(invoker);
        worker.finish().await;
        assert_eq!(names(&recorder), vec!["later"]);
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_delivery() {
        let (invoker, worker) =
            CallbackInvoker::spawn(Arc::new(FailingCallback), Duration::from_secs(5));
        invoker.ticket().deliver(ConversionOutcome::failed("x"), info("a"));
        invoker.ticket().deliver(ConversionOutcome::failed("x"), info("b"));
        drop(invoker);
        // Completes without panicking the worker.
        worker.finish().await;
    }

    #[tokio::test]
    async fn slow_callback_is_capped() {
        struct Sleepy;
        #[async_trait]
        impl JobCallback for Sleepy {
            async fn notify(&self, _: &ConversionOutcome, _: &JobInfo) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
        }

        let (invoker, worker) = CallbackInvoker::spawn(Arc::new(Sleepy), Duration::from_millis(50));
        invoker.ticket().deliver(ConversionOutcome::failed("x"), info("a"));
        drop(invoker);

        let started = std::time::Instant::now();
        worker.finish().await;
        assert!(started.elapsed() < Duration::from_millis(450));
    }

    #[test]
    fn from_config_requires_program_for_command() {
        let mut config = CallbackConfig {
            kind: CallbackKind::Command,
            ..CallbackConfig::default()
        };
        assert!(from_config(&config).is_err());
        config.program = Some(PathBuf::from("/usr/local/bin/on-print"));
        assert!(from_config(&config).is_ok());
        assert!(from_config(&CallbackConfig::default()).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_callback_receives_json_and_env() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let capture = dir.path().join("payload.json");
        let env_capture = dir.path().join("env.txt");
        let script = dir.path().join("on-print");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ncat > \"{}\"\necho \"$VIRTPRINT_STATUS $VIRTPRINT_JOB_ID\" > \"{}\"\n",
                capture.display(),
                env_capture.display()
            ),
        )
        .expect("write script");
        let mut perms = std::fs::metadata(&script).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let callback = CommandCallback::new(&script, Vec::new());
        let outcome = ConversionOutcome::success(vec![PathBuf::from("/out/a.pdf")]).unwrap();
        let info = info("report");
        callback.notify(&outcome, &info).await.expect("callback ok");

        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&capture).expect("payload")).expect("json");
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["output_files"][0], "/out/a.pdf");
        assert_eq!(payload["job_info"]["document_name"], "report");
        assert_eq!(payload["job_info"]["format"], "PostScript");

        let env = std::fs::read_to_string(&env_capture).expect("env");
        assert_eq!(env.trim(), format!("success {}", info.job_id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_callback_failure_sends_null_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let capture = dir.path().join("payload.json");
        let script = dir.path().join("on-print");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncat > \"{}\"\nexit 4\n", capture.display()),
        )
        .expect("write script");
        let mut perms = std::fs::metadata(&script).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let callback = CommandCallback::new(&script, Vec::new());
        let err = callback
            .notify(&ConversionOutcome::failed("engine timed out"), &info("x"))
            .await
            .expect_err("non-zero exit");
        assert!(matches!(err, VirtprintError::Callback(_)));

        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&capture).expect("payload")).expect("json");
        assert_eq!(payload["status"], "failed");
        assert!(payload["output_files"].is_null());
        assert_eq!(payload["failure_reason"], "engine timed out");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_callback_past_cap_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let marker = dir.path().join("finished");
        let script = dir.path().join("on-print");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch \"{}\"\n", marker.display()),
        )
        .expect("write script");
        let mut perms = std::fs::metadata(&script).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let (invoker, worker) = CallbackInvoker::spawn(
            Arc::new(CommandCallback::new(&script, Vec::new())),
            Duration::from_millis(100),
        );
        invoker.ticket().deliver(ConversionOutcome::failed("x"), info("a"));
        drop(invoker);

        let started = std::time::Instant::now();
        worker.finish().await;
        assert!(started.elapsed() < Duration::from_millis(900));

        // Had the program survived the cap it would have finished by now.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "callback program outlived its cap");
    }
}
