// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end tests: real TCP connections into a running `JobListener`, a
// stub conversion engine, and a callback that records what it is given.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use virtprint_core::config::VirtprintConfig;
use virtprint_core::error::{Result, VirtprintError};
use virtprint_core::types::{
    ConversionOutcome, InputFormat, JobInfo, OutcomeStatus, OutputFormat, SealReason, ServerStatus,
};
use virtprint_document::{ConversionEngine, EngineInvocation, ResolvedEngines};
use virtprint_print::{
    CallbackInvoker, CallbackWorker, JobCallback, JobListener, JobPipeline, send_raw,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const MINIMAL_PS: &[u8] = b"%!PS-Adobe-3.0\n%%Title: (Quarterly)\n%%For: (alex)\n%%Pages: 1\n%%EndComments\n/Helvetica findfont 12 scalefont setfont\n72 720 moveto (hello) show\nshowpage\n%%EOF\n";

#[derive(Default)]
struct RecordingCallback {
    calls: Mutex<Vec<(ConversionOutcome, JobInfo)>>,
}

#[async_trait]
impl JobCallback for RecordingCallback {
    async fn notify(&self, outcome: &ConversionOutcome, info: &JobInfo) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((outcome.clone(), info.clone()));
        Ok(())
    }
}

impl RecordingCallback {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<(ConversionOutcome, JobInfo)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Stands in for Ghostscript. Writes one file per requested page; sleeps
/// first when the staged input contains `slow`, forever when it contains
/// `hang`.
struct StubEngine {
    pages: u32,
}

#[async_trait]
impl ConversionEngine for StubEngine {
    async fn run(&self, invocation: &EngineInvocation) -> Result<()> {
        let input = invocation
            .args
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| VirtprintError::ConversionEngine("no input".into()))?;
        let data = tokio::fs::read(&input).await?;
        if contains(&data, b"hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if contains(&data, b"slow") {
            tokio::time::sleep(Duration::from_millis(600)).await;
        }

        let pattern = invocation
            .args
            .iter()
            .filter_map(|a| a.to_str())
            .find_map(|a| a.strip_prefix("-sOutputFile="))
            .ok_or_else(|| VirtprintError::ConversionEngine("no output".into()))?
            .to_string();
        if pattern.contains("%05d") {
            for page in 1..=self.pages {
                tokio::fs::write(pattern.replace("%05d", &format!("{page:05}")), b"page").await?;
            }
        } else {
            tokio::fs::write(pattern, b"%PDF-1.7 converted").await?;
        }
        Ok(())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

struct Harness {
    listener: JobListener,
    worker: CallbackWorker,
    recorder: Arc<RecordingCallback>,
    addr: String,
    _dir: TempDir,
    out: PathBuf,
}

impl Harness {
    async fn start(tweak: impl FnOnce(&mut VirtprintConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let out = dir.path().join("out");

        let mut config = VirtprintConfig::default();
        config.listener.port = 0;
        config.listener.idle_timeout_ms = 300;
        config.listener.connection_timeout_ms = 5_000;
        config.listener.shutdown_grace_ms = 2_000;
        config.output.directory = out.clone();
        config.engine.timeout_ms = 5_000;
        tweak(&mut config);
        config.validate().expect("test config valid");
        let config = Arc::new(config);

        let engines = ResolvedEngines {
            ghostscript: Some(PathBuf::from("gs")),
            gxps: Some(PathBuf::from("gxps")),
        };
        let pipeline = JobPipeline::with_engines(&config, engines, Arc::new(StubEngine { pages: 2 }))
            .expect("pipeline");

        let recorder = Arc::new(RecordingCallback::default());
        let (invoker, worker) = CallbackInvoker::spawn(recorder.clone(), Duration::from_secs(5));
        let mut listener = JobListener::new(Arc::clone(&config), Arc::new(pipeline), invoker);
        let addr = listener.start().await.expect("listener start").to_string();

        Self {
            listener,
            worker,
            recorder,
            addr,
            _dir: dir,
            out,
        }
    }

    async fn send(&self, data: &[u8]) {
        send_raw(&self.addr, data, Duration::from_secs(5))
            .await
            .expect("send");
    }

    async fn wait_for_callbacks(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.recorder.count() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} callbacks, got {}",
                self.recorder.count()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop the listener, drain the callback worker, and return every
    /// callback made.
    async fn finish(mut self) -> (Vec<(ConversionOutcome, JobInfo)>, PathBuf, TempDir) {
        self.listener.stop().await.expect("stop");
        drop(self.listener);
        self.worker.finish().await;
        (self.recorder.snapshot(), self.out, self._dir)
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read output dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn postscript_job_becomes_one_pdf() {
    let harness = Harness::start(|_| {}).await;
    harness.send(MINIMAL_PS).await;
    harness.wait_for_callbacks(1).await;

    let (calls, out, _dir) = harness.finish().await;
    assert_eq!(calls.len(), 1);
    let (outcome, info) = &calls[0];
    assert_eq!(outcome.status(), OutcomeStatus::Success);
    let files = outcome.files().expect("files");
    assert_eq!(files.len(), 1);
    assert!(files[0].exists());
    assert_eq!(files[0].extension().and_then(|e| e.to_str()), Some("pdf"));

    assert_eq!(info.format, InputFormat::PostScript);
    assert_eq!(info.output_format, OutputFormat::Pdf);
    assert_eq!(info.document_name, "Quarterly");
    assert_eq!(info.user_name, "alex");
    assert_eq!(info.page_count, Some(1));
    assert_eq!(info.seal_reason, SealReason::PeerClosed);
    assert_eq!(info.data_size, MINIMAL_PS.len());
    assert!(info.sealed_at >= info.received_at);

    assert_eq!(files_in(&out).len(), 1);
}

#[tokio::test]
async fn random_bytes_fall_back() {
    let harness = Harness::start(|_| {}).await;
    harness.send(b"\x8f\x02zq\x10\xffA\x00\x93k").await;
    harness.wait_for_callbacks(1).await;

    let (calls, out, _dir) = harness.finish().await;
    assert_eq!(calls.len(), 1);
    let (outcome, info) = &calls[0];
    assert_eq!(outcome.status(), OutcomeStatus::Failed);
    assert!(outcome.files().is_none());
    assert!(outcome.output_files().is_empty());
    assert_eq!(info.format, InputFormat::Unknown);
    assert_eq!(info.document_name, "unknown");

    let names = files_in(&out);
    assert!(names.iter().any(|n| n.ends_with("_failed.txt")), "{names:?}");
    assert!(names.iter().any(|n| n.ends_with("_raw.prn")), "{names:?}");
}

#[tokio::test]
async fn engine_timeout_fails_once_with_artifact() {
    let harness = Harness::start(|c| c.engine.timeout_ms = 200).await;
    harness.send(b"%!PS-Adobe-3.0\n% hang\nshowpage\n").await;
    harness.wait_for_callbacks(1).await;

    let (calls, out, _dir) = harness.finish().await;
    assert_eq!(calls.len(), 1);
    let (outcome, _) = &calls[0];
    assert_eq!(outcome.status(), OutcomeStatus::Failed);
    assert!(outcome.failure_reason().is_some_and(|r| r.contains("200 ms")));

    let names = files_in(&out);
    assert!(names.iter().any(|n| n.ends_with("_failed.txt")), "{names:?}");
    assert!(!names.iter().any(|n| n.ends_with(".pdf")), "{names:?}");
}

#[tokio::test]
async fn zero_byte_connection_makes_no_job() {
    let harness = Harness::start(|_| {}).await;
    let stream = TcpStream::connect(&harness.addr).await.expect("connect");
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (calls, out, _dir) = harness.finish().await;
    assert!(calls.is_empty());
    assert!(files_in(&out).is_empty());
}

#[tokio::test]
async fn idle_timeout_splits_jobs_on_one_connection() {
    let harness = Harness::start(|c| c.listener.idle_timeout_ms = 200).await;

    let mut stream = TcpStream::connect(&harness.addr).await.expect("connect");
    stream.write_all(b"%!PS-Adobe-3.0\n%%Title: (first)\nshowpage\n").await.expect("write");
    tokio::time::sleep(Duration::from_millis(600)).await;
    stream.write_all(b"%PDF-1.4\nsecond\n").await.expect("write");
    stream.shutdown().await.expect("shutdown");
    drop(stream);
    harness.wait_for_callbacks(2).await;

    let (calls, _out, _dir) = harness.finish().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1.seal_reason, SealReason::IdleTimeout);
    assert_eq!(calls[0].1.format, InputFormat::PostScript);
    assert_eq!(calls[0].1.document_name, "first");
    assert_eq!(calls[1].1.seal_reason, SealReason::PeerClosed);
    assert_eq!(calls[1].1.format, InputFormat::Pdf);
    assert_ne!(calls[0].1.job_id, calls[1].1.job_id);
}

#[tokio::test]
async fn callbacks_follow_seal_order() {
    let harness = Harness::start(|_| {}).await;

    harness.send(b"%!PS-Adobe-3.0\n%%Title: (A)\n% slow\nshowpage\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.send(b"%!PS-Adobe-3.0\n%%Title: (B)\nshowpage\n").await;
    harness.wait_for_callbacks(2).await;

    let (calls, _out, _dir) = harness.finish().await;
    let names: Vec<&str> = calls.iter().map(|(_, info)| info.document_name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert!(calls.iter().all(|(outcome, _)| outcome.is_success()));
}

#[tokio::test]
async fn raster_output_lists_pages_in_order() {
    let harness = Harness::start(|c| c.output.format = OutputFormat::Png).await;
    harness.send(MINIMAL_PS).await;
    harness.wait_for_callbacks(1).await;

    let (calls, _out, _dir) = harness.finish().await;
    let (outcome, info) = &calls[0];
    let files = outcome.files().expect("files");
    assert_eq!(files.len(), 2);
    assert!(files[0] < files[1]);
    assert!(files.iter().all(|f| f.extension().and_then(|e| e.to_str()) == Some("png")));
    assert_eq!(info.page_count, Some(2));
}

#[tokio::test]
async fn concurrent_jobs_get_distinct_files() {
    let harness = Harness::start(|_| {}).await;

    let sends = (0..8).map(|i| {
        let addr = harness.addr.clone();
        tokio::spawn(async move {
            let doc = format!("%!PS-Adobe-3.0\n%%Title: (doc {i})\nshowpage\n");
            send_raw(&addr, doc.as_bytes(), Duration::from_secs(5)).await
        })
    });
    for send in sends.collect::<Vec<_>>() {
        send.await.expect("join").expect("send");
    }
    harness.wait_for_callbacks(8).await;

    let (calls, out, _dir) = harness.finish().await;
    let mut paths: Vec<PathBuf> = calls
        .iter()
        .flat_map(|(outcome, _)| outcome.output_files().to_vec())
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 8);
    assert_eq!(files_in(&out).len(), 8);
}

#[tokio::test]
async fn size_limit_seals_and_closes() {
    let harness = Harness::start(|c| c.listener.max_job_bytes = 64).await;

    let mut doc = b"%!PS-Adobe-3.0\n".to_vec();
    doc.resize(4096, b' ');
    // The listener may close before the client finishes writing.
    let _ = send_raw(&harness.addr, &doc, Duration::from_secs(5)).await;
    harness.wait_for_callbacks(1).await;

    let (calls, _out, _dir) = harness.finish().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.seal_reason, SealReason::SizeLimit);
    assert_eq!(calls[0].1.data_size, 64);
}

#[tokio::test]
async fn shutdown_seals_open_jobs() {
    let harness = Harness::start(|c| c.listener.idle_timeout_ms = 10_000).await;

    let mut stream = TcpStream::connect(&harness.addr).await.expect("connect");
    stream.write_all(MINIMAL_PS).await.expect("write");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (calls, _out, _dir) = harness.finish().await;
    drop(stream);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.seal_reason, SealReason::Shutdown);
    assert!(calls[0].0.is_success());
}

#[tokio::test]
async fn jobs_past_the_grace_period_are_abandoned() {
    let harness = Harness::start(|c| {
        c.listener.shutdown_grace_ms = 200;
        c.engine.timeout_ms = 60_000;
    })
    .await;
    harness.send(b"%!PS-Adobe-3.0\n% hang\nshowpage\n").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let (calls, out, _dir) = harness.finish().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(calls.is_empty(), "abandoned job must not reach the callback");
    assert!(files_in(&out).is_empty(), "{:?}", files_in(&out));
}

#[tokio::test]
async fn abrupt_disconnect_keeps_partial_job() {
    let harness = Harness::start(|c| c.listener.idle_timeout_ms = 5_000).await;
    let partial: &[u8] = b"%!PS-Adobe-3.0\n%%Title: (cut)\nshow";

    let mut stream = TcpStream::connect(&harness.addr).await.expect("connect");
    stream.write_all(partial).await.expect("write");
    tokio::time::sleep(Duration::from_millis(200)).await;
    // Zero linger turns the close into a reset.
    #[allow(deprecated)]
    stream.set_linger(Some(Duration::ZERO)).expect("linger");
    drop(stream);
    harness.wait_for_callbacks(1).await;

    let (calls, _out, _dir) = harness.finish().await;
    assert_eq!(calls.len(), 1);
    let (_, info) = &calls[0];
    assert_eq!(info.seal_reason, SealReason::ConnectionError);
    assert_eq!(info.data_size, partial.len());
    assert_eq!(info.format, InputFormat::PostScript);
}

#[tokio::test]
async fn listener_reports_status_and_connections() {
    let mut harness = Harness::start(|_| {}).await;
    assert_eq!(harness.listener.status(), ServerStatus::Running);
    assert_eq!(
        harness.listener.local_addr().map(|a| a.to_string()),
        Some(harness.addr.clone())
    );

    let stream = TcpStream::connect(&harness.addr).await.expect("connect");
    wait_until(|| harness.listener.active_connections() == 1).await;
    drop(stream);
    wait_until(|| harness.listener.active_connections() == 0).await;

    harness.listener.stop().await.expect("stop");
    assert_eq!(harness.listener.status(), ServerStatus::Stopped);

    let (calls, _out, _dir) = harness.finish().await;
    assert!(calls.is_empty());
}
