// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job pipeline: sealed job in, outcome and metadata out.
//
//   inspect (hash + metadata) -> name -> dispatch -> success
//                                               \-> fallback artifact -> failed
//
// `process` never fails. Whatever goes wrong with a job ends up as a
// `Failed` outcome plus a fallback artifact, and the listener carries on.

use std::sync::Arc;

use tracing::{error, info, warn};

use virtprint_core::config::VirtprintConfig;
use virtprint_core::error::Result;
use virtprint_core::types::{ConversionOutcome, JobInfo, PrintJob, UNKNOWN};
use virtprint_document::{
    ConversionDispatcher, ConversionEngine, DocumentMetadata, FailureRecord, FallbackArtifact,
    FallbackWriter, JobStem, OutputNamer, ResolvedEngines, hash_bytes, inspect,
};

/// Everything the pipeline learned about one job.
#[derive(Debug)]
pub struct JobReport {
    pub outcome: ConversionOutcome,
    pub info: JobInfo,
    /// Set for failed jobs; logged, never handed to the callback as output.
    pub fallback: Option<FallbackArtifact>,
}

pub struct JobPipeline {
    namer: Arc<OutputNamer>,
    dispatcher: ConversionDispatcher,
    fallback: FallbackWriter,
}

impl JobPipeline {
    /// Build the pipeline, creating the output directory and locating the
    /// conversion engines on `PATH`.
    pub fn new(config: &VirtprintConfig, runner: Arc<dyn ConversionEngine>) -> Result<Self> {
        let engines = ResolvedEngines::resolve(&config.engine);
        Self::with_engines(config, engines, runner)
    }

    /// Build the pipeline with already-resolved engine locations.
    pub fn with_engines(
        config: &VirtprintConfig,
        engines: ResolvedEngines,
        runner: Arc<dyn ConversionEngine>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.output.directory)?;
        let namer = Arc::new(OutputNamer::new(&config.output.directory));
        let dispatcher = ConversionDispatcher::new(
            config.output.clone(),
            engines,
            config.engine.timeout(),
            runner,
        );
        let fallback = FallbackWriter::new(Arc::clone(&namer), config.fallback.clone());

        info!(
            directory = %config.output.directory.display(),
            format = %config.output.format,
            dpi = config.output.dpi,
            "job pipeline ready"
        );
        Ok(Self {
            namer,
            dispatcher,
            fallback,
        })
    }

    /// Convert one sealed job. Consumes the job; its buffer is released when
    /// this returns.
    pub async fn process(&self, job: PrintJob) -> JobReport {
        let job = Arc::new(job);
        let job_id = job.id;

        let (sha256, metadata) = {
            let job = Arc::clone(&job);
            tokio::task::spawn_blocking(move || {
                (hash_bytes(&job.raw_data), inspect(&job.raw_data, job.detected_format))
            })
            .await
            .unwrap_or_else(|e| {
                error!(%job_id, error = %e, "job inspection panicked");
                (UNKNOWN.to_string(), DocumentMetadata::default())
            })
        };

        let stem = self.namer.allocate(job.sealed_at);
        let output_format = self.dispatcher.output_format();
        let dispatched = self
            .dispatcher
            .dispatch(&job.raw_data, job.detected_format, &stem)
            .await;

        let mut page_count = metadata.page_count;
        let (outcome, fallback) = match dispatched.map(ConversionOutcome::success) {
            Ok(Some(outcome)) => {
                if output_format.is_multi_page() {
                    page_count = u32::try_from(outcome.output_files().len()).ok();
                }
                info!(
                    %job_id,
                    files = outcome.output_files().len(),
                    "job converted"
                );
                (outcome, None)
            }
            Ok(None) => self.fail(&job, &stem, &sha256, "conversion produced no files").await,
            Err(e) => self.fail(&job, &stem, &sha256, &e.to_string()).await,
        };

        let info = JobInfo {
            job_id: job.id,
            document_name: metadata.title.unwrap_or_else(|| UNKNOWN.to_string()),
            user_name: metadata.user.unwrap_or_else(|| UNKNOWN.to_string()),
            page_count,
            format: job.detected_format,
            output_format,
            received_at: job.received_at,
            sealed_at: job.sealed_at,
            peer: job.peer,
            data_size: job.raw_data.len(),
            sha256,
            seal_reason: job.seal_reason,
        };

        JobReport {
            outcome,
            info,
            fallback,
        }
    }

    async fn fail(
        &self,
        job: &PrintJob,
        stem: &JobStem,
        sha256: &str,
        reason: &str,
    ) -> (ConversionOutcome, Option<FallbackArtifact>) {
        warn!(job_id = %job.id, format = %job.detected_format, reason, "job conversion failed");

        let record = FailureRecord {
            job,
            output_format: self.dispatcher.output_format(),
            reason,
            sha256,
        };
        let artifact = match self.fallback.write(stem, &record).await {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "fallback artifact could not be written");
                None
            }
        };
        (ConversionOutcome::failed(reason), artifact)
    }
}
