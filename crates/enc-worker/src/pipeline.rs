//! The job pipeline.
//!
//! One run takes a job through download, probe, encode and upload in strict
//! order, writing the job's status before each stage starts. The first
//! failure ends the run; the working directory is removed whatever happened,
//! then the terminal status is written and a notification is sent.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use enc_media::{EncodeProgress, EncodeTask, EncoderOptions, ProbeResult, Transcoder};
use enc_models::{Job, JobGuid, JobStatus};
use enc_storage::{StorageDriver, StorageSettings, TransferProgress};
use enc_store::{Store, WorkerSettings};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::notify::{Notification, WebhookNotifier};
use crate::reporter::{spawn_transfer_reporter, EncodeReporter};
use crate::workdir::JobWorkspace;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Probe,
    Encode,
    Upload,
    Cleanup,
    Notify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Probe => "probe",
            Stage::Encode => "encode",
            Stage::Upload => "upload",
            Stage::Cleanup => "cleanup",
            Stage::Notify => "notify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the storage driver for a job's settings.
pub trait DriverFactory: Send + Sync {
    fn connect(&self, settings: &StorageSettings) -> Arc<dyn StorageDriver>;
}

/// Connects the S3 or FTP driver the settings name.
#[derive(Debug, Default, Clone, Copy)]
pub struct SettingsDrivers;

impl DriverFactory for SettingsDrivers {
    fn connect(&self, settings: &StorageSettings) -> Arc<dyn StorageDriver> {
        settings.connect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub progress_interval: Duration,
    pub stage_timeout: Duration,
}

impl From<&WorkerConfig> for PipelineConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            progress_interval: config.progress_interval,
            stage_timeout: config.stage_timeout,
        }
    }
}

/// Runs jobs end to end. Shared by every worker of a pool.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn Store>,
    transcoder: Arc<dyn Transcoder>,
    drivers: Arc<dyn DriverFactory>,
    notifier: WebhookNotifier,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        transcoder: Arc<dyn Transcoder>,
        notifier: WebhookNotifier,
    ) -> Self {
        let (_, shutdown) = watch::channel(false);
        Self {
            config,
            store,
            transcoder,
            drivers: Arc::new(SettingsDrivers),
            notifier,
            shutdown,
        }
    }

    pub fn with_drivers(mut self, drivers: Arc<dyn DriverFactory>) -> Self {
        self.drivers = drivers;
        self
    }

    /// Stop between stages once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run the job to a terminal status.
    ///
    /// Returns [`WorkerError::Interrupted`] without writing a terminal status
    /// when shutdown was requested between two stages.
    pub async fn run(&self, guid: &JobGuid) -> WorkerResult<JobStatus> {
        let job = self.store.get_job_by_guid(guid).await?;
        let logger = JobLogger::new(&job.guid);
        let span = logger.create_span();
        self.execute(job, logger).instrument(span).await
    }

    async fn execute(&self, job: Job, logger: JobLogger) -> WorkerResult<JobStatus> {
        metrics::record_job_started();

        let settings = match WorkerSettings::load(self.store.as_ref()).await {
            Ok(settings) => settings,
            Err(e) => {
                let err = WorkerError::config_error(e.to_string());
                return self.finish(&job, &logger, None, Err(err)).await;
            }
        };
        let driver = self.drivers.connect(&settings.storage);
        let workspace = JobWorkspace::new(&self.config.work_dir, &job.guid);

        let result = self
            .run_stages(&job, &logger, &settings, driver.as_ref(), &workspace)
            .await;

        logger.stage_started(Stage::Cleanup);
        let started = Instant::now();
        let result = match (result, workspace.remove().await) {
            (result, Ok(())) => {
                logger.stage_completed(Stage::Cleanup, started.elapsed());
                result
            }
            (Ok(()), Err(e)) => {
                logger.stage_failed(Stage::Cleanup, &e);
                Err(e)
            }
            // An earlier failure already decided the outcome
            (Err(first), Err(e)) => {
                logger.stage_failed(Stage::Cleanup, &e);
                Err(first)
            }
        };

        if matches!(result, Err(WorkerError::Interrupted)) {
            logger.log_warning("shutdown requested, leaving job for redelivery");
            return Err(WorkerError::Interrupted);
        }

        self.finish(&job, &logger, settings.webhook.as_deref(), result)
            .await
    }

    async fn run_stages(
        &self,
        job: &Job,
        logger: &JobLogger,
        settings: &WorkerSettings,
        driver: &dyn StorageDriver,
        workspace: &JobWorkspace,
    ) -> WorkerResult<()> {
        self.check_shutdown()?;
        workspace.create().await?;

        let input = match self.streaming_input(job, logger, settings, driver).await {
            Some(url) => url,
            None => {
                self.stage(job, logger, Stage::Download, JobStatus::Downloading, async {
                    self.download(job, driver, workspace).await
                })
                .await?
            }
        };

        self.check_shutdown()?;
        let probe = self
            .stage(job, logger, Stage::Probe, JobStatus::Probing, async {
                self.probe(job, &input).await
            })
            .await?;

        self.check_shutdown()?;
        self.stage(job, logger, Stage::Encode, JobStatus::Encoding, async {
            self.encode(job, workspace, &input, probe.total_frames()).await
        })
        .await?;

        self.check_shutdown()?;
        self.stage(job, logger, Stage::Upload, JobStatus::Uploading, async {
            self.upload(job, driver, workspace).await
        })
        .await
    }

    fn check_shutdown(&self) -> WorkerResult<()> {
        if *self.shutdown.borrow() {
            Err(WorkerError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn timed_out(&self) -> String {
        format!("timed out after {}s", self.config.stage_timeout.as_secs())
    }

    /// Write `status`, then run `work` with stage logging and timing.
    async fn stage<T, F>(
        &self,
        job: &Job,
        logger: &JobLogger,
        stage: Stage,
        status: JobStatus,
        work: F,
    ) -> WorkerResult<T>
    where
        F: std::future::Future<Output = WorkerResult<T>>,
    {
        self.store
            .update_job_status_by_guid(&job.guid, status)
            .await?;
        logger.stage_started(stage);

        let started = Instant::now();
        let result = work.await;
        let elapsed = started.elapsed();
        metrics::record_stage_duration(stage, elapsed.as_secs_f64());

        match &result {
            Ok(_) => logger.stage_completed(stage, elapsed),
            Err(e) => logger.stage_failed(stage, e),
        }
        result
    }

    /// Presigned source URL when streaming is on and the driver can sign.
    async fn streaming_input(
        &self,
        job: &Job,
        logger: &JobLogger,
        settings: &WorkerSettings,
        driver: &dyn StorageDriver,
    ) -> Option<String> {
        if !settings.streaming || !driver.supports_presign() {
            return None;
        }

        match timeout(self.config.stage_timeout, driver.presigned_url(&job.source)).await {
            Ok(Ok(url)) => Some(url),
            Ok(Err(e)) => {
                logger.log_warning(&format!("presign failed, downloading instead: {e}"));
                None
            }
            Err(_) => {
                logger.log_warning("presign timed out, downloading instead");
                None
            }
        }
    }

    async fn download(
        &self,
        job: &Job,
        driver: &dyn StorageDriver,
        workspace: &JobWorkspace,
    ) -> WorkerResult<String> {
        let local = workspace.source_path(job.source_file_name())?;
        let progress = TransferProgress::new();
        let reporter = spawn_transfer_reporter(
            self.store.clone(),
            job.encode_id,
            progress.clone(),
            self.config.progress_interval,
        );

        let result = timeout(
            self.config.stage_timeout,
            driver.download(&job.source, &local, progress.clone()),
        )
        .await;
        reporter.stop().await;

        let bytes = match result {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(WorkerError::download_failed(e)),
            Err(_) => return Err(WorkerError::download_failed(self.timed_out())),
        };
        metrics::record_bytes_transferred("download", bytes);

        self.store
            .update_transfer_progress_by_id(job.encode_id, 100.0)
            .await?;
        Ok(local.to_string_lossy().into_owned())
    }

    async fn probe(&self, job: &Job, input: &str) -> WorkerResult<ProbeResult> {
        let probe = timeout(self.config.stage_timeout, self.transcoder.probe(input))
            .await
            .map_err(|_| WorkerError::probe_failed(self.timed_out()))?
            .map_err(WorkerError::probe_failed)?;

        self.store
            .update_encode_probe_by_id(job.encode_id, &probe.raw)
            .await?;
        Ok(probe)
    }

    async fn encode(
        &self,
        job: &Job,
        workspace: &JobWorkspace,
        input: &str,
        total_frames: Option<u64>,
    ) -> WorkerResult<()> {
        let preset = self
            .store
            .get_preset_by_name(&job.preset)
            .await
            .map_err(WorkerError::encode_failed)?;
        let args = EncoderOptions::from_preset_data(&preset.data)
            .map_err(WorkerError::encode_failed)?
            .to_args();
        let output = workspace.output_path(&preset.output)?;

        let options = serde_json::to_string(&args).map_err(WorkerError::encode_failed)?;
        self.store
            .update_encode_options_by_id(job.encode_id, &options)
            .await?;

        let (progress_tx, progress_rx) = watch::channel(EncodeProgress::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_seen = cancel_rx.clone();
        let reporter = EncodeReporter {
            store: self.store.clone(),
            guid: job.guid.clone(),
            encode_id: job.encode_id,
            total_frames,
            progress_rx,
            cancel_tx,
            period: self.config.progress_interval,
        }
        .spawn();

        let task = EncodeTask {
            input: input.to_string(),
            output,
            args,
        };
        let result = timeout(
            self.config.stage_timeout,
            self.transcoder.encode(&task, progress_tx, cancel_rx),
        )
        .await;
        reporter.stop().await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(WorkerError::from_encode(e)),
            Err(_) => return Err(WorkerError::encode_failed(self.timed_out())),
        }

        // A cancel that landed as the encoder exited still wins
        let cancel_sent = *cancel_seen.borrow();
        if cancel_sent
            || self.store.get_job_status_by_guid(&job.guid).await? == JobStatus::Cancelled
        {
            return Err(WorkerError::EncodeCancelled);
        }

        self.store
            .update_encode_progress_by_id(job.encode_id, Some(100.0), None, None)
            .await?;
        Ok(())
    }

    async fn upload(
        &self,
        job: &Job,
        driver: &dyn StorageDriver,
        workspace: &JobWorkspace,
    ) -> WorkerResult<()> {
        let progress = TransferProgress::new();
        let reporter = spawn_transfer_reporter(
            self.store.clone(),
            job.encode_id,
            progress.clone(),
            self.config.progress_interval,
        );

        let result = timeout(
            self.config.stage_timeout,
            driver.upload(&workspace.dst_dir(), &job.destination, progress.clone()),
        )
        .await;
        reporter.stop().await;

        match result {
            Ok(Ok(uploaded)) => {
                if uploaded.is_empty() {
                    warn!(job_guid = %job.guid, "Encoder produced no files to upload");
                }
            }
            Ok(Err(e)) => return Err(WorkerError::upload_failed(e)),
            Err(_) => return Err(WorkerError::upload_failed(self.timed_out())),
        }
        metrics::record_bytes_transferred("upload", progress.transferred());

        self.store
            .update_transfer_progress_by_id(job.encode_id, 100.0)
            .await?;
        Ok(())
    }

    /// Write the terminal status and notify.
    async fn finish(
        &self,
        job: &Job,
        logger: &JobLogger,
        webhook: Option<&str>,
        result: WorkerResult<()>,
    ) -> WorkerResult<JobStatus> {
        let (status, failure) = match result {
            Ok(()) => (JobStatus::Completed, None),
            Err(e) => (e.terminal_status(), Some(e)),
        };

        if let Err(e) = self
            .store
            .update_job_status_by_guid(&job.guid, status)
            .await
        {
            error!(job_guid = %job.guid, status = %status, error = %e, "Failed to record terminal status");
            return Err(e.into());
        }
        metrics::record_job_finished(status);

        match &failure {
            Some(e) => logger.log_completion(&format!("{status}: {e}")),
            None => logger.log_completion(status.as_str()),
        }

        if let Some(url) = webhook {
            let notification = Notification::for_job(job, status, failure.as_ref());
            let started = Instant::now();
            match self.notifier.send(url, &notification).await {
                Ok(()) => logger.stage_completed(Stage::Notify, started.elapsed()),
                Err(e) => logger.stage_failed(Stage::Notify, &e),
            }
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Download.to_string(), "download");
        assert_eq!(Stage::Notify.as_str(), "notify");
    }

    #[test]
    fn test_pipeline_config_from_worker_config() {
        let worker = WorkerConfig::default();
        let config = PipelineConfig::from(&worker);
        assert_eq!(config.work_dir, worker.work_dir);
        assert_eq!(config.stage_timeout, worker.stage_timeout);
    }
}
