//! Test doubles for pipeline and pool tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use enc_media::{EncodeProgress, EncodeTask, MediaError, MediaResult, ProbeResult, Transcoder};
use enc_models::{Encode, EncodeRequest, Job, JobGuid, JobStatus, Preset};
use enc_storage::config::keys as storage_keys;
use enc_storage::{
    collect_files, DriverKind, StorageDriver, StorageEntry, StorageError, StorageResult,
    StorageSettings, TransferProgress,
};
use enc_store::{
    EncodeRepository, JobRepository, MemoryStore, PresetRepository, SettingsRepository, StoreError,
    StoreResult,
};
use enc_worker::{DriverFactory, Pipeline, PipelineConfig, WebhookNotifier};

pub const PRESET: &str = "web-720p";
pub const SOURCE_BYTES: &[u8] = b"source media bytes";

pub fn probe_json(nb_frames: &str) -> String {
    format!(
        r#"{{"streams":[{{"index":0,"codec_type":"video","codec_name":"h264","nb_frames":"{nb_frames}"}}],"format":{{"duration":"4.0"}}}}"#
    )
}

pub enum EncodeBehavior {
    /// Report frames 50 and 100 and write the output file
    Succeed,
    Fail(&'static str),
    /// Run until cancelled
    WaitForCancel,
}

pub struct FakeTranscoder {
    pub probe_json: String,
    pub probe_error: Option<&'static str>,
    pub probe_delay: Duration,
    pub encode: EncodeBehavior,
    pub inputs: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new(encode: EncodeBehavior) -> Self {
        Self {
            probe_json: probe_json("100"),
            probe_error: None,
            probe_delay: Duration::ZERO,
            encode,
            inputs: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    /// Most media inspections that were ever in progress at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, input: &str) -> MediaResult<ProbeResult> {
        self.inputs.lock().unwrap().push(input.to_string());
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.probe_delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        match self.probe_error {
            Some(message) => Err(MediaError::ffprobe_failed(message, None)),
            None => ProbeResult::from_json(self.probe_json.clone()),
        }
    }

    async fn encode(
        &self,
        task: &EncodeTask,
        progress_tx: watch::Sender<EncodeProgress>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> MediaResult<()> {
        match self.encode {
            EncodeBehavior::Succeed => {
                progress_tx.send_modify(|p| {
                    p.apply_line("frame=50");
                    p.apply_line("fps=25.0");
                    p.apply_line("speed=1.5x");
                });
                progress_tx.send_modify(|p| {
                    p.apply_line("frame=100");
                    p.apply_line("progress=end");
                });
                if let Some(parent) = task.output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&task.output, b"encoded").await?;
                Ok(())
            }
            EncodeBehavior::Fail(message) => Err(MediaError::ffmpeg_failed(
                message,
                Some("Invalid data found when processing input".to_string()),
                Some(1),
            )),
            EncodeBehavior::WaitForCancel => {
                while !*cancel_rx.borrow() {
                    if cancel_rx.changed().await.is_err() {
                        break;
                    }
                }
                Err(MediaError::Cancelled)
            }
        }
    }
}

#[derive(Default)]
pub struct FakeDriver {
    pub presign: bool,
    pub fail_download: bool,
    /// Replace the job's working directory with a plain file after uploading
    pub clobber_workspace: bool,
    pub uploaded: Mutex<Vec<String>>,
}

impl FakeDriver {
    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageDriver for FakeDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Ftp
    }

    async fn download(
        &self,
        source: &str,
        local_path: &Path,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<u64> {
        if self.fail_download {
            return Err(StorageError::NotFound(source.to_string()));
        }
        progress.set_total(SOURCE_BYTES.len() as u64);
        tokio::fs::write(local_path, SOURCE_BYTES).await?;
        progress.add(SOURCE_BYTES.len() as u64);
        Ok(SOURCE_BYTES.len() as u64)
    }

    async fn upload(
        &self,
        local_dir: &Path,
        destination: &str,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<Vec<String>> {
        let files = collect_files(local_dir)?;
        progress.set_total(files.iter().map(|(_, size)| size).sum());
        let mut written = Vec::new();
        for (path, size) in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            progress.add(size);
            written.push(format!("{}{}", destination, name));
        }
        self.uploaded.lock().unwrap().extend(written.clone());
        if self.clobber_workspace {
            if let Some(root) = local_dir.parent() {
                tokio::fs::remove_dir_all(root).await?;
                tokio::fs::write(root, b"not a directory").await?;
            }
        }
        Ok(written)
    }

    async fn list_files(&self, _prefix: &str) -> StorageResult<Vec<StorageEntry>> {
        Ok(Vec::new())
    }

    fn supports_presign(&self) -> bool {
        self.presign
    }

    async fn presigned_url(&self, source: &str) -> StorageResult<String> {
        Ok(format!("https://signed.example.com/{}?X-Amz-Signature=abc", source.trim_start_matches('/')))
    }
}

/// Hands out the same driver whatever the settings.
pub struct FixedDrivers(pub Arc<FakeDriver>);

impl DriverFactory for FixedDrivers {
    fn connect(&self, _settings: &StorageSettings) -> Arc<dyn StorageDriver> {
        self.0.clone()
    }
}

/// Store with an FTP backend configured and the test preset installed.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.set_setting(storage_keys::STORAGE_DRIVER, "ftp").await;
    store.set_setting(storage_keys::FTP_ADDR, "ftp.example.com:21").await;
    store.set_setting(storage_keys::FTP_USERNAME, "encoder").await;
    store
        .insert_preset(Preset {
            name: PRESET.to_string(),
            description: "H.264 720p".to_string(),
            data: serde_json::json!({
                "video": {"codec": "libx264", "preset": "fast", "pass": "crf", "crf": 23},
                "audio": {"codec": "aac", "quality": "128k"}
            }),
            output: "out.mp4".to_string(),
            active: true,
        })
        .await;
    store
}

pub async fn queued_job(store: &MemoryStore) -> Job {
    store
        .create_job(Job::new(PRESET, "/uploads/in.mov", "/encoded/"))
        .await
        .unwrap()
}

/// Queue arguments for `job`, as the producer enqueues them.
pub fn job_args(job: &Job) -> HashMap<String, String> {
    EncodeRequest {
        guid: job.guid.clone(),
        preset: job.preset.clone(),
        source: job.source.clone(),
        destination: job.destination.clone(),
    }
    .to_args()
}

pub fn pipeline_config(work_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.to_path_buf(),
        progress_interval: Duration::from_secs(1),
        stage_timeout: Duration::from_secs(30),
    }
}

pub fn pipeline(
    work_dir: &Path,
    store: Arc<dyn enc_store::Store>,
    transcoder: Arc<FakeTranscoder>,
    driver: Arc<FakeDriver>,
) -> Pipeline {
    Pipeline::new(
        pipeline_config(work_dir),
        store,
        transcoder,
        WebhookNotifier::new().unwrap(),
    )
    .with_drivers(Arc::new(FixedDrivers(driver)))
}

/// Poll until `guid` has been written `status`.
pub async fn wait_for_status(store: &MemoryStore, guid: &JobGuid, status: JobStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !store.status_history(guid).await.contains(&status) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job never reached {status}"));
}

/// [`MemoryStore`] that rejects every write of one job status.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub reject: JobStatus,
}

#[async_trait]
impl JobRepository for FlakyStore {
    async fn create_job(&self, job: Job) -> StoreResult<Job> {
        self.inner.create_job(job).await
    }

    async fn get_job_by_guid(&self, guid: &JobGuid) -> StoreResult<Job> {
        self.inner.get_job_by_guid(guid).await
    }

    async fn get_job_status_by_guid(&self, guid: &JobGuid) -> StoreResult<JobStatus> {
        self.inner.get_job_status_by_guid(guid).await
    }

    async fn update_job_status_by_guid(&self, guid: &JobGuid, status: JobStatus) -> StoreResult<()> {
        if status == self.reject {
            return Err(StoreError::invalid_record("connection reset by peer"));
        }
        self.inner.update_job_status_by_guid(guid, status).await
    }
}

#[async_trait]
impl EncodeRepository for FlakyStore {
    async fn get_encode_by_id(&self, id: i64) -> StoreResult<Encode> {
        self.inner.get_encode_by_id(id).await
    }

    async fn update_encode_probe_by_id(&self, id: i64, probe: &str) -> StoreResult<()> {
        self.inner.update_encode_probe_by_id(id, probe).await
    }

    async fn update_encode_options_by_id(&self, id: i64, options: &str) -> StoreResult<()> {
        self.inner.update_encode_options_by_id(id, options).await
    }

    async fn update_transfer_progress_by_id(&self, id: i64, progress: f64) -> StoreResult<()> {
        self.inner.update_transfer_progress_by_id(id, progress).await
    }

    async fn update_encode_progress_by_id(
        &self,
        id: i64,
        progress: Option<f64>,
        speed: Option<&str>,
        fps: Option<f64>,
    ) -> StoreResult<()> {
        self.inner
            .update_encode_progress_by_id(id, progress, speed, fps)
            .await
    }
}

#[async_trait]
impl PresetRepository for FlakyStore {
    async fn get_preset_by_name(&self, name: &str) -> StoreResult<Preset> {
        self.inner.get_preset_by_name(name).await
    }
}

#[async_trait]
impl SettingsRepository for FlakyStore {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get_setting(key).await
    }
}
