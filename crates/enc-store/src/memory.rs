//! In-process store.
//!
//! Backs single-node deployments and tests. Besides the repository
//! operations it keeps the history of every status and progress write so
//! callers can assert on the exact sequence a job went through.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use enc_models::{Encode, Job, JobGuid, JobStatus, Preset};

use crate::error::{StoreError, StoreResult};
use crate::repos::{EncodeRepository, JobRepository, PresetRepository, SettingsRepository};

/// A persisted progress write.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressWrite {
    Transfer(f64),
    Encode {
        progress: Option<f64>,
        speed: Option<String>,
        fps: Option<f64>,
    },
}

impl ProgressWrite {
    pub fn progress(&self) -> Option<f64> {
        match self {
            ProgressWrite::Transfer(progress) => Some(*progress),
            ProgressWrite::Encode { progress, .. } => *progress,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    last_id: i64,
    jobs: HashMap<JobGuid, Job>,
    encodes: HashMap<i64, Encode>,
    presets: HashMap<String, Preset>,
    settings: HashMap<String, String>,
    status_history: HashMap<JobGuid, Vec<JobStatus>>,
    progress_history: HashMap<i64, Vec<ProgressWrite>>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn encode_mut(&mut self, id: i64) -> StoreResult<&mut Encode> {
        self.encodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("encode {id}")))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a preset.
    pub async fn insert_preset(&self, preset: Preset) {
        let mut state = self.state.lock().await;
        state.presets.insert(preset.name.clone(), preset);
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        state.settings.insert(key.to_string(), value.to_string());
    }

    /// Every status written for `guid`, oldest first, including the initial one.
    pub async fn status_history(&self, guid: &JobGuid) -> Vec<JobStatus> {
        let state = self.state.lock().await;
        state.status_history.get(guid).cloned().unwrap_or_default()
    }

    /// Every progress write for encode `id`, oldest first.
    pub async fn progress_history(&self, id: i64) -> Vec<ProgressWrite> {
        let state = self.state.lock().await;
        state.progress_history.get(&id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, mut job: Job) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.guid) {
            return Err(StoreError::AlreadyExists(job.guid.to_string()));
        }

        job.id = state.next_id();
        job.encode_id = state.next_id();
        state
            .encodes
            .insert(job.encode_id, Encode::new(job.encode_id, job.id));
        state
            .status_history
            .insert(job.guid.clone(), vec![job.status]);
        state.jobs.insert(job.guid.clone(), job.clone());
        Ok(job)
    }

    async fn get_job_by_guid(&self, guid: &JobGuid) -> StoreResult<Job> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(guid)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("job {guid}")))
    }

    async fn get_job_status_by_guid(&self, guid: &JobGuid) -> StoreResult<JobStatus> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(guid)
            .map(|job| job.status)
            .ok_or_else(|| StoreError::not_found(format!("job {guid}")))
    }

    async fn update_job_status_by_guid(
        &self,
        guid: &JobGuid,
        status: JobStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(guid)
            .ok_or_else(|| StoreError::not_found(format!("job {guid}")))?;
        job.status = status;
        state
            .status_history
            .entry(guid.clone())
            .or_default()
            .push(status);
        Ok(())
    }
}

#[async_trait]
impl EncodeRepository for MemoryStore {
    async fn get_encode_by_id(&self, id: i64) -> StoreResult<Encode> {
        let mut state = self.state.lock().await;
        state.encode_mut(id).map(|encode| encode.clone())
    }

    async fn update_encode_probe_by_id(&self, id: i64, probe: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.encode_mut(id)?.probe = Some(probe.to_string());
        Ok(())
    }

    async fn update_encode_options_by_id(&self, id: i64, options: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.encode_mut(id)?.options = Some(options.to_string());
        Ok(())
    }

    async fn update_transfer_progress_by_id(&self, id: i64, progress: f64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.encode_mut(id)?.progress = Some(progress);
        state
            .progress_history
            .entry(id)
            .or_default()
            .push(ProgressWrite::Transfer(progress));
        Ok(())
    }

    async fn update_encode_progress_by_id(
        &self,
        id: i64,
        progress: Option<f64>,
        speed: Option<&str>,
        fps: Option<f64>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let encode = state.encode_mut(id)?;
        if progress.is_some() {
            encode.progress = progress;
        }
        if let Some(speed) = speed {
            encode.speed = Some(speed.to_string());
        }
        if fps.is_some() {
            encode.fps = fps;
        }
        state
            .progress_history
            .entry(id)
            .or_default()
            .push(ProgressWrite::Encode {
                progress,
                speed: speed.map(str::to_string),
                fps,
            });
        Ok(())
    }
}

#[async_trait]
impl PresetRepository for MemoryStore {
    async fn get_preset_by_name(&self, name: &str) -> StoreResult<Preset> {
        let state = self.state.lock().await;
        state
            .presets
            .get(name)
            .filter(|preset| preset.active)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("preset {name}")))
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.settings.get(key).cloned())
    }
}
