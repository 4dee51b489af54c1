//! Repository interfaces per aggregate.
//!
//! Every method is individually atomic; callers do not get cross-call
//! transactions.

use async_trait::async_trait;

use enc_models::{Encode, Job, JobGuid, JobStatus, Preset};

use crate::error::StoreResult;

/// Jobs, addressed by guid.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new job together with its empty encode record.
    ///
    /// Returns the job with store ids filled in.
    async fn create_job(&self, job: Job) -> StoreResult<Job>;

    async fn get_job_by_guid(&self, guid: &JobGuid) -> StoreResult<Job>;

    async fn get_job_status_by_guid(&self, guid: &JobGuid) -> StoreResult<JobStatus>;

    async fn update_job_status_by_guid(&self, guid: &JobGuid, status: JobStatus)
        -> StoreResult<()>;
}

/// Encode records, addressed by their numeric id.
#[async_trait]
pub trait EncodeRepository: Send + Sync {
    async fn get_encode_by_id(&self, id: i64) -> StoreResult<Encode>;

    /// Store the raw probe JSON.
    async fn update_encode_probe_by_id(&self, id: i64, probe: &str) -> StoreResult<()>;

    /// Store the resolved encoder arguments.
    async fn update_encode_options_by_id(&self, id: i64, options: &str) -> StoreResult<()>;

    /// Store a download/upload percentage.
    async fn update_transfer_progress_by_id(&self, id: i64, progress: f64) -> StoreResult<()>;

    /// Store an encode tick. A `None` progress leaves the stored value as is.
    async fn update_encode_progress_by_id(
        &self,
        id: i64,
        progress: Option<f64>,
        speed: Option<&str>,
        fps: Option<f64>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait PresetRepository: Send + Sync {
    /// Active preset called `name`.
    async fn get_preset_by_name(&self, name: &str) -> StoreResult<Preset>;
}

/// Runtime settings by string key.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Value for `key`, `None` when unset.
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
}

/// Everything the pipeline needs from persistence.
pub trait Store: JobRepository + EncodeRepository + PresetRepository + SettingsRepository {}

impl<T> Store for T where T: JobRepository + EncodeRepository + PresetRepository + SettingsRepository
{}
