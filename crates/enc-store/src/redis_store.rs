//! Redis-backed store.
//!
//! Key layout under the namespace `ns`:
//! - `ns:job:<guid>` hash with the job fields
//! - `ns:encode:<id>` hash with the encode fields
//! - `ns:preset:<name>` preset as JSON
//! - `ns:settings` hash of setting key to value
//! - `ns:ids` counter for numeric ids

use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::{debug, info};

use enc_models::{Encode, Job, JobGuid, JobStatus, Preset};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::repos::{EncodeRepository, JobRepository, PresetRepository, SettingsRepository};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            namespace: "enc".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            namespace: std::env::var("WORKER_NAMESPACE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "enc".to_string()),
        }
    }

    fn job_key(&self, guid: &JobGuid) -> String {
        format!("{}:job:{}", self.namespace, guid)
    }

    fn encode_key(&self, id: i64) -> String {
        format!("{}:encode:{}", self.namespace, id)
    }

    fn preset_key(&self, name: &str) -> String {
        format!("{}:preset:{}", self.namespace, name)
    }

    fn settings_key(&self) -> String {
        format!("{}:settings", self.namespace)
    }

    fn ids_key(&self) -> String {
        format!("{}:ids", self.namespace)
    }
}

pub struct RedisStore {
    client: redis::Client,
    config: StoreConfig,
}

impl RedisStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        record_request(operation, result.is_ok(), start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Add or replace a preset.
    pub async fn put_preset(&self, preset: &Preset) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(preset)?;
        conn.set::<_, _, ()>(self.config.preset_key(&preset.name), payload)
            .await?;
        info!(preset = %preset.name, "Stored preset");
        Ok(())
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(self.config.settings_key(), key, value)
            .await?;
        Ok(())
    }

    /// Fail with `NotFound` unless `key` exists.
    async fn require(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
    ) -> StoreResult<()> {
        let exists: bool = conn.exists(key).await?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::not_found(key.to_string()))
        }
    }

    async fn set_encode_fields(&self, id: i64, fields: &[(&str, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let key = self.config.encode_key(id);
        self.require(&mut conn, &key).await?;
        conn.hset_multiple::<_, _, _, ()>(&key, fields).await?;
        Ok(())
    }
}

fn job_to_fields(job: &Job) -> Vec<(&'static str, String)> {
    vec![
        ("id", job.id.to_string()),
        ("guid", job.guid.to_string()),
        ("preset", job.preset.clone()),
        ("source", job.source.clone()),
        ("destination", job.destination.clone()),
        ("status", job.status.as_str().to_string()),
        ("created_date", job.created_date.to_rfc3339()),
        ("encode_id", job.encode_id.to_string()),
    ]
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> StoreResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| StoreError::invalid_record(format!("missing field {name}")))
}

fn parse_field<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> StoreResult<T> {
    field(fields, name)?
        .parse()
        .map_err(|_| StoreError::invalid_record(format!("malformed field {name}")))
}

fn job_from_fields(fields: &HashMap<String, String>) -> StoreResult<Job> {
    let status: JobStatus = field(fields, "status")?
        .parse()
        .map_err(|e| StoreError::invalid_record(format!("{e}")))?;
    let created_date = DateTime::parse_from_rfc3339(field(fields, "created_date")?)
        .map_err(|e| StoreError::invalid_record(format!("created_date: {e}")))?
        .with_timezone(&Utc);

    Ok(Job {
        id: parse_field(fields, "id")?,
        guid: JobGuid::from_string(field(fields, "guid")?),
        preset: field(fields, "preset")?.to_string(),
        source: field(fields, "source")?.to_string(),
        destination: field(fields, "destination")?.to_string(),
        status,
        created_date,
        encode_id: parse_field(fields, "encode_id")?,
    })
}

fn encode_from_fields(fields: &HashMap<String, String>) -> StoreResult<Encode> {
    let optional = |name: &str| fields.get(name).filter(|v| !v.is_empty()).cloned();
    let optional_f64 = |name: &str| -> StoreResult<Option<f64>> {
        optional(name)
            .map(|v| {
                v.parse()
                    .map_err(|_| StoreError::invalid_record(format!("malformed field {name}")))
            })
            .transpose()
    };

    Ok(Encode {
        id: parse_field(fields, "id")?,
        job_id: parse_field(fields, "job_id")?,
        probe: optional("probe"),
        options: optional("options"),
        progress: optional_f64("progress")?,
        speed: optional("speed"),
        fps: optional_f64("fps")?,
    })
}

fn encode_progress_fields(
    progress: Option<f64>,
    speed: Option<&str>,
    fps: Option<f64>,
) -> Vec<(&'static str, String)> {
    let mut fields = Vec::with_capacity(3);
    if let Some(progress) = progress {
        fields.push(("progress", progress.to_string()));
    }
    if let Some(speed) = speed {
        fields.push(("speed", speed.to_string()));
    }
    if let Some(fps) = fps {
        fields.push(("fps", fps.to_string()));
    }
    fields
}

#[async_trait]
impl JobRepository for RedisStore {
    async fn create_job(&self, mut job: Job) -> StoreResult<Job> {
        self.timed("create_job", async {
            let mut conn = self.conn().await?;
            let job_key = self.config.job_key(&job.guid);
            let exists: bool = conn.exists(&job_key).await?;
            if exists {
                return Err(StoreError::AlreadyExists(job.guid.to_string()));
            }

            job.id = conn.incr(self.config.ids_key(), 1).await?;
            job.encode_id = conn.incr(self.config.ids_key(), 1).await?;

            let encode_fields = [
                ("id", job.encode_id.to_string()),
                ("job_id", job.id.to_string()),
            ];
            redis::pipe()
                .atomic()
                .hset_multiple(&job_key, &job_to_fields(&job))
                .hset_multiple(self.config.encode_key(job.encode_id), &encode_fields)
                .query_async::<()>(&mut conn)
                .await?;

            info!(job_guid = %job.guid, "Created job");
            Ok(job)
        })
        .await
    }

    async fn get_job_by_guid(&self, guid: &JobGuid) -> StoreResult<Job> {
        self.timed("get_job_by_guid", async {
            let mut conn = self.conn().await?;
            let fields: HashMap<String, String> = conn.hgetall(self.config.job_key(guid)).await?;
            if fields.is_empty() {
                return Err(StoreError::not_found(format!("job {guid}")));
            }
            job_from_fields(&fields)
        })
        .await
    }

    async fn get_job_status_by_guid(&self, guid: &JobGuid) -> StoreResult<JobStatus> {
        self.timed("get_job_status_by_guid", async {
            let mut conn = self.conn().await?;
            let status: Option<String> = conn.hget(self.config.job_key(guid), "status").await?;
            status
                .ok_or_else(|| StoreError::not_found(format!("job {guid}")))?
                .parse()
                .map_err(|e| StoreError::invalid_record(format!("{e}")))
        })
        .await
    }

    async fn update_job_status_by_guid(
        &self,
        guid: &JobGuid,
        status: JobStatus,
    ) -> StoreResult<()> {
        self.timed("update_job_status_by_guid", async {
            let mut conn = self.conn().await?;
            let key = self.config.job_key(guid);
            self.require(&mut conn, &key).await?;
            conn.hset::<_, _, _, ()>(&key, "status", status.as_str())
                .await?;
            debug!(job_guid = %guid, status = %status, "Updated job status");
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl EncodeRepository for RedisStore {
    async fn get_encode_by_id(&self, id: i64) -> StoreResult<Encode> {
        self.timed("get_encode_by_id", async {
            let mut conn = self.conn().await?;
            let fields: HashMap<String, String> = conn.hgetall(self.config.encode_key(id)).await?;
            if fields.is_empty() {
                return Err(StoreError::not_found(format!("encode {id}")));
            }
            encode_from_fields(&fields)
        })
        .await
    }

    async fn update_encode_probe_by_id(&self, id: i64, probe: &str) -> StoreResult<()> {
        self.timed(
            "update_encode_probe_by_id",
            self.set_encode_fields(id, &[("probe", probe.to_string())]),
        )
        .await
    }

    async fn update_encode_options_by_id(&self, id: i64, options: &str) -> StoreResult<()> {
        self.timed(
            "update_encode_options_by_id",
            self.set_encode_fields(id, &[("options", options.to_string())]),
        )
        .await
    }

    async fn update_transfer_progress_by_id(&self, id: i64, progress: f64) -> StoreResult<()> {
        self.timed(
            "update_transfer_progress_by_id",
            self.set_encode_fields(id, &[("progress", progress.to_string())]),
        )
        .await
    }

    async fn update_encode_progress_by_id(
        &self,
        id: i64,
        progress: Option<f64>,
        speed: Option<&str>,
        fps: Option<f64>,
    ) -> StoreResult<()> {
        let fields = encode_progress_fields(progress, speed, fps);
        self.timed("update_encode_progress_by_id", self.set_encode_fields(id, &fields))
            .await
    }
}

#[async_trait]
impl PresetRepository for RedisStore {
    async fn get_preset_by_name(&self, name: &str) -> StoreResult<Preset> {
        self.timed("get_preset_by_name", async {
            let mut conn = self.conn().await?;
            let payload: Option<String> = conn.get(self.config.preset_key(name)).await?;
            let preset: Preset = match payload {
                Some(payload) => serde_json::from_str(&payload)?,
                None => return Err(StoreError::not_found(format!("preset {name}"))),
            };
            if !preset.active {
                return Err(StoreError::not_found(format!("preset {name}")));
            }
            Ok(preset)
        })
        .await
    }
}

#[async_trait]
impl SettingsRepository for RedisStore {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.timed("get_setting", async {
            let mut conn = self.conn().await?;
            let value: Option<String> = conn.hget(self.config.settings_key(), key).await?;
            Ok(value)
        })
        .await
    }
}
