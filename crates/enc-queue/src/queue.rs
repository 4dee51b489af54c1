//! Job queue using Redis Streams.

use std::collections::HashMap;

use enc_models::{EncodeRequest, RequestError};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix shared by every stream of this deployment
    pub namespace: String,
    /// Consumer group name
    pub consumer_group: String,
    /// How long a read blocks waiting for new entries
    pub block_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            namespace: "enc".to_string(),
            consumer_group: "enc:workers".to_string(),
            block_ms: 5000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let namespace = std::env::var("WORKER_NAMESPACE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "enc".to_string());

        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| format!("{namespace}:workers")),
            block_ms: std::env::var("QUEUE_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            namespace,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.consumer_group = format!("{}:workers", self.namespace);
        self
    }

    /// Stream key holding jobs for `job_name`.
    pub fn stream_key(&self, job_name: &str) -> String {
        format!("{}:jobs:{}", self.namespace, job_name)
    }
}

/// One job handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream entry ID, needed to acknowledge
    pub message_id: String,
    pub args: HashMap<String, String>,
    /// Claimed from another consumer rather than read fresh
    pub reclaimed: bool,
}

impl Delivery {
    /// Validate the argument map into a request.
    pub fn request(&self) -> Result<EncodeRequest, RequestError> {
        EncodeRequest::from_args(&self.args)
    }

    fn from_entry(entry: &StreamId, reclaimed: bool) -> Self {
        let args = entry
            .map
            .iter()
            .filter_map(|(key, value)| {
                redis::from_redis_value::<String>(value)
                    .ok()
                    .map(|v| (key.clone(), v))
            })
            .collect();

        Self {
            message_id: entry.id.clone(),
            args,
            reclaimed,
        }
    }
}

/// Field/value pairs for `XADD`, in key order so entries are reproducible.
fn stream_fields(args: &HashMap<String, String>) -> Vec<(&str, &str)> {
    let mut fields: Vec<_> = args.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    fields.sort_unstable();
    fields
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create the consumer group for `job_name` if it does not exist.
    pub async fn init(&self, job_name: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.config.stream_key(job_name);

        // Start at 0 so entries added before the first worker are not skipped
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(stream = %stream, "Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append a job to the `job_name` stream. Returns the entry ID.
    pub async fn enqueue(
        &self,
        job_name: &str,
        args: &HashMap<String, String>,
    ) -> QueueResult<String> {
        if args.is_empty() {
            return Err(QueueError::enqueue_failed("empty job arguments"));
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.config.stream_key(job_name);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream).arg("*");
        for (key, value) in stream_fields(args) {
            cmd.arg(key).arg(value);
        }
        let message_id: String = cmd.query_async(&mut conn).await?;

        info!(stream = %stream, message_id = %message_id, "Enqueued job");
        Ok(message_id)
    }

    /// Acknowledge a job and drop it from the stream.
    pub async fn ack(&self, job_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.config.stream_key(job_name);

        redis::cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Reset the idle time of a delivery this consumer still owns, so
    /// other consumers' [`JobQueue::claim_pending`] leaves it alone.
    pub async fn touch(
        &self,
        job_name: &str,
        consumer_name: &str,
        message_id: &str,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.config.stream_key(job_name);

        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        if claimed.is_empty() {
            warn!(stream = %stream, message_id = %message_id, "Job no longer pending, heartbeat skipped");
        } else {
            debug!("Heartbeat for job: {}", message_id);
        }
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self, job_name: &str) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(self.config.stream_key(job_name)).await?;
        Ok(len)
    }

    /// Read up to `count` new jobs, blocking for the configured time.
    pub async fn consume(
        &self,
        job_name: &str,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.config.stream_key(job_name);

        let result: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::dequeue_failed(e.to_string()))?;

        let deliveries: Vec<Delivery> = result
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(|entry| Delivery::from_entry(&entry, false))
            .collect();

        if !deliveries.is_empty() {
            debug!(stream = %stream, count = deliveries.len(), "Consumed jobs");
        }
        Ok(deliveries)
    }

    /// Claim jobs that another consumer has held for at least `min_idle_ms`.
    ///
    /// This is how jobs from crashed workers get picked up again.
    pub async fn claim_pending(
        &self,
        job_name: &str,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.config.stream_key(job_name);

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let ids: Vec<&str> = pending
            .ids
            .iter()
            .filter(|p| p.consumer != consumer_name)
            .map(|p| p.id.as_str())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let result: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = result
            .ids
            .iter()
            .map(|entry| Delivery::from_entry(entry, true))
            .collect();

        for delivery in &deliveries {
            warn!(
                stream = %stream,
                message_id = %delivery.message_id,
                "Claimed pending job from another consumer"
            );
        }
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enc_models::request::{ARG_DESTINATION, ARG_GUID, ARG_PRESET, ARG_SOURCE};

    fn args() -> HashMap<String, String> {
        [
            (ARG_GUID, "5f0e4c9a-3b7e-4d4f-9a1e-2f1c8d6b7a90"),
            (ARG_PRESET, "web-720p"),
            (ARG_SOURCE, "s3://bucket/in.mov"),
            (ARG_DESTINATION, "s3://out/encoded/"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_stream_key() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_key("encode"), "enc:jobs:encode");

        let config = QueueConfig::default().with_namespace("staging");
        assert_eq!(config.stream_key("encode"), "staging:jobs:encode");
        assert_eq!(config.consumer_group, "staging:workers");

        // Opening a client does not connect
        tokio_test::assert_ok!(JobQueue::new(config));
    }

    #[test]
    fn test_stream_fields_sorted() {
        let args = args();
        let keys: Vec<&str> = stream_fields(&args).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["destination", "guid", "preset", "source"]);
    }

    #[test]
    fn test_delivery_from_entry() {
        let mut map = HashMap::new();
        for (k, v) in args() {
            map.insert(k, redis::Value::BulkString(v.into_bytes()));
        }
        map.insert("junk".to_string(), redis::Value::Nil);
        let entry = StreamId {
            id: "1700000000000-0".to_string(),
            map,
        };

        let delivery = Delivery::from_entry(&entry, false);
        assert_eq!(delivery.message_id, "1700000000000-0");
        assert!(!delivery.args.contains_key("junk"));

        let request = delivery.request().unwrap();
        assert_eq!(request.preset, "web-720p");
        assert_eq!(request.source, "s3://bucket/in.mov");
    }

    #[test]
    fn test_delivery_missing_field() {
        let mut args = args();
        args.remove(ARG_PRESET);
        let delivery = Delivery {
            message_id: "1-0".to_string(),
            args,
            reclaimed: false,
        };
        assert!(matches!(
            delivery.request(),
            Err(RequestError::MissingField("preset"))
        ));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_enqueue_consume_ack() {
        let config = QueueConfig::from_env().with_namespace(format!("enc-test-{}", std::process::id()));
        let queue = JobQueue::new(config).unwrap();
        queue.init("encode").await.unwrap();

        let id = queue.enqueue("encode", &args()).await.unwrap();
        let deliveries = queue.consume("encode", "test-consumer", 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message_id, id);
        assert_eq!(deliveries[0].args, args());

        queue.ack("encode", &id).await.unwrap();
        assert_eq!(queue.len("encode").await.unwrap(), 0);
    }
}
