//! Worker pool.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use enc_models::JobStatus;
use enc_queue::{Delivery, JobQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::Pipeline;

/// Back-off after a failed queue read.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Where the pool gets its jobs from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn init(&self) -> WorkerResult<()>;

    /// Wait for up to `max` new deliveries. May return none.
    async fn next_batch(&self, max: usize) -> WorkerResult<Vec<Delivery>>;

    /// Take over up to `max` deliveries abandoned by other consumers.
    async fn reclaim(&self, max: usize) -> WorkerResult<Vec<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> WorkerResult<()>;

    /// Mark a delivery as still being worked on, so [`JobSource::reclaim`]
    /// on other workers does not take it over.
    async fn heartbeat(&self, delivery: &Delivery) -> WorkerResult<()>;
}

/// [`JobSource`] reading one job name's stream as a named consumer.
pub struct RedisJobSource {
    queue: JobQueue,
    job_name: String,
    consumer: String,
    min_idle: Duration,
}

impl RedisJobSource {
    pub fn new(queue: JobQueue, config: &WorkerConfig) -> Self {
        Self {
            queue,
            job_name: config.job_name.clone(),
            consumer: format!("worker-{}", Uuid::new_v4()),
            min_idle: config.claim_min_idle,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

#[async_trait]
impl JobSource for RedisJobSource {
    async fn init(&self) -> WorkerResult<()> {
        self.queue.init(&self.job_name).await?;
        info!(
            stream = %self.queue.config().stream_key(&self.job_name),
            consumer = %self.consumer,
            "Job source ready"
        );
        Ok(())
    }

    async fn next_batch(&self, max: usize) -> WorkerResult<Vec<Delivery>> {
        Ok(self.queue.consume(&self.job_name, &self.consumer, max).await?)
    }

    async fn reclaim(&self, max: usize) -> WorkerResult<Vec<Delivery>> {
        let min_idle_ms = u64::try_from(self.min_idle.as_millis()).unwrap_or(u64::MAX);
        Ok(self
            .queue
            .claim_pending(&self.job_name, &self.consumer, min_idle_ms, max)
            .await?)
    }

    async fn ack(&self, delivery: &Delivery) -> WorkerResult<()> {
        Ok(self.queue.ack(&self.job_name, &delivery.message_id).await?)
    }

    async fn heartbeat(&self, delivery: &Delivery) -> WorkerResult<()> {
        Ok(self
            .queue
            .touch(&self.job_name, &self.consumer, &delivery.message_id)
            .await?)
    }
}

/// Runs up to `concurrency` pipelines at once.
pub struct WorkerPool {
    config: WorkerConfig,
    source: Arc<dyn JobSource>,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, source: Arc<dyn JobSource>, pipeline: Pipeline) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.concurrency));

        Self {
            pipeline: Arc::new(pipeline.with_shutdown(shutdown_rx)),
            config,
            source,
            permits,
            shutdown,
        }
    }

    /// Consume jobs until [`WorkerPool::stop`] is called.
    pub async fn start(&self) -> WorkerResult<()> {
        info!(
            concurrency = self.config.concurrency,
            job_name = %self.config.job_name,
            "Starting worker pool"
        );
        self.source.init().await?;

        let claim_task = tokio::spawn(claim_loop(
            self.source.clone(),
            self.pipeline.clone(),
            self.permits.clone(),
            self.config.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = self.permits.clone().acquire_owned() => permit
                    .map_err(|_| WorkerError::config_error("worker pool semaphore closed"))?,
            };

            let max = 1 + self.permits.available_permits();
            let batch = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                batch = self.source.next_batch(max) => batch,
            };

            let deliveries = match batch {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!(error = %e, "Failed to read jobs from queue");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };
            if deliveries.is_empty() {
                continue;
            }
            debug!(count = deliveries.len(), "Consumed jobs");

            let mut permit = Some(permit);
            for delivery in deliveries {
                let permit = match permit.take() {
                    Some(permit) => permit,
                    None => self
                        .permits
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| WorkerError::config_error("worker pool semaphore closed"))?,
                };
                spawn_delivery(
                    self.source.clone(),
                    self.pipeline.clone(),
                    delivery,
                    self.permits.clone(),
                    permit,
                    &self.config,
                );
            }
        }

        if let Err(e) = claim_task.await {
            warn!(error = %e, "Claim task failed");
        }
        self.drain().await;
        info!("Worker pool stopped");
        Ok(())
    }

    /// Stop taking jobs and wait for running pipelines to reach a stage
    /// boundary, up to the configured shutdown timeout.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        let _ = self.shutdown.send(true);
        self.drain().await;
    }

    pub fn in_flight(&self) -> usize {
        self.config.concurrency - self.permits.available_permits()
    }

    async fn drain(&self) {
        let all = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.config.shutdown_timeout, self.permits.acquire_many(all)).await
        {
            Ok(_) => debug!("All pipelines finished"),
            Err(_) => warn!(
                in_flight = self.in_flight(),
                "Shutdown timeout elapsed with pipelines still running"
            ),
        }
    }
}

/// Periodically take over deliveries stuck with dead consumers.
async fn claim_loop(
    source: Arc<dyn JobSource>,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.claim_interval);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let free = permits.available_permits();
                if free == 0 {
                    continue;
                }
                let deliveries = match source.reclaim(free).await {
                    Ok(deliveries) => deliveries,
                    Err(e) => {
                        warn!(error = %e, "Failed to claim pending jobs");
                        continue;
                    }
                };
                if !deliveries.is_empty() {
                    info!(count = deliveries.len(), "Claimed pending jobs");
                }
                for delivery in deliveries {
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        return;
                    };
                    spawn_delivery(
                        source.clone(),
                        pipeline.clone(),
                        delivery,
                        permits.clone(),
                        permit,
                        &config,
                    );
                }
            }
        }
    }
}

fn spawn_delivery(
    source: Arc<dyn JobSource>,
    pipeline: Arc<Pipeline>,
    delivery: Delivery,
    permits: Arc<Semaphore>,
    permit: OwnedSemaphorePermit,
    config: &WorkerConfig,
) {
    let concurrency = config.concurrency;
    let heartbeat = config.heartbeat_interval;
    metrics::set_jobs_in_flight(concurrency - permits.available_permits());
    tokio::spawn(async move {
        handle_delivery(source.as_ref(), &pipeline, delivery, heartbeat).await;
        drop(permit);
        metrics::set_jobs_in_flight(concurrency - permits.available_permits());
    });
}

/// Run one delivery and decide whether to acknowledge it.
///
/// The delivery is heartbeated every `heartbeat` while its pipeline runs.
pub async fn handle_delivery(
    source: &dyn JobSource,
    pipeline: &Pipeline,
    delivery: Delivery,
    heartbeat: Duration,
) {
    let request = match delivery.request() {
        Ok(request) => request,
        Err(e) => {
            error!(message_id = %delivery.message_id, error = %e, "Dropping malformed job");
            ack(source, &delivery).await;
            return;
        }
    };
    let guid = request.guid;

    match pipeline.store().get_job_status_by_guid(&guid).await {
        Ok(JobStatus::Cancelled) => {
            info!(job_guid = %guid, "Job cancelled before start, dropping");
            ack(source, &delivery).await;
            return;
        }
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            warn!(job_guid = %guid, "Dropping job with no record");
            ack(source, &delivery).await;
            return;
        }
        Err(e) => {
            error!(job_guid = %guid, error = %e, "Failed to read job status, leaving for redelivery");
            return;
        }
    }

    if delivery.reclaimed {
        info!(job_guid = %guid, "Restarting reclaimed job from the top");
    }

    let outcome = tokio::select! {
        outcome = pipeline.run(&guid) => outcome,
        never = keep_alive(source, &delivery, heartbeat) => match never {},
    };

    match outcome {
        Ok(status) => info!(job_guid = %guid, status = %status, "Job finished"),
        Err(WorkerError::Interrupted) => {
            info!(job_guid = %guid, "Job interrupted by shutdown, leaving unacknowledged");
            return;
        }
        Err(WorkerError::Store(e)) if !e.is_not_found() => {
            error!(
                job_guid = %guid,
                error = %e,
                "Job store unavailable, leaving for redelivery"
            );
            return;
        }
        Err(e) => error!(job_guid = %guid, error = %e, "Job failed"),
    }
    ack(source, &delivery).await;
}

/// Heartbeat `delivery` every `every` until dropped.
async fn keep_alive(source: &dyn JobSource, delivery: &Delivery, every: Duration) -> Infallible {
    let every = every.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        ticker.tick().await;
        if let Err(e) = source.heartbeat(delivery).await {
            warn!(message_id = %delivery.message_id, error = %e, "Job heartbeat failed");
        }
    }
}

async fn ack(source: &dyn JobSource, delivery: &Delivery) {
    if let Err(e) = source.ack(delivery).await {
        error!(message_id = %delivery.message_id, error = %e, "Failed to ack job");
    }
}
