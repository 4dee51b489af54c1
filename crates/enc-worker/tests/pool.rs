//! Worker pool dispatch, dequeue-time checks and shutdown.

mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use enc_models::JobStatus::*;
use enc_queue::Delivery;
use enc_store::JobRepository;
use enc_worker::{handle_delivery, JobSource, WorkerConfig, WorkerPool, WorkerResult};

use common::*;

#[derive(Default)]
struct FakeSource {
    pending: Mutex<VecDeque<Delivery>>,
    acked: Mutex<Vec<String>>,
    heartbeats: Mutex<Vec<String>>,
}

impl FakeSource {
    fn push(&self, id: &str, args: HashMap<String, String>) {
        self.pending.lock().unwrap().push_back(Delivery {
            message_id: id.to_string(),
            args,
            reclaimed: false,
        });
    }

    fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    fn heartbeats(&self) -> Vec<String> {
        self.heartbeats.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSource for FakeSource {
    async fn init(&self) -> WorkerResult<()> {
        Ok(())
    }

    async fn next_batch(&self, max: usize) -> WorkerResult<Vec<Delivery>> {
        let batch: Vec<Delivery> = {
            let mut pending = self.pending.lock().unwrap();
            let n = max.min(pending.len());
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(batch)
    }

    async fn reclaim(&self, _max: usize) -> WorkerResult<Vec<Delivery>> {
        Ok(Vec::new())
    }

    async fn ack(&self, delivery: &Delivery) -> WorkerResult<()> {
        self.acked.lock().unwrap().push(delivery.message_id.clone());
        Ok(())
    }

    async fn heartbeat(&self, delivery: &Delivery) -> WorkerResult<()> {
        self.heartbeats.lock().unwrap().push(delivery.message_id.clone());
        Ok(())
    }
}

const HEARTBEAT: Duration = Duration::from_secs(60);

fn worker_config(work_dir: &std::path::Path) -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        work_dir: work_dir.to_path_buf(),
        progress_interval: Duration::from_secs(1),
        shutdown_timeout: Duration::from_secs(10),
        claim_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

async fn wait_for_acks(source: &FakeSource, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while source.acked().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("deliveries were not acknowledged");
}

#[tokio::test]
async fn test_pool_runs_jobs_and_drops_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let queued = queued_job(&store).await;
    let cancelled = queued_job(&store).await;
    store
        .update_job_status_by_guid(&cancelled.guid, Cancelled)
        .await
        .unwrap();

    let source = Arc::new(FakeSource::default());
    source.push("1-0", job_args(&cancelled));
    source.push("2-0", job_args(&queued));

    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Arc::new(FakeTranscoder::new(EncodeBehavior::Succeed)),
        Arc::new(FakeDriver::default()),
    );
    let pool = Arc::new(WorkerPool::new(worker_config(dir.path()), source.clone(), pipeline));
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.start().await }
    });

    wait_for_acks(&source, 2).await;
    pool.stop().await;
    runner.await.unwrap().unwrap();

    assert_eq!(
        store.status_history(&cancelled.guid).await,
        vec![Queued, Cancelled]
    );
    assert_eq!(store.status_history(&queued.guid).await.last(), Some(&Completed));
    let mut acked = source.acked();
    acked.sort();
    assert_eq!(acked, vec!["1-0", "2-0"]);
}

#[tokio::test]
async fn test_stop_leaves_running_job_unacknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let job = queued_job(&store).await;

    let source = Arc::new(FakeSource::default());
    source.push("1-0", job_args(&job));

    let mut transcoder = FakeTranscoder::new(EncodeBehavior::Succeed);
    transcoder.probe_delay = Duration::from_millis(300);
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Arc::new(transcoder),
        Arc::new(FakeDriver::default()),
    );
    let pool = Arc::new(WorkerPool::new(worker_config(dir.path()), source.clone(), pipeline));
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.start().await }
    });

    wait_for_status(&store, &job.guid, Probing).await;
    pool.stop().await;
    runner.await.unwrap().unwrap();

    // The probe stage finished, nothing after it started
    assert_eq!(
        store.status_history(&job.guid).await,
        vec![Queued, Downloading, Probing]
    );
    assert!(source.acked().is_empty());
    assert_eq!(pool.in_flight(), 0);
    assert!(!dir.path().join(job.guid.as_str()).exists());
}

#[tokio::test]
async fn test_malformed_delivery_is_acknowledged_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let source = FakeSource::default();
    let pipeline = pipeline(
        dir.path(),
        store,
        Arc::new(FakeTranscoder::new(EncodeBehavior::Succeed)),
        Arc::new(FakeDriver::default()),
    );

    let args = HashMap::from([("preset".to_string(), PRESET.to_string())]);
    let delivery = Delivery {
        message_id: "9-0".to_string(),
        args,
        reclaimed: false,
    };
    handle_delivery(&source, &pipeline, delivery, HEARTBEAT).await;

    assert_eq!(source.acked(), vec!["9-0"]);
}

#[tokio::test]
async fn test_delivery_for_unknown_job_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let source = FakeSource::default();
    let transcoder = Arc::new(FakeTranscoder::new(EncodeBehavior::Succeed));
    let pipeline = pipeline(dir.path(), store, transcoder.clone(), Arc::new(FakeDriver::default()));

    let ghost = enc_models::Job::new(PRESET, "/uploads/in.mov", "/encoded/");
    let delivery = Delivery {
        message_id: "3-0".to_string(),
        args: job_args(&ghost),
        reclaimed: true,
    };
    handle_delivery(&source, &pipeline, delivery, HEARTBEAT).await;

    assert_eq!(source.acked(), vec!["3-0"]);
    assert!(transcoder.inputs().is_empty());
}

#[tokio::test]
async fn test_pool_runs_at_most_concurrency_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let source = Arc::new(FakeSource::default());
    let mut jobs = Vec::new();
    for id in ["1-0", "2-0", "3-0"] {
        let job = queued_job(&store).await;
        source.push(id, job_args(&job));
        jobs.push(job);
    }

    let mut transcoder = FakeTranscoder::new(EncodeBehavior::Succeed);
    transcoder.probe_delay = Duration::from_millis(200);
    let transcoder = Arc::new(transcoder);
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        transcoder.clone(),
        Arc::new(FakeDriver::default()),
    );
    let pool = Arc::new(WorkerPool::new(worker_config(dir.path()), source.clone(), pipeline));
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.start().await }
    });

    wait_for_acks(&source, 3).await;
    pool.stop().await;
    runner.await.unwrap().unwrap();

    assert_eq!(transcoder.peak(), 2);
    for job in &jobs {
        assert_eq!(store.status_history(&job.guid).await.last(), Some(&Completed));
    }
}

#[tokio::test]
async fn test_running_job_heartbeats_until_finished() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store().await;
    let job = queued_job(&store).await;

    let source = Arc::new(FakeSource::default());
    source.push("1-0", job_args(&job));

    let mut transcoder = FakeTranscoder::new(EncodeBehavior::Succeed);
    transcoder.probe_delay = Duration::from_millis(300);
    let pipeline = pipeline(
        dir.path(),
        store.clone(),
        Arc::new(transcoder),
        Arc::new(FakeDriver::default()),
    );
    let config = WorkerConfig {
        heartbeat_interval: Duration::from_millis(50),
        ..worker_config(dir.path())
    };
    let pool = Arc::new(WorkerPool::new(config, source.clone(), pipeline));
    let runner = tokio::spawn({
        let pool = pool.clone();
        async move { pool.start().await }
    });

    wait_for_acks(&source, 1).await;
    let beats = source.heartbeats();
    assert!(beats.len() >= 2, "expected heartbeats during the slow stage, got {beats:?}");
    assert!(beats.iter().all(|id| id == "1-0"));

    // Nothing beats for a delivery that has been acknowledged
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(source.heartbeats().len(), beats.len());

    pool.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_terminal_write_leaves_delivery_pending() {
    let dir = tempfile::tempdir().unwrap();
    let memory = seeded_store().await;
    let job = queued_job(&memory).await;
    let store = Arc::new(FlakyStore {
        inner: memory.clone(),
        reject: Completed,
    });

    let source = FakeSource::default();
    let pipeline = pipeline(
        dir.path(),
        store,
        Arc::new(FakeTranscoder::new(EncodeBehavior::Succeed)),
        Arc::new(FakeDriver::default()),
    );
    let delivery = Delivery {
        message_id: "1-0".to_string(),
        args: job_args(&job),
        reclaimed: false,
    };
    handle_delivery(&source, &pipeline, delivery, HEARTBEAT).await;

    assert!(source.acked().is_empty());
    assert_eq!(memory.status_history(&job.guid).await.last(), Some(&Uploading));
}
