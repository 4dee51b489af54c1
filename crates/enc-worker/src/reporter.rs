//! Progress reporters.
//!
//! A reporter runs beside a stage's blocking call, samples the stage's
//! progress on a fixed tick and persists it. Persisted percentages only ever
//! go up within one reporter's lifetime. The encode reporter also polls the
//! job status and requests cancellation when the job has been cancelled.

use std::sync::Arc;
use std::time::Duration;

use enc_media::EncodeProgress;
use enc_models::{JobGuid, JobStatus};
use enc_storage::TransferProgress;
use enc_store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Running reporter. Must be stopped with [`ReporterHandle::stop`].
pub struct ReporterHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReporterHandle {
    /// Signal the reporter and wait until it has written its last tick.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress reporter task failed");
        }
    }
}

/// `pct` if it moves progress forward past `last`.
fn advance(last: Option<f64>, pct: Option<f64>) -> Option<f64> {
    match (last, pct) {
        (_, None) => None,
        (None, Some(pct)) => Some(pct),
        (Some(last), Some(pct)) => (pct > last).then_some(pct),
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Persist download/upload progress for `encode_id` every `period`.
pub fn spawn_transfer_reporter(
    store: Arc<dyn Store>,
    encode_id: i64,
    progress: Arc<TransferProgress>,
    period: Duration,
) -> ReporterHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = ticker(period);
        let mut last = None;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    let Some(pct) = advance(last, progress.percent()) else {
                        continue;
                    };
                    match store.update_transfer_progress_by_id(encode_id, pct).await {
                        Ok(()) => last = Some(pct),
                        Err(e) => warn!(encode_id, error = %e, "Failed to persist transfer progress"),
                    }
                }
            }
        }
        debug!(encode_id, "Transfer reporter stopped");
    });

    ReporterHandle { stop_tx, handle }
}

/// Inputs of the encode-stage reporter.
pub struct EncodeReporter {
    pub store: Arc<dyn Store>,
    pub guid: JobGuid,
    pub encode_id: i64,
    /// Frame count from the probe; percentages are skipped without it
    pub total_frames: Option<u64>,
    pub progress_rx: watch::Receiver<EncodeProgress>,
    /// Set to `true` to have the encoder killed
    pub cancel_tx: watch::Sender<bool>,
    pub period: Duration,
}

impl EncodeReporter {
    pub fn spawn(self) -> ReporterHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(stop_rx));
        ReporterHandle { stop_tx, handle }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = ticker(self.period);
        let mut last = None;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Some(pct) = self.report(last).await {
                        last = Some(pct);
                    }
                    if self.cancel_requested().await {
                        info!(job_guid = %self.guid, "Job cancelled, stopping encoder");
                        let _ = self.cancel_tx.send(true);
                        break;
                    }
                }
            }
        }
        debug!(job_guid = %self.guid, "Encode reporter stopped");
    }

    /// Write one tick. Returns the percentage written, if any.
    async fn report(&self, last: Option<f64>) -> Option<f64> {
        let (pct, speed, fps) = {
            let snapshot = self.progress_rx.borrow();
            (
                snapshot.percentage(self.total_frames),
                snapshot.speed().map(str::to_string),
                (snapshot.fps > 0.0).then_some(snapshot.fps),
            )
        };
        let pct = advance(last, pct);
        if pct.is_none() && speed.is_none() && fps.is_none() {
            return None;
        }

        match self
            .store
            .update_encode_progress_by_id(self.encode_id, pct, speed.as_deref(), fps)
            .await
        {
            Ok(()) => pct,
            Err(e) => {
                warn!(job_guid = %self.guid, error = %e, "Failed to persist encode progress");
                None
            }
        }
    }

    async fn cancel_requested(&self) -> bool {
        match self.store.get_job_status_by_guid(&self.guid).await {
            Ok(status) => status == JobStatus::Cancelled,
            Err(e) => {
                warn!(job_guid = %self.guid, error = %e, "Failed to poll job status");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enc_models::Job;
    use enc_store::{JobRepository, MemoryStore, ProgressWrite};

    #[test]
    fn test_advance_is_monotonic() {
        assert_eq!(advance(None, Some(10.0)), Some(10.0));
        assert_eq!(advance(Some(10.0), Some(12.5)), Some(12.5));
        assert_eq!(advance(Some(12.5), Some(12.5)), None);
        assert_eq!(advance(Some(12.5), Some(3.0)), None);
        assert_eq!(advance(Some(12.5), None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_reporter_writes_increasing_values() {
        let store = Arc::new(MemoryStore::new());
        let job = store.create_job(Job::new("p", "s", "d")).await.unwrap();
        let progress = TransferProgress::new();
        progress.set_total(1000);

        let reporter = spawn_transfer_reporter(
            store.clone(),
            job.encode_id,
            progress.clone(),
            Duration::from_secs(1),
        );

        progress.add(250);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // No new bytes: nothing written on this tick
        tokio::time::sleep(Duration::from_secs(1)).await;
        progress.add(500);
        tokio::time::sleep(Duration::from_secs(1)).await;
        reporter.stop().await;

        let writes = store.progress_history(job.encode_id).await;
        assert_eq!(
            writes,
            vec![ProgressWrite::Transfer(25.0), ProgressWrite::Transfer(75.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_reporter_without_frame_count_forwards_metrics() {
        let store = Arc::new(MemoryStore::new());
        let job = store.create_job(Job::new("p", "s", "d")).await.unwrap();
        let (progress_tx, progress_rx) = watch::channel(EncodeProgress::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let reporter = EncodeReporter {
            store: store.clone(),
            guid: job.guid.clone(),
            encode_id: job.encode_id,
            total_frames: None,
            progress_rx,
            cancel_tx,
            period: Duration::from_secs(2),
        }
        .spawn();

        progress_tx.send_modify(|p| {
            p.apply_line("frame=120");
            p.apply_line("fps=29.5");
            p.apply_line("speed=1.02x");
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        reporter.stop().await;

        let writes = store.progress_history(job.encode_id).await;
        assert_eq!(
            writes,
            vec![ProgressWrite::Encode {
                progress: None,
                speed: Some("1.02x".into()),
                fps: Some(29.5),
            }]
        );
        assert!(!*cancel_rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_encode_reporter_requests_cancel() {
        let store = Arc::new(MemoryStore::new());
        let job = store.create_job(Job::new("p", "s", "d")).await.unwrap();
        let (_progress_tx, progress_rx) = watch::channel(EncodeProgress::default());
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let reporter = EncodeReporter {
            store: store.clone(),
            guid: job.guid.clone(),
            encode_id: job.encode_id,
            total_frames: Some(100),
            progress_rx,
            cancel_tx,
            period: Duration::from_secs(1),
        }
        .spawn();

        store
            .update_job_status_by_guid(&job.guid, JobStatus::Cancelled)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), cancel_rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*cancel_rx.borrow());
        reporter.stop().await;
    }
}
