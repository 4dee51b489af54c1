//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use enc_queue::QueueConfig;

/// Reporter tick bounds, in seconds.
const MIN_PROGRESS_INTERVAL: u64 = 1;
const MAX_PROGRESS_INTERVAL: u64 = 5;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pipelines running at once
    pub concurrency: usize,
    /// Queue namespace shared with the producer
    pub namespace: String,
    /// Job name the pool consumes
    pub job_name: String,
    /// Root of the per-job working directories
    pub work_dir: PathBuf,
    /// Reporter tick interval
    pub progress_interval: Duration,
    /// Deadline for any single stage
    pub stage_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How often a running job resets its own idle time; kept below
    /// `claim_min_idle`
    pub heartbeat_interval: Duration,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Prometheus listener, e.g. `0.0.0.0:9000`
    pub metrics_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            namespace: "enc".to_string(),
            job_name: "encode".to_string(),
            work_dir: PathBuf::from("/tmp/enc"),
            progress_interval: Duration::from_secs(2),
            stage_timeout: Duration::from_secs(6 * 3600),
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(900),
            heartbeat_interval: Duration::from_secs(60),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            metrics_addr: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let claim_min_idle = env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.claim_min_idle);
        Self {
            concurrency: env_parse::<usize>("WORKER_CONCURRENCY")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.concurrency),
            namespace: env_string("WORKER_NAMESPACE").unwrap_or(defaults.namespace),
            job_name: env_string("WORKER_JOB_NAME").unwrap_or(defaults.job_name),
            work_dir: env_string("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            progress_interval: env_parse("WORKER_PROGRESS_INTERVAL_SECS")
                .map(progress_interval)
                .unwrap_or(defaults.progress_interval),
            stage_timeout: env_parse("WORKER_STAGE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle,
            heartbeat_interval: heartbeat_interval(
                env_parse("WORKER_HEARTBEAT_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.heartbeat_interval),
                claim_min_idle,
            ),
            ffmpeg_path: env_string("WORKER_FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: env_string("WORKER_FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            metrics_addr: env_string("METRICS_ADDR"),
        }
    }

    /// Queue settings from the environment, scoped to this worker's namespace.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::from_env().with_namespace(self.namespace.clone())
    }
}

/// Reporter interval for `secs`, clamped to 1..=5 seconds.
pub fn progress_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_PROGRESS_INTERVAL, MAX_PROGRESS_INTERVAL))
}

/// Heartbeat period, clamped to between one second and a third of
/// `claim_min_idle`.
pub fn heartbeat_interval(requested: Duration, claim_min_idle: Duration) -> Duration {
    requested
        .min(claim_min_idle / 3)
        .max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_interval_clamped() {
        assert_eq!(progress_interval(0), Duration::from_secs(1));
        assert_eq!(progress_interval(3), Duration::from_secs(3));
        assert_eq!(progress_interval(60), Duration::from_secs(5));
    }

    #[test]
    fn test_heartbeat_interval_below_claim_idle() {
        let idle = Duration::from_secs(900);
        assert_eq!(heartbeat_interval(Duration::from_secs(60), idle), Duration::from_secs(60));
        assert_eq!(heartbeat_interval(Duration::from_secs(3600), idle), Duration::from_secs(300));
        assert_eq!(heartbeat_interval(Duration::ZERO, idle), Duration::from_secs(1));

        let config = WorkerConfig::default();
        assert!(config.heartbeat_interval < config.claim_min_idle);
    }

    #[test]
    fn test_queue_config_uses_namespace() {
        let config = WorkerConfig {
            namespace: "staging".to_string(),
            ..Default::default()
        };
        let queue = config.queue_config();
        assert_eq!(queue.stream_key(&config.job_name), "staging:jobs:encode");
        assert_eq!(queue.consumer_group, "staging:workers");
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.job_name, "encode");
        assert_eq!(config.progress_interval, Duration::from_secs(2));
        assert_eq!(config.stage_timeout, Duration::from_secs(21600));
    }
}
