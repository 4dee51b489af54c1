//! Encoding worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use enc_media::FfmpegTranscoder;
use enc_queue::JobQueue;
use enc_store::RedisStore;
use enc_worker::{
    metrics, Pipeline, PipelineConfig, RedisJobSource, WebhookNotifier, WorkerConfig, WorkerPool,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("enc=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting enc-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = &config.metrics_addr {
        match metrics::init_metrics(addr) {
            Ok(()) => info!(addr = %addr, "Serving Prometheus metrics"),
            Err(e) => warn!(error = %e, "Metrics exporter disabled"),
        }
    }

    let store = match RedisStore::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create job store: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match JobQueue::new(config.queue_config()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = match WebhookNotifier::new() {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to create notifier: {}", e);
            std::process::exit(1);
        }
    };

    let transcoder = FfmpegTranscoder::new(&config.ffmpeg_path, &config.ffprobe_path)
        .with_timeout(config.stage_timeout);
    let pipeline = Pipeline::new(
        PipelineConfig::from(&config),
        Arc::new(store),
        Arc::new(transcoder),
        notifier,
    );
    let source = Arc::new(RedisJobSource::new(queue, &config));
    let pool = Arc::new(WorkerPool::new(config, source, pipeline));

    // Setup signal handler
    let signal_pool = Arc::clone(&pool);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_pool.stop().await;
        }
    });

    if let Err(e) = pool.start().await {
        error!("Worker pool error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
