//! Webhook notifications for finished jobs.
//!
//! Messages use the Slack incoming-webhook attachment shape. Delivery is
//! best effort: the pipeline logs failures and never changes a job's outcome
//! because of them.

use std::time::Duration;

use enc_models::{Job, JobStatus};
use serde::Serialize;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A message about one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    /// Attachment color: `good`, `danger` or `warning`
    pub color: &'static str,
}

impl Notification {
    /// Summary of a job that ended in `status`.
    pub fn for_job(job: &Job, status: JobStatus, error: Option<&WorkerError>) -> Self {
        let (title, color) = match status {
            JobStatus::Completed => ("*Encode Successful!* :tada:", "good"),
            JobStatus::Cancelled => ("*Encode Cancelled* :warning:", "warning"),
            _ => ("*Encode Failed!* :x:", "danger"),
        };

        let mut text = format!(
            "{title}\n*Job ID*: {}\n*Preset*: {}\n*Source*: {}\n*Destination*: {}",
            job.guid, job.preset, job.source, job.destination
        );
        if let Some(error) = error.filter(|_| status == JobStatus::Error) {
            text.push_str(&format!("\n*Error*: {error}"));
        }

        Self { text, color }
    }
}

#[derive(Serialize)]
struct Attachment<'a> {
    text: &'a str,
    color: &'a str,
}

#[derive(Serialize)]
struct Payload<'a> {
    attachments: [Attachment<'a>; 1],
}

/// Posts notifications to a webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::config_error(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub async fn send(&self, url: &str, notification: &Notification) -> WorkerResult<()> {
        let payload = Payload {
            attachments: [Attachment {
                text: &notification.text,
                color: notification.color,
            }],
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::NotifyFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::NotifyFailed(format!(
                "webhook returned {status}"
            )));
        }

        debug!(color = notification.color, "Sent notification");
        Ok(())
    }
}
