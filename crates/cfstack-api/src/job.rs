//! Asynchronous job polling
//!
//! Every asynchronous platform operation (v2 and v3 jobs, service instance
//! `last_operation`, app staging and instance start) is driven through
//! [`poll_until`], which returns only once the operation reaches a terminal
//! state or the deadline passes.

use crate::client::{CfClient, Request};
use crate::error::{ApiError, Result};
use crate::http::RawResponse;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Poll backoff and overall deadline
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_secs(30),
            deadline: Duration::from_secs(30 * 60),
        }
    }
}

impl PollConfig {
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self {
            deadline,
            ..self.clone()
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_multiplier).min(self.max_delay)
    }
}

/// Outcome of a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    /// Still running; carries the observed state for logging.
    Pending(String),
    Done(T),
    Failed(String),
}

/// Call `check` until it reports a terminal state.
///
/// `subject` names the operation in errors and logs (a job guid, an app
/// name, ...).
pub async fn poll_until<T, F, Fut>(config: &PollConfig, subject: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let started = Instant::now();
    let mut delay = config.initial_delay;

    loop {
        match check().await? {
            PollStatus::Done(value) => return Ok(value),
            PollStatus::Failed(message) => {
                return Err(ApiError::JobFailed {
                    guid: subject.to_string(),
                    message,
                });
            }
            PollStatus::Pending(state) => {
                let elapsed = started.elapsed();
                if elapsed >= config.deadline {
                    return Err(ApiError::Timeout {
                        what: subject.to_string(),
                        elapsed,
                    });
                }
                debug!(subject, state = %state, ?delay, "not finished, polling again");
                tokio::time::sleep(delay.min(config.deadline - elapsed)).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Job state common to both API versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed(String),
}

impl JobState {
    /// Decode a v2 job entity (`entity.status`, `entity.error_details`).
    pub fn from_v2(body: &Value) -> Result<Self> {
        let entity = body.get("entity").unwrap_or(body);
        let status = entity.get("status").and_then(Value::as_str).unwrap_or_default();
        Ok(match status {
            "queued" => JobState::Queued,
            "running" => JobState::Running,
            "finished" => JobState::Finished,
            "failed" => JobState::Failed(
                entity
                    .pointer("/error_details/description")
                    .and_then(Value::as_str)
                    .unwrap_or("job failed")
                    .to_string(),
            ),
            other => {
                return Err(ApiError::InvalidResponse {
                    url: "/v2/jobs".into(),
                    message: format!("unknown job status {:?}", other),
                });
            }
        })
    }

    /// Decode a v3 job (`state`, `errors`).
    pub fn from_v3(body: &Value) -> Result<Self> {
        let state = body.get("state").and_then(Value::as_str).unwrap_or_default();
        Ok(match state {
            "PROCESSING" => JobState::Running,
            "POLLING" => JobState::Running,
            "COMPLETE" => JobState::Finished,
            "FAILED" => {
                let detail = body
                    .get("errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .filter_map(|e| e.get("detail").and_then(Value::as_str))
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "job failed".to_string());
                JobState::Failed(detail)
            }
            other => {
                return Err(ApiError::InvalidResponse {
                    url: "/v3/jobs".into(),
                    message: format!("unknown job state {:?}", other),
                });
            }
        })
    }

    fn into_status(self) -> PollStatus<()> {
        match self {
            JobState::Queued => PollStatus::Pending("queued".into()),
            JobState::Running => PollStatus::Pending("running".into()),
            JobState::Finished => PollStatus::Done(()),
            JobState::Failed(message) => PollStatus::Failed(message),
        }
    }
}

/// Handle on a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRef {
    V2 { guid: String, url: String },
    V3 { url: String },
}

#[derive(Deserialize)]
struct V2JobMetadata {
    guid: String,
    url: String,
}

impl JobRef {
    /// v2 asynchronous responses carry the job entity in the body.
    ///
    /// Returns `None` when the body is not a job, i.e. the platform
    /// completed the operation synchronously.
    pub fn from_v2_body(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        value.pointer("/entity/status")?;
        let meta: V2JobMetadata = serde_json::from_value(value.get("metadata")?.clone()).ok()?;
        if !meta.url.contains("/jobs/") {
            return None;
        }
        Some(JobRef::V2 {
            guid: meta.guid,
            url: meta.url,
        })
    }

    /// v3 asynchronous responses point at the job with `Location`.
    pub fn from_location(response: &RawResponse) -> Option<Self> {
        response
            .header("Location")
            .filter(|l| l.contains("/jobs/"))
            .map(|url| JobRef::V3 {
                url: url.to_string(),
            })
    }

    fn url(&self) -> &str {
        match self {
            JobRef::V2 { url, .. } | JobRef::V3 { url } => url,
        }
    }

    fn subject(&self) -> String {
        match self {
            JobRef::V2 { guid, .. } => guid.clone(),
            JobRef::V3 { url } => url.rsplit('/').next().unwrap_or(url).to_string(),
        }
    }
}

/// Wait until `job` finishes. A failed job is [`ApiError::JobFailed`].
pub async fn wait_for_job(client: &CfClient, job: &JobRef) -> Result<()> {
    let subject = job.subject();
    poll_until(client.poll_config(), &subject, || async {
        let body: Value = client.get_json(job.url()).await?;
        let state = match job {
            JobRef::V2 { .. } => JobState::from_v2(&body)?,
            JobRef::V3 { .. } => JobState::from_v3(&body)?,
        };
        Ok(state.into_status())
    })
    .await
}

/// Wait for the job carried by `response`, if any.
pub async fn wait_for_response(client: &CfClient, response: &RawResponse) -> Result<()> {
    let job = JobRef::from_location(response).or_else(|| JobRef::from_v2_body(&response.body));
    match job {
        Some(job) => wait_for_job(client, &job).await,
        None => Ok(()),
    }
}

/// Submit `request` and wait for any job it starts.
pub async fn send_and_wait(client: &CfClient, request: Request) -> Result<RawResponse> {
    let response = client.send(request).await?;
    wait_for_response(client, &response).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> PollConfig {
        PollConfig {
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_millis(50),
            deadline: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_done() {
        let calls = AtomicU32::new(0);
        let value = poll_until(&fast(), "job-1", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(if n < 3 {
                PollStatus::Pending("running".into())
            } else {
                PollStatus::Done(n)
            })
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_failed() {
        let err = poll_until::<(), _, _>(&fast(), "job-1", || async {
            Ok(PollStatus::Failed("binding exists".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::JobFailed { ref guid, ref message } if guid == "job-1" && message == "binding exists"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_deadline() {
        let err = poll_until::<(), _, _>(&fast(), "slow", || async {
            Ok(PollStatus::Pending("running".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Timeout { ref what, .. } if what == "slow"));
    }

    #[test]
    fn test_v2_job_states() {
        assert_eq!(
            JobState::from_v2(&json!({"entity": {"status": "running"}})).unwrap(),
            JobState::Running
        );
        assert_eq!(
            JobState::from_v2(&json!({"entity": {"status": "failed", "error_details": {"description": "boom"}}}))
                .unwrap(),
            JobState::Failed("boom".into())
        );
    }

    #[test]
    fn test_v3_job_states() {
        assert_eq!(JobState::from_v3(&json!({"state": "POLLING"})).unwrap(), JobState::Running);
        assert_eq!(JobState::from_v3(&json!({"state": "COMPLETE"})).unwrap(), JobState::Finished);
        assert_eq!(
            JobState::from_v3(&json!({"state": "FAILED", "errors": [{"detail": "a"}, {"detail": "b"}]}))
                .unwrap(),
            JobState::Failed("a; b".into())
        );
        assert!(JobState::from_v3(&json!({"state": "???"})).is_err());
    }

    #[test]
    fn test_job_ref_detection() {
        let body = br#"{"metadata":{"guid":"j1","url":"/v2/jobs/j1"},"entity":{"status":"queued"}}"#;
        assert_eq!(
            JobRef::from_v2_body(body),
            Some(JobRef::V2 {
                guid: "j1".into(),
                url: "/v2/jobs/j1".into()
            })
        );
        let org = br#"{"metadata":{"guid":"o1","url":"/v2/organizations/o1"},"entity":{"name":"acme"}}"#;
        assert_eq!(JobRef::from_v2_body(org), None);

        let resp = RawResponse::new(202, "").with_header("Location", "https://api/v3/jobs/abc");
        assert_eq!(JobRef::from_location(&resp).unwrap().subject(), "abc");
    }
}
