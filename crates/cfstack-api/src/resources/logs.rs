//! Recent application logs from the log cache

use crate::catalog::Endpoint;
use crate::client::{CfClient, Request};
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cfstack_config::AppLogsMax;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Largest page the log cache serves.
const MAX_ENVELOPES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub source_type: String,
    pub instance: String,
    /// `OUT` or `ERR`
    pub stream: String,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}] {} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.source_type,
            self.instance,
            self.stream,
            self.message
        )
    }
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    envelopes: Batch,
}

#[derive(Debug, Deserialize)]
struct Batch {
    #[serde(default)]
    batch: Vec<Envelope>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    timestamp: String,
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    log: Option<LogPayload>,
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    #[serde(default)]
    payload: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl Envelope {
    fn into_line(self) -> Option<LogLine> {
        let log = self.log?;
        let nanos: i64 = self.timestamp.parse().ok()?;
        let message = BASE64
            .decode(log.payload.as_bytes())
            .map(|b| String::from_utf8_lossy(&b).trim_end().to_string())
            .unwrap_or(log.payload);
        Some(LogLine {
            timestamp: DateTime::from_timestamp_nanos(nanos),
            source_type: self.tags.get("source_type").cloned().unwrap_or_default(),
            instance: self.instance_id,
            stream: if log.kind.is_empty() {
                "OUT".to_string()
            } else {
                log.kind
            },
            message,
        })
    }
}

/// Most recent log lines of `app`, oldest first, capped by `limit`.
pub async fn recent(client: &CfClient, app: &str, limit: AppLogsMax) -> Result<Vec<LogLine>> {
    let count = match limit {
        AppLogsMax::Disabled => return Ok(Vec::new()),
        AppLogsMax::Last(n) => n.min(MAX_ENVELOPES),
        AppLogsMax::All => MAX_ENVELOPES,
    };
    let request = Request::get(format!("/api/v1/read/{}", app))
        .on(Endpoint::LogCache)
        .query("envelope_types", "LOG")
        .query("descending", "true")
        .query("limit", count);
    let body: ReadResponse = client.request_json(request).await?;

    let mut lines: Vec<LogLine> = body
        .envelopes
        .batch
        .into_iter()
        .filter_map(Envelope::into_line)
        .collect();
    lines.sort_by_key(|l| l.timestamp);
    Ok(limit.apply(lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, client_for};
    use serde_json::json;

    fn envelope(ts: &str, text: &str) -> serde_json::Value {
        json!({
            "timestamp": ts,
            "source_id": "a1",
            "instance_id": "0",
            "tags": {"source_type": "APP/PROC/WEB"},
            "log": {"payload": BASE64.encode(text), "type": "OUT"},
        })
    }

    #[tokio::test]
    async fn test_recent_logs_oldest_first() {
        let fake = FakePlatform::with_defaults();
        fake.respond(
            "GET",
            "/api/v1/read/a1",
            200,
            json!({"envelopes": {"batch": [
                envelope("1581447006352020890", "second\n"),
                envelope("1581447005352020890", "first"),
            ]}}),
        );
        let client = client_for(&fake).await;

        let lines = recent(&client, "a1", AppLogsMax::Last(30)).await.unwrap();
        let messages: Vec<&str> = lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert!(lines[0].to_string().contains("[APP/PROC/WEB/0] OUT first"));

        let req = fake.last_request().unwrap();
        assert!(req.url.starts_with("https://log-cache.example.com/api/v1/read/a1?"));
        assert!(req.url.contains("limit=30"));
    }

    #[tokio::test]
    async fn test_disabled_makes_no_request() {
        let fake = FakePlatform::with_defaults();
        let client = client_for(&fake).await;
        assert!(recent(&client, "a1", AppLogsMax::Disabled).await.unwrap().is_empty());
        assert!(fake.requests().is_empty());
    }
}
