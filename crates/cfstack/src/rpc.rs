//! Line-delimited JSON protocol spoken with the host
//!
//! One request per line on stdin, one response per line on stdout. Every
//! operation runs in its own task so a slow create never blocks a read;
//! responses are written in completion order and matched by `id`.

use cfstack_resource::{Attrs, Provider, ProviderError, run};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    GetSchema,
    Configure {
        config: Value,
    },
    ValidateResourceConfig {
        type_name: String,
        config: Attrs,
    },
    Plan {
        type_name: String,
        #[serde(default)]
        resource_id: Option<String>,
        #[serde(default)]
        state: Attrs,
        config: Attrs,
    },
    Create {
        type_name: String,
        config: Attrs,
    },
    Read {
        type_name: String,
        resource_id: String,
        #[serde(default)]
        state: Attrs,
    },
    Update {
        type_name: String,
        resource_id: String,
        state: Attrs,
        config: Attrs,
    },
    Delete {
        type_name: String,
        resource_id: String,
        #[serde(default)]
        state: Attrs,
    },
    Import {
        type_name: String,
        import_id: String,
    },
    Exists {
        type_name: String,
        resource_id: String,
        #[serde(default)]
        state: Attrs,
    },
    ReadDataSource {
        type_name: String,
        config: Attrs,
    },
    /// Cancel the in-flight request `target`.
    Cancel {
        target: u64,
    },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorBody {
    fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            status: None,
            code: None,
        }
    }
}

impl From<&ProviderError> for ErrorBody {
    fn from(e: &ProviderError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            status: e.status(),
            code: e.code().map(String::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub warnings: Vec<String>,
}

impl Response {
    fn success(id: u64, result: Value, warnings: Vec<String>) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            warnings,
        }
    }

    fn failure(id: u64, error: ErrorBody, warnings: Vec<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
            warnings,
        }
    }
}

type Inflight = Arc<Mutex<HashMap<u64, watch::Sender<bool>>>>;

async fn dispatch(provider: Arc<Provider>, operation: Operation) -> cfstack_resource::Result<Value> {
    let value = match operation {
        Operation::GetSchema => provider.schemas(),
        Operation::Configure { config } => {
            provider.configure(&config).await?;
            Value::Null
        }
        Operation::ValidateResourceConfig { type_name, config } => {
            provider.validate_resource_config(&type_name, &config)?;
            json!({ "valid": true })
        }
        Operation::Plan {
            type_name,
            resource_id,
            state,
            config,
        } => serde_json::to_value(
            provider
                .plan(&type_name, resource_id.as_deref(), &state, &config)
                .await?,
        )?,
        Operation::Create { type_name, config } => {
            serde_json::to_value(provider.create(&type_name, &config).await?)?
        }
        Operation::Read {
            type_name,
            resource_id,
            state,
        } => serde_json::to_value(provider.read(&type_name, &resource_id, &state).await?)?,
        Operation::Update {
            type_name,
            resource_id,
            state,
            config,
        } => serde_json::to_value(
            provider
                .update(&type_name, &resource_id, &state, &config)
                .await?,
        )?,
        Operation::Delete {
            type_name,
            resource_id,
            state,
        } => {
            provider.delete(&type_name, &resource_id, &state).await?;
            Value::Null
        }
        Operation::Import {
            type_name,
            import_id,
        } => serde_json::to_value(provider.import(&type_name, &import_id).await?)?,
        Operation::Exists {
            type_name,
            resource_id,
            state,
        } => json!(provider.exists(&type_name, &resource_id, &state).await?),
        Operation::ReadDataSource { type_name, config } => {
            serde_json::to_value(provider.read_data_source(&type_name, &config).await?)?
        }
        // Answered by the read loop itself.
        Operation::Cancel { .. } | Operation::Stop => Value::Null,
    };
    Ok(value)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one request to completion and hand its response to the writer.
fn spawn_operation(
    tasks: &mut JoinSet<()>,
    provider: Arc<Provider>,
    inflight: Inflight,
    responses: mpsc::UnboundedSender<Response>,
    request: Request,
) {
    let id = request.id;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    if let Ok(mut inflight) = inflight.lock() {
        inflight.insert(id, cancel_tx);
    }
    let timeout = request.timeout_secs.map(Duration::from_secs);
    let operation = request.operation;

    tasks.spawn(async move {
        // A separate task so a panic surfaces as a JoinError instead of
        // tearing down the read loop.
        let work = tokio::spawn(run(dispatch(provider, operation), timeout, cancel_rx));
        let response = match work.await {
            Ok((Ok(result), warnings)) => Response::success(id, result, warnings),
            Ok((Err(e), warnings)) => {
                warn!(id, kind = e.kind(), "operation failed: {}", e);
                Response::failure(id, ErrorBody::from(&e), warnings)
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic().as_ref());
                error!(id, "operation panicked: {}", message);
                Response::failure(
                    id,
                    ErrorBody::new("Fatal", format!("provider panicked: {}", message)),
                    Vec::new(),
                )
            }
            Err(e) => Response::failure(id, ErrorBody::new("Cancelled", e.to_string()), Vec::new()),
        };
        if let Ok(mut inflight) = inflight.lock() {
            inflight.remove(&id);
        }
        let _ = responses.send(response);
    });
}

/// Serve requests from `input` until `stop` or end of input.
///
/// `stop` cancels whatever is still running; end of input lets in-flight
/// operations finish first.
pub async fn serve<R, W>(provider: Arc<Provider>, input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (responses, mut outbox) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(response) = outbox.recv().await {
            let mut line = serde_json::to_vec(&response)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        anyhow::Ok(())
    });

    let inflight: Inflight = Arc::default();
    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(input).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_u64))
                    .unwrap_or(0);
                warn!(id, "malformed request: {}", e);
                let _ = responses.send(Response::failure(
                    id,
                    ErrorBody::new("InvalidRequest", e.to_string()),
                    Vec::new(),
                ));
                continue;
            }
        };
        debug!(id = request.id, operation = ?request.operation, "request");

        match request.operation {
            Operation::Stop => {
                info!("stop requested");
                if let Ok(inflight) = inflight.lock() {
                    for cancel in inflight.values() {
                        let _ = cancel.send(true);
                    }
                }
                let _ = responses.send(Response::success(request.id, Value::Null, Vec::new()));
                break;
            }
            Operation::Cancel { target } => {
                let cancelled = inflight
                    .lock()
                    .ok()
                    .and_then(|inflight| inflight.get(&target).map(|c| c.send(true).is_ok()))
                    .unwrap_or(false);
                debug!(target, cancelled, "cancel");
                let _ = responses.send(Response::success(
                    request.id,
                    json!({ "cancelled": cancelled }),
                    Vec::new(),
                ));
            }
            _ => spawn_operation(
                &mut tasks,
                provider.clone(),
                inflight.clone(),
                responses.clone(),
                request,
            ),
        }
    }

    while tasks.join_next().await.is_some() {}
    drop(responses);
    writer.await??;
    info!("provider shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn exchange(input: &str) -> Vec<Response> {
        let (output, mut reader) = tokio::io::duplex(1 << 20);
        serve(Arc::new(Provider::new()), input.as_bytes(), output)
            .await
            .unwrap();
        let mut raw = String::new();
        reader.read_to_string(&mut raw).await.unwrap();
        let mut responses: Vec<Response> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        responses.sort_by_key(|r| r.id);
        responses
    }

    #[test]
    fn test_parse_request() {
        let request: Request = serde_json::from_str(
            r#"{"id": 4, "op": "read", "type_name": "cloudfoundry_org", "resource_id": "g1", "timeout_secs": 30}"#,
        )
        .unwrap();
        assert_eq!(request.id, 4);
        assert_eq!(request.timeout_secs, Some(30));
        let Operation::Read { type_name, resource_id, state } = request.operation else {
            panic!("expected read");
        };
        assert_eq!(type_name, "cloudfoundry_org");
        assert_eq!(resource_id, "g1");
        assert!(state.is_empty());
    }

    #[test]
    fn test_parse_cancel() {
        let request: Request = serde_json::from_str(r#"{"id": 9, "op": "cancel", "target": 3}"#).unwrap();
        assert!(matches!(request.operation, Operation::Cancel { target: 3 }));
    }

    #[tokio::test]
    async fn test_schema_then_eof() {
        let responses = exchange("{\"id\": 1, \"op\": \"get_schema\"}\n").await;
        assert_eq!(responses.len(), 1);
        let schema = responses[0].result.as_ref().unwrap();
        assert!(schema["resources"]["cloudfoundry_org"].is_object());
        assert!(schema["data_sources"]["cloudfoundry_app_logs"].is_object());
        assert!(responses[0].warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_create_is_an_error() {
        let responses = exchange(
            "{\"id\": 2, \"op\": \"create\", \"type_name\": \"cloudfoundry_org\", \"config\": {\"name\": \"acme\"}}\n",
        )
        .await;
        let error = responses[0].error.as_ref().unwrap();
        assert_eq!(error.kind, "InvalidConfig");
        assert_eq!(error.message, "provider is not configured");
        assert!(responses[0].result.is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_serving() {
        let responses = exchange(
            "{\"id\": 5, \"op\": \"launch\"}\nnot json\n{\"id\": 6, \"op\": \"stop\"}\n{\"id\": 7, \"op\": \"get_schema\"}\n",
        )
        .await;
        let ids: Vec<u64> = responses.iter().map(|r| r.id).collect();
        // Nothing after stop is read.
        assert_eq!(ids, vec![0, 5, 6]);
        assert_eq!(responses[0].error.as_ref().unwrap().kind, "InvalidRequest");
        assert_eq!(responses[1].error.as_ref().unwrap().kind, "InvalidRequest");
        assert!(responses[2].error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let responses = exchange("{\"id\": 8, \"op\": \"cancel\", \"target\": 42}\n").await;
        assert_eq!(responses[0].result, Some(json!({ "cancelled": false })));
    }
}
