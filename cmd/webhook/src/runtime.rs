//! Client side of the AWS Lambda Runtime API.
//!
//! The function long-polls for the next invocation, runs the admission handler on
//! it and posts back either the gateway response or an error. Invocations are
//! processed one at a time; the platform scales by running more instances.

use podenv_admission::telemetry;
use podenv_admission::{AdmissionWebhookHandler, ApiGatewayProxyRequest, Error};

use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{Instrument, Span, debug, field, info_span, warn};
use url::Url;

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const TRACE_ID_HEADER: &str = "lambda-runtime-trace-id";
const DEADLINE_HEADER: &str = "lambda-runtime-deadline-ms";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";
const INVALID_EVENT_ERROR_TYPE: &str = "InvalidEvent";

#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    pub trace_id: Option<String>,
    pub deadline_ms: Option<u64>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationError<'a> {
    pub error_message: &'a str,
    pub error_type: &'a str,
}

impl<'a> From<&'a Error> for InvocationError<'a> {
    fn from(error: &'a Error) -> Self {
        Self {
            error_message: error.public_message(),
            error_type: error.error_type(),
        }
    }
}

pub struct RuntimeClient {
    http: reqwest::Client,
    base: Url,
}

impl RuntimeClient {
    /// `runtime_api` is the `host:port` found in `AWS_LAMBDA_RUNTIME_API`.
    pub fn new(runtime_api: &str) -> anyhow::Result<Self> {
        let base = Url::parse(&format!(
            "http://{runtime_api}/{RUNTIME_API_VERSION}/runtime/"
        ))
        .with_context(|| format!("invalid runtime API address {runtime_api}"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    pub async fn next_invocation(&self) -> anyhow::Result<Invocation> {
        let response = self
            .http
            .get(self.base.join("invocation/next")?)
            .send()
            .await?
            .error_for_status()?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let request_id = header(REQUEST_ID_HEADER)
            .ok_or_else(|| anyhow::anyhow!("invocation without {REQUEST_ID_HEADER} header"))?;
        let trace_id = header(TRACE_ID_HEADER);
        let deadline_ms = header(DEADLINE_HEADER).and_then(|v| v.parse().ok());

        let payload = response.bytes().await?.to_vec();
        Ok(Invocation {
            request_id,
            trace_id,
            deadline_ms,
            payload,
        })
    }

    pub async fn send_response(&self, request_id: &str, body: Vec<u8>) -> anyhow::Result<()> {
        self.http
            .post(self.base.join(&format!("invocation/{request_id}/response"))?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_error(
        &self,
        request_id: &str,
        error: &InvocationError<'_>,
    ) -> anyhow::Result<()> {
        self.http
            .post(self.base.join(&format!("invocation/{request_id}/error"))?)
            .header(CONTENT_TYPE, "application/json")
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .body(serde_json::to_vec(error)?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

async fn process(
    client: &RuntimeClient,
    handler: &AdmissionWebhookHandler,
    invocation: Invocation,
) -> anyhow::Result<()> {
    Span::current().record("trace_id", field::display(telemetry::get_trace_id()));
    debug!(
        xray_trace_id = invocation.trace_id.as_deref(),
        deadline_ms = invocation.deadline_ms,
        "received invocation"
    );

    let event: ApiGatewayProxyRequest = match serde_json::from_slice(&invocation.payload) {
        Ok(event) => event,
        Err(e) => {
            warn!("invalid invocation event: {}", e);
            let message = e.to_string();
            let error = InvocationError {
                error_message: &message,
                error_type: INVALID_EVENT_ERROR_TYPE,
            };
            return client.send_error(&invocation.request_id, &error).await;
        }
    };

    match handler.handle(&event) {
        Ok(response) => {
            client
                .send_response(&invocation.request_id, serde_json::to_vec(&response)?)
                .await
        }
        Err(e) => {
            client
                .send_error(&invocation.request_id, &InvocationError::from(&e))
                .await
        }
    }
}

pub async fn process_next(
    client: &RuntimeClient,
    handler: &AdmissionWebhookHandler,
) -> anyhow::Result<()> {
    let invocation = client.next_invocation().await?;
    let span = info_span!(
        "invocation",
        request_id = %invocation.request_id,
        trace_id = field::Empty
    );
    process(client, handler, invocation).instrument(span).await
}

/// Serve invocations until talking to the runtime API fails.
pub async fn run(runtime_api: &str, handler: AdmissionWebhookHandler) -> anyhow::Result<()> {
    let client = RuntimeClient::new(runtime_api)?;
    tracing::info!("Polling Lambda runtime API at {}", client.base);
    loop {
        process_next(&client, &handler).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use parking_lot::Mutex;
    use podenv_admission::ApiGatewayProxyResponse;
    use podenv_admission::error::INPUT_REJECTED_MESSAGE;
    use podenv_admission::review::AdmissionReview;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone, PartialEq)]
    struct Posted {
        request_id: String,
        outcome: &'static str,
        error_type: Option<String>,
        body: Value,
    }

    #[derive(Clone)]
    struct FakeRuntime {
        event: Arc<Vec<u8>>,
        posted: Arc<Mutex<Vec<Posted>>>,
    }

    async fn next(State(runtime): State<FakeRuntime>) -> impl IntoResponse {
        (
            [
                (REQUEST_ID_HEADER, "8476a536-e9f4-11e8-9739-2dfe598c3fcd"),
                (DEADLINE_HEADER, "1542409706888"),
                (TRACE_ID_HEADER, "Root=1-5bef4de7-ad49b0e87f6ef6c87fc2e700"),
            ],
            runtime.event.as_ref().clone(),
        )
    }

    async fn response(
        State(runtime): State<FakeRuntime>,
        Path(request_id): Path<String>,
        body: Bytes,
    ) -> StatusCode {
        runtime.posted.lock().push(Posted {
            request_id,
            outcome: "response",
            error_type: None,
            body: serde_json::from_slice(&body).unwrap(),
        });
        StatusCode::ACCEPTED
    }

    async fn error(
        State(runtime): State<FakeRuntime>,
        Path(request_id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        runtime.posted.lock().push(Posted {
            request_id,
            outcome: "error",
            error_type: headers
                .get(ERROR_TYPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(&body).unwrap(),
        });
        StatusCode::ACCEPTED
    }

    async fn invoke(event: Vec<u8>) -> Vec<Posted> {
        let runtime = FakeRuntime {
            event: Arc::new(event),
            posted: Arc::default(),
        };
        let app = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next))
            .route(
                "/2018-06-01/runtime/invocation/{request_id}/response",
                post(response),
            )
            .route(
                "/2018-06-01/runtime/invocation/{request_id}/error",
                post(error),
            )
            .with_state(runtime.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let client = RuntimeClient::new(&addr.to_string()).unwrap();
        process_next(&client, &AdmissionWebhookHandler::default())
            .await
            .unwrap();

        runtime.posted.lock().clone()
    }

    fn gateway_event(body: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "httpMethod": "POST",
            "path": "/validate",
            "requestContext": {"requestId": "c6af9ac6-7b61-11e6-9a41-93e8deadbeef"},
            "body": body,
            "isBase64Encoded": false
        }))
        .unwrap()
    }

    fn review(env_vars: usize) -> String {
        let env: Vec<Value> = (0..env_vars)
            .map(|i| json!({"name": format!("VAR_{i}"), "value": "x"}))
            .collect();
        json!({
            "request": {
                "uid": "e911857d-c318-11e8-bbad-025000000001",
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "web"},
                    "spec": {"containers": [{"name": "app", "image": "nginx", "env": env}]}
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_allowed_invocation() {
        let posted = invoke(gateway_event(&review(1))).await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].request_id, "8476a536-e9f4-11e8-9739-2dfe598c3fcd");
        assert_eq!(posted[0].outcome, "response");

        let response: ApiGatewayProxyResponse =
            serde_json::from_value(posted[0].body.clone()).unwrap();
        assert_eq!(response.status_code, 200);
        let review: AdmissionReview = serde_json::from_str(&response.body).unwrap();
        let response = review.response.unwrap();
        assert!(response.allowed);
        assert_eq!(response.uid, "e911857d-c318-11e8-bbad-025000000001");
    }

    #[tokio::test]
    async fn test_denied_invocation() {
        let posted = invoke(gateway_event(&review(2))).await;
        let response: ApiGatewayProxyResponse =
            serde_json::from_value(posted[0].body.clone()).unwrap();
        let review: AdmissionReview = serde_json::from_str(&response.body).unwrap();
        assert!(!review.response.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_empty_body_reports_sentinel() {
        let posted = invoke(gateway_event("")).await;
        assert_eq!(
            posted,
            vec![Posted {
                request_id: "8476a536-e9f4-11e8-9739-2dfe598c3fcd".to_string(),
                outcome: "error",
                error_type: Some("Unhandled".to_string()),
                body: json!({"errorMessage": INPUT_REJECTED_MESSAGE, "errorType": "EmptyBody"}),
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_event() {
        let posted = invoke(b"not json".to_vec()).await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].outcome, "error");
        assert_eq!(posted[0].body["errorType"], INVALID_EVENT_ERROR_TYPE);
    }

    #[test]
    fn test_invalid_runtime_api() {
        assert!(RuntimeClient::new("not a host:port").is_err());
    }
}
