//! Standalone HTTP(S) front end playing the role of the API gateway.

use crate::tls::{TlsPaths, load_tls_config, watch_tls_files};

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{Router, get, post};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use podenv_admission::gateway::ApiGatewayRequestContext;
use podenv_admission::{AdmissionWebhookHandler, ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use rustls::crypto::aws_lc_rs::default_provider;
use serde_json::json;
use tokio::signal::unix::{SignalKind, signal};

pub const VALIDATE_PATH: &str = "/validate-pods";
const REQUEST_ID_HEADER: &str = "x-request-id";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

static READYZ_READY: AtomicBool = AtomicBool::new(true);

type SharedHandler = Arc<AdmissionWebhookHandler>;

async fn livez() -> &'static str {
    "healthy"
}

async fn readyz() -> impl IntoResponse {
    if READYZ_READY.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn router(handler: AdmissionWebhookHandler) -> Router {
    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route(VALIDATE_PATH, post(validate_pods))
        .with_state(Arc::new(handler))
}

fn gateway_event(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: String,
) -> ApiGatewayProxyRequest {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .cloned()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ApiGatewayProxyRequest {
        resource: Some(VALIDATE_PATH.to_string()),
        path: Some(uri.path().to_string()),
        http_method: Some(method.to_string()),
        headers: Some(headers),
        request_context: ApiGatewayRequestContext {
            request_id: Some(request_id),
            http_method: Some(method.to_string()),
            resource_path: Some(VALIDATE_PATH.to_string()),
            ..ApiGatewayRequestContext::default()
        },
        body: Some(body),
        ..ApiGatewayProxyRequest::default()
    }
}

fn into_http_response(response: ApiGatewayProxyResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers: HeaderMap = response
        .headers
        .iter()
        .filter_map(|(name, value)| {
            Some((
                HeaderName::try_from(name.as_str()).ok()?,
                HeaderValue::try_from(value.as_str()).ok()?,
            ))
        })
        .collect();
    (status, headers, response.body).into_response()
}

async fn validate_pods(
    State(handler): State<SharedHandler>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let event = gateway_event(&method, &uri, &headers, body);
    match handler.handle(&event) {
        Ok(response) => into_http_response(response),
        Err(e) => {
            let status = if e.is_input_error() {
                StatusCode::BAD_REQUEST
            } else {
                tracing::error!(request_id = event.request_id(), "admission failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(json!({ "message": e.public_message() }))).into_response()
        }
    }
}

pub async fn run(
    handler: AdmissionWebhookHandler,
    listen_address: &str,
    port: u16,
    tls: Option<TlsPaths>,
) -> anyhow::Result<()> {
    let ip: IpAddr = listen_address.parse()?;
    let socket_addr = SocketAddr::new(ip, port);
    let app = router(handler);

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        READYZ_READY.store(false, Ordering::Relaxed);
        tracing::info!("Received shutdown signal, starting graceful shutdown");
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match tls {
        Some(paths) => {
            default_provider()
                .install_default()
                .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
            let rustls_config = RustlsConfig::from_config(Arc::new(load_tls_config(&paths)?));

            tracing::info!("Starting HTTPS server on {}", socket_addr);
            let server = axum_server::bind_rustls(socket_addr, rustls_config.clone())
                .handle(handle)
                .serve(app.into_make_service());

            tokio::select! {
                result = server => result?,
                result = watch_tls_files(paths, rustls_config) => result?,
            }
        }
        None => {
            tracing::info!("Starting HTTP server on {}", socket_addr);
            axum_server::bind(socket_addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
