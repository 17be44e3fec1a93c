//! Inbound HTTP surface: health and status probes, the manual trigger
//! webhook and the artifact publication callback.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{header::HeaderValue, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use git_watcher_core::contract::{ArtifactEvent, NotificationPayload, Notifier, RepoUpdate, TriggerRequest};
use git_watcher_core::{Manager, PublishOutcome};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::load_config::AppConfig;
use crate::notify::{verify_signature, WebhookClient, SIGNATURE_HEADER};
use crate::scheduler::Scheduler;

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub scheduler: Arc<Scheduler>,
    pub notifier: Arc<dyn Notifier>,
    /// Shared secret for inbound signatures; empty disables verification.
    pub secret: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/webhook/trigger", post(trigger))
        .route("/webhook/artifacts", post(artifacts))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();
    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);

    let mut response = next.run(request).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            latency_ms = started_at.elapsed().as_millis() as u64,
            "request completed"
        );
    });
    response
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn status(State(state): State<AppState>) -> (StatusCode, String) {
    let status = if state.scheduler.is_running() {
        "running"
    } else {
        "stopped"
    };
    (StatusCode::OK, format!("Scheduler status: {status}"))
}

async fn trigger(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.secret.is_empty() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        match signature {
            None => {
                warn!("Trigger rejected: missing signature");
                return (StatusCode::BAD_REQUEST, "Invalid webhook request: missing signature")
                    .into_response();
            }
            Some(signature) if !verify_signature(&body, &state.secret, signature) => {
                warn!("Trigger rejected: signature mismatch");
                return (StatusCode::BAD_REQUEST, "Invalid webhook request: invalid signature")
                    .into_response();
            }
            Some(_) => {}
        }
    }

    let request: TriggerRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid webhook request: {e}"))
                .into_response();
        }
    };
    info!(
        event = %request.event,
        branch = ?request.branch,
        reference = ?request.reference,
        git_ref = ?request.git_ref,
        "Webhook trigger received"
    );

    let Some(branch) = request.resolved_branch() else {
        return match state.scheduler.trigger_manual_check() {
            Ok(_) => (StatusCode::OK, "Manual check for all branches triggered").into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to trigger check: {e}"),
            )
                .into_response(),
        };
    };

    let manager = Arc::clone(&state.manager);
    let target = branch.clone();
    let report = match tokio::task::spawn_blocking(move || manager.check_and_update_branch(&target))
        .await
    {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!(branch = %branch, error = %e, "Triggered branch update failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update branch {branch}: {e}"),
            )
                .into_response();
        }
        Err(e) => {
            error!(branch = %branch, error = %e, "Triggered branch update panicked");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update branch {branch}"),
            )
                .into_response();
        }
    };

    let mut payload = NotificationPayload::repository_update(format!(
        "Repository branch {branch} and submodules update completed"
    ));
    payload.branch = Some(branch.clone());
    payload.repo_updates.insert(
        branch.clone(),
        RepoUpdate {
            repository: state.manager.main_repository().url.clone(),
            branch: branch.clone(),
            timestamp: Utc::now(),
            commit_hash: report.head,
        },
    );
    if let Err(e) = state.notifier.send_notification(&payload).await {
        error!(branch = %branch, error = %e, "Failed to send trigger notification");
    }

    (StatusCode::OK, format!("Manual check for branch {branch} completed")).into_response()
}

async fn artifacts(State(state): State<AppState>, body: Bytes) -> Response {
    let event: ArtifactEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid request body").into_response(),
    };
    let artifact = event.artifact;
    if !artifact.has_required_fields() {
        return (StatusCode::BAD_REQUEST, "Missing required fields").into_response();
    }

    let manager = Arc::clone(&state.manager);
    let (repo, package, version) = (
        artifact.artifact_repo_name.clone(),
        artifact.artifact_pkg_name.clone(),
        artifact.artifact_version_name.clone(),
    );
    let outcome =
        tokio::task::spawn_blocking(move || manager.publish(&repo, &package, &version)).await;
    match outcome {
        Ok(Ok(outcome)) => {
            let outcome_label = match &outcome {
                PublishOutcome::AlreadyPublished => "already_published",
                PublishOutcome::NoChanges => "no_changes",
                PublishOutcome::Merged { .. } => "merged",
            };
            info!(
                repo = %artifact.artifact_repo_name,
                package = %artifact.artifact_pkg_name,
                version = %artifact.artifact_version_name,
                outcome = outcome_label,
                "Artifact publication handled"
            );
            let message = format!(
                "Successfully updated artifacts for {}",
                artifact.artifact_repo_name
            );
            Json(json!({
                "status": "success",
                "message": message,
                "details": artifact,
            }))
            .into_response()
        }
        Ok(Err(e)) => {
            error!(repo = %artifact.artifact_repo_name, error = %e, "Artifact publication failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update artifacts: {e}"),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Artifact publication task panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to update artifacts").into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

/// Runs the long-lived service until Ctrl-C or SIGTERM.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let manager = Arc::new(
        Manager::with_process_runner(config.git.clone()).context("failed to initialise repository manager")?,
    );
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookClient::new(&config.webhook)?);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&manager),
        Arc::clone(&notifier),
        config.schedule.check_interval,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    scheduler.start(shutdown_rx)?;

    let app = build_router(AppState {
        manager,
        scheduler: Arc::clone(&scheduler),
        notifier,
        secret: config.webhook.secret.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;
    info!(listen_addr = %addr, "starting server");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(());
        })
        .await
        .context("server exited unexpectedly");

    scheduler.stop().await;
    info!("server stopped");
    served
}
