// Ironflow API server
// Decision: workers pull their assignments; the server never dials out

mod common;
mod config;
mod hardware;
mod sweep;
mod templates;
mod workers;
mod workflows;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use ironflow_contracts::*;
use ironflow_storage::Database;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::common::AppState;
use crate::config::Config;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        templates::create_template,
        templates::list_templates,
        templates::get_template,
        templates::get_template_by_name,
        templates::update_template,
        templates::delete_template,
        hardware::push_hardware,
        hardware::list_hardware,
        hardware::get_hardware,
        hardware::get_hardware_by_mac,
        hardware::get_hardware_by_ip,
        hardware::delete_hardware,
        workflows::create_workflow,
        workflows::list_workflows,
        workflows::get_workflow,
        workflows::delete_workflow,
        workflows::stream_workflow_events,
        workers::get_workflows_for_worker,
        workers::get_workflow_context,
        workers::get_workflow_actions,
        workers::report_action_status,
        workers::get_workflow_data,
        workers::put_workflow_data,
    ),
    components(
        schemas(
            Template, Hardware, Workflow, WorkflowContext, WorkflowAction,
            WorkflowEvent, WorkflowData, WorkflowState, ActionState, Cursor,
            ErrorResponse,
            templates::CreateTemplateRequest,
            templates::UpdateTemplateRequest,
            hardware::PushHardwareRequest,
            workflows::CreateWorkflowRequest,
            workers::ReportActionStatusRequest,
            workers::PutWorkflowDataRequest,
            workers::PutWorkflowDataResponse,
        )
    ),
    tags(
        (name = "templates", description = "Template management endpoints"),
        (name = "hardware", description = "Hardware inventory endpoints"),
        (name = "workflows", description = "Workflow management endpoints"),
        (name = "workers", description = "Worker dispatch endpoints")
    ),
    info(
        title = "Ironflow API",
        version = "0.1.0",
        description = "Bare-metal provisioning workflow engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ironflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ironflow-api starting...");

    let (router, listener, sweep_handle) = match startup().await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = ?e, "startup failed");
            return ExitCode::from(1);
        }
    };

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweep_handle.abort();

    match result {
        Ok(()) => {
            tracing::info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::from(2)
        }
    }
}

async fn startup() -> Result<(Router, TcpListener, JoinHandle<()>)> {
    let config = Config::from_env();

    let db = Database::from_url(&config.database_url()?)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    // Migration gate: apply pending migrations, or refuse to serve when
    // auto-apply is disabled and the schema is behind.
    let pending = db.pending_migrations().await?;
    if !pending.is_empty() {
        if config.auto_migrate() {
            tracing::info!(count = pending.len(), "applying pending migrations");
            db.migrate().await.context("Failed to apply migrations")?;
        } else {
            anyhow::bail!(
                "refusing to serve with pending migrations: {}",
                pending.join(", ")
            );
        }
    }

    let db = Arc::new(db);
    let sweep_handle = sweep::spawn(db.clone(), config.sweep_interval());
    tracing::info!(interval = ?config.sweep_interval(), "timeout sweep running");

    let state = AppState { db };
    let router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health))
        .merge(templates::routes(state.clone()))
        .merge(hardware::routes(state.clone()))
        .merge(workflows::routes(state.clone()))
        .merge(workers::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "listening");

    Ok((router, listener, sweep_handle))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
