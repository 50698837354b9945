// Workflow CRUD and event streaming HTTP routes
//
// Creation renders the template against the hardware record and persists
// the grounded plan; a workflow that exists is always executable.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use ironflow_contracts::{ListResponse, Workflow, WorkflowEvent};
use ironflow_core::{render, ActionState, Error, WorkflowState};
use ironflow_storage::{CreateWorkflow, WorkflowEventRow, WorkflowRow};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{ApiResult, AppState};

/// Request to create a workflow from a template and a hardware record
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub template_id: Uuid,
    pub hardware_id: String,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/v1/workflows/:workflow_id",
            get(get_workflow).delete(delete_workflow),
        )
        .route(
            "/v1/workflows/:workflow_id/events",
            get(stream_workflow_events),
        )
        .with_state(state)
}

/// POST /v1/workflows - Render a template against hardware and create a workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = Workflow),
        (status = 400, description = "Template failed to render"),
        (status = 404, description = "Template or hardware not found")
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let template = state
        .db
        .get_template(req.template_id, false)
        .await?
        .ok_or_else(|| Error::not_found(format!("template {}", req.template_id)))?;
    let hardware = state
        .db
        .get_hardware(&req.hardware_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("hardware {}", req.hardware_id)))?;

    let (plan, rendered_yaml) = render(template.id, &template.body, &hardware.data)?;

    let input = CreateWorkflow {
        id: Uuid::now_v7(),
        template_id: template.id,
        hardware_id: hardware.id,
        rendered_yaml,
    };
    let row = state.db.create_workflow(&input, &plan).await?;
    tracing::info!(
        workflow_id = %row.id,
        template_id = %row.template_id,
        hardware_id = %row.hardware_id,
        total_actions = row.total_actions,
        "created workflow"
    );
    Ok((StatusCode::CREATED, Json(to_workflow(row)?)))
}

/// GET /v1/workflows - List workflows
#[utoipa::path(
    get,
    path = "/v1/workflows",
    responses(
        (status = 200, description = "Workflows ordered by creation time", body = ListResponse<Workflow>)
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
) -> ApiResult<Json<ListResponse<Workflow>>> {
    let rows = state.db.list_workflows().await?;
    let workflows = rows
        .into_iter()
        .map(to_workflow)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(workflows.into()))
}

/// GET /v1/workflows/{workflow_id} - Get the full runtime record
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow", body = Workflow),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    let row = state
        .db
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("workflow {}", workflow_id)))?;
    Ok(Json(to_workflow(row)?))
}

/// DELETE /v1/workflows/{workflow_id} - Soft-delete a workflow
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 204, description = "Workflow deleted"),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.db.delete_workflow(workflow_id).await?;
    tracing::info!(%workflow_id, "deleted workflow");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/workflows/{workflow_id}/events - Stream the event log (SSE)
///
/// Replays existing events in insertion order, then keeps polling for new
/// ones until the workflow reaches a terminal state.
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/events",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn stream_workflow_events(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    // 404 before the stream starts rather than an empty stream forever.
    state
        .db
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("workflow {}", workflow_id)))?;

    let db = state.db.clone();
    let stream = event_stream(db, workflow_id);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn event_stream(
    db: std::sync::Arc<ironflow_storage::Database>,
    workflow_id: Uuid,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    futures::stream::unfold(0i64, move |last_id| {
        let db = db.clone();
        async move {
            loop {
                match db.list_events_after(workflow_id, last_id).await {
                    Ok(rows) if !rows.is_empty() => {
                        let next_id = rows.last().map(|r| r.id).unwrap_or(last_id);
                        let batch: Vec<Result<SseEvent, Infallible>> = rows
                            .into_iter()
                            .filter_map(|row| to_sse_event(row).ok())
                            .map(Ok)
                            .collect();
                        return Some((futures::stream::iter(batch), next_id));
                    }
                    Ok(_) => {
                        // Nothing new; stop once the workflow is terminal,
                        // since no further events can appear.
                        match db.get_workflow(workflow_id).await {
                            Ok(Some(row))
                                if row.workflow_state().map(|s| s.is_terminal()).unwrap_or(true) =>
                            {
                                return None;
                            }
                            Ok(Some(_)) => {}
                            _ => return None,
                        }
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Err(e) => {
                        tracing::warn!(%workflow_id, error = %e, "event stream query failed");
                        return None;
                    }
                }
            }
        }
    })
    .flatten()
}

fn to_sse_event(row: WorkflowEventRow) -> Result<SseEvent, Error> {
    let event = WorkflowEvent {
        workflow_id: row.workflow_id,
        worker_id: row.worker_id,
        task_name: row.task_name,
        action_name: row.action_name,
        action_status: ActionState::parse(&row.action_status)?,
        seconds: row.seconds,
        message: row.message,
        created_at: row.created_at,
    };
    SseEvent::default()
        .json_data(&event)
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))
}

pub(crate) fn to_workflow(row: WorkflowRow) -> Result<Workflow, Error> {
    let state: WorkflowState = row.workflow_state()?;
    let action_state = row.action_state()?;
    Ok(Workflow {
        id: row.id,
        template_id: row.template_id,
        hardware_id: row.hardware_id,
        rendered_yaml: row.rendered_yaml,
        state,
        current_worker: row.current_worker,
        current_task: row.current_task,
        current_action: row.current_action,
        current_action_state: action_state,
        current_action_index: row.current_action_index,
        total_actions: row.total_actions,
        data_version: row.data_version,
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    })
}
