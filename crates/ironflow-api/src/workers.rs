// Worker dispatch HTTP routes
//
// Workers are stateless: they discover their assignments by their own MAC
// or IP, fetch the full action list once, then report status action by
// action. Everything here is a thin projection of the state machine.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ironflow_contracts::{
    ActionState, Cursor, ListResponse, WorkflowAction, WorkflowContext, WorkflowData,
};
use ironflow_core::Error;
use ironflow_storage::{ActionReport, WorkflowActionRow, WorkflowRow};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::{ApiResult, AppState};

/// A worker's report about the action it is executing
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportActionStatusRequest {
    /// MAC or IP the reporting worker identifies itself by.
    pub worker_id: String,
    pub task_name: String,
    pub action_name: String,
    pub action_status: ActionState,
    /// Seconds the action has been executing.
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub message: String,
    /// The cursor the worker believes it is at; must match the server's.
    pub cursor: Cursor,
}

/// Request to write the workflow data blob
#[derive(Debug, Deserialize, ToSchema)]
pub struct PutWorkflowDataRequest {
    /// Base64-encoded blob contents.
    pub data: String,
    /// Version the caller last read; the write fails on mismatch.
    pub expected_version: i64,
}

/// Response to a data blob write
#[derive(Debug, Serialize, ToSchema)]
pub struct PutWorkflowDataResponse {
    pub version: i64,
}

/// Create worker dispatch routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/workers/:worker_addr/workflows",
            get(get_workflows_for_worker),
        )
        .route("/v1/workflows/:workflow_id/context", get(get_workflow_context))
        .route("/v1/workflows/:workflow_id/actions", get(get_workflow_actions))
        .route(
            "/v1/workflows/:workflow_id/actions/status",
            post(report_action_status),
        )
        .route(
            "/v1/workflows/:workflow_id/data",
            get(get_workflow_data).put(put_workflow_data),
        )
        .with_state(state)
}

/// GET /v1/workers/{worker_addr}/workflows - Workflows assigned to a worker
#[utoipa::path(
    get,
    path = "/v1/workers/{worker_addr}/workflows",
    params(("worker_addr" = String, Path, description = "Worker MAC or IP")),
    responses(
        (status = 200, description = "Non-terminal workflow IDs", body = ListResponse<Uuid>)
    ),
    tag = "workers"
)]
pub async fn get_workflows_for_worker(
    State(state): State<AppState>,
    Path(worker_addr): Path<String>,
) -> ApiResult<Json<ListResponse<Uuid>>> {
    let ids = state.db.workflows_for_worker(&worker_addr).await?;
    Ok(Json(ids.into()))
}

/// GET /v1/workflows/{workflow_id}/context - Current execution pointer
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/context",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow context", body = WorkflowContext),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workers"
)]
pub async fn get_workflow_context(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowContext>> {
    let row = state
        .db
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("workflow {}", workflow_id)))?;
    Ok(Json(to_context(&row)?))
}

/// GET /v1/workflows/{workflow_id}/actions - Full execution plan
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/actions",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Actions in execution order", body = ListResponse<WorkflowAction>),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workers"
)]
pub async fn get_workflow_actions(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<WorkflowAction>>> {
    state
        .db
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("workflow {}", workflow_id)))?;

    let rows = state.db.get_workflow_actions(workflow_id).await?;
    Ok(Json(
        rows.into_iter().map(to_action).collect::<Vec<_>>().into(),
    ))
}

/// POST /v1/workflows/{workflow_id}/actions/status - Report action status
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/actions/status",
    request_body = ReportActionStatusRequest,
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Report applied; updated context", body = WorkflowContext),
        (status = 404, description = "Workflow not found"),
        (status = 409, description = "Out of order, or workflow already terminal")
    ),
    tag = "workers"
)]
pub async fn report_action_status(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<ReportActionStatusRequest>,
) -> ApiResult<Json<WorkflowContext>> {
    if req.worker_id.trim().is_empty() {
        return Err(Error::invalid_argument("worker_id must not be empty").into());
    }

    let report = ActionReport {
        worker_id: req.worker_id,
        task_name: req.task_name,
        action_name: req.action_name,
        status: req.action_status,
        seconds: req.seconds,
        message: req.message,
        cursor: req.cursor,
    };
    let row = state.db.report_action_status(workflow_id, &report).await?;
    Ok(Json(to_context(&row)?))
}

/// GET /v1/workflows/{workflow_id}/data - Read the data blob
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/data",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Blob and version", body = WorkflowData),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workers"
)]
pub async fn get_workflow_data(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowData>> {
    let (blob, version) = state.db.get_workflow_data(workflow_id).await?;
    Ok(Json(WorkflowData {
        data: BASE64.encode(blob),
        version,
    }))
}

/// PUT /v1/workflows/{workflow_id}/data - Write the data blob (CAS)
#[utoipa::path(
    put,
    path = "/v1/workflows/{workflow_id}/data",
    request_body = PutWorkflowDataRequest,
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "New version", body = PutWorkflowDataResponse),
        (status = 404, description = "Workflow not found"),
        (status = 409, description = "Version conflict")
    ),
    tag = "workers"
)]
pub async fn put_workflow_data(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<PutWorkflowDataRequest>,
) -> ApiResult<Json<PutWorkflowDataResponse>> {
    let blob = BASE64
        .decode(req.data.as_bytes())
        .map_err(|e| Error::invalid_argument(format!("data is not valid base64: {}", e)))?;

    let version = state
        .db
        .put_workflow_data(workflow_id, req.expected_version, &blob)
        .await?;
    Ok(Json(PutWorkflowDataResponse { version }))
}

fn to_context(row: &WorkflowRow) -> Result<WorkflowContext, Error> {
    Ok(WorkflowContext {
        workflow_id: row.id,
        current_worker: row.current_worker.clone(),
        current_task: row.current_task.clone(),
        current_action: row.current_action.clone(),
        current_action_index: row.current_action_index,
        current_action_state: row.action_state()?,
        total_number_of_actions: row.total_actions,
    })
}

fn to_action(row: WorkflowActionRow) -> WorkflowAction {
    WorkflowAction {
        global_index: row.global_index,
        task_index: row.task_index,
        action_index: row.action_index,
        task_name: row.task_name.clone(),
        name: row.action_name.clone(),
        worker_addr: row.worker_addr.clone(),
        image: row.image.clone(),
        timeout: row.timeout_seconds,
        command: row.command_list(),
        environment: row.environment_map(),
        volumes: row.volume_list(),
        pid: row.pid.clone(),
        on_timeout: row.on_timeout_list(),
        on_failure: row.on_failure_list(),
    }
}
