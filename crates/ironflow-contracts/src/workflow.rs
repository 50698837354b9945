// Workflow DTOs: runtime record, worker dispatch views, event log entries

use chrono::{DateTime, Utc};
use ironflow_core::{ActionState, WorkflowState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Full runtime record of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workflow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub hardware_id: String,
    /// Concrete plan the workflow executes, persisted verbatim at render time.
    pub rendered_yaml: String,
    pub state: WorkflowState,
    /// Worker running the current action; only meaningful while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    pub current_action_state: ActionState,
    /// Position in the flattened action list; equals `total_actions` once
    /// the last action has succeeded.
    pub current_action_index: i32,
    pub total_actions: i32,
    /// Bumped by one on every successful data-blob write.
    pub data_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Compact execution pointer a worker polls for.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowContext {
    pub workflow_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    pub current_action_index: i32,
    pub current_action_state: ActionState,
    pub total_number_of_actions: i32,
}

/// One action of a workflow's plan, flattened into execution order.
///
/// Carries everything the worker-side executor needs: the image, command
/// and environment, plus the cursor coordinates it reports back with.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowAction {
    /// Position in the flattened action list.
    pub global_index: i32,
    pub task_index: i32,
    /// Position within the owning task.
    pub action_index: i32,
    pub task_name: String,
    pub name: String,
    /// MAC or IP of the worker assigned to this action's task.
    pub worker_addr: String,
    /// Normalized container image reference.
    pub image: String,
    /// Seconds before the server times the action out; 0 means no timeout.
    pub timeout: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    #[schema(value_type = Object)]
    pub environment: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_timeout: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,
}

/// An immutable record of an action status change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowEvent {
    pub workflow_id: Uuid,
    pub worker_id: String,
    pub task_name: String,
    pub action_name: String,
    pub action_status: ActionState,
    /// Seconds the action had been executing when the report was made.
    pub seconds: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Data blob read/written by workers under optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowData {
    /// Base64-encoded blob contents.
    pub data: String,
    pub version: i64,
}
