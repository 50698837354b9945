// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use ironflow_core::{ActionState, Cursor, WorkflowState};
use sqlx::FromRow;
use uuid::Uuid;

/// Hardware row from database
#[derive(Debug, Clone, FromRow)]
pub struct HardwareRow {
    pub id: String,
    pub data: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Template row from database
#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Workflow row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub hardware_id: String,
    pub rendered_yaml: String,
    pub state: String,
    pub current_worker: Option<String>,
    pub current_task: Option<String>,
    pub current_action: Option<String>,
    pub current_action_state: String,
    pub cursor_task_index: i32,
    pub cursor_action_index: i32,
    pub current_action_index: i32,
    pub total_actions: i32,
    pub global_timeout_seconds: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub action_started_at: Option<DateTime<Utc>>,
    pub data_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    pub fn workflow_state(&self) -> ironflow_core::Result<WorkflowState> {
        WorkflowState::parse(&self.state)
    }

    pub fn action_state(&self) -> ironflow_core::Result<ActionState> {
        ActionState::parse(&self.current_action_state)
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.cursor_task_index, self.cursor_action_index)
    }
}

/// One flattened plan action row
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowActionRow {
    pub workflow_id: Uuid,
    pub global_index: i32,
    pub task_index: i32,
    pub action_index: i32,
    pub task_name: String,
    pub action_name: String,
    pub worker_addr: String,
    pub image: String,
    pub timeout_seconds: i64,
    pub command: sqlx::types::JsonValue,
    pub environment: sqlx::types::JsonValue,
    pub volumes: sqlx::types::JsonValue,
    pub pid: Option<String>,
    pub on_timeout: sqlx::types::JsonValue,
    pub on_failure: sqlx::types::JsonValue,
}

impl WorkflowActionRow {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.task_index, self.action_index)
    }

    fn string_list(value: &sqlx::types::JsonValue) -> Vec<String> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn command_list(&self) -> Vec<String> {
        Self::string_list(&self.command)
    }

    pub fn volume_list(&self) -> Vec<String> {
        Self::string_list(&self.volumes)
    }

    pub fn on_timeout_list(&self) -> Vec<String> {
        Self::string_list(&self.on_timeout)
    }

    pub fn on_failure_list(&self) -> Vec<String> {
        Self::string_list(&self.on_failure)
    }

    pub fn environment_map(&self) -> std::collections::BTreeMap<String, String> {
        self.environment
            .as_object()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Event row from database
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowEventRow {
    pub id: i64,
    pub workflow_id: Uuid,
    pub worker_id: String,
    pub task_name: String,
    pub action_name: String,
    pub action_status: String,
    pub seconds: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a workflow (the rendered plan travels alongside)
#[derive(Debug, Clone)]
pub struct CreateWorkflow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub hardware_id: String,
    pub rendered_yaml: String,
}

/// A worker's action status report, as received by the dispatch surface
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub worker_id: String,
    pub task_name: String,
    pub action_name: String,
    pub status: ActionState,
    pub seconds: i64,
    pub message: String,
    pub cursor: Cursor,
}

/// A running action the timeout sweep found past its deadline
#[derive(Debug, Clone, FromRow)]
pub struct ExpiredAction {
    pub workflow_id: Uuid,
    pub worker_id: String,
    pub task_name: String,
    pub action_name: String,
    pub cursor_task_index: i32,
    pub cursor_action_index: i32,
    pub seconds_running: i64,
}
