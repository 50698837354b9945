// Public API contracts shared between server, workers and clients

pub mod common;
pub mod hardware;
pub mod template;
pub mod workflow;

pub use common::{ErrorResponse, ListResponse};
pub use hardware::Hardware;
pub use template::Template;
pub use workflow::{Workflow, WorkflowAction, WorkflowContext, WorkflowData, WorkflowEvent};

// Re-export the state vocabulary so clients don't need the core crate
pub use ironflow_core::{ActionState, Cursor, WorkflowState};
