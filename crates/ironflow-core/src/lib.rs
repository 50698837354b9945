// Domain logic for the provisioning engine: template language, renderer,
// and workflow state machine. No I/O lives here.

pub mod error;
pub mod image;
pub mod machine;
pub mod render;
pub mod template;

pub use error::{Error, Result};
pub use image::Reference;
pub use machine::{
    decide, ActionState, Cursor, FlatAction, Report, Snapshot, Transition, WorkflowState,
};
pub use render::render;
pub use template::{Action, PidMode, Task, WorkflowPlan, MAX_NAME_LEN, PLAN_VERSION};
