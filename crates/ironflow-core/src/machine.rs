// Workflow state machine
//
// Pure transition logic over a snapshot of a workflow's execution state.
// The storage layer loads the snapshot under a row lock, calls `decide`,
// and applies the returned transition in the same transaction, so per-
// workflow ordering is serialized by the database rather than by any
// in-process lock.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum WorkflowState {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

impl WorkflowState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Success | WorkflowState::Failed | WorkflowState::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Running => "running",
            WorkflowState::Success => "success",
            WorkflowState::Failed => "failed",
            WorkflowState::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(WorkflowState::Pending),
            "running" => Ok(WorkflowState::Running),
            "success" => Ok(WorkflowState::Success),
            "failed" => Ok(WorkflowState::Failed),
            "timeout" => Ok(WorkflowState::Timeout),
            other => Err(Error::invalid_argument(format!(
                "unknown workflow state {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single action; also the status vocabulary of worker reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ActionState {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Pending => "pending",
            ActionState::Running => "running",
            ActionState::Success => "success",
            ActionState::Failed => "failed",
            ActionState::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ActionState::Pending),
            "running" => Ok(ActionState::Running),
            "success" => Ok(ActionState::Success),
            "failed" => Ok(ActionState::Failed),
            "timeout" => Ok(ActionState::Timeout),
            other => Err(Error::invalid_argument(format!(
                "unknown action state {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer into a workflow's plan: task index plus action index within that task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Cursor {
    pub task_index: i32,
    pub action_index: i32,
}

impl Cursor {
    pub fn new(task_index: i32, action_index: i32) -> Self {
        Self {
            task_index,
            action_index,
        }
    }

    /// The cursor every workflow starts at
    pub fn origin() -> Self {
        Self::new(0, 0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.task_index, self.action_index)
    }
}

/// The machine's view of one action in the flattened plan
#[derive(Debug, Clone)]
pub struct FlatAction {
    pub global_index: i32,
    pub cursor: Cursor,
    pub task_name: String,
    pub action_name: String,
    pub on_timeout: Vec<String>,
    pub on_failure: Vec<String>,
}

/// Snapshot of a workflow's mutable execution state
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: WorkflowState,
    pub action_state: ActionState,
    pub cursor: Cursor,
    pub global_index: i32,
    pub total_actions: i32,
}

/// A worker's (or the timeout sweep's) status report
#[derive(Debug, Clone)]
pub struct Report {
    pub cursor: Cursor,
    pub status: ActionState,
}

/// Decision produced by `decide`, applied by the storage layer
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Duplicate report whose effect is already reflected; log it, change nothing
    Idempotent,
    /// The current action entered Running (starts the workflow if Pending)
    ActionStarted,
    /// The current action succeeded; move the cursor to the next action
    Advance { next_global: i32 },
    /// The last action succeeded; the workflow is done
    Completed,
    /// The current action failed or timed out and declares follow-ups;
    /// splice copies of the named actions in after it and run the first
    Splice { follow_ups: Vec<String> },
    /// The workflow reached a terminal failure state
    Terminal { state: WorkflowState },
}

/// Decide how a report transitions the workflow.
///
/// `actions` is the flattened plan in execution order; `snapshot` is the
/// current persisted state. Returns the transition to apply, or the
/// rejection mandated by the protocol (`AlreadyTerminal`, `OutOfOrder`,
/// `InvalidArgument`). Rejected reports must leave no trace; accepted ones
/// produce exactly one event.
pub fn decide(actions: &[FlatAction], snapshot: &Snapshot, report: &Report) -> Result<Transition> {
    if snapshot.state.is_terminal() {
        return Err(Error::AlreadyTerminal(snapshot.state));
    }

    let current = actions
        .get(snapshot.global_index as usize)
        .ok_or_else(|| Error::invalid_argument("workflow has no current action"))?;

    if report.cursor != snapshot.cursor {
        // A report for the immediately-preceding action whose transition
        // has already been applied is a duplicate, not a protocol error:
        // a success that advanced the cursor, or a failure/timeout whose
        // fallback list already spliced the cursor forward. The list
        // guards keep a stale failure report for an action that actually
        // succeeded out of this path.
        if snapshot.global_index > 0 {
            let previous = &actions[snapshot.global_index as usize - 1];
            if report.cursor == previous.cursor {
                let already_applied = match report.status {
                    ActionState::Success => true,
                    ActionState::Failed => !previous.on_failure.is_empty(),
                    ActionState::Timeout => !previous.on_timeout.is_empty(),
                    _ => false,
                };
                if already_applied {
                    return Ok(Transition::Idempotent);
                }
            }
        }
        return Err(Error::OutOfOrder {
            expected: snapshot.cursor,
            got: report.cursor,
        });
    }

    match report.status {
        ActionState::Pending => Err(Error::invalid_argument(
            "workers cannot report an action as pending",
        )),
        ActionState::Running => match snapshot.action_state {
            ActionState::Running => Ok(Transition::Idempotent),
            ActionState::Pending => Ok(Transition::ActionStarted),
            other => Err(Error::invalid_argument(format!(
                "action already finished as {}",
                other
            ))),
        },
        ActionState::Success => {
            if snapshot.global_index + 1 >= snapshot.total_actions {
                Ok(Transition::Completed)
            } else {
                Ok(Transition::Advance {
                    next_global: snapshot.global_index + 1,
                })
            }
        }
        ActionState::Failed => Ok(fallback(&current.on_failure, WorkflowState::Failed)),
        ActionState::Timeout => Ok(fallback(&current.on_timeout, WorkflowState::Timeout)),
    }
}

fn fallback(follow_ups: &[String], terminal: WorkflowState) -> Transition {
    if follow_ups.is_empty() {
        Transition::Terminal { state: terminal }
    } else {
        Transition::Splice {
            follow_ups: follow_ups.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tasks, two actions each
    fn plan() -> Vec<FlatAction> {
        let mut actions = Vec::new();
        for (t, task_name) in ["disk", "network"].iter().enumerate() {
            for (a, action_name) in ["prepare", "apply"].iter().enumerate() {
                actions.push(FlatAction {
                    global_index: (t * 2 + a) as i32,
                    cursor: Cursor::new(t as i32, a as i32),
                    task_name: task_name.to_string(),
                    action_name: action_name.to_string(),
                    on_timeout: vec![],
                    on_failure: vec![],
                });
            }
        }
        actions
    }

    fn snapshot(state: WorkflowState, action_state: ActionState, global_index: i32) -> Snapshot {
        let actions = plan();
        Snapshot {
            state,
            action_state,
            cursor: actions[global_index as usize].cursor,
            global_index,
            total_actions: actions.len() as i32,
        }
    }

    fn report(cursor: Cursor, status: ActionState) -> Report {
        Report { cursor, status }
    }

    #[test]
    fn first_running_report_starts_the_workflow() {
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Pending, ActionState::Pending, 0),
            &report(Cursor::origin(), ActionState::Running),
        )
        .unwrap();
        assert_eq!(t, Transition::ActionStarted);
    }

    #[test]
    fn pending_workflow_rejects_nonzero_cursor() {
        let err = decide(
            &plan(),
            &snapshot(WorkflowState::Pending, ActionState::Pending, 0),
            &report(Cursor::new(0, 1), ActionState::Running),
        )
        .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }), "got {err:?}");
    }

    #[test]
    fn success_advances_across_task_boundaries() {
        // Last action of the first task; the next cursor starts task 1.
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Running, 1),
            &report(Cursor::new(0, 1), ActionState::Success),
        )
        .unwrap();
        assert_eq!(t, Transition::Advance { next_global: 2 });
        assert_eq!(plan()[2].cursor, Cursor::new(1, 0));
    }

    #[test]
    fn success_of_last_action_completes_the_workflow() {
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Running, 3),
            &report(Cursor::new(1, 1), ActionState::Success),
        )
        .unwrap();
        assert_eq!(t, Transition::Completed);
    }

    #[test]
    fn every_success_advances_exactly_once() {
        // Drive the whole plan; the number of advances equals the number
        // of executed actions and the index never exceeds the total.
        let actions = plan();
        let mut advances = 0;
        let mut index = 0;
        loop {
            let snap = snapshot(WorkflowState::Running, ActionState::Running, index);
            match decide(
                &actions,
                &snap,
                &report(snap.cursor, ActionState::Success),
            )
            .unwrap()
            {
                Transition::Advance { next_global } => {
                    advances += 1;
                    index = next_global;
                    assert!(index < snap.total_actions);
                }
                Transition::Completed => {
                    advances += 1;
                    break;
                }
                other => panic!("unexpected transition {other:?}"),
            }
        }
        assert_eq!(advances, actions.len());
    }

    #[test]
    fn failure_without_fallback_is_terminal() {
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Running, 2),
            &report(Cursor::new(1, 0), ActionState::Failed),
        )
        .unwrap();
        assert_eq!(
            t,
            Transition::Terminal {
                state: WorkflowState::Failed
            }
        );
    }

    #[test]
    fn failure_with_fallback_splices() {
        let mut actions = plan();
        actions[0].on_failure = vec!["apply".to_string()];
        let t = decide(
            &actions,
            &snapshot(WorkflowState::Running, ActionState::Running, 0),
            &report(Cursor::origin(), ActionState::Failed),
        )
        .unwrap();
        assert_eq!(
            t,
            Transition::Splice {
                follow_ups: vec!["apply".to_string()]
            }
        );
    }

    #[test]
    fn timeout_uses_its_own_fallback_list() {
        let mut actions = plan();
        actions[0].on_timeout = vec!["apply".to_string()];
        let t = decide(
            &actions,
            &snapshot(WorkflowState::Running, ActionState::Running, 0),
            &report(Cursor::origin(), ActionState::Timeout),
        )
        .unwrap();
        assert_eq!(
            t,
            Transition::Splice {
                follow_ups: vec!["apply".to_string()]
            }
        );

        // No on_timeout list: the workflow times out terminally.
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Running, 0),
            &report(Cursor::origin(), ActionState::Timeout),
        )
        .unwrap();
        assert_eq!(
            t,
            Transition::Terminal {
                state: WorkflowState::Timeout
            }
        );
    }

    #[test]
    fn out_of_order_report_is_rejected() {
        let err = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Running, 1),
            &report(Cursor::new(0, 0), ActionState::Running),
        )
        .unwrap_err();
        match err {
            Error::OutOfOrder { expected, got } => {
                assert_eq!(expected, Cursor::new(0, 1));
                assert_eq!(got, Cursor::new(0, 0));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn terminal_workflow_rejects_all_reports() {
        for state in [
            WorkflowState::Success,
            WorkflowState::Failed,
            WorkflowState::Timeout,
        ] {
            let err = decide(
                &plan(),
                &snapshot(state, ActionState::Success, 3),
                &report(Cursor::new(1, 1), ActionState::Running),
            )
            .unwrap_err();
            assert!(matches!(err, Error::AlreadyTerminal(_)), "got {err:?}");
        }
    }

    #[test]
    fn duplicate_running_report_is_idempotent() {
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Running, 0),
            &report(Cursor::origin(), ActionState::Running),
        )
        .unwrap();
        assert_eq!(t, Transition::Idempotent);
    }

    #[test]
    fn duplicate_success_for_previous_action_is_idempotent() {
        // Cursor already advanced to (0,1); a re-sent success for (0,0)
        // is accepted without effect.
        let t = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Pending, 1),
            &report(Cursor::new(0, 0), ActionState::Success),
        )
        .unwrap();
        assert_eq!(t, Transition::Idempotent);
    }

    #[test]
    fn duplicate_failure_after_splice_is_idempotent() {
        // "prepare" failed, its on_failure splice already moved the
        // cursor onto the spliced copy at (0,1); the worker re-sends the
        // original failure report.
        let mut actions = plan();
        actions[0].on_failure = vec!["apply".to_string()];
        actions.insert(
            1,
            FlatAction {
                global_index: 1,
                cursor: Cursor::new(0, 1),
                task_name: "disk".to_string(),
                action_name: "apply".to_string(),
                on_timeout: vec![],
                on_failure: vec![],
            },
        );
        for (i, action) in actions.iter_mut().enumerate().skip(2) {
            action.global_index = i as i32;
            if action.cursor.task_index == 0 {
                action.cursor.action_index += 1;
            }
        }
        let snap = Snapshot {
            state: WorkflowState::Running,
            action_state: ActionState::Pending,
            cursor: Cursor::new(0, 1),
            global_index: 1,
            total_actions: actions.len() as i32,
        };

        let t = decide(&actions, &snap, &report(Cursor::new(0, 0), ActionState::Failed)).unwrap();
        assert_eq!(t, Transition::Idempotent);
    }

    #[test]
    fn duplicate_timeout_after_splice_is_idempotent() {
        let mut actions = plan();
        actions[0].on_timeout = vec!["apply".to_string()];
        let snap = snapshot(WorkflowState::Running, ActionState::Pending, 1);
        let t = decide(&actions, &snap, &report(Cursor::new(0, 0), ActionState::Timeout)).unwrap();
        assert_eq!(t, Transition::Idempotent);
    }

    #[test]
    fn stale_failure_for_a_succeeded_action_is_rejected() {
        // (0,0) succeeded and the cursor advanced; it declared no
        // on_failure, so a late failure report for it reflects no applied
        // transition and must be rejected.
        let err = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Pending, 1),
            &report(Cursor::new(0, 0), ActionState::Failed),
        )
        .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }), "got {err:?}");
    }

    #[test]
    fn pending_status_cannot_be_reported() {
        let err = decide(
            &plan(),
            &snapshot(WorkflowState::Running, ActionState::Pending, 0),
            &report(Cursor::origin(), ActionState::Pending),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
    }
}
