// Workflow plan schema: parsing and structural validation
//
// A plan is the fully-grounded form of a template. Parsing is strict:
// unknown fields are rejected so operator typos surface at create time
// instead of silently changing execution.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image;

/// The only plan schema version this engine executes
pub const PLAN_VERSION: &str = "0.1";

/// Upper bound (exclusive) on workflow, task and action name lengths
pub const MAX_NAME_LEN: usize = 200;

/// A fully-rendered, hardware-bound execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowPlan {
    pub version: String,
    pub name: String,
    /// Whole-workflow deadline in seconds; absent or 0 means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timeout: Option<u64>,
    pub tasks: Vec<Task>,
}

/// An ordered group of actions executed by a single worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub name: String,
    /// MAC or IP selecting the worker that runs this task
    pub worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    pub actions: Vec<Action>,
}

/// A single container invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Action {
    pub name: String,
    pub image: String,
    /// Per-action deadline in seconds; absent or 0 means no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Follow-up action names (within the same task) run when this action times out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_timeout: Option<Vec<String>>,
    /// Follow-up action names (within the same task) run when this action fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<PidMode>,
}

/// PID namespace the action container joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidMode {
    Host,
    Container,
}

impl Task {
    /// Environment for an action, action entries overriding task entries
    pub fn merged_environment(&self, action: &Action) -> BTreeMap<String, String> {
        let mut env = self.environment.clone().unwrap_or_default();
        if let Some(extra) = &action.environment {
            env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }

    /// Volumes for an action: task volumes first, then action volumes
    pub fn merged_volumes(&self, action: &Action) -> Vec<String> {
        let mut volumes = self.volumes.clone().unwrap_or_default();
        if let Some(extra) = &action.volumes {
            volumes.extend(extra.iter().cloned());
        }
        volumes
    }
}

/// Parse and validate a workflow plan from YAML
pub fn parse(yaml: &str) -> Result<WorkflowPlan> {
    let plan: WorkflowPlan =
        serde_yaml::from_str(yaml).map_err(|e| Error::parse("document", e.to_string()))?;
    validate(&plan)?;
    Ok(plan)
}

/// Serialize a plan back to YAML
pub fn to_yaml(plan: &WorkflowPlan) -> Result<String> {
    serde_yaml::to_string(plan).map_err(|e| Error::parse("document", e.to_string()))
}

fn validate(plan: &WorkflowPlan) -> Result<()> {
    if plan.version != PLAN_VERSION {
        return Err(Error::parse(
            "version",
            format!("expected {:?}, got {:?}", PLAN_VERSION, plan.version),
        ));
    }
    validate_name("name", &plan.name)?;
    if plan.tasks.is_empty() {
        return Err(Error::parse("tasks", "at least one task is required"));
    }

    let mut task_names = HashSet::new();
    for task in &plan.tasks {
        validate_name("tasks.name", &task.name)?;
        if !task_names.insert(task.name.as_str()) {
            return Err(Error::parse(
                "tasks.name",
                format!("duplicate task name {:?}", task.name),
            ));
        }
        validate_task(task)?;
    }
    Ok(())
}

fn validate_task(task: &Task) -> Result<()> {
    if task.actions.is_empty() {
        return Err(Error::parse(
            "tasks.actions",
            format!("task {:?} requires at least one action", task.name),
        ));
    }

    let mut action_names = HashSet::new();
    for action in &task.actions {
        validate_name("tasks.actions.name", &action.name)?;
        if !action_names.insert(action.name.as_str()) {
            return Err(Error::parse(
                "tasks.actions.name",
                format!(
                    "duplicate action name {:?} in task {:?}",
                    action.name, task.name
                ),
            ));
        }
        image::Reference::parse(&action.image).map_err(|reason| {
            Error::parse(
                "tasks.actions.image",
                format!("action {:?}: {}", action.name, reason),
            )
        })?;
    }

    // Follow-up lists must name actions defined in the same task, or a
    // failure at runtime would have nothing to splice in.
    for action in &task.actions {
        for (field, list) in [
            ("tasks.actions.on_timeout", &action.on_timeout),
            ("tasks.actions.on_failure", &action.on_failure),
        ] {
            if let Some(names) = list {
                for name in names {
                    if !action_names.contains(name.as_str()) {
                        return Err(Error::parse(
                            field,
                            format!(
                                "action {:?} references unknown action {:?}",
                                action.name, name
                            ),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::parse(field, "must not be empty"));
    }
    if name.len() >= MAX_NAME_LEN {
        return Err(Error::parse(
            field,
            format!("must be shorter than {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "0.1"
name: provision
global_timeout: 600
tasks:
  - name: os-install
    worker: "AA:AA:AA:AA:AA:AA"
    volumes:
      - /dev:/dev
    environment:
      MIRROR_HOST: 192.168.1.2
    actions:
      - name: stream-image
        image: quay.io/example/image2disk:v1.0.0
        timeout: 300
        environment:
          IMG_URL: http://192.168.1.2/ubuntu.raw.gz
      - name: write-netplan
        image: writefile:v1
        timeout: 90
        command: ["write", "--path", "/etc/netplan/config.yaml"]
"#;

    #[test]
    fn parses_valid_plan() {
        let plan = parse(VALID).unwrap();
        assert_eq!(plan.name, "provision");
        assert_eq!(plan.global_timeout, Some(600));
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].actions.len(), 2);
        assert_eq!(
            plan.tasks[0].actions[1].command.as_deref(),
            Some(&["write".to_string(), "--path".into(), "/etc/netplan/config.yaml".into()][..])
        );
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = VALID.replace("global_timeout", "globel_timeout");
        let err = parse(&yaml).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn rejects_wrong_version() {
        let yaml = VALID.replace("\"0.1\"", "\"0.2\"");
        match parse(&yaml).unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "version"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_name() {
        let yaml = VALID.replace("name: provision", "name: \"\"");
        match parse(&yaml).unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "name"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_name() {
        let yaml = VALID.replace("name: provision", &format!("name: {}", "x".repeat(200)));
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn rejects_duplicate_task_names() {
        let yaml = r#"
version: "0.1"
name: wf
tasks:
  - name: t
    worker: w
    actions:
      - name: a
        image: alpine
  - name: t
    worker: w
    actions:
      - name: a
        image: alpine
"#;
        match parse(yaml).unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "tasks.name"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_action_names_within_task() {
        let yaml = r#"
version: "0.1"
name: wf
tasks:
  - name: t
    worker: w
    actions:
      - name: a
        image: alpine
      - name: a
        image: alpine
"#;
        match parse(yaml).unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "tasks.actions.name"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_tasks_and_actions() {
        let no_tasks = "version: \"0.1\"\nname: wf\ntasks: []\n";
        assert!(parse(no_tasks).is_err());

        let no_actions = r#"
version: "0.1"
name: wf
tasks:
  - name: t
    worker: w
    actions: []
"#;
        assert!(parse(no_actions).is_err());
    }

    #[test]
    fn rejects_invalid_image() {
        let yaml = VALID.replace("writefile:v1", "Writefile::bad");
        match parse(&yaml).unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "tasks.actions.image"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_follow_up_reference() {
        let yaml = r#"
version: "0.1"
name: wf
tasks:
  - name: t
    worker: w
    actions:
      - name: a
        image: alpine
        on_failure: [missing]
"#;
        match parse(yaml).unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "tasks.actions.on_failure"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parse_is_idempotent_through_serialization() {
        let plan = parse(VALID).unwrap();
        let reserialized = to_yaml(&plan).unwrap();
        let reparsed = parse(&reserialized).unwrap();
        assert_eq!(plan, reparsed);
    }

    #[test]
    fn merged_environment_prefers_action_entries() {
        let plan = parse(VALID).unwrap();
        let task = &plan.tasks[0];
        let env = task.merged_environment(&task.actions[0]);
        assert_eq!(env.get("MIRROR_HOST").unwrap(), "192.168.1.2");
        assert_eq!(env.get("IMG_URL").unwrap(), "http://192.168.1.2/ubuntu.raw.gz");
    }

    #[test]
    fn pid_mode_round_trips() {
        let yaml = VALID.replace("timeout: 90", "timeout: 90\n        pid: host");
        let plan = parse(&yaml).unwrap();
        assert_eq!(plan.tasks[0].actions[1].pid, Some(PidMode::Host));
    }
}
