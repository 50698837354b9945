// Workflow persistence and state transitions
//
// Creation inserts the workflow row, the flattened plan and the worker
// index in one transaction. Report application locks the workflow row
// (SELECT ... FOR UPDATE), asks the pure state machine for a decision and
// applies it together with the event append before committing, so the
// event log order always matches the transition order.

use ironflow_core::machine::{self, FlatAction, Snapshot, Transition};
use ironflow_core::{Error, Result, WorkflowPlan};
use uuid::Uuid;

use crate::models::*;
use crate::repositories::{backoff_delay, is_transient, map_sqlx, Database, MAX_ATTEMPTS};

const WORKFLOW_COLUMNS: &str = "id, template_id, hardware_id, rendered_yaml, state, \
     current_worker, current_task, current_action, current_action_state, \
     cursor_task_index, cursor_action_index, current_action_index, total_actions, \
     global_timeout_seconds, started_at, action_started_at, data_version, \
     created_at, updated_at, deleted_at";

const ACTION_COLUMNS: &str = "workflow_id, global_index, task_index, action_index, \
     task_name, action_name, worker_addr, image, timeout_seconds, command, \
     environment, volumes, pid, on_timeout, on_failure";

/// Failure inside a transaction: either the database or the protocol said no.
/// Only database failures are candidates for a transparent retry.
pub(crate) enum TxError {
    Sql(sqlx::Error),
    Domain(Error),
}

impl From<sqlx::Error> for TxError {
    fn from(e: sqlx::Error) -> Self {
        TxError::Sql(e)
    }
}

impl From<Error> for TxError {
    fn from(e: Error) -> Self {
        TxError::Domain(e)
    }
}

impl Database {
    // ============================================
    // Workflows
    // ============================================

    /// Create a workflow from a rendered plan.
    ///
    /// Inserts the workflow row, one `workflow_actions` row per action in
    /// execution order, and the worker index entries, all in one
    /// transaction. The current pointer starts at the first action.
    pub async fn create_workflow(
        &self,
        input: &CreateWorkflow,
        plan: &WorkflowPlan,
    ) -> Result<WorkflowRow> {
        let mut attempt = 0;
        loop {
            match self.try_create_workflow(input, plan).await {
                Ok(row) => return Ok(row),
                Err(TxError::Sql(e)) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(workflow_id = %input.id, error = %e, attempt, "transient error creating workflow, retrying");
                    backoff_delay(attempt).await;
                }
                Err(TxError::Sql(e)) => return Err(map_sqlx(e)),
                Err(TxError::Domain(e)) => return Err(e),
            }
        }
    }

    async fn try_create_workflow(
        &self,
        input: &CreateWorkflow,
        plan: &WorkflowPlan,
    ) -> std::result::Result<WorkflowRow, TxError> {
        let actions = flatten_plan(plan);
        let first = actions
            .first()
            .ok_or_else(|| Error::invalid_argument("plan has no actions"))?;

        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            INSERT INTO workflows (
                id, template_id, hardware_id, rendered_yaml,
                current_worker, current_task, current_action,
                total_actions, global_timeout_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(input.id)
        .bind(input.template_id)
        .bind(&input.hardware_id)
        .bind(&input.rendered_yaml)
        .bind(&first.worker_addr)
        .bind(&first.task_name)
        .bind(&first.action_name)
        .bind(actions.len() as i32)
        .bind(plan.global_timeout.unwrap_or(0) as i64)
        .fetch_one(&mut *tx)
        .await?;

        for action in &actions {
            insert_action(&mut tx, input.id, action).await?;
        }

        let mut workers: Vec<&str> = actions.iter().map(|a| a.worker_addr.as_str()).collect();
        workers.sort_unstable();
        workers.dedup();
        for worker in workers {
            sqlx::query(
                r#"
                INSERT INTO workflow_workers (worker_addr, workflow_id)
                VALUES ($1, $2)
                "#,
            )
            .bind(worker)
            .bind(input.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE id = $1 AND deleted_at IS NULL
            "#
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    /// List non-deleted workflows ordered by creation time
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowRow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE deleted_at IS NULL
            ORDER BY created_at
            "#
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(rows)
    }

    pub async fn delete_workflow(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("workflow {}", id)));
        }

        sqlx::query("DELETE FROM workflow_workers WHERE workflow_id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    /// The flattened plan in execution order
    pub async fn get_workflow_actions(&self, id: Uuid) -> Result<Vec<WorkflowActionRow>> {
        let rows = sqlx::query_as::<_, WorkflowActionRow>(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM workflow_actions
            WHERE workflow_id = $1
            ORDER BY global_index
            "#
        ))
        .bind(id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(rows)
    }

    /// Non-terminal workflow IDs a worker participates in
    pub async fn workflows_for_worker(&self, worker_addr: &str) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT w.id
            FROM workflow_workers ww
            JOIN workflows w ON w.id = ww.workflow_id
            WHERE ww.worker_addr = $1
              AND w.state IN ('pending', 'running')
              AND w.deleted_at IS NULL
            ORDER BY w.created_at
            "#,
        )
        .bind(worker_addr)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(ids)
    }

    // ============================================
    // Action status reports
    // ============================================

    /// Apply a worker's (or the sweep's) action status report.
    ///
    /// Returns the workflow row as committed. Rejected reports (out of
    /// order, terminal workflow, unknown workflow) leave no trace.
    pub async fn report_action_status(
        &self,
        workflow_id: Uuid,
        report: &ActionReport,
    ) -> Result<WorkflowRow> {
        let mut attempt = 0;
        loop {
            match self.try_report(workflow_id, report).await {
                Ok(row) => return Ok(row),
                Err(TxError::Sql(e)) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(%workflow_id, error = %e, attempt, "transient error applying report, retrying");
                    backoff_delay(attempt).await;
                }
                Err(TxError::Sql(e)) => return Err(map_sqlx(e)),
                Err(TxError::Domain(e)) => return Err(e),
            }
        }
    }

    async fn try_report(
        &self,
        workflow_id: Uuid,
        report: &ActionReport,
    ) -> std::result::Result<WorkflowRow, TxError> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#
        ))
        .bind(workflow_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("workflow {}", workflow_id)))?;

        let action_rows = sqlx::query_as::<_, WorkflowActionRow>(&format!(
            r#"
            SELECT {ACTION_COLUMNS}
            FROM workflow_actions
            WHERE workflow_id = $1
            ORDER BY global_index
            "#
        ))
        .bind(workflow_id)
        .fetch_all(&mut *tx)
        .await?;

        let flat: Vec<FlatAction> = action_rows
            .iter()
            .map(|a| FlatAction {
                global_index: a.global_index,
                cursor: a.cursor(),
                task_name: a.task_name.clone(),
                action_name: a.action_name.clone(),
                on_timeout: a.on_timeout_list(),
                on_failure: a.on_failure_list(),
            })
            .collect();

        let snapshot = Snapshot {
            state: row.workflow_state()?,
            action_state: row.action_state()?,
            cursor: row.cursor(),
            global_index: row.current_action_index,
            total_actions: row.total_actions,
        };

        let transition = machine::decide(
            &flat,
            &snapshot,
            &machine::Report {
                cursor: report.cursor,
                status: report.status,
            },
        )?;

        // A live report must name the action it claims to be about.
        if transition != Transition::Idempotent {
            let current = &action_rows[row.current_action_index as usize];
            if report.task_name != current.task_name || report.action_name != current.action_name {
                return Err(Error::invalid_argument(format!(
                    "report names {}/{} but the current action is {}/{}",
                    report.task_name, report.action_name, current.task_name, current.action_name
                ))
                .into());
            }
        }

        match &transition {
            Transition::Idempotent => {}
            Transition::ActionStarted => {
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET state = 'running',
                        current_action_state = 'running',
                        started_at = COALESCE(started_at, NOW()),
                        action_started_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(workflow_id)
                .execute(&mut *tx)
                .await?;
            }
            Transition::Advance { next_global } => {
                let next = &action_rows[*next_global as usize];
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET state = 'running',
                        current_action_state = 'pending',
                        cursor_task_index = $2,
                        cursor_action_index = $3,
                        current_action_index = $4,
                        current_worker = $5,
                        current_task = $6,
                        current_action = $7,
                        started_at = COALESCE(started_at, NOW()),
                        action_started_at = NULL,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(workflow_id)
                .bind(next.task_index)
                .bind(next.action_index)
                .bind(next.global_index)
                .bind(&next.worker_addr)
                .bind(&next.task_name)
                .bind(&next.action_name)
                .execute(&mut *tx)
                .await?;
            }
            Transition::Completed => {
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET state = 'success',
                        current_action_state = 'success',
                        current_action_index = total_actions,
                        action_started_at = NULL,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(workflow_id)
                .execute(&mut *tx)
                .await?;
                prune_worker_index(&mut tx, workflow_id).await?;
            }
            Transition::Terminal { state } => {
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET state = $2,
                        current_action_state = $3,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(workflow_id)
                .bind(state.as_str())
                .bind(report.status.as_str())
                .execute(&mut *tx)
                .await?;
                prune_worker_index(&mut tx, workflow_id).await?;
            }
            Transition::Splice { follow_ups } => {
                splice_follow_ups(&mut tx, &row, &action_rows, follow_ups).await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO workflow_events
                (workflow_id, worker_id, task_name, action_name, action_status, seconds, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(workflow_id)
        .bind(&report.worker_id)
        .bind(&report.task_name)
        .bind(&report.action_name)
        .bind(report.status.as_str())
        .bind(report.seconds)
        .bind(&report.message)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(workflow_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            %workflow_id,
            status = %report.status,
            state = %updated.state,
            action_index = updated.current_action_index,
            "applied action report"
        );
        Ok(updated)
    }

    // ============================================
    // Workflow data blob
    // ============================================

    pub async fn get_workflow_data(&self, id: Uuid) -> Result<(Vec<u8>, i64)> {
        let row: Option<(Vec<u8>, i64)> = sqlx::query_as(
            r#"
            SELECT data_blob, data_version
            FROM workflows
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx)?;

        row.ok_or_else(|| Error::not_found(format!("workflow {}", id)))
    }

    /// Compare-and-swap write of the data blob.
    ///
    /// Succeeds only when `expected_version` matches the stored version;
    /// the stored version then increments by exactly one.
    pub async fn put_workflow_data(
        &self,
        id: Uuid,
        expected_version: i64,
        blob: &[u8],
    ) -> Result<i64> {
        let mut attempt = 0;
        loop {
            match self.try_put_data(id, expected_version, blob).await {
                Ok(version) => return Ok(version),
                Err(TxError::Sql(e)) if is_transient(&e) && attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(workflow_id = %id, error = %e, attempt, "transient error writing workflow data, retrying");
                    backoff_delay(attempt).await;
                }
                Err(TxError::Sql(e)) => return Err(map_sqlx(e)),
                Err(TxError::Domain(e)) => return Err(e),
            }
        }
    }

    async fn try_put_data(
        &self,
        id: Uuid,
        expected_version: i64,
        blob: &[u8],
    ) -> std::result::Result<i64, TxError> {
        let mut tx = self.pool().begin().await?;

        let actual: i64 = sqlx::query_scalar(
            r#"
            SELECT data_version
            FROM workflows
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("workflow {}", id)))?;

        if actual != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual,
            }
            .into());
        }

        let new_version: i64 = sqlx::query_scalar(
            r#"
            UPDATE workflows
            SET data_blob = $2, data_version = data_version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING data_version
            "#,
        )
        .bind(id)
        .bind(blob)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_version)
    }

    // ============================================
    // Events
    // ============================================

    /// Events for a workflow in insertion order, after the given event ID.
    /// Pass 0 to read from the beginning; the SSE stream polls with the
    /// last ID it delivered.
    pub async fn list_events_after(
        &self,
        workflow_id: Uuid,
        after_id: i64,
    ) -> Result<Vec<WorkflowEventRow>> {
        let rows = sqlx::query_as::<_, WorkflowEventRow>(
            r#"
            SELECT id, workflow_id, worker_id, task_name, action_name,
                   action_status, seconds, message, created_at
            FROM workflow_events
            WHERE workflow_id = $1 AND id > $2
            ORDER BY id
            "#,
        )
        .bind(workflow_id)
        .bind(after_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(rows)
    }

    // ============================================
    // Timeout sweep
    // ============================================

    /// Running actions whose per-action timeout has expired
    pub async fn expired_actions(&self) -> Result<Vec<ExpiredAction>> {
        let rows = sqlx::query_as::<_, ExpiredAction>(
            r#"
            SELECT w.id AS workflow_id,
                   COALESCE(w.current_worker, '') AS worker_id,
                   COALESCE(w.current_task, '') AS task_name,
                   COALESCE(w.current_action, '') AS action_name,
                   w.cursor_task_index,
                   w.cursor_action_index,
                   EXTRACT(EPOCH FROM (NOW() - w.action_started_at))::BIGINT AS seconds_running
            FROM workflows w
            JOIN workflow_actions a
              ON a.workflow_id = w.id AND a.global_index = w.current_action_index
            WHERE w.state = 'running'
              AND w.current_action_state = 'running'
              AND w.deleted_at IS NULL
              AND w.action_started_at IS NOT NULL
              AND a.timeout_seconds > 0
              AND w.action_started_at + make_interval(secs => a.timeout_seconds::double precision) < NOW()
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(rows)
    }

    /// Terminate workflows whose global timeout has expired.
    /// Returns the IDs of the workflows that were timed out.
    pub async fn expire_global_timeouts(&self) -> Result<Vec<Uuid>> {
        let candidates: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM workflows
            WHERE state IN ('pending', 'running')
              AND deleted_at IS NULL
              AND global_timeout_seconds > 0
              AND COALESCE(started_at, created_at)
                  + make_interval(secs => global_timeout_seconds::double precision) < NOW()
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx)?;

        let mut expired = Vec::new();
        for id in candidates {
            match self.try_expire_global(id).await {
                Ok(true) => expired.push(id),
                Ok(false) => {}
                Err(TxError::Sql(e)) => return Err(map_sqlx(e)),
                Err(TxError::Domain(e)) => return Err(e),
            }
        }
        Ok(expired)
    }

    async fn try_expire_global(&self, id: Uuid) -> std::result::Result<bool, TxError> {
        let mut tx = self.pool().begin().await?;

        // Re-check under lock: a report may have finished the workflow
        // between the candidate scan and now.
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            r#"
            SELECT {WORKFLOW_COLUMNS}
            FROM workflows
            WHERE id = $1
              AND state IN ('pending', 'running')
              AND deleted_at IS NULL
              AND global_timeout_seconds > 0
              AND COALESCE(started_at, created_at)
                  + make_interval(secs => global_timeout_seconds::double precision) < NOW()
            FOR UPDATE
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE workflows
            SET state = 'timeout', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_events
                (workflow_id, worker_id, task_name, action_name, action_status, seconds, message)
            VALUES ($1, $2, $3, $4, 'timeout', $5, 'workflow exceeded its global timeout')
            "#,
        )
        .bind(id)
        .bind(row.current_worker.as_deref().unwrap_or(""))
        .bind(row.current_task.as_deref().unwrap_or(""))
        .bind(row.current_action.as_deref().unwrap_or(""))
        .bind(row.global_timeout_seconds)
        .execute(&mut *tx)
        .await?;

        prune_worker_index(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(workflow_id = %id, "workflow exceeded its global timeout");
        Ok(true)
    }
}

async fn prune_worker_index(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM workflow_workers WHERE workflow_id = $1")
        .bind(workflow_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Splice copies of the named follow-up actions in immediately after the
/// current action, renumbering everything behind them, and move the
/// cursor onto the first copy.
async fn splice_follow_ups(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    row: &WorkflowRow,
    action_rows: &[WorkflowActionRow],
    follow_ups: &[String],
) -> std::result::Result<(), TxError> {
    let current = &action_rows[row.current_action_index as usize];
    let n = follow_ups.len() as i32;

    // Shift the global indices of everything after the current action.
    // The sign flip keeps the primary key unique mid-update.
    sqlx::query(
        r#"
        UPDATE workflow_actions
        SET global_index = -(global_index + $3)
        WHERE workflow_id = $1 AND global_index > $2
        "#,
    )
    .bind(row.id)
    .bind(current.global_index)
    .bind(n)
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        r#"
        UPDATE workflow_actions
        SET global_index = -global_index
        WHERE workflow_id = $1 AND global_index < 0
        "#,
    )
    .bind(row.id)
    .execute(&mut **tx)
    .await?;

    // Shift in-task indices of the current task's later actions.
    sqlx::query(
        r#"
        UPDATE workflow_actions
        SET action_index = action_index + $4
        WHERE workflow_id = $1 AND task_index = $2 AND action_index > $3
        "#,
    )
    .bind(row.id)
    .bind(current.task_index)
    .bind(current.action_index)
    .bind(n)
    .execute(&mut **tx)
    .await?;

    for (offset, name) in follow_ups.iter().enumerate() {
        // Parse validation guarantees the name resolves within the task.
        let source = action_rows
            .iter()
            .find(|a| a.task_index == current.task_index && a.action_name == *name)
            .ok_or_else(|| {
                Error::Internal(anyhow::anyhow!(
                    "follow-up action {:?} missing from task {:?}",
                    name,
                    current.task_name
                ))
            })?;

        sqlx::query(
            r#"
            INSERT INTO workflow_actions
                (workflow_id, global_index, task_index, action_index, task_name,
                 action_name, worker_addr, image, timeout_seconds, command,
                 environment, volumes, pid, on_timeout, on_failure)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(row.id)
        .bind(current.global_index + 1 + offset as i32)
        .bind(current.task_index)
        .bind(current.action_index + 1 + offset as i32)
        .bind(&current.task_name)
        .bind(&source.action_name)
        .bind(&source.worker_addr)
        .bind(&source.image)
        .bind(source.timeout_seconds)
        .bind(&source.command)
        .bind(&source.environment)
        .bind(&source.volumes)
        .bind(&source.pid)
        .bind(&source.on_timeout)
        .bind(&source.on_failure)
        .execute(&mut **tx)
        .await?;
    }

    // The cursor moves onto the first spliced copy.
    sqlx::query(
        r#"
        UPDATE workflows
        SET current_action_state = 'pending',
            cursor_action_index = $2,
            current_action_index = $3,
            current_action = $4,
            total_actions = total_actions + $5,
            action_started_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(current.action_index + 1)
    .bind(current.global_index + 1)
    .bind(&follow_ups[0])
    .bind(n)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// A plan action flattened into execution order with task-level volumes
/// and environment already merged in
struct NewAction {
    global_index: i32,
    task_index: i32,
    action_index: i32,
    task_name: String,
    action_name: String,
    worker_addr: String,
    image: String,
    timeout_seconds: i64,
    command: serde_json::Value,
    environment: serde_json::Value,
    volumes: serde_json::Value,
    pid: Option<String>,
    on_timeout: serde_json::Value,
    on_failure: serde_json::Value,
}

fn flatten_plan(plan: &WorkflowPlan) -> Vec<NewAction> {
    let mut out = Vec::new();
    let mut global_index = 0i32;
    for (task_index, task) in plan.tasks.iter().enumerate() {
        for (action_index, action) in task.actions.iter().enumerate() {
            out.push(NewAction {
                global_index,
                task_index: task_index as i32,
                action_index: action_index as i32,
                task_name: task.name.clone(),
                action_name: action.name.clone(),
                worker_addr: task.worker.clone(),
                image: action.image.clone(),
                timeout_seconds: action.timeout.unwrap_or(0) as i64,
                command: serde_json::json!(action.command.clone().unwrap_or_default()),
                environment: serde_json::json!(task.merged_environment(action)),
                volumes: serde_json::json!(task.merged_volumes(action)),
                pid: action.pid.map(|p| match p {
                    ironflow_core::PidMode::Host => "host".to_string(),
                    ironflow_core::PidMode::Container => "container".to_string(),
                }),
                on_timeout: serde_json::json!(action.on_timeout.clone().unwrap_or_default()),
                on_failure: serde_json::json!(action.on_failure.clone().unwrap_or_default()),
            });
            global_index += 1;
        }
    }
    out
}

async fn insert_action(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
    action: &NewAction,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workflow_actions
            (workflow_id, global_index, task_index, action_index, task_name,
             action_name, worker_addr, image, timeout_seconds, command,
             environment, volumes, pid, on_timeout, on_failure)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(workflow_id)
    .bind(action.global_index)
    .bind(action.task_index)
    .bind(action.action_index)
    .bind(&action.task_name)
    .bind(&action.action_name)
    .bind(&action.worker_addr)
    .bind(&action.image)
    .bind(action.timeout_seconds)
    .bind(&action.command)
    .bind(&action.environment)
    .bind(&action.volumes)
    .bind(&action.pid)
    .bind(&action.on_timeout)
    .bind(&action.on_failure)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
