// Repository layer for database operations
//
// Hardware and template stores live here; the workflow state machine's
// persistence is in workflow_store.rs. All lookups bind user input as
// parameters, never by string interpolation into SQL.

use std::time::Duration;

use ironflow_core::{Error, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

static MIGRATOR: Migrator = sqlx::migrate!();

/// How many times a transient database failure is retried before surfacing
pub(crate) const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply all pending migrations
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::database(format!("migration failed: {}", e)))
    }

    /// Names of migrations declared in the binary but not yet applied
    pub async fn pending_migrations(&self) -> Result<Vec<String>> {
        let applied: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _sqlx_migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await
                .unwrap_or_default();
        Ok(MIGRATOR
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .map(|m| format!("{:04}_{}", m.version, m.description))
            .collect())
    }

    // ============================================
    // Hardware
    // ============================================

    /// Insert or replace a hardware record by ID.
    ///
    /// A push revives a tombstoned record: the machine is back in service.
    pub async fn push_hardware(&self, id: &str, data: &serde_json::Value) -> Result<HardwareRow> {
        let row = sqlx::query_as::<_, HardwareRow>(
            r#"
            INSERT INTO hardware (id, data)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
                SET data = EXCLUDED.data, updated_at = NOW(), deleted_at = NULL
            RETURNING id, data, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(data)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    pub async fn get_hardware(&self, id: &str) -> Result<Option<HardwareRow>> {
        let row = sqlx::query_as::<_, HardwareRow>(
            r#"
            SELECT id, data, created_at, updated_at, deleted_at
            FROM hardware
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    /// Substring lookup over the serialized document, matching any MAC
    pub async fn get_hardware_by_mac(&self, mac: &str) -> Result<Option<HardwareRow>> {
        self.get_hardware_by_fragment(mac).await
    }

    /// Substring lookup over the serialized document, matching any IP
    pub async fn get_hardware_by_ip(&self, ip: &str) -> Result<Option<HardwareRow>> {
        self.get_hardware_by_fragment(ip).await
    }

    async fn get_hardware_by_fragment(&self, fragment: &str) -> Result<Option<HardwareRow>> {
        let pattern = format!("%{}%", like_escape(fragment));
        let row = sqlx::query_as::<_, HardwareRow>(
            r#"
            SELECT id, data, created_at, updated_at, deleted_at
            FROM hardware
            WHERE data::text LIKE $1 AND deleted_at IS NULL
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(&pattern)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    pub async fn list_hardware(&self) -> Result<Vec<HardwareRow>> {
        let rows = sqlx::query_as::<_, HardwareRow>(
            r#"
            SELECT id, data, created_at, updated_at, deleted_at
            FROM hardware
            WHERE deleted_at IS NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows)
    }

    pub async fn delete_hardware(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE hardware
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("hardware {}", id)));
        }
        Ok(())
    }

    // ============================================
    // Templates
    // ============================================

    pub async fn create_template(&self, name: &str, body: &str) -> Result<TemplateRow> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            INSERT INTO templates (id, name, body)
            VALUES ($1, $2, $3)
            RETURNING id, name, body, created_at, updated_at, deleted_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| remap_unique(e, || format!("template {:?}", name)))?;

        Ok(row)
    }

    pub async fn get_template(&self, id: Uuid, include_deleted: bool) -> Result<Option<TemplateRow>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, body, created_at, updated_at, deleted_at
            FROM templates
            WHERE id = $1 AND (deleted_at IS NULL OR $2)
            "#,
        )
        .bind(id)
        .bind(include_deleted)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    pub async fn get_template_by_name(&self, name: &str) -> Result<Option<TemplateRow>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, body, created_at, updated_at, deleted_at
            FROM templates
            WHERE name = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    pub async fn update_template(&self, id: Uuid, body: &str) -> Result<Option<TemplateRow>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            UPDATE templates
            SET body = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, name, body, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(body)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row)
    }

    /// Soft-delete a template by name (the delete RPC addresses by name)
    pub async fn delete_template(&self, name: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE templates
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE name = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("template {:?}", name)));
        }
        Ok(())
    }

    /// List templates, newest first, with an optional name substring filter
    pub async fn list_templates(&self, filter: Option<&str>) -> Result<Vec<TemplateRow>> {
        let rows = match filter {
            Some(fragment) if !fragment.trim().is_empty() => {
                let pattern = format!("%{}%", like_escape(fragment.trim()));
                sqlx::query_as::<_, TemplateRow>(
                    r#"
                    SELECT id, name, body, created_at, updated_at, deleted_at
                    FROM templates
                    WHERE name LIKE $1 AND deleted_at IS NULL
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(&pattern)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?
            }
            _ => {
                sqlx::query_as::<_, TemplateRow>(
                    r#"
                    SELECT id, name, body, created_at, updated_at, deleted_at
                    FROM templates
                    WHERE deleted_at IS NULL
                    ORDER BY created_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?
            }
        };

        Ok(rows)
    }
}

/// Escape LIKE wildcards so lookup fragments match literally
pub(crate) fn like_escape(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Map a sqlx error to the engine taxonomy.
///
/// Integrity violations become domain errors; everything else is a
/// database error whose cause stays in the logs, not in client responses.
pub(crate) fn map_sqlx(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::not_found("record"),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => Error::already_exists(
                db.constraint().unwrap_or("record").to_string(),
            ),
            Some("23503") => Error::not_found(
                db.constraint().unwrap_or("referenced record").to_string(),
            ),
            Some("23514") | Some("22001") => Error::invalid_argument(db.message().to_string()),
            _ => {
                tracing::error!(error = %err, "database error");
                Error::database(err.to_string())
            }
        },
        _ => {
            tracing::error!(error = %err, "database error");
            Error::database(err.to_string())
        }
    }
}

/// Like `map_sqlx`, but gives unique violations a caller-supplied identity
pub(crate) fn remap_unique(err: sqlx::Error, what: impl Fn() -> String) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return Error::already_exists(what());
        }
    }
    map_sqlx(err)
}

/// Serialization failures, deadlocks and connection drops are worth a retry
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

/// Exponential backoff with jitter between transient-error retries
pub(crate) async fn backoff_delay(attempt: u32) {
    use rand::Rng;
    let base = Duration::from_millis(50) * 2u32.saturating_pow(attempt);
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    let delay = base.mul_f64(1.0 + jitter);
    tokio::time::sleep(delay.min(Duration::from_secs(2))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escape_neutralizes_wildcards() {
        assert_eq!(like_escape("aa:bb"), "aa:bb");
        assert_eq!(like_escape("10.0.0.%"), "10.0.0.\\%");
        assert_eq!(like_escape("a_b"), "a\\_b");
        assert_eq!(like_escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn transient_classification_covers_conflict_codes() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }
}
