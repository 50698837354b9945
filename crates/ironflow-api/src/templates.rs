// Template CRUD HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use ironflow_contracts::{ListResponse, Template};
use ironflow_core::{Error, MAX_NAME_LEN};
use ironflow_storage::TemplateRow;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::common::{ApiResult, AppState};

/// Request to create a template
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTemplateRequest {
    /// Unique template name.
    #[schema(example = "ubuntu-provision")]
    pub name: String,
    /// Template YAML body with render placeholders.
    pub body: String,
}

/// Request to replace a template's body
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTemplateRequest {
    pub body: String,
}

/// Query parameters for listing templates
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTemplatesParams {
    /// Substring filter on the template name.
    pub name: Option<String>,
}

/// Query parameters for fetching a template
#[derive(Debug, Deserialize, IntoParams)]
pub struct GetTemplateParams {
    /// Include tombstoned templates.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Create template routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/templates", get(list_templates).post(create_template))
        .route(
            "/v1/templates/:template_id",
            get(get_template).patch(update_template),
        )
        .route(
            "/v1/templates/name/:name",
            get(get_template_by_name).delete(delete_template),
        )
        .with_state(state)
}

/// POST /v1/templates - Create a template
#[utoipa::path(
    post,
    path = "/v1/templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = Template),
        (status = 400, description = "Invalid name or body"),
        (status = 409, description = "Name already in use")
    ),
    tag = "templates"
)]
pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    validate_name(&req.name)?;
    if req.body.trim().is_empty() {
        return Err(Error::invalid_argument("template body must not be empty").into());
    }

    let row = state.db.create_template(&req.name, &req.body).await?;
    tracing::info!(template_id = %row.id, name = %row.name, "created template");
    Ok((StatusCode::CREATED, Json(to_template(row))))
}

/// GET /v1/templates - List templates
#[utoipa::path(
    get,
    path = "/v1/templates",
    params(ListTemplatesParams),
    responses(
        (status = 200, description = "Templates", body = ListResponse<Template>)
    ),
    tag = "templates"
)]
pub async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<ListTemplatesParams>,
) -> ApiResult<Json<ListResponse<Template>>> {
    let rows = state.db.list_templates(params.name.as_deref()).await?;
    Ok(Json(
        rows.into_iter().map(to_template).collect::<Vec<_>>().into(),
    ))
}

/// GET /v1/templates/{template_id} - Get a template by ID
#[utoipa::path(
    get,
    path = "/v1/templates/{template_id}",
    params(
        ("template_id" = Uuid, Path, description = "Template ID"),
        GetTemplateParams
    ),
    responses(
        (status = 200, description = "Template", body = Template),
        (status = 404, description = "Template not found")
    ),
    tag = "templates"
)]
pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Query(params): Query<GetTemplateParams>,
) -> ApiResult<Json<Template>> {
    let row = state
        .db
        .get_template(template_id, params.include_deleted)
        .await?
        .ok_or_else(|| Error::not_found(format!("template {}", template_id)))?;
    Ok(Json(to_template(row)))
}

/// GET /v1/templates/name/{name} - Get a template by name
#[utoipa::path(
    get,
    path = "/v1/templates/name/{name}",
    params(("name" = String, Path, description = "Template name")),
    responses(
        (status = 200, description = "Template", body = Template),
        (status = 404, description = "Template not found")
    ),
    tag = "templates"
)]
pub async fn get_template_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Template>> {
    let row = state
        .db
        .get_template_by_name(&name)
        .await?
        .ok_or_else(|| Error::not_found(format!("template {:?}", name)))?;
    Ok(Json(to_template(row)))
}

/// PATCH /v1/templates/{template_id} - Replace a template's body
#[utoipa::path(
    patch,
    path = "/v1/templates/{template_id}",
    request_body = UpdateTemplateRequest,
    params(("template_id" = Uuid, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Updated template", body = Template),
        (status = 404, description = "Template not found")
    ),
    tag = "templates"
)]
pub async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(req): Json<UpdateTemplateRequest>,
) -> ApiResult<Json<Template>> {
    if req.body.trim().is_empty() {
        return Err(Error::invalid_argument("template body must not be empty").into());
    }
    let row = state
        .db
        .update_template(template_id, &req.body)
        .await?
        .ok_or_else(|| Error::not_found(format!("template {}", template_id)))?;
    tracing::info!(template_id = %row.id, "updated template");
    Ok(Json(to_template(row)))
}

/// DELETE /v1/templates/name/{name} - Soft-delete a template by name
#[utoipa::path(
    delete,
    path = "/v1/templates/name/{name}",
    params(("name" = String, Path, description = "Template name")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 404, description = "Template not found")
    ),
    tag = "templates"
)]
pub async fn delete_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.delete_template(&name).await?;
    tracing::info!(name = %name, "deleted template");
    Ok(StatusCode::NO_CONTENT)
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::invalid_argument("template name must not be empty"));
    }
    if name.len() >= MAX_NAME_LEN {
        return Err(Error::invalid_argument(format!(
            "template name must be shorter than {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

pub(crate) fn to_template(row: TemplateRow) -> Template {
    Template {
        id: row.id,
        name: row.name,
        body: row.body,
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    }
}
