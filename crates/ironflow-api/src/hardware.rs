// Hardware inventory HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use ironflow_contracts::{Hardware, ListResponse};
use ironflow_core::{render::interfaces, Error};
use ironflow_storage::HardwareRow;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::common::{ApiResult, AppState};

/// Request to push (insert or replace) a hardware record
#[derive(Debug, Deserialize, ToSchema)]
pub struct PushHardwareRequest {
    /// Machine description. Must carry an `id` field and at least one
    /// network interface with a MAC or IP.
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

/// Create hardware routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/hardware", get(list_hardware).post(push_hardware))
        .route(
            "/v1/hardware/:hardware_id",
            get(get_hardware).delete(delete_hardware),
        )
        .route("/v1/hardware/mac/:mac", get(get_hardware_by_mac))
        .route("/v1/hardware/ip/:ip", get(get_hardware_by_ip))
        .with_state(state)
}

/// POST /v1/hardware - Push a hardware record
#[utoipa::path(
    post,
    path = "/v1/hardware",
    request_body = PushHardwareRequest,
    responses(
        (status = 201, description = "Hardware stored", body = Hardware),
        (status = 400, description = "Record is missing id or lookup keys")
    ),
    tag = "hardware"
)]
pub async fn push_hardware(
    State(state): State<AppState>,
    Json(req): Json<PushHardwareRequest>,
) -> ApiResult<(StatusCode, Json<Hardware>)> {
    let id = req
        .data
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::invalid_argument("hardware record requires a string `id` field"))?
        .to_string();

    // Without at least one MAC or IP the record could never be selected
    // by a template or matched to a worker.
    let keys = interfaces(&req.data);
    if !keys.iter().any(|(mac, ip)| !mac.is_empty() || ip.is_some()) {
        return Err(Error::invalid_argument(
            "hardware record must carry at least one interface MAC or IP",
        )
        .into());
    }

    let row = state.db.push_hardware(&id, &req.data).await?;
    tracing::info!(hardware_id = %row.id, "pushed hardware");
    Ok((StatusCode::CREATED, Json(to_hardware(row))))
}

/// GET /v1/hardware - List hardware
#[utoipa::path(
    get,
    path = "/v1/hardware",
    responses(
        (status = 200, description = "Hardware records", body = ListResponse<Hardware>)
    ),
    tag = "hardware"
)]
pub async fn list_hardware(
    State(state): State<AppState>,
) -> ApiResult<Json<ListResponse<Hardware>>> {
    let rows = state.db.list_hardware().await?;
    Ok(Json(
        rows.into_iter().map(to_hardware).collect::<Vec<_>>().into(),
    ))
}

/// GET /v1/hardware/{hardware_id} - Get hardware by ID
#[utoipa::path(
    get,
    path = "/v1/hardware/{hardware_id}",
    params(("hardware_id" = String, Path, description = "Hardware ID")),
    responses(
        (status = 200, description = "Hardware", body = Hardware),
        (status = 404, description = "Hardware not found")
    ),
    tag = "hardware"
)]
pub async fn get_hardware(
    State(state): State<AppState>,
    Path(hardware_id): Path<String>,
) -> ApiResult<Json<Hardware>> {
    let row = state
        .db
        .get_hardware(&hardware_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("hardware {}", hardware_id)))?;
    Ok(Json(to_hardware(row)))
}

/// GET /v1/hardware/mac/{mac} - Look up hardware by MAC
#[utoipa::path(
    get,
    path = "/v1/hardware/mac/{mac}",
    params(("mac" = String, Path, description = "Interface MAC address")),
    responses(
        (status = 200, description = "Hardware", body = Hardware),
        (status = 404, description = "No hardware with that MAC")
    ),
    tag = "hardware"
)]
pub async fn get_hardware_by_mac(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> ApiResult<Json<Hardware>> {
    let row = state
        .db
        .get_hardware_by_mac(&mac)
        .await?
        .ok_or_else(|| Error::not_found(format!("hardware with MAC {}", mac)))?;
    Ok(Json(to_hardware(row)))
}

/// GET /v1/hardware/ip/{ip} - Look up hardware by IP
#[utoipa::path(
    get,
    path = "/v1/hardware/ip/{ip}",
    params(("ip" = String, Path, description = "Interface IP address")),
    responses(
        (status = 200, description = "Hardware", body = Hardware),
        (status = 404, description = "No hardware with that IP")
    ),
    tag = "hardware"
)]
pub async fn get_hardware_by_ip(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> ApiResult<Json<Hardware>> {
    let row = state
        .db
        .get_hardware_by_ip(&ip)
        .await?
        .ok_or_else(|| Error::not_found(format!("hardware with IP {}", ip)))?;
    Ok(Json(to_hardware(row)))
}

/// DELETE /v1/hardware/{hardware_id} - Soft-delete hardware
#[utoipa::path(
    delete,
    path = "/v1/hardware/{hardware_id}",
    params(("hardware_id" = String, Path, description = "Hardware ID")),
    responses(
        (status = 204, description = "Hardware deleted"),
        (status = 404, description = "Hardware not found")
    ),
    tag = "hardware"
)]
pub async fn delete_hardware(
    State(state): State<AppState>,
    Path(hardware_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.delete_hardware(&hardware_id).await?;
    tracing::info!(hardware_id = %hardware_id, "deleted hardware");
    Ok(StatusCode::NO_CONTENT)
}

fn to_hardware(row: HardwareRow) -> Hardware {
    Hardware {
        id: row.id,
        data: row.data,
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: row.deleted_at,
    }
}
