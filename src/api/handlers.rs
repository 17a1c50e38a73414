use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::models::admin::{Admin, NewAdmin, SetTrafficRequest};
use crate::models::panel::{PanelInput, PanelOutput};
use crate::models::response::ResponseModel;
use crate::store::map_store_error;
use crate::AppState;

// ── Panels ───────────────────────────────────────────────────

pub async fn list_panels(
    State(state): State<Arc<AppState>>,
) -> Result<ResponseModel<Vec<PanelOutput>>, AppError> {
    let panels = state.store.list_panels().await?;
    Ok(ResponseModel::with_data(
        "Panels retrieved successfully",
        panels.into_iter().map(PanelOutput::from).collect(),
    ))
}

/// Store a new panel after connecting to it with the given credentials.
pub async fn create_panel(
    State(state): State<Arc<AppState>>,
    Json(input): Json<PanelInput>,
) -> Result<(StatusCode, ResponseModel<PanelOutput>), AppError> {
    state.orchestrator.validate_panel(&input).await?;

    let panel = state
        .store
        .insert_panel(&input)
        .await
        .map_err(map_store_error)?;

    tracing::info!(panel = %panel.name, panel_type = %panel.panel_type, "panel created");
    Ok((
        StatusCode::CREATED,
        ResponseModel::with_data("Panel added successfully", panel.into()),
    ))
}

pub async fn update_panel(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(input): Json<PanelInput>,
) -> Result<ResponseModel<PanelOutput>, AppError> {
    // a disabled panel may be stored without being reachable
    if input.is_active {
        state.orchestrator.validate_panel(&input).await?;
    } else {
        input.validate()?;
    }

    let panel = state
        .store
        .update_panel(&name, &input)
        .await
        .map_err(map_store_error)?
        .ok_or_else(|| AppError::NotFound("Panel not found".into()))?;

    tracing::info!(panel = %panel.name, active = panel.is_active, "panel updated");
    Ok(ResponseModel::with_data(
        "Panel updated successfully",
        panel.into(),
    ))
}

// ── Admins ───────────────────────────────────────────────────

pub async fn list_admins(
    State(state): State<Arc<AppState>>,
) -> Result<ResponseModel<Vec<Admin>>, AppError> {
    let admins = state.store.list_admins().await?;
    Ok(ResponseModel::with_data("Admins retrieved successfully", admins))
}

pub async fn create_admin(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewAdmin>,
) -> Result<(StatusCode, ResponseModel<Admin>), AppError> {
    input.validate()?;
    let admin = state
        .store
        .insert_admin(&input)
        .await
        .map_err(map_store_error)?;

    tracing::info!(admin = %admin.username, panel = %admin.panel, traffic = admin.traffic, "admin created");
    Ok((
        StatusCode::CREATED,
        ResponseModel::with_data("Admin added successfully", admin),
    ))
}

pub async fn get_admin(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<ResponseModel<Admin>, AppError> {
    let admin = state
        .store
        .get_admin_by_username(&username)
        .await?
        .ok_or_else(|| AppError::NotFound("Admin not found".into()))?;
    Ok(ResponseModel::with_data("Admin retrieved successfully", admin))
}

/// Operator override of an admin's balance.
pub async fn set_admin_traffic(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(req): Json<SetTrafficRequest>,
) -> Result<ResponseModel<()>, AppError> {
    if !state.store.set_admin_traffic(&username, req.traffic).await? {
        return Err(AppError::NotFound("Admin not found".into()));
    }
    tracing::warn!(admin = %username, traffic = req.traffic, "admin traffic set by operator");
    Ok(ResponseModel::ok("Admin traffic updated successfully"))
}
