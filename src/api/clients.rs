use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::errors::AppError;
use crate::models::client::{ClientInput, ClientOutput, ClientUpdateInput};
use crate::models::response::ResponseModel;
use crate::AppState;

pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    Path(admin): Path<String>,
) -> Result<ResponseModel<Vec<ClientOutput>>, AppError> {
    state.orchestrator.list_clients(&admin).await
}

pub async fn add_client(
    State(state): State<Arc<AppState>>,
    Path(admin): Path<String>,
    Json(input): Json<ClientInput>,
) -> Result<ResponseModel<()>, AppError> {
    state.orchestrator.add_client(&admin, &input).await
}

pub async fn update_client(
    State(state): State<Arc<AppState>>,
    Path((admin, id)): Path<(String, String)>,
    Json(input): Json<ClientUpdateInput>,
) -> Result<ResponseModel<()>, AppError> {
    state.orchestrator.update_client(&admin, &id, &input).await
}

pub async fn reset_client_usage(
    State(state): State<Arc<AppState>>,
    Path((admin, email)): Path<(String, String)>,
) -> Result<ResponseModel<()>, AppError> {
    state.orchestrator.reset_client_usage(&admin, &email).await
}

pub async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path((admin, id)): Path<(String, String)>,
) -> Result<ResponseModel<()>, AppError> {
    state.orchestrator.delete_client(&admin, &id).await
}
