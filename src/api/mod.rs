use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use subtle::ConstantTimeEq;

use crate::AppState;

pub mod clients;
pub mod handlers;

/// Build the management and client API router.
/// All routes are relative: the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Panels
        .route(
            "/panels",
            get(handlers::list_panels).post(handlers::create_panel),
        )
        .route("/panels/:name", put(handlers::update_panel))
        // Admins
        .route(
            "/admins",
            get(handlers::list_admins).post(handlers::create_admin),
        )
        .route("/admins/:admin", get(handlers::get_admin))
        .route("/admins/:admin/traffic", put(handlers::set_admin_traffic))
        // Clients, on behalf of an admin
        .route(
            "/admins/:admin/clients",
            get(clients::list_clients).post(clients::add_client),
        )
        .route(
            "/admins/:admin/clients/:id",
            put(clients::update_client).delete(clients::delete_client),
        )
        // :id is the client email here
        .route(
            "/admins/:admin/clients/:id/reset",
            post(clients::reset_client_usage),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or `Authorization: Bearer`) against the
/// configured operator key. Returns 401 if missing or invalid.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state.config.admin_key.as_bytes();

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected)) => Ok(next.run(req).await),
        Some(_) => {
            // never log either key
            tracing::warn!("management API: invalid operator key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("management API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
