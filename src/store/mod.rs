pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::AppError;
use crate::models::admin::{Admin, NewAdmin};
use crate::models::panel::{Panel, PanelInput};

/// Errors a store reports that callers map to something other than a 500.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("{0} not found")]
    Missing(String),
    #[error("balance of {0} cannot cover the charge")]
    Overdraw(String),
}

/// Entity store for admins and panels.
///
/// Implementations: `PgStore` (PostgreSQL) and `MemoryStore` (in-process, for tests
/// and `serve --memory`). Balance changes go through `adjust_admin_traffic`, which
/// must apply the delta atomically.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_admin_by_username(&self, username: &str) -> anyhow::Result<Option<Admin>>;

    async fn get_panel_by_name(&self, name: &str) -> anyhow::Result<Option<Panel>>;

    async fn set_admin_active(&self, admin_id: i64, active: bool) -> anyhow::Result<()>;

    /// Add `delta` (may be negative) to the admin's balance. Returns the new balance.
    async fn adjust_admin_traffic(&self, admin_id: i64, delta: i64) -> anyhow::Result<i64>;

    /// Subtract `amount` only if the stored balance still covers it, in one step.
    /// `StoreError::Overdraw` when it does not.
    async fn debit_admin_traffic(&self, admin_id: i64, amount: i64) -> anyhow::Result<i64>;

    // -- Management --

    async fn insert_panel(&self, panel: &PanelInput) -> anyhow::Result<Panel>;

    /// Update credentials and liveness of an existing panel. Name and type are fixed.
    async fn update_panel(&self, name: &str, panel: &PanelInput) -> anyhow::Result<Option<Panel>>;

    async fn list_panels(&self) -> anyhow::Result<Vec<Panel>>;

    async fn insert_admin(&self, admin: &NewAdmin) -> anyhow::Result<Admin>;

    async fn list_admins(&self) -> anyhow::Result<Vec<Admin>>;

    /// Operator override of an admin's balance.
    async fn set_admin_traffic(&self, username: &str, traffic: i64) -> anyhow::Result<bool>;
}

/// Map a store failure to the API taxonomy.
pub fn map_store_error(e: anyhow::Error) -> AppError {
    match e.downcast_ref::<StoreError>() {
        Some(StoreError::Duplicate(what)) => AppError::Conflict(format!("{} already exists", what)),
        Some(StoreError::Missing(what)) => AppError::NotFound(format!("{} not found", what)),
        Some(StoreError::Overdraw(_)) | None => AppError::Internal(e),
    }
}
