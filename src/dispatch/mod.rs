//! Client operations on behalf of an admin.
//!
//! Every call resolves the admin and its panel, builds the panel adapter, runs the
//! gates (liveness, traffic, duplicate) and only then touches the panel. The ledger
//! is reconciled after the panel call succeeds. Mutating calls hold the admin's lock
//! for the whole sequence.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::middleware::admin_lock::AdminLocks;
use crate::middleware::ledger::AdminLedger;
use crate::models::admin::Admin;
use crate::models::client::{validate_identifier, ClientInput, ClientOutput, ClientUpdateInput};
use crate::models::panel::{Panel, PanelInput};
use crate::models::response::ResponseModel;
use crate::panel::{AdapterContext, AdapterError, AdapterRegistry, PanelAdapter};
use crate::store::EntityStore;

const GIB: f64 = (1024u64 * 1024 * 1024) as f64;
const RESERVED_EMAIL: &str = "This email is reserved by another admins";

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn EntityStore>,
    registry: AdapterRegistry,
    locks: AdminLocks,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn EntityStore>, registry: AdapterRegistry) -> Self {
        Self {
            store,
            registry,
            locks: AdminLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    // ── Resolution ────────────────────────────────────────────

    async fn resolve(&self, admin_username: &str) -> Result<(Admin, Panel), AppError> {
        let admin = self
            .store
            .get_admin_by_username(admin_username)
            .await?
            .ok_or_else(|| AppError::NotFound("Admin not found".into()))?;

        let panel = self
            .store
            .get_panel_by_name(&admin.panel)
            .await?
            .ok_or_else(|| AppError::NotFound("Panel not found".into()))?;

        if !panel.is_active {
            warn!(admin = %admin.username, panel = %panel.name, "panel is disabled");
            return Err(AppError::Upstream(format!("panel '{}' is disabled", panel.name)));
        }
        Ok((admin, panel))
    }

    fn adapter(&self, admin: &Admin, panel: Panel) -> Result<Box<dyn PanelAdapter>, AppError> {
        self.registry.build(AdapterContext::for_admin(panel, admin))
    }

    async fn require_active(ledger: &mut AdminLedger<'_>) -> Result<(), AppError> {
        if ledger.is_active().await? {
            return Ok(());
        }
        warn!(admin = %ledger.admin().username, "inactive admin attempted a client operation");
        Err(AppError::AuthorizationDenied)
    }

    fn require_traffic(
        ledger: &AdminLedger<'_>,
        required: i64,
        action: &'static str,
    ) -> Result<(), AppError> {
        if ledger.has_traffic(required) {
            return Ok(());
        }
        warn!(
            admin = %ledger.admin().username,
            required,
            balance = ledger.balance(),
            "insufficient traffic to {} client",
            action
        );
        Err(AppError::QuotaExceeded {
            action,
            balance: ledger.balance(),
        })
    }

    // ── Operations ────────────────────────────────────────────

    #[tracing::instrument(skip(self))]
    pub async fn list_clients(
        &self,
        admin_username: &str,
    ) -> Result<ResponseModel<Vec<ClientOutput>>, AppError> {
        let (admin, panel) = self.resolve(admin_username).await?;
        let adapter = self.adapter(&admin, panel)?;

        let clients = adapter.list_clients().await.map_err(|e| {
            error!(admin = %admin.username, error = %e, "failed to list clients");
            AppError::NotFound("No users found".into())
        })?;

        let data: Vec<ClientOutput> = clients.into_iter().map(ClientOutput::from).collect();
        Ok(ResponseModel::with_data("Users retrieved successfully", data))
    }

    #[tracing::instrument(skip(self, input), fields(email = %input.email))]
    pub async fn add_client(
        &self,
        admin_username: &str,
        input: &ClientInput,
    ) -> Result<ResponseModel<()>, AppError> {
        input.validate()?;
        let _guard = self.locks.acquire(admin_username).await;

        let (admin, panel) = self.resolve(admin_username).await?;
        let adapter = self.adapter(&admin, panel)?;
        let mut ledger = AdminLedger::new(self.store.as_ref(), admin);

        Self::require_active(&mut ledger).await?;
        Self::require_traffic(&ledger, input.total, "add")?;

        if adapter.prechecks_duplicates() {
            let existing = adapter
                .get_client(&input.email)
                .await
                .map_err(|e| upstream("Failed to add user", &input.email, e))?;
            if existing.is_some() {
                warn!(admin = %ledger.admin().username, "client identifier already taken");
                return Err(AppError::Conflict(RESERVED_EMAIL.into()));
            }
        }

        adapter
            .create_client(input)
            .await
            .map_err(|e| upstream("Failed to add user", &input.email, e))?;

        ledger
            .debit(input.total, input.total)
            .await
            .map_err(|e| reconcile_failed(ledger.admin(), &input.email, e))?;

        info!(admin = %ledger.admin().username, client = %input.email, "client added");
        Ok(ResponseModel::ok("User added successfully"))
    }

    /// The balance must cover the full requested total, but only the increase of the
    /// allotment is charged. Decreasing never credits back.
    #[tracing::instrument(skip(self, input), fields(email = %input.email))]
    pub async fn update_client(
        &self,
        admin_username: &str,
        id: &str,
        input: &ClientUpdateInput,
    ) -> Result<ResponseModel<()>, AppError> {
        input.validate()?;
        validate_identifier(id)?;
        let _guard = self.locks.acquire(admin_username).await;

        let (admin, panel) = self.resolve(admin_username).await?;
        let adapter = self.adapter(&admin, panel)?;
        let mut ledger = AdminLedger::new(self.store.as_ref(), admin);

        Self::require_active(&mut ledger).await?;

        // previous must be the record the mutation targets
        let previous = adapter
            .find_client_by_id(id)
            .await
            .map_err(|e| upstream("Failed to update user", &input.email, e))?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        if previous.email != input.email {
            warn!(
                admin = %ledger.admin().username,
                id,
                stored = %previous.email,
                "client id and email do not match"
            );
            return Err(AppError::InvalidInput(
                "Client id does not belong to this email".into(),
            ));
        }

        Self::require_traffic(&ledger, input.total, "update")?;
        let extra = (input.total - previous.total).max(0);

        adapter
            .update_client(id, &previous, input)
            .await
            .map_err(|e| upstream("Failed to update user", &input.email, e))?;

        ledger
            .debit(extra, extra)
            .await
            .map_err(|e| reconcile_failed(ledger.admin(), &input.email, e))?;

        info!(
            admin = %ledger.admin().username,
            client = %input.email,
            extra,
            "client updated"
        );
        Ok(ResponseModel::ok("User updated successfully"))
    }

    #[tracing::instrument(skip(self))]
    pub async fn reset_client_usage(
        &self,
        admin_username: &str,
        email: &str,
    ) -> Result<ResponseModel<()>, AppError> {
        validate_identifier(email)?;
        let _guard = self.locks.acquire(admin_username).await;

        let (admin, panel) = self.resolve(admin_username).await?;
        let adapter = self.adapter(&admin, panel)?;
        let mut ledger = AdminLedger::new(self.store.as_ref(), admin);

        Self::require_active(&mut ledger).await?;

        let client = adapter
            .get_client(email)
            .await
            .map_err(|e| upstream("Failed to reset user usage", email, e))?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        Self::require_traffic(&ledger, client.total, "reset usage for")?;

        adapter
            .reset_usage(email)
            .await
            .map_err(|e| upstream("Failed to reset user usage", email, e))?;

        ledger
            .debit(client.total, client.used())
            .await
            .map_err(|e| reconcile_failed(ledger.admin(), email, e))?;

        info!(
            admin = %ledger.admin().username,
            client = %email,
            used = client.used(),
            "client usage reset"
        );
        Ok(ResponseModel::ok("User usage reset successfully"))
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_client(
        &self,
        admin_username: &str,
        id: &str,
    ) -> Result<ResponseModel<()>, AppError> {
        validate_identifier(id)?;
        let _guard = self.locks.acquire(admin_username).await;

        let (admin, panel) = self.resolve(admin_username).await?;
        let adapter = self.adapter(&admin, panel)?;
        let mut ledger = AdminLedger::new(self.store.as_ref(), admin);

        Self::require_active(&mut ledger).await?;

        let client = adapter
            .find_client_by_id(id)
            .await
            .map_err(|e| upstream("Failed to delete user", id, e))?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        let remaining = client.remaining();

        adapter
            .delete_client(id)
            .await
            .map_err(|e| upstream("Failed to delete user", id, e))?;

        let credited = ledger
            .credit(remaining)
            .await
            .map_err(|e| reconcile_failed(ledger.admin(), id, e))?;

        info!(
            admin = %ledger.admin().username,
            client = %client.email,
            "client deleted, {:.2} GB returned",
            credited as f64 / GIB
        );
        Ok(ResponseModel::ok("User deleted successfully"))
    }

    /// Connect to a panel described by `input` before it is stored.
    #[tracing::instrument(skip(self, input), fields(panel = %input.name, panel_type = %input.panel_type))]
    pub async fn validate_panel(&self, input: &PanelInput) -> Result<(), AppError> {
        input.validate()?;
        let adapter = self
            .registry
            .build(AdapterContext::for_panel(input.to_panel(0)))?;

        adapter.test_connection().await.map_err(|e| {
            warn!(error = %e, "panel connection test failed");
            AppError::Upstream(format!("Failed to connect to panel: {}", e))
        })?;
        info!("panel connection verified");
        Ok(())
    }
}

/// Panel failure after the gates passed. A 409 from the panel is a taken identifier.
fn upstream(message: &str, client: &str, e: AdapterError) -> AppError {
    if let AdapterError::Rejected { status: 409, .. } = e {
        return AppError::Conflict(RESERVED_EMAIL.into());
    }
    error!(client, error = %e, retryable = e.is_retryable(), "{}", message);
    AppError::Upstream(message.to_string())
}

/// The panel changed but the balance did not follow.
fn reconcile_failed(admin: &Admin, client: &str, e: anyhow::Error) -> AppError {
    error!(
        admin = %admin.username,
        client,
        error = %e,
        "panel updated but ledger reconciliation failed"
    );
    AppError::Internal(e.context("ledger reconciliation failed"))
}
