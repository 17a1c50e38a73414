pub mod http;
pub mod marzban;
pub mod sanaei;
pub mod txui;
pub mod xui;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use self::http::PanelHttp;
use crate::errors::AppError;
use crate::models::admin::Admin;
use crate::models::client::{ClientInput, ClientUpdateInput, PanelClient};
use crate::models::panel::{Panel, PanelType};

// ── Adapter Errors ────────────────────────────────────────────

/// Why a panel call failed. "Not found" is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("panel request timed out")]
    Timeout,

    #[error("panel unreachable: {0}")]
    Unreachable(String),

    #[error("panel login failed: {0}")]
    Auth(String),

    #[error("panel rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed panel response: {0}")]
    Malformed(String),

    #[error("admin binding misconfigured: {0}")]
    Misconfigured(String),
}

impl AdapterError {
    /// Transport-level failures that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Timeout | AdapterError::Unreachable(_) => true,
            AdapterError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout
        } else if e.is_decode() {
            AdapterError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            AdapterError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            AdapterError::Unreachable(e.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for AdapterError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => AdapterError::Unreachable(e.to_string()),
        }
    }
}

// ── Adapter Contract ──────────────────────────────────────────

/// What an adapter needs to know about the panel and the admin's binding on it.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub panel: Panel,
    pub admin_username: Option<String>,
    pub inbound_id: Option<i64>,
    pub inbound_flow: Option<String>,
}

impl AdapterContext {
    pub fn for_admin(panel: Panel, admin: &Admin) -> Self {
        Self {
            panel,
            admin_username: Some(admin.username.clone()),
            inbound_id: admin.inbound_id,
            inbound_flow: admin.inbound_flow.clone().filter(|f| !f.is_empty()),
        }
    }

    /// Context without an admin, used to probe a panel before it is saved.
    pub fn for_panel(panel: Panel) -> Self {
        Self {
            panel,
            admin_username: None,
            inbound_id: None,
            inbound_flow: None,
        }
    }

    pub fn require_inbound(&self) -> Result<i64, AdapterError> {
        self.inbound_id.ok_or_else(|| {
            AdapterError::Misconfigured(format!(
                "admin {} has no inbound on panel '{}'",
                self.admin_username.as_deref().unwrap_or("-"),
                self.panel.name
            ))
        })
    }
}

/// One panel product's client API, normalized.
///
/// Identifiers: xui panels look clients up by email and address them by uuid;
/// Marzban uses the username for both.
#[async_trait]
pub trait PanelAdapter: Send + Sync {
    fn kind(&self) -> PanelType;

    /// Whether add-client should look for an existing identifier before creating,
    /// to report a conflict the panel itself would not.
    fn prechecks_duplicates(&self) -> bool {
        true
    }

    async fn test_connection(&self) -> Result<(), AdapterError>;

    async fn list_clients(&self) -> Result<Vec<PanelClient>, AdapterError>;

    async fn get_client(&self, identifier: &str) -> Result<Option<PanelClient>, AdapterError>;

    /// Resolve the id used by update/delete routes.
    async fn find_client_by_id(&self, id: &str) -> Result<Option<PanelClient>, AdapterError> {
        Ok(self
            .list_clients()
            .await?
            .into_iter()
            .find(|c| c.uuid.as_deref() == Some(id)))
    }

    async fn create_client(&self, input: &ClientInput) -> Result<(), AdapterError>;

    async fn update_client(
        &self,
        id: &str,
        previous: &PanelClient,
        input: &ClientUpdateInput,
    ) -> Result<(), AdapterError>;

    async fn reset_usage(&self, identifier: &str) -> Result<(), AdapterError>;

    async fn delete_client(&self, id: &str) -> Result<(), AdapterError>;
}

// ── Registry ──────────────────────────────────────────────────

pub type AdapterFactory =
    Arc<dyn Fn(PanelHttp, AdapterContext) -> Box<dyn PanelAdapter> + Send + Sync>;

/// Lookup table from panel type to adapter constructor.
#[derive(Clone)]
pub struct AdapterRegistry {
    http: PanelHttp,
    factories: HashMap<PanelType, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new(http: PanelHttp) -> Self {
        let mut registry = Self {
            http,
            factories: HashMap::new(),
        };
        registry.register(PanelType::Sanaei, |http, ctx| {
            Box::new(sanaei::SanaeiAdapter::new(http, ctx))
        });
        registry.register(PanelType::TxUi, |http, ctx| {
            Box::new(txui::TxUiAdapter::new(http, ctx))
        });
        registry.register(PanelType::Marzban, |http, ctx| {
            Box::new(marzban::MarzbanAdapter::new(http, ctx))
        });
        registry
    }

    pub fn register<F>(&mut self, kind: PanelType, factory: F)
    where
        F: Fn(PanelHttp, AdapterContext) -> Box<dyn PanelAdapter> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn build(&self, ctx: AdapterContext) -> Result<Box<dyn PanelAdapter>, AppError> {
        let kind = ctx.panel.panel_type;
        let factory = self.factories.get(&kind).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("no adapter registered for {}", kind))
        })?;
        Ok(factory(self.http.clone(), ctx))
    }
}
