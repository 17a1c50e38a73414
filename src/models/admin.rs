use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// An operator account with a traffic balance, bound to one panel inbound.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub is_active: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    /// Remaining traffic allowance in bytes. May go negative under consumption accounting.
    pub traffic: i64,
    /// Charge resets by consumed traffic instead of the full allotment.
    pub update_return_traffic: bool,
    /// Credit the unused allotment back when a client is deleted.
    pub delete_return_traffic: bool,
    pub panel: String,
    pub inbound_id: Option<i64>,
    pub inbound_flow: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAdmin {
    pub username: String,
    pub panel: String,
    pub inbound_id: Option<i64>,
    pub inbound_flow: Option<String>,
    #[serde(default)]
    pub traffic: i64,
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_return_traffic: bool,
    #[serde(default)]
    pub delete_return_traffic: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl NewAdmin {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() {
            return Err(AppError::InvalidInput("admin username must not be empty".into()));
        }
        if self.panel.trim().is_empty() {
            return Err(AppError::InvalidInput("admin must be bound to a panel".into()));
        }
        if self.traffic < 0 {
            return Err(AppError::InvalidInput("initial traffic must not be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetTrafficRequest {
    pub traffic: i64,
}
