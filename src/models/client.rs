use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.@-]{1,64}$").expect("static regex"));

/// Panel-side identifier of a client: numeric on 3x-ui stats, textual elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    Num(i64),
    Text(String),
}

impl Default for ClientId {
    fn default() -> Self {
        ClientId::Num(0)
    }
}

/// A proxy account as reported by a panel, after the adapter has mapped its fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelClient {
    pub id: ClientId,
    pub uuid: Option<String>,
    /// Email on xui panels, username on Marzban.
    pub email: String,
    pub enable: bool,
    pub is_online: bool,
    pub up: i64,
    pub down: i64,
    /// Allotted traffic in bytes, 0 = unlimited.
    pub total: i64,
    /// Unix milliseconds. `None` = never expires.
    pub expiry_ms: Option<i64>,
    pub sub_id: Option<String>,
    pub flow: Option<String>,
}

impl PanelClient {
    pub fn used(&self) -> i64 {
        self.up + self.down
    }

    /// Allotment not yet consumed. Clients over their limit have nothing left.
    pub fn remaining(&self) -> i64 {
        (self.total - self.used()).max(0)
    }
}

/// Normalized client record returned by the API regardless of panel type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientOutput {
    pub id: ClientId,
    pub uuid: String,
    pub username: String,
    pub status: bool,
    pub is_online: bool,
    pub data_limit: i64,
    pub used_data: i64,
    pub expiry_date: Option<DateTime<Utc>>,
    pub expiry_date_unix: Option<i64>,
    pub sub_id: Option<String>,
    pub flow: Option<String>,
}

impl From<PanelClient> for ClientOutput {
    fn from(c: PanelClient) -> Self {
        // negative values are xui "start on first use" delays, not instants
        let expiry_date = c
            .expiry_ms
            .filter(|ms| *ms > 0)
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        Self {
            uuid: c.uuid.clone().unwrap_or_default(),
            used_data: c.used(),
            id: c.id,
            username: c.email,
            status: c.enable,
            is_online: c.is_online,
            data_limit: c.total,
            expiry_date,
            expiry_date_unix: c.expiry_ms,
            sub_id: c.sub_id,
            flow: c.flow,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientInput {
    pub email: String,
    /// Allotted traffic in bytes.
    pub total: i64,
    /// Unix milliseconds, 0 = never.
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub limit_ip: i32,
    pub sub_id: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientUpdateInput {
    pub email: String,
    pub total: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub limit_ip: i32,
    pub sub_id: Option<String>,
}

fn default_true() -> bool {
    true
}

pub fn validate_identifier(value: &str) -> Result<(), AppError> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "invalid client identifier: {:?}",
            value
        )))
    }
}

fn validate_amounts(total: i64, expiry_time: i64) -> Result<(), AppError> {
    if total < 0 {
        return Err(AppError::InvalidInput("total must not be negative".into()));
    }
    if expiry_time < 0 {
        return Err(AppError::InvalidInput("expiry_time must not be negative".into()));
    }
    Ok(())
}

impl ClientInput {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_identifier(&self.email)?;
        validate_amounts(self.total, self.expiry_time)
    }
}

impl ClientUpdateInput {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_identifier(&self.email)?;
        validate_amounts(self.total, self.expiry_time)
    }
}
