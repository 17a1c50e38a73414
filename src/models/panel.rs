use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// The panel products an admin can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum PanelType {
    /// MHSanaei 3x-ui.
    #[serde(rename = "3x-ui")]
    #[sqlx(rename = "3x-ui")]
    Sanaei,
    #[serde(rename = "tx-ui")]
    #[sqlx(rename = "tx-ui")]
    TxUi,
    #[serde(rename = "marzban")]
    #[sqlx(rename = "marzban")]
    Marzban,
}

impl PanelType {
    pub const ALL: [PanelType; 3] = [PanelType::Sanaei, PanelType::TxUi, PanelType::Marzban];

    pub fn as_str(&self) -> &'static str {
        match self {
            PanelType::Sanaei => "3x-ui",
            PanelType::TxUi => "tx-ui",
            PanelType::Marzban => "marzban",
        }
    }
}

impl fmt::Display for PanelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PanelType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::InvalidInput(format!("unknown panel type: {}", s)))
    }
}

/// A registered panel. Credentials never leave the backend.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Panel {
    pub id: i64,
    pub name: String,
    pub panel_type: PanelType,
    pub url: String,
    pub sub_url: Option<String>,
    pub username: String,
    pub password: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelInput {
    pub name: String,
    pub panel_type: PanelType,
    pub url: String,
    pub sub_url: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl PanelInput {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidInput("panel name must not be empty".into()));
        }
        let url = url::Url::parse(&self.url)
            .map_err(|_| AppError::InvalidInput(format!("invalid panel URL: {}", self.url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AppError::InvalidInput(
                "panel URL must use http or https".into(),
            ));
        }
        Ok(())
    }

    /// Candidate record used to probe the panel before it is persisted.
    pub fn to_panel(&self, id: i64) -> Panel {
        Panel {
            id,
            name: self.name.trim().to_string(),
            panel_type: self.panel_type,
            url: self.url.trim_end_matches('/').to_string(),
            sub_url: self.sub_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelOutput {
    pub id: i64,
    pub panel_type: PanelType,
    pub name: String,
    pub url: String,
    pub sub_url: Option<String>,
    pub is_active: bool,
}

impl From<Panel> for PanelOutput {
    fn from(p: Panel) -> Self {
        Self {
            id: p.id,
            panel_type: p.panel_type,
            name: p.name,
            url: p.url,
            sub_url: p.sub_url,
            is_active: p.is_active,
        }
    }
}
