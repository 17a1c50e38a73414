use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use super::http::{ensure_success, join_url, read_json, PanelHttp};
use super::{AdapterContext, AdapterError, PanelAdapter};
use crate::models::client::{ClientId, ClientInput, ClientUpdateInput, PanelClient};
use crate::models::panel::PanelType;

const ONLINE_WINDOW_SECS: i64 = 120;

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    users: Vec<MarzbanUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarzbanUser {
    pub username: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub used_traffic: i64,
    pub data_limit: Option<i64>,
    /// Unix seconds.
    pub expire: Option<i64>,
    pub online_at: Option<String>,
    #[serde(default)]
    pub subscription_url: String,
    #[serde(default)]
    pub proxies: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct UserModify<'a> {
    expire: Option<i64>,
    data_limit: i64,
    data_limit_reset_strategy: &'a str,
    status: &'a str,
}

fn status_str(enable: bool) -> &'static str {
    if enable {
        "active"
    } else {
        "disabled"
    }
}

/// Marzban stores seconds; inputs carry milliseconds with 0 for "never".
fn expire_secs(expiry_ms: i64) -> Option<i64> {
    (expiry_ms > 0).then(|| expiry_ms / 1000)
}

fn parse_online_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn is_online(online_at: Option<&str>, now: DateTime<Utc>) -> bool {
    online_at
        .and_then(parse_online_at)
        .is_some_and(|t| now - t <= Duration::seconds(ONLINE_WINDOW_SECS))
}

impl MarzbanUser {
    fn into_client(self, now: DateTime<Utc>) -> PanelClient {
        let flow = self
            .proxies
            .get("vless")
            .and_then(|v| v.get("flow"))
            .and_then(|f| f.as_str())
            .filter(|f| !f.is_empty())
            .map(String::from);
        let uuid = self
            .proxies
            .as_object()
            .and_then(|p| p.values().find_map(|v| v.get("id")?.as_str().map(String::from)));

        PanelClient {
            is_online: is_online(self.online_at.as_deref(), now),
            id: ClientId::Text(self.username.clone()),
            uuid,
            enable: self.status == "active",
            // marzban only reports a combined figure
            up: 0,
            down: self.used_traffic,
            total: self.data_limit.unwrap_or(0),
            expiry_ms: self.expire.filter(|s| *s > 0).and_then(|s| s.checked_mul(1000)),
            sub_id: (!self.subscription_url.is_empty()).then_some(self.subscription_url),
            flow,
            email: self.username,
        }
    }
}

/// Marzban REST API with a lazily fetched bearer token.
pub struct MarzbanAdapter {
    http: PanelHttp,
    ctx: AdapterContext,
    token: OnceCell<String>,
}

impl MarzbanAdapter {
    pub fn new(http: PanelHttp, ctx: AdapterContext) -> Self {
        Self {
            http,
            ctx,
            token: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.ctx.panel.url, path)
    }

    fn user_url(&self, username: &str) -> String {
        self.url(&format!("/api/user/{}", urlencoding::encode(username)))
    }

    async fn bearer(&self) -> Result<&str, AdapterError> {
        self.token
            .get_or_try_init(|| self.login())
            .await
            .map(String::as_str)
    }

    async fn login(&self) -> Result<String, AdapterError> {
        let resp = self
            .http
            .client()
            .post(self.url("/api/admin/token"))
            .form(&[
                ("username", self.ctx.panel.username.as_str()),
                ("password", self.ctx.panel.password.as_str()),
            ])
            .send()
            .await?;
        match read_json::<Token>(resp).await {
            Ok(token) => {
                debug!(panel = %self.ctx.panel.name, "marzban token acquired");
                Ok(token.access_token)
            }
            Err(AdapterError::Rejected { status, message }) if status == 401 || status == 403 => {
                Err(AdapterError::Auth(message))
            }
            Err(e) => Err(e),
        }
    }

    fn user_body(&self, input: &ClientInput) -> serde_json::Value {
        let mut vless = serde_json::Map::new();
        if let Some(uuid) = &input.uuid {
            vless.insert("id".into(), json!(uuid));
        }
        if let Some(flow) = &self.ctx.inbound_flow {
            vless.insert("flow".into(), json!(flow));
        }
        json!({
            "username": input.email,
            "proxies": { "vless": vless },
            "expire": expire_secs(input.expiry_time),
            "data_limit": input.total,
            "data_limit_reset_strategy": "no_reset",
            "status": status_str(input.enable),
            "note": self.ctx.admin_username.as_deref().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl PanelAdapter for MarzbanAdapter {
    fn kind(&self) -> PanelType {
        PanelType::Marzban
    }

    /// Marzban answers 409 on its own.
    fn prechecks_duplicates(&self) -> bool {
        false
    }

    async fn test_connection(&self) -> Result<(), AdapterError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .reads()
            .get(self.url("/api/system"))
            .bearer_auth(token)
            .send()
            .await?;
        read_json::<serde_json::Value>(resp).await.map(|_| ())
    }

    async fn list_clients(&self) -> Result<Vec<PanelClient>, AdapterError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .reads()
            .get(self.url("/api/users"))
            .bearer_auth(token)
            .send()
            .await?;
        let page: UsersPage = read_json(resp).await?;
        let now = Utc::now();
        Ok(page.users.into_iter().map(|u| u.into_client(now)).collect())
    }

    async fn get_client(&self, username: &str) -> Result<Option<PanelClient>, AdapterError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .reads()
            .get(self.user_url(username))
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user: MarzbanUser = read_json(resp).await?;
        Ok(Some(user.into_client(Utc::now())))
    }

    async fn find_client_by_id(&self, id: &str) -> Result<Option<PanelClient>, AdapterError> {
        self.get_client(id).await
    }

    async fn create_client(&self, input: &ClientInput) -> Result<(), AdapterError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .client()
            .post(self.url("/api/user"))
            .bearer_auth(token)
            .json(&self.user_body(input))
            .send()
            .await?;
        ensure_success(resp).await.map(|_| ())
    }

    async fn update_client(
        &self,
        id: &str,
        _previous: &PanelClient,
        input: &ClientUpdateInput,
    ) -> Result<(), AdapterError> {
        let token = self.bearer().await?;
        let body = UserModify {
            expire: expire_secs(input.expiry_time),
            data_limit: input.total,
            data_limit_reset_strategy: "no_reset",
            status: status_str(input.enable),
        };
        let resp = self
            .http
            .client()
            .put(self.user_url(id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        ensure_success(resp).await.map(|_| ())
    }

    async fn reset_usage(&self, username: &str) -> Result<(), AdapterError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .client()
            .post(self.url(&format!(
                "/api/user/{}/reset",
                urlencoding::encode(username)
            )))
            .bearer_auth(token)
            .send()
            .await?;
        ensure_success(resp).await.map(|_| ())
    }

    async fn delete_client(&self, username: &str) -> Result<(), AdapterError> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .client()
            .delete(self.user_url(username))
            .bearer_auth(token)
            .send()
            .await?;
        ensure_success(resp).await.map(|_| ())
    }
}
