//! Session and wire types shared by the xui family (3x-ui and tx-ui).
//!
//! Both panels authenticate with a form login that sets a session cookie and wrap
//! every API answer in `{ "success": bool, "msg": string, "obj": ... }`. They
//! differ in the API prefix and in which fields carry the client's limits, which
//! is left to the individual adapters.

use std::collections::{HashMap, HashSet};

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use super::http::{join_url, read_json, PanelHttp};
use super::{AdapterContext, AdapterError};
use crate::models::client::{ClientInput, ClientUpdateInput, PanelClient};

// ── Wire Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    pub obj: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub id: i64,
    /// JSON document encoded as a string.
    #[serde(default)]
    pub settings: String,
    #[serde(default)]
    pub client_stats: Option<Vec<ClientStat>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStat {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub inbound_id: i64,
    #[serde(default)]
    pub enable: bool,
    pub email: String,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub total: i64,
}

/// One entry of an inbound's `settings.clients`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSetting {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub flow: String,
    pub email: String,
    #[serde(default)]
    pub limit_ip: i32,
    /// Bytes, despite the name.
    #[serde(default, rename = "totalGB")]
    pub total_gb: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub tg_id: serde_json::Value,
    #[serde(default)]
    pub sub_id: String,
    #[serde(default)]
    pub reset: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct InboundSettings {
    #[serde(default)]
    clients: Vec<ClientSetting>,
}

/// A client as configured in the inbound, joined with its traffic counters.
#[derive(Debug, Clone)]
pub struct XuiEntry {
    pub setting: ClientSetting,
    pub stat: Option<ClientStat>,
    pub online: bool,
}

pub fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// xui uses 0 for "never expires".
pub fn expiry(ms: i64) -> Option<i64> {
    (ms != 0).then_some(ms)
}

fn random_sub_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Settings entry for a new client.
pub fn new_setting(ctx: &AdapterContext, input: &ClientInput) -> ClientSetting {
    ClientSetting {
        id: input
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        flow: ctx.inbound_flow.clone().unwrap_or_default(),
        email: input.email.clone(),
        limit_ip: input.limit_ip,
        total_gb: input.total,
        expiry_time: input.expiry_time,
        enable: input.enable,
        tg_id: json!(""),
        sub_id: input.sub_id.clone().unwrap_or_else(random_sub_id),
        reset: 0,
    }
}

/// Settings entry replacing an existing client, keeping its subscription and flow.
pub fn updated_setting(
    ctx: &AdapterContext,
    uuid: &str,
    previous: &PanelClient,
    input: &ClientUpdateInput,
) -> ClientSetting {
    ClientSetting {
        id: uuid.to_string(),
        flow: previous
            .flow
            .clone()
            .or_else(|| ctx.inbound_flow.clone())
            .unwrap_or_default(),
        email: input.email.clone(),
        limit_ip: input.limit_ip,
        total_gb: input.total,
        expiry_time: input.expiry_time,
        enable: input.enable,
        tg_id: json!(""),
        sub_id: input
            .sub_id
            .clone()
            .or_else(|| previous.sub_id.clone())
            .unwrap_or_else(random_sub_id),
        reset: 0,
    }
}

// ── Session ───────────────────────────────────────────────────

/// Logged-in API handle for one panel. Logs in lazily, once per instance.
pub struct XuiApi {
    http: PanelHttp,
    url: String,
    api_base: &'static str,
    username: String,
    password: String,
    session: OnceCell<String>,
}

impl XuiApi {
    pub fn new(http: PanelHttp, ctx: &AdapterContext, api_base: &'static str) -> Self {
        Self {
            http,
            url: ctx.panel.url.clone(),
            api_base,
            username: ctx.panel.username.clone(),
            password: ctx.panel.password.clone(),
            session: OnceCell::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        join_url(&join_url(&self.url, self.api_base), path)
    }

    async fn cookie(&self) -> Result<&str, AdapterError> {
        self.session
            .get_or_try_init(|| self.login())
            .await
            .map(String::as_str)
    }

    async fn login(&self) -> Result<String, AdapterError> {
        let resp = self
            .http
            .client()
            .post(join_url(&self.url, "/login"))
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        let cookie = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        let envelope: Envelope<serde_json::Value> = read_json(resp).await?;
        if !envelope.success {
            return Err(AdapterError::Auth(envelope.msg));
        }
        if cookie.is_empty() {
            return Err(AdapterError::Auth("panel did not issue a session cookie".into()));
        }
        debug!(panel = %self.url, "xui session established");
        Ok(cookie)
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<Option<T>, AdapterError> {
        if envelope.success {
            Ok(envelope.obj)
        } else {
            Err(AdapterError::Rejected {
                status: 200,
                message: envelope.msg,
            })
        }
    }

    async fn read_get<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, AdapterError> {
        let cookie = self.cookie().await?;
        let resp = self.http.reads().get(url).header(COOKIE, cookie).send().await?;
        Self::unwrap_envelope(read_json::<Envelope<T>>(resp).await?)
    }

    async fn read_post<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, AdapterError> {
        let cookie = self.cookie().await?;
        let resp = self.http.reads().post(url).header(COOKIE, cookie).send().await?;
        Self::unwrap_envelope(read_json::<Envelope<T>>(resp).await?)
    }

    async fn mutate(&self, url: String, body: Option<serde_json::Value>) -> Result<(), AdapterError> {
        let cookie = self.cookie().await?;
        let mut req = self.http.client().post(url).header(COOKIE, cookie);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        Self::unwrap_envelope(read_json::<Envelope<serde_json::Value>>(resp).await?)?;
        Ok(())
    }

    // ── Calls ─────────────────────────────────────────────────

    pub async fn server_status(&self) -> Result<serde_json::Value, AdapterError> {
        self.read_post::<serde_json::Value>(join_url(&self.url, "/server/status"))
            .await?
            .ok_or_else(|| AdapterError::Malformed("server status without payload".into()))
    }

    pub async fn inbound(&self, inbound_id: i64) -> Result<Option<Inbound>, AdapterError> {
        let inbounds: Vec<Inbound> = self
            .read_get(self.api_url("/list"))
            .await?
            .unwrap_or_default();
        Ok(inbounds.into_iter().find(|i| i.id == inbound_id))
    }

    pub async fn onlines(&self) -> Result<HashSet<String>, AdapterError> {
        let emails: Vec<String> = self
            .read_post(self.api_url("/onlines"))
            .await?
            .unwrap_or_default();
        Ok(emails.into_iter().collect())
    }

    /// All clients of an inbound with their counters. Missing inbound → empty.
    pub async fn entries(&self, inbound_id: i64) -> Result<Vec<XuiEntry>, AdapterError> {
        let Some(inbound) = self.inbound(inbound_id).await? else {
            return Ok(Vec::new());
        };

        let settings: InboundSettings = if inbound.settings.trim().is_empty() {
            InboundSettings::default()
        } else {
            serde_json::from_str(&inbound.settings)
                .map_err(|e| AdapterError::Malformed(format!("inbound settings: {}", e)))?
        };

        let mut stats: HashMap<String, ClientStat> = inbound
            .client_stats
            .unwrap_or_default()
            .into_iter()
            .map(|s| (s.email.clone(), s))
            .collect();

        let online = self.onlines().await?;

        Ok(settings
            .clients
            .into_iter()
            .map(|setting| XuiEntry {
                stat: stats.remove(&setting.email),
                online: online.contains(&setting.email),
                setting,
            })
            .collect())
    }

    /// Panel-wide counters for one email, regardless of inbound.
    pub async fn client_traffic(&self, email: &str) -> Result<Option<ClientStat>, AdapterError> {
        let url = self.api_url(&format!(
            "/getClientTraffics/{}",
            urlencoding::encode(email)
        ));
        self.read_get(url).await
    }

    pub async fn add_client(&self, inbound_id: i64, setting: &ClientSetting) -> Result<(), AdapterError> {
        let body = client_body(inbound_id, setting)?;
        self.mutate(self.api_url("/addClient"), Some(body)).await
    }

    pub async fn update_client(
        &self,
        uuid: &str,
        inbound_id: i64,
        setting: &ClientSetting,
    ) -> Result<(), AdapterError> {
        let body = client_body(inbound_id, setting)?;
        let url = self.api_url(&format!("/updateClient/{}", urlencoding::encode(uuid)));
        self.mutate(url, Some(body)).await
    }

    pub async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<(), AdapterError> {
        let url = self.api_url(&format!(
            "/{}/resetClientTraffic/{}",
            inbound_id,
            urlencoding::encode(email)
        ));
        self.mutate(url, None).await
    }

    pub async fn delete_client(&self, inbound_id: i64, uuid: &str) -> Result<(), AdapterError> {
        let url = self.api_url(&format!(
            "/{}/delClient/{}",
            inbound_id,
            urlencoding::encode(uuid)
        ));
        self.mutate(url, None).await
    }
}

fn client_body(inbound_id: i64, setting: &ClientSetting) -> Result<serde_json::Value, AdapterError> {
    let settings = serde_json::to_string(&json!({ "clients": [setting] }))
        .map_err(|e| AdapterError::Malformed(e.to_string()))?;
    Ok(json!({ "id": inbound_id, "settings": settings }))
}
