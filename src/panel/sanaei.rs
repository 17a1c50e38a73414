use async_trait::async_trait;
use tracing::debug;

use super::http::PanelHttp;
use super::xui::{self, expiry, non_empty, XuiApi, XuiEntry};
use super::{AdapterContext, AdapterError, PanelAdapter};
use crate::models::client::{ClientId, ClientInput, ClientUpdateInput, PanelClient};
use crate::models::panel::PanelType;

const API_BASE: &str = "/panel/api/inbounds";

/// 3x-ui (MHSanaei). Limits and counters come from the inbound's client stats.
pub struct SanaeiAdapter {
    ctx: AdapterContext,
    api: XuiApi,
}

impl SanaeiAdapter {
    pub fn new(http: PanelHttp, ctx: AdapterContext) -> Self {
        let api = XuiApi::new(http, &ctx, API_BASE);
        Self { ctx, api }
    }

    fn to_client(entry: XuiEntry) -> PanelClient {
        let stat = entry.stat.unwrap_or_default();
        PanelClient {
            id: ClientId::Num(stat.id),
            uuid: non_empty(&entry.setting.id),
            email: entry.setting.email,
            enable: entry.setting.enable,
            is_online: entry.online,
            up: stat.up,
            down: stat.down,
            total: stat.total,
            expiry_ms: expiry(entry.setting.expiry_time),
            sub_id: non_empty(&entry.setting.sub_id),
            flow: non_empty(&entry.setting.flow),
        }
    }
}

#[async_trait]
impl PanelAdapter for SanaeiAdapter {
    fn kind(&self) -> PanelType {
        PanelType::Sanaei
    }

    async fn test_connection(&self) -> Result<(), AdapterError> {
        let status = self.api.server_status().await?;
        if status.get("cpu").is_none() {
            return Err(AdapterError::Malformed(
                "server status does not look like 3x-ui".into(),
            ));
        }
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<PanelClient>, AdapterError> {
        let Some(inbound) = self.ctx.inbound_id else {
            return Ok(Vec::new());
        };
        Ok(self
            .api
            .entries(inbound)
            .await?
            .into_iter()
            .map(Self::to_client)
            .collect())
    }

    async fn get_client(&self, email: &str) -> Result<Option<PanelClient>, AdapterError> {
        let Some(stat) = self.api.client_traffic(email).await? else {
            return Ok(None);
        };

        // the traffic endpoint has no uuid or subscription, take those from the inbound
        let entry = match self.ctx.inbound_id {
            Some(inbound) => self
                .api
                .entries(inbound)
                .await?
                .into_iter()
                .find(|e| e.setting.email == email),
            None => None,
        };

        let client = match entry {
            Some(entry) => Self::to_client(XuiEntry {
                stat: Some(stat),
                ..entry
            }),
            None => PanelClient {
                id: ClientId::Num(stat.id),
                email: stat.email.clone(),
                enable: stat.enable,
                up: stat.up,
                down: stat.down,
                total: stat.total,
                expiry_ms: expiry(stat.expiry_time),
                ..Default::default()
            },
        };
        debug!(email, used = client.used(), "3x-ui client found");
        Ok(Some(client))
    }

    async fn create_client(&self, input: &ClientInput) -> Result<(), AdapterError> {
        let inbound = self.ctx.require_inbound()?;
        let setting = xui::new_setting(&self.ctx, input);
        self.api.add_client(inbound, &setting).await
    }

    async fn update_client(
        &self,
        id: &str,
        previous: &PanelClient,
        input: &ClientUpdateInput,
    ) -> Result<(), AdapterError> {
        let inbound = self.ctx.require_inbound()?;
        let setting = xui::updated_setting(&self.ctx, id, previous, input);
        self.api.update_client(id, inbound, &setting).await
    }

    async fn reset_usage(&self, email: &str) -> Result<(), AdapterError> {
        let inbound = self.ctx.require_inbound()?;
        self.api.reset_client_traffic(inbound, email).await
    }

    async fn delete_client(&self, id: &str) -> Result<(), AdapterError> {
        let inbound = self.ctx.require_inbound()?;
        self.api.delete_client(inbound, id).await
    }
}
