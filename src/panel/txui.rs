use async_trait::async_trait;

use super::http::PanelHttp;
use super::xui::{self, expiry, non_empty, XuiApi, XuiEntry};
use super::{AdapterContext, AdapterError, PanelAdapter};
use crate::models::client::{ClientId, ClientInput, ClientUpdateInput, PanelClient};
use crate::models::panel::PanelType;

const API_BASE: &str = "/xui/API/inbounds";

/// tx-ui. Clients are addressed by uuid and the data limit lives in the
/// settings' `totalGB`; stats only contribute the counters.
pub struct TxUiAdapter {
    ctx: AdapterContext,
    api: XuiApi,
}

impl TxUiAdapter {
    pub fn new(http: PanelHttp, ctx: AdapterContext) -> Self {
        let api = XuiApi::new(http, &ctx, API_BASE);
        Self { ctx, api }
    }

    fn to_client(entry: XuiEntry) -> PanelClient {
        let stat = entry.stat.unwrap_or_default();
        PanelClient {
            id: ClientId::Text(entry.setting.id.clone()),
            uuid: non_empty(&entry.setting.id),
            email: entry.setting.email,
            enable: entry.setting.enable,
            is_online: entry.online,
            up: stat.up,
            down: stat.down,
            total: entry.setting.total_gb,
            expiry_ms: expiry(entry.setting.expiry_time),
            sub_id: non_empty(&entry.setting.sub_id),
            flow: non_empty(&entry.setting.flow),
        }
    }

    async fn entries(&self) -> Result<Vec<XuiEntry>, AdapterError> {
        match self.ctx.inbound_id {
            Some(inbound) => self.api.entries(inbound).await,
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PanelAdapter for TxUiAdapter {
    fn kind(&self) -> PanelType {
        PanelType::TxUi
    }

    async fn test_connection(&self) -> Result<(), AdapterError> {
        self.api.server_status().await.map(|_| ())
    }

    async fn list_clients(&self) -> Result<Vec<PanelClient>, AdapterError> {
        Ok(self.entries().await?.into_iter().map(Self::to_client).collect())
    }

    async fn get_client(&self, email: &str) -> Result<Option<PanelClient>, AdapterError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .find(|e| e.setting.email == email)
            .map(Self::to_client))
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
