use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{EntityStore, StoreError};
use crate::models::admin::{Admin, NewAdmin};
use crate::models::panel::{Panel, PanelInput};

/// In-process store backed by DashMaps. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    admins: Arc<DashMap<i64, Admin>>,
    panels: Arc<DashMap<String, Panel>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn admin_id(&self, username: &str) -> Option<i64> {
        self.admins
            .iter()
            .find(|a| a.username == username)
            .map(|a| a.id)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_admin_by_username(&self, username: &str) -> anyhow::Result<Option<Admin>> {
        Ok(self
            .admins
            .iter()
            .find(|a| a.username == username)
            .map(|a| a.value().clone()))
    }

    async fn get_panel_by_name(&self, name: &str) -> anyhow::Result<Option<Panel>> {
        Ok(self.panels.get(name).map(|p| p.value().clone()))
    }

    async fn set_admin_active(&self, admin_id: i64, active: bool) -> anyhow::Result<()> {
        if let Some(mut admin) = self.admins.get_mut(&admin_id) {
            admin.is_active = active;
        }
        Ok(())
    }

    async fn adjust_admin_traffic(&self, admin_id: i64, delta: i64) -> anyhow::Result<i64> {
        let mut admin = self
            .admins
            .get_mut(&admin_id)
            .ok_or_else(|| StoreError::Missing(format!("admin #{}", admin_id)))?;
        admin.traffic += delta;
        Ok(admin.traffic)
    }

    async fn debit_admin_traffic(&self, admin_id: i64, amount: i64) -> anyhow::Result<i64> {
        let mut admin = self
            .admins
            .get_mut(&admin_id)
            .ok_or_else(|| StoreError::Missing(format!("admin #{}", admin_id)))?;
        if admin.traffic < amount {
            return Err(StoreError::Overdraw(format!("admin #{}", admin_id)).into());
        }
        admin.traffic -= amount;
        Ok(admin.traffic)
    }

    async fn insert_panel(&self, panel: &PanelInput) -> anyhow::Result<Panel> {
        let candidate = panel.to_panel(self.allocate_id());
        match self.panels.entry(candidate.name.clone()) {
            Entry::Occupied(_) => {
                Err(StoreError::Duplicate(format!("panel '{}'", candidate.name)).into())
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                Ok(candidate)
            }
        }
    }

    async fn update_panel(&self, name: &str, panel: &PanelInput) -> anyhow::Result<Option<Panel>> {
        let Some(mut existing) = self.panels.get_mut(name) else {
            return Ok(None);
        };
        let candidate = panel.to_panel(existing.id);
        existing.url = candidate.url;
        existing.sub_url = candidate.sub_url;
        existing.username = candidate.username;
        existing.password = candidate.password;
        existing.is_active = candidate.is_active;
        Ok(Some(existing.clone()))
    }

    async fn list_panels(&self) -> anyhow::Result<Vec<Panel>> {
        let mut panels: Vec<Panel> = self.panels.iter().map(|p| p.value().clone()).collect();
        panels.sort_by_key(|p| p.id);
        Ok(panels)
    }

    async fn insert_admin(&self, admin: &NewAdmin) -> anyhow::Result<Admin> {
        let username = admin.username.trim().to_string();
        if self.admin_id(&username).is_some() {
            return Err(StoreError::Duplicate(format!("admin '{}'", username)).into());
        }
        if !self.panels.contains_key(&admin.panel) {
            return Err(StoreError::Missing("referenced panel".into()).into());
        }
        let row = Admin {
            id: self.allocate_id(),
            username,
            is_active: admin.is_active,
            expiry_date: admin.expiry_date,
            traffic: admin.traffic,
            update_return_traffic: admin.update_return_traffic,
            delete_return_traffic: admin.delete_return_traffic,
            panel: admin.panel.clone(),
            inbound_id: admin.inbound_id,
            inbound_flow: admin.inbound_flow.clone(),
        };
        self.admins.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_admins(&self) -> anyhow::Result<Vec<Admin>> {
        let mut admins: Vec<Admin> = self.admins.iter().map(|a| a.value().clone()).collect();
        admins.sort_by_key(|a| a.id);
        Ok(admins)
    }

    async fn set_admin_traffic(&self, username: &str, traffic: i64) -> anyhow::Result<bool> {
        let Some(id) = self.admin_id(username) else {
            return Ok(false);
        };
        if let Some(mut admin) = self.admins.get_mut(&id) {
            admin.traffic = traffic;
        }
        Ok(true)
    }
}
