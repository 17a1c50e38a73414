use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::models::admin::Admin;
use crate::store::EntityStore;

// ── Admin Quota Ledger ────────────────────────────────────────

/// Owns one admin's traffic balance for the duration of an operation.
///
/// Built fresh per request from the admin row. All balance changes go through
/// `debit` / `credit`, which apply a delta atomically in the store and then refresh
/// the cached balance from the returned value.
pub struct AdminLedger<'a> {
    store: &'a dyn EntityStore,
    admin: Admin,
}

impl<'a> AdminLedger<'a> {
    pub fn new(store: &'a dyn EntityStore, admin: Admin) -> Self {
        Self { store, admin }
    }

    pub fn admin(&self) -> &Admin {
        &self.admin
    }

    pub fn balance(&self) -> i64 {
        self.admin.traffic
    }

    /// Liveness gate. Without an expiry date the stored flag is authoritative and
    /// nothing is written. Once the expiry has passed an active admin is switched to
    /// inactive in the store; the flag is never switched back here.
    pub async fn is_active(&mut self) -> Result<bool> {
        self.is_active_at(Utc::now()).await
    }

    pub async fn is_active_at(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let Some(expiry) = self.admin.expiry_date else {
            return Ok(self.admin.is_active);
        };

        if expiry < now && self.admin.is_active {
            self.store.set_admin_active(self.admin.id, false).await?;
            self.admin.is_active = false;
            warn!(
                admin = %self.admin.username,
                expired_at = %expiry,
                "admin expired, marked inactive"
            );
            return Ok(false);
        }

        Ok(self.admin.is_active)
    }

    pub fn has_traffic(&self, required: i64) -> bool {
        self.admin.traffic >= required
    }

    /// Charge the admin. With `update_return_traffic` only `net_usage` (traffic
    /// actually consumed) is charged, otherwise the full `total`.
    /// Returns the amount charged. The store refuses a charge the stored balance
    /// cannot cover, even if another process spent it after the gate passed.
    pub async fn debit(&mut self, total: i64, net_usage: i64) -> Result<i64> {
        let amount = if self.admin.update_return_traffic {
            net_usage
        } else {
            total
        };
        if amount != 0 {
            self.admin.traffic = self.store.debit_admin_traffic(self.admin.id, amount).await?;
            info!(
                admin = %self.admin.username,
                charged = amount,
                balance = self.admin.traffic,
                "traffic debited"
            );
        }
        Ok(amount)
    }

    /// Return traffic to the admin if `delete_return_traffic` is set.
    /// Returns the amount credited (0 when the policy is off).
    pub async fn credit(&mut self, traffic: i64) -> Result<i64> {
        if !self.admin.delete_return_traffic || traffic == 0 {
            return Ok(0);
        }
        self.admin.traffic = self.store.adjust_admin_traffic(self.admin.id, traffic).await?;
        info!(
            admin = %self.admin.username,
            credited = traffic,
            balance = self.admin.traffic,
            "traffic credited"
        );
        Ok(traffic)
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::admin::NewAdmin;
    use crate::models::panel::{PanelInput, PanelType};
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    const GB: i64 = 1024 * 1024 * 1024;

    async fn seeded(store: &MemoryStore, tweak: impl FnOnce(&mut NewAdmin)) -> Admin {
        store
            .insert_panel(&PanelInput {
                name: "p".into(),
                panel_type: PanelType::Sanaei,
                url: "http://127.0.0.1:1".into(),
                sub_url: None,
                username: "u".into(),
                password: "p".into(),
                is_active: true,
            })
            .await
            .unwrap();
        let mut new = NewAdmin {
            username: "alice".into(),
            panel: "p".into(),
            inbound_id: Some(1),
            inbound_flow: None,
            traffic: 10 * GB,
            expiry_date: None,
            update_return_traffic: false,
            delete_return_traffic: false,
            is_active: true,
        };
        tweak(&mut new);
        store.insert_admin(&new).await.unwrap()
    }

    #[tokio::test]
    async fn test_no_expiry_returns_stored_flag_without_writes() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |a| a.is_active = false).await;
        let mut ledger = AdminLedger::new(&store, admin);

        assert!(!ledger.is_active().await.unwrap());
        let stored = store.get_admin_by_username("alice").await.unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_expired_admin_flips_once_and_stays_inactive() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |a| {
            a.expiry_date = Some(Utc::now() - Duration::hours(1));
        })
        .await;
        let mut ledger = AdminLedger::new(&store, admin);

        assert!(!ledger.is_active().await.unwrap());
        assert!(!ledger.is_active().await.unwrap());
        let stored = store.get_admin_by_username("alice").await.unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_future_expiry_keeps_admin_active() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |a| {
            a.expiry_date = Some(Utc::now() + Duration::days(3));
        })
        .await;
        let mut ledger = AdminLedger::new(&store, admin);
        assert!(ledger.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn test_has_traffic_is_balance_comparison() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |_| {}).await;
        let ledger = AdminLedger::new(&store, admin);

        assert!(ledger.has_traffic(0));
        assert!(ledger.has_traffic(10 * GB));
        assert!(!ledger.has_traffic(10 * GB + 1));
    }

    #[tokio::test]
    async fn test_debit_charges_total_by_default() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |_| {}).await;
        let mut ledger = AdminLedger::new(&store, admin);

        assert_eq!(ledger.debit(5 * GB, GB).await.unwrap(), 5 * GB);
        assert_eq!(ledger.balance(), 5 * GB);
    }

    #[tokio::test]
    async fn test_debit_charges_usage_with_update_return_traffic() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |a| a.update_return_traffic = true).await;
        let mut ledger = AdminLedger::new(&store, admin);

        assert_eq!(ledger.debit(5 * GB, GB).await.unwrap(), GB);
        let stored = store.get_admin_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.traffic, 9 * GB);
    }

    #[tokio::test]
    async fn test_debit_fails_when_stored_balance_was_spent_elsewhere() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |_| {}).await;
        let mut ledger = AdminLedger::new(&store, admin.clone());
        assert!(ledger.has_traffic(8 * GB));

        store.adjust_admin_traffic(admin.id, -5 * GB).await.unwrap();
        assert!(ledger.debit(8 * GB, 8 * GB).await.is_err());
        let stored = store.get_admin_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.traffic, 5 * GB);
    }

    #[tokio::test]
    async fn test_credit_respects_delete_return_traffic() {
        let store = MemoryStore::new();
        let admin = seeded(&store, |_| {}).await;
        let mut ledger = AdminLedger::new(&store, admin);
        assert_eq!(ledger.credit(3 * GB).await.unwrap(), 0);
        assert_eq!(ledger.balance(), 10 * GB);

        let store = MemoryStore::new();
        let admin = seeded(&store, |a| a.delete_return_traffic = true).await;
        let mut ledger = AdminLedger::new(&store, admin);
        assert_eq!(ledger.credit(3 * GB).await.unwrap(), 3 * GB);
        assert_eq!(ledger.balance(), 13 * GB);
    }
}
