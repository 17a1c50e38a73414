use async_trait::async_trait;
use sqlx::PgPool;

use super::{EntityStore, StoreError};
use crate::models::admin::{Admin, NewAdmin};
use crate::models::panel::{Panel, PanelInput};

const ADMIN_COLUMNS: &str = "id, username, is_active, expiry_date, traffic, update_return_traffic, delete_return_traffic, panel, inbound_id, inbound_flow";
const PANEL_COLUMNS: &str = "id, name, panel_type, url, sub_url, username, password, is_active";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unique_violation(e: sqlx::Error, what: String) -> anyhow::Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what).into(),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::Missing("referenced panel".into()).into()
        }
        _ => e.into(),
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get_admin_by_username(&self, username: &str) -> anyhow::Result<Option<Admin>> {
        let row = sqlx::query_as::<_, Admin>(&format!(
            "SELECT {} FROM admins WHERE username = $1",
            ADMIN_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_panel_by_name(&self, name: &str) -> anyhow::Result<Option<Panel>> {
        let row = sqlx::query_as::<_, Panel>(&format!(
            "SELECT {} FROM panels WHERE name = $1",
            PANEL_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_admin_active(&self, admin_id: i64, active: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE admins SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(admin_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn adjust_admin_traffic(&self, admin_id: i64, delta: i64) -> anyhow::Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE admins SET traffic = traffic + $2, updated_at = NOW() WHERE id = $1 RETURNING traffic",
        )
        .bind(admin_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::Missing(format!("admin #{}", admin_id)))?;
        Ok(balance)
    }

    async fn debit_admin_traffic(&self, admin_id: i64, amount: i64) -> anyhow::Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE admins SET traffic = traffic - $2, updated_at = NOW() \
             WHERE id = $1 AND traffic >= $2 RETURNING traffic",
        )
        .bind(admin_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;
        match balance {
            Some(balance) => Ok(balance),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM admins WHERE id = $1)")
                        .bind(admin_id)
                        .fetch_one(&self.pool)
                        .await?;
                if exists {
                    Err(StoreError::Overdraw(format!("admin #{}", admin_id)).into())
                } else {
                    Err(StoreError::Missing(format!("admin #{}", admin_id)).into())
                }
            }
        }
    }

    async fn insert_panel(&self, panel: &PanelInput) -> anyhow::Result<Panel> {
        let candidate = panel.to_panel(0);
        let row = sqlx::query_as::<_, Panel>(&format!(
            r#"INSERT INTO panels (name, panel_type, url, sub_url, username, password, is_active)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {}"#,
            PANEL_COLUMNS
        ))
        .bind(&candidate.name)
        .bind(candidate.panel_type)
        .bind(&candidate.url)
        .bind(&candidate.sub_url)
        .bind(&candidate.username)
        .bind(&candidate.password)
        .bind(candidate.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, format!("panel '{}'", candidate.name)))?;
        Ok(row)
    }

    async fn update_panel(&self, name: &str, panel: &PanelInput) -> anyhow::Result<Option<Panel>> {
        let candidate = panel.to_panel(0);
        let row = sqlx::query_as::<_, Panel>(&format!(
            r#"UPDATE panels
               SET url = $2, sub_url = $3, username = $4, password = $5, is_active = $6, updated_at = NOW()
               WHERE name = $1
               RETURNING {}"#,
            PANEL_COLUMNS
        ))
        .bind(name)
        .bind(&candidate.url)
        .bind(&candidate.sub_url)
        .bind(&candidate.username)
        .bind(&candidate.password)
        .bind(candidate.is_active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_panels(&self) -> anyhow::Result<Vec<Panel>> {
        let rows = sqlx::query_as::<_, Panel>(&format!(
            "SELECT {} FROM panels ORDER BY id ASC",
            PANEL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_admin(&self, admin: &NewAdmin) -> anyhow::Result<Admin> {
        let row = sqlx::query_as::<_, Admin>(&format!(
            r#"INSERT INTO admins (username, is_active, expiry_date, traffic, update_return_traffic, delete_return_traffic, panel, inbound_id, inbound_flow)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING {}"#,
            ADMIN_COLUMNS
        ))
        .bind(admin.username.trim())
        .bind(admin.is_active)
        .bind(admin.expiry_date)
        .bind(admin.traffic)
        .bind(admin.update_return_traffic)
        .bind(admin.delete_return_traffic)
        .bind(&admin.panel)
        .bind(admin.inbound_id)
        .bind(&admin.inbound_flow)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, format!("admin '{}'", admin.username)))?;
        Ok(row)
    }

    async fn list_admins(&self) -> anyhow::Result<Vec<Admin>> {
        let rows = sqlx::query_as::<_, Admin>(&format!(
            "SELECT {} FROM admins ORDER BY id ASC",
            ADMIN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_admin_traffic(&self, username: &str, traffic: i64) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE admins SET traffic = $2, updated_at = NOW() WHERE username = $1")
                .bind(username)
                .bind(traffic)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
