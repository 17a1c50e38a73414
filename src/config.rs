use std::time::Duration;

use serde::Deserialize;

const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_ADMIN_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Operator key protecting the management API.
    pub admin_key: String,
    /// Total timeout for a single panel request, in seconds.
    /// Set via PANELHUB_PANEL_TIMEOUT_SECS. Default: 15.
    pub panel_timeout_secs: u64,
    /// Connect timeout for panel requests, in seconds.
    /// Set via PANELHUB_PANEL_CONNECT_TIMEOUT_SECS. Default: 5.
    pub panel_connect_timeout_secs: u64,
    /// Retries for idempotent panel reads (list / lookup). Mutations are never retried.
    /// Set via PANELHUB_PANEL_READ_RETRIES. Default: 2.
    pub panel_read_retries: u32,
}

impl Config {
    pub fn panel_timeout(&self) -> Duration {
        Duration::from_secs(self.panel_timeout_secs)
    }

    pub fn panel_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.panel_connect_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/panelhub".into(),
            admin_key: PLACEHOLDER_ADMIN_KEY.into(),
            panel_timeout_secs: 15,
            panel_connect_timeout_secs: 5,
            panel_read_retries: 2,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let admin_key =
        std::env::var("PANELHUB_ADMIN_KEY").unwrap_or_else(|_| PLACEHOLDER_ADMIN_KEY.into());

    if admin_key == PLACEHOLDER_ADMIN_KEY {
        let env_mode = std::env::var("PANELHUB_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "PANELHUB_ADMIN_KEY is still the insecure placeholder. \
                 Set a real operator key before running in production."
            );
        }
        eprintln!("⚠️  PANELHUB_ADMIN_KEY is not set, using insecure placeholder. Set a real key for production.");
    }

    Ok(Config {
        port: env_or("PANELHUB_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        admin_key,
        panel_timeout_secs: env_or("PANELHUB_PANEL_TIMEOUT_SECS", defaults.panel_timeout_secs),
        panel_connect_timeout_secs: env_or(
            "PANELHUB_PANEL_CONNECT_TIMEOUT_SECS",
            defaults.panel_connect_timeout_secs,
        ),
        panel_read_retries: env_or("PANELHUB_PANEL_READ_RETRIES", defaults.panel_read_retries),
    })
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
