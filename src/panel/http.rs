/// HTTP clients shared by every panel adapter.
/// Reads go through reqwest-middleware with transient-error retries; mutations are sent once.
use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

use super::AdapterError;
use crate::config::Config;

const MAX_ERROR_BODY: usize = 256;

#[derive(Clone)]
pub struct PanelHttp {
    client: reqwest::Client,
    reads: ClientWithMiddleware,
}

impl PanelHttp {
    pub fn new(
        timeout: Duration,
        connect_timeout: Duration,
        read_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("panelhub/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(read_retries);

        let reads = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client, reads })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::new(
            cfg.panel_timeout(),
            cfg.panel_connect_timeout(),
            cfg.panel_read_retries,
        )
    }

    /// Client for mutating calls. Never retried.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Client for idempotent reads.
    pub fn reads(&self) -> &ClientWithMiddleware {
        &self.reads
    }
}

/// Join `base` and `path` without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reject non-2xx responses, then decode the body as JSON.
pub async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AdapterError> {
    let resp = ensure_success(resp).await?;
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| AdapterError::Malformed(e.to_string()))
}

pub async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut message = resp.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Err(AdapterError::Rejected {
        status: status.as_u16(),
        message,
    })
}
