//! Cloud instance inventory client.
//!
//! Lists instances through a cursor-paginated `GET <api_base>/instances` and
//! fetches single instances. Rate limiting and server errors are retried with
//! exponential backoff; a rejected credential fails immediately.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::InventoryConfig;
use crate::error::FerryError;
use crate::state::InstanceRef;

pub const MAX_ATTEMPTS: u32 = 3;

/// One row of the instance listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, rename(deserialize = "main_ip"))]
    pub primary_ip: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub power_status: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub plan: String,
}

impl InstanceSummary {
    pub fn to_ref(&self) -> InstanceRef {
        InstanceRef::new(&self.id, &self.label, &self.primary_ip)
    }
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    instances: Vec<InstanceSummary>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    instance: InstanceSummary,
}

pub struct InventoryClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    credential_env: String,
    backoff_base: Duration,
}

impl InventoryClient {
    /// Build a client reading the API key from the configured env var.
    pub fn from_config(config: &InventoryConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| FerryError::Config(format!("{} is not set", config.api_key_env)))?;
        Self::new(&config.api_base, api_key, &config.api_key_env)
    }

    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        credential_env: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ferry/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            credential_env: credential_env.into(),
            backoff_base: Duration::from_secs(1),
        })
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Every instance across all pages.
    pub async fn list_instances(&self) -> anyhow::Result<Vec<InstanceSummary>> {
        let url = format!("{}/instances", self.api_base);
        let mut instances = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = self.get(&url, cursor.as_deref()).await?;
            let page: ListPage =
                serde_json::from_str(&body).context("Failed to parse instance listing")?;
            instances.extend(page.instances);
            match page.meta.links.next.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::debug!(count = instances.len(), "listed instances");
        Ok(instances)
    }

    pub async fn get_instance(&self, id: &str) -> anyhow::Result<InstanceSummary> {
        let url = format!("{}/instances/{}", self.api_base, id);
        let body = self.get(&url, None).await?;
        let envelope: InstanceEnvelope =
            serde_json::from_str(&body).with_context(|| format!("Failed to parse instance {id}"))?;
        Ok(envelope.instance)
    }

    async fn get(&self, url: &str, cursor: Option<&str>) -> anyhow::Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.http.get(url).bearer_auth(&self.api_key);
            if let Some(cursor) = cursor {
                request = request.query(&[("cursor", cursor)]);
            }

            let retry_reason = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .text()
                            .await
                            .with_context(|| format!("Failed to read response from {url}"));
                    }
                    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                        return Err(FerryError::InventoryUnauthorized {
                            status: status.as_u16(),
                            credential_env: self.credential_env.clone(),
                        }
                        .into());
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(FerryError::InventoryHttp {
                            status: status.as_u16(),
                            body,
                        }
                        .into());
                    }
                    if attempt >= MAX_ATTEMPTS {
                        return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                            FerryError::InventoryRateLimited { attempts: attempt }
                        } else {
                            FerryError::InventoryHttp {
                                status: status.as_u16(),
                                body,
                            }
                        }
                        .into());
                    }
                    format!("HTTP {}", status.as_u16())
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(err).with_context(|| format!("Failed to reach {url}"));
                    }
                    err.to_string()
                }
            };

            let delay = self.backoff_base.saturating_mul(1u32 << (attempt - 1));
            tracing::warn!(url, attempt, reason = %retry_reason, delay_secs = delay.as_secs_f32(), "inventory request retry");
            tokio::time::sleep(delay).await;
        }
    }
}
