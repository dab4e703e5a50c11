//! Kong gateway driver.
//!
//! Only upstream/target sync is implemented — export, migrate, and restore
//! are not supported by Kong's object model the way APISIX's declarative
//! config is, and return [`SyncerError::Unrealized`], matching the upstream
//! behavior this system inherited.

use crate::config::types::KongConfig;
use crate::driver::Gateway;
use crate::error::SyncerError;
use crate::model::{Instance, Target};
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde_json::Map;
use std::path::PathBuf;

const DEFAULT_UPSTREAM_TEMPLATE: &str = r#"{"name": "$name", "tags": ["discovery-syncer-auto"]}"#;

pub struct KongGateway {
    config: KongConfig,
    client: reqwest::Client,
    known_upstreams: DashMap<String, bool>,
}

impl KongGateway {
    pub fn new(config: KongConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build kong HTTP client");
        Self {
            config,
            client,
            known_upstreams: DashMap::new(),
        }
    }

    fn url(&self, uri: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), uri.trim_start_matches('/'))
    }

    async fn execute(&self, method: reqwest::Method, uri: &str, body: Option<String>) -> Result<reqwest::Response> {
        let url = self.url(uri);
        let mut req = self.client.request(method.clone(), &url).header("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            req = req.header("X-API-KEY", key);
        }
        if let Some(body) = body {
            req = req.body(body);
        }
        let resp = req.send().await.with_context(|| format!("calling kong {method} {url}"))?;
        tracing::info!(%method, %url, status = %resp.status(), "kong: request completed");
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl Gateway for KongGateway {
    async fn get_service_all_instances(&self, target: &Target, upstream_name: &str) -> Result<Vec<Instance>> {
        let upstream_name = target.upstream_name(upstream_name);
        let resp = self.execute(reqwest::Method::GET, &format!("{upstream_name}/targets"), None).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        self.known_upstreams.insert(upstream_name.clone(), true);

        let body: serde_json::Value = resp.json().await.context("parsing kong targets response")?;
        let data = body.get("data").and_then(serde_json::Value::as_array).cloned().unwrap_or_default();

        let mut instances = Vec::with_capacity(data.len());
        for item in data {
            let Some(target_addr) = item.get("target").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let Some((ip, port)) = target_addr.split_once(':') else {
                continue;
            };
            instances.push(Instance {
                ip: ip.to_string(),
                port: port.parse().unwrap_or_default(),
                weight: item.get("weight").and_then(serde_json::Value::as_u64).unwrap_or(1) as u32,
                metadata: Default::default(),
                enabled: true,
                change: false,
                ext: Map::new(),
            });
        }
        Ok(instances)
    }

    async fn sync_instances(
        &self,
        target: &Target,
        upstream_name: &str,
        diff: &[Instance],
        _full: &[Instance],
    ) -> Result<()> {
        if diff.is_empty() {
            tracing::info!(upstream_name, "kong: no diff, skipping sync");
            return Ok(());
        }

        let upstream_name = target.upstream_name(upstream_name);
        if !self.known_upstreams.contains_key(&upstream_name) {
            let template = target
                .config
                .get("template")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(DEFAULT_UPSTREAM_TEMPLATE);
            let body = template.replace("$name", &upstream_name);
            self.execute(reqwest::Method::POST, "", Some(body)).await?;
            self.known_upstreams.insert(upstream_name.clone(), true);
        }

        for instance in diff {
            if instance.enabled {
                let body = serde_json::json!({
                    "target": format!("{}:{}", instance.ip, instance.port),
                    "weight": instance.weight,
                    "tags": ["discovery-syncer-auto"],
                })
                .to_string();
                self.execute(reqwest::Method::POST, &format!("{upstream_name}/targets/"), Some(body))
                    .await?;
            } else {
                let uri = format!("{upstream_name}/targets/{}:{}", instance.ip, instance.port);
                self.execute(reqwest::Method::DELETE, &uri, None).await?;
            }
        }
        Ok(())
    }

    async fn fetch_admin_api_to_file(&self, _file_name: Option<&str>) -> Result<(String, PathBuf)> {
        Err(SyncerError::Unrealized {
            driver: "kong".to_string(),
            operation: "fetch_admin_api_to_file",
        }
        .into())
    }

    async fn migrate_to(&self, _other: &dyn Gateway) -> Result<()> {
        Err(SyncerError::Unrealized {
            driver: "kong".to_string(),
            operation: "migrate_to",
        }
        .into())
    }

    async fn restore_gateway(&self, _body: &str) -> Result<()> {
        Err(SyncerError::Unrealized {
            driver: "kong".to_string(),
            operation: "restore_gateway",
        }
        .into())
    }

    fn name(&self) -> &str {
        "kong"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
