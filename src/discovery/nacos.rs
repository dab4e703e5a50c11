//! Nacos discovery driver.
//!
//! Talks to the `ns/catalog/*` family of endpoints (not `ns/service/list` —
//! the catalog endpoints return instance membership inline, which is what
//! the reconciliation engine needs on every cycle). `config`/`ext_data` are
//! opaque JSON maps merged over a small set of built-in defaults; a stray
//! `template` key (carried by `Target::config` for gateway-side rendering)
//! is stripped before being sent on as query parameters.

use crate::config::types::NacosConfig;
use crate::driver::Discovery;
use crate::model::{Instance, Registration, Service};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct NacosDriver {
    config: NacosConfig,
    client: reqwest::Client,
}

impl NacosDriver {
    pub fn new(config: NacosConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build nacos HTTP client");
        Self { config, client }
    }

    fn url(&self, uri: &str) -> String {
        format!(
            "{}{}{}",
            self.config.host.trim_end_matches('/'),
            self.config.prefix,
            uri
        )
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        uri: &str,
        params: &HashMap<String, String>,
    ) -> Result<Value> {
        let url = self.url(uri);
        let resp = self
            .client
            .request(method.clone(), &url)
            .query(params)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("calling nacos {method} {url}"))?;

        let text = resp.text().await.context("reading nacos response body")?;
        tracing::info!(%method, %url, "nacos: request completed");
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn stringify_params(map: &Map<String, Value>) -> HashMap<String, String> {
    map.iter()
        .filter(|(k, _)| k.as_str() != "template")
        .map(|(k, v)| (k.clone(), value_to_query_string(v)))
        .collect()
}

fn value_to_query_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Discovery for NacosDriver {
    async fn get_all_service(&self, config: &Map<String, Value>, enabled_only: bool) -> Result<Vec<Service>> {
        let mut params: HashMap<String, String> = HashMap::from([
            ("pageNo".to_string(), "0".to_string()),
            ("pageSize".to_string(), "1000000".to_string()),
            ("groupNameParam".to_string(), String::new()),
            ("namespaceId".to_string(), String::new()),
            ("withInstances".to_string(), "true".to_string()),
            ("hasIpCount".to_string(), "true".to_string()),
        ]);
        params.extend(stringify_params(config));
        let namespace_id = params.get("namespaceId").cloned().unwrap_or_default();

        let resp = self
            .execute(reqwest::Method::GET, "ns/catalog/services", &params)
            .await?;

        let items = resp.as_array().cloned().unwrap_or_default();
        let mut services = Vec::with_capacity(items.len());

        for item in items {
            let service_name = item
                .get("serviceName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let group_name = item.get("groupName").and_then(Value::as_str).map(str::to_string);
            let ephemeral = item.get("ephemeral").cloned();

            let mut instances = Vec::new();
            if let Some(cluster_map) = item.get("clusterMap").and_then(Value::as_object) {
                for (cluster_name, cluster) in cluster_map {
                    let hosts = cluster.get("hosts").and_then(Value::as_array).cloned().unwrap_or_default();
                    for host in hosts {
                        let enabled = host.get("enabled").and_then(Value::as_bool).unwrap_or(false);
                        if enabled_only && !enabled {
                            continue;
                        }
                        let mut ext = Map::new();
                        ext.insert("serviceName".into(), Value::String(service_name.clone()));
                        ext.insert(
                            "groupName".into(),
                            group_name.clone().map(Value::String).unwrap_or(Value::Null),
                        );
                        ext.insert("clusterName".into(), Value::String(cluster_name.clone()));
                        ext.insert("namespaceId".into(), Value::String(namespace_id.clone()));
                        ext.insert("ephemeral".into(), ephemeral.clone().unwrap_or(Value::Null));

                        instances.push(Instance {
                            ip: host.get("ip").and_then(Value::as_str).unwrap_or_default().to_string(),
                            port: host.get("port").and_then(Value::as_u64).unwrap_or_default() as u16,
                            weight: host
                                .get("weight")
                                .and_then(Value::as_u64)
                                .map(|w| w as u32)
                                .unwrap_or(self.config.weight),
                            metadata: host
                                .get("metadata")
                                .and_then(Value::as_object)
                                .map(|m| {
                                    m.iter()
                                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                                        .collect()
                                })
                                .unwrap_or_default(),
                            enabled,
                            change: false,
                            ext,
                        });
                    }
                }
            }

            services.push(Service {
                name: service_name,
                last_time: -1,
                instances,
            });
        }

        Ok(services)
    }

    async fn get_service_all_instances(
        &self,
        service_name: &str,
        ext_data: &Map<String, Value>,
        enabled_only: bool,
    ) -> Result<(Vec<Instance>, i64)> {
        let mut params = stringify_params(ext_data);
        params.insert("serviceName".to_string(), service_name.to_string());
        params.insert("clusterName".to_string(), "DEFAULT".to_string());
        params.insert("groupName".to_string(), "DEFAULT_GROUP".to_string());
        params.insert("pageSize".to_string(), "1000000".to_string());
        params.insert("pageNo".to_string(), "1".to_string());

        let resp = self
            .execute(reqwest::Method::GET, "ns/catalog/instances", &params)
            .await?;

        let response_group_name = resp.get("groupName").and_then(Value::as_str).map(str::to_string);
        let list = resp.get("list").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut instances = Vec::with_capacity(list.len());
        for item in list {
            let enabled = item.get("enabled").and_then(Value::as_bool).unwrap_or(false);
            if enabled_only && !enabled {
                continue;
            }
            let mut ext = Map::new();
            ext.insert(
                "serviceName".into(),
                item.get("serviceName").cloned().unwrap_or(Value::Null),
            );
            ext.insert(
                "groupName".into(),
                response_group_name.clone().map(Value::String).unwrap_or(Value::Null),
            );
            ext.insert(
                "clusterName".into(),
                item.get("clusterName").cloned().unwrap_or(Value::Null),
            );
            ext.insert(
                "namespaceId".into(),
                item.get("namespaceId").cloned().unwrap_or(Value::Null),
            );

            instances.push(Instance {
                ip: item.get("ip").and_then(Value::as_str).unwrap_or_default().to_string(),
                port: item.get("port").and_then(Value::as_u64).unwrap_or_default() as u16,
                weight: item
                    .get("weight")
                    .and_then(Value::as_u64)
                    .map(|w| w as u32)
                    .unwrap_or(self.config.weight),
                metadata: item
                    .get("metadata")
                    .and_then(Value::as_object)
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default(),
                enabled,
                change: false,
                ext,
            });
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(-1);
        Ok((instances, now))
    }

    async fn modify_registration(&self, registration: &Registration, instances: &[Instance]) -> Result<()> {
        for instance in instances.iter().filter(|i| i.change) {
            let mut params: HashMap<String, String> = HashMap::from([
                ("ip".to_string(), instance.ip.clone()),
                ("port".to_string(), instance.port.to_string()),
                ("weight".to_string(), instance.weight.to_string()),
                ("enabled".to_string(), instance.enabled.to_string()),
                ("serviceName".to_string(), registration.service_name.clone()),
                (
                    "metadata".to_string(),
                    serde_json::to_string(&instance.metadata).unwrap_or_default(),
                ),
            ]);
            params.extend(stringify_params(&instance.ext));
            params.extend(stringify_params(&registration.ext_data));

            self.execute(reqwest::Method::PUT, "ns/instance", &params).await?;
        }
        Ok(())
    }
}
