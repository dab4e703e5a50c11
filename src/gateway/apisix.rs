//! APISIX gateway driver.
//!
//! Supports both the 2.x (`v2`) and 3.x (`v3`) admin API shapes. Version is a
//! configuration value, not auto-detected, since the admin API itself doesn't
//! advertise it. `service_name_map` remembers `upstream_name -> upstreams/{id}`
//! so repeat syncs PATCH the node list directly instead of re-resolving the id.

use crate::config::types::ApisixConfig;
use crate::driver::Gateway;
use crate::error::SyncerError;
use crate::gateway::translate::{self, alias_uri, IGNORE_URIS};
use crate::model::{Instance, Target};
use anyhow::{Context, Result};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::path::PathBuf;

const DEFAULT_UPSTREAM_TEMPLATE: &str = r#"{
    "id": "$name",
    "name": "$name",
    "nodes": $nodes,
    "timeout": {
        "connect": 30,
        "send": 30,
        "read": 30
    },
    "type": "roundrobin",
    "desc": "auto sync by discovery-syncer"
}"#;

const FETCH_ALL_UPSTREAM: &str = "upstreams";
const RESTORE_FAN_OUT: usize = 8;

struct ResourceDef {
    uri: &'static str,
    versions: &'static [&'static str],
    field: &'static str,
    order: u8,
}

const RESOURCES: &[ResourceDef] = &[
    ResourceDef { uri: "ssl", versions: &["v2"], field: "ssl", order: 0 },
    ResourceDef { uri: "ssls", versions: &["v3"], field: "ssls", order: 0 },
    ResourceDef { uri: "proto", versions: &["v2"], field: "proto", order: 0 },
    ResourceDef { uri: "protos", versions: &["v3"], field: "protos", order: 0 },
    ResourceDef { uri: "secrets", versions: &["v3"], field: "secrets", order: 0 },
    ResourceDef { uri: "plugins/list", versions: &["v2", "v3"], field: "plugins", order: 0 },
    ResourceDef { uri: "global_rules", versions: &["v2", "v3"], field: "global_rules", order: 0 },
    ResourceDef { uri: "stream_routes", versions: &["v2", "v3"], field: "stream_routes", order: 0 },
    ResourceDef { uri: "plugin_configs", versions: &["v2", "v3"], field: "plugin_configs", order: 0 },
    ResourceDef { uri: "plugin_metadata", versions: &["v2", "v3"], field: "plugin_metadata", order: 0 },
    ResourceDef { uri: "consumers", versions: &["v2", "v3"], field: "consumers", order: 1 },
    ResourceDef { uri: "services", versions: &["v2", "v3"], field: "services", order: 2 },
    ResourceDef { uri: "upstreams", versions: &["v2", "v3"], field: "upstreams", order: 2 },
    ResourceDef { uri: "consumer_groups", versions: &["v3"], field: "consumer_groups", order: 2 },
    ResourceDef { uri: "routes", versions: &["v2", "v3"], field: "routes", order: 3 },
];

pub struct ApisixGateway {
    config: ApisixConfig,
    client: reqwest::Client,
    service_name_map: DashMap<String, String>,
}

impl ApisixGateway {
    pub fn new(config: ApisixConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build apisix HTTP client");
        Self {
            config,
            client,
            service_name_map: DashMap::new(),
        }
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn url(&self, uri: &str) -> String {
        format!("{}/apisix/admin/{}", self.config.base_url.trim_end_matches('/'), uri)
    }

    async fn execute(&self, method: reqwest::Method, uri: &str, body: Option<String>) -> Result<Value> {
        let url = self.url(uri);
        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("X-API-KEY", &self.config.api_key)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.body(body);
        }

        let resp = req.send().await.with_context(|| format!("calling apisix {method} {url}"))?;
        let text = resp.text().await.context("reading apisix response body")?;
        tracing::info!(%method, %url, "apisix: request completed");

        let mut parsed: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        if parsed.get("error_msg").is_some() {
            parsed = serde_json::json!({ "list": [] });
        }
        if uri == "plugins/list" {
            if let Some(names) = parsed.as_array().cloned() {
                let list: Vec<Value> = names
                    .into_iter()
                    .map(|name| serde_json::json!({ "name": name }))
                    .collect();
                parsed = serde_json::json!({ "list": list });
            }
        }
        Ok(parsed)
    }

    fn resolve_upstream_name(&self, target: &Target, upstream_name: &str) -> String {
        target.upstream_name(upstream_name)
    }

    fn render_template(template: &str, name: &str, nodes_json: &str) -> String {
        template.replace("$name", name).replace("$nodes", nodes_json)
    }
}

#[async_trait::async_trait]
impl Gateway for ApisixGateway {
    async fn get_service_all_instances(&self, target: &Target, upstream_name: &str) -> Result<Vec<Instance>> {
        let upstream_name = self.resolve_upstream_name(target, upstream_name);
        let uri = self
            .service_name_map
            .get(&upstream_name)
            .map(|v| v.clone())
            .unwrap_or_else(|| FETCH_ALL_UPSTREAM.to_string());

        let resp = self.execute(reqwest::Method::GET, &uri, None).await?;
        let list = match resp.get("list").and_then(Value::as_array) {
            Some(list) => list.clone(),
            None => vec![resp.clone()],
        };

        let mut instances = Vec::new();
        for upstream in list {
            let value = upstream.get("value").cloned().unwrap_or(Value::Null);
            let name = value.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            if let (Some(id), false) = (value.get("id").and_then(Value::as_str), name.is_empty()) {
                self.service_name_map
                    .insert(name.clone(), format!("{FETCH_ALL_UPSTREAM}/{id}"));
            }
            if name != upstream_name {
                continue;
            }

            match value.get("nodes") {
                Some(Value::Array(nodes)) => {
                    for node in nodes {
                        instances.push(Instance {
                            ip: node.get("host").and_then(Value::as_str).unwrap_or_default().to_string(),
                            port: node.get("port").and_then(Value::as_u64).unwrap_or_default() as u16,
                            weight: node.get("weight").and_then(Value::as_u64).unwrap_or(1) as u32,
                            metadata: Default::default(),
                            enabled: true,
                            change: false,
                            ext: Map::new(),
                        });
                    }
                }
                Some(Value::Object(nodes)) => {
                    for (addr, weight) in nodes {
                        if let Some((host, port)) = addr.split_once(':') {
                            instances.push(Instance {
                                ip: host.to_string(),
                                port: port.parse().unwrap_or_default(),
                                weight: weight.as_u64().unwrap_or(1) as u32,
                                metadata: Default::default(),
                                enabled: true,
                                change: false,
                                ext: Map::new(),
                            });
                        }
                    }
                }
                _ => {}
            }
            break;
        }
        Ok(instances)
    }

    async fn sync_instances(
        &self,
        target: &Target,
        upstream_name: &str,
        diff: &[Instance],
        full: &[Instance],
    ) -> Result<()> {
        if diff.is_empty() {
            tracing::info!(upstream_name, "apisix: no diff to sync, skipping");
            return Ok(());
        }

        let upstream_name = self.resolve_upstream_name(target, upstream_name);
        let nodes_json = serde_json::to_string(
            &full
                .iter()
                .map(|i| serde_json::json!({ "host": i.ip, "port": i.port, "weight": i.weight }))
                .collect::<Vec<_>>(),
        )?;

        let cached_uri = self.service_name_map.get(&upstream_name).map(|v| v.clone());
        let (method, uri, body) = match cached_uri {
            Some(uri) => (reqwest::Method::PATCH, format!("{uri}/nodes"), nodes_json),
            None => {
                let template = target
                    .config
                    .get("template")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_UPSTREAM_TEMPLATE);
                let body = Self::render_template(template, &upstream_name, &nodes_json);
                (
                    reqwest::Method::PUT,
                    format!("{FETCH_ALL_UPSTREAM}/{upstream_name}"),
                    body,
                )
            }
        };

        self.execute(method, &uri, Some(body)).await?;
        Ok(())
    }

    async fn fetch_admin_api_to_file(&self, file_name: Option<&str>) -> Result<(String, PathBuf)> {
        let mut collected: std::collections::BTreeMap<String, Vec<Value>> = std::collections::BTreeMap::new();

        for resource in RESOURCES {
            if !resource.versions.contains(&self.version()) {
                continue;
            }
            let resp = self.execute(reqwest::Method::GET, resource.uri, None).await?;
            let list = resp.get("list").and_then(Value::as_array).cloned().unwrap_or_default();

            let mut values = Vec::with_capacity(list.len());
            for item in list {
                let mut value = item.get("value").cloned().unwrap_or(item);
                if value.get("status").and_then(Value::as_i64) == Some(0) {
                    continue;
                }
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("update_time");
                    obj.remove("create_time");
                }
                values.push(value);
            }
            collected.insert(resource.field.to_string(), values);
        }

        let body_yaml = serde_yaml::to_string(&collected).context("rendering apisix declarative yaml")?;
        let content = format!(
            "# Auto generate by discovery-syncer, Don't Modify\n\n# Notice!!! Generate apisix version is >>>  {}  <<<\n\n{body_yaml}\n#END\n",
            self.version()
        );

        let path = match file_name {
            Some(name) => PathBuf::from(name),
            None => {
                let mut p = std::env::temp_dir();
                p.push("apisix.yaml");
                p
            }
        };
        tokio::fs::write(&path, &content).await.context("writing apisix declarative file")?;
        Ok((content, path))
    }

    async fn migrate_to(&self, other: &dyn Gateway) -> Result<()> {
        let other = other
            .as_any()
            .downcast_ref::<ApisixGateway>()
            .ok_or_else(|| SyncerError::Unrealized {
                driver: "apisix".to_string(),
                operation: "migrate_to (only apisix-to-apisix is supported)",
            })?;

        let mut by_order: std::collections::BTreeMap<u8, Vec<&ResourceDef>> = std::collections::BTreeMap::new();
        for resource in RESOURCES {
            if IGNORE_URIS.contains(&resource.uri) || !resource.versions.contains(&self.version()) {
                continue;
            }
            by_order.entry(resource.order).or_default().push(resource);
        }

        for (_, bucket) in by_order {
            for resource in bucket {
                let resp = self.execute(reqwest::Method::GET, resource.uri, None).await?;
                let list = resp.get("list").and_then(Value::as_array).cloned().unwrap_or_default();
                if list.is_empty() {
                    continue;
                }

                let alias = alias_uri(resource.uri).to_string();
                stream::iter(list.into_iter().map(|item| {
                    let alias = alias.clone();
                    async move {
                        let value = item.get("value").cloned().unwrap_or(item);
                        let id = value.get("id").and_then(Value::as_str).map(str::to_string);
                        let Some(id) = id else {
                            tracing::warn!(uri = resource.uri, "apisix: migrate: item missing id, skipping");
                            return;
                        };
                        let translated = translate::translate(self.version(), other.version(), value);
                        let body = serde_json::to_string(&translated).unwrap_or_default();
                        if let Err(e) = other.execute(reqwest::Method::PUT, &format!("{alias}/{id}"), Some(body)).await {
                            tracing::warn!(uri = %alias, id, "apisix: migrate: put failed: {e}");
                        }
                    }
                }))
                .buffer_unordered(RESTORE_FAN_OUT)
                .collect::<()>()
                .await;
            }
        }
        Ok(())
    }

    async fn restore_gateway(&self, body: &str) -> Result<()> {
        let version_marker = regex::Regex::new(r">>>\s*(\S+)\s*<<<").unwrap();
        if let Some(caps) = version_marker.captures(body) {
            let found = &caps[1];
            if found != self.version() {
                tracing::warn!(found, expected = self.version(), "apisix: restore: version mismatch, proceeding anyway");
            }
        }

        let yaml_body: String = body
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");
        let parsed: std::collections::BTreeMap<String, Vec<Value>> =
            serde_yaml::from_str(&yaml_body).context("parsing apisix declarative file")?;

        let mut by_order: std::collections::BTreeMap<u8, Vec<(&str, &Vec<Value>)>> = std::collections::BTreeMap::new();
        for resource in RESOURCES {
            if IGNORE_URIS.contains(&resource.uri) || !resource.versions.contains(&self.version()) {
                continue;
            }
            if let Some(items) = parsed.get(resource.field) {
                by_order.entry(resource.order).or_default().push((resource.uri, items));
            }
        }

        for (_, bucket) in by_order {
            for (uri, items) in bucket {
                stream::iter(items.iter().cloned().map(|item| {
                    async move {
                        let id = item
                            .get("id")
                            .and_then(Value::as_str)
                            .or_else(|| item.get("username").and_then(Value::as_str))
                            .map(str::to_string);
                        let Some(id) = id else {
                            tracing::warn!(uri, "apisix: restore: item missing id, skipping");
                            return;
                        };
                        let body = serde_json::to_string(&item).unwrap_or_default();
                        if let Err(e) = self.execute(reqwest::Method::PUT, &format!("{uri}/{id}"), Some(body)).await {
                            tracing::warn!(uri, id, "apisix: restore: put failed: {e}");
                        }
                    }
                }))
                .buffer_unordered(RESTORE_FAN_OUT)
                .collect::<()>()
                .await;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "apisix"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_template_substitutes_name_and_nodes() {
        let out = ApisixGateway::render_template(DEFAULT_UPSTREAM_TEMPLATE, "orders", "[]");
        assert!(out.contains("\"id\": \"orders\""));
        assert!(out.contains("\"nodes\": []"));
    }
}
