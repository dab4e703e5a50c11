//! Eureka discovery driver.
//!
//! See https://github.com/Netflix/eureka/wiki/Eureka-REST-operations. Eureka
//! has no boolean enabled flag — instance health is carried entirely in its
//! `status` field, so every instance in or out of a `Registration` round-trips
//! through the `UP` / `OUT_OF_SERVICE` translation table below rather than a
//! plain bool.

use crate::config::types::EurekaConfig;
use crate::driver::Discovery;
use crate::model::{Instance, Registration, Service};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct EurekaDriver {
    config: EurekaConfig,
    client: reqwest::Client,
}

fn status_to_enabled(status: &str) -> bool {
    matches!(status, "UP")
}

fn enabled_to_status(enabled: bool) -> &'static str {
    if enabled {
        "UP"
    } else {
        "OUT_OF_SERVICE"
    }
}

impl EurekaDriver {
    pub fn new(config: EurekaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build eureka HTTP client");
        Self { config, client }
    }

    fn url(&self, uri: &str) -> String {
        format!(
            "{}{}apps{}",
            self.config.host.trim_end_matches('/'),
            self.config.prefix,
            uri
        )
    }

    /// Returns an empty object on 404, matching the upstream's "app not found
    /// is not an error" treatment — every call site already expects an
    /// absent list, not a propagated failure.
    async fn execute(
        &self,
        method: reqwest::Method,
        uri: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let url = self.url(uri);
        let resp = self
            .client
            .request(method.clone(), &url)
            .query(params)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("calling eureka {method} {url}"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Object(Map::new()));
        }

        let text = resp.text().await.context("reading eureka response body")?;
        tracing::info!(%method, %url, "eureka: request completed");
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    fn instances_from(&self, instance_array: &[Value], enabled_only: bool) -> Vec<Instance> {
        let mut instances = Vec::with_capacity(instance_array.len());
        for item in instance_array {
            let status = item.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN");
            let enabled = status_to_enabled(status);
            if enabled_only && !enabled {
                continue;
            }

            let port = item
                .get("port")
                .and_then(|p| p.get("$"))
                .and_then(Value::as_u64)
                .unwrap_or_default() as u16;
            let ip = item.get("ipAddr").and_then(Value::as_str).unwrap_or_default().to_string();
            let instance_id = item.get("instanceId").cloned().unwrap_or(Value::Null);
            let service_up_timestamp_ms = item
                .get("leaseInfo")
                .and_then(|l| l.get("serviceUpTimestamp"))
                .and_then(Value::as_i64)
                .unwrap_or(-1000);

            let mut ext = Map::new();
            ext.insert("instanceId".into(), instance_id);
            ext.insert(
                "serviceUpTimestamp".into(),
                Value::from(service_up_timestamp_ms / 1000),
            );

            instances.push(Instance {
                ip,
                port,
                weight: self.config.weight,
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
        instances
    }
}

/// Eureka's `instance` field is a single object when an application has
/// exactly one instance and an array otherwise — normalize both shapes.
fn instance_array(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(arr) => arr.clone(),
        Value::Null => Vec::new(),
        single => vec![single.clone()],
    }
}

#[async_trait]
impl Discovery for EurekaDriver {
    async fn get_all_service(&self, _config: &Map<String, Value>, enabled_only: bool) -> Result<Vec<Service>> {
        let resp = self.execute(reqwest::Method::GET, "", &[]).await?;
        let apps = resp
            .get("applications")
            .and_then(|a| a.get("application"))
            .map(instance_array)
            .unwrap_or_default();

        let mut services = Vec::with_capacity(apps.len());
        for app in apps {
            let name = app.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let instance_list = app.get("instance").map(instance_array).unwrap_or_default();
            services.push(Service {
                name,
                last_time: -1,
                instances: self.instances_from(&instance_list, enabled_only),
            });
        }
        Ok(services)
    }

    async fn get_service_all_instances(
        &self,
        service_name: &str,
        _ext_data: &Map<String, Value>,
        enabled_only: bool,
    ) -> Result<(Vec<Instance>, i64)> {
        let resp = self
            .execute(reqwest::Method::GET, &format!("/{service_name}"), &[])
            .await?;
        let instance_list = resp
            .get("application")
            .and_then(|a| a.get("instance"))
            .map(instance_array)
            .unwrap_or_default();

        let instances = self.instances_from(&instance_list, enabled_only);
        let service_up_timestamp = instances
            .first()
            .and_then(|i| i.ext.get("serviceUpTimestamp"))
            .and_then(Value::as_i64)
            .unwrap_or(-1);

        Ok((instances, service_up_timestamp))
    }

    async fn modify_registration(&self, registration: &Registration, instances: &[Instance]) -> Result<()> {
        for instance in instances.iter().filter(|i| i.change) {
            let instance_id = instance
                .ext
                .get("instanceId")
                .and_then(Value::as_str)
                .with_context(|| format!("eureka instance {} missing ext.instanceId", instance.key()))?;

            let uri = format!("/{}/{}/status", registration.service_name, instance_id);
            self.execute(
                reqwest::Method::PUT,
                &uri,
                &[("value", enabled_to_status(instance.enabled).to_string())],
            )
            .await?;
        }
        Ok(())
    }
}
