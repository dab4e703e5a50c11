use crate::model::Target;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats YAML `null` the same as
/// a missing field (returns `T::default()`).
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level application configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Value the `SYNCER-API-KEY` header must equal. Overridable via `SYNCER_API_KEY`.
    pub api_key: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub discovery: HashMap<String, DiscoveryDriverConfig>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub gateway: HashMap<String, GatewayDriverConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_listen() -> String {
    "0.0.0.0:8089".to_string()
}

fn default_database_path() -> String {
    "./syncer.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            api_key: String::new(),
            database_path: default_database_path(),
            targets: Vec::new(),
            discovery: HashMap::new(),
            gateway: HashMap::new(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One discovery driver instance, keyed by name in `AppConfig::discovery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiscoveryDriverConfig {
    Nacos(NacosConfig),
    Eureka(EurekaConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NacosConfig {
    pub host: String,
    #[serde(default = "default_nacos_prefix")]
    pub prefix: String,
    /// Fallback weight used when an instance omits its own.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_nacos_prefix() -> String {
    "/nacos/v1/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EurekaConfig {
    pub host: String,
    #[serde(default = "default_eureka_prefix")]
    pub prefix: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_eureka_prefix() -> String {
    "/eureka/v2/".to_string()
}

fn default_weight() -> u32 {
    1
}

/// One gateway driver instance, keyed by name in `AppConfig::gateway`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayDriverConfig {
    Apisix(ApisixConfig),
    Kong(KongConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApisixConfig {
    pub base_url: String,
    pub api_key: String,
    /// `"v2"` or `"v3"`.
    #[serde(default = "default_apisix_version")]
    pub version: String,
    /// Optional upstream-body template used instead of the built-in default.
    #[serde(default)]
    pub template: Option<serde_json::Value>,
}

fn default_apisix_version() -> String {
    "v3".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KongConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Health-check sub-block of `Target::config`, when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_probe_type")]
    #[serde(rename = "type")]
    pub probe_type: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(rename = "timeout-sec", default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub healthy: HealthyThresholds,
    #[serde(default)]
    pub unhealthy: UnhealthyThresholds,
    #[serde(default)]
    pub alert: Option<AlertConfig>,
    #[serde(rename = "min-hosts", default = "default_min_hosts")]
    pub min_hosts: u32,
}

fn default_probe_type() -> String {
    "http".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_uri() -> String {
    "/".to_string()
}

fn default_timeout_sec() -> u64 {
    3
}

fn default_min_hosts() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthyThresholds {
    #[serde(default = "default_http_statuses_2xx")]
    pub http_statuses: Vec<String>,
    #[serde(default = "default_one")]
    pub successes: u32,
}

impl Default for HealthyThresholds {
    fn default() -> Self {
        Self {
            http_statuses: default_http_statuses_2xx(),
            successes: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnhealthyThresholds {
    #[serde(default = "default_http_statuses_5xx")]
    pub http_statuses: Vec<String>,
    #[serde(default = "default_one")]
    pub failures: u32,
    #[serde(default = "default_one")]
    pub timeouts: u32,
}

impl Default for UnhealthyThresholds {
    fn default() -> Self {
        Self {
            http_statuses: default_http_statuses_5xx(),
            failures: 1,
            timeouts: 1,
        }
    }
}

fn default_http_statuses_2xx() -> Vec<String> {
    vec!["2xx".to_string()]
}

fn default_http_statuses_5xx() -> Vec<String> {
    vec!["5xx".to_string()]
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_defaults_fill_in_missing_fields() {
        let yaml = "api_key: secret\n";
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8089");
        assert_eq!(cfg.database_path, "./syncer.db");
        assert!(cfg.targets.is_empty());
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn nacos_driver_round_trips() {
        let yaml = r#"
type: nacos
host: http://nacos.internal:8848
"#;
        let cfg: DiscoveryDriverConfig = serde_yaml::from_str(yaml).unwrap();
        match cfg {
            DiscoveryDriverConfig::Nacos(n) => {
                assert_eq!(n.host, "http://nacos.internal:8848");
                assert_eq!(n.prefix, "/nacos/v1/");
                assert_eq!(n.weight, 1);
            }
            _ => panic!("expected nacos variant"),
        }
    }

    #[test]
    fn eureka_driver_round_trips() {
        let yaml = r#"
type: eureka
host: http://eureka.internal:8761
prefix: /eureka/
weight: 5
"#;
        let cfg: DiscoveryDriverConfig = serde_yaml::from_str(yaml).unwrap();
        match cfg {
            DiscoveryDriverConfig::Eureka(e) => {
                assert_eq!(e.prefix, "/eureka/");
                assert_eq!(e.weight, 5);
            }
            _ => panic!("expected eureka variant"),
        }
    }

    #[test]
    fn apisix_driver_defaults_to_v3() {
        let yaml = r#"
type: apisix
base_url: http://apisix-admin:9180
api_key: edd1c9f034335f136f87ad84b625c8f1
"#;
        let cfg: GatewayDriverConfig = serde_yaml::from_str(yaml).unwrap();
        match cfg {
            GatewayDriverConfig::Apisix(a) => assert_eq!(a.version, "v3"),
            _ => panic!("expected apisix variant"),
        }
    }

    #[test]
    fn kong_driver_api_key_optional() {
        let yaml = r#"
type: kong
base_url: http://kong-admin:8001
"#;
        let cfg: GatewayDriverConfig = serde_yaml::from_str(yaml).unwrap();
        match cfg {
            GatewayDriverConfig::Kong(k) => assert!(k.api_key.is_none()),
            _ => panic!("expected kong variant"),
        }
    }

    #[test]
    fn healthcheck_config_defaults() {
        let yaml = "uri: /ping\n";
        let cfg: HealthCheckConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.uri, "/ping");
        assert_eq!(cfg.method, "GET");
        assert_eq!(cfg.healthy.successes, 1);
        assert_eq!(cfg.unhealthy.failures, 1);
        assert_eq!(cfg.min_hosts, 1);
    }
}
