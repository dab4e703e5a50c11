//! Canonical data model shared by every driver and the reconciliation engine
//! (instances, services, targets, registrations, and the two persisted row
//! types). Drivers translate their own wire shapes into and out of these
//! types; the engine never depends on a concrete driver's representation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single backend host, as reconciled between a discovery registry and a gateway.
///
/// Identified within a service by `(ip, port)`. `ext` is opaque to the engine —
/// only the driver that produced it interprets its contents (Eureka `instanceId`,
/// Nacos `clusterName`/`namespaceId`/`ephemeral`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub weight: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub enabled: bool,
    /// Transient: "this instance should be pushed this cycle". Never persisted.
    #[serde(skip, default)]
    pub change: bool,
    #[serde(default)]
    pub ext: serde_json::Map<String, serde_json::Value>,
}

impl Instance {
    /// The `ip:port` key instances are identified by within a service.
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Clone this instance with `change`/`enabled` set for inclusion in a diff set.
    pub fn as_diff(&self, enabled: bool) -> Instance {
        let mut clone = self.clone();
        clone.change = true;
        clone.enabled = enabled;
        clone
    }
}

/// A named set of instances as returned by a discovery driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Registry hint epoch seconds; -1 means unknown.
    #[serde(default = "default_last_time")]
    pub last_time: i64,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

fn default_last_time() -> i64 {
    -1
}

/// A configured (discovery, gateway) reconciliation pair with a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub id: String,
    pub discovery: String,
    pub gateway: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub exclude_service: Vec<String>,
    #[serde(default)]
    pub upstream_prefix: Option<String>,
    pub fetch_interval: String,
    #[serde(default = "default_maximum_interval")]
    pub maximum_interval_sec: i64,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_maximum_interval() -> i64 {
    -1
}

impl Target {
    /// `{upstream_prefix}-{service_name}`, hyphen-joined with empty tokens dropped.
    pub fn upstream_name(&self, service_name: &str) -> String {
        match self.upstream_prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{prefix}-{service_name}"),
            None => service_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistrationMatchType {
    Ip,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistrationAction {
    Up,
    Down,
    Origin,
}

/// Instruction for the manual enable/disable endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    pub match_type: RegistrationMatchType,
    pub regexp_str: String,
    #[serde(default)]
    pub metadata_key: Option<String>,
    pub status: RegistrationAction,
    pub other_status: RegistrationAction,
    pub service_name: String,
    #[serde(default)]
    pub ext_data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Unknown
    }
}

/// Persisted per-instance health-probe accounting row (`instances` table).
#[derive(Debug, Clone)]
pub struct DiscoveryInstance {
    pub id: String,
    pub target_id: String,
    pub service: String,
    /// `ip:port`.
    pub instance: String,
    pub successes: u32,
    pub failures: u32,
    pub timeouts: u32,
    pub status: HealthStatus,
    pub create_time: i64,
    pub last_time: i64,
}

/// Probe outcome folded into a `DiscoveryInstance` counter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
    Timeout,
}

const COUNTER_CLAMP: u32 = 256;

impl DiscoveryInstance {
    /// Apply one probe outcome under the clamp-and-zero counter rule, updating
    /// `status` from the resulting counters. Returns `true` if `status` changed.
    pub fn apply_outcome(
        &mut self,
        outcome: ProbeOutcome,
        healthy_successes: u32,
        unhealthy_failures: u32,
        unhealthy_timeouts: u32,
    ) -> bool {
        match outcome {
            ProbeOutcome::Success => {
                self.successes = (self.successes + 1).min(COUNTER_CLAMP);
                self.failures = 0;
                self.timeouts = 0;
            }
            ProbeOutcome::Failure => {
                self.failures = (self.failures + 1).min(COUNTER_CLAMP);
                self.successes = 0;
            }
            ProbeOutcome::Timeout => {
                self.timeouts = (self.timeouts + 1).min(COUNTER_CLAMP);
                self.successes = 0;
            }
        }

        let before = self.status;
        self.status = if self.successes >= healthy_successes.max(1) {
            HealthStatus::Healthy
        } else if self.failures >= unhealthy_failures.max(1)
            || self.timeouts >= unhealthy_timeouts.max(1)
        {
            HealthStatus::Unhealthy
        } else {
            before
        };
        before != self.status
    }
}

/// Persisted per-target reconciliation bookkeeping row (`jobs` table).
#[derive(Debug, Clone)]
pub struct Job {
    pub target_id: String,
    pub description: String,
    pub discovery: String,
    pub gateway: String,
    pub maximum_interval_sec: i64,
    pub enabled: bool,
    pub last_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_key_is_ip_colon_port() {
        let inst = Instance {
            ip: "10.0.0.1".into(),
            port: 8080,
            weight: 1,
            metadata: HashMap::new(),
            enabled: true,
            change: false,
            ext: serde_json::Map::new(),
        };
        assert_eq!(inst.key(), "10.0.0.1:8080");
    }

    #[test]
    fn upstream_name_drops_empty_prefix() {
        let mut target = sample_target();
        target.upstream_prefix = None;
        assert_eq!(target.upstream_name("orders"), "orders");

        target.upstream_prefix = Some("prod".to_string());
        assert_eq!(target.upstream_name("orders"), "prod-orders");

        target.upstream_prefix = Some(String::new());
        assert_eq!(target.upstream_name("orders"), "orders");
    }

    #[test]
    fn counter_clamp_success_zeroes_failures_and_timeouts() {
        let mut row = sample_row();
        row.failures = 3;
        row.timeouts = 2;
        row.apply_outcome(ProbeOutcome::Success, 1, 1, 1);
        assert_eq!(row.successes, 1);
        assert_eq!(row.failures, 0);
        assert_eq!(row.timeouts, 0);
    }

    #[test]
    fn counter_clamp_failure_zeroes_successes() {
        let mut row = sample_row();
        row.successes = 5;
        row.apply_outcome(ProbeOutcome::Failure, 1, 1, 1);
        assert_eq!(row.successes, 0);
        assert_eq!(row.failures, 1);
    }

    #[test]
    fn counter_clamp_saturates_at_256() {
        let mut row = sample_row();
        row.failures = 256;
        row.apply_outcome(ProbeOutcome::Failure, 1, 1, 1);
        assert_eq!(row.failures, 256);
    }

    #[test]
    fn status_transitions_on_threshold() {
        let mut row = sample_row();
        assert!(!row.apply_outcome(ProbeOutcome::Success, 2, 1, 1));
        assert_eq!(row.status, HealthStatus::Unknown);
        assert!(row.apply_outcome(ProbeOutcome::Success, 2, 1, 1));
        assert_eq!(row.status, HealthStatus::Healthy);

        assert!(row.apply_outcome(ProbeOutcome::Failure, 2, 1, 1));
        assert_eq!(row.status, HealthStatus::Unhealthy);
    }

    fn sample_target() -> Target {
        Target {
            id: "0-apisix-nacos".into(),
            discovery: "nacos".into(),
            gateway: "apisix".into(),
            name: "t".into(),
            enabled: true,
            exclude_service: vec![],
            upstream_prefix: None,
            fetch_interval: "@every 30s".into(),
            maximum_interval_sec: -1,
            config: serde_json::Map::new(),
        }
    }

    fn sample_row() -> DiscoveryInstance {
        DiscoveryInstance {
            id: "x".into(),
            target_id: "t".into(),
            service: "orders".into(),
            instance: "10.0.0.1:8080".into(),
            successes: 0,
            failures: 0,
            timeouts: 0,
            status: HealthStatus::Unknown,
            create_time: 0,
            last_time: 0,
        }
    }
}
