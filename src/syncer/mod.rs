//! The reconciliation engine: one pass over one target's services, diffing
//! discovery registry membership against gateway upstream membership and
//! pushing the difference.

use crate::config::types::HealthCheckConfig;
use crate::driver::DriverRegistry;
use crate::health;
use crate::model::{Instance, Job, Registration, RegistrationAction, RegistrationMatchType, Target};
use crate::scheduler::rate_limit::{QueueLimiter, QUEUE_HEALTH_CHECK_JOB};
use crate::store::Store;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// `re.match`-equivalent prefix match: the pattern must match starting at
/// byte offset 0, but need not consume the whole string. The `regex` crate's
/// `is_match` searches anywhere, so this checks the leftmost match's start
/// explicitly instead.
pub fn prefix_match(re: &Regex, text: &str) -> bool {
    re.find(text).map(|m| m.start() == 0).unwrap_or(false)
}

fn down_registration(service_name: &str) -> Registration {
    Registration {
        match_type: RegistrationMatchType::Ip,
        regexp_str: String::new(),
        metadata_key: None,
        status: RegistrationAction::Down,
        other_status: RegistrationAction::Origin,
        service_name: service_name.to_string(),
        ext_data: serde_json::Map::new(),
    }
}

/// Every key present in `dim` or `gim` where either side is missing the key
/// or the weights disagree. `dim` wins ties on `enabled`: a key present only
/// in `gim` is pushed as `enabled=false`.
pub fn build_diff(dim: &HashMap<String, Instance>, gim: &HashMap<String, Instance>) -> Vec<Instance> {
    let mut keys: Vec<&String> = dim.keys().chain(gim.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut diff = Vec::new();
    for key in keys {
        match (dim.get(key), gim.get(key)) {
            (Some(d), Some(g)) => {
                if d.weight != g.weight {
                    diff.push(d.as_diff(true));
                }
            }
            (Some(d), None) => diff.push(d.as_diff(true)),
            (None, Some(g)) => diff.push(g.as_diff(false)),
            (None, None) => {}
        }
    }
    diff
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(-1)
}

/// Run one reconciliation cycle for `target`. Per-service failures are
/// logged and skipped; only a missing driver or an empty service list
/// short-circuits the whole cycle.
pub async fn run_target(
    target: &Target,
    registry: &DriverRegistry,
    store: &Store,
    http: &reqwest::Client,
    limiter: &QueueLimiter,
) -> Result<()> {
    let started = Instant::now();

    let Some(discovery) = registry.get_discovery(&target.discovery) else {
        tracing::warn!(target_id = %target.id, discovery = %target.discovery, "syncer: discovery driver not found, skipping cycle");
        return Ok(());
    };
    let Some(gateway) = registry.get_gateway(&target.gateway) else {
        tracing::warn!(target_id = %target.id, gateway = %target.gateway, "syncer: gateway driver not found, skipping cycle");
        return Ok(());
    };

    let exclude_patterns = target
        .exclude_service
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()
        .context("compiling exclude_service patterns")?;

    let services = discovery
        .get_all_service(&target.config, true)
        .await
        .with_context(|| format!("fetching services for target {}", target.id))?;

    if services.is_empty() {
        tracing::warn!(target_id = %target.id, "syncer: discovery returned no services, skipping cycle");
        return Ok(());
    }

    let healthcheck_cfg: Option<HealthCheckConfig> = target
        .config
        .get("healthcheck")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    for service in &services {
        if exclude_patterns.iter().any(|re| prefix_match(re, &service.name)) {
            continue;
        }

        let mut discovery_instances = if service.instances.is_empty() {
            match discovery
                .get_service_all_instances(&service.name, &target.config, true)
                .await
            {
                Ok((instances, _last_time)) => instances,
                Err(e) => {
                    tracing::warn!(target_id = %target.id, service = %service.name, "syncer: fetching instances failed: {e}");
                    continue;
                }
            }
        } else {
            service.instances.clone()
        };

        if let Some(hc) = &healthcheck_cfg {
            if !limiter.acquire(QUEUE_HEALTH_CHECK_JOB).await {
                tracing::warn!(target_id = %target.id, service = %service.name, "syncer: health-check dispatch rejected, queue backlogged, skipping this round");
            } else {
                let outcome =
                    health::run_round(http, store, limiter, &target.id, &service.name, &discovery_instances, hc, 8)
                        .await;

                if !outcome.unhealthy_keys.is_empty() {
                    let total = discovery_instances.len() as u32;
                    let unhealthy_count = outcome.unhealthy_keys.len() as u32;
                    if total.saturating_sub(unhealthy_count) >= hc.min_hosts {
                        let unhealthy: HashSet<&String> = outcome.unhealthy_keys.iter().collect();
                        let down_instances: Vec<Instance> = discovery_instances
                            .iter()
                            .filter(|i| unhealthy.contains(&i.key()))
                            .map(|i| i.as_diff(false))
                            .collect();
                        discovery_instances.retain(|i| !unhealthy.contains(&i.key()));

                        if !down_instances.is_empty() {
                            let registration = down_registration(&service.name);
                            if let Err(e) = discovery.modify_registration(&registration, &down_instances).await {
                                tracing::warn!(target_id = %target.id, service = %service.name, "syncer: pushing health-check DOWN registration failed: {e}");
                            }
                        }
                    } else {
                        tracing::warn!(
                            target_id = %target.id, service = %service.name, total, unhealthy_count, min_hosts = hc.min_hosts,
                            "syncer: skipping unhealthy removal, would drop below min-hosts"
                        );
                    }
                }
            }
        }

        let gateway_instances = match gateway.get_service_all_instances(target, &service.name).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target_id = %target.id, service = %service.name, "syncer: fetching gateway instances failed: {e}");
                continue;
            }
        };

        let dim: HashMap<String, Instance> = discovery_instances.iter().map(|i| (i.key(), i.clone())).collect();
        let gim: HashMap<String, Instance> = gateway_instances.iter().map(|i| (i.key(), i.clone())).collect();
        let diff = build_diff(&dim, &gim);

        metrics::histogram!(
            "syncer_diff_size",
            "target" => target.id.clone(),
            "service" => service.name.clone(),
        )
        .record(diff.len() as f64);

        if diff.is_empty() {
            tracing::info!(target_id = %target.id, service = %service.name, "syncer: no diff, skipping push");
            continue;
        }

        if let Err(e) = gateway
            .sync_instances(target, &service.name, &diff, &discovery_instances)
            .await
        {
            tracing::warn!(target_id = %target.id, service = %service.name, "syncer: sync_instances failed: {e}");
            continue;
        }
    }

    store
        .upsert_job(Job {
            target_id: target.id.clone(),
            description: target.name.clone(),
            discovery: target.discovery.clone(),
            gateway: target.gateway.clone(),
            maximum_interval_sec: target.maximum_interval_sec,
            enabled: target.enabled,
            last_time: now_secs(),
        })
        .await
        .context("upserting job row after cycle")?;

    metrics::counter!("syncer_cycle_total", "target" => target.id.clone()).increment(1);
    metrics::histogram!("syncer_cycle_duration_seconds", "target" => target.id.clone())
        .record(started.elapsed().as_secs_f64());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Instance;
    use std::collections::HashMap;

    fn inst(ip: &str, port: u16, weight: u32) -> Instance {
        Instance {
            ip: ip.to_string(),
            port,
            weight,
            metadata: HashMap::new(),
            enabled: true,
            change: false,
            ext: serde_json::Map::new(),
        }
    }

    #[test]
    fn diff_includes_additions_and_removals() {
        let mut dim = HashMap::new();
        dim.insert("10.0.0.1:8080".to_string(), inst("10.0.0.1", 8080, 1));
        dim.insert("10.0.0.2:8080".to_string(), inst("10.0.0.2", 8080, 1));
        let mut gim = HashMap::new();
        gim.insert("10.0.0.1:8080".to_string(), inst("10.0.0.1", 8080, 1));
        gim.insert("10.0.0.9:9000".to_string(), inst("10.0.0.9", 9000, 1));

        let diff = build_diff(&dim, &gim);
        assert_eq!(diff.len(), 2);

        let added = diff.iter().find(|i| i.key() == "10.0.0.2:8080").unwrap();
        assert!(added.enabled && added.change);

        let removed = diff.iter().find(|i| i.key() == "10.0.0.9:9000").unwrap();
        assert!(!removed.enabled && removed.change);
    }

    #[test]
    fn diff_includes_weight_mismatch() {
        let mut dim = HashMap::new();
        dim.insert("10.0.0.1:8080".to_string(), inst("10.0.0.1", 8080, 5));
        let mut gim = HashMap::new();
        gim.insert("10.0.0.1:8080".to_string(), inst("10.0.0.1", 8080, 1));

        let diff = build_diff(&dim, &gim);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].weight, 5);
        assert!(diff[0].enabled);
    }

    #[test]
    fn diff_is_empty_when_sides_match() {
        let mut dim = HashMap::new();
        dim.insert("10.0.0.1:8080".to_string(), inst("10.0.0.1", 8080, 1));
        let gim = dim.clone();
        assert!(build_diff(&dim, &gim).is_empty());
    }

    #[test]
    fn prefix_match_anchors_at_start_only() {
        let re = Regex::new("^foo").unwrap();
        assert!(prefix_match(&re, "foobar"));
        assert!(!prefix_match(&re, "barfoo"));

        // Unanchored pattern: regex::find would match mid-string, but
        // prefix_match still requires the leftmost match to start at 0.
        let re = Regex::new("bar").unwrap();
        assert!(!prefix_match(&re, "foobar"));
        assert!(prefix_match(&re, "barfoo"));
    }
}
