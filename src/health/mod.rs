//! Active health-check subsystem (target `config.healthcheck`).
//!
//! One round probes every instance of one service once, folds outcomes into
//! the persisted per-instance counters, and reports which instances are now
//! unhealthy so the reconciliation engine can pull them out of rotation.
//! Probing itself reuses the bounded-concurrency `buffer_unordered` idiom
//! used by the upstream active health checker.

use crate::config::types::HealthCheckConfig;
use crate::model::{Instance, ProbeOutcome};
use crate::scheduler::rate_limit::{QueueLimiter, QUEUE_INSTANCE_HEALTH_CHECK};
use crate::store::Store;
use futures_util::stream::{self, StreamExt};
use std::time::Duration;

/// Outcome of one health-check round over a service's instances.
pub struct HealthCheckOutcome {
    /// Instances the round leaves in `unhealthy` status, keyed by `ip:port`.
    pub unhealthy_keys: Vec<String>,
    /// How many instances changed status this round (for alerting/metrics).
    pub transitions: u32,
}

/// Probe every instance once, persist the outcome, and report which
/// instances are unhealthy after this round. Each leaf probe is dispatched
/// through `queue_instance_health_check`; a probe rejected by the rate
/// limiter is skipped for this round rather than awaited indefinitely.
pub async fn run_round(
    client: &reqwest::Client,
    store: &Store,
    limiter: &QueueLimiter,
    target_id: &str,
    service_name: &str,
    instances: &[Instance],
    cfg: &HealthCheckConfig,
    concurrency: usize,
) -> HealthCheckOutcome {
    let probes = stream::iter(instances.iter().map(|instance| {
        let client = client.clone();
        let cfg = cfg.clone();
        async move {
            if !limiter.acquire(QUEUE_INSTANCE_HEALTH_CHECK).await {
                tracing::warn!(target_id, service_name, key = %instance.key(), "health: probe dispatch rejected, queue backlogged");
                return None;
            }
            let outcome = probe_one(&client, &cfg, instance).await;
            Some((instance.key(), outcome))
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .filter_map(|probe| async move { probe })
    .collect::<Vec<(String, ProbeOutcome)>>()
    .await;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(-1);

    let mut unhealthy_keys = Vec::new();
    let mut transitioned_rows = Vec::new();
    for (key, outcome) in probes {
        metrics::counter!(
            "syncer_health_probe_total",
            "target" => target_id.to_string(),
            "service" => service_name.to_string(),
            "outcome" => probe_outcome_label(outcome),
        )
        .increment(1);

        match store
            .apply_probe_outcome(
                target_id,
                service_name,
                &key,
                outcome,
                cfg.healthy.successes,
                cfg.unhealthy.failures,
                cfg.unhealthy.timeouts,
                now,
            )
            .await
        {
            Ok((row, transitioned)) => {
                metrics::gauge!(
                    "syncer_instance_health_status",
                    "target" => target_id.to_string(),
                    "service" => service_name.to_string(),
                    "instance" => key.clone(),
                )
                .set(if row.status == crate::model::HealthStatus::Healthy { 1.0 } else { 0.0 });

                if transitioned {
                    transitioned_rows.push(row.clone());
                }
                if row.status == crate::model::HealthStatus::Unhealthy {
                    unhealthy_keys.push(key);
                }
            }
            Err(e) => {
                tracing::warn!(target_id, service_name, key, "health: failed to persist probe outcome: {e}");
            }
        }
    }

    let transitions = transitioned_rows.len() as u32;
    if !transitioned_rows.is_empty() {
        if let Some(alert) = &cfg.alert {
            send_alert(client, alert, target_id, service_name, &transitioned_rows).await;
        }
    }

    HealthCheckOutcome {
        unhealthy_keys,
        transitions,
    }
}

/// Posts a JSON summary of this round's status transitions. Delivery failure
/// is logged and never propagates — it must not block the reconciliation cycle.
async fn send_alert(
    client: &reqwest::Client,
    alert: &crate::config::types::AlertConfig,
    target_id: &str,
    service_name: &str,
    transitioned: &[crate::model::DiscoveryInstance],
) {
    let instances: Vec<serde_json::Value> = transitioned
        .iter()
        .map(|row| {
            serde_json::json!({
                "instance": row.instance,
                "status": health_status_label(row.status),
                "successes": row.successes,
                "failures": row.failures,
                "timeouts": row.timeouts,
            })
        })
        .collect();

    let body = serde_json::json!({
        "target_id": target_id,
        "service": service_name,
        "instances": instances,
    });

    let method = reqwest::Method::from_bytes(alert.method.as_bytes()).unwrap_or(reqwest::Method::POST);
    let result = client.request(method, &alert.url).json(&body).send().await;

    if let Err(e) = result {
        tracing::warn!(target_id, service_name, url = %alert.url, "health: alert delivery failed: {e}");
    }
}

fn health_status_label(status: crate::model::HealthStatus) -> &'static str {
    match status {
        crate::model::HealthStatus::Unknown => "unknown",
        crate::model::HealthStatus::Healthy => "healthy",
        crate::model::HealthStatus::Unhealthy => "unhealthy",
    }
}

async fn probe_one(client: &reqwest::Client, cfg: &HealthCheckConfig, instance: &Instance) -> ProbeOutcome {
    let scheme = if cfg.probe_type.eq_ignore_ascii_case("https") {
        "https"
    } else {
        "http"
    };
    let url = format!("{scheme}://{}:{}{}", instance.ip, instance.port, cfg.uri);

    let method = reqwest::Method::from_bytes(cfg.method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let result = client
        .request(method, &url)
        .timeout(Duration::from_secs(cfg.timeout_sec))
        .send()
        .await;

    match result {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status_matches_any(&cfg.healthy.http_statuses, status) {
                ProbeOutcome::Success
            } else {
                ProbeOutcome::Failure
            }
        }
        Err(e) if e.is_timeout() => ProbeOutcome::Timeout,
        Err(_) => ProbeOutcome::Failure,
    }
}

fn status_matches_any(patterns: &[String], status: u16) -> bool {
    patterns.iter().any(|p| status_matches(p, status))
}

fn status_matches(pattern: &str, status: u16) -> bool {
    let pattern = pattern.trim();
    if let Ok(code) = pattern.parse::<u16>() {
        return code == status;
    }
    match pattern.to_ascii_lowercase().as_str() {
        "2xx" => (200..300).contains(&status),
        "3xx" => (300..400).contains(&status),
        "4xx" => (400..500).contains(&status),
        "5xx" => (500..600).contains(&status),
        _ => false,
    }
}

fn probe_outcome_label(outcome: ProbeOutcome) -> &'static str {
    match outcome {
        ProbeOutcome::Success => "success",
        ProbeOutcome::Failure => "failure",
        ProbeOutcome::Timeout => "timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_matches_exact_code() {
        assert!(status_matches("200", 200));
        assert!(!status_matches("200", 201));
    }

    #[test]
    fn status_matches_family_case_insensitive() {
        assert!(status_matches("2XX", 204));
        assert!(status_matches("5xx", 503));
        assert!(!status_matches("5xx", 200));
    }

    #[test]
    fn status_matches_any_checks_all_patterns() {
        let patterns = vec!["200".to_string(), "3xx".to_string()];
        assert!(status_matches_any(&patterns, 302));
        assert!(!status_matches_any(&patterns, 404));
    }
}
