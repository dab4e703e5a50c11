//! The HTTP façade: manual discovery/gateway actions plus health and metrics.
//!
//! A raw `hyper` service matching on `req.uri().path()`, mirroring the
//! teacher's admin-server idiom rather than pulling in a web framework.
//! Every request (except `/metrics` and the root heartbeat) requires the
//! `SYNCER-API-KEY` header to equal the configured key.

use super::SyncerState;
use crate::error::SyncerError;
use crate::model::{Instance, Registration, RegistrationAction, RegistrationMatchType};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::collections::HashMap;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<BoxBody> {
    Response::builder().status(status).body(full_body(body)).unwrap()
}

fn query_map(req: &Request<Incoming>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| {
            q.split('&')
                .filter_map(|kv| {
                    let mut parts = kv.splitn(2, '=');
                    let k = parts.next()?;
                    let v = parts.next().unwrap_or("");
                    Some((
                        urlencoding::decode(k).ok()?.into_owned(),
                        urlencoding::decode(v).ok()?.into_owned(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Path segments after a known literal prefix, e.g. `after("/discovery/", "/discovery/nacos")` -> `Some("nacos")`.
fn path_param<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix).filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

pub async fn handle(req: Request<Incoming>, state: SyncerState) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if !authorized(&req, &state) {
        metrics::counter!("syncer_facade_requests_total", "path" => path.clone(), "status" => "401").increment(1);
        return Ok(text(StatusCode::UNAUTHORIZED, "unauthorized"));
    }

    let response = route(method, &path, req, state.clone()).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!("syncer_facade_requests_total", "path" => path, "status" => status).increment(1);
    Ok(response)
}

fn authorized(req: &Request<Incoming>, state: &SyncerState) -> bool {
    let expected = state.config.load().api_key.clone();
    req.headers()
        .get("SYNCER-API-KEY")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

async fn route(method: Method, path: &str, req: Request<Incoming>, state: SyncerState) -> Response<BoxBody> {
    match (method.clone(), path) {
        (Method::GET, "/") => text(StatusCode::OK, "OK"),
        (Method::GET, "/health") => health(&state).await,
        (Method::GET, "/-/reload") => reload(&state).await,
        (Method::GET, "/metrics") => {
            let body = state.metrics.render();
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap()
        }
        (Method::PUT, p) if p.starts_with("/discovery/") => {
            let Some(name) = path_param(p, "/discovery/") else {
                return text(StatusCode::NOT_FOUND, "not found");
            };
            put_discovery(name, req, &state).await
        }
        (Method::GET, p) if p.starts_with("/gateway-api-to-file/") => {
            let Some(name) = path_param(p, "/gateway-api-to-file/") else {
                return text(StatusCode::NOT_FOUND, "not found");
            };
            gateway_to_file(name, &req, &state).await
        }
        (Method::POST, p) if p.starts_with("/migrate/") => migrate(p, &state).await,
        (Method::PUT, p) if p.starts_with("/restore/") => {
            let Some(name) = path_param(p, "/restore/") else {
                return text(StatusCode::NOT_FOUND, "not found");
            };
            restore(name, req, &state).await
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn read_body(req: Request<Incoming>) -> String {
    req.into_body()
        .collect()
        .await
        .map(|c| String::from_utf8_lossy(&c.to_bytes()).into_owned())
        .unwrap_or_default()
}

/// Mirrors `app/handler/index.py:health` — `total`/`running`/`lost` over the
/// persisted job rows, `status` derived from the running/lost split.
async fn health(state: &SyncerState) -> Response<BoxBody> {
    let targets = state.config.load().targets.clone();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let mut total = 0u32;
    let mut running = 0u32;
    let mut lost = 0u32;
    let mut details = Vec::new();

    for target in &targets {
        let job = match state.store.get_job(&target.id).await {
            Ok(j) => j,
            Err(e) => {
                let body = serde_json::json!({"status": "ERROR", "details": [e.to_string()]});
                return Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header("content-type", "application/json")
                    .body(full_body(serde_json::to_string(&body).unwrap()))
                    .unwrap();
            }
        };
        total += 1;

        let last_time = job.as_ref().map(|j| j.last_time).unwrap_or(0);
        let diff = now - last_time;
        if target.maximum_interval_sec > 0 && diff > target.maximum_interval_sec {
            lost += 1;
            details.push(format!(
                "syncer: {}, not running for more than {} sec",
                target.id, target.maximum_interval_sec
            ));
        } else {
            running += 1;
            details.push(format!("syncer: {}, is ok", target.id));
        }
    }

    let status = if total == 0 {
        "UNKNOWN"
    } else if running == total {
        "UP"
    } else if running == 0 {
        "DOWN"
    } else {
        "WARN"
    };
    let status_code = if status == "DOWN" { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::OK };

    let body = serde_json::json!({
        "total": total,
        "running": running,
        "lost": lost,
        "details": details,
        "status": status,
        "uptime": state.uptime().as_secs(),
    });

    Response::builder()
        .status(status_code)
        .header("content-type", "application/json")
        .body(full_body(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn reload(state: &SyncerState) -> Response<BoxBody> {
    if !state.scheduler.limiter.acquire(crate::scheduler::rate_limit::QUEUE_RELOAD_JOB).await {
        return text(StatusCode::INTERNAL_SERVER_ERROR, "reload queue backlogged, try again");
    }
    match state.reload().await {
        Ok(()) => text(StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!("facade: reload failed: {e}");
            text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn put_discovery(name: &str, req: Request<Incoming>, state: &SyncerState) -> Response<BoxBody> {
    let query = query_map(&req);
    let alive_num: u32 = query.get("alive_num").and_then(|v| v.parse().ok()).unwrap_or(1);

    let body = read_body(req).await;
    let registration: Registration = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => return text(StatusCode::BAD_REQUEST, format!("invalid Registration body: {e}")),
    };

    let Some(discovery) = state.registry.get_discovery(name) else {
        return text(StatusCode::NOT_FOUND, format!("discovery driver not found: {name}"));
    };

    let (mut instances, _last_time) = match discovery
        .get_service_all_instances(&registration.service_name, &registration.ext_data, false)
        .await
    {
        Ok(v) => v,
        Err(e) => return text(StatusCode::INTERNAL_SERVER_ERROR, format!("remote error: {e}")),
    };

    let regex = match regex::Regex::new(&registration.regexp_str) {
        Ok(r) => r,
        Err(e) => return text(StatusCode::BAD_REQUEST, format!("invalid regexp_str: {e}")),
    };

    apply_registration(&mut instances, &registration, &regex);

    let alive_after = instances.iter().filter(|i| i.enabled).count() as u32;
    if alive_after < alive_num {
        return text(
            StatusCode::INTERNAL_SERVER_ERROR,
            SyncerError::MinimumAliveGuard { required: alive_num, would_remain: alive_after }.to_string(),
        );
    }

    let changed: Vec<Instance> = instances.into_iter().filter(|i| i.change).collect();
    if let Err(e) = discovery.modify_registration(&registration, &changed).await {
        return text(StatusCode::INTERNAL_SERVER_ERROR, format!("remote error: {e}"));
    }

    text(StatusCode::OK, "OK")
}

/// Mirrors `app/handler/discovery.py:discovery` instance-by-instance, with
/// the alive-guard computed by the caller over the resulting `enabled` flags.
fn apply_registration(instances: &mut [Instance], registration: &Registration, regex: &regex::Regex) {
    for instance in instances.iter_mut() {
        let value = match registration.match_type {
            RegistrationMatchType::Ip => instance.ip.clone(),
            RegistrationMatchType::Metadata => {
                let key = registration.metadata_key.as_deref().unwrap_or_default();
                match instance.metadata.get(key) {
                    Some(v) if !v.is_empty() => v.clone(),
                    _ => {
                        if registration.other_status != RegistrationAction::Origin {
                            instance.enabled = registration.other_status == RegistrationAction::Up;
                            instance.change = true;
                        }
                        continue;
                    }
                }
            }
        };

        if crate::syncer::prefix_match(regex, &value) {
            instance.enabled = registration.status == RegistrationAction::Up;
            instance.change = true;
        } else if registration.other_status != RegistrationAction::Origin {
            instance.enabled = registration.other_status == RegistrationAction::Up;
            instance.change = true;
        }
    }
}

async fn gateway_to_file(name: &str, req: &Request<Incoming>, state: &SyncerState) -> Response<BoxBody> {
    let query = query_map(req);
    let file_name = query.get("file_name").cloned();

    let Some(gateway) = state.registry.get_gateway(name) else {
        return text(StatusCode::NOT_FOUND, format!("gateway driver not found: {name}"));
    };

    match gateway.fetch_admin_api_to_file(file_name.as_deref()).await {
        Ok((content, path)) => Response::builder()
            .status(StatusCode::OK)
            .header("syncer-file-location", path.display().to_string())
            .body(full_body(content))
            .unwrap(),
        Err(e) => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(e.to_string());
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("syncer-err-msg", encoded)
                .body(full_body(Bytes::new()))
                .unwrap()
        }
    }
}

async fn migrate(path: &str, state: &SyncerState) -> Response<BoxBody> {
    let Some(rest) = path.strip_prefix("/migrate/") else {
        return text(StatusCode::NOT_FOUND, "not found");
    };
    let Some((src, dst)) = rest.split_once("/to/") else {
        return text(StatusCode::NOT_FOUND, "not found");
    };

    let Some(origin) = state.registry.get_gateway(src) else {
        return text(StatusCode::NOT_FOUND, format!("source gateway driver not found: {src}"));
    };
    let Some(target) = state.registry.get_gateway(dst) else {
        return text(StatusCode::NOT_FOUND, format!("target gateway driver not found: {dst}"));
    };

    match origin.migrate_to(target.as_ref()).await {
        Ok(()) => text(StatusCode::OK, "OK"),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn restore(name: &str, req: Request<Incoming>, state: &SyncerState) -> Response<BoxBody> {
    let Some(gateway) = state.registry.get_gateway(name) else {
        return text(StatusCode::NOT_FOUND, format!("gateway driver not found: {name}"));
    };

    let body = read_body(req).await;
    match gateway.restore_gateway(&body).await {
        Ok(()) => text(StatusCode::OK, "OK"),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
