//! Embedded persistence: the `jobs` and `instances` tables.
//!
//! `rusqlite` is synchronous, so every operation runs inside
//! `tokio::task::spawn_blocking`; the connection itself is guarded by a
//! `std::sync::Mutex` since SQLite serializes writers per connection anyway
//! and a single shared connection keeps the schema simple.

use crate::model::{DiscoveryInstance, HealthStatus, Job, ProbeOutcome};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    target_id TEXT PRIMARY KEY,
    description TEXT,
    discovery TEXT NOT NULL,
    gateway TEXT NOT NULL,
    maximum_interval_sec INTEGER NOT NULL,
    enabled INTEGER NOT NULL,
    last_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS instances (
    id TEXT PRIMARY KEY,
    target_id TEXT NOT NULL,
    service TEXT NOT NULL,
    instance TEXT NOT NULL,
    successes INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0,
    timeouts INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'unknown',
    create_time INTEGER NOT NULL,
    last_time INTEGER NOT NULL,
    UNIQUE(target_id, service, instance)
);
"#;

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening database at {path}"))?;
        conn.execute_batch(SCHEMA).context("running schema migration")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn upsert_job(&self, job: Job) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO jobs (target_id, description, discovery, gateway, maximum_interval_sec, enabled, last_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(target_id) DO UPDATE SET
                    description = excluded.description,
                    discovery = excluded.discovery,
                    gateway = excluded.gateway,
                    maximum_interval_sec = excluded.maximum_interval_sec,
                    enabled = excluded.enabled,
                    last_time = excluded.last_time",
                params![
                    job.target_id,
                    job.description,
                    job.discovery,
                    job.gateway,
                    job.maximum_interval_sec,
                    job.enabled,
                    job.last_time,
                ],
            )
            .context("upserting job row")?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("spawn_blocking join error")??;
        Ok(())
    }

    pub async fn get_job(&self, target_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.clone();
        let target_id = target_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT target_id, description, discovery, gateway, maximum_interval_sec, enabled, last_time
                 FROM jobs WHERE target_id = ?1",
                params![target_id],
                |row| {
                    Ok(Job {
                        target_id: row.get(0)?,
                        description: row.get(1)?,
                        discovery: row.get(2)?,
                        gateway: row.get(3)?,
                        maximum_interval_sec: row.get(4)?,
                        enabled: row.get(5)?,
                        last_time: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("querying job row")
        })
        .await
        .context("spawn_blocking join error")?
    }

    /// Record one probe outcome for `(target_id, service, instance)`, creating
    /// the row if it doesn't exist yet, and return the row's new state plus
    /// whether this observation changed its `status`.
    pub async fn apply_probe_outcome(
        &self,
        target_id: &str,
        service: &str,
        instance: &str,
        outcome: ProbeOutcome,
        healthy_successes: u32,
        unhealthy_failures: u32,
        unhealthy_timeouts: u32,
        now: i64,
    ) -> Result<(DiscoveryInstance, bool)> {
        let conn = self.conn.clone();
        let target_id = target_id.to_string();
        let service = service.to_string();
        let instance = instance.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction().context("starting transaction")?;

            let existing = tx
                .query_row(
                    "SELECT id, successes, failures, timeouts, status, create_time, last_time
                     FROM instances WHERE target_id = ?1 AND service = ?2 AND instance = ?3",
                    params![target_id, service, instance],
                    |row| row_to_instance(row, &target_id, &service, &instance),
                )
                .optional()
                .context("querying instance row")?;

            let mut row = existing.unwrap_or_else(|| DiscoveryInstance {
                id: uuid::Uuid::new_v4().to_string(),
                target_id: target_id.clone(),
                service: service.clone(),
                instance: instance.clone(),
                successes: 0,
                failures: 0,
                timeouts: 0,
                status: HealthStatus::Unknown,
                create_time: now,
                last_time: now,
            });

            let transitioned = row.apply_outcome(outcome, healthy_successes, unhealthy_failures, unhealthy_timeouts);
            row.last_time = now;

            let status_str = status_to_str(row.status);
            tx.execute(
                "INSERT INTO instances (id, target_id, service, instance, successes, failures, timeouts, status, create_time, last_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(target_id, service, instance) DO UPDATE SET
                    successes = excluded.successes,
                    failures = excluded.failures,
                    timeouts = excluded.timeouts,
                    status = excluded.status,
                    last_time = excluded.last_time",
                params![
                    row.id, row.target_id, row.service, row.instance,
                    row.successes, row.failures, row.timeouts,
                    status_str, row.create_time, row.last_time,
                ],
            )
            .context("upserting instance row")?;

            tx.commit().context("committing transaction")?;
            Ok::<_, anyhow::Error>((row, transitioned))
        })
        .await
        .context("spawn_blocking join error")?
    }

    pub async fn unhealthy_instances(&self, target_id: &str, service: &str) -> Result<Vec<DiscoveryInstance>> {
        let conn = self.conn.clone();
        let target_id = target_id.to_string();
        let service = service.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, successes, failures, timeouts, status, create_time, last_time
                 FROM instances WHERE target_id = ?1 AND service = ?2 AND status = 'unhealthy'",
            )?;
            let rows = stmt
                .query_map(params![target_id, service], |row| {
                    row_to_instance(row, &target_id, &service, "")
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("collecting unhealthy instance rows")?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await
        .context("spawn_blocking join error")?
    }
}

fn row_to_instance(
    row: &rusqlite::Row<'_>,
    target_id: &str,
    service: &str,
    instance_fallback: &str,
) -> rusqlite::Result<DiscoveryInstance> {
    let status_str: String = row.get(4)?;
    Ok(DiscoveryInstance {
        id: row.get(0)?,
        target_id: target_id.to_string(),
        service: service.to_string(),
        instance: instance_fallback.to_string(),
        successes: row.get(1)?,
        failures: row.get(2)?,
        timeouts: row.get(3)?,
        status: str_to_status(&status_str),
        create_time: row.get(5)?,
        last_time: row.get(6)?,
    })
}

fn status_to_str(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Unknown => "unknown",
        HealthStatus::Healthy => "healthy",
        HealthStatus::Unhealthy => "unhealthy",
    }
}

fn str_to_status(s: &str) -> HealthStatus {
    match s {
        "healthy" => HealthStatus::Healthy,
        "unhealthy" => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn job_upsert_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let job = Job {
            target_id: "0-apisix-nacos".into(),
            description: "demo".into(),
            discovery: "nacos".into(),
            gateway: "apisix".into(),
            maximum_interval_sec: -1,
            enabled: true,
            last_time: 100,
        };
        store.upsert_job(job.clone()).await.unwrap();

        let loaded = store.get_job("0-apisix-nacos").await.unwrap().unwrap();
        assert_eq!(loaded.last_time, 100);

        let mut updated = job;
        updated.last_time = 200;
        store.upsert_job(updated).await.unwrap();
        let loaded = store.get_job("0-apisix-nacos").await.unwrap().unwrap();
        assert_eq!(loaded.last_time, 200);
    }

    #[tokio::test]
    async fn probe_outcomes_accumulate_and_transition_status() {
        let store = Store::open_in_memory().unwrap();
        let (row, transitioned) = store
            .apply_probe_outcome("t", "orders", "10.0.0.1:8080", ProbeOutcome::Failure, 1, 1, 1, 1)
            .await
            .unwrap();
        assert_eq!(row.status, HealthStatus::Unhealthy);
        assert!(transitioned);

        let (row, transitioned) = store
            .apply_probe_outcome("t", "orders", "10.0.0.1:8080", ProbeOutcome::Success, 1, 1, 1, 2)
            .await
            .unwrap();
        assert_eq!(row.status, HealthStatus::Healthy);
        assert_eq!(row.failures, 0);
        assert!(transitioned);

        let unhealthy = store.unhealthy_instances("t", "orders").await.unwrap();
        assert!(unhealthy.is_empty());
    }
}
