//! Cron-style dispatch, rate-capped per named queue.
//!
//! Wraps `tokio-cron-scheduler` in an explicit `Scheduler` component, owned
//! by the process entry point and threaded into whatever needs to register
//! triggers. Jobs are keyed by `target.id`; a reload removes the old job for
//! a given id before registering its replacement (`replace_existing=true`
//! semantics).

pub mod rate_limit;

use crate::schedule::Schedule;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub use rate_limit::QueueLimiter;

pub struct Scheduler {
    inner: JobScheduler,
    /// target_id -> registered job uuid, so a reload can remove the old trigger.
    jobs: DashMap<String, Uuid>,
    pub limiter: Arc<QueueLimiter>,
}

impl Scheduler {
    pub async fn start() -> Result<Self> {
        let inner = JobScheduler::new().await.context("creating job scheduler")?;
        inner.start().await.context("starting job scheduler")?;
        Ok(Self {
            inner,
            jobs: DashMap::new(),
            limiter: Arc::new(QueueLimiter::new()),
        })
    }

    /// Register (or re-register) a recurring/one-shot job for `target_id`.
    /// `action` is invoked on every trigger; it receives no arguments and
    /// returns a future so the caller can capture whatever state it needs.
    pub async fn schedule<F, Fut>(&self, target_id: &str, schedule: &Schedule, action: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.unschedule(target_id).await;

        let action = Arc::new(action);
        let job = match schedule {
            Schedule::Cron(fields) => {
                let expr = fields.join(" ");
                let action = action.clone();
                Job::new_async(expr.as_str(), move |_uuid, _l| {
                    let action = action.clone();
                    Box::pin(async move { (action)().await }) as Pin<Box<dyn Future<Output = ()> + Send>>
                })
                .with_context(|| format!("invalid cron expression for target {target_id}: {expr}"))?
            }
            Schedule::OneShot => {
                let action = action.clone();
                Job::new_one_shot_async(std::time::Duration::from_secs(0), move |_uuid, _l| {
                    let action = action.clone();
                    Box::pin(async move { (action)().await }) as Pin<Box<dyn Future<Output = ()> + Send>>
                })
                .with_context(|| format!("building one-shot job for target {target_id}"))?
            }
        };

        let uuid = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("registering job for target {target_id}"))?;
        self.jobs.insert(target_id.to_string(), uuid);
        Ok(())
    }

    /// Remove the job registered for `target_id`, if any.
    pub async fn unschedule(&self, target_id: &str) {
        if let Some((_, uuid)) = self.jobs.remove(target_id) {
            if let Err(e) = self.inner.remove(&uuid).await {
                tracing::warn!("scheduler: failed to remove job for {target_id}: {e}");
            }
        }
    }

    /// Remove every registered job — the first half of a reload.
    pub async fn clear(&self) {
        let ids: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.unschedule(&id).await;
        }
    }
}
