use crate::config::AppConfig;
use crate::driver::DriverRegistry;
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::store::Store;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Task-level retry budget for a scheduled cycle: a fixed number of attempts with a flat back-off.
const CYCLE_MAX_ATTEMPTS: u32 = 4;
const CYCLE_RETRY_BACKOFF: Duration = Duration::from_secs(30);
const CYCLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Shared process state, cheaply cloneable.
///
/// `config` is the only piece of state swapped wholesale on reload; the
/// driver registry underneath it follows suit via [`DriverRegistry::reload`].
#[derive(Clone)]
pub struct SyncerState {
    pub config: Arc<ArcSwap<AppConfig>>,
    pub registry: Arc<DriverRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub metrics: Metrics,
    pub store: Store,
    pub http: reqwest::Client,
    config_path: PathBuf,
    started_at: Instant,
}

impl SyncerState {
    pub async fn new(config_path: PathBuf, config: AppConfig) -> Result<Self> {
        let registry = Arc::new(DriverRegistry::new());
        registry.reload(&config);

        let store = Store::open(&config.database_path)?;
        let metrics = Metrics::install();
        let scheduler = Arc::new(Scheduler::start().await?);

        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            registry,
            scheduler,
            metrics,
            store,
            http: reqwest::Client::new(),
            config_path,
            started_at: Instant::now(),
        })
    }

    /// Re-read the config file, swap the driver registry, and re-register
    /// every target's schedule. Scheduling is serialized through
    /// `queue_reload_job` by the caller.
    pub async fn reload(&self) -> Result<()> {
        let mut config = AppConfig::load(&self.config_path)?;
        config.assign_target_ids();

        self.registry.reload(&config);
        self.scheduler.clear().await;

        let config = Arc::new(config);
        self.config.store(config.clone());

        for target in &config.targets {
            if !target.enabled {
                continue;
            }
            let schedule = crate::schedule::parse(&target.fetch_interval)?;
            let state = self.clone();
            let target = target.clone();
            self.scheduler
                .schedule(&target.id, &schedule, move || {
                    let state = state.clone();
                    let target = target.clone();
                    async move {
                        let dispatched = state
                            .scheduler
                            .limiter
                            .acquire(crate::scheduler::rate_limit::QUEUE_SYNCER_JOB)
                            .await;
                        if !dispatched {
                            tracing::warn!(target_id = %target.id, "syncer: cycle dispatch rejected, queue backlogged");
                            return;
                        }
                        run_cycle_with_retry(&state, &target).await;
                    }
                })
                .await?;
        }

        Ok(())
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Runs one target's cycle under a function-level timeout, retrying a fixed
/// number of times on failure before logging a dead-letter event.
async fn run_cycle_with_retry(state: &SyncerState, target: &crate::model::Target) {
    for attempt in 1..=CYCLE_MAX_ATTEMPTS {
        let outcome = tokio::time::timeout(
            CYCLE_TIMEOUT,
            crate::syncer::run_target(target, &state.registry, &state.store, &state.http, &state.scheduler.limiter),
        )
        .await;

        match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                tracing::warn!(target_id = %target.id, attempt, "syncer: cycle attempt failed: {e}");
            }
            Err(_) => {
                tracing::warn!(target_id = %target.id, attempt, "syncer: cycle attempt timed out after {:?}", CYCLE_TIMEOUT);
            }
        }

        if attempt < CYCLE_MAX_ATTEMPTS {
            tokio::time::sleep(CYCLE_RETRY_BACKOFF).await;
        }
    }

    tracing::error!(target_id = %target.id, dead_letter = true, "syncer: cycle exhausted retry budget");
    metrics::counter!("syncer_dead_letter_total", "target_id" => target.id.clone()).increment(1);
}
