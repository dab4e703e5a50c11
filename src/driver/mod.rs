//! Driver contracts and the atomically-swappable driver registry.
//!
//! The reconciliation engine depends only on these two trait objects, never
//! on a concrete Nacos/Eureka/APISIX/Kong type — drivers are looked up by
//! name out of a [`DriverRegistry`] snapshot that is swapped wholesale on
//! reload, replacing the original string-keyed-dict-plus-import-by-name
//! pattern with a single immutable pointer.

pub mod registry;

use crate::model::{Instance, Registration, Service, Target};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub use registry::DriverRegistry;

/// A service-discovery backend (Nacos, Eureka, ...).
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Every service the registry knows about within the configured scope.
    /// `enabled_only` defaults to true at call sites — disabled hosts are filtered.
    async fn get_all_service(
        &self,
        config: &serde_json::Map<String, serde_json::Value>,
        enabled_only: bool,
    ) -> Result<Vec<Service>>;

    /// Full fetch for a single service. Returns instances and a registry
    /// `last_time` hint (-1 when the registry doesn't expose one).
    async fn get_service_all_instances(
        &self,
        service_name: &str,
        ext_data: &serde_json::Map<String, serde_json::Value>,
        enabled_only: bool,
    ) -> Result<(Vec<Instance>, i64)>;

    /// Idempotent per-instance update; applies only to instances with `change == true`.
    async fn modify_registration(&self, registration: &Registration, instances: &[Instance]) -> Result<()>;
}

/// An API gateway backend (APISIX, Kong, ...).
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Members of the upstream identified by `target.upstream_name(upstream_name)`.
    async fn get_service_all_instances(
        &self,
        target: &Target,
        upstream_name: &str,
    ) -> Result<Vec<Instance>>;

    /// Apply changes. `diff` is the delta set; `full` is the complete desired
    /// membership — drivers pick whichever model fits their native API.
    async fn sync_instances(
        &self,
        target: &Target,
        upstream_name: &str,
        diff: &[Instance],
        full: &[Instance],
    ) -> Result<()>;

    /// Serialize current runtime configuration into a declarative file.
    /// Returns (file content, path written to).
    async fn fetch_admin_api_to_file(&self, file_name: Option<&str>) -> Result<(String, PathBuf)>;

    /// Copy configuration objects into a compatible target gateway.
    async fn migrate_to(&self, other: &dyn Gateway) -> Result<()>;

    /// Load a declarative file into this gateway.
    async fn restore_gateway(&self, body: &str) -> Result<()>;

    /// The driver's own name (for alias resolution during migrate, e.g. `ssl` vs `ssls`).
    fn name(&self) -> &str;

    /// Downcast support — `migrate_to` needs driver-specific access to the
    /// target gateway (its admin client, cached id map, ...), which the
    /// narrow trait surface intentionally doesn't expose. A failed downcast
    /// means the pair is incompatible and the call returns `Unrealized`.
    fn as_any(&self) -> &dyn std::any::Any;
}
