use super::{Discovery, Gateway};
use crate::config::{AppConfig, DiscoveryDriverConfig, GatewayDriverConfig};
use crate::discovery::{EurekaDriver, NacosDriver};
use crate::gateway::{ApisixGateway, KongGateway};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Construct a discovery/gateway map straight from configuration — the
/// replacement for the original's module-name-keyed import-by-string.
pub fn build_drivers(
    config: &AppConfig,
) -> (HashMap<String, Arc<dyn Discovery>>, HashMap<String, Arc<dyn Gateway>>) {
    let mut discovery: HashMap<String, Arc<dyn Discovery>> = HashMap::new();
    for (name, cfg) in &config.discovery {
        let driver: Arc<dyn Discovery> = match cfg {
            DiscoveryDriverConfig::Nacos(c) => Arc::new(NacosDriver::new(c.clone())),
            DiscoveryDriverConfig::Eureka(c) => Arc::new(EurekaDriver::new(c.clone())),
        };
        discovery.insert(name.clone(), driver);
    }

    let mut gateway: HashMap<String, Arc<dyn Gateway>> = HashMap::new();
    for (name, cfg) in &config.gateway {
        let driver: Arc<dyn Gateway> = match cfg {
            GatewayDriverConfig::Apisix(c) => Arc::new(ApisixGateway::new(c.clone())),
            GatewayDriverConfig::Kong(c) => Arc::new(KongGateway::new(c.clone())),
        };
        gateway.insert(name.clone(), driver);
    }

    (discovery, gateway)
}

/// Immutable snapshot of constructed drivers, keyed by name.
///
/// Replaces the original's two global mutable dicts (`discovery_clients`,
/// `gateway_clients`) plus `functools.lru_cache`-backed lookup-by-name. A
/// reload builds a brand new `Snapshot` and swaps the whole pointer — any
/// `syncer` cycle already in flight keeps the snapshot it resolved its
/// drivers from, so a reload never mutates state out from under it.
struct Snapshot {
    discovery: HashMap<String, Arc<dyn Discovery>>,
    gateway: HashMap<String, Arc<dyn Gateway>>,
}

pub struct DriverRegistry {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(Snapshot {
                discovery: HashMap::new(),
                gateway: HashMap::new(),
            })),
        }
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_discovery(&self, name: &str) -> Option<Arc<dyn Discovery>> {
        self.snapshot.load().discovery.get(name).cloned()
    }

    pub fn get_gateway(&self, name: &str) -> Option<Arc<dyn Gateway>> {
        self.snapshot.load().gateway.get(name).cloned()
    }

    pub fn gateway_names(&self) -> Vec<String> {
        self.snapshot.load().gateway.keys().cloned().collect()
    }

    /// Replace the whole snapshot at once — the only mutation this registry supports.
    /// Called on startup and on `/-/reload`.
    pub fn swap(
        &self,
        discovery: HashMap<String, Arc<dyn Discovery>>,
        gateway: HashMap<String, Arc<dyn Gateway>>,
    ) {
        self.snapshot.store(Arc::new(Snapshot { discovery, gateway }));
    }

    /// Build drivers from `config` and swap them in wholesale.
    pub fn reload(&self, config: &AppConfig) {
        let (discovery, gateway) = build_drivers(config);
        self.swap(discovery, gateway);
    }
}
