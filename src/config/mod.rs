pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

impl AppConfig {
    /// Load configuration from a YAML file, apply environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: AppConfig = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            anyhow::bail!("config file not found: {}", path.display());
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("config: loaded, targets={}", config.targets.len());
        Ok(config)
    }

    /// Environment variable overrides for values that shouldn't be committed to the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SYNCER_API_KEY") {
            self.api_key = v;
        }
        if let Ok(v) = std::env::var("SYNCER_LISTEN") {
            self.listen = v;
        }
        if let Ok(v) = std::env::var("SYNCER_DATABASE_PATH") {
            self.database_path = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("api_key must be set (file or SYNCER_API_KEY)");
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (index, target) in self.targets.iter().enumerate() {
            let id = if target.id.is_empty() {
                format!("{index}-{}-{}", target.gateway, target.discovery)
            } else {
                target.id.clone()
            };

            if !seen_ids.insert(id.clone()) {
                anyhow::bail!("duplicate target id: {id}");
            }

            if !self.discovery.contains_key(&target.discovery) {
                tracing::warn!(
                    "config: target {} references unknown discovery driver {}",
                    id,
                    target.discovery
                );
            }
            if !self.gateway.contains_key(&target.gateway) {
                tracing::warn!(
                    "config: target {} references unknown gateway driver {}",
                    id,
                    target.gateway
                );
            }

            crate::schedule::parse(&target.fetch_interval)
                .with_context(|| format!("target {id}: invalid fetch_interval"))?;

            for pattern in &target.exclude_service {
                regex::Regex::new(pattern)
                    .with_context(|| format!("target {id}: invalid exclude_service regex {pattern}"))?;
            }
        }

        Ok(())
    }

    /// Assign `{index}-{gateway}-{discovery}` ids to any target missing one,
    /// matching the original reload-time id assignment.
    pub fn assign_target_ids(&mut self) {
        for (index, target) in self.targets.iter_mut().enumerate() {
            if target.id.is_empty() {
                target.id = format!("{index}-{}-{}", target.gateway, target.discovery);
            }
        }
    }
}
