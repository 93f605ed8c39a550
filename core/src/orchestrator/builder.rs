//! Builder pattern for Orchestrator construction

use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::config::Configuration;
use crate::error::{MantisError, MantisResult};
use crate::registry::Registries;

use super::executor::Orchestrator;

/// Builder for creating an Orchestrator with proper configuration
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(Configuration::load("run.yaml")?)
///     .registries(Arc::new(registries))
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    config: Option<Configuration>,
    registries: Option<Arc<Registries>>,
    step_timeout: Option<Duration>,
    channel_config: ChannelConfig,
}

impl OrchestratorBuilder {
    /// Create a new orchestrator builder
    pub fn new() -> Self {
        Self {
            config: None,
            registries: None,
            step_timeout: None,
            channel_config: ChannelConfig::default(),
        }
    }

    /// Set the run configuration
    pub fn config(mut self, config: Configuration) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the plugin registries
    pub fn registries(mut self, registries: Arc<Registries>) -> Self {
        self.registries = Some(registries);
        self
    }

    /// Override the per-step timeout from the configuration
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Set the channel configuration
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns an error if configuration or registries are not set, or if
    /// configuration validation fails.
    pub fn build(self) -> MantisResult<Orchestrator> {
        let config = self
            .config
            .ok_or_else(|| MantisError::missing_config("configuration"))?;

        let registries = self
            .registries
            .ok_or_else(|| MantisError::missing_config("registries"))?;

        let config = match self.step_timeout {
            Some(timeout) => config.with_step_timeout(timeout),
            None => config,
        };
        config.validate()?;

        Ok(Orchestrator::new(
            Arc::new(config),
            registries,
            self.channel_config,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
