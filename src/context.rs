//! Server context wiring.
//!
//! One explicit context object owns one instance of every cache, built
//! from a config struct and a command runner. Nothing here is a global:
//! tests construct isolated contexts instead of sharing hidden state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::exec::CommandRunner;
use crate::persist::{PreferenceCache, PreferenceStore, DEFAULT_PREFERENCE_TTL};
use crate::response::{ResponseCache, ResponseCacheConfig};
use crate::suggest::SuggestionEngine;
use crate::targets::{
    BuildSettingsCache, DeviceListCache, SimulatorListCache, DEFAULT_BUILD_SETTINGS_TTL,
    DEFAULT_DEVICE_TTL, DEFAULT_SIMULATOR_TTL,
};

/// Default hard timeout for external refresh commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one server context. Every TTL is explicit configuration,
/// not a hidden constant.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub simulator_ttl: Duration,
    pub device_ttl: Duration,
    pub build_settings_ttl: Duration,
    pub preference_ttl: Duration,
    /// Hard timeout for external refresh commands.
    pub command_timeout: Duration,
    pub response_cache: ResponseCacheConfig,
    /// Where to mirror preferences; `None` keeps them in memory only.
    pub preference_path: Option<PathBuf>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            simulator_ttl: DEFAULT_SIMULATOR_TTL,
            device_ttl: DEFAULT_DEVICE_TTL,
            build_settings_ttl: DEFAULT_BUILD_SETTINGS_TTL,
            preference_ttl: DEFAULT_PREFERENCE_TTL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            response_cache: ResponseCacheConfig::default(),
            preference_path: None,
        }
    }
}

impl LaneConfig {
    /// Reject zero-valued windows and capacities before wiring a context.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "command_timeout must be non-zero".to_string(),
            ));
        }
        if self.response_cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "response_cache.max_entries must be at least 1".to_string(),
            ));
        }
        if self.response_cache.max_age.is_zero() {
            return Err(ConfigError::Invalid(
                "response_cache.max_age must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The caching layer of one server instance.
pub struct LaneContext {
    pub simulators: Arc<SimulatorListCache>,
    pub devices: Arc<DeviceListCache>,
    pub build_settings: Arc<BuildSettingsCache>,
    pub preferences: Arc<PreferenceCache>,
    pub responses: Arc<ResponseCache>,
    pub suggestions: SuggestionEngine,
}

impl LaneContext {
    /// Build a context from config plus the process-execution boundary.
    pub fn new(config: LaneConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let simulators = Arc::new(SimulatorListCache::new(
            Arc::clone(&runner),
            config.simulator_ttl,
            config.command_timeout,
        ));
        let devices = Arc::new(DeviceListCache::new(
            Arc::clone(&runner),
            config.device_ttl,
            config.command_timeout,
        ));
        let build_settings = Arc::new(BuildSettingsCache::new(config.build_settings_ttl));

        let store = Arc::new(match config.preference_path {
            Some(path) => PreferenceStore::open(path),
            None => PreferenceStore::in_memory(),
        });
        let preferences = Arc::new(PreferenceCache::new(store, config.preference_ttl));

        let responses = Arc::new(ResponseCache::new(config.response_cache));
        let suggestions = SuggestionEngine::new(Arc::clone(&simulators));

        Self {
            simulators,
            devices,
            build_settings,
            preferences,
            responses,
            suggestions,
        }
    }

    /// Drop every cached entity so the next reads refetch. Preferences are
    /// durable state, not cache, and are left alone.
    pub fn invalidate_all(&self) {
        self.simulators.invalidate();
        self.devices.invalidate();
        self.build_settings.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockRunner;

    #[test]
    fn test_contexts_are_isolated() {
        let runner_a = Arc::new(MockRunner::new());
        let runner_b = Arc::new(MockRunner::new());
        let a = LaneContext::new(LaneConfig::default(), runner_a);
        let b = LaneContext::new(LaneConfig::default(), runner_b);

        a.responses.store(crate::response::NewResponse {
            tool: "build".to_string(),
            ..Default::default()
        });

        assert_eq!(a.responses.stats().total_entries, 1);
        assert_eq!(b.responses.stats().total_entries, 0);
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        assert!(LaneConfig::default().validate().is_ok());

        let zero_timeout = LaneConfig {
            command_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let zero_capacity = LaneConfig {
            response_cache: ResponseCacheConfig {
                max_entries: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(zero_capacity.validate().is_err());
    }

    #[test]
    fn test_default_config_ttls() {
        let config = LaneConfig::default();
        assert_eq!(config.simulator_ttl, Duration::from_secs(30));
        assert_eq!(config.build_settings_ttl, Duration::from_secs(3600));
        assert!(config.preference_path.is_none());
    }
}
