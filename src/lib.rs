//! simlane-cache - caching layer for the simlane automation server
//!
//! This crate implements the stateful core of an agent-facing automation
//! server for Apple-platform tooling: TTL-bounded entity caches over
//! external tool output, a response cache with progressive disclosure for
//! large command outputs, a weighted suggestion engine for picking
//! execution targets, and a structural fingerprinting scheme for
//! identifying UI screens.

pub mod context;
pub mod exec;
pub mod fingerprint;
pub mod persist;
pub mod response;
pub mod suggest;
pub mod targets;
pub mod ttl;

pub use context::{ConfigError, LaneConfig, LaneContext};
pub use exec::{CommandOutput, CommandRunner, ExecError, MockRunner, ProcessRunner};
pub use fingerprint::{
    compute_view_fingerprint, generate_cache_key, is_view_cacheable, FingerprintConfig,
    Orientation, ScreenBounds, UiElement, ViewFingerprint,
};
pub use persist::{PreferenceCache, PreferenceStore, ProjectPreference};
pub use response::{NewResponse, ResponseCache, ResponseCacheConfig, ResponseRecord};
pub use suggest::{BestTarget, ScoredTarget, SuggestionEngine, UsageHistory};
pub use targets::{
    BuildSettingsCache, DeviceListCache, SimulatorListCache, TargetRecord, TargetState,
};
pub use ttl::{TtlCache, TtlCacheStats};
