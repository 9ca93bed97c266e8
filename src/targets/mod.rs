//! Execution target caches.
//!
//! Three TTL caches over platform tool output:
//! - [`SimulatorListCache`]: simulators from `simctl list devices -j`,
//!   refreshed wholesale (the list operation returns the full set, not
//!   deltas). Short TTL: boot state changes rapidly, and staleness causes
//!   false "not booted" failures.
//! - [`DeviceListCache`]: connected hardware from `devicectl`, same
//!   wholesale-refresh shape.
//! - [`BuildSettingsCache`]: per project/scheme/configuration build
//!   settings. Long TTL: project structure rarely changes mid-session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::{decode_flexible, parse_records, CommandRunner, ExecError};
use crate::ttl::{TtlCache, TtlCacheStats};

/// Target result type
pub type TargetResult<T> = Result<T, TargetError>;

/// Errors from target cache refreshes.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("device list command failed: {stderr}")]
    CommandFailed { stderr: String },

    #[error("failed to parse device list: {0}")]
    Parse(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Simulator/device lifecycle state as reported by the platform tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Booted,
    Shutdown,
    Booting,
    ShuttingDown,
    Creating,
    Unknown,
}

impl TargetState {
    /// Parse a simctl state string ("Booted", "Shutdown", ...).
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Booted" => Self::Booted,
            "Shutdown" => Self::Shutdown,
            "Booting" => Self::Booting,
            "Shutting Down" => Self::ShuttingDown,
            "Creating" => Self::Creating,
            _ => Self::Unknown,
        }
    }

    pub fn is_booted(&self) -> bool {
        matches!(self, Self::Booted)
    }
}

/// A simulator or hardware device usable as an execution target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub udid: String,
    pub name: String,
    pub state: TargetState,
    pub is_available: bool,
    /// OS version string, e.g. "18.2".
    pub os_version: String,
    /// Device type identifier when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

// ---------------------------------------------------------------------------
// simctl parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    name: String,
    udid: String,
    #[serde(default)]
    state: String,
    #[serde(default, rename = "isAvailable")]
    is_available: bool,
    #[serde(default, rename = "deviceTypeIdentifier")]
    device_type_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimctlDeviceList {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

/// Extract "18.2" from "com.apple.CoreSimulator.SimRuntime.iOS-18-2".
fn os_version_from_runtime(runtime: &str) -> String {
    let tail = runtime.rsplit('.').next().unwrap_or(runtime);
    let mut parts = tail.split('-');
    let _platform = parts.next();
    let version: Vec<&str> = parts.collect();
    if version.is_empty() {
        tail.to_string()
    } else {
        version.join(".")
    }
}

/// Parse `simctl list devices -j` output into target records.
pub fn parse_simctl_device_list(json: &str) -> TargetResult<Vec<TargetRecord>> {
    let parsed: SimctlDeviceList =
        serde_json::from_str(json).map_err(|e| TargetError::Parse(e.to_string()))?;

    let mut records = Vec::new();
    for (runtime, devices) in parsed.devices {
        let os_version = os_version_from_runtime(&runtime);
        for device in devices {
            records.push(TargetRecord {
                state: TargetState::parse(&device.state),
                udid: device.udid,
                name: device.name,
                is_available: device.is_available,
                os_version: os_version.clone(),
                device_type: device.device_type_identifier,
            });
        }
    }

    // HashMap iteration order is arbitrary; keep the list stable for
    // deterministic downstream ranking.
    records.sort_by(|a, b| a.udid.cmp(&b.udid));
    Ok(records)
}

// ---------------------------------------------------------------------------
// Simulator list cache
// ---------------------------------------------------------------------------

/// Default freshness window for the simulator list (seconds-scale by
/// design: boot state changes rapidly).
pub const DEFAULT_SIMULATOR_TTL: Duration = Duration::from_secs(30);

/// Well-known key: the list is refreshed wholesale under one entry.
const SIMULATOR_LIST_KEY: &str = "simctl:devices";

/// TTL cache over the full simulator list.
pub struct SimulatorListCache {
    cache: TtlCache<Vec<TargetRecord>>,
    runner: Arc<dyn CommandRunner>,
    command_timeout: Duration,
}

impl SimulatorListCache {
    pub fn new(runner: Arc<dyn CommandRunner>, ttl: Duration, command_timeout: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            runner,
            command_timeout,
        }
    }

    /// The cached simulator list, refreshed via `simctl` when stale.
    pub fn list(&self) -> TargetResult<Vec<TargetRecord>> {
        self.cache.get(SIMULATOR_LIST_KEY, || {
            let output = self.runner.run(
                "xcrun",
                &["simctl", "list", "devices", "-j"],
                self.command_timeout,
            )?;
            if !output.success() {
                return Err(TargetError::CommandFailed {
                    stderr: output.stderr.trim().to_string(),
                });
            }
            parse_simctl_device_list(&output.stdout)
        })
    }

    /// Look up one simulator by UDID (refreshing the list if stale).
    pub fn find(&self, udid: &str) -> TargetResult<Option<TargetRecord>> {
        Ok(self.list()?.into_iter().find(|t| t.udid == udid))
    }

    /// Drop the cached list so the next read refetches.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn stats(&self) -> TtlCacheStats {
        self.cache.stats()
    }
}

// ---------------------------------------------------------------------------
// Hardware device list cache
// ---------------------------------------------------------------------------

/// Default freshness window for connected hardware.
pub const DEFAULT_DEVICE_TTL: Duration = Duration::from_secs(30);

const DEVICE_LIST_KEY: &str = "devicectl:devices";

#[derive(Debug, Deserialize)]
struct DevicectlDevice {
    identifier: String,
    #[serde(default, rename = "deviceProperties")]
    properties: DevicectlProperties,
    #[serde(default, rename = "connectionProperties")]
    connection: DevicectlConnection,
}

#[derive(Debug, Default, Deserialize)]
struct DevicectlProperties {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "osVersionNumber")]
    os_version: String,
}

#[derive(Debug, Default, Deserialize)]
struct DevicectlConnection {
    #[serde(default, rename = "tunnelState")]
    tunnel_state: String,
}

/// TTL cache over connected hardware devices.
///
/// `devicectl` output varies by Xcode release (a result envelope, an array,
/// or NDJSON), so the refresh goes through the flexible decoder and skips
/// malformed records instead of failing the batch.
pub struct DeviceListCache {
    cache: TtlCache<Vec<TargetRecord>>,
    runner: Arc<dyn CommandRunner>,
    command_timeout: Duration,
}

impl DeviceListCache {
    pub fn new(runner: Arc<dyn CommandRunner>, ttl: Duration, command_timeout: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            runner,
            command_timeout,
        }
    }

    /// The cached hardware device list, refreshed via `devicectl` when
    /// stale.
    pub fn list(&self) -> TargetResult<Vec<TargetRecord>> {
        self.cache.get(DEVICE_LIST_KEY, || {
            let output = self.runner.run(
                "xcrun",
                &["devicectl", "list", "devices", "--json-output", "-"],
                self.command_timeout,
            )?;
            if !output.success() {
                return Err(TargetError::CommandFailed {
                    stderr: output.stderr.trim().to_string(),
                });
            }
            Ok(parse_devicectl_output(&output.stdout))
        })
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn stats(&self) -> TtlCacheStats {
        self.cache.stats()
    }
}

/// Parse devicectl output leniently: unwrap the `result.devices` envelope
/// when present, otherwise treat the batch records as devices directly.
fn parse_devicectl_output(text: &str) -> Vec<TargetRecord> {
    let batch = decode_flexible(text);

    let mut values = Vec::new();
    for value in batch.records {
        match value.pointer("/result/devices") {
            Some(serde_json::Value::Array(devices)) => values.extend(devices.iter().cloned()),
            _ => values.push(value),
        }
    }

    let parsed = parse_records::<DevicectlDevice>(crate::exec::FlexibleBatch {
        records: values,
        skipped: batch.skipped,
    });

    let mut records: Vec<TargetRecord> = parsed
        .records
        .into_iter()
        .map(|d| TargetRecord {
            udid: d.identifier,
            name: d.properties.name,
            state: TargetState::Unknown,
            is_available: d.connection.tunnel_state != "disconnected",
            os_version: d.properties.os_version,
            device_type: None,
        })
        .collect();
    records.sort_by(|a, b| a.udid.cmp(&b.udid));
    records
}

// ---------------------------------------------------------------------------
// Build settings cache
// ---------------------------------------------------------------------------

/// Default freshness window for build settings (up to an hour by design:
/// project structure rarely changes mid-session).
pub const DEFAULT_BUILD_SETTINGS_TTL: Duration = Duration::from_secs(3600);

/// Discovered build settings for one project/scheme/configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSettings {
    pub settings: HashMap<String, String>,
}

impl BuildSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(|s| s.as_str())
    }

    pub fn bundle_identifier(&self) -> Option<&str> {
        self.get("PRODUCT_BUNDLE_IDENTIFIER")
    }

    pub fn product_name(&self) -> Option<&str> {
        self.get("PRODUCT_NAME")
    }

    pub fn target_build_dir(&self) -> Option<&str> {
        self.get("TARGET_BUILD_DIR")
    }
}

/// TTL cache of build settings keyed by `project|scheme|configuration`.
///
/// The fetch is supplied by the caller: command construction and
/// xcodebuild output parsing live outside this layer.
pub struct BuildSettingsCache {
    cache: TtlCache<BuildSettings>,
}

impl BuildSettingsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    fn key(project: &str, scheme: &str, configuration: &str) -> String {
        format!("{project}|{scheme}|{configuration}")
    }

    /// Fresh settings for the tuple, or run `fetch` and cache its result.
    pub fn get<E>(
        &self,
        project: &str,
        scheme: &str,
        configuration: &str,
        fetch: impl FnOnce() -> Result<BuildSettings, E>,
    ) -> Result<BuildSettings, E> {
        self.cache.get(&Self::key(project, scheme, configuration), fetch)
    }

    /// Clear everything.
    pub fn invalidate_all(&self) {
        self.cache.invalidate();
    }

    /// Clear all entries for one project.
    pub fn invalidate_project(&self, project: &str) {
        self.cache.invalidate_prefix(&format!("{project}|"));
    }

    /// Clear all entries for one project+scheme pair.
    pub fn invalidate_scheme(&self, project: &str, scheme: &str) {
        self.cache.invalidate_prefix(&format!("{project}|{scheme}|"));
    }

    pub fn stats(&self) -> TtlCacheStats {
        self.cache.stats()
    }
}
