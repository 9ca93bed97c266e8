//! Target suggestion flow against a scripted simctl: one wholesale list
//! fetch feeds ranking, usage recording shifts it, and the fetch itself is
//! cached across calls.

use std::sync::Arc;
use std::time::Duration;

use simlane_cache::exec::{CommandRunner, MockRunner};
use simlane_cache::targets::{SimulatorListCache, TargetError};
use simlane_cache::SuggestionEngine;

const SIMCTL_JSON: &str = r#"{
    "devices": {
        "com.apple.CoreSimulator.SimRuntime.iOS-18-2": [
            {"name": "iPhone 16 Pro", "udid": "SIM-AAAA", "state": "Booted", "isAvailable": true},
            {"name": "iPhone 16", "udid": "SIM-BBBB", "state": "Shutdown", "isAvailable": true}
        ],
        "com.apple.CoreSimulator.SimRuntime.iOS-17-5": [
            {"name": "iPhone 15", "udid": "SIM-CCCC", "state": "Shutdown", "isAvailable": true}
        ]
    }
}"#;

fn engine_with_runner() -> (SuggestionEngine, Arc<MockRunner>) {
    let runner = Arc::new(MockRunner::new());
    runner.push_success(SIMCTL_JSON);
    let cache = Arc::new(SimulatorListCache::new(
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Duration::from_secs(300),
        Duration::from_secs(5),
    ));
    (SuggestionEngine::new(cache), runner)
}

#[test]
fn test_ranking_uses_one_cached_fetch() {
    let (engine, runner) = engine_with_runner();

    let first = engine.get_suggested_simulators(None, None, None).unwrap();
    let second = engine.get_suggested_simulators(None, None, None).unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    // Both rankings came from a single simctl invocation.
    assert_eq!(runner.call_count(), 1);
    assert_eq!(runner.calls()[0], "xcrun simctl list devices -j");
}

#[test]
fn test_usage_recording_shifts_ranking_with_explanation() {
    let (engine, _runner) = engine_with_runner();

    let before = engine.get_best_simulator(Some("app"), None).unwrap().unwrap();
    assert_ne!(before.target.udid, "SIM-CCCC");

    // Make the older, less common simulator this project's go-to.
    engine.record_usage("SIM-CCCC", Some("app"));
    engine.record_boot_event("SIM-CCCC", true, 6_000);

    let after = engine.get_best_simulator(Some("app"), None).unwrap().unwrap();
    assert_eq!(after.target.udid, "SIM-CCCC");
    assert!(after.reason.contains("Project preference"));
    assert!(after.reason.contains("Boot avg 6000ms"));

    // A different project still sees the unbiased ranking.
    let other = engine.get_best_simulator(Some("other"), None).unwrap().unwrap();
    assert_eq!(other.target.udid, before.target.udid);
}

#[test]
fn test_fetch_failure_surfaces_and_is_retried() {
    let runner = Arc::new(MockRunner::new());
    runner.push_failure(1, "Unable to connect to CoreSimulator");
    let cache = Arc::new(SimulatorListCache::new(
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Duration::from_secs(300),
        Duration::from_secs(5),
    ));
    let engine = SuggestionEngine::new(cache);

    let err = engine.get_suggested_simulators(None, None, None).unwrap_err();
    assert!(matches!(err, TargetError::CommandFailed { .. }));

    // The failure was not cached: the next call fetches again and succeeds.
    runner.push_success(SIMCTL_JSON);
    let ranked = engine.get_suggested_simulators(None, None, None).unwrap();
    assert_eq!(ranked.len(), 3);
    assert_eq!(runner.call_count(), 2);
}
