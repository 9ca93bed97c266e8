//! Progressive disclosure end-to-end: store a large command output, read
//! the cheap summary, then drill into tail and filtered views by ID.

use std::collections::HashMap;

use simlane_cache::response::{ResponseCache, ResponseCacheConfig, ResponseError};
use simlane_cache::NewResponse;

fn build_output_with_errors() -> String {
    let mut output = String::new();
    for i in 1..=480 {
        output.push_str(&format!("CompileSwift file{i}.swift\n"));
    }
    output.push_str("main.swift:10:5: error: X\n");
    output.push_str("scene.swift:44:1: warning: deprecated\n");
    output.push_str("util.swift:2:9: error: Y\n");
    output.push_str("** BUILD FAILED **\n");
    output
}

#[test]
fn test_store_then_drill_down() {
    let cache = ResponseCache::new(ResponseCacheConfig::default());

    let mut metadata = HashMap::new();
    metadata.insert("scheme".to_string(), "App".to_string());
    let id = cache.store(NewResponse {
        tool: "xcodebuild-test".to_string(),
        full_output: build_output_with_errors(),
        stderr: String::new(),
        exit_code: 1,
        command: "xcodebuild -scheme App test".to_string(),
        metadata,
    });

    // Cheap summary first: no payload.
    let summary = cache.summary(&id).unwrap();
    assert_eq!(summary.tool, "xcodebuild-test");
    assert_eq!(summary.exit_code, 1);
    assert!(summary.output_bytes > 0);

    // Tail-biased full log: failures live at the end.
    let log = cache.full_log(&id, 100).unwrap();
    assert_eq!(log.total_lines, 484);
    assert!(log.truncated);
    assert_eq!(log.lines.len(), 100);
    assert_eq!(log.lines.last().map(String::as_str), Some("** BUILD FAILED **"));

    // Errors-only drill-down: the two `error:` lines plus the failure
    // marker, with an exact count.
    let errors = cache.errors_only(&id, 50).unwrap();
    assert_eq!(errors.matched, 3);
    assert!(errors.lines.iter().any(|l| l.contains("error: X")));
    assert!(errors.lines.iter().any(|l| l.contains("error: Y")));

    let warnings = cache.warnings_only(&id, 50).unwrap();
    assert_eq!(warnings.matched, 1);

    // Projections round-trip the stored fields exactly.
    assert_eq!(cache.command(&id).unwrap(), "xcodebuild -scheme App test");
    assert_eq!(
        cache.metadata(&id).unwrap().get("scheme").map(String::as_str),
        Some("App")
    );
}

#[test]
fn test_listing_stays_cheap_and_recent_first() {
    let cache = ResponseCache::new(ResponseCacheConfig::default());

    for i in 0..5 {
        cache.store(NewResponse {
            tool: if i % 2 == 0 { "build" } else { "test" }.to_string(),
            full_output: "x".repeat(10_000),
            exit_code: 0,
            ..Default::default()
        });
    }

    let recent = cache.get_recent(None, 3);
    assert_eq!(recent.len(), 3);
    // Most recent first.
    assert!(recent[0].stored_at >= recent[1].stored_at);
    assert!(recent[1].stored_at >= recent[2].stored_at);

    let tests_only = cache.get_recent(Some("test"), 10);
    assert_eq!(tests_only.len(), 2);

    let stats = cache.stats();
    assert_eq!(stats.total_entries, 5);
    assert_eq!(stats.by_tool.get("build"), Some(&3));
    assert_eq!(stats.by_tool.get("test"), Some(&2));
}

#[test]
fn test_eviction_makes_old_ids_not_found() {
    let cache = ResponseCache::new(ResponseCacheConfig {
        max_entries: 2,
        max_age: std::time::Duration::from_secs(3600),
    });

    let oldest = cache.store(NewResponse {
        tool: "build".to_string(),
        ..Default::default()
    });
    let kept: Vec<String> = (0..2)
        .map(|_| {
            cache.store(NewResponse {
                tool: "build".to_string(),
                ..Default::default()
            })
        })
        .collect();

    // The evicted ID reports "not found or expired", not empty content.
    assert!(matches!(
        cache.get(&oldest),
        Err(ResponseError::NotFound { .. })
    ));
    for id in kept {
        assert!(cache.get(&id).is_ok());
    }
}
