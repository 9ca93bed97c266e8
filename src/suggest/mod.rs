//! Execution target suggestion and scoring.
//!
//! Ranks candidate simulators by combining independently-weighted signals:
//! project-specific historical preference, recency of use, OS version,
//! device-model popularity, and historical boot performance. Each signal
//! attaches a human-readable reason so a caller can explain why a target
//! ranked where it did.
//!
//! The weights are relative multipliers, not probabilities; they
//! deliberately sum past 1.0 and are never renormalized. Scores are only
//! compared with each other.
//!
//! Ranking is deterministic: given unchanged underlying state, repeated
//! calls return identical ordering and scores, with UDID as the stable
//! tie-break.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::targets::{SimulatorListCache, TargetRecord, TargetResult};

/// Signal weights. Documented as percentages in the original design
/// (40/40/30/20/10 — summing to 140); kept verbatim as multipliers.
pub const WEIGHT_PROJECT_PREFERENCE: f64 = 0.40;
pub const WEIGHT_RECENT_USAGE: f64 = 0.40;
pub const WEIGHT_OS_VERSION: f64 = 0.30;
pub const WEIGHT_POPULARITY: f64 = 0.20;
pub const WEIGHT_BOOT_PERFORMANCE: f64 = 0.10;

/// Device models considered common enough to prefer absent other signals.
pub const COMMON_MODELS: &[&str] = &[
    "iPhone 16 Pro",
    "iPhone 16",
    "iPhone 15 Pro",
    "iPhone 15",
    "iPhone SE",
    "iPad Pro",
    "iPad Air",
];

/// Boot outcomes kept per target for the rolling metrics.
const BOOT_HISTORY_LIMIT: usize = 20;

/// Boot time above which the performance signal bottoms out.
const BOOT_TIME_CEILING_MS: f64 = 30_000.0;

/// One recorded boot outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSample {
    pub success: bool,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

/// Derived boot performance for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_boot_ms: f64,
    /// Successful boots / total boots, in [0, 1].
    pub reliability: f64,
}

/// Global per-target usage counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetUsage {
    pub last_used: Option<DateTime<Utc>>,
    pub use_count: u64,
    pub boot_history: VecDeque<BootSample>,
}

impl TargetUsage {
    /// Rolling boot metrics, or `None` with no recorded history.
    pub fn performance(&self) -> Option<PerformanceMetrics> {
        if self.boot_history.is_empty() {
            return None;
        }
        let total = self.boot_history.len() as f64;
        let successes = self.boot_history.iter().filter(|s| s.success).count() as f64;
        let avg_boot_ms =
            self.boot_history.iter().map(|s| s.duration_ms as f64).sum::<f64>() / total;
        Some(PerformanceMetrics {
            avg_boot_ms,
            reliability: successes / total,
        })
    }
}

/// Per-project usage counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUsage {
    /// Most recently used target for this project.
    pub last_udid: Option<String>,
    /// Per-target use counts for this project.
    pub use_counts: HashMap<String, u64>,
    pub last_build: Option<DateTime<Utc>>,
    pub build_count: u64,
    pub success_count: u64,
}

/// Per-project and global usage history.
///
/// Mutated only by the explicit `record_*` calls; never created implicitly
/// by reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageHistory {
    pub per_project: HashMap<String, ProjectUsage>,
    pub per_target: HashMap<String, TargetUsage>,
}

impl UsageHistory {
    /// Record that `udid` was used, optionally scoped to a project.
    pub fn record_usage(&mut self, udid: &str, project: Option<&str>) {
        let now = Utc::now();
        let target = self.per_target.entry(udid.to_string()).or_default();
        target.last_used = Some(now);
        target.use_count += 1;

        if let Some(project) = project {
            let usage = self.per_project.entry(project.to_string()).or_default();
            usage.last_udid = Some(udid.to_string());
            *usage.use_counts.entry(udid.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a boot outcome for `udid`.
    pub fn record_boot_event(&mut self, udid: &str, success: bool, duration_ms: u64) {
        let target = self.per_target.entry(udid.to_string()).or_default();
        target.boot_history.push_back(BootSample {
            success,
            duration_ms,
            at: Utc::now(),
        });
        while target.boot_history.len() > BOOT_HISTORY_LIMIT {
            target.boot_history.pop_front();
        }
    }

    /// Record a build result for a project.
    pub fn record_build_result(&mut self, project: &str, success: bool) {
        let usage = self.per_project.entry(project.to_string()).or_default();
        usage.last_build = Some(Utc::now());
        usage.build_count += 1;
        if success {
            usage.success_count += 1;
        }
    }
}

/// A ranked candidate with its score and the reasons behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTarget {
    pub target: TargetRecord,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Top-1 projection of the ranked list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestTarget {
    pub target: TargetRecord,
    pub score: f64,
    pub reason: String,
}

/// Ranks execution targets from the simulator list cache plus usage
/// history. Reads both; owns neither record type.
pub struct SuggestionEngine {
    simulators: Arc<SimulatorListCache>,
    history: Mutex<UsageHistory>,
}

impl SuggestionEngine {
    pub fn new(simulators: Arc<SimulatorListCache>) -> Self {
        Self {
            simulators,
            history: Mutex::new(UsageHistory::default()),
        }
    }

    /// Seed the engine with previously recorded history.
    pub fn with_history(simulators: Arc<SimulatorListCache>, history: UsageHistory) -> Self {
        Self {
            simulators,
            history: Mutex::new(history),
        }
    }

    /// Record that a target was used (optionally for a project).
    pub fn record_usage(&self, udid: &str, project: Option<&str>) {
        self.lock_history().record_usage(udid, project);
    }

    /// Record a boot outcome for a target.
    pub fn record_boot_event(&self, udid: &str, success: bool, duration_ms: u64) {
        self.lock_history().record_boot_event(udid, success, duration_ms);
    }

    /// Record a build result for a project.
    pub fn record_build_result(&self, project: &str, success: bool) {
        self.lock_history().record_build_result(project, success);
    }

    /// Snapshot of the current history (for persistence by the caller).
    pub fn history_snapshot(&self) -> UsageHistory {
        self.lock_history().clone()
    }

    /// Rank available simulators for a project, best first.
    ///
    /// `device_type` is a case-insensitive name filter (e.g. "iPhone").
    /// Targets with no recorded history still rank; missing signals score
    /// zero instead of disqualifying.
    pub fn get_suggested_simulators(
        &self,
        project: Option<&str>,
        device_type: Option<&str>,
        max_results: Option<usize>,
    ) -> TargetResult<Vec<ScoredTarget>> {
        let candidates: Vec<TargetRecord> = self
            .simulators
            .list()?
            .into_iter()
            .filter(|t| t.is_available)
            .filter(|t| {
                device_type.map_or(true, |d| t.name.to_lowercase().contains(&d.to_lowercase()))
            })
            .collect();

        let history = self.lock_history();
        let project_usage = project.and_then(|p| history.per_project.get(p));
        let max_os = candidates
            .iter()
            .map(|t| os_version_number(&t.os_version))
            .fold(0.0_f64, f64::max);

        let mut scored: Vec<ScoredTarget> = candidates
            .into_iter()
            .map(|target| score_target(target, project_usage, &history.per_target, max_os))
            .collect();
        drop(history);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.target.udid.cmp(&b.target.udid))
        });

        if let Some(max) = max_results {
            scored.truncate(max);
        }
        Ok(scored)
    }

    /// Top-1 projection: `None` (not an error) when the filtered pool is
    /// empty.
    pub fn get_best_simulator(
        &self,
        project: Option<&str>,
        device_type: Option<&str>,
    ) -> TargetResult<Option<BestTarget>> {
        let mut ranked = self.get_suggested_simulators(project, device_type, Some(1))?;
        let best = ranked.drain(..).next().map(|scored| BestTarget {
            reason: if scored.reasons.is_empty() {
                "Available".to_string()
            } else {
                scored.reasons.join(", ")
            },
            target: scored.target,
            score: scored.score,
        });
        Ok(best)
    }

    fn lock_history(&self) -> MutexGuard<'_, UsageHistory> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn score_target(
    target: TargetRecord,
    project_usage: Option<&ProjectUsage>,
    per_target: &HashMap<String, TargetUsage>,
    max_os: f64,
) -> ScoredTarget {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    // Project-specific preference (highest weight).
    if let Some(usage) = project_usage {
        if usage.last_udid.as_deref() == Some(target.udid.as_str()) {
            score += WEIGHT_PROJECT_PREFERENCE;
            reasons.push("Project preference".to_string());
        } else if let Some(count) = usage.use_counts.get(&target.udid) {
            let max_count = usage.use_counts.values().copied().max().unwrap_or(1).max(1);
            score += WEIGHT_PROJECT_PREFERENCE * (*count as f64 / max_count as f64);
            reasons.push(format!("Used {count} time(s) for this project"));
        }
    }

    // Recency of use (co-equal high weight). Bucketed so scores stay stable
    // between back-to-back calls.
    let usage = per_target.get(&target.udid);
    if let Some(last_used) = usage.and_then(|u| u.last_used) {
        let age = Utc::now() - last_used;
        let (factor, reason) = recency_bucket(age);
        if factor > 0.0 {
            score += WEIGHT_RECENT_USAGE * factor;
            reasons.push(reason.to_string());
        }
    }

    // OS version recency (medium weight), relative to the candidate pool.
    let os = os_version_number(&target.os_version);
    if max_os > 0.0 {
        score += WEIGHT_OS_VERSION * (os / max_os);
        if (os - max_os).abs() < f64::EPSILON {
            reasons.push(format!("Newest OS ({})", target.os_version));
        }
    }

    // Model popularity (lower weight).
    if COMMON_MODELS.iter().any(|m| target.name.starts_with(m)) {
        score += WEIGHT_POPULARITY;
        reasons.push("Common model".to_string());
    }

    // Boot performance (lowest weight); neutral when unrecorded.
    if let Some(metrics) = usage.and_then(|u| u.performance()) {
        let speed = (1.0 - metrics.avg_boot_ms / BOOT_TIME_CEILING_MS).clamp(0.0, 1.0);
        score += WEIGHT_BOOT_PERFORMANCE * metrics.reliability * speed;
        reasons.push(format!("Boot avg {:.0}ms", metrics.avg_boot_ms));
    }

    ScoredTarget {
        target,
        score,
        reasons,
    }
}

/// Bucketed recency factor plus its reason string.
fn recency_bucket(age: ChronoDuration) -> (f64, &'static str) {
    if age < ChronoDuration::hours(1) {
        (1.0, "Recently used")
    } else if age < ChronoDuration::hours(24) {
        (0.5, "Used today")
    } else if age < ChronoDuration::days(7) {
        (0.25, "Used this week")
    } else {
        (0.0, "")
    }
}

/// "18.2" → 18.02; unparseable versions rank lowest, not error.
fn os_version_number(version: &str) -> f64 {
    let mut parts = version.split('.');
    let major: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    let minor: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    major + minor / 100.0
}
