//! Response cache and progressive disclosure.
//!
//! Large command outputs are stored once under a generated ID; callers get
//! a cheap summary immediately and drill into the full log, error lines, or
//! metadata on demand by ID. Records are immutable once stored and leave
//! the cache only through eviction (oldest-first, on capacity or age).
//! Views are computed at read time, never stored.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Response result type
pub type ResponseResult<T> = Result<T, ResponseError>;

/// Errors from response cache reads.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Distinct from "exists but empty output": the record is gone.
    #[error("response {id} not found or expired")]
    NotFound { id: String },
}

/// Line markers for the errors-only view.
const ERROR_MARKERS: &[&str] = &[
    "error:",
    "fatal error:",
    "** BUILD FAILED **",
    "** TEST FAILED **",
];

/// Line markers for the warnings-only view.
const WARNING_MARKERS: &[&str] = &["warning:"];

/// A stored command output. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Opaque generated ID, unique within the cache.
    pub id: String,
    /// Tool tag, e.g. "xcodebuild-test".
    pub tool: String,
    pub full_output: String,
    pub stderr: String,
    pub exit_code: i32,
    pub command: String,
    /// Open key/value metadata.
    pub metadata: HashMap<String, String>,
    pub stored_at: DateTime<Utc>,
}

/// Input to [`ResponseCache::store`]: a record without identity.
#[derive(Debug, Clone, Default)]
pub struct NewResponse {
    pub tool: String,
    pub full_output: String,
    pub stderr: String,
    pub exit_code: i32,
    pub command: String,
    pub metadata: HashMap<String, String>,
}

/// Lightweight projection for listings: never the full payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub id: String,
    pub tool: String,
    pub stored_at: DateTime<Utc>,
    pub exit_code: i32,
    pub output_bytes: usize,
}

/// Tail-biased full-log view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullLogView {
    /// The last `max_lines` lines when truncated, all lines otherwise.
    pub lines: Vec<String>,
    /// True total before truncation.
    pub total_lines: usize,
    pub truncated: bool,
}

/// Line-filtered view (errors-only or warnings-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredLogView {
    /// The last `max_lines` matching lines when truncated.
    pub lines: Vec<String>,
    /// Total matching lines before truncation.
    pub matched: usize,
    pub truncated: bool,
}

/// Cache stats: total plus a per-tool breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheStats {
    pub total_entries: usize,
    pub by_tool: HashMap<String, usize>,
}

/// Capacity and age bounds for the store.
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Maximum stored records; the oldest are evicted past this.
    pub max_entries: usize,
    /// Maximum record age before eviction.
    pub max_age: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Stored record plus a monotonic timestamp for age-based eviction.
#[derive(Debug)]
struct StoredResponse {
    record: ResponseRecord,
    stored_mono: Instant,
}

/// In-process store for large command outputs.
///
/// Insertion order doubles as age order, so eviction pops from the front.
pub struct ResponseCache {
    config: ResponseCacheConfig,
    entries: Mutex<VecDeque<StoredResponse>>,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Store a command output and return its generated ID.
    pub fn store(&self, input: NewResponse) -> String {
        let id = format!("resp-{}", Uuid::new_v4());
        let record = ResponseRecord {
            id: id.clone(),
            tool: input.tool,
            full_output: input.full_output,
            stderr: input.stderr,
            exit_code: input.exit_code,
            command: input.command,
            metadata: input.metadata,
            stored_at: Utc::now(),
        };

        let mut entries = self.lock_entries();
        entries.push_back(StoredResponse {
            record,
            stored_mono: Instant::now(),
        });
        Self::evict(&mut entries, &self.config);
        id
    }

    /// Retrieve a stored record by ID.
    pub fn get(&self, id: &str) -> ResponseResult<ResponseRecord> {
        let mut entries = self.lock_entries();
        Self::evict(&mut entries, &self.config);
        entries
            .iter()
            .find(|e| e.record.id == id)
            .map(|e| e.record.clone())
            .ok_or_else(|| ResponseError::NotFound { id: id.to_string() })
    }

    /// Tail-biased full log: output then stderr, last `max_lines` lines.
    /// Failures usually appear at the end, so the tail is what callers want
    /// first.
    pub fn full_log(&self, id: &str, max_lines: usize) -> ResponseResult<FullLogView> {
        let record = self.get(id)?;
        let all: Vec<String> = combined_lines(&record).map(str::to_string).collect();
        let total_lines = all.len();
        let truncated = total_lines > max_lines;
        let lines = if truncated {
            all[total_lines - max_lines..].to_vec()
        } else {
            all
        };
        Ok(FullLogView {
            lines,
            total_lines,
            truncated,
        })
    }

    /// Only lines carrying error markers.
    pub fn errors_only(&self, id: &str, max_lines: usize) -> ResponseResult<FilteredLogView> {
        self.filtered(id, max_lines, ERROR_MARKERS)
    }

    /// Only lines carrying warning markers.
    pub fn warnings_only(&self, id: &str, max_lines: usize) -> ResponseResult<FilteredLogView> {
        self.filtered(id, max_lines, WARNING_MARKERS)
    }

    fn filtered(
        &self,
        id: &str,
        max_lines: usize,
        markers: &[&str],
    ) -> ResponseResult<FilteredLogView> {
        let record = self.get(id)?;
        let matching: Vec<String> = combined_lines(&record)
            .filter(|line| markers.iter().any(|m| line.contains(m)))
            .map(str::to_string)
            .collect();
        let matched = matching.len();
        let truncated = matched > max_lines;
        let lines = if truncated {
            matching[matched - max_lines..].to_vec()
        } else {
            matching
        };
        Ok(FilteredLogView {
            lines,
            matched,
            truncated,
        })
    }

    /// Direct projection of the stored summary fields.
    pub fn summary(&self, id: &str) -> ResponseResult<ResponseSummary> {
        self.get(id).map(|record| summarize(&record))
    }

    /// Direct projection of the stored command string.
    pub fn command(&self, id: &str) -> ResponseResult<String> {
        self.get(id).map(|record| record.command)
    }

    /// Direct projection of the stored metadata.
    pub fn metadata(&self, id: &str) -> ResponseResult<HashMap<String, String>> {
        self.get(id).map(|record| record.metadata)
    }

    /// Summaries ordered most recent first, optionally filtered by tool.
    pub fn get_recent(&self, tool: Option<&str>, limit: usize) -> Vec<ResponseSummary> {
        let mut entries = self.lock_entries();
        Self::evict(&mut entries, &self.config);
        entries
            .iter()
            .rev()
            .filter(|e| tool.map_or(true, |t| e.record.tool == t))
            .take(limit)
            .map(|e| summarize(&e.record))
            .collect()
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let mut entries = self.lock_entries();
        Self::evict(&mut entries, &self.config);
        let mut by_tool: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter() {
            *by_tool.entry(entry.record.tool.clone()).or_insert(0) += 1;
        }
        ResponseCacheStats {
            total_entries: entries.len(),
            by_tool,
        }
    }

    fn evict(entries: &mut VecDeque<StoredResponse>, config: &ResponseCacheConfig) {
        while let Some(front) = entries.front() {
            let too_old = front.stored_mono.elapsed() >= config.max_age;
            let over_capacity = entries.len() > config.max_entries;
            if !too_old && !over_capacity {
                break;
            }
            if let Some(evicted) = entries.pop_front() {
                debug!(
                    id = %evicted.record.id,
                    tool = %evicted.record.tool,
                    too_old,
                    "evicting response cache entry"
                );
            }
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<StoredResponse>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn combined_lines(record: &ResponseRecord) -> impl Iterator<Item = &str> {
    record
        .full_output
        .lines()
        .chain(record.stderr.lines())
}

fn summarize(record: &ResponseRecord) -> ResponseSummary {
    ResponseSummary {
        id: record.id.clone(),
        tool: record.tool.clone(),
        stored_at: record.stored_at,
        exit_code: record.exit_code,
        output_bytes: record.full_output.len() + record.stderr.len(),
    }
}
