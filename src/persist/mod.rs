//! File-backed preference persistence.
//!
//! A single versioned JSON document per cache root mirrors the
//! project-preference map across process restarts. State loads eagerly at
//! first access and every mutation writes the whole document atomically:
//! serialize to a uniquely-named temporary file, then rename over the
//! destination, so a crash mid-write never corrupts the persisted state.
//!
//! A schema-version mismatch or an unreadable/corrupt file degrades to "no
//! prior state" with a warning rather than a hard failure. No cross-process
//! file locking is attempted: two server instances sharing a cache
//! directory can race (last rename wins) — a documented limitation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::ttl::{TtlCache, TtlCacheStats};

/// Persisted document schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Persist result type
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors from persistence writes. Reads never fail hard; they degrade to
/// empty state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Per-project preferences surviving restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPreference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_udid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_configuration: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PreferenceDocument {
    schema_version: u32,
    preferences: HashMap<String, ProjectPreference>,
}

/// Durable project → preference map with an optional file mirror.
pub struct PreferenceStore {
    path: Option<PathBuf>,
    state: Mutex<HashMap<String, ProjectPreference>>,
}

impl PreferenceStore {
    /// Volatile store: state lives only for the process lifetime.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Open a store mirrored to `path`, loading prior state eagerly.
    ///
    /// Missing file means first run (empty, no warning). A version mismatch
    /// or corrupt document resets to empty with a warning.
    pub fn open(path: PathBuf) -> Self {
        let state = load_document(&path);
        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    pub fn get(&self, project: &str) -> Option<ProjectPreference> {
        self.lock_state().get(project).cloned()
    }

    /// Replace a project's preference and mirror to disk.
    pub fn set(&self, project: &str, preference: ProjectPreference) -> PersistResult<()> {
        let mut state = self.lock_state();
        state.insert(project.to_string(), preference);
        self.save(&state)
    }

    /// Mutate a project's preference in place (created as default if
    /// absent) and mirror to disk. Returns the updated value.
    pub fn update(
        &self,
        project: &str,
        mutate: impl FnOnce(&mut ProjectPreference),
    ) -> PersistResult<ProjectPreference> {
        let mut state = self.lock_state();
        let entry = state.entry(project.to_string()).or_default();
        mutate(entry);
        let updated = entry.clone();
        self.save(&state)?;
        Ok(updated)
    }

    /// Remove a project's preference and mirror to disk.
    pub fn remove(&self, project: &str) -> PersistResult<()> {
        let mut state = self.lock_state();
        state.remove(project);
        self.save(&state)
    }

    /// All projects with stored preferences, sorted.
    pub fn projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.lock_state().keys().cloned().collect();
        projects.sort();
        projects
    }

    fn save(&self, state: &HashMap<String, ProjectPreference>) -> PersistResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let document = PreferenceDocument {
            schema_version: SCHEMA_VERSION,
            preferences: state.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        // Unique temp name, then rename: atomic replacement.
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, HashMap<String, ProjectPreference>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_document(path: &Path) -> HashMap<String, ProjectPreference> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "preference file unreadable, starting empty");
            return HashMap::new();
        }
    };

    match serde_json::from_str::<PreferenceDocument>(&raw) {
        Ok(document) if document.schema_version == SCHEMA_VERSION => document.preferences,
        Ok(document) => {
            warn!(
                path = %path.display(),
                found = document.schema_version,
                expected = SCHEMA_VERSION,
                "preference schema mismatch, starting empty"
            );
            HashMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt preference file, starting empty");
            HashMap::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Preference cache
// ---------------------------------------------------------------------------

/// Default freshness window for cached preferences.
pub const DEFAULT_PREFERENCE_TTL: Duration = Duration::from_secs(3600);

/// TTL cache over the preference store, so hot lookups skip the store
/// mutex and writes stay write-through.
pub struct PreferenceCache {
    cache: TtlCache<ProjectPreference>,
    store: Arc<PreferenceStore>,
}

impl PreferenceCache {
    pub fn new(store: Arc<PreferenceStore>, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            store,
        }
    }

    /// The preference for a project (default when never recorded).
    pub fn get(&self, project: &str) -> ProjectPreference {
        let store = &self.store;
        self.cache
            .get(project, || {
                Ok::<_, std::convert::Infallible>(store.get(project).unwrap_or_default())
            })
            .unwrap_or_default()
    }

    /// Record the preferred target for a project.
    pub fn set_preferred_target(&self, project: &str, udid: &str) -> PersistResult<()> {
        let updated = self.store.update(project, |p| {
            p.preferred_udid = Some(udid.to_string());
        })?;
        self.cache.insert(project, updated);
        Ok(())
    }

    /// Record the preferred scheme/configuration for a project.
    pub fn set_preferred_scheme(
        &self,
        project: &str,
        scheme: &str,
        configuration: Option<&str>,
    ) -> PersistResult<()> {
        let updated = self.store.update(project, |p| {
            p.preferred_scheme = Some(scheme.to_string());
            if let Some(configuration) = configuration {
                p.last_configuration = Some(configuration.to_string());
            }
        })?;
        self.cache.insert(project, updated);
        Ok(())
    }

    /// Drop a project's preference everywhere.
    pub fn remove(&self, project: &str) -> PersistResult<()> {
        self.store.remove(project)?;
        self.cache.remove(project);
        Ok(())
    }

    pub fn stats(&self) -> TtlCacheStats {
        self.cache.stats()
    }
}
