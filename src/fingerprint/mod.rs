//! UI view fingerprinting.
//!
//! Canonicalizes a list of UI elements into an order-independent,
//! dynamic-content-insensitive content hash, usable as a cache key
//! component for per-screen state. Volatile label content (clock times,
//! percentages, counters, prices) is replaced with placeholder tokens
//! before hashing so two renders of the same screen hash identically.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Truncated digest length in hex characters (64 bits of SHA-256).
///
/// Deliberate collision/length trade-off: keys stay short enough to embed
/// in composite cache keys, and 64 bits is ample for the per-session
/// population of distinct screens.
pub const DEFAULT_HASH_LEN: usize = 16;

/// Minimum interactive elements for a view to be considered stable.
/// Fewer is treated as a still-loading or sparse screen.
pub const MIN_INTERACTIVE_ELEMENTS: usize = 3;

/// Substrings in element text that mark a view as transient.
pub const TRANSIENCE_MARKERS: &[&str] =
    &["loading", "spinner", "progress", "animating", "refreshing"];

/// Default cap on the diagnostic container sample.
const DEFAULT_CONTAINER_SAMPLE: usize = 5;

/// Rectangle in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Screen dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenBounds {
    pub width: f64,
    pub height: f64,
}

/// Device orientation at capture time.
///
/// Carried on the fingerprint because the same element structure can
/// legitimately mean two different cache entries under different
/// orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::PortraitUpsideDown => "portrait_upside_down",
            Self::LandscapeLeft => "landscape_left",
            Self::LandscapeRight => "landscape_right",
        }
    }
}

/// A UI element as reported by the automation layer.
///
/// `enabled`/`hittable` are tri-state: `None` means the tool did not report
/// the attribute, which is not treated as `false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiElement {
    /// Element type (e.g. "Button", "StaticText").
    pub kind: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub frame: Option<Rect>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub hittable: Option<bool>,
}

impl UiElement {
    /// Interactive means: has bounds, not known-unhittable, not
    /// known-disabled.
    pub fn is_interactive(&self) -> bool {
        self.frame.is_some() && self.hittable != Some(false) && self.enabled != Some(false)
    }

    fn combined_text(&self) -> String {
        let mut text = self.kind.clone();
        if let Some(identifier) = &self.identifier {
            text.push(' ');
            text.push_str(identifier);
        }
        if let Some(label) = &self.label {
            text.push(' ');
            text.push_str(label);
        }
        text.to_lowercase()
    }
}

/// Order-independent structural digest of a screen.
///
/// Created on demand and used purely as a cache key component, never stored
/// as authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewFingerprint {
    /// Truncated hex digest of the canonicalized element structure.
    pub element_structure_hash: String,
    pub orientation: Orientation,
    pub screen_bounds: ScreenBounds,
    /// Number of interactive elements that contributed to the hash.
    pub element_count: usize,
    /// Bounded sample of element kinds, for diagnostics only.
    pub top_level_containers: Vec<String>,
}

/// One ordered substitution applied to labels before hashing.
#[derive(Debug, Clone)]
pub struct SanitizeRule {
    pub name: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

impl SanitizeRule {
    pub fn new(name: &'static str, pattern: &str, replacement: &'static str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("invalid sanitize rule pattern"),
            replacement,
        }
    }

    fn apply(&self, text: &str) -> String {
        self.pattern.replace_all(text, self.replacement).into_owned()
    }
}

/// Default dynamic-content rules, applied in order. Clock times must run
/// before the generic multi-digit rule or "10:23" degrades to "<NUM>:<NUM>".
pub fn default_sanitize_rules() -> Vec<SanitizeRule> {
    vec![
        SanitizeRule::new(
            "clock_time",
            r"(?i)\b\d{1,2}:\d{2}(:\d{2})?\s*([ap]\.?m\.?)?",
            "<TIME>",
        ),
        SanitizeRule::new("percentage", r"\d+(\.\d+)?\s*%", "<PCT>"),
        SanitizeRule::new("currency", r"[$€£¥]\s*\d[\d,]*(\.\d+)?", "<CUR>"),
        SanitizeRule::new("multi_digit", r"\d{2,}", "<NUM>"),
    ]
}

/// Fingerprinting knobs. The rule list is pluggable so detection patterns
/// can be extended without touching the hashing core.
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    pub rules: Vec<SanitizeRule>,
    pub hash_len: usize,
    pub container_sample: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            rules: default_sanitize_rules(),
            hash_len: DEFAULT_HASH_LEN,
            container_sample: DEFAULT_CONTAINER_SAMPLE,
        }
    }
}

/// Strip volatile content from a label using the configured rules.
pub fn sanitize_label(label: &str, rules: &[SanitizeRule]) -> String {
    let mut text = label.to_string();
    for rule in rules {
        text = rule.apply(&text);
    }
    text
}

/// Compute a content-addressed fingerprint for a screen.
///
/// Element signatures are sorted lexicographically before hashing, so the
/// same element multiset produces the same hash regardless of traversal
/// order.
pub fn compute_view_fingerprint(
    elements: &[UiElement],
    screen: ScreenBounds,
    orientation: Orientation,
    config: &FingerprintConfig,
) -> ViewFingerprint {
    let interactive: Vec<&UiElement> = elements.iter().filter(|e| e.is_interactive()).collect();

    let mut signatures: Vec<String> = interactive
        .iter()
        .map(|e| element_signature(e, &config.rules))
        .collect();
    signatures.sort();

    let mut hasher = Sha256::new();
    hasher.update(signatures.join("\n").as_bytes());
    let digest = hex::encode(hasher.finalize());
    let truncated = digest[..config.hash_len.min(digest.len())].to_string();

    let top_level_containers = interactive
        .iter()
        .take(config.container_sample)
        .map(|e| e.kind.clone())
        .collect();

    ViewFingerprint {
        element_structure_hash: truncated,
        orientation,
        screen_bounds: screen,
        element_count: interactive.len(),
        top_level_containers,
    }
}

/// `kind:identifier:sanitizedLabel:x,y,w,h` with bounds rounded to integer
/// pixels.
fn element_signature(element: &UiElement, rules: &[SanitizeRule]) -> String {
    let identifier = element.identifier.as_deref().unwrap_or("");
    let label = element
        .label
        .as_deref()
        .map(|l| sanitize_label(l, rules))
        .unwrap_or_default();
    // is_interactive guarantees a frame.
    let frame = element.frame.unwrap_or(Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    });
    format!(
        "{}:{}:{}:{},{},{},{}",
        element.kind,
        identifier,
        label,
        frame.x.round() as i64,
        frame.y.round() as i64,
        frame.width.round() as i64,
        frame.height.round() as i64,
    )
}

/// Heuristic: is this view stable enough to cache?
///
/// Transience markers anywhere in an element's type/label/identifier text,
/// or fewer than [`MIN_INTERACTIVE_ELEMENTS`] interactive elements, mean
/// "don't cache".
pub fn is_view_cacheable(elements: &[UiElement]) -> bool {
    for element in elements {
        let text = element.combined_text();
        if TRANSIENCE_MARKERS.iter().any(|marker| text.contains(marker)) {
            return false;
        }
    }
    let interactive = elements.iter().filter(|e| e.is_interactive()).count();
    interactive >= MIN_INTERACTIVE_ELEMENTS
}

/// Compose the final cache key from a fingerprint and its owning scope.
///
/// This function, not the raw hash, is the contract downstream consumers
/// depend on. Format: `scope:orientation:WxH:hash[:version]`.
pub fn generate_cache_key(
    fingerprint: &ViewFingerprint,
    scope_id: &str,
    version: Option<&str>,
) -> String {
    let mut key = format!(
        "{}:{}:{}x{}:{}",
        scope_id,
        fingerprint.orientation.as_str(),
        fingerprint.screen_bounds.width.round() as i64,
        fingerprint.screen_bounds.height.round() as i64,
        fingerprint.element_structure_hash,
    );
    if let Some(version) = version {
        key.push(':');
        key.push_str(version);
    }
    key
}
