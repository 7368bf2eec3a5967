//! Session and server visibility filtering.
//!
//! A [`VisibilityFilter`] decides whether a component is visible given its
//! version-less key and tags. It layers a blocklist (disabled keys/tags),
//! an allowlist (enabled keys/tags), and a default. The blocklist always
//! wins: a component matched by both lists is hidden.
//!
//! Filters use an interior lock so a shared server-level filter can be
//! mutated while sessions read it; reads take a short read lock and never
//! block behind other readers.

use std::collections::BTreeSet;

use parking_lot::RwLock;

/// Mutable key/tag visibility rules with blocklist-wins precedence.
///
/// # Examples
///
/// ```
/// use mcp_fabric::visibility::VisibilityFilter;
///
/// let filter = VisibilityFilter::new();
/// filter.disable(["tool:internal"], ["debug"]);
/// assert!(!filter.is_enabled("tool:internal", &[]));
/// assert!(!filter.is_enabled("tool:trace", &["debug".to_string()]));
/// assert!(filter.is_enabled("tool:add", &[]));
///
/// // Allowlist-only mode: everything not named is hidden.
/// filter.enable_only(["tool:add"], Vec::<String>::new());
/// assert!(filter.is_enabled("tool:add", &[]));
/// assert!(!filter.is_enabled("tool:other", &[]));
/// ```
#[derive(Debug, Default)]
pub struct VisibilityFilter {
    state: RwLock<FilterState>,
}

#[derive(Debug, Clone)]
struct FilterState {
    disabled_keys: BTreeSet<String>,
    disabled_tags: BTreeSet<String>,
    enabled_keys: BTreeSet<String>,
    enabled_tags: BTreeSet<String>,
    default_enabled: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            disabled_keys: BTreeSet::new(),
            disabled_tags: BTreeSet::new(),
            enabled_keys: BTreeSet::new(),
            enabled_tags: BTreeSet::new(),
            default_enabled: true,
        }
    }
}

impl Clone for VisibilityFilter {
    fn clone(&self) -> Self {
        Self {
            state: RwLock::new(self.state.read().clone()),
        }
    }
}

impl VisibilityFilter {
    /// An empty filter: everything visible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds keys and tags to the blocklist, removing them from the
    /// allowlist if present.
    pub fn disable<K, T>(&self, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let mut state = self.state.write();
        for key in keys {
            let key = key.into();
            state.enabled_keys.remove(&key);
            state.disabled_keys.insert(key);
        }
        for tag in tags {
            let tag = tag.into();
            state.enabled_tags.remove(&tag);
            state.disabled_tags.insert(tag);
        }
    }

    /// Adds keys and tags to the allowlist, removing them from the
    /// blocklist if present. Components outside both lists keep the
    /// current default.
    pub fn enable<K, T>(&self, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let mut state = self.state.write();
        for key in keys {
            let key = key.into();
            state.disabled_keys.remove(&key);
            state.enabled_keys.insert(key);
        }
        for tag in tags {
            let tag = tag.into();
            state.disabled_tags.remove(&tag);
            state.enabled_tags.insert(tag);
        }
    }

    /// Allowlist-only mode: clears any prior allowlist, flips the default
    /// to hidden, then enables exactly the given keys and tags. Existing
    /// blocklist entries are kept and still win.
    pub fn enable_only<K, T>(&self, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        {
            let mut state = self.state.write();
            state.enabled_keys.clear();
            state.enabled_tags.clear();
            state.default_enabled = false;
        }
        self.enable(keys, tags);
    }

    /// Clears all rules, restoring the default-visible state.
    pub fn reset(&self) {
        *self.state.write() = FilterState::default();
    }

    /// Whether a component with this version-less key and these tags is
    /// visible. Blocklist wins over allowlist; components in neither list
    /// follow the default.
    pub fn is_enabled(&self, key: &str, tags: &[String]) -> bool {
        let state = self.state.read();
        if state.disabled_keys.contains(key) {
            return false;
        }
        if tags.iter().any(|t| state.disabled_tags.contains(t)) {
            return false;
        }
        if state.enabled_keys.contains(key) {
            return true;
        }
        if tags.iter().any(|t| state.enabled_tags.contains(t)) {
            return true;
        }
        state.default_enabled
    }

    /// Whether this filter has any rules at all. Used to skip filtering
    /// work on the hot listing path.
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.default_enabled
            && state.disabled_keys.is_empty()
            && state.disabled_tags.is_empty()
            && state.enabled_keys.is_empty()
            && state.enabled_tags.is_empty()
    }

    /// Convenience check against a component's own enabled flag plus this
    /// filter. Filtering uses the version-less key so every version of a
    /// disabled name is hidden.
    pub fn allows(&self, component: &crate::component::Component) -> bool {
        if !component.enabled {
            return false;
        }
        let tags: Vec<String> = component.tags.iter().cloned().collect();
        self.is_enabled(&component.base_key(), &tags)
    }
}
