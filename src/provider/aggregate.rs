//! Concurrent fan-out over multiple providers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::component::{Component, ComponentKind};
use crate::error::{Error, Result};
use crate::provider::{pick_default, Provider};
use crate::version::VersionSpec;
use crate::visibility::VisibilityFilter;

struct Entry {
    provider: Arc<dyn Provider>,
    visibility: Option<VisibilityFilter>,
}

/// Fans enumeration and lookup out to child providers concurrently and
/// merges the results.
///
/// By default a failing child degrades gracefully: it contributes zero
/// components, the failure is logged at WARN, and the other children's
/// components are still served. With [`fail_hard`](Self::with_fail_hard)
/// the first child failure is surfaced as
/// [`Error::ProviderUnavailable`] instead.
///
/// Each child can carry its own [`VisibilityFilter`], applied before the
/// merge; the server- and session-level filters are layered on top later.
pub struct AggregateProvider {
    name: String,
    entries: Vec<Entry>,
    fail_hard: bool,
}

impl AggregateProvider {
    /// Creates an empty aggregate.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            fail_hard: false,
        }
    }

    /// Adds a child provider.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.entries.push(Entry {
            provider,
            visibility: None,
        });
        self
    }

    /// Adds a child provider with a provider-level visibility filter.
    pub fn with_filtered_provider(
        mut self,
        provider: Arc<dyn Provider>,
        visibility: VisibilityFilter,
    ) -> Self {
        self.entries.push(Entry {
            provider,
            visibility: Some(visibility),
        });
        self
    }

    /// Surfaces child failures instead of degrading gracefully.
    pub fn with_fail_hard(mut self, fail_hard: bool) -> Self {
        self.fail_hard = fail_hard;
        self
    }

    /// Number of child providers.
    pub fn provider_count(&self) -> usize {
        self.entries.len()
    }

    fn handle_failure<T: Default>(&self, provider: &str, err: Error) -> Result<T> {
        if self.fail_hard {
            return Err(match err {
                e @ Error::ProviderUnavailable { .. } => e,
                other => Error::ProviderUnavailable {
                    provider: provider.to_string(),
                    message: other.to_string(),
                },
            });
        }
        tracing::warn!(provider, error = %err, "provider failed, degrading to empty");
        Ok(T::default())
    }
}

#[async_trait]
impl Provider for AggregateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_components(&self, kind: ComponentKind) -> Result<Vec<Component>> {
        let futures = self
            .entries
            .iter()
            .map(|entry| entry.provider.list_components(kind));
        let results = join_all(futures).await;

        let mut merged = Vec::new();
        for (entry, result) in self.entries.iter().zip(results) {
            let components = match result {
                Ok(components) => components,
                Err(err) => self.handle_failure(entry.provider.name(), err)?,
            };
            match &entry.visibility {
                Some(filter) => merged.extend(components.into_iter().filter(|c| filter.allows(c))),
                None => merged.extend(components),
            }
        }
        Ok(merged)
    }

    async fn get_component(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
    ) -> Result<Option<Component>> {
        let futures = self
            .entries
            .iter()
            .map(|entry| entry.provider.get_component(kind, identifier, spec));
        let results = join_all(futures).await;

        let mut candidates = Vec::new();
        for (entry, result) in self.entries.iter().zip(results) {
            let found: Option<Component> = match result {
                Ok(found) => found,
                Err(err) => self.handle_failure(entry.provider.name(), err)?,
            };
            if let Some(c) = found {
                if entry.visibility.as_ref().is_none_or(|f| f.allows(&c)) {
                    candidates.push(c);
                }
            }
        }
        Ok(pick_default(candidates))
    }

    async fn get_tasks(&self) -> Result<Vec<Component>> {
        let futures = self.entries.iter().map(|entry| entry.provider.get_tasks());
        let results = join_all(futures).await;

        let mut merged = Vec::new();
        for (entry, result) in self.entries.iter().zip(results) {
            let components = match result {
                Ok(components) => components,
                Err(err) => self.handle_failure(entry.provider.name(), err)?,
            };
            merged.extend(components);
        }
        Ok(merged)
    }
}
