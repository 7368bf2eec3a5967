//! In-memory provider with explicit registration.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::component::{Component, ComponentKind};
use crate::error::{Error, Result};
use crate::provider::Provider;

/// A provider populated by explicit `add` calls.
///
/// Registration validates the component (task modes require an async
/// handler) and rejects duplicate keys. Components can be added and
/// removed at any time; listings reflect the current contents.
///
/// # Examples
///
/// ```
/// use mcp_fabric::component::Component;
/// use mcp_fabric::provider::RegistryProvider;
/// use serde_json::json;
///
/// let registry = RegistryProvider::new("builtin");
/// registry
///     .add(Component::tool("echo", |args, _cx| async move { Ok(args) }))
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct RegistryProvider {
    name: String,
    components: DashMap<String, Component>,
}

impl RegistryProvider {
    /// Creates an empty registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: DashMap::new(),
        }
    }

    /// Registers a component. Fails on invalid task configuration or a
    /// duplicate key.
    pub fn add(&self, component: Component) -> Result<()> {
        component.validate_registration()?;
        let key = component.key();
        match self.components.entry(key.clone()) {
            dashmap::Entry::Occupied(_) => Err(Error::Registration {
                component: key,
                message: "a component with this key is already registered".to_string(),
            }),
            dashmap::Entry::Vacant(slot) => {
                slot.insert(component);
                Ok(())
            }
        }
    }

    /// Replaces a component, inserting if absent.
    pub fn replace(&self, component: Component) -> Result<()> {
        component.validate_registration()?;
        self.components.insert(component.key(), component);
        Ok(())
    }

    /// Removes a component by full key. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.components.remove(key).is_some()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[async_trait]
impl Provider for RegistryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_components(&self, kind: ComponentKind) -> Result<Vec<Component>> {
        Ok(self
            .components
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
