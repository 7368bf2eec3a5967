//! Catalog resolution.
//!
//! A [`Catalog`] composes the provider aggregate, the transform chain,
//! and visibility filtering into the per-request resolution pipeline:
//! providers are enumerated, transforms rewrite the result
//! outermost-first, and the session's effective visibility filter is
//! applied last. Nothing is cached between requests; a provider whose
//! contents changed is reflected in the very next call.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::component::{Component, ComponentKind};
use crate::error::Result;
use crate::provider::Provider;
use crate::session::Session;
use crate::transform::{GetNext, ListNext, Transform};
use crate::version::VersionSpec;
use crate::visibility::VisibilityFilter;

/// The resolution pipeline: aggregate + transforms + visibility.
pub struct Catalog {
    source: Arc<dyn Provider>,
    transforms: Vec<Arc<dyn Transform>>,
    server_visibility: Arc<VisibilityFilter>,
}

impl Catalog {
    /// Builds a catalog. Transforms are outermost-first: the first entry
    /// sees requests first and results last.
    pub fn new(
        source: Arc<dyn Provider>,
        transforms: Vec<Arc<dyn Transform>>,
        server_visibility: Arc<VisibilityFilter>,
    ) -> Self {
        Self {
            source,
            transforms,
            server_visibility,
        }
    }

    /// The server-level visibility filter.
    pub fn server_visibility(&self) -> &Arc<VisibilityFilter> {
        &self.server_visibility
    }

    /// Enumerates visible components of one kind for a session.
    ///
    /// Duplicate keys after transforms keep the first occurrence; later
    /// ones are dropped with a warning.
    pub async fn list_components(
        &self,
        kind: ComponentKind,
        session: &Session,
    ) -> Result<Vec<Component>> {
        let raw = ListNext::new(&self.transforms, &*self.source)
            .run(kind)
            .await?;
        let filter = session.effective_visibility(&self.server_visibility);

        let mut by_key: IndexMap<String, Component> = IndexMap::with_capacity(raw.len());
        for component in raw {
            if !filter.allows(&component) {
                continue;
            }
            let key = component.key();
            if by_key.contains_key(&key) {
                tracing::warn!(key, "duplicate component key in catalog, keeping first");
                continue;
            }
            by_key.insert(key, component);
        }
        Ok(by_key.into_values().collect())
    }

    /// Resolves one component by identifier and optional version spec.
    /// Hidden components resolve to `None`, indistinguishable from
    /// absent ones.
    pub async fn get_component(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
        session: &Session,
    ) -> Result<Option<Component>> {
        let found = GetNext::new(&self.transforms, &*self.source)
            .run(kind, identifier, spec)
            .await?;
        let filter = session.effective_visibility(&self.server_visibility);
        Ok(found.filter(|c| filter.allows(c)))
    }

    /// Enumerates task-capable components straight from the providers,
    /// without transforms or visibility. Run once at server startup to
    /// seed task capability metadata.
    pub async fn provider_tasks(&self) -> Result<Vec<Component>> {
        self.source.get_tasks().await
    }

    /// Visible tools for a session.
    pub async fn list_tools(&self, session: &Session) -> Result<Vec<Component>> {
        self.list_components(ComponentKind::Tool, session).await
    }

    /// Visible resources for a session.
    pub async fn list_resources(&self, session: &Session) -> Result<Vec<Component>> {
        self.list_components(ComponentKind::Resource, session).await
    }

    /// Visible resource templates for a session.
    pub async fn list_resource_templates(&self, session: &Session) -> Result<Vec<Component>> {
        self.list_components(ComponentKind::ResourceTemplate, session)
            .await
    }

    /// Visible prompts for a session.
    pub async fn list_prompts(&self, session: &Session) -> Result<Vec<Component>> {
        self.list_components(ComponentKind::Prompt, session).await
    }

    /// Resolves a tool by name.
    pub async fn get_tool(
        &self,
        name: &str,
        spec: Option<&VersionSpec>,
        session: &Session,
    ) -> Result<Option<Component>> {
        self.get_component(ComponentKind::Tool, name, spec, session)
            .await
    }

    /// Resolves a resource by URI.
    pub async fn get_resource(
        &self,
        uri: &str,
        spec: Option<&VersionSpec>,
        session: &Session,
    ) -> Result<Option<Component>> {
        self.get_component(ComponentKind::Resource, uri, spec, session)
            .await
    }

    /// Resolves a prompt by name.
    pub async fn get_prompt(
        &self,
        name: &str,
        spec: Option<&VersionSpec>,
        session: &Session,
    ) -> Result<Option<Component>> {
        self.get_component(ComponentKind::Prompt, name, spec, session)
            .await
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("source", &self.source.name())
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RegistryProvider;
    use crate::transform::Namespace;
    use serde_json::json;

    fn tool(name: &str) -> Component {
        Component::tool(name, |_a, _c| async { Ok(json!(null)) })
    }

    fn catalog_with(registry: RegistryProvider, transforms: Vec<Arc<dyn Transform>>) -> Catalog {
        Catalog::new(
            Arc::new(registry),
            transforms,
            Arc::new(VisibilityFilter::new()),
        )
    }

    #[tokio::test]
    async fn visibility_applies_after_transforms() {
        let registry = RegistryProvider::new("test");
        registry.add(tool("add")).unwrap();
        registry.add(tool("sub")).unwrap();

        let catalog = catalog_with(registry, vec![Arc::new(Namespace::new("math"))]);
        // Filtering addresses the transformed (prefixed) key.
        catalog
            .server_visibility()
            .disable(["tool:math_add"], Vec::<String>::new());

        let session = Session::anonymous();
        let tools = catalog.list_tools(&session).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "math_sub");

        assert!(catalog
            .get_tool("math_add", None, &session)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn session_override_shadows_server_filter() {
        let registry = RegistryProvider::new("test");
        registry.add(tool("add")).unwrap();
        let catalog = catalog_with(registry, Vec::new());

        let session = Session::anonymous();
        session.disable(
            catalog.server_visibility(),
            ["tool:add"],
            Vec::<String>::new(),
        );
        assert!(catalog.list_tools(&session).await.unwrap().is_empty());

        // Another session is unaffected.
        let other = Session::anonymous();
        assert_eq!(catalog.list_tools(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_keys_keep_first() {
        let r1 = RegistryProvider::new("r1");
        r1.add(tool("dup").with_description("first")).unwrap();
        let r2 = RegistryProvider::new("r2");
        r2.add(tool("dup").with_description("second")).unwrap();

        let agg = crate::provider::AggregateProvider::new("agg")
            .with_provider(Arc::new(r1))
            .with_provider(Arc::new(r2));
        let catalog = Catalog::new(Arc::new(agg), Vec::new(), Arc::new(VisibilityFilter::new()));

        let session = Session::anonymous();
        let tools = catalog.list_tools(&session).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn disabled_component_flag_hides_from_default_filter() {
        let registry = RegistryProvider::new("test");
        registry.add(tool("off").with_enabled(false)).unwrap();
        let catalog = catalog_with(registry, Vec::new());
        let session = Session::anonymous();
        assert!(catalog.list_tools(&session).await.unwrap().is_empty());
    }
}
