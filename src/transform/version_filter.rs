//! Version window transform.

use async_trait::async_trait;

use crate::component::{Component, ComponentKind};
use crate::error::Result;
use crate::transform::{GetNext, ListNext, Transform};
use crate::version::VersionSpec;

/// Constrains the catalog to components matching a [`VersionSpec`].
///
/// Listings drop non-matching versions. Lookups with no caller spec use
/// the filter's spec for resolution; lookups with an explicit spec are
/// resolved with the caller's spec and then re-checked against the
/// filter, so a caller cannot reach a version the window excludes.
pub struct VersionFilter {
    spec: VersionSpec,
}

impl VersionFilter {
    /// Creates a filter from a version spec.
    pub fn new(spec: VersionSpec) -> Self {
        Self { spec }
    }

    /// Shorthand for a `min <= v < max` window.
    pub fn range(min: Option<&str>, max: Option<&str>) -> Self {
        Self::new(VersionSpec::range(min, max))
    }
}

#[async_trait]
impl Transform for VersionFilter {
    async fn list(&self, kind: ComponentKind, next: ListNext<'_>) -> Result<Vec<Component>> {
        Ok(next
            .run(kind)
            .await?
            .into_iter()
            .filter(|c| self.spec.matches(c.version.as_ref()))
            .collect())
    }

    async fn get(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
        next: GetNext<'_>,
    ) -> Result<Option<Component>> {
        let effective = spec.unwrap_or(&self.spec);
        let found = next.run(kind, identifier, Some(effective)).await?;
        Ok(found.filter(|c| self.spec.matches(c.version.as_ref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RegistryProvider;
    use serde_json::json;
    use std::sync::Arc;

    fn source() -> RegistryProvider {
        let registry = RegistryProvider::new("test");
        for v in ["1.0", "2.0", "3.0"] {
            registry
                .add(Component::tool("calc", |_a, _c| async { Ok(json!(null)) }).with_version(v))
                .unwrap();
        }
        registry
    }

    fn window() -> Vec<Arc<dyn Transform>> {
        vec![Arc::new(VersionFilter::range(Some("1.0"), Some("3.0")))]
    }

    #[tokio::test]
    async fn list_drops_out_of_window_versions() {
        let source = source();
        let chain = window();
        let tools = ListNext::new(&chain, &source)
            .run(ComponentKind::Tool)
            .await
            .unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools
            .iter()
            .all(|c| c.version.as_ref().unwrap().as_str() != "3.0"));
    }

    #[tokio::test]
    async fn default_lookup_resolves_within_window() {
        let source = source();
        let chain = window();
        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "calc", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version.unwrap().as_str(), "2.0");
    }

    #[tokio::test]
    async fn explicit_spec_cannot_escape_the_window() {
        let source = source();
        let chain = window();
        let spec = VersionSpec::exact("3.0");
        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "calc", Some(&spec))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn explicit_spec_within_window_works() {
        let source = source();
        let chain = window();
        let spec = VersionSpec::exact("1.0");
        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "calc", Some(&spec))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version.unwrap().as_str(), "1.0");
    }
}
