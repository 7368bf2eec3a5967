//! Component providers.
//!
//! A [`Provider`] is a source of components. Providers are enumerated
//! per-request by the [`AggregateProvider`], so a provider backed by
//! mutable state (a directory, a database) is free to return different
//! components on every call.
//!
//! In-tree providers:
//! - [`RegistryProvider`] — explicit in-memory registration.
//! - [`FsProvider`] — re-scans a directory of TOML manifests on each call.
//! - [`AggregateProvider`] — fans out to child providers concurrently.

mod aggregate;
mod fs;
mod registry;

pub use aggregate::AggregateProvider;
pub use fs::FsProvider;
pub use registry::RegistryProvider;

use async_trait::async_trait;

use crate::component::{Component, ComponentKind};
use crate::error::Result;
use crate::version::VersionSpec;

/// A source of catalog components.
///
/// Only [`list_components`](Provider::list_components) is required. The
/// default [`get_component`](Provider::get_component) is a linear scan
/// with version-default resolution; providers with indexed storage should
/// override it with a direct lookup.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A short label for logs and error messages.
    fn name(&self) -> &str;

    /// Enumerates the current components of one kind.
    async fn list_components(&self, kind: ComponentKind) -> Result<Vec<Component>>;

    /// Looks up a single component by identifier, resolving versions.
    ///
    /// With no spec, or a range spec matching several versions, the
    /// highest matching version wins and an unversioned component loses
    /// to any versioned sibling.
    async fn get_component(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
    ) -> Result<Option<Component>> {
        let candidates = self
            .list_components(kind)
            .await?
            .into_iter()
            .filter(|c| c.identifier() == identifier)
            .filter(|c| spec.is_none_or(|s| s.matches(c.version.as_ref())))
            .collect();
        Ok(pick_default(candidates))
    }

    /// Enumerates components that support background task execution.
    /// Called once at server startup to seed task capability metadata.
    async fn get_tasks(&self) -> Result<Vec<Component>> {
        let mut out = Vec::new();
        for kind in [
            ComponentKind::Tool,
            ComponentKind::Resource,
            ComponentKind::ResourceTemplate,
            ComponentKind::Prompt,
        ] {
            out.extend(
                self.list_components(kind)
                    .await?
                    .into_iter()
                    .filter(|c| c.task_config.supports_tasks()),
            );
        }
        Ok(out)
    }
}

/// Picks the default among components sharing an identifier: highest
/// version wins, and an unversioned component loses to any versioned one.
pub fn pick_default(candidates: Vec<Component>) -> Option<Component> {
    candidates.into_iter().max_by(|a, b| {
        match (&a.version, &b.version) {
            (Some(va), Some(vb)) => va.cmp(vb),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => std::cmp::Ordering::Equal,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, version: Option<&str>) -> Component {
        let c = Component::tool(name, |_a, _c| async { Ok(json!(null)) });
        match version {
            Some(v) => c.with_version(v),
            None => c,
        }
    }

    #[test]
    fn pick_default_prefers_highest_version() {
        let picked = pick_default(vec![
            tool("calc", Some("1.0")),
            tool("calc", Some("2.0")),
            tool("calc", Some("1.5")),
        ])
        .unwrap();
        assert_eq!(picked.version.unwrap().as_str(), "2.0");
    }

    #[test]
    fn pick_default_versioned_beats_unversioned() {
        let picked = pick_default(vec![tool("calc", None), tool("calc", Some("0.1"))]).unwrap();
        assert_eq!(picked.version.unwrap().as_str(), "0.1");
    }

    #[test]
    fn pick_default_empty_is_none() {
        assert!(pick_default(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn default_get_component_resolves_spec() {
        let registry = RegistryProvider::new("test");
        registry.add(tool("calc", Some("1.0"))).unwrap();
        registry.add(tool("calc", Some("2.0"))).unwrap();

        let got = registry
            .get_component(ComponentKind::Tool, "calc", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version.as_ref().unwrap().as_str(), "2.0");

        let spec = VersionSpec::exact("1.0");
        let got = registry
            .get_component(ComponentKind::Tool, "calc", Some(&spec))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version.as_ref().unwrap().as_str(), "1.0");

        let spec = VersionSpec::exact("9.9");
        assert!(registry
            .get_component(ComponentKind::Tool, "calc", Some(&spec))
            .await
            .unwrap()
            .is_none());
    }
}
