//! Namespace transform: prefixes component names and URIs.

use async_trait::async_trait;
use regex::Regex;

use crate::component::{Component, ComponentKind};
use crate::error::{Error, Result};
use crate::transform::{GetNext, ListNext, Transform};
use crate::version::VersionSpec;

/// Prefixes tool and prompt names with `{prefix}_` and resource URIs with
/// a path segment after the scheme, and reverses the mapping on lookup.
///
/// Resource *names* are left untouched; only the URI (the identifier
/// clients address resources by) is rewritten:
/// `data://records` → `data://{prefix}/records`.
///
/// # Examples
///
/// ```
/// use mcp_fabric::transform::Namespace;
///
/// let ns = Namespace::new("billing");
/// assert_eq!(ns.prefix(), "billing");
/// ```
pub struct Namespace {
    prefix: String,
    uri_scheme: Regex,
}

impl Namespace {
    /// Creates a namespace with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            // scheme://rest
            uri_scheme: Regex::new(r"^([a-zA-Z][a-zA-Z0-9+.\-]*://)(.*)$")
                .unwrap_or_else(|_| unreachable!("static pattern")),
        }
    }

    /// The namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn add_name_prefix(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn strip_name_prefix<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(&self.prefix)?.strip_prefix('_')
    }

    fn add_uri_prefix(&self, uri: &str) -> Result<String> {
        match self.uri_scheme.captures(uri) {
            Some(caps) => Ok(format!("{}{}/{}", &caps[1], self.prefix, &caps[2])),
            None => Err(Error::internal(format!(
                "cannot namespace URI without a scheme: {uri}"
            ))),
        }
    }

    fn strip_uri_prefix(&self, uri: &str) -> Option<String> {
        let caps = self.uri_scheme.captures(uri)?;
        let rest = caps[2].strip_prefix(&self.prefix)?.strip_prefix('/')?;
        Some(format!("{}{}", &caps[1], rest))
    }

    fn apply(&self, component: Component) -> Result<Component> {
        match component.kind {
            ComponentKind::Tool | ComponentKind::Prompt => {
                let name = self.add_name_prefix(&component.name);
                Ok(component.renamed(name))
            }
            ComponentKind::Resource | ComponentKind::ResourceTemplate => {
                let mut component = component;
                if let Some(uri) = &component.uri {
                    component.uri = Some(self.add_uri_prefix(uri)?);
                }
                Ok(component)
            }
        }
    }
}

#[async_trait]
impl Transform for Namespace {
    async fn list(&self, kind: ComponentKind, next: ListNext<'_>) -> Result<Vec<Component>> {
        next.run(kind)
            .await?
            .into_iter()
            .map(|c| self.apply(c))
            .collect()
    }

    async fn get(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
        next: GetNext<'_>,
    ) -> Result<Option<Component>> {
        let inner = match kind {
            ComponentKind::Tool | ComponentKind::Prompt => {
                match self.strip_name_prefix(identifier) {
                    Some(inner) => inner.to_string(),
                    None => return Ok(None),
                }
            }
            ComponentKind::Resource | ComponentKind::ResourceTemplate => {
                match self.strip_uri_prefix(identifier) {
                    Some(inner) => inner,
                    None => return Ok(None),
                }
            }
        };
        match next.run(kind, &inner, spec).await? {
            Some(component) => Ok(Some(self.apply(component)?)),
            None => Ok(None),
        }
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
        registry
            .add(Component::tool("add", |_a, _c| async { Ok(json!(3)) }))
            .unwrap();
        registry
            .add(Component::resource("records", "data://records", |_a, _c| {
                async { Ok(json!("rows")) }
            }))
            .unwrap();
        registry
    }

    fn chain(ns: Namespace) -> Vec<Arc<dyn Transform>> {
        vec![Arc::new(ns)]
    }

    #[tokio::test]
    async fn tool_names_are_prefixed() {
        let source = source();
        let chain = chain(Namespace::new("math"));
        let tools = ListNext::new(&chain, &source)
            .run(ComponentKind::Tool)
            .await
            .unwrap();
        assert_eq!(tools[0].name, "math_add");
    }

    #[tokio::test]
    async fn resource_uris_are_prefixed_names_untouched() {
        let source = source();
        let chain = chain(Namespace::new("math"));
        let resources = ListNext::new(&chain, &source)
            .run(ComponentKind::Resource)
            .await
            .unwrap();
        assert_eq!(resources[0].uri.as_deref(), Some("data://math/records"));
        assert_eq!(resources[0].name, "records");
    }

    #[tokio::test]
    async fn get_reverses_the_mapping() {
        let source = source();
        let chain = chain(Namespace::new("math"));

        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "math_add", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.name, "math_add");

        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Resource, "data://math/records", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.uri.as_deref(), Some("data://math/records"));
    }

    #[tokio::test]
    async fn unprefixed_lookup_misses() {
        let source = source();
        let chain = chain(Namespace::new("math"));
        assert!(GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "add", None)
            .await
            .unwrap()
            .is_none());
        assert!(GetNext::new(&chain, &source)
            .run(ComponentKind::Resource, "data://records", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn namespaces_stack() {
        let source = source();
        let chain: Vec<Arc<dyn Transform>> =
            vec![Arc::new(Namespace::new("outer")), Arc::new(Namespace::new("inner"))];
        let tools = ListNext::new(&chain, &source)
            .run(ComponentKind::Tool)
            .await
            .unwrap();
        assert_eq!(tools[0].name, "outer_inner_add");

        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "outer_inner_add", None)
            .await
            .unwrap();
        assert!(got.is_some());
    }
}
