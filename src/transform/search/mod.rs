//! Search collapse transform.
//!
//! [`SearchTransform`] hides a large tool catalog behind a synthetic
//! pair: a search tool and a call-tool proxy. Listings return the pair
//! plus any pinned always-visible tools; real tools stay callable by
//! exact name, and the proxy dispatches to them after discovery. The
//! search tool re-enters the catalog with its own transform bypassed
//! (see [`crate::transform::bypass`]) so it ranks the real,
//! fully-transformed tool set and never returns itself.
//!
//! Ranking is pluggable via [`SearchStrategy`]; in-tree strategies are
//! [`RegexSearch`] and [`Bm25Search`].

mod bm25;
mod regex;

pub use bm25::Bm25Search;
pub use regex::RegexSearch;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::component::{Component, ComponentKind};
use crate::error::{Error, Result};
use crate::transform::{bypass, GetNext, ListNext, Transform};
use crate::version::VersionSpec;

/// Default number of results returned by the search tool.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// A ranking strategy over components.
///
/// `search` receives the candidate set for every call; strategies that
/// build an index (BM25) cache it internally and rebuild only when the
/// candidate set changes.
pub trait SearchStrategy: Send + Sync {
    /// Strategy label for logs and the search tool description.
    fn name(&self) -> &str;

    /// Returns up to `limit` candidates ranked best-first.
    fn search(
        &self,
        query: &str,
        candidates: &[Component],
        limit: usize,
    ) -> Result<Vec<Component>>;
}

/// Collapses the tool catalog behind a synthetic search/call pair.
///
/// # Examples
///
/// ```
/// use mcp_fabric::transform::search::{RegexSearch, SearchTransform};
///
/// let search = SearchTransform::new(RegexSearch::new())
///     .with_tool_name("find_tools")
///     .with_always_visible(["help"]);
/// ```
pub struct SearchTransform {
    id: u64,
    strategy: Arc<dyn SearchStrategy>,
    tool_name: String,
    call_tool_name: String,
    default_limit: usize,
    always_visible: BTreeSet<String>,
}

impl SearchTransform {
    /// Creates a search collapse with the given strategy.
    pub fn new(strategy: impl SearchStrategy + 'static) -> Self {
        Self {
            id: bypass::next_instance_id(),
            strategy: Arc::new(strategy),
            tool_name: "search_tools".to_string(),
            call_tool_name: "call_tool".to_string(),
            default_limit: DEFAULT_SEARCH_LIMIT,
            always_visible: BTreeSet::new(),
        }
    }

    /// Renames the synthetic search tool.
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    /// Renames the synthetic call-tool proxy.
    pub fn with_call_tool_name(mut self, name: impl Into<String>) -> Self {
        self.call_tool_name = name.into();
        self
    }

    /// Sets the default result limit.
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Pins tools that stay listed alongside the search tool.
    pub fn with_always_visible<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.always_visible.extend(names.into_iter().map(Into::into));
        self
    }

    fn search_tool(&self) -> Component {
        let id = self.id;
        let strategy = Arc::clone(&self.strategy);
        let own_name = self.tool_name.clone();
        let default_limit = self.default_limit;

        Component::tool(self.tool_name.clone(), move |args, cx| {
            let strategy = Arc::clone(&strategy);
            let own_name = own_name.clone();
            async move {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Validation {
                        component: format!("tool:{own_name}"),
                        message: "missing required string argument `query`".to_string(),
                    })?
                    .to_string();
                let limit = args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map_or(default_limit, |n| n as usize);

                let catalog = Arc::clone(cx.catalog()?);
                let session = Arc::clone(cx.session());
                let candidates = bypass::with_bypass(&[id], async move {
                    catalog.list_components(ComponentKind::Tool, &session).await
                })
                .await?;
                // Guard against ranking the entry point itself.
                let candidates: Vec<Component> = candidates
                    .into_iter()
                    .filter(|c| c.name != own_name)
                    .collect();

                let matches = strategy.search(&query, &candidates, limit)?;
                Ok(json!({
                    "tools": matches.iter().map(Component::to_listing).collect::<Vec<_>>(),
                }))
            }
        })
        .with_description(format!(
            "Search the available tools by {} relevance. Matching tools can \
             then be called by name.",
            self.strategy.name()
        ))
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What the tool should do"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results",
                    "default": self.default_limit
                }
            },
            "required": ["query"]
        }))
    }

    fn call_tool(&self) -> Component {
        let search_name = self.tool_name.clone();
        let own_name = self.call_tool_name.clone();

        Component::tool(self.call_tool_name.clone(), move |args, cx| {
            let search_name = search_name.clone();
            let own_name = own_name.clone();
            async move {
                let name = args
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Validation {
                        component: format!("tool:{own_name}"),
                        message: "missing required string argument `name`".to_string(),
                    })?
                    .to_string();
                if name == own_name || name == search_name {
                    return Err(Error::Validation {
                        component: format!("tool:{own_name}"),
                        message: format!("`{name}` is a synthetic search tool and cannot be proxied"),
                    });
                }
                let arguments = args
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let catalog = Arc::clone(cx.catalog()?);
                let session = Arc::clone(cx.session());
                let tool = catalog
                    .get_component(ComponentKind::Tool, &name, None, &session)
                    .await?
                    .ok_or_else(|| Error::NotFound {
                        key: format!("tool:{name}"),
                    })?;
                tool.validate_arguments(&arguments)?;
                tool.invoke(arguments, cx).await
            }
        })
        .with_description(
            "Call a tool by name with the given arguments. Use this to \
             execute tools discovered via the search tool.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The name of the tool to call"
                },
                "arguments": {
                    "type": "object",
                    "description": "Arguments to pass to the tool"
                }
            },
            "required": ["name"]
        }))
    }
}

#[async_trait]
impl Transform for SearchTransform {
    fn instance_id(&self) -> Option<u64> {
        Some(self.id)
    }

    async fn list(&self, kind: ComponentKind, next: ListNext<'_>) -> Result<Vec<Component>> {
        if kind != ComponentKind::Tool {
            return next.run(kind).await;
        }
        let real = next.run(kind).await?;
        let mut out = vec![self.search_tool(), self.call_tool()];
        out.extend(
            real.into_iter()
                .filter(|c| self.always_visible.contains(&c.name)),
        );
        Ok(out)
    }

    async fn get(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
        next: GetNext<'_>,
    ) -> Result<Option<Component>> {
        if kind == ComponentKind::Tool && identifier == self.tool_name {
            return Ok(Some(self.search_tool()));
        }
        if kind == ComponentKind::Tool && identifier == self.call_tool_name {
            return Ok(Some(self.call_tool()));
        }
        // Collapsed tools stay callable by exact name.
        next.run(kind, identifier, spec).await
    }
}

/// Splits text into lowercase alphanumeric terms, dropping one-character
/// fragments. Shared by the BM25 index and its query side.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RegistryProvider;

    fn source(names: &[&str]) -> RegistryProvider {
        let registry = RegistryProvider::new("test");
        for name in names {
            registry
                .add(Component::tool(*name, |_a, _c| async { Ok(json!(null)) }))
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn listing_collapses_to_search_plus_pinned() {
        let source = source(&["a", "b", "c", "help"]);
        let chain: Vec<Arc<dyn Transform>> = vec![Arc::new(
            SearchTransform::new(RegexSearch::new()).with_always_visible(["help"]),
        )];
        let tools = ListNext::new(&chain, &source)
            .run(ComponentKind::Tool)
            .await
            .unwrap();
        let names: Vec<&str> = tools.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["search_tools", "call_tool", "help"]);
    }

    #[tokio::test]
    async fn call_tool_proxy_refuses_synthetic_names() {
        let transform = SearchTransform::new(RegexSearch::new());
        let proxy = transform.call_tool();
        let err = proxy
            .invoke(
                json!({"name": "search_tools"}),
                crate::context::RequestContext::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn collapsed_tools_stay_callable() {
        let source = source(&["hidden"]);
        let chain: Vec<Arc<dyn Transform>> =
            vec![Arc::new(SearchTransform::new(RegexSearch::new()))];
        let got = GetNext::new(&chain, &source)
            .run(ComponentKind::Tool, "hidden", None)
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn other_kinds_pass_through() {
        let registry = RegistryProvider::new("test");
        registry
            .add(Component::prompt("p", |_a, _c| async { Ok(json!("x")) }))
            .unwrap();
        let chain: Vec<Arc<dyn Transform>> =
            vec![Arc::new(SearchTransform::new(RegexSearch::new()))];
        let prompts = ListNext::new(&chain, &registry)
            .run(ComponentKind::Prompt)
            .await
            .unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].name, "p");
    }

    #[test]
    fn tokenize_drops_short_fragments() {
        assert_eq!(
            tokenize("Add two NUMBERS, a + b!"),
            vec!["add", "two", "numbers"]
        );
    }
}
