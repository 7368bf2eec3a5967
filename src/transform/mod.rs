//! Catalog transforms.
//!
//! A [`Transform`] sits between the catalog surface and the provider
//! aggregate, rewriting listings and lookups middleware-style: each
//! operation receives a continuation ([`ListNext`] / [`GetNext`]) that
//! invokes the rest of the chain and bottoms out at the aggregate. The
//! registration order is outermost-first: the first transform added sees
//! requests first and results last.
//!
//! Built-ins:
//! - [`Namespace`] — prefixes names and URIs, reverses the mapping on
//!   lookup.
//! - [`VersionFilter`] — constrains the catalog to a version window.
//! - [`SearchTransform`] — collapses a large catalog behind a synthetic
//!   search tool ([`search`]).
//! - [`CodeMode`] — collapses tools behind search + pipeline-execution
//!   entry points ([`code_mode`]).

pub mod bypass;
pub mod code_mode;
pub mod namespace;
pub mod search;
pub mod version_filter;

pub use code_mode::CodeMode;
pub use namespace::Namespace;
pub use search::SearchTransform;
pub use version_filter::VersionFilter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::component::{Component, ComponentKind};
use crate::error::Result;
use crate::provider::Provider;
use crate::version::VersionSpec;

/// A catalog rewrite stage.
///
/// Both methods default to pass-through. Implementations call
/// `next.run(..)` exactly once to delegate downward (or skip it to
/// synthesize a result without consulting the sources).
#[async_trait]
pub trait Transform: Send + Sync {
    /// Unique instance ID for re-entrant bypass, if this transform
    /// supports being skipped (see [`bypass`]).
    fn instance_id(&self) -> Option<u64> {
        None
    }

    /// Rewrites an enumeration of one component kind.
    async fn list(&self, kind: ComponentKind, next: ListNext<'_>) -> Result<Vec<Component>> {
        next.run(kind).await
    }

    /// Rewrites a single-component lookup.
    async fn get(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
        next: GetNext<'_>,
    ) -> Result<Option<Component>> {
        next.run(kind, identifier, spec).await
    }
}

/// Continuation for [`Transform::list`]: the rest of the chain plus the
/// provider aggregate at the bottom.
pub struct ListNext<'a> {
    chain: &'a [Arc<dyn Transform>],
    source: &'a dyn Provider,
}

impl<'a> ListNext<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Transform>], source: &'a dyn Provider) -> Self {
        Self { chain, source }
    }

    /// Runs the remaining chain. Transforms whose instance ID is in the
    /// current bypass scope are skipped.
    pub async fn run(self, kind: ComponentKind) -> Result<Vec<Component>> {
        let mut chain = self.chain;
        while let Some((head, rest)) = chain.split_first() {
            if head.instance_id().is_some_and(bypass::is_bypassed) {
                chain = rest;
                continue;
            }
            return head.list(kind, ListNext::new(rest, self.source)).await;
        }
        self.source.list_components(kind).await
    }
}

/// Continuation for [`Transform::get`].
pub struct GetNext<'a> {
    chain: &'a [Arc<dyn Transform>],
    source: &'a dyn Provider,
}

impl<'a> GetNext<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Transform>], source: &'a dyn Provider) -> Self {
        Self { chain, source }
    }

    /// Runs the remaining chain. Transforms whose instance ID is in the
    /// current bypass scope are skipped.
    pub async fn run(
        self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
    ) -> Result<Option<Component>> {
        let mut chain = self.chain;
        while let Some((head, rest)) = chain.split_first() {
            if head.instance_id().is_some_and(bypass::is_bypassed) {
                chain = rest;
                continue;
            }
            return head
                .get(kind, identifier, spec, GetNext::new(rest, self.source))
                .await;
        }
        self.source.get_component(kind, identifier, spec).await
    }
}
