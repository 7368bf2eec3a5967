//! # mcp-fabric
//!
//! Catalog resolution and background task execution core for Model
//! Context Protocol (MCP) servers.
//!
//! A server assembles a catalog of components (tools, resources,
//! resource templates, prompts) from multiple [`provider`]s, rewrites it
//! through a middleware-style [`transform`] chain (namespacing, version
//! windows, search collapse, code mode), filters it per session with
//! [`visibility`] rules, and then executes calls either synchronously or
//! as cancellable, pollable background [`tasks`] (SEP-1686) with
//! session-scoped isolation.
//!
//! ## Quick start
//!
//! ```
//! use mcp_fabric::component::Component;
//! use mcp_fabric::provider::RegistryProvider;
//! use mcp_fabric::server::Server;
//! use mcp_fabric::tasks::CallOutcome;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mcp_fabric::Result<()> {
//! let registry = RegistryProvider::new("builtin");
//! registry.add(Component::tool("greet", |args, _cx| async move {
//!     let name = args["name"].as_str().unwrap_or("world");
//!     Ok(json!(format!("Hello, {name}!")))
//! }))?;
//!
//! let server = Server::builder("greeter", "0.1.0")
//!     .provider(Arc::new(registry))
//!     .build();
//! server.start().await?;
//!
//! let session = server.connect();
//! let outcome = server
//!     .call_tool(&session, "greet", json!({"name": "Ada"}), None)
//!     .await?;
//! assert!(matches!(outcome, CallOutcome::Completed(v) if v == json!("Hello, Ada!")));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`component`] — the shared component record, task configuration,
//!   and handler traits.
//! - [`provider`] — component sources: explicit registry, filesystem
//!   manifests, concurrent aggregate.
//! - [`transform`] — catalog rewrites with re-entrant bypass for
//!   synthetic tools.
//! - [`catalog`] — the per-request resolution pipeline.
//! - [`visibility`] / [`session`] — blocklist-wins filtering, per-session
//!   overrides, state, and liveness supervision.
//! - [`tasks`] — the task state machine, pluggable backends, and mode
//!   policy.
//! - [`server`] — the assembled facade.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod component;
pub mod context;
pub mod error;
pub mod provider;
pub mod server;
pub mod session;
pub mod tasks;
pub mod transform;
pub mod version;
pub mod visibility;

pub use catalog::Catalog;
pub use component::{Component, ComponentKind, TaskConfig, TaskMode};
pub use context::RequestContext;
pub use error::{Error, ErrorPayload, Result};
pub use server::{Server, ServerBuilder};
pub use session::{Session, SessionRegistry};
pub use tasks::{CallOutcome, Task, TaskMeta, TaskStatus};
pub use version::{Version, VersionSpec};
pub use visibility::VisibilityFilter;

/// Structured logging setup, enabled by the `logging` feature.
#[cfg(feature = "logging")]
pub mod logging {
    //! Initializes a `tracing` subscriber honoring `RUST_LOG`.

    use tracing_subscriber::EnvFilter;

    /// Installs a global subscriber with env-filter support. Call once at
    /// startup; later calls are no-ops.
    pub fn init() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}
