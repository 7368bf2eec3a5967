//! Server facade: wires providers, transforms, visibility, sessions, and
//! the task subsystem into one call surface.
//!
//! # Examples
//!
//! ```
//! use mcp_fabric::component::Component;
//! use mcp_fabric::provider::RegistryProvider;
//! use mcp_fabric::server::Server;
//! use mcp_fabric::tasks::CallOutcome;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> mcp_fabric::Result<()> {
//! let registry = RegistryProvider::new("builtin");
//! registry.add(Component::tool("add", |args, _cx| async move {
//!     let a = args["a"].as_i64().unwrap_or(0);
//!     let b = args["b"].as_i64().unwrap_or(0);
//!     Ok(json!(a + b))
//! }))?;
//!
//! let server = Server::builder("calc", "1.0.0")
//!     .provider(Arc::new(registry))
//!     .build();
//! server.start().await?;
//!
//! let session = server.connect();
//! match server.call_tool(&session, "add", json!({"a": 2, "b": 3}), None).await? {
//!     CallOutcome::Completed(value) => assert_eq!(value, json!(5)),
//!     CallOutcome::Task(_) => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use crate::catalog::Catalog;
use crate::component::Component;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::provider::{AggregateProvider, Provider};
use crate::session::{Session, SessionRegistry};
use crate::tasks::{
    CallOutcome, InMemoryTaskBackend, Task, TaskBackend, TaskManager, TaskMeta, TaskOptions,
    TaskStatus,
};
use crate::transform::Transform;
use crate::version::VersionSpec;
use crate::visibility::VisibilityFilter;

/// Builder for [`Server`].
pub struct ServerBuilder {
    name: String,
    version: String,
    aggregate: AggregateProvider,
    transforms: Vec<Arc<dyn Transform>>,
    backend: Option<Arc<dyn TaskBackend>>,
    task_options: TaskOptions,
    fail_hard_providers: bool,
}

impl ServerBuilder {
    fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            aggregate: AggregateProvider::new(format!("{name}-providers")),
            name,
            version: version.into(),
            transforms: Vec::new(),
            backend: None,
            task_options: TaskOptions::default(),
            fail_hard_providers: false,
        }
    }

    /// Adds a component provider.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.aggregate = self.aggregate.with_provider(provider);
        self
    }

    /// Adds a provider behind its own visibility filter.
    pub fn filtered_provider(
        mut self,
        provider: Arc<dyn Provider>,
        visibility: VisibilityFilter,
    ) -> Self {
        self.aggregate = self.aggregate.with_filtered_provider(provider, visibility);
        self
    }

    /// Appends a transform. The first transform added is outermost.
    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Swaps the task backend (defaults to [`InMemoryTaskBackend`]).
    pub fn task_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the server-global result retention window, overriding
    /// client-requested TTLs.
    pub fn server_ttl(mut self, ttl_ms: u64) -> Self {
        self.task_options.server_ttl = Some(ttl_ms);
        self
    }

    /// Caps concurrently active tasks per session.
    pub fn max_tasks_per_session(mut self, max: usize) -> Self {
        self.task_options.max_tasks_per_session = Some(max);
        self
    }

    /// Surfaces provider failures instead of degrading gracefully.
    pub fn fail_hard_providers(mut self, fail_hard: bool) -> Self {
        self.fail_hard_providers = fail_hard;
        self
    }

    /// Builds the server.
    pub fn build(self) -> Server {
        let aggregate = self.aggregate.with_fail_hard(self.fail_hard_providers);
        let catalog = Arc::new(Catalog::new(
            Arc::new(aggregate),
            self.transforms,
            Arc::new(VisibilityFilter::new()),
        ));
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryTaskBackend::new()));
        Server {
            name: self.name,
            version: self.version,
            manager: TaskManager::new(backend, self.task_options),
            sessions: Arc::new(SessionRegistry::new()),
            catalog,
        }
    }
}

/// The assembled server.
pub struct Server {
    name: String,
    version: String,
    catalog: Arc<Catalog>,
    sessions: Arc<SessionRegistry>,
    manager: TaskManager,
}

impl Server {
    /// Starts a builder.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(name, version)
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The resolution pipeline.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Registers every task-capable component the providers currently
    /// expose with the task backend. Components added later are
    /// registered lazily on their first task-augmented call.
    pub async fn start(&self) -> Result<()> {
        let tasks = self.catalog.provider_tasks().await?;
        let count = tasks.len();
        for component in &tasks {
            self.manager.register_component(
                component,
                Arc::clone(&self.catalog),
                Arc::clone(&self.sessions),
            );
        }
        tracing::info!(
            server = self.name,
            version = self.version,
            task_components = count,
            "server started"
        );
        Ok(())
    }

    /// Opens a session.
    pub fn connect(&self) -> Arc<Session> {
        let session = self.sessions.open();
        tracing::debug!(session_id = session.id(), "session connected");
        session
    }

    /// Closes a session: cancels its liveness token (unblocking any
    /// supervised call) and clears its state.
    pub fn disconnect(&self, session_id: &str) -> bool {
        self.sessions.disconnect(session_id)
    }

    fn context(&self, session: &Arc<Session>) -> RequestContext {
        RequestContext::new(Arc::clone(session), Arc::clone(&self.catalog))
    }

    /// Visible tools for a session.
    pub async fn list_tools(&self, session: &Session) -> Result<Vec<Component>> {
        self.catalog.list_tools(session).await
    }

    /// Visible resources for a session.
    pub async fn list_resources(&self, session: &Session) -> Result<Vec<Component>> {
        self.catalog.list_resources(session).await
    }

    /// Visible resource templates for a session.
    pub async fn list_resource_templates(&self, session: &Session) -> Result<Vec<Component>> {
        self.catalog.list_resource_templates(session).await
    }

    /// Visible prompts for a session.
    pub async fn list_prompts(&self, session: &Session) -> Result<Vec<Component>> {
        self.catalog.list_prompts(session).await
    }

    /// Calls a tool, synchronously or as a background task depending on
    /// the component's task mode and the presence of `meta`. The call is
    /// supervised against session liveness: if the session dies
    /// mid-flight the caller gets [`Error::SessionClosed`] instead of a
    /// hang.
    pub async fn call_tool(
        &self,
        session: &Arc<Session>,
        name: &str,
        args: Value,
        meta: Option<TaskMeta>,
    ) -> Result<CallOutcome> {
        self.call_tool_versioned(session, name, None, args, meta)
            .await
    }

    /// [`call_tool`](Self::call_tool) with an explicit version spec.
    pub async fn call_tool_versioned(
        &self,
        session: &Arc<Session>,
        name: &str,
        spec: Option<&VersionSpec>,
        args: Value,
        meta: Option<TaskMeta>,
    ) -> Result<CallOutcome> {
        let component = self
            .catalog
            .get_tool(name, spec, session)
            .await?
            .ok_or_else(|| Error::NotFound {
                key: format!("tool:{name}"),
            })?;
        component.validate_arguments(&args)?;
        if meta.is_some() && component.task_config.supports_tasks() {
            // Covers components added after start().
            self.manager.register_component(
                &component,
                Arc::clone(&self.catalog),
                Arc::clone(&self.sessions),
            );
        }
        let cx = self.context(session);
        session
            .supervise(self.manager.execute(&component, args, &cx, meta))
            .await?
    }

    /// Reads a resource by URI. Falls back to resource templates when no
    /// static resource matches, extracting the template parameters from
    /// the URI.
    pub async fn read_resource(&self, session: &Arc<Session>, uri: &str) -> Result<Value> {
        if let Some(resource) = self.catalog.get_resource(uri, None, session).await? {
            let cx = self.context(session);
            return session.supervise(resource.invoke(json!({}), cx)).await?;
        }
        for template in self.catalog.list_resource_templates(session).await? {
            let Some(pattern) = template.uri.as_deref() else {
                continue;
            };
            if let Some(params) = match_uri_template(pattern, uri) {
                let cx = self.context(session);
                return session.supervise(template.invoke(params, cx)).await?;
            }
        }
        Err(Error::NotFound {
            key: format!("resource:{uri}"),
        })
    }

    /// Renders a prompt.
    pub async fn get_prompt(
        &self,
        session: &Arc<Session>,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        let prompt = self
            .catalog
            .get_prompt(name, None, session)
            .await?
            .ok_or_else(|| Error::NotFound {
                key: format!("prompt:{name}"),
            })?;
        prompt.validate_arguments(&args)?;
        let cx = self.context(session);
        session.supervise(prompt.invoke(args, cx)).await?
    }

    /// Status of a session's task.
    pub async fn task_status(&self, session: &Session, task_id: &str) -> Result<Task> {
        self.manager.status(session, task_id).await
    }

    /// Best-effort cancellation of a session's task.
    pub async fn cancel_task(&self, session: &Session, task_id: &str) -> Result<Task> {
        self.manager.cancel(session, task_id).await
    }

    /// Blocks until the task is terminal or `timeout` elapses. The
    /// timeout never cancels the task.
    pub async fn wait_task(
        &self,
        session: &Session,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Task> {
        self.manager.wait(session, task_id, timeout).await
    }

    /// Like [`wait_task`](Self::wait_task), but also returns as soon as
    /// the task reaches the given intermediate state.
    pub async fn wait_task_until(
        &self,
        session: &Session,
        task_id: &str,
        timeout: Option<Duration>,
        until: Option<TaskStatus>,
    ) -> Result<Task> {
        self.manager.wait_until(session, task_id, timeout, until).await
    }

    /// Blocks until terminal and returns the result payload.
    pub async fn task_result(
        &self,
        session: &Session,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.manager.result(session, task_id, timeout).await
    }

    /// Live tasks for a session.
    pub async fn list_tasks(&self, session: &Session) -> Result<Vec<Task>> {
        self.manager.list(session).await
    }

    /// Hides components server-wide by key and tag.
    pub fn disable_components<K, T>(&self, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.catalog.server_visibility().disable(keys, tags);
    }

    /// Re-enables components server-wide by key and tag.
    pub fn enable_components<K, T>(&self, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.catalog.server_visibility().enable(keys, tags);
    }

    /// Clears all server-wide visibility rules.
    pub fn reset_visibility(&self) {
        self.catalog.server_visibility().reset();
    }

    /// Hides components for one session only (copy-on-write over the
    /// server filter).
    pub fn disable_for_session<K, T>(&self, session: &Session, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        session.disable(self.catalog.server_visibility(), keys, tags);
    }

    /// Re-enables components for one session only.
    pub fn enable_for_session<K, T>(&self, session: &Session, keys: K, tags: T)
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        session.enable(self.catalog.server_visibility(), keys, tags);
    }
}

/// Extracts `{param}` values from a URI matching a template. Parameters
/// match single path segments.
fn match_uri_template(template: &str, uri: &str) -> Option<Value> {
    let mut pattern = String::from("^");
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..start]));
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        let name = &after[..end];
        names.push(name.to_string());
        pattern.push_str("([^/]+)");
        rest = &after[end + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(uri)?;
    let mut params = serde_json::Map::new();
    for (i, name) in names.iter().enumerate() {
        params.insert(name.clone(), Value::String(caps.get(i + 1)?.as_str().to_string()));
    }
    Some(Value::Object(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RegistryProvider;

    #[test]
    fn uri_template_matching() {
        let params = match_uri_template("data://users/{id}/posts/{post}", "data://users/7/posts/42")
            .unwrap();
        assert_eq!(params, json!({"id": "7", "post": "42"}));

        assert!(match_uri_template("data://users/{id}", "data://teams/7").is_none());
        // Parameters never span segments.
        assert!(match_uri_template("data://users/{id}", "data://users/7/extra").is_none());
    }

    #[tokio::test]
    async fn call_unknown_tool_is_not_found() {
        let server = Server::builder("t", "0.0.0")
            .provider(Arc::new(RegistryProvider::new("empty")))
            .build();
        let session = server.connect();
        let err = server
            .call_tool(&session, "missing", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(err.error_code(), -32602);
    }

    #[tokio::test]
    async fn validation_happens_before_the_handler() {
        let registry = RegistryProvider::new("r");
        registry
            .add(
                Component::tool("strict", |_a, _c| async {
                    panic!("handler must not run")
                })
                .with_parameters(json!({"required": ["needed"]})),
            )
            .unwrap();
        let server = Server::builder("t", "0.0.0").provider(Arc::new(registry)).build();
        let session = server.connect();
        let err = server
            .call_tool(&session, "strict", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn template_fallback_extracts_params() {
        let registry = RegistryProvider::new("r");
        registry
            .add(Component::resource_template(
                "user",
                "data://users/{id}",
                |args, _cx| async move { Ok(json!(format!("user-{}", args["id"].as_str().unwrap_or("?")))) },
            ))
            .unwrap();
        let server = Server::builder("t", "0.0.0").provider(Arc::new(registry)).build();
        let session = server.connect();
        let body = server.read_resource(&session, "data://users/7").await.unwrap();
        assert_eq!(body, json!("user-7"));
    }
}
