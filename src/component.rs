//! Component data model: tools, resources, resource templates, and prompts.
//!
//! A [`Component`] is the unit of the catalog. All four kinds share one
//! record type distinguished by [`ComponentKind`]; kind-specific behavior
//! lives in the attached [`Handler`]. Components are cheap to clone
//! (handlers are shared behind `Arc`) so providers can hand out copies on
//! every listing.
//!
//! # Keys
//!
//! A component's key is `kind:identifier[@version]`, e.g. `tool:add`,
//! `tool:calculate@2.0`, `resource:file:///data.txt`. The identifier is the
//! name for tools and prompts and the URI for resources and templates. Keys
//! must be unique within one resolved catalog snapshot.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::version::Version;

/// Default suggested poll interval for task handles, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default server-side result retention window, in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// The four component kinds exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// A callable tool.
    Tool,
    /// A readable resource.
    Resource,
    /// A parameterized resource template.
    ResourceTemplate,
    /// A renderable prompt.
    Prompt,
}

impl ComponentKind {
    /// Key prefix for this kind (`tool`, `resource`, `template`, `prompt`).
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::ResourceTemplate => "template",
            Self::Prompt => "prompt",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}

/// Background task execution modes (SEP-1686 `taskSupport`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// The component cannot be backgrounded. Task metadata on a call is a
    /// policy violation.
    Forbidden,
    /// The component supports both synchronous and task execution.
    Optional,
    /// The component must be backgrounded. A call without task metadata is
    /// a policy violation.
    Required,
}

/// Task execution configuration attached to a component.
///
/// # Examples
///
/// ```
/// use mcp_fabric::component::{TaskConfig, TaskMode};
///
/// let cfg = TaskConfig::from_bool(true);
/// assert_eq!(cfg.mode, TaskMode::Optional);
/// assert!(cfg.supports_tasks());
/// assert!(!TaskConfig::default().supports_tasks());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// How the component handles task-augmented requests.
    pub mode: TaskMode,
    /// Suggested client poll interval for task handles.
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            mode: TaskMode::Forbidden,
            poll_interval: default_poll_interval(),
        }
    }
}

impl TaskConfig {
    /// Creates a config with the given mode and the default poll interval.
    pub fn new(mode: TaskMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// `true` → `Optional`, `false` → `Forbidden`.
    pub fn from_bool(value: bool) -> Self {
        Self::new(if value {
            TaskMode::Optional
        } else {
            TaskMode::Forbidden
        })
    }

    /// Whether the component may be executed as a background task.
    pub fn supports_tasks(&self) -> bool {
        self.mode != TaskMode::Forbidden
    }

    /// Sets the suggested poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Whether a handler is natively asynchronous or wraps blocking code.
///
/// Task modes `Optional`/`Required` are only valid for [`Async`] handlers;
/// enabling them on a [`Blocking`] handler is a registration-time error.
///
/// [`Async`]: HandlerKind::Async
/// [`Blocking`]: HandlerKind::Blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Natively async; suspends instead of blocking.
    Async,
    /// Wraps synchronous code; executed on the blocking pool.
    Blocking,
}

/// Executable behavior attached to a component.
///
/// Tools receive their call arguments; resources receive template
/// parameters (empty object for static resources); prompts receive render
/// arguments. Results are JSON values shaped by the transport layer.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Invoke the component.
    async fn invoke(&self, args: Value, cx: RequestContext) -> Result<Value>;

    /// Whether this handler is async-native or wraps blocking code.
    fn kind(&self) -> HandlerKind {
        HandlerKind::Async
    }
}

type AsyncHandlerFn =
    dyn Fn(Value, RequestContext) -> BoxFuture<'static, Result<Value>> + Send + Sync;

struct FnHandler {
    f: Box<AsyncHandlerFn>,
}

#[async_trait]
impl Handler for FnHandler {
    async fn invoke(&self, args: Value, cx: RequestContext) -> Result<Value> {
        (self.f)(args, cx).await
    }
}

struct BlockingHandler<F> {
    f: Arc<F>,
    component: String,
}

#[async_trait]
impl<F> Handler for BlockingHandler<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
{
    async fn invoke(&self, args: Value, _cx: RequestContext) -> Result<Value> {
        let f = Arc::clone(&self.f);
        let component = self.component.clone();
        // Blocking handlers run on the blocking pool so concurrent sync
        // calls never serialize behind one another.
        tokio::task::spawn_blocking(move || f(args))
            .await
            .map_err(|e| Error::Handler {
                component,
                message: format!("blocking handler panicked: {e}"),
            })?
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Blocking
    }
}

/// A catalog component: tool, resource, resource template, or prompt.
///
/// Construct with [`Component::tool`], [`Component::resource`],
/// [`Component::resource_template`], or [`Component::prompt`], then chain
/// `with_*` builder methods.
///
/// # Examples
///
/// ```
/// use mcp_fabric::component::{Component, TaskConfig, TaskMode};
/// use serde_json::json;
///
/// let tool = Component::tool("add", |args, _cx| async move {
///     let a = args["a"].as_i64().unwrap_or(0);
///     let b = args["b"].as_i64().unwrap_or(0);
///     Ok(json!(a + b))
/// })
/// .with_description("Add two numbers")
/// .with_tags(["math"]);
///
/// assert_eq!(tool.key(), "tool:add");
/// ```
#[derive(Clone)]
pub struct Component {
    /// Which catalog this component belongs to.
    pub kind: ComponentKind,
    /// Unique name within kind+version+provider scope.
    pub name: String,
    /// Optional display title.
    pub title: Option<String>,
    /// Optional description (searchable).
    pub description: Option<String>,
    /// Resource/template URI; `None` for tools and prompts.
    pub uri: Option<String>,
    /// Grouping/filtering tags. Insertion order is irrelevant.
    pub tags: BTreeSet<String>,
    /// Optional version tag. Multiple components may share a name with
    /// different versions.
    pub version: Option<Version>,
    /// JSON-Schema-shaped parameter structure for tool/prompt inputs.
    pub parameters: Value,
    /// Background execution configuration.
    pub task_config: TaskConfig,
    /// Component-local enabled flag, distinct from session visibility.
    pub enabled: bool,
    handler: Arc<dyn Handler>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tags", &self.tags)
            .field("task_config", &self.task_config)
            .finish_non_exhaustive()
    }
}

impl Component {
    fn new(kind: ComponentKind, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            kind,
            name: name.into(),
            title: None,
            description: None,
            uri: None,
            tags: BTreeSet::new(),
            version: None,
            parameters: Value::Object(serde_json::Map::new()),
            task_config: TaskConfig::default(),
            enabled: true,
            handler,
        }
    }

    /// Creates a tool from an async closure.
    pub fn tool<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(
            ComponentKind::Tool,
            name,
            Arc::new(FnHandler {
                f: Box::new(move |args, cx| Box::pin(f(args, cx))),
            }),
        )
    }

    /// Creates a tool from a synchronous closure, executed on the blocking
    /// pool. Task modes cannot be enabled on the result.
    pub fn blocking_tool<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let component = format!("tool:{name}");
        Self::new(
            ComponentKind::Tool,
            name,
            Arc::new(BlockingHandler {
                f: Arc::new(f),
                component,
            }),
        )
    }

    /// Creates a tool backed by an explicit [`Handler`] implementation.
    pub fn tool_with_handler(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::new(ComponentKind::Tool, name, handler)
    }

    /// Creates a static resource. The handler receives an empty argument
    /// object on read.
    pub fn resource<F, Fut>(name: impl Into<String>, uri: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let mut c = Self::new(
            ComponentKind::Resource,
            name,
            Arc::new(FnHandler {
                f: Box::new(move |args, cx| Box::pin(f(args, cx))),
            }),
        );
        c.uri = Some(uri.into());
        c
    }

    /// Creates a resource template. The handler receives the parameters
    /// extracted from the matched URI.
    pub fn resource_template<F, Fut>(
        name: impl Into<String>,
        uri_template: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let mut c = Self::new(
            ComponentKind::ResourceTemplate,
            name,
            Arc::new(FnHandler {
                f: Box::new(move |args, cx| Box::pin(f(args, cx))),
            }),
        );
        c.uri = Some(uri_template.into());
        c
    }

    /// Creates a prompt from an async closure.
    pub fn prompt<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self::new(
            ComponentKind::Prompt,
            name,
            Arc::new(FnHandler {
                f: Box::new(move |args, cx| Box::pin(f(args, cx))),
            }),
        )
    }

    /// Sets the display title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(Version::parse(version));
        self
    }

    /// Sets the JSON-Schema-shaped parameter structure.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the task execution configuration.
    ///
    /// Enabling task modes on a blocking handler is rejected at
    /// registration time, not here.
    pub fn with_task_config(mut self, task_config: TaskConfig) -> Self {
        self.task_config = task_config;
        self
    }

    /// Sets the component-local enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replaces the name, returning the modified component. Used by
    /// renaming transforms.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The identifier used in this component's key: URI for resources and
    /// templates, name otherwise.
    pub fn identifier(&self) -> &str {
        self.uri.as_deref().unwrap_or(&self.name)
    }

    /// The lookup key: `kind:identifier[@version]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_fabric::component::Component;
    /// use serde_json::json;
    ///
    /// let t = Component::tool("calc", |_a, _c| async { Ok(json!(null)) })
    ///     .with_version("2.0");
    /// assert_eq!(t.key(), "tool:calc@2.0");
    /// ```
    pub fn key(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{}@{}", self.kind.key_prefix(), self.identifier(), v),
            None => format!("{}:{}", self.kind.key_prefix(), self.identifier()),
        }
    }

    /// The version-less key: `kind:identifier`. Visibility filtering and
    /// routing keys use this form so that disabling a name hides every
    /// version of it.
    pub fn base_key(&self) -> String {
        format!("{}:{}", self.kind.key_prefix(), self.identifier())
    }

    /// Whether this handler wraps blocking code.
    pub fn handler_kind(&self) -> HandlerKind {
        self.handler.kind()
    }

    /// Invokes the handler.
    pub async fn invoke(&self, args: Value, cx: RequestContext) -> Result<Value> {
        self.handler.invoke(args, cx).await
    }

    /// Validates the task configuration against the handler kind. Called
    /// by providers at registration time.
    pub fn validate_registration(&self) -> Result<()> {
        if self.task_config.supports_tasks() && self.handler_kind() == HandlerKind::Blocking {
            return Err(Error::Registration {
                component: self.key(),
                message: "task execution requires an async handler, \
                          but this component wraps a blocking function"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Checks call arguments against the parameter structure's `required`
    /// list. Raised before the handler runs; deeper schema validation is
    /// the transport layer's concern.
    pub fn validate_arguments(&self, args: &Value) -> Result<()> {
        let Some(required) = self.parameters.get("required").and_then(Value::as_array) else {
            return Ok(());
        };
        let supplied = args.as_object();
        for name in required.iter().filter_map(Value::as_str) {
            let present = supplied.is_some_and(|map| map.contains_key(name));
            if !present {
                return Err(Error::Validation {
                    component: self.key(),
                    message: format!("missing required argument `{name}`"),
                });
            }
        }
        Ok(())
    }

    /// Concatenated searchable text: name, description, and parameter
    /// names/descriptions. Used by the search transforms.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if let Some(desc) = &self.description {
            parts.push(desc.clone());
        }
        if let Some(props) = self.parameters.get("properties").and_then(Value::as_object) {
            for (param_name, param_info) in props {
                parts.push(param_name.clone());
                if let Some(desc) = param_info.get("description").and_then(Value::as_str) {
                    parts.push(desc.to_string());
                }
            }
        }
        parts.join(" ")
    }

    /// Serializes this component to the listing wire shape.
    pub fn to_listing(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("name".into(), Value::String(self.name.clone()));
        if let Some(title) = &self.title {
            obj.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(desc) = &self.description {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
        if let Some(uri) = &self.uri {
            obj.insert("uri".into(), Value::String(uri.clone()));
        }
        if let Some(v) = &self.version {
            obj.insert("version".into(), Value::String(v.as_str().to_string()));
        }
        if !self.tags.is_empty() {
            obj.insert(
                "tags".into(),
                Value::Array(
                    self.tags
                        .iter()
                        .map(|t| Value::String(t.clone()))
                        .collect(),
                ),
            );
        }
        obj.insert("inputSchema".into(), self.parameters.clone());
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_tool(name: &str) -> Component {
        Component::tool(name, |_args, _cx| async { Ok(json!(null)) })
    }

    #[test]
    fn key_includes_version_when_present() {
        let t = noop_tool("calc");
        assert_eq!(t.key(), "tool:calc");
        let t = noop_tool("calc").with_version("1.0");
        assert_eq!(t.key(), "tool:calc@1.0");
        assert_eq!(t.base_key(), "tool:calc");
    }

    #[test]
    fn resource_key_uses_uri() {
        let r = Component::resource("data", "file:///data.txt", |_a, _c| async {
            Ok(json!("contents"))
        });
        assert_eq!(r.key(), "resource:file:///data.txt");
        assert_eq!(r.name, "data");
    }

    #[test]
    fn blocking_tool_rejects_task_modes_at_registration() {
        let t = Component::blocking_tool("sync", |_| Ok(json!(1)))
            .with_task_config(TaskConfig::new(TaskMode::Optional));
        let err = t.validate_registration().unwrap_err();
        assert!(err.to_string().contains("async handler"));
    }

    #[test]
    fn async_tool_accepts_task_modes() {
        let t = noop_tool("async").with_task_config(TaskConfig::new(TaskMode::Required));
        assert!(t.validate_registration().is_ok());
    }

    #[test]
    fn blocking_tool_without_tasks_is_fine() {
        let t = Component::blocking_tool("sync", |_| Ok(json!(1)));
        assert!(t.validate_registration().is_ok());
    }

    #[test]
    fn searchable_text_includes_parameters() {
        let t = noop_tool("add")
            .with_description("Add two numbers")
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number", "description": "first operand"},
                    "b": {"type": "number"}
                }
            }));
        let text = t.searchable_text();
        assert!(text.contains("add"));
        assert!(text.contains("Add two numbers"));
        assert!(text.contains("first operand"));
        assert!(text.contains('b'));
    }

    #[test]
    fn validate_arguments_checks_required_fields() {
        let t = noop_tool("add").with_parameters(json!({
            "type": "object",
            "properties": {"a": {}, "b": {}},
            "required": ["a", "b"]
        }));
        assert!(t.validate_arguments(&json!({"a": 1, "b": 2})).is_ok());
        let err = t.validate_arguments(&json!({"a": 1})).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        // No required list: anything goes.
        assert!(noop_tool("free").validate_arguments(&json!(null)).is_ok());
    }

    #[test]
    fn task_config_from_bool() {
        assert_eq!(TaskConfig::from_bool(true).mode, TaskMode::Optional);
        assert_eq!(TaskConfig::from_bool(false).mode, TaskMode::Forbidden);
    }

    #[test]
    fn listing_shape() {
        let t = noop_tool("add")
            .with_description("Add")
            .with_version("1.0")
            .with_tags(["math"]);
        let v = t.to_listing();
        assert_eq!(v["name"], "add");
        assert_eq!(v["version"], "1.0");
        assert_eq!(v["tags"][0], "math");
    }
}
