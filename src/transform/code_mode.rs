//! Code-mode collapse: search plus programmatic tool execution.
//!
//! [`CodeMode`] replaces the tool catalog with two synthetic entry
//! points: a search tool for discovery and an execute tool that runs a
//! multi-step program against the hidden tools. Unlike the plain search
//! collapse, hidden tools are *not* reachable by direct lookup; the only
//! way to invoke them is through the executor, which re-enters the
//! catalog with this transform bypassed.
//!
//! Program evaluation is pluggable via [`Sandbox`]. The in-tree
//! [`PipelineSandbox`] runs a declarative JSON step list:
//!
//! ```json
//! {
//!   "steps": [
//!     {"tool": "fetch", "arguments": {"url": "https://x"}, "bind": "page"},
//!     {"tool": "summarize", "arguments": {"text": "$page"}}
//!   ]
//! }
//! ```
//!
//! A string argument of the form `"$name"` is replaced by the bound output
//! of an earlier step; the program result is the last step's output unless
//! an explicit `"result"` value is given.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::component::{Component, ComponentKind};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::transform::search::{SearchStrategy, DEFAULT_SEARCH_LIMIT};
use crate::transform::{bypass, GetNext, ListNext, Transform};
use crate::version::VersionSpec;

/// Invokes hidden tools on behalf of a sandbox, with the code-mode
/// transform bypassed and per-tool default arguments merged in.
pub struct ToolRunner {
    cx: RequestContext,
    bypass_ids: Vec<u64>,
    defaults: Arc<HashMap<String, Value>>,
}

impl ToolRunner {
    /// Resolves and invokes a hidden tool by name.
    ///
    /// Default arguments configured for the tool are merged under the
    /// call's own arguments (explicit arguments win).
    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        let merged = match self.defaults.get(name) {
            Some(defaults) => merge_defaults(defaults, args),
            None => args,
        };
        let catalog = Arc::clone(self.cx.catalog()?);
        let session = Arc::clone(self.cx.session());
        let name_owned = name.to_string();
        let tool = bypass::with_bypass(&self.bypass_ids, async move {
            catalog
                .get_component(ComponentKind::Tool, &name_owned, None, &session)
                .await
        })
        .await?
        .ok_or_else(|| Error::NotFound {
            key: format!("tool:{name}"),
        })?;
        tool.invoke(merged, self.cx.clone()).await
    }
}

/// Merges default arguments under explicit ones. Non-object arguments
/// pass through untouched.
fn merge_defaults(defaults: &Value, args: Value) -> Value {
    match (defaults.as_object(), args) {
        (Some(defaults), Value::Object(mut explicit)) => {
            for (key, value) in defaults {
                explicit.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(explicit)
        }
        (_, args) => args,
    }
}

/// Evaluates a program submitted to the execute tool.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Sandbox label for the execute tool description.
    fn name(&self) -> &str;

    /// Runs the program, calling hidden tools through `tools`.
    async fn execute(&self, program: Value, tools: &ToolRunner) -> Result<Value>;
}

/// Declarative step-pipeline sandbox: each step calls one tool, may bind
/// its output to a name, and later steps reference bindings as `"$name"`.
#[derive(Debug, Default)]
pub struct PipelineSandbox {
    _private: (),
}

impl PipelineSandbox {
    /// Creates the sandbox.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sandbox for PipelineSandbox {
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn execute(&self, program: Value, tools: &ToolRunner) -> Result<Value> {
        let steps = program
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| validation("program must carry a `steps` array"))?;
        if steps.is_empty() {
            return Err(validation("program has no steps"));
        }

        let mut bindings: Map<String, Value> = Map::new();
        let mut last = Value::Null;
        for (position, step) in steps.iter().enumerate() {
            let tool = step
                .get("tool")
                .and_then(Value::as_str)
                .ok_or_else(|| validation(format!("step {position} is missing `tool`")))?;
            let args = step.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let args = substitute(args, &bindings)?;
            let output = tools.call(tool, args).await?;
            if let Some(bind) = step.get("bind").and_then(Value::as_str) {
                bindings.insert(bind.to_string(), output.clone());
            }
            last = output;
        }

        match program.get("result") {
            Some(result) => substitute(result.clone(), &bindings),
            None => Ok(last),
        }
    }
}

fn validation(message: impl Into<String>) -> Error {
    Error::Validation {
        component: "tool:execute".to_string(),
        message: message.into(),
    }
}

/// Replaces `"$name"` strings with bound values, recursively through
/// objects and arrays. An unknown binding is a validation error.
fn substitute(value: Value, bindings: &Map<String, Value>) -> Result<Value> {
    match value {
        Value::String(s) => match s.strip_prefix('$') {
            Some(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| validation(format!("unknown binding `${name}`"))),
            None => Ok(Value::String(s)),
        },
        Value::Array(items) => items
            .into_iter()
            .map(|item| substitute(item, bindings))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| Ok((k, substitute(v, bindings)?)))
            .collect::<Result<Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

/// Collapses tools behind search + execute entry points.
pub struct CodeMode {
    id: u64,
    sandbox: Arc<dyn Sandbox>,
    strategy: Arc<dyn SearchStrategy>,
    search_tool_name: String,
    execute_tool_name: String,
    default_limit: usize,
    defaults: Arc<HashMap<String, Value>>,
}

impl CodeMode {
    /// Creates a code-mode collapse with the given search strategy and
    /// sandbox.
    pub fn new(
        strategy: impl SearchStrategy + 'static,
        sandbox: impl Sandbox + 'static,
    ) -> Self {
        Self {
            id: bypass::next_instance_id(),
            sandbox: Arc::new(sandbox),
            strategy: Arc::new(strategy),
            search_tool_name: "search".to_string(),
            execute_tool_name: "execute".to_string(),
            default_limit: DEFAULT_SEARCH_LIMIT,
            defaults: Arc::new(HashMap::new()),
        }
    }

    /// Renames the synthetic entry points.
    pub fn with_tool_names(
        mut self,
        search: impl Into<String>,
        execute: impl Into<String>,
    ) -> Self {
        self.search_tool_name = search.into();
        self.execute_tool_name = execute.into();
        self
    }

    /// Sets default arguments merged into every call of the named hidden
    /// tool (explicit arguments win).
    pub fn with_default_arguments(mut self, tool: impl Into<String>, defaults: Value) -> Self {
        Arc::make_mut(&mut self.defaults).insert(tool.into(), defaults);
        self
    }

    fn search_tool(&self) -> Component {
        let id = self.id;
        let strategy = Arc::clone(&self.strategy);
        let own_names = [self.search_tool_name.clone(), self.execute_tool_name.clone()];
        let default_limit = self.default_limit;

        Component::tool(self.search_tool_name.clone(), move |args, cx| {
            let strategy = Arc::clone(&strategy);
            let own_names = own_names.clone();
            async move {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| validation("missing required string argument `query`"))?
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
                let candidates: Vec<Component> = candidates
                    .into_iter()
                    .filter(|c| !own_names.contains(&c.name))
                    .collect();

                let matches = strategy.search(&query, &candidates, limit)?;
                Ok(json!({
                    "tools": matches.iter().map(Component::to_listing).collect::<Vec<_>>(),
                }))
            }
        })
        .with_description(format!(
            "Search the hidden tools by {} relevance. Matched tools are \
             invoked through the `{}` tool.",
            self.strategy.name(),
            self.execute_tool_name
        ))
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": self.default_limit}
            },
            "required": ["query"]
        }))
    }

    fn execute_tool(&self) -> Component {
        let id = self.id;
        let sandbox = Arc::clone(&self.sandbox);
        let defaults = Arc::clone(&self.defaults);

        Component::tool(self.execute_tool_name.clone(), move |args, cx| {
            let sandbox = Arc::clone(&sandbox);
            let defaults = Arc::clone(&defaults);
            async move {
                let runner = ToolRunner {
                    cx: cx.clone(),
                    bypass_ids: vec![id],
                    defaults,
                };
                sandbox.execute(args, &runner).await
            }
        })
        .with_description(format!(
            "Run a {} program against the hidden tools.",
            self.sandbox.name()
        ))
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool": {"type": "string"},
                            "arguments": {"type": "object"},
                            "bind": {"type": "string"}
                        },
                        "required": ["tool"]
                    }
                },
                "result": {}
            },
            "required": ["steps"]
        }))
    }
}

#[async_trait]
impl Transform for CodeMode {
    fn instance_id(&self) -> Option<u64> {
        Some(self.id)
    }

    async fn list(&self, kind: ComponentKind, next: ListNext<'_>) -> Result<Vec<Component>> {
        if kind != ComponentKind::Tool {
            return next.run(kind).await;
        }
        // The real listing is not consulted: the two entry points are the
        // whole visible surface.
        Ok(vec![self.search_tool(), self.execute_tool()])
    }

    async fn get(
        &self,
        kind: ComponentKind,
        identifier: &str,
        spec: Option<&VersionSpec>,
        next: GetNext<'_>,
    ) -> Result<Option<Component>> {
        if kind != ComponentKind::Tool {
            return next.run(kind, identifier, spec).await;
        }
        if identifier == self.search_tool_name {
            return Ok(Some(self.search_tool()));
        }
        if identifier == self.execute_tool_name {
            return Ok(Some(self.execute_tool()));
        }
        // Hidden tools are only reachable through the executor.
        Ok(None)
    }
}
