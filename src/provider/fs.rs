//! Filesystem-backed provider.
//!
//! Scans a directory tree for `*.toml` manifests describing resources and
//! prompts. The scan happens on every listing call, so edits to the
//! directory are picked up without restarts or cache invalidation.
//!
//! Manifest format:
//!
//! ```toml
//! [[resource]]
//! name = "readme"
//! uri = "docs://readme"
//! path = "README.md"          # file content, relative to the manifest
//! tags = ["docs"]
//!
//! [[resource]]
//! name = "motd"
//! uri = "docs://motd"
//! text = "inline content"     # alternative to `path`
//!
//! [[prompt]]
//! name = "greet"
//! description = "Greets someone by name"
//! template = "Hello, {name}!"
//! version = "1.0"
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::component::{Component, ComponentKind};
use crate::error::{Error, Result};
use crate::provider::Provider;

/// A provider that re-scans a directory of TOML manifests on each call.
#[derive(Debug)]
pub struct FsProvider {
    name: String,
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    resource: Vec<ResourceEntry>,
    #[serde(default)]
    prompt: Vec<PromptEntry>,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    name: String,
    uri: String,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptEntry {
    name: String,
    template: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    version: Option<String>,
}

impl FsProvider {
    /// Creates a provider rooted at `root`.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    async fn scan(&self) -> Result<Vec<Component>> {
        let root = self.root.clone();
        let provider = self.name.clone();
        // Manifest parsing and content reads are synchronous file I/O.
        tokio::task::spawn_blocking(move || scan_dir(&root, &provider))
            .await
            .map_err(|e| Error::internal(format!("manifest scan panicked: {e}")))?
    }
}

fn scan_dir(root: &Path, provider: &str) -> Result<Vec<Component>> {
    let pattern = root.join("**").join("*.toml");
    let pattern = pattern.to_string_lossy().into_owned();
    let paths = glob::glob(&pattern).map_err(|e| Error::ProviderUnavailable {
        provider: provider.to_string(),
        message: format!("bad manifest glob: {e}"),
    })?;

    let mut components = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| Error::ProviderUnavailable {
            provider: provider.to_string(),
            message: format!("manifest walk failed: {e}"),
        })?;
        let raw = std::fs::read_to_string(&path).map_err(|e| Error::ProviderUnavailable {
            provider: provider.to_string(),
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let manifest: Manifest = toml::from_str(&raw).map_err(|e| Error::ProviderUnavailable {
            provider: provider.to_string(),
            message: format!("invalid manifest {}: {e}", path.display()),
        })?;
        let base = path.parent().unwrap_or(root);
        for entry in manifest.resource {
            components.push(resource_component(entry, base, provider)?);
        }
        for entry in manifest.prompt {
            components.push(prompt_component(entry));
        }
    }
    Ok(components)
}

fn resource_component(entry: ResourceEntry, base: &Path, provider: &str) -> Result<Component> {
    let content = match (&entry.text, &entry.path) {
        (Some(text), _) => text.clone(),
        (None, Some(rel)) => {
            let path = base.join(rel);
            std::fs::read_to_string(&path).map_err(|e| Error::ProviderUnavailable {
                provider: provider.to_string(),
                message: format!("cannot read resource file {}: {e}", path.display()),
            })?
        }
        (None, None) => {
            return Err(Error::ProviderUnavailable {
                provider: provider.to_string(),
                message: format!("resource '{}' has neither `text` nor `path`", entry.name),
            })
        }
    };

    let mut c = Component::resource(entry.name, entry.uri, move |_args, _cx| {
        let content = content.clone();
        async move { Ok(Value::String(content)) }
    })
    .with_tags(entry.tags);
    if let Some(desc) = entry.description {
        c = c.with_description(desc);
    }
    if let Some(v) = entry.version {
        c = c.with_version(v);
    }
    Ok(c)
}

fn prompt_component(entry: PromptEntry) -> Component {
    let template = entry.template;
    let mut c = Component::prompt(entry.name, move |args, _cx| {
        let rendered = render_template(&template, &args);
        async move { Ok(json!(rendered)) }
    })
    .with_tags(entry.tags);
    if let Some(desc) = entry.description {
        c = c.with_description(desc);
    }
    if let Some(v) = entry.version {
        c = c.with_version(v);
    }
    c
}

/// Replaces `{key}` placeholders with stringified argument values.
/// Unknown placeholders are left verbatim.
fn render_template(template: &str, args: &Value) -> String {
    let Some(map) = args.as_object() else {
        return template.to_string();
    };
    let mut out = template.to_string();
    for (key, value) in map {
        let needle = format!("{{{key}}}");
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&needle, &replacement);
    }
    out
}

#[async_trait]
impl Provider for FsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_components(&self, kind: ComponentKind) -> Result<Vec<Component>> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|c| c.kind == kind)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;

    fn write_manifest(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn scans_resources_and_prompts() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "catalog.toml",
            r#"
[[resource]]
name = "motd"
uri = "docs://motd"
text = "hello world"

[[prompt]]
name = "greet"
template = "Hello, {name}!"
"#,
        );

        let provider = FsProvider::new("fs", dir.path());
        let resources = provider
            .list_components(ComponentKind::Resource)
            .await
            .unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri.as_deref(), Some("docs://motd"));

        let content = resources[0]
            .invoke(json!({}), RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(content, json!("hello world"));

        let prompts = provider
            .list_components(ComponentKind::Prompt)
            .await
            .unwrap();
        let rendered = prompts[0]
            .invoke(json!({"name": "Ada"}), RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(rendered, json!("Hello, Ada!"));
    }

    #[tokio::test]
    async fn rescan_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "catalog.toml",
            "[[prompt]]\nname = \"a\"\ntemplate = \"x\"\n",
        );

        let provider = FsProvider::new("fs", dir.path());
        assert_eq!(
            provider
                .list_components(ComponentKind::Prompt)
                .await
                .unwrap()
                .len(),
            1
        );

        write_manifest(
            dir.path(),
            "catalog.toml",
            "[[prompt]]\nname = \"a\"\ntemplate = \"x\"\n\n[[prompt]]\nname = \"b\"\ntemplate = \"y\"\n",
        );
        assert_eq!(
            provider
                .list_components(ComponentKind::Prompt)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn resource_file_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("body.txt"), "from disk").unwrap();
        write_manifest(
            dir.path(),
            "catalog.toml",
            r#"
[[resource]]
name = "body"
uri = "docs://body"
path = "body.txt"
"#,
        );

        let provider = FsProvider::new("fs", dir.path());
        let resources = provider
            .list_components(ComponentKind::Resource)
            .await
            .unwrap();
        let content = resources[0]
            .invoke(json!({}), RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(content, json!("from disk"));
    }

    #[tokio::test]
    async fn invalid_manifest_is_provider_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "bad.toml", "not [ valid toml");

        let provider = FsProvider::new("fs", dir.path());
        let err = provider
            .list_components(ComponentKind::Prompt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable { .. }));
    }
}
