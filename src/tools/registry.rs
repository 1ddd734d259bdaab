//! Tool registry with capability-based discovery.
//!
//! Holds [`Tool`] instances indexed by name, capability tag and free-form
//! tag, and supplies the sanitized function-declaration list offered to the
//! model. The registry belongs to the client, not to the process: pass it
//! where it is needed.
//!
//! Reads are concurrent; writes (runtime MCP server add/remove) serialize
//! on an internal lock.

use crate::tools::schema::sanitize_parameters;
use crate::tools::{Tool, ToolCapability};
use crate::types::{Metadata, ToolDefinition};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Default priority for registrations that do not specify one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// A registered tool plus its discovery metadata.
#[derive(Clone)]
pub struct ToolInfo {
    /// The tool itself.
    pub tool: Arc<dyn Tool>,
    /// Capabilities the tool declares.
    pub capabilities: HashSet<ToolCapability>,
    /// Free-form tags.
    pub tags: HashSet<String>,
    /// Priority (0-100), higher sorts first in declarations.
    pub priority: u8,
    /// Arbitrary extra metadata.
    pub metadata: Metadata,
}

/// Options for registering a tool.
pub struct ToolRegistration {
    tool: Arc<dyn Tool>,
    capabilities: HashSet<ToolCapability>,
    tags: HashSet<String>,
    priority: u8,
    metadata: Metadata,
}

impl ToolRegistration {
    /// Start a registration for the given tool.
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            tool,
            capabilities: HashSet::new(),
            tags: HashSet::new(),
            priority: DEFAULT_PRIORITY,
            metadata: Metadata::new(),
        }
    }

    /// Declare capabilities.
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = ToolCapability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    /// Attach free-form tags.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the priority (0-100).
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    /// Attach metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Default)]
struct RegistryInner {
    tools: HashMap<String, ToolInfo>,
    by_capability: HashMap<ToolCapability, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
}

/// Registry of all tools available to a client.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under all indices.
    ///
    /// Re-registering a name replaces the previous entry.
    pub fn register(&self, registration: ToolRegistration) {
        let name = registration.tool.name().to_string();
        let info = ToolInfo {
            tool: registration.tool,
            capabilities: registration.capabilities,
            tags: registration.tags,
            priority: registration.priority,
            metadata: registration.metadata,
        };

        let mut inner = self.inner.write();
        if inner.tools.contains_key(&name) {
            Self::remove_from_indices(&mut inner, &name);
        }
        for capability in &info.capabilities {
            inner
                .by_capability
                .entry(*capability)
                .or_default()
                .insert(name.clone());
        }
        for tag in &info.tags {
            inner.by_tag.entry(tag.clone()).or_default().insert(name.clone());
        }
        inner.tools.insert(name, info);
    }

    /// Remove a tool from all indices. Returns true when it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        if !inner.tools.contains_key(name) {
            return false;
        }
        Self::remove_from_indices(&mut inner, name);
        inner.tools.remove(name);
        true
    }

    fn remove_from_indices(inner: &mut RegistryInner, name: &str) {
        if let Some(info) = inner.tools.get(name) {
            let capabilities: Vec<_> = info.capabilities.iter().copied().collect();
            let tags: Vec<_> = info.tags.iter().cloned().collect();
            for capability in capabilities {
                if let Some(names) = inner.by_capability.get_mut(&capability) {
                    names.remove(name);
                    if names.is_empty() {
                        inner.by_capability.remove(&capability);
                    }
                }
            }
            for tag in tags {
                if let Some(names) = inner.by_tag.get_mut(&tag) {
                    names.remove(name);
                    if names.is_empty() {
                        inner.by_tag.remove(&tag);
                    }
                }
            }
        }
    }

    /// O(1) lookup by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.read().tools.get(name).map(|info| info.tool.clone())
    }

    /// Full registration info for a tool.
    pub fn get_info(&self, name: &str) -> Option<ToolInfo> {
        self.inner.read().tools.get(name).cloned()
    }

    /// Whether a tool is registered.
    pub fn has_tool(&self, name: &str) -> bool {
        self.inner.read().tools.contains_key(name)
    }

    /// Names of all registered tools.
    pub fn tool_names(&self) -> Vec<String> {
        self.inner.read().tools.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.inner.read().tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().tools.is_empty()
    }

    /// Tools with the given capability at or above `min_priority`,
    /// highest priority first.
    pub fn by_capability(
        &self,
        capability: ToolCapability,
        min_priority: u8,
    ) -> Vec<Arc<dyn Tool>> {
        let inner = self.inner.read();
        let Some(names) = inner.by_capability.get(&capability) else {
            return Vec::new();
        };
        let mut matches: Vec<&ToolInfo> = names
            .iter()
            .filter_map(|name| inner.tools.get(name))
            .filter(|info| info.priority >= min_priority)
            .collect();
        Self::sort_by_priority(&mut matches);
        matches.into_iter().map(|info| info.tool.clone()).collect()
    }

    /// Tools matching several capabilities.
    ///
    /// With `match_all` the result is the intersection; otherwise the
    /// union. Sorted by priority descending.
    pub fn by_capabilities(
        &self,
        capabilities: &[ToolCapability],
        match_all: bool,
    ) -> Vec<Arc<dyn Tool>> {
        if capabilities.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut names: HashSet<String> = inner
            .by_capability
            .get(&capabilities[0])
            .cloned()
            .unwrap_or_default();
        for capability in &capabilities[1..] {
            match inner.by_capability.get(capability) {
                Some(set) if match_all => names.retain(|name| set.contains(name)),
                Some(set) => names.extend(set.iter().cloned()),
                None if match_all => names.clear(),
                None => {}
            }
        }

        let mut matches: Vec<&ToolInfo> =
            names.iter().filter_map(|name| inner.tools.get(name)).collect();
        Self::sort_by_priority(&mut matches);
        matches.into_iter().map(|info| info.tool.clone()).collect()
    }

    /// Tools carrying a tag, highest priority first.
    pub fn by_tag(&self, tag: &str) -> Vec<Arc<dyn Tool>> {
        let inner = self.inner.read();
        let Some(names) = inner.by_tag.get(tag) else {
            return Vec::new();
        };
        let mut matches: Vec<&ToolInfo> =
            names.iter().filter_map(|name| inner.tools.get(name)).collect();
        Self::sort_by_priority(&mut matches);
        matches.into_iter().map(|info| info.tool.clone()).collect()
    }

    /// Free-text search over name and description, with optional capability
    /// and tag filters. Filters are disjunctive within each group.
    pub fn search(
        &self,
        query: &str,
        capabilities: &[ToolCapability],
        tags: &[&str],
    ) -> Vec<Arc<dyn Tool>> {
        let query = query.to_lowercase();
        let inner = self.inner.read();

        let mut matches: Vec<&ToolInfo> = inner
            .tools
            .values()
            .filter(|info| {
                if !query.is_empty()
                    && !info.tool.name().to_lowercase().contains(&query)
                    && !info.tool.description().to_lowercase().contains(&query)
                {
                    return false;
                }
                if !capabilities.is_empty()
                    && !capabilities.iter().any(|c| info.capabilities.contains(c))
                {
                    return false;
                }
                if !tags.is_empty() && !tags.iter().any(|t| info.tags.contains(*t)) {
                    return false;
                }
                true
            })
            .collect();
        Self::sort_by_priority(&mut matches);
        matches.into_iter().map(|info| info.tool.clone()).collect()
    }

    /// For each capability, the tools providing it (with priority), for
    /// diagnostics and prompt building.
    pub fn capability_summary(&self) -> HashMap<ToolCapability, Vec<String>> {
        let inner = self.inner.read();
        let mut summary = HashMap::new();
        for (capability, names) in &inner.by_capability {
            let mut entries: Vec<&ToolInfo> =
                names.iter().filter_map(|name| inner.tools.get(name)).collect();
            Self::sort_by_priority(&mut entries);
            summary.insert(
                *capability,
                entries
                    .iter()
                    .map(|info| format!("{} (p:{})", info.tool.name(), info.priority))
                    .collect(),
            );
        }
        summary
    }

    /// The sanitized function-declaration list offered to the model,
    /// highest priority first.
    pub fn function_declarations(&self) -> Vec<ToolDefinition> {
        let inner = self.inner.read();
        let mut infos: Vec<&ToolInfo> = inner.tools.values().collect();
        Self::sort_by_priority(&mut infos);
        infos
            .iter()
            .map(|info| ToolDefinition {
                name: info.tool.name().to_string(),
                description: info.tool.description().to_string(),
                parameters: sanitize_parameters(&info.tool.parameter_schema()),
            })
            .collect()
    }

    /// Priority descending, name ascending as the tie-break so output
    /// ordering is deterministic.
    fn sort_by_priority(infos: &mut [&ToolInfo]) {
        infos.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.tool.name().cmp(b.tool.name()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::AbortSignal;
    use crate::tools::OutputSink;
    use crate::types::{Result, ToolResult};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct StubTool {
        name: &'static str,
        description: &'static str,
        schema: Value,
    }

    impl StubTool {
        fn new(name: &'static str, description: &'static str) -> Self {
            Self {
                name,
                description,
                schema: json!({"type": "object", "properties": {}}),
            }
        }

        fn with_schema(name: &'static str, schema: Value) -> Self {
            Self {
                name,
                description: "stub",
                schema,
            }
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        fn parameter_schema(&self) -> Value {
            self.schema.clone()
        }

        async fn execute(
            &self,
            _args: Value,
            _signal: &AbortSignal,
            _output: Option<OutputSink>,
        ) -> Result<ToolResult> {
            Ok(ToolResult::text("stub"))
        }
    }

    fn register_stub(
        registry: &ToolRegistry,
        name: &'static str,
        capabilities: &[ToolCapability],
        tags: &[&str],
        priority: u8,
    ) {
        registry.register(
            ToolRegistration::new(Arc::new(StubTool::new(name, "stub tool")))
                .capabilities(capabilities.iter().copied())
                .tags(tags.iter().copied())
                .priority(priority),
        );
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new();
        register_stub(&registry, "grep", &[ToolCapability::Search], &["fast"], 90);

        assert!(registry.has_tool("grep"));
        assert_eq!(registry.get("grep").unwrap().name(), "grep");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_unregister_restores_empty_indices() {
        let registry = ToolRegistry::new();
        register_stub(
            &registry,
            "writer",
            &[ToolCapability::Write, ToolCapability::Export],
            &["file"],
            60,
        );

        assert!(registry.unregister("writer"));
        assert!(!registry.unregister("writer"));
        assert!(registry.is_empty());
        assert!(registry.by_capability(ToolCapability::Write, 0).is_empty());
        assert!(registry.by_tag("file").is_empty());
        assert!(registry.function_declarations().is_empty());
    }

    #[test]
    fn test_by_capability_sorted_and_filtered() {
        let registry = ToolRegistry::new();
        register_stub(&registry, "low", &[ToolCapability::Search], &[], 30);
        register_stub(&registry, "high", &[ToolCapability::Search], &[], 90);
        register_stub(&registry, "mid", &[ToolCapability::Search], &[], 60);

        let names: Vec<_> = registry
            .by_capability(ToolCapability::Search, 0)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["high", "mid", "low"]);

        let filtered: Vec<_> = registry
            .by_capability(ToolCapability::Search, 50)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(filtered, vec!["high", "mid"]);
    }

    #[test]
    fn test_by_capabilities_union_and_intersection() {
        let registry = ToolRegistry::new();
        register_stub(&registry, "a", &[ToolCapability::Read], &[], 50);
        register_stub(
            &registry,
            "b",
            &[ToolCapability::Read, ToolCapability::Write],
            &[],
            50,
        );
        register_stub(&registry, "c", &[ToolCapability::Write], &[], 50);

        let union =
            registry.by_capabilities(&[ToolCapability::Read, ToolCapability::Write], false);
        assert_eq!(union.len(), 3);

        let intersection =
            registry.by_capabilities(&[ToolCapability::Read, ToolCapability::Write], true);
        let names: Vec<_> = intersection.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_search_by_text_and_tag() {
        let registry = ToolRegistry::new();
        registry.register(
            ToolRegistration::new(Arc::new(StubTool::new(
                "web_search",
                "Search the web for documentation",
            )))
            .capabilities([ToolCapability::Search])
            .tags(["web"]),
        );
        registry.register(
            ToolRegistration::new(Arc::new(StubTool::new("clock", "Tell the current time")))
                .tags(["time"]),
        );

        let by_text = registry.search("documentation", &[], &[]);
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].name(), "web_search");

        let by_tag = registry.search("", &[], &["time"]);
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].name(), "clock");

        assert!(registry.search("nonexistent", &[], &[]).is_empty());
    }

    #[test]
    fn test_function_declarations_sanitized_and_ordered() {
        let registry = ToolRegistry::new();
        registry.register(
            ToolRegistration::new(Arc::new(StubTool::with_schema(
                "risky",
                json!({
                    "type": "object",
                    "properties": {"n": {"type": "integer", "minimum": 1, "default": 2}},
                    "$schema": "http://json-schema.org/draft-07/schema#"
                }),
            )))
            .priority(20),
        );
        register_stub(&registry, "first", &[], &[], 95);

        let declarations = registry.function_declarations();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[0].name, "first");
        assert_eq!(declarations[1].name, "risky");

        let params = &declarations[1].parameters;
        assert!(params.get("$schema").is_none());
        assert!(params["properties"]["n"].get("minimum").is_none());
    }

    #[test]
    fn test_reregistering_replaces_indices() {
        let registry = ToolRegistry::new();
        register_stub(&registry, "tool", &[ToolCapability::Read], &["old"], 50);
        register_stub(&registry, "tool", &[ToolCapability::Write], &["new"], 70);

        assert_eq!(registry.len(), 1);
        assert!(registry.by_capability(ToolCapability::Read, 0).is_empty());
        assert_eq!(registry.by_capability(ToolCapability::Write, 0).len(), 1);
        assert!(registry.by_tag("old").is_empty());
        assert_eq!(registry.by_tag("new").len(), 1);
    }

    #[test]
    fn test_capability_summary() {
        let registry = ToolRegistry::new();
        register_stub(&registry, "grep", &[ToolCapability::Search], &[], 90);
        register_stub(&registry, "glob", &[ToolCapability::Search], &[], 85);

        let summary = registry.capability_summary();
        let search = summary.get(&ToolCapability::Search).unwrap();
        assert_eq!(search, &vec!["grep (p:90)".to_string(), "glob (p:85)".to_string()]);
    }
}
