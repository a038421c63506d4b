use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::context::CallContext;
use crate::domain::call::ToolCall;
use crate::domain::descriptor::ToolDescriptor;
use crate::domain::outcome::ExecutionOutcome;
use crate::errors::ToolError;

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &CallContext,
    ) -> Result<ExecutionOutcome, ToolError>;
}

#[derive(Clone)]
struct CatalogEntry {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Tools this worker serves, keyed by name. Iteration order is by name.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let descriptor = tool.descriptor();
        let name = descriptor.name.clone();
        let entry = CatalogEntry { descriptor, tool: Arc::new(tool) };
        if self.tools.insert(name.clone(), entry).is_some() {
            warn!(
                event_name = "catalog.tool.replaced",
                correlation_id = "bootstrap",
                tool_name = %name,
                "tool registered twice; keeping the latest handler"
            );
        }
    }

    pub fn with<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| Arc::clone(&entry.tool))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|entry| &entry.descriptor)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::{Tool, ToolCatalog};
    use crate::context::CallContext;
    use crate::domain::call::ToolCall;
    use crate::domain::descriptor::ToolDescriptor;
    use crate::domain::outcome::ExecutionOutcome;
    use crate::errors::ToolError;

    struct NamedTool(&'static str, &'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new(self.0, self.1, json!({"type": "object"}))
        }

        async fn execute(
            &self,
            _call: &ToolCall,
            _ctx: &CallContext,
        ) -> Result<ExecutionOutcome, ToolError> {
            Ok(ExecutionOutcome::AlreadyReported)
        }
    }

    #[test]
    fn registers_tools_in_name_order() {
        let catalog = ToolCatalog::new()
            .with(NamedTool("survey_export", "export responses"))
            .with(NamedTool("ads_report", "campaign report"));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names(), vec!["ads_report".to_owned(), "survey_export".to_owned()]);
        assert!(catalog.get("ads_report").is_some());
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn re_registering_keeps_latest_descriptor() {
        let catalog = ToolCatalog::new()
            .with(NamedTool("ads_report", "old"))
            .with(NamedTool("ads_report", "new"));

        assert_eq!(catalog.len(), 1);
        let descriptions: Vec<_> =
            catalog.descriptors().map(|descriptor| descriptor.description.as_str()).collect();
        assert_eq!(descriptions, vec!["new"]);
    }
}
