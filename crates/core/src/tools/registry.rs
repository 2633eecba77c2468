use crate::error::ToolError;
use crate::events::{ToolCall, ToolResult};
use crate::tools::schema::{ToolArgs, ToolSchema};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

/// One registered operation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn schema(&self) -> &ToolSchema;

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError>;
}

/// Name to handler table, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: Vec<Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any handler registered under the same name.
    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        let name = handler.schema().name;
        self.handlers.retain(|existing| existing.schema().name != name);
        self.handlers.push(handler);
    }

    /// Keeps only the named handlers. Unknown names are logged and ignored.
    pub fn retain(&mut self, names: &[String]) {
        for name in names {
            if self.get(name).is_none() {
                tracing::warn!("Ignoring unknown tool name {:?}", name);
            }
        }
        self.handlers
            .retain(|handler| names.iter().any(|name| name == handler.schema().name));
    }

    fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.handlers
            .iter()
            .find(|handler| handler.schema().name == name)
            .map(|handler| handler.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers
            .iter()
            .map(|handler| handler.schema().name)
            .collect()
    }

    /// The tool manifest announced to the live service.
    pub fn manifest(&self) -> Value {
        let declarations: Vec<Value> = self
            .handlers
            .iter()
            .map(|handler| handler.schema().declaration())
            .collect();
        json!({ "function_declarations": declarations })
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
        call_id: &str,
    ) -> Result<ToolResult, ToolError> {
        let handler = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownOperation(name.to_string()))?;
        let args = handler.schema().validate(args)?;
        let response = handler.call(args).await?;
        Ok(ToolResult {
            name: name.to_string(),
            response,
            id: call_id.to_string(),
        })
    }

    /// Runs a batch in order. Calls that fail are logged and left out of the
    /// returned results; the rest of the batch still runs.
    pub async fn dispatch_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            match self.dispatch(&call.name, &call.args, &call.id).await {
                Ok(result) => {
                    tracing::debug!(tool = %call.name, call_id = %call.id, "tool call succeeded");
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(tool = %call.name, call_id = %call.id, "Error executing tool: {}", e);
                }
            }
        }
        results
    }
}
