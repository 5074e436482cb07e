//! Tools the model can call while composing a reply
//!
//! Executors get a [`ToolContext`] instead of reaching for globals: the memory
//! store and a weak handle to the controller's capabilities.

mod builtin;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Serialize;

use crate::events::Status;
use crate::memory::Memory;
use crate::{Error, Result};

pub use builtin::{
    AddNote, AddReminder, AddTodo, AddVocabularyWord, CompleteTodo, GetCurrentTime, SetMicrophone,
    SetMuted,
};

/// Controller operations exposed to tools
#[async_trait]
pub trait AssistantControl: Send + Sync {
    /// Restart capture on another microphone
    ///
    /// # Errors
    ///
    /// Returns error if the capture process fails to restart
    async fn update_microphone(&self, index: u32) -> Result<()>;

    fn set_muted(&self, muted: bool);

    fn status(&self) -> Status;
}

/// What a tool executor may touch
#[derive(Clone)]
pub struct ToolContext {
    pub memory: Arc<dyn Memory>,
    control: Option<Weak<dyn AssistantControl>>,
}

impl ToolContext {
    #[must_use]
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self {
            memory,
            control: None,
        }
    }

    #[must_use]
    pub fn with_control(mut self, control: Weak<dyn AssistantControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// The controller, if it is still alive
    ///
    /// # Errors
    ///
    /// Returns error if no controller is attached or it has shut down
    pub fn control(&self) -> Result<Arc<dyn AssistantControl>> {
        self.control
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::Tool("assistant controls are unavailable".to_string()))
    }
}

/// A function the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> serde_json::Value;

    /// Run the tool and return a small JSON result
    ///
    /// # Errors
    ///
    /// Returns error if arguments are malformed or the action fails
    async fn execute(&self, arguments: &str, ctx: &ToolContext) -> Result<serde_json::Value>;
}

/// Tool definition in `OpenAI` function-calling format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The fixed set of tools offered on every reply
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GetCurrentTime));
        registry.register(Arc::new(AddTodo));
        registry.register(Arc::new(CompleteTodo));
        registry.register(Arc::new(AddNote));
        registry.register(Arc::new(AddReminder));
        registry.register(Arc::new(AddVocabularyWord));
        registry.register(Arc::new(SetMicrophone));
        registry.register(Arc::new(SetMuted));
        registry
    }

    /// Add a tool, replacing one with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                tool_type: "function".to_owned(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters(),
                },
            })
            .collect()
    }

    /// Execute a named tool with raw JSON arguments
    ///
    /// # Errors
    ///
    /// Returns error if the tool is unknown or fails
    pub async fn execute(&self, name: &str, arguments: &str, ctx: &ToolContext) -> Result<String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::Tool(format!("unknown tool: {name}")))?;

        tracing::info!(tool = name, "executing tool");
        let result = tool.execute(arguments, ctx).await.map_err(|e| {
            tracing::warn!(tool = name, error = %e, "tool failed");
            e
        })?;
        Ok(result.to_string())
    }
}

/// Parse tool arguments, treating an empty string as `{}`
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: &str) -> Result<T> {
    let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
    serde_json::from_str(arguments)
        .map_err(|e| Error::Tool(format!("{tool}: invalid arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_definitions() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "get_current_time",
                "add_todo",
                "complete_todo",
                "add_note",
                "add_reminder",
                "add_vocabulary_word",
                "set_microphone",
                "set_muted",
            ]
        );

        let json = serde_json::to_value(&registry.definitions()[0]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_parse_args_accepts_empty() {
        #[derive(serde::Deserialize)]
        struct Empty {}
        assert!(parse_args::<Empty>("t", "").is_ok());
        assert!(parse_args::<Empty>("t", "nope").is_err());
    }
}
