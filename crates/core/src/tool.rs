//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what the orchestrator may select at each decision: arithmetic,
//! web search, and the terminal `final_answer` tool that ends a run.

use crate::error::{RegistryError, ToolError};
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the terminal tool. Selecting it ends the orchestrator loop.
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// Validated arguments of a `final_answer` selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub tools_used: Vec<String>,
}

impl FinalAnswer {
    /// Validate terminal-step arguments. `answer` must be a string;
    /// `tools_used` may be absent but otherwise must be an array of strings.
    ///
    /// The orchestrator and the client reconstructor both decide with this
    /// function, so they agree on which step ends a run.
    pub fn from_arguments(arguments: &serde_json::Value) -> Result<Self, ToolError> {
        let answer = arguments["answer"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'answer' argument".into()))?;

        let tools_used = match &arguments["tools_used"] {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str().map(String::from).ok_or_else(|| {
                        ToolError::InvalidArguments("'tools_used' must contain strings".into())
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(ToolError::InvalidArguments(
                    "'tools_used' must be an array".into(),
                ));
            }
        };

        Ok(Self {
            answer: answer.to_string(),
            tools_used,
        })
    }
}

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    /// A successful result with plain text output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// Attach structured data to this result.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the [`ToolRegistry`]
/// at startup. Tools must be pure with respect to the orchestrator: they may
/// perform I/O, but they never touch agent state.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "add", "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Names are unique; registering a second tool under an existing name is
/// rejected. After construction the registry is shared read-only between
/// concurrent runs, so lookups never need a lock.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Assert that every name the decision contract depends on is registered.
    ///
    /// Called once at startup so a missing terminal tool fails the process
    /// instead of a request.
    pub fn require(&self, names: &[&str]) -> Result<(), RegistryError> {
        match names.iter().find(|n| !self.tools.contains_key(**n)) {
            Some(missing) => Err(RegistryError::MissingTool(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Definitions restricted to the given names (unknown names are skipped).
    pub fn definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.get(n))
            .map(|t| t.to_definition())
            .collect()
    }

    /// Execute a tool call. Unknown names become `ToolError::NotFound`.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names, ordered.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
