//! The terminal `final_answer` tool.
//!
//! Selecting it ends the run. The orchestrator calls `execute` only to
//! validate the arguments; nothing outside the result is touched.

use async_trait::async_trait;
use toolstream_core::error::ToolError;
use toolstream_core::tool::{FINAL_ANSWER_TOOL, FinalAnswer, Tool, ToolResult};

pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        FINAL_ANSWER_TOOL
    }

    fn description(&self) -> &str {
        "Use this tool to provide a final answer to the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "The answer shown to the user"
                },
                "tools_used": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Names of the tools used to reach the answer"
                }
            },
            "required": ["answer", "tools_used"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let parsed = FinalAnswer::from_arguments(&arguments)?;
        Ok(ToolResult::ok(parsed.answer.clone()).with_data(serde_json::json!({
            "answer": parsed.answer,
            "tools_used": parsed.tools_used,
        })))
    }
}
