//! Built-in tool implementations for toolstream.
//!
//! Four arithmetic tools, a SerpAPI-backed web search, and the terminal
//! `final_answer` tool. Every registry built here satisfies the decision
//! contract: `final_answer` is always present.

pub mod arithmetic;
pub mod final_answer;
pub mod web_search;

use toolstream_config::SearchConfig;
use toolstream_core::error::RegistryError;
use toolstream_core::tool::{FINAL_ANSWER_TOOL, ToolRegistry};

pub use arithmetic::BinaryOpTool;
pub use final_answer::FinalAnswerTool;
pub use web_search::WebSearchTool;

/// Create the default tool registry.
///
/// The web search tool is registered even without an API key; calls to it
/// then fail and are recorded as tool failures.
pub fn default_registry(search: &SearchConfig) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(BinaryOpTool::add()))?;
    registry.register(Box::new(BinaryOpTool::subtract()))?;
    registry.register(Box::new(BinaryOpTool::multiply()))?;
    registry.register(Box::new(BinaryOpTool::exponentiate()))?;
    registry.register(Box::new(WebSearchTool::new(
        search.api_key.clone(),
        search.endpoint.clone(),
        search.engine.clone(),
    )))?;
    registry.register(Box::new(FinalAnswerTool))?;
    registry.require(&[FINAL_ANSWER_TOOL])?;
    Ok(registry)
}
