//! Arithmetic tools: add, subtract, multiply, exponentiate.
//!
//! Each tool takes two numbers and returns one. Results that are whole
//! numbers are printed without a trailing `.0`, so `25 ** 3` reads `15625`.

use async_trait::async_trait;
use toolstream_core::error::ToolError;
use toolstream_core::tool::{Tool, ToolResult};

/// A two-operand arithmetic tool.
pub struct BinaryOpTool {
    name: &'static str,
    description: &'static str,
    operands: (&'static str, &'static str),
    op: fn(f64, f64) -> f64,
}

impl BinaryOpTool {
    /// `x + y`
    pub fn add() -> Self {
        Self {
            name: "add",
            description: "Add 'x' and 'y'.",
            operands: ("x", "y"),
            op: |x, y| x + y,
        }
    }

    /// `y - x`: the second operand minus the first.
    pub fn subtract() -> Self {
        Self {
            name: "subtract",
            description: "Subtract 'x' from 'y'.",
            operands: ("x", "y"),
            op: |x, y| y - x,
        }
    }

    /// `x * y`
    pub fn multiply() -> Self {
        Self {
            name: "multiply",
            description: "Multiply 'x' and 'y'.",
            operands: ("x", "y"),
            op: |x, y| x * y,
        }
    }

    /// `base ** power`
    pub fn exponentiate() -> Self {
        Self {
            name: "exponentiate",
            description: "Raise 'base' to the power of 'power'.",
            operands: ("base", "power"),
            op: f64::powf,
        }
    }

    fn operand(&self, arguments: &serde_json::Value, key: &str) -> Result<f64, ToolError> {
        arguments[key].as_f64().ok_or_else(|| {
            ToolError::InvalidArguments(format!("{}: missing numeric '{}' argument", self.name, key))
        })
    }
}

#[async_trait]
impl Tool for BinaryOpTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let (a, b) = self.operands;
        let mut properties = serde_json::Map::new();
        properties.insert(a.into(), serde_json::json!({ "type": "number" }));
        properties.insert(b.into(), serde_json::json!({ "type": "number" }));
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": [a, b]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let (a, b) = self.operands;
        let value = (self.op)(self.operand(&arguments, a)?, self.operand(&arguments, b)?);

        if !value.is_finite() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.into(),
                reason: format!("result is not a finite number ({value})"),
            });
        }

        Ok(ToolResult::ok(format_number(value)).with_data(serde_json::json!({ "result": value })))
    }
}

/// Format nicely: remove trailing .0 for integers.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
