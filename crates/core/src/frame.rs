//! Stream frames: the atomic unit between the orchestrator and the wire.

use serde::{Deserialize, Serialize};

/// What a frame carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum FrameKind {
    /// A fragment of the selected tool's name.
    StepName(String),

    /// A fragment of the argument JSON text.
    StepToken(String),

    /// The model finished this step's decision.
    StepEnd,

    /// The run is over; nothing follows.
    EndOfStream,
}

/// One frame, addressed to a step ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub ordinal: u32,
    #[serde(flatten)]
    pub kind: FrameKind,
}

impl StreamFrame {
    pub fn step_name(ordinal: u32, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            kind: FrameKind::StepName(name.into()),
        }
    }

    pub fn step_token(ordinal: u32, token: impl Into<String>) -> Self {
        Self {
            ordinal,
            kind: FrameKind::StepToken(token.into()),
        }
    }

    pub fn step_end(ordinal: u32) -> Self {
        Self {
            ordinal,
            kind: FrameKind::StepEnd,
        }
    }

    pub fn end_of_stream(ordinal: u32) -> Self {
        Self {
            ordinal,
            kind: FrameKind::EndOfStream,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.kind, FrameKind::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_serialization() {
        let frame = StreamFrame::step_token(1, "{\"x\":");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"step_token""#));
        assert!(json.contains(r#""ordinal":1"#));
    }

    #[test]
    fn end_of_stream_detection() {
        assert!(StreamFrame::end_of_stream(3).is_end_of_stream());
        assert!(!StreamFrame::step_end(3).is_end_of_stream());
    }
}
