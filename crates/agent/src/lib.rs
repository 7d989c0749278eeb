//! The orchestrator loop: decide, act, observe.
//!
//! 1. **Decide**: ask the provider for one tool selection, streaming its
//!    name and argument tokens to the per-request frame channel
//! 2. **Act**: run the selected tool under a wall-clock limit
//! 3. **Observe**: append the result (or the failure) to the scratchpad
//!
//! The loop ends when the terminal `final_answer` tool is selected. When
//! the iteration cap is reached first, one last round is forced onto the
//! terminal tool so every successful run ends with an answer.

pub mod multiplexer;
pub mod orchestrator;
pub mod state;

pub use multiplexer::{FrameSink, FrameStream, frame_channel};
pub use orchestrator::{Decision, Orchestrator, Phase, RunOutcome};
pub use state::AgentState;
