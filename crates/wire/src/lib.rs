//! The step wire format.
//!
//! The server side encodes stream frames as tagged text; the client side
//! decodes arbitrarily chunked bytes back into steps and folds them into a
//! [`ChatOutput`].

pub mod decoder;
pub mod encoder;
pub mod partial_json;
pub mod reconstruct;

pub use decoder::{StepDecoder, StepState, StepUpdate};
pub use encoder::{FrameEncoder, encode_frames, encode_stream};
pub use partial_json::{ParseState, PartialJsonParser};
pub use reconstruct::{ChatOutput, ChatStatus, StepReconstructor, StepViewModel, reconstruct};
