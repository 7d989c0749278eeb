//! Frame encoder: turns stream frames into the tagged text body.
//!
//! ```text
//! <step><step_name>exponentiate</step_name>{"base":25,"power":3}</step>
//! ```
//!
//! Name and argument fragments are written through as they arrive. Every
//! step is closed with `</step>`, including the last one.

use futures::{Stream, StreamExt};
use toolstream_core::{FrameKind, StreamFrame};

pub const STEP_OPEN: &str = "<step>";
pub const STEP_CLOSE: &str = "</step>";
pub const NAME_OPEN: &str = "<step_name>";
pub const NAME_CLOSE: &str = "</step_name>";

/// Stateful encoder for one response body.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    open: Option<u32>,
    in_name: bool,
    finished: bool,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The end-of-stream frame has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Encode one frame. Returns an empty string when the frame writes
    /// nothing (or arrives after the end of the stream).
    pub fn encode(&mut self, frame: &StreamFrame) -> String {
        let mut out = String::new();
        if self.finished {
            return out;
        }
        match &frame.kind {
            FrameKind::StepName(name) => {
                self.enter(frame.ordinal, &mut out);
                if self.in_name {
                    out.push_str(name);
                }
            }
            FrameKind::StepToken(token) => {
                self.enter(frame.ordinal, &mut out);
                self.leave_name(&mut out);
                out.push_str(token);
            }
            FrameKind::StepEnd => {
                if self.open == Some(frame.ordinal) {
                    self.close(&mut out);
                }
            }
            FrameKind::EndOfStream => {
                self.close(&mut out);
                self.finished = true;
            }
        }
        out
    }

    /// Make `ordinal` the open step, closing any other.
    fn enter(&mut self, ordinal: u32, out: &mut String) {
        if self.open == Some(ordinal) {
            return;
        }
        self.close(out);
        out.push_str(STEP_OPEN);
        out.push_str(NAME_OPEN);
        self.open = Some(ordinal);
        self.in_name = true;
    }

    fn leave_name(&mut self, out: &mut String) {
        if self.in_name {
            out.push_str(NAME_CLOSE);
            self.in_name = false;
        }
    }

    fn close(&mut self, out: &mut String) {
        if self.open.take().is_some() {
            self.leave_name(out);
            out.push_str(STEP_CLOSE);
        }
    }
}

/// Encode a whole frame sequence into one string.
pub fn encode_frames<'a>(frames: impl IntoIterator<Item = &'a StreamFrame>) -> String {
    let mut encoder = FrameEncoder::new();
    let mut out = String::new();
    for frame in frames {
        out.push_str(&encoder.encode(frame));
    }
    out
}

/// Encode a frame stream lazily, one body chunk per non-empty frame.
/// Ends after the end-of-stream frame.
pub fn encode_stream<S>(frames: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = StreamFrame> + Send + Unpin,
{
    futures::stream::unfold(
        (frames, FrameEncoder::new()),
        |(mut frames, mut encoder)| async move {
            loop {
                if encoder.is_finished() {
                    return None;
                }
                let frame = frames.next().await?;
                let text = encoder.encode(&frame);
                if !text.is_empty() {
                    return Some((text, (frames, encoder)));
                }
            }
        },
    )
}
