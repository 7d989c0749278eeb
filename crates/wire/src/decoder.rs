//! Incremental step decoder.
//!
//! Bytes are scanned once, in order, by a small state machine. A `<` that
//! may begin a tag is held back in a carry buffer until the tag is either
//! confirmed or ruled out, so tags split across chunks are handled exactly
//! like unsplit ones. Inside a step body the scanner follows JSON string
//! state, so `</step>` inside a string value is body text, not a tag.
//!
//! Each `feed` returns one [`StepUpdate`] per step it touched: a snapshot
//! for the step still open at the end of the chunk, and a final update for
//! every step closed during it.

use crate::encoder::{NAME_CLOSE, NAME_OPEN, STEP_CLOSE, STEP_OPEN};
use crate::partial_json::{ParseState, PartialJsonParser, parse_complete};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Lifecycle of one decoded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum StepState {
    /// Arguments are still arriving
    Streaming,
    /// Closed with valid argument JSON
    Complete,
    /// Closed, but the argument text is not valid JSON
    ParseFailed(String),
    /// The stream ended before the step was closed
    Interrupted,
}

impl StepState {
    pub fn is_closed(&self) -> bool {
        !matches!(self, StepState::Streaming)
    }
}

/// What the decoder knows about one step after a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
    pub ordinal: u32,
    pub name: String,
    /// Argument text received so far (exact once closed)
    pub raw_arguments: String,
    /// Parsed or best-effort arguments
    pub arguments: Option<serde_json::Value>,
    pub state: StepState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Between steps
    Outside,
    /// After `<step>`, before `<step_name>`
    Opened,
    Name,
    Body,
}

#[derive(Debug, Default)]
struct OpenStep {
    ordinal: u32,
    name: Vec<u8>,
    body: Vec<u8>,
    /// Body bytes already handed to the parser
    fed: usize,
    parser: PartialJsonParser,
    in_string: bool,
    escaped: bool,
    touched: bool,
}

impl OpenStep {
    fn new(ordinal: u32) -> Self {
        Self {
            ordinal,
            touched: true,
            ..Self::default()
        }
    }

    fn body_byte(&mut self, b: u8) {
        self.body.push(b);
        self.touched = true;
        if self.escaped {
            self.escaped = false;
        } else if self.in_string {
            match b {
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            self.in_string = true;
        }
    }

    /// Hand whole UTF-8 characters to the parser; a split character waits
    /// for its remaining bytes.
    fn pump(&mut self) {
        while self.fed < self.body.len() {
            let pending = &self.body[self.fed..];
            match std::str::from_utf8(pending) {
                Ok(text) => {
                    self.parser.push(text);
                    self.fed = self.body.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&pending[..valid]) {
                        self.parser.push(text);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            self.parser.push(char::REPLACEMENT_CHARACTER.encode_utf8(&mut [0; 4]));
                            self.fed += valid + bad;
                        }
                        None => {
                            self.fed += valid;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn raw(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn snapshot(&mut self) -> StepUpdate {
        self.touched = false;
        self.pump();
        let arguments = match self.parser.snapshot() {
            ParseState::Incomplete(value) => value,
            ParseState::Complete(value) => Some(value),
            ParseState::Invalid(_) => None,
        };
        StepUpdate {
            ordinal: self.ordinal,
            name: self.name(),
            raw_arguments: self.raw(),
            arguments,
            state: StepState::Streaming,
        }
    }

    fn close(self) -> StepUpdate {
        let raw = self.raw();
        let (arguments, state) = if raw.trim().is_empty() {
            (Some(serde_json::json!({})), StepState::Complete)
        } else {
            match parse_complete(&raw) {
                ParseState::Complete(value) => (Some(value), StepState::Complete),
                ParseState::Invalid(reason) => (None, StepState::ParseFailed(reason)),
                ParseState::Incomplete(_) => (None, StepState::ParseFailed("incomplete".into())),
            }
        };
        StepUpdate {
            ordinal: self.ordinal,
            name: self.name(),
            raw_arguments: raw,
            arguments,
            state,
        }
    }

    fn interrupt(self) -> StepUpdate {
        let raw = self.raw();
        StepUpdate {
            ordinal: self.ordinal,
            name: self.name(),
            arguments: PartialJsonParser::repair(&raw),
            raw_arguments: raw,
            state: StepState::Interrupted,
        }
    }
}

/// Byte-stream decoder for one response body.
#[derive(Debug)]
pub struct StepDecoder {
    mode: Mode,
    carry: Vec<u8>,
    current: Option<OpenStep>,
    next_ordinal: u32,
}

impl Default for StepDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StepDecoder {
    pub fn new() -> Self {
        Self {
            mode: Mode::Outside,
            carry: Vec::new(),
            current: None,
            next_ordinal: 0,
        }
    }

    /// Decode one chunk of any size.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StepUpdate> {
        let mut updates = Vec::new();
        for &b in chunk {
            self.scan(b, &mut updates);
        }
        if let Some(step) = self.current.as_mut() {
            if step.touched {
                updates.push(step.snapshot());
            }
        }
        updates
    }

    /// The byte stream has ended. A step left open is interrupted.
    pub fn finish(mut self) -> Vec<StepUpdate> {
        let carry = std::mem::take(&mut self.carry);
        for b in carry {
            self.content(b);
        }
        match self.current.take() {
            Some(step) => {
                warn!(ordinal = step.ordinal, "Stream ended inside a step");
                vec![step.interrupt()]
            }
            None => Vec::new(),
        }
    }

    fn expected(&self) -> &'static [&'static str] {
        match self.mode {
            Mode::Outside => &[STEP_OPEN],
            Mode::Opened => &[NAME_OPEN, STEP_CLOSE],
            Mode::Name => &[NAME_CLOSE, STEP_CLOSE],
            Mode::Body => &[STEP_CLOSE, STEP_OPEN],
        }
    }

    fn tags_possible(&self) -> bool {
        match (self.mode, &self.current) {
            (Mode::Body, Some(step)) => !step.in_string,
            _ => true,
        }
    }

    fn scan(&mut self, b: u8, updates: &mut Vec<StepUpdate>) {
        if !self.carry.is_empty() {
            self.carry.push(b);
            let expected = self.expected();
            if let Some(tag) = expected.iter().find(|t| t.as_bytes() == self.carry.as_slice()) {
                self.carry.clear();
                self.on_tag(tag, updates);
                return;
            }
            if expected.iter().any(|t| t.as_bytes().starts_with(&self.carry)) {
                return;
            }
            // Not a tag after all: the `<` is content, the rest is rescanned.
            let held = std::mem::take(&mut self.carry);
            self.content(held[0]);
            for &b in &held[1..] {
                self.scan(b, updates);
            }
            return;
        }
        if b == b'<' && self.tags_possible() {
            self.carry.push(b);
            return;
        }
        self.content(b);
    }

    fn content(&mut self, b: u8) {
        match (self.mode, self.current.as_mut()) {
            (Mode::Name, Some(step)) => {
                step.name.push(b);
                step.touched = true;
            }
            (Mode::Opened, Some(step)) if !b.is_ascii_whitespace() => {
                // Body without a name marker.
                self.mode = Mode::Body;
                step.body_byte(b);
            }
            (Mode::Body, Some(step)) => step.body_byte(b),
            _ => trace!(byte = b, "Ignoring byte outside a step"),
        }
    }

    fn on_tag(&mut self, tag: &str, updates: &mut Vec<StepUpdate>) {
        match tag {
            STEP_OPEN => {
                self.close_current(updates);
                let ordinal = self.next_ordinal;
                self.next_ordinal += 1;
                self.current = Some(OpenStep::new(ordinal));
                self.mode = Mode::Opened;
                trace!(ordinal, "Step opened");
            }
            NAME_OPEN => self.mode = Mode::Name,
            NAME_CLOSE => self.mode = Mode::Body,
            STEP_CLOSE => {
                self.close_current(updates);
                self.mode = Mode::Outside;
            }
            _ => {}
        }
    }

    fn close_current(&mut self, updates: &mut Vec<StepUpdate>) {
        if let Some(step) = self.current.take() {
            let update = step.close();
            match &update.state {
                StepState::ParseFailed(reason) => {
                    warn!(ordinal = update.ordinal, %reason, "Step arguments are not valid JSON")
                }
                _ => debug!(ordinal = update.ordinal, name = %update.name, "Step closed"),
            }
            updates.push(update);
        }
    }
}
