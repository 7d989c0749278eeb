//! Incremental JSON parsing for argument text that is still arriving.
//!
//! The parser tracks lexical state as text is pushed (open containers,
//! string/escape state, where the current member started). A snapshot
//! repairs the text into a well-formed document by dropping the dangling
//! member and closing what is open, then hands it to `serde_json`.
//!
//! Snapshots only ever contain members whose keys and scalar values are
//! complete. Strings are the exception: a string value is shown as far as
//! it has arrived, so an answer can be rendered while it streams.

use serde_json::Value;

/// Result of looking at possibly incomplete JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseState {
    /// More text is needed. Carries the best value recovered so far.
    Incomplete(Option<Value>),
    /// The text is a complete JSON document.
    Complete(Value),
    /// The text can never become valid JSON.
    Invalid(String),
}

/// Parse text that is known to be complete.
pub fn parse_complete(text: &str) -> ParseState {
    match serde_json::from_str(text) {
        Ok(value) => ParseState::Complete(value),
        Err(e) => ParseState::Invalid(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Key,
    Colon,
    Value,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    container: Container,
    expect: Expect,
    /// Text length just after the opening bracket or the last comma
    member_start: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PartialJsonParser {
    text: String,
    stack: Vec<Level>,
    in_string: bool,
    string_is_key: bool,
    /// Offset of the backslash of an unfinished escape
    escape_at: Option<usize>,
    unicode_left: u8,
    scalar_at: Option<usize>,
    root_done: bool,
    error: Option<String>,
    last_good: Option<Value>,
}

impl PartialJsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append more text.
    pub fn push(&mut self, fragment: &str) {
        for c in fragment.chars() {
            if self.error.is_none() {
                self.step(c);
            }
            self.text.push(c);
        }
    }

    /// Best view of the text so far. Never shrinks: when the repaired text
    /// does not parse, the previous good value is returned.
    pub fn snapshot(&mut self) -> ParseState {
        if let Some(error) = &self.error {
            return ParseState::Invalid(error.clone());
        }
        if self.stack.is_empty() && self.root_done {
            if let Ok(value) = serde_json::from_str::<Value>(&self.text) {
                self.last_good = Some(value);
            }
            return ParseState::Incomplete(self.last_good.clone());
        }
        if let Some(value) = self.repaired().and_then(|t| serde_json::from_str(&t).ok()) {
            self.last_good = Some(value);
        }
        ParseState::Incomplete(self.last_good.clone())
    }

    /// Final verdict on the pushed text.
    pub fn finish(&self) -> ParseState {
        parse_complete(&self.text)
    }

    /// Snapshot of `text` with no history to fall back on.
    pub fn repair(text: &str) -> Option<Value> {
        let mut parser = Self::new();
        parser.push(text);
        match parser.snapshot() {
            ParseState::Incomplete(value) => value,
            ParseState::Complete(value) => Some(value),
            ParseState::Invalid(_) => None,
        }
    }

    fn fail(&mut self, c: char) {
        self.error = Some(format!("unexpected '{c}' at offset {}", self.text.len()));
    }

    fn value_done(&mut self) {
        match self.stack.last_mut() {
            Some(level) => level.expect = Expect::CommaOrEnd,
            None => self.root_done = true,
        }
    }

    fn value_allowed(&self) -> bool {
        match self.stack.last() {
            Some(level) => level.expect == Expect::Value,
            None => !self.root_done,
        }
    }

    fn end_scalar(&mut self) {
        if self.scalar_at.take().is_some() {
            self.value_done();
        }
    }

    fn step(&mut self, c: char) {
        if self.in_string {
            self.step_string(c);
            return;
        }
        let offset = self.text.len();
        match c {
            ' ' | '\t' | '\n' | '\r' => self.end_scalar(),
            '"' => {
                self.end_scalar();
                let key = matches!(self.stack.last(), Some(l) if l.expect == Expect::Key);
                if !key && !self.value_allowed() {
                    return self.fail(c);
                }
                self.in_string = true;
                self.string_is_key = key;
            }
            '{' | '[' => {
                self.end_scalar();
                if !self.value_allowed() {
                    return self.fail(c);
                }
                if let Some(parent) = self.stack.last_mut() {
                    parent.expect = Expect::CommaOrEnd;
                }
                let (container, expect) = if c == '{' {
                    (Container::Object, Expect::Key)
                } else {
                    (Container::Array, Expect::Value)
                };
                self.stack.push(Level {
                    container,
                    expect,
                    member_start: offset + 1,
                });
            }
            '}' | ']' => {
                self.end_scalar();
                let wanted = if c == '}' { Container::Object } else { Container::Array };
                let closes = self
                    .stack
                    .last()
                    .is_some_and(|l| l.container == wanted && l.expect != Expect::Colon);
                if !closes {
                    return self.fail(c);
                }
                self.stack.pop();
                self.value_done();
            }
            ':' => {
                if !self.stack.last().is_some_and(|l| l.expect == Expect::Colon) {
                    return self.fail(c);
                }
                if let Some(level) = self.stack.last_mut() {
                    level.expect = Expect::Value;
                }
            }
            ',' => {
                self.end_scalar();
                if !self.stack.last().is_some_and(|l| l.expect == Expect::CommaOrEnd) {
                    return self.fail(c);
                }
                if let Some(level) = self.stack.last_mut() {
                    level.expect = match level.container {
                        Container::Object => Expect::Key,
                        Container::Array => Expect::Value,
                    };
                    level.member_start = offset + 1;
                }
            }
            _ => {
                if self.scalar_at.is_none() {
                    if !self.value_allowed() {
                        return self.fail(c);
                    }
                    self.scalar_at = Some(offset);
                }
            }
        }
    }

    fn step_string(&mut self, c: char) {
        if self.unicode_left > 0 {
            self.unicode_left -= 1;
            if self.unicode_left == 0 {
                self.escape_at = None;
            }
            return;
        }
        if self.escape_at.is_some() {
            if c == 'u' {
                self.unicode_left = 4;
            } else {
                self.escape_at = None;
            }
            return;
        }
        match c {
            '\\' => self.escape_at = Some(self.text.len()),
            '"' => {
                self.in_string = false;
                if self.string_is_key {
                    if let Some(level) = self.stack.last_mut() {
                        level.expect = Expect::Colon;
                    }
                } else {
                    self.value_done();
                }
            }
            _ => {}
        }
    }

    /// Close the open text into a document, or `None` if nothing usable
    /// has arrived yet.
    fn repaired(&self) -> Option<String> {
        let mut text = self.text.clone();
        let mut stack = self.stack.clone();

        if self.in_string {
            if self.string_is_key {
                drop_member(&mut text, &mut stack)?;
            } else {
                if let Some(at) = self.escape_at {
                    text.truncate(at);
                }
                text.push('"');
                if let Some(level) = stack.last_mut() {
                    level.expect = Expect::CommaOrEnd;
                }
            }
        } else if self.scalar_at.is_some() {
            drop_member(&mut text, &mut stack)?;
        } else {
            let awaiting_value = stack.last().is_some_and(|level| {
                level.expect == Expect::Colon
                    || (level.container == Container::Object && level.expect == Expect::Value)
            });
            if awaiting_value {
                drop_member(&mut text, &mut stack)?;
            }
        }

        if stack.is_empty() {
            return self.root_done.then_some(text);
        }

        while let Some(level) = stack.pop() {
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
            if text.ends_with(',') {
                text.pop();
            }
            text.push(match level.container {
                Container::Object => '}',
                Container::Array => ']',
            });
        }
        Some(text)
    }
}

/// Cut the innermost open member. Fails when the dangling value is the root.
fn drop_member(text: &mut String, stack: &mut [Level]) -> Option<()> {
    let level = stack.last_mut()?;
    text.truncate(level.member_start);
    level.expect = match level.container {
        Container::Object => Expect::Key,
        Container::Array => Expect::Value,
    };
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_of(text: &str) -> Option<Value> {
        PartialJsonParser::repair(text)
    }

    #[test]
    fn empty_text_has_no_value() {
        assert_eq!(PartialJsonParser::new().snapshot(), ParseState::Incomplete(None));
    }

    #[test]
    fn open_object_closes() {
        assert_eq!(snapshot_of("{"), Some(json!({})));
        assert_eq!(snapshot_of(r#"{"base":25,"#), Some(json!({"base": 25})));
    }

    #[test]
    fn dangling_key_is_dropped() {
        assert_eq!(snapshot_of(r#"{"base":25,"pow"#), Some(json!({"base": 25})));
        assert_eq!(snapshot_of(r#"{"base":25,"power""#), Some(json!({"base": 25})));
        assert_eq!(snapshot_of(r#"{"base":25,"power":"#), Some(json!({"base": 25})));
    }

    #[test]
    fn partial_scalars_wait_for_delimiter() {
        assert_eq!(snapshot_of(r#"{"base":2"#), Some(json!({})));
        assert_eq!(snapshot_of(r#"{"ok":tr"#), Some(json!({})));
        assert_eq!(snapshot_of(r#"{"base":25 "#), Some(json!({"base": 25})));
        assert_eq!(snapshot_of("[1,2,3"), Some(json!([1, 2])));
    }

    #[test]
    fn partial_string_values_are_shown() {
        assert_eq!(
            snapshot_of(r#"{"answer":"The res"#),
            Some(json!({"answer": "The res"}))
        );
        assert_eq!(
            snapshot_of(r#"{"tools_used":["expo"#),
            Some(json!({"tools_used": ["expo"]}))
        );
    }

    #[test]
    fn unfinished_escape_is_cut() {
        assert_eq!(snapshot_of(r#"{"a":"x\"#), Some(json!({"a": "x"})));
        assert_eq!(snapshot_of(r#"{"a":"x\u00"#), Some(json!({"a": "x"})));
        assert_eq!(snapshot_of(r#"{"a":"x\u0041"#), Some(json!({"a": "xA"})));
        assert_eq!(snapshot_of(r#"{"a":"q\"b"#), Some(json!({"a": "q\"b"})));
    }

    #[test]
    fn nested_containers() {
        assert_eq!(
            snapshot_of(r#"{"a":{"b":[1,{"c":"d"#),
            Some(json!({"a": {"b": [1, {"c": "d"}]}}))
        );
    }

    #[test]
    fn snapshots_never_shrink() {
        let text = r#"{"answer":"15625","tools_used":["exponentiate"]}"#;
        let mut parser = PartialJsonParser::new();
        let mut previous: Option<Value> = None;
        for c in text.chars() {
            parser.push(&c.to_string());
            if let ParseState::Incomplete(Some(value)) = parser.snapshot() {
                if let Some(prev) = &previous {
                    let prev_len = prev.to_string().len();
                    assert!(value.to_string().len() >= prev_len, "{prev} -> {value}");
                }
                previous = Some(value);
            }
        }
        assert_eq!(parser.finish(), ParseState::Complete(serde_json::from_str(text).unwrap()));
    }

    #[test]
    fn structural_error_is_invalid() {
        let mut parser = PartialJsonParser::new();
        parser.push(r#"{"a":1]"#);
        assert!(matches!(parser.snapshot(), ParseState::Invalid(_)));
        assert!(matches!(parser.finish(), ParseState::Invalid(_)));
    }

    #[test]
    fn complete_document() {
        let mut parser = PartialJsonParser::new();
        parser.push(r#"{"x": 1, "y": 2}"#);
        assert_eq!(parser.snapshot(), ParseState::Incomplete(Some(json!({"x": 1, "y": 2}))));
        assert_eq!(parser.finish(), ParseState::Complete(json!({"x": 1, "y": 2})));
    }

    #[test]
    fn truncated_text_does_not_finish() {
        let mut parser = PartialJsonParser::new();
        parser.push(r#"{"x": 1"#);
        assert!(matches!(parser.finish(), ParseState::Invalid(_)));
    }

    #[test]
    fn root_scalar() {
        assert_eq!(snapshot_of("42 "), Some(json!(42)));
        assert_eq!(snapshot_of("4"), None);
        assert_eq!(snapshot_of(r#""hel"#), None);
    }
}
