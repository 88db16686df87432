//! Parser for the canonical ReAct output language.
//!
//! Line-oriented and case-insensitive on the four keywords. A response
//! may carry several steps (typically a THOUGHT followed by an ACTION or
//! FINAL); lines without a keyword attach to the step they follow. The
//! system prompt demands uppercase keywords but the parser deliberately
//! accepts lowercase — models drift, and a recoverable parse beats a
//! self-correction round-trip.
//!
//! Action arguments accept, in order of attempt:
//! 1. a single JSON object
//! 2. a comma-separated `key=value` list where values are double-quoted
//!    strings, single-quoted strings, or bare tokens; integers, floats,
//!    and `true`/`false` are recognized and typed.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use ra_domain::error::{Error, Result};

/// One step parsed out of a model response, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStep {
    Thought(String),
    Action {
        tool: String,
        args: Map<String, Value>,
    },
    Final(String),
    Observation(String),
}

fn keyword_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(THOUGHT|ACTION|FINAL|OBSERVATION)\s*:\s*(.*)$")
            .expect("keyword regex is valid")
    })
}

fn action_head() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(.*)$").expect("action regex is valid")
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a full model response into its steps.
///
/// Returns a parse error when no keyword line is present, or when an
/// ACTION line does not match the action grammar.
pub fn parse_response(text: &str) -> Result<Vec<ParsedStep>> {
    // (keyword, accumulated content) blocks in document order.
    let mut blocks: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = keyword_line().captures(line) {
            let keyword = caps[1].to_uppercase();
            let content = caps[2].trim_end().to_owned();
            blocks.push((keyword, content));
        } else if let Some((_, content)) = blocks.last_mut() {
            // Continuation line of the current block.
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(line.trim_end());
        }
        // Prose before the first keyword is ignored.
    }

    if blocks.is_empty() {
        return Err(Error::Parse(format!(
            "no THOUGHT/ACTION/FINAL keyword found in: {}",
            snippet(text)
        )));
    }

    let mut steps = Vec::with_capacity(blocks.len());
    for (keyword, content) in blocks {
        let step = match keyword.as_str() {
            "THOUGHT" => ParsedStep::Thought(content.trim().to_owned()),
            "ACTION" => {
                let (tool, args) = parse_action(content.trim())?;
                ParsedStep::Action { tool, args }
            }
            "FINAL" => ParsedStep::Final(content.trim().to_owned()),
            "OBSERVATION" => ParsedStep::Observation(content.trim().to_owned()),
            _ => unreachable!("regex only matches the four keywords"),
        };
        steps.push(step);
    }
    Ok(steps)
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    let mut end = trimmed.len().min(120);
    while end > 0 && !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action grammar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse `tool_name` or `tool_name(<args>)`.
pub fn parse_action(text: &str) -> Result<(String, Map<String, Value>)> {
    let caps = action_head().captures(text).ok_or_else(|| {
        Error::Parse(format!("action does not start with a tool name: '{text}'"))
    })?;
    let tool = caps[1].to_owned();
    let rest = caps[2].trim();

    if rest.is_empty() {
        return Ok((tool, Map::new()));
    }
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| {
            Error::Parse(format!("malformed action argument list: '{text}'"))
        })?
        .trim();

    if inner.is_empty() {
        return Ok((tool, Map::new()));
    }

    // Attempt 1: a single JSON object.
    if inner.starts_with('{') {
        if let Ok(args) = serde_json::from_str::<Map<String, Value>>(inner) {
            return Ok((tool, args));
        }
    }

    // Attempt 2: key=value list.
    let args = parse_kv_args(inner)?;
    Ok((tool, args))
}

/// Scan a `key = value, key = value` list.
fn parse_kv_args(input: &str) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    let mut scanner = Scanner::new(input);

    loop {
        scanner.skip_ws_and_commas();
        if scanner.at_end() {
            break;
        }

        let key = scanner.identifier().ok_or_else(|| {
            Error::Parse(format!(
                "expected an argument name at '{}' in '{input}'",
                scanner.remainder()
            ))
        })?;
        scanner.skip_ws();
        if !scanner.eat('=') {
            return Err(Error::Parse(format!(
                "expected '=' after '{key}' in '{input}'"
            )));
        }
        scanner.skip_ws();

        let value = match scanner.peek() {
            Some('"') => Value::String(scanner.quoted('"')?),
            Some('\'') => Value::String(scanner.quoted('\'')?),
            Some(_) => type_bare_token(&scanner.bare_token()),
            None => {
                return Err(Error::Parse(format!(
                    "missing value for '{key}' in '{input}'"
                )))
            }
        };
        args.insert(key, value);
    }
    Ok(args)
}

/// Bare tokens get typed: integer, float, boolean, else string.
fn type_bare_token(token: &str) -> Value {
    if let Ok(i) = token.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = token.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(token.to_owned()),
    }
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remainder(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.remainder().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn skip_ws_and_commas(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace() || c == ',') {
            self.bump();
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let mut ident = String::new();
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            ident.push(self.bump().unwrap());
        }
        Some(ident)
    }

    /// A quoted string with backslash escapes.
    fn quoted(&mut self, quote: char) -> Result<String> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => {
                        return Err(Error::Parse("unterminated escape in argument".into()))
                    }
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => {
                    return Err(Error::Parse(format!(
                        "unterminated {quote}-quoted argument value"
                    )))
                }
            }
        }
    }

    /// An unquoted token: runs to the next comma or end of input.
    fn bare_token(&mut self) -> String {
        let mut out = String::new();
        while self.peek().is_some_and(|c| c != ',') {
            out.push(self.bump().unwrap());
        }
        out.trim().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(text: &str) -> (String, Map<String, Value>) {
        parse_action(text).unwrap()
    }

    #[test]
    fn thought_then_action_in_one_response() {
        let steps = parse_response("THOUGHT: need to add\nACTION: add(a=2, b=3)").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], ParsedStep::Thought("need to add".into()));
        match &steps[1] {
            ParsedStep::Action { tool, args } => {
                assert_eq!(tool, "add");
                assert_eq!(args["a"], Value::from(2));
                assert_eq!(args["b"], Value::from(3));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn lowercase_keywords_are_accepted() {
        let steps = parse_response("thought: hmm\nfinal: done").unwrap();
        assert_eq!(steps[0], ParsedStep::Thought("hmm".into()));
        assert_eq!(steps[1], ParsedStep::Final("done".into()));
    }

    #[test]
    fn multiline_final_keeps_continuation_lines() {
        let steps = parse_response("FINAL: first line\nsecond line\nthird").unwrap();
        assert_eq!(
            steps[0],
            ParsedStep::Final("first line\nsecond line\nthird".into())
        );
    }

    #[test]
    fn prose_without_keywords_is_a_parse_error() {
        let err = parse_response("I think I should add 2 and 3").unwrap_err();
        assert_eq!(err.kind(), ra_domain::ErrorKind::Parse);
        assert!(err.to_string().contains("add 2 and 3"));
    }

    #[test]
    fn leading_prose_before_a_keyword_is_ignored() {
        let steps = parse_response("Sure, here's my plan:\nTHOUGHT: ok").unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn action_without_arguments() {
        let (tool, args) = action("list_files");
        assert_eq!(tool, "list_files");
        assert!(args.is_empty());

        let (tool, args) = action("list_files()");
        assert_eq!(tool, "list_files");
        assert!(args.is_empty());
    }

    #[test]
    fn action_with_json_object_args() {
        let (tool, args) = action(r#"add({"a": 2, "b": 3.5})"#);
        assert_eq!(tool, "add");
        assert_eq!(args["a"], Value::from(2));
        assert_eq!(args["b"], Value::from(3.5));
    }

    #[test]
    fn key_value_args_with_mixed_quoting() {
        let (_, args) = action(r#"search(query="rust agents", lang='en', raw=unquoted)"#);
        assert_eq!(args["query"], Value::String("rust agents".into()));
        assert_eq!(args["lang"], Value::String("en".into()));
        assert_eq!(args["raw"], Value::String("unquoted".into()));
    }

    #[test]
    fn bare_values_are_typed() {
        let (_, args) = action("f(i=42, neg=-7, x=2.5, yes=true, no=false, s=hello)");
        assert_eq!(args["i"], Value::from(42));
        assert_eq!(args["neg"], Value::from(-7));
        assert_eq!(args["x"], Value::from(2.5));
        assert_eq!(args["yes"], Value::Bool(true));
        assert_eq!(args["no"], Value::Bool(false));
        assert_eq!(args["s"], Value::String("hello".into()));
    }

    #[test]
    fn whitespace_around_equals_and_commas_is_permitted() {
        let (_, args) = action("add( a = 2 ,  b=3 )");
        assert_eq!(args["a"], Value::from(2));
        assert_eq!(args["b"], Value::from(3));
    }

    #[test]
    fn quoted_values_keep_commas_and_escapes() {
        let (_, args) = action(r#"say(text="a, b, and c", note='it\'s fine')"#);
        assert_eq!(args["text"], Value::String("a, b, and c".into()));
        assert_eq!(args["note"], Value::String("it's fine".into()));
    }

    #[test]
    fn malformed_actions_are_rejected()  {
        assert!(parse_action("123bad(a=1)").is_err());
        assert!(parse_action("add(a=1").is_err());
        assert!(parse_action("add a=1)").is_err());
        assert!(parse_action("add(=1)").is_err());
        assert!(parse_action("add(a 1)").is_err());
        assert!(parse_action(r#"add(a="unterminated)"#).is_err());
    }

    #[test]
    fn invalid_json_object_falls_back_to_kv_and_fails_cleanly() {
        // Starts like JSON but is not valid; the kv scanner cannot read it
        // either, so the parse error surfaces.
        assert!(parse_action(r#"add({"a": )"#).is_err());
    }

    #[test]
    fn observation_lines_classify_last() {
        // OBSERVATION is never emitted by models, but the parser still
        // recognizes it for transcript round-trips.
        let steps = parse_response("OBSERVATION: tool said 5").unwrap();
        assert_eq!(steps[0], ParsedStep::Observation("tool said 5".into()));
    }
}
