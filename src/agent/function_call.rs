//! Parses the single `<function name="…">…</function>` block an assistant
//! turn is expected to emit. Only the first block in a message is
//! honored — anything after it is ignored, matching the wire format's "one
//! call per turn" rule.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    NoFunctionBlock,
    MissingName,
    MalformedParameter(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFunctionBlock => write!(f, "no <function> block found in response"),
            Self::MissingName => write!(f, "<function> block missing a name attribute"),
            Self::MalformedParameter(p) => write!(f, "malformed <parameter name=\"{p}\"> block"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Extracts the first `<function name="...">...</function>` block and its
/// `<parameter name="...">...</parameter>` children into a JSON object.
///
/// Parameter values are parsed as JSON when possible (so `true`, `42`,
/// `{"a":1}` round-trip as their native types) and otherwise kept as
/// plain strings — mirroring how the model is instructed to emit them.
pub fn parse_function_call(text: &str) -> Result<FunctionCall, ParseError> {
    let open_tag_start = text.find("<function").ok_or(ParseError::NoFunctionBlock)?;
    let open_tag_end = text[open_tag_start..].find('>').map(|i| open_tag_start + i + 1).ok_or(ParseError::NoFunctionBlock)?;
    let header = &text[open_tag_start..open_tag_end];

    let name = extract_name_attr(header).ok_or(ParseError::MissingName)?;

    let close_tag = "</function>";
    let body_end = text[open_tag_end..].find(close_tag).map(|i| open_tag_end + i).unwrap_or(text.len());
    let body = &text[open_tag_end..body_end];

    let mut args = serde_json::Map::new();
    let mut cursor = 0usize;
    while let Some(rel_start) = body[cursor..].find("<parameter") {
        let start = cursor + rel_start;
        let header_end = body[start..].find('>').map(|i| start + i + 1);
        let Some(header_end) = header_end else { break };
        let param_header = &body[start..header_end];
        let param_name = extract_name_attr(param_header).ok_or_else(|| ParseError::MalformedParameter("?".into()))?;

        let close = "</parameter>";
        let Some(rel_close) = body[header_end..].find(close) else {
            return Err(ParseError::MalformedParameter(param_name));
        };
        let value_end = header_end + rel_close;
        let raw_value = body[header_end..value_end].trim();

        args.insert(param_name, parse_param_value(raw_value));
        cursor = value_end + close.len();
    }

    Ok(FunctionCall { name, args: Value::Object(args) })
}

fn parse_param_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Pulls the `name="…"` attribute out of an opening tag header, tolerating
/// whitespace around the `=` the way models actually emit it.
fn extract_name_attr(tag_header: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r#"name\s*=\s*"([^"]*)""#).unwrap_or_else(|e| panic!("invalid name-attribute pattern: {e}")));
    pattern.captures(tag_header).map(|c| c[1].to_string())
}

/// True when the text contains anything recognizable as a function-call
/// attempt, even a malformed one — used to decide whether to nudge the
/// model toward the correct wire format rather than treating the turn as a
/// plain-text (non-tool) response.
pub fn looks_like_function_call(text: &str) -> bool {
    text.contains("<function")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_call() {
        let text = r#"<function name="read_file"><parameter name="path">src/main.rs</parameter></function>"#;
        let call = parse_function_call(text).unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(call.args["path"], "src/main.rs");
    }

    #[test]
    fn parses_multiple_parameters_with_typed_values() {
        let text = r#"<function name="create_agent"><parameter name="name">scout</parameter><parameter name="thinking_level">"high"</parameter><parameter name="spawn_depth">2</parameter></function>"#;
        let call = parse_function_call(text).unwrap();
        assert_eq!(call.name, "create_agent");
        assert_eq!(call.args["name"], "scout");
        assert_eq!(call.args["thinking_level"], "high");
        assert_eq!(call.args["spawn_depth"], 2);
    }

    #[test]
    fn ignores_second_block() {
        let text = r#"<function name="first"></function> some text <function name="second"></function>"#;
        let call = parse_function_call(text).unwrap();
        assert_eq!(call.name, "first");
    }

    #[test]
    fn no_block_is_error() {
        assert_eq!(parse_function_call("just plain text"), Err(ParseError::NoFunctionBlock));
    }

    #[test]
    fn missing_name_attribute_is_error() {
        let text = "<function></function>";
        assert_eq!(parse_function_call(text), Err(ParseError::MissingName));
    }

    #[test]
    fn unclosed_parameter_is_malformed() {
        let text = r#"<function name="x"><parameter name="a">oops</function>"#;
        assert!(matches!(parse_function_call(text), Err(ParseError::MalformedParameter(_))));
    }

    #[test]
    fn detects_loose_function_attempt() {
        assert!(looks_like_function_call("<function name=\"x\">"));
        assert!(!looks_like_function_call("no tool here"));
    }
}
