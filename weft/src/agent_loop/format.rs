//! Canonical tool-result formatting. Every tool output the LLM sees goes
//! through here, whatever shape the tool returned.

use serde_json::{Map, Value};

use crate::tools::{ToolError, ToolOutput};

/// Rendering rules:
/// * `Ok(Data)` with a string `result` key → that string
/// * `Ok(Text)` → the text
/// * `Ok(Data)` otherwise → human-readable map dump
/// * `Err(Message)` / `Err(InvalidParams)` / `Err(Timeout)` → `"Error: <display>"`
/// * `Err(Data)` with a string `message` key → `"Error: <message>"`, else a dump
pub fn format_tool_output(result: &Result<ToolOutput, ToolError>) -> String {
    match result {
        Ok(ToolOutput::Text(text)) => text.clone(),
        Ok(ToolOutput::Data(map)) => match map.get("result").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => render_map(map),
        },
        Err(ToolError::Data(map)) => match map.get("message").and_then(Value::as_str) {
            Some(message) => format!("Error: {message}"),
            None => format!("Error: {}", render_map(map)),
        },
        Err(other) => format!("Error: {other}"),
    }
}

fn render_map(map: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.iter()
        .map(|key| {
            let value = &map[key.as_str()];
            match value {
                Value::String(s) => format!("{key}: {s}"),
                other => format!("{key}: {other}"),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn ok_result_key_unwraps() {
        let out = Ok(ToolOutput::Data(map(json!({"result": "file written"}))));
        assert_eq!(format_tool_output(&out), "file written");
    }

    #[test]
    fn ok_text_passes_through() {
        let out = Ok(ToolOutput::Text("plain".into()));
        assert_eq!(format_tool_output(&out), "plain");
    }

    #[test]
    fn ok_map_renders_sorted_lines() {
        let out = Ok(ToolOutput::Data(map(json!({"b": 2, "a": "x"}))));
        assert_eq!(format_tool_output(&out), "a: x\nb: 2");
    }

    #[test]
    fn errors_get_the_error_prefix() {
        let out: Result<ToolOutput, ToolError> = Err(ToolError::Message("no such file".into()));
        assert_eq!(format_tool_output(&out), "Error: no such file");

        let out: Result<ToolOutput, ToolError> = Err(ToolError::Timeout);
        assert_eq!(format_tool_output(&out), "Error: tool execution timed out");

        let out: Result<ToolOutput, ToolError> =
            Err(ToolError::Data(map(json!({"message": "denied"}))));
        assert_eq!(format_tool_output(&out), "Error: denied");

        let out: Result<ToolOutput, ToolError> =
            Err(ToolError::Data(map(json!({"code": 7}))));
        assert_eq!(format_tool_output(&out), "Error: code: 7");
    }
}
