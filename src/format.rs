//! Output formatting: remote-value rendering, source snippets, backtraces.

use colored::Colorize;
use serde_json::Value;

/// Renders a `Runtime.RemoteObject`-shaped value the way the on-pause view
/// and `exec`/`repl` results do. `value` is whatever landed in a response's
/// `result` (or a single array element for `watchers`).
pub fn render_remote_object(value: &Value) -> String {
    let obj = match value.as_object() {
        Some(o) => o,
        None => return render_json_primitive(value),
    };

    let ty = obj.get("type").and_then(Value::as_str).unwrap_or("object");
    let subtype = obj.get("subtype").and_then(Value::as_str);

    match ty {
        "undefined" => "undefined".to_string(),
        "string" => obj.get("value").and_then(Value::as_str).unwrap_or_default().to_string(),
        "number" | "boolean" => obj
            .get("value")
            .map(render_json_primitive)
            .unwrap_or_else(|| obj.get("description").and_then(Value::as_str).unwrap_or("0").to_string()),
        "function" => {
            let class_name = obj.get("className").and_then(Value::as_str).unwrap_or("Function");
            let name = obj.get("description").and_then(Value::as_str).unwrap_or("");
            format!("[{class_name}: {name}]")
        }
        "object" => match subtype {
            Some("null") => "null".to_string(),
            Some("date") => obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some("regexp") => {
                obj.get("description").and_then(Value::as_str).unwrap_or_default().to_string()
            }
            Some("array") => render_array_preview(obj),
            _ => render_object_preview(obj),
        },
        _ => obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn render_json_primitive(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_array_preview(obj: &serde_json::Map<String, Value>) -> String {
    let Some(preview) = obj.get("preview").and_then(Value::as_object) else {
        return obj.get("description").and_then(Value::as_str).unwrap_or("[]").to_string();
    };
    let properties = preview.get("properties").and_then(Value::as_array).cloned().unwrap_or_default();
    let overflow = preview.get("overflow").and_then(Value::as_bool).unwrap_or(false);

    let mut parts: Vec<String> = properties
        .iter()
        .map(|p| p.get("value").map(render_json_primitive).unwrap_or_else(|| "undefined".into()))
        .collect();
    if overflow {
        parts.push("...".to_string());
    }
    format!("[ {} ]", parts.join(", "))
}

fn render_object_preview(obj: &serde_json::Map<String, Value>) -> String {
    let Some(preview) = obj.get("preview").and_then(Value::as_object) else {
        return obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("[object]")
            .to_string();
    };
    let properties = preview.get("properties").and_then(Value::as_array).cloned().unwrap_or_default();
    let overflow = preview.get("overflow").and_then(Value::as_bool).unwrap_or(false);

    let mut parts: Vec<String> = properties
        .iter()
        .map(|p| {
            let name = p.get("name").and_then(Value::as_str).unwrap_or("?");
            let value = p.get("value").map(render_json_primitive).unwrap_or_else(|| "undefined".into());
            format!("{name}: {value}")
        })
        .collect();
    if overflow {
        parts.push("...".to_string());
    }
    format!("{{ {} }}", parts.join(", "))
}

/// Formats an `Evaluation`-kind failure (`wasThrown=true`) the way §7
/// unpacks it: name from `className`, message from the stack's first line.
pub fn render_thrown(class_name: &str, description: &str) -> (String, String) {
    let message = description.lines().next().unwrap_or(description).to_string();
    (class_name.to_string(), message)
}

/// Renders one `watchers(verbose)` line: `idx: expr = value`.
pub fn render_watcher_line(index: usize, expr: &str, rendered: &str) -> String {
    format!("{index}: {expr} = {rendered}")
}

/// Renders a ±`delta` source window for `list`:
/// current line prefixed `>`, breakpointed lines prefixed `*`, others with
/// a space; the current column optionally ANSI-highlighted.
pub fn render_source_window(
    lines: &[&str],
    start_line: u32,
    current_line: u32,
    current_column: Option<u32>,
    breakpoint_lines: &[u32],
    colorize: bool,
) -> String {
    let mut out = String::new();
    for (offset, text) in lines.iter().enumerate() {
        let line_number = start_line + offset as u32;
        let prefix = if line_number == current_line {
            '>'
        } else if breakpoint_lines.contains(&line_number) {
            '*'
        } else {
            ' '
        };

        let rendered_text = if line_number == current_line && colorize {
            highlight_column(text, current_column)
        } else {
            text.to_string()
        };
        out.push_str(&format!("{prefix}{line_number:>4} {rendered_text}\n"));
    }
    out
}

fn highlight_column(text: &str, column: Option<u32>) -> String {
    let Some(col) = column.map(|c| c as usize) else {
        return text.to_string();
    };
    if col >= text.len() {
        return text.to_string();
    }
    let (before, at_and_after) = text.split_at(col);
    let mut chars = at_and_after.chars();
    let Some(highlighted) = chars.next() else {
        return text.to_string();
    };
    format!("{before}{}{}", highlighted.to_string().green(), chars.as_str())
}

/// `backtrace`/`bt`: one line per frame, `functionName (url:line)`.
pub fn render_backtrace_frame(index: usize, function_name: &str, url: &str, line: u32) -> String {
    let name = if function_name.is_empty() { "(anonymous)" } else { function_name };
    format!("#{index} {name} {url}:{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_primitives_and_function() {
        assert_eq!(render_remote_object(&json!({"type": "string", "value": "hi"})), "hi");
        assert_eq!(render_remote_object(&json!({"type": "number", "value": 42})), "42");
        assert_eq!(render_remote_object(&json!({"type": "undefined"})), "undefined");
        assert_eq!(
            render_remote_object(&json!({"type": "function", "className": "Function", "description": "heartbeat"})),
            "[Function: heartbeat]"
        );
    }

    #[test]
    fn renders_array_preview_with_overflow_marker() {
        let value = json!({
            "type": "object",
            "subtype": "array",
            "preview": {
                "overflow": true,
                "properties": [{"value": "function"}, {"value": "function"}]
            }
        });
        assert_eq!(render_remote_object(&value), "[ function, function, ... ]");
    }

    #[test]
    fn renders_object_preview_as_name_value_pairs() {
        let value = json!({
            "type": "object",
            "preview": {
                "overflow": false,
                "properties": [{"name": "x", "value": 1}, {"name": "y", "value": 2}]
            }
        });
        assert_eq!(render_remote_object(&value), "{ x: 1, y: 2 }");
    }

    #[test]
    fn thrown_message_is_first_stack_line() {
        let (name, message) = render_thrown("ReferenceError", "ReferenceError: x is not defined\n    at eval");
        assert_eq!(name, "ReferenceError");
        assert_eq!(message, "ReferenceError: x is not defined");
    }

    #[test]
    fn source_window_prefixes_current_and_breakpoint_lines() {
        let lines = ["a();", "b();", "c();"];
        let rendered = render_source_window(&lines, 1, 2, None, &[3], false);
        let mut out_lines = rendered.lines();
        assert!(out_lines.next().unwrap().starts_with(' '));
        assert!(out_lines.next().unwrap().starts_with('>'));
        assert!(out_lines.next().unwrap().starts_with('*'));
    }
}
