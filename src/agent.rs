//! Domain-scoped façade over the protocol client: a generic `send` plus
//! thin typed wrappers for the fixed method list the
//! session and REPL actually drive. Event subscription is handled upstream
//! by `session::Session::handle_event`, which already dispatches on the
//! full `Domain.method` string — no separate per-domain emitter is needed
//! here.

use serde_json::{json, Value};

use crate::client::Client;
use crate::error::Error;

/// A thin typed front door onto one protocol client. Cloning a `Client`
/// handle is cheap (it's `Rc`-backed internally), so `Agent` just wraps a
/// reference to the one the session owns.
pub struct Agent<'a> {
    client: &'a Client,
}

impl<'a> Agent<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// The escape hatch: any `Domain.method` this wrapper doesn't name yet.
    pub async fn send(&self, domain: &str, method: &str, params: Option<Value>) -> Result<Value, Error> {
        self.client.call_method(&format!("{domain}.{method}"), params).await
    }

    // -- Debugger --------------------------------------------------------

    pub async fn debugger_resume(&self) -> Result<Value, Error> {
        self.send("Debugger", "resume", None).await
    }

    pub async fn debugger_step_over(&self) -> Result<Value, Error> {
        self.send("Debugger", "stepOver", None).await
    }

    pub async fn debugger_step_into(&self) -> Result<Value, Error> {
        self.send("Debugger", "stepInto", None).await
    }

    pub async fn debugger_step_out(&self) -> Result<Value, Error> {
        self.send("Debugger", "stepOut", None).await
    }

    pub async fn debugger_pause(&self) -> Result<Value, Error> {
        self.send("Debugger", "pause", None).await
    }

    pub async fn debugger_set_breakpoint(
        &self,
        script_id: &str,
        line_number: u32,
        condition: Option<&str>,
    ) -> Result<Value, Error> {
        let mut params = json!({
            "location": { "scriptId": script_id, "lineNumber": line_number },
        });
        if let Some(c) = condition {
            params["condition"] = json!(c);
        }
        self.send("Debugger", "setBreakpoint", Some(params)).await
    }

    pub async fn debugger_set_breakpoint_by_url(
        &self,
        url_regex: &str,
        line_number: u32,
        condition: Option<&str>,
    ) -> Result<Value, Error> {
        let mut params = json!({ "urlRegex": url_regex, "lineNumber": line_number });
        if let Some(c) = condition {
            params["condition"] = json!(c);
        }
        self.send("Debugger", "setBreakpointByUrl", Some(params)).await
    }

    pub async fn debugger_remove_breakpoint(&self, breakpoint_id: &str) -> Result<Value, Error> {
        self.send("Debugger", "removeBreakpoint", Some(json!({ "breakpointId": breakpoint_id }))).await
    }

    pub async fn debugger_set_pause_on_exceptions(&self, state: &str) -> Result<Value, Error> {
        self.send("Debugger", "setPauseOnExceptions", Some(json!({ "state": state }))).await
    }

    pub async fn debugger_set_async_call_stack_depth(&self, max_depth: u32) -> Result<Value, Error> {
        self.send("Debugger", "setAsyncCallStackDepth", Some(json!({ "maxDepth": max_depth }))).await
    }

    pub async fn debugger_set_blackbox_patterns(&self, patterns: &[String]) -> Result<Value, Error> {
        self.send("Debugger", "setBlackboxPatterns", Some(json!({ "patterns": patterns }))).await
    }

    pub async fn debugger_evaluate_on_call_frame(
        &self,
        call_frame_id: &str,
        expression: &str,
    ) -> Result<Value, Error> {
        self.send(
            "Debugger",
            "evaluateOnCallFrame",
            Some(json!({
                "callFrameId": call_frame_id,
                "expression": expression,
                "generatePreview": true,
            })),
        )
        .await
    }

    pub async fn debugger_get_script_source(&self, script_id: &str) -> Result<Value, Error> {
        self.send("Debugger", "getScriptSource", Some(json!({ "scriptId": script_id }))).await
    }

    // -- Runtime ----------------------------------------------------------

    pub async fn runtime_evaluate(&self, expression: &str) -> Result<Value, Error> {
        self.send(
            "Runtime",
            "evaluate",
            Some(json!({ "expression": expression, "generatePreview": true })),
        )
        .await
    }

    pub async fn runtime_get_properties(&self, object_id: &str) -> Result<Value, Error> {
        self.send(
            "Runtime",
            "getProperties",
            Some(json!({ "objectId": object_id, "ownProperties": true })),
        )
        .await
    }

    pub async fn runtime_run_if_waiting_for_debugger(&self) -> Result<Value, Error> {
        self.send("Runtime", "runIfWaitingForDebugger", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_is_only_attached_when_present() {
        let params = json!({ "location": { "scriptId": "1", "lineNumber": 3 } });
        assert!(params.get("condition").is_none());
    }
}
