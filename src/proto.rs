//! CDTP message shapes. The schema of individual domains' `params`/`result`
//! bodies is intentionally out of scope — everything below treats those
//! bodies as opaque `serde_json::Value` except for the handful of event
//! payloads the session cares about.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// A decoded inbound message: either a response to one of our requests, or
/// an event pushed by the target. `id` is only `Some` on responses — id `0`
/// never appears on a response, and a message with neither `id` nor
/// `method` is itself a protocol error the caller raises.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

/// `Debugger.scriptParsed`'s fields this core actually consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptParsedEvent {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    #[serde(rename = "lineNumber")]
    pub line_number: u32,
    #[serde(rename = "columnNumber", default)]
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallFrameWire {
    #[serde(rename = "callFrameId")]
    pub call_frame_id: String,
    #[serde(rename = "functionName")]
    pub function_name: String,
    pub location: Location,
    #[serde(rename = "scopeChain", default)]
    pub scope_chain: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PausedEvent {
    #[serde(rename = "callFrames")]
    pub call_frames: Vec<CallFrameWire>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakpointResolvedEvent {
    #[serde(rename = "breakpointId")]
    pub breakpoint_id: String,
    pub location: Location,
}
