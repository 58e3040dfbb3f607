//! Debugger session state: scripts, breakpoints, call-frames, watchers,
//! pause state. This module owns data only — the actual CDTP calls a
//! breakpoint/watch/list operation implies are issued by the REPL through
//! the agent proxy; everything here is synchronous and infallible except
//! where a user-facing diagnostic is warranted.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::proto::{BreakpointResolvedEvent, PausedEvent, ScriptParsedEvent};

/// Modules the target's runtime loads before user code; never a place a
/// user sets a breakpoint or expects to step into.
const NATIVE_URL_PREFIXES: &[&str] = &["internal/", "node:"];
const BOOTSTRAP_URL: &str = "bootstrap_node.js";

#[derive(Debug, Clone)]
pub struct Script {
    pub script_id: String,
    pub url: String,
    pub is_native: bool,
}

fn is_native_url(url: &str) -> bool {
    url == BOOTSTRAP_URL || NATIVE_URL_PREFIXES.iter().any(|p| url.starts_with(p))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub script_id: Option<String>,
    pub script_url: Option<String>,
    pub line_number: u32,
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub breakpoint_id: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
    pub scope_chain: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOnExceptions {
    None,
    Uncaught,
    All,
}

impl PauseOnExceptions {
    pub fn as_state(&self) -> &'static str {
        match self {
            PauseOnExceptions::None => "none",
            PauseOnExceptions::Uncaught => "uncaught",
            PauseOnExceptions::All => "all",
        }
    }
}

#[derive(Debug, Default)]
pub struct History {
    pub control: Vec<String>,
    pub debug: Vec<String>,
}

/// What a breakpoint request resolves to once matched against known
/// scripts, for the by-name form of "set a breakpoint".
pub enum BreakpointRequest {
    ByScriptId { script_id: String, line_number: u32, condition: Option<String> },
    ByUrlRegex { url_regex: String, line_number: u32, condition: Option<String> },
    DebugExpression(String),
    Ambiguous,
    InvalidLine,
}

/// Result of feeding one protocol event through [`Session::handle_event`].
/// The REPL decides what, if anything, to render/suspend for.
pub enum Update {
    ScriptParsed(Script),
    Paused { break_line: String },
    Resumed,
    BreakpointResolved(Breakpoint),
    Ignored,
}

pub struct Session {
    scripts: HashMap<String, Script>,
    breakpoints: Vec<Breakpoint>,
    backtrace: Vec<CallFrame>,
    selected_frame: Option<usize>,
    watchers: Vec<String>,
    pause_on_exceptions: PauseOnExceptions,
    paused: bool,
    last_command: String,
    history: History,
}

impl Session {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            breakpoints: Vec::new(),
            backtrace: Vec::new(),
            selected_frame: None,
            watchers: Vec::new(),
            pause_on_exceptions: PauseOnExceptions::None,
            paused: false,
            last_command: String::new(),
            history: History::default(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause_on_exceptions(&self) -> PauseOnExceptions {
        self.pause_on_exceptions
    }

    pub fn set_pause_on_exceptions(&mut self, state: PauseOnExceptions) {
        self.pause_on_exceptions = state;
    }

    pub fn last_command(&self) -> &str {
        &self.last_command
    }

    pub fn set_last_command(&mut self, command: String) {
        self.last_command = command;
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.scripts.values()
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn selected_frame(&self) -> Option<&CallFrame> {
        self.selected_frame.and_then(|i| self.backtrace.get(i))
    }

    pub fn backtrace(&self) -> &[CallFrame] {
        &self.backtrace
    }

    pub fn watchers(&self) -> &[String] {
        &self.watchers
    }

    /// Translates one inbound CDTP event into a state update.
    pub fn handle_event(&mut self, method: &str, params: Value) -> Update {
        match method {
            "Debugger.scriptParsed" => {
                if let Ok(ev) = serde_json::from_value::<ScriptParsedEvent>(params) {
                    let script = self.handle_script_parsed(ev);
                    Update::ScriptParsed(script)
                } else {
                    Update::Ignored
                }
            }
            "Debugger.paused" => {
                if let Ok(ev) = serde_json::from_value::<PausedEvent>(params) {
                    Update::Paused { break_line: self.handle_paused(ev) }
                } else {
                    Update::Ignored
                }
            }
            "Debugger.resumed" => {
                self.handle_resumed();
                Update::Resumed
            }
            "Debugger.breakpointResolved" => {
                if let Ok(ev) = serde_json::from_value::<BreakpointResolvedEvent>(params) {
                    Update::BreakpointResolved(self.handle_breakpoint_resolved(ev))
                } else {
                    Update::Ignored
                }
            }
            _ => Update::Ignored,
        }
    }

    fn handle_script_parsed(&mut self, ev: ScriptParsedEvent) -> Script {
        let script = Script {
            script_id: ev.script_id.clone(),
            url: ev.url.clone(),
            is_native: is_native_url(&ev.url),
        };
        self.scripts.insert(ev.script_id, script.clone());
        script
    }

    fn handle_paused(&mut self, ev: PausedEvent) -> String {
        self.paused = true;
        self.backtrace = ev
            .call_frames
            .into_iter()
            .map(|f| CallFrame {
                call_frame_id: f.call_frame_id,
                function_name: f.function_name,
                location: Location {
                    script_id: Some(f.location.script_id),
                    script_url: None,
                    line_number: f.location.line_number,
                    column_number: f.location.column_number,
                },
                scope_chain: f.scope_chain,
            })
            .collect();
        self.selected_frame = if self.backtrace.is_empty() { None } else { Some(0) };

        let break_kind = if ev.reason == "other" { "break".to_string() } else { ev.reason };
        let top = self.backtrace.first();
        let (url, line) = top
            .map(|f| {
                let url = f
                    .location
                    .script_id
                    .as_deref()
                    .and_then(|id| self.scripts.get(id))
                    .map(|s| s.url.clone())
                    .unwrap_or_default();
                (url, f.location.line_number + 1)
            })
            .unwrap_or_default();
        format!("{break_kind} in {url}:{line}")
    }

    fn handle_resumed(&mut self) {
        self.backtrace.clear();
        self.selected_frame = None;
    }

    fn handle_breakpoint_resolved(&mut self, ev: BreakpointResolvedEvent) -> Breakpoint {
        let script_url = self.scripts.get(&ev.location.script_id).map(|s| s.url.clone());
        let location = Location {
            script_id: Some(ev.location.script_id),
            script_url,
            line_number: ev.location.line_number,
            column_number: ev.location.column_number,
        };
        if let Some(existing) = self
            .breakpoints
            .iter_mut()
            .find(|b| b.breakpoint_id.as_deref() == Some(ev.breakpoint_id.as_str()))
        {
            existing.location = location.clone();
            return existing.clone();
        }
        let bp = Breakpoint { breakpoint_id: Some(ev.breakpoint_id), location };
        self.breakpoints.push(bp.clone());
        bp
    }

    /// Records the breakpoint a `setBreakpoint*` call returned an id and
    /// location for, outside of the `breakpointResolved` event path (the
    /// initial `setBreakpoint` response carries its own location).
    pub fn record_breakpoint(&mut self, breakpoint_id: Option<String>, location: Location) {
        self.breakpoints.push(Breakpoint { breakpoint_id, location });
    }

    /// Everything that does not survive a child restart: scripts and the
    /// call-frame backtrace. Breakpoints, watchers, history, and
    /// `pauseOnExceptions` persist across a restart.
    pub fn clear_on_restart(&mut self) {
        self.scripts.clear();
        self.backtrace.clear();
        self.selected_frame = None;
        self.paused = false;
    }

    /// Breakpoints worth re-issuing after a restart: anything with a known
    /// script url. `scriptId`-only breakpoints from the previous run are
    /// meaningless once scripts are cleared.
    pub fn breakpoints_to_reissue(&self) -> Vec<Location> {
        self.breakpoints
            .iter()
            .filter(|b| b.location.script_url.is_some())
            .map(|b| b.location.clone())
            .collect()
    }

    /// Shape 1: `setBreakpoint()` — requires paused state, uses the
    /// selected frame's own location.
    pub fn breakpoint_at_current_location(&self) -> Option<Location> {
        self.selected_frame().map(|f| f.location.clone())
    }

    /// Shape 2: `setBreakpoint(N)` — requires paused state, targets line
    /// `N` (1-based) of the current script.
    pub fn breakpoint_at_line(&self, line: i64) -> Result<Location, &'static str> {
        if line <= 0 {
            return Err("Line should be a positive value");
        }
        let frame = self.selected_frame().ok_or("not paused")?;
        Ok(Location {
            script_id: frame.location.script_id.clone(),
            script_url: None,
            line_number: (line - 1) as u32,
            column_number: None,
        })
    }

    /// Shape 3: `setBreakpoint(nameOrFn, line?, condition?)`.
    pub fn breakpoint_by_name(
        &self,
        name: &str,
        line: Option<i64>,
        condition: Option<String>,
    ) -> BreakpointRequest {
        if let Some(prefix) = name.strip_suffix("()") {
            return BreakpointRequest::DebugExpression(prefix.to_string());
        }

        let line_number = match line {
            Some(l) if l <= 0 => return BreakpointRequest::InvalidLine,
            Some(l) => (l - 1) as u32,
            None => 0,
        };

        let matches: Vec<&Script> =
            self.scripts.values().filter(|s| s.url.contains(name)).collect();

        match matches.len() {
            0 => {
                let escaped = regex::escape(name);
                BreakpointRequest::ByUrlRegex {
                    url_regex: format!(r"^(.*[\/\\])?{escaped}$"),
                    line_number,
                    condition,
                }
            }
            1 => BreakpointRequest::ByScriptId {
                script_id: matches[0].script_id.clone(),
                line_number,
                condition,
            },
            _ => BreakpointRequest::Ambiguous,
        }
    }

    /// Finds the first breakpoint whose script url contains
    /// `url_substring` and whose 1-based line equals `line`.
    pub fn find_breakpoint_to_clear(&self, url_substring: &str, line: u32) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|b| {
            b.location.line_number + 1 == line
                && b.location
                    .script_url
                    .as_deref()
                    .or_else(|| {
                        b.location
                            .script_id
                            .as_deref()
                            .and_then(|id| self.scripts.get(id))
                            .map(|s| s.url.as_str())
                    })
                    .is_some_and(|u| u.contains(url_substring))
        })
    }

    pub fn remove_breakpoint(&mut self, breakpoint_id: &str) {
        self.breakpoints.retain(|b| b.breakpoint_id.as_deref() != Some(breakpoint_id));
    }

    pub fn watch(&mut self, expr: String) {
        self.watchers.push(expr);
    }

    /// Removes by expression match first, numeric index second.
    pub fn unwatch(&mut self, needle: &str) -> bool {
        if let Some(pos) = self.watchers.iter().position(|w| w == needle) {
            self.watchers.remove(pos);
            return true;
        }
        if let Ok(index) = needle.parse::<usize>() {
            if index < self.watchers.len() {
                self.watchers.remove(index);
                return true;
            }
        }
        false
    }

    /// `list(delta)`'s line window, clamped to `[1, total_lines]`.
    pub fn list_window(&self, current_line: u32, delta: u32, total_lines: u32) -> (u32, u32) {
        let start = current_line.saturating_sub(delta).max(1);
        let end = (current_line + delta + 1).min(total_lines.max(1));
        (start, end)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles the anchored regex a url-regex breakpoint matches against, so
/// callers resolving `scriptParsed` against a pending url-regex breakpoint
/// don't have to re-derive the anchoring rule.
pub fn compile_url_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(id: &str, url: &str) -> ScriptParsedEvent {
        ScriptParsedEvent { script_id: id.to_string(), url: url.to_string() }
    }

    #[test]
    fn native_urls_are_flagged() {
        let mut session = Session::new();
        let parsed = session.handle_script_parsed(script("1", "internal/bootstrap/loaders.js"));
        assert!(parsed.is_native);
        let parsed = session.handle_script_parsed(script("2", "examples/break.js"));
        assert!(!parsed.is_native);
    }

    #[test]
    fn breakpoint_by_name_zero_matches_falls_back_to_url_regex() {
        let session = Session::new();
        match session.breakpoint_by_name("other.js", Some(3), None) {
            BreakpointRequest::ByUrlRegex { url_regex, line_number, .. } => {
                assert_eq!(line_number, 2);
                assert!(compile_url_regex(&url_regex).unwrap().is_match("examples/cjs/other.js"));
                assert!(!compile_url_regex(&url_regex).unwrap().is_match("examples/cjs/other.js.bak"));
            }
            _ => panic!("expected ByUrlRegex"),
        }
    }

    #[test]
    fn breakpoint_by_name_ambiguous_with_two_matches() {
        let mut session = Session::new();
        session.handle_script_parsed(script("1", "examples/a/shared.js"));
        session.handle_script_parsed(script("2", "examples/b/shared.js"));
        assert!(matches!(
            session.breakpoint_by_name("shared.js", None, None),
            BreakpointRequest::Ambiguous
        ));
    }

    #[test]
    fn breakpoint_by_name_single_match_targets_script_id() {
        let mut session = Session::new();
        session.handle_script_parsed(script("7", "examples/break.js"));
        match session.breakpoint_by_name("break.js", Some(6), None) {
            BreakpointRequest::ByScriptId { script_id, line_number, .. } => {
                assert_eq!(script_id, "7");
                assert_eq!(line_number, 5);
            }
            _ => panic!("expected ByScriptId"),
        }
    }

    #[test]
    fn breakpoint_by_name_nonpositive_line_is_invalid() {
        let session = Session::new();
        assert!(matches!(
            session.breakpoint_by_name("break.js", Some(0), None),
            BreakpointRequest::InvalidLine
        ));
        assert!(matches!(
            session.breakpoint_by_name("break.js", Some(-1), None),
            BreakpointRequest::InvalidLine
        ));
    }

    #[test]
    fn breakpoint_at_line_requires_positive_and_paused() {
        let session = Session::new();
        assert_eq!(session.breakpoint_at_line(0), Err("Line should be a positive value"));
        assert_eq!(session.breakpoint_at_line(-1), Err("Line should be a positive value"));
        assert_eq!(session.breakpoint_at_line(5), Err("not paused"));
    }

    #[test]
    fn breakpoint_resolved_dedupes_by_id() {
        let mut session = Session::new();
        let ev = BreakpointResolvedEvent {
            breakpoint_id: "bp1".into(),
            location: crate::proto::Location {
                script_id: "1".into(),
                line_number: 4,
                column_number: None,
            },
        };
        session.handle_breakpoint_resolved(ev.clone());
        session.handle_breakpoint_resolved(ev);
        assert_eq!(session.breakpoints().len(), 1);
    }

    #[test]
    fn watch_and_unwatch_by_expression_then_index() {
        let mut session = Session::new();
        session.watch("a.b".into());
        session.watch("c.d".into());
        assert!(session.unwatch("a.b"));
        assert_eq!(session.watchers(), &["c.d".to_string()]);
        assert!(session.unwatch("0"));
        assert!(session.watchers().is_empty());
    }

    #[test]
    fn list_window_clamps_to_start_of_file() {
        let session = Session::new();
        assert_eq!(session.list_window(2, 5, 100), (1, 8));
    }

    #[test]
    fn restart_clears_scripts_and_backtrace_not_breakpoints_or_watchers() {
        let mut session = Session::new();
        session.handle_script_parsed(script("1", "examples/a.js"));
        session.watch("x".into());
        session.record_breakpoint(
            Some("bp1".into()),
            Location { script_id: None, script_url: Some("a.js".into()), line_number: 3, column_number: None },
        );
        session.clear_on_restart();
        assert_eq!(session.scripts().count(), 0);
        assert_eq!(session.watchers().len(), 1);
        assert_eq!(session.breakpoints().len(), 1);
    }
}
