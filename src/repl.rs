//! The REPL command surface: control/debug mode switching, the verb table,
//! `lastCommand` repeat, suspend-while-rendering.
//!
//! Control mode reads like a small expression language whose bindings are
//! the command verbs, but there is no general-purpose value sandbox in
//! this core. Instead control mode is a direct `verb(args...)` call-syntax
//! parser: the same surface, without carrying along a general-purpose
//! expression language nothing else in this crate needs.

use std::fmt::Write as _;

use tokio::sync::mpsc;

use crate::agent::Agent;
use crate::child::{connect_with_retry, ChildProcess, Target};
use crate::client::{Client, ClientEvent};
use crate::error::Error;
use crate::format;
use crate::line_editor::{LineEvent, PlainLineEditor, TtyLineEditor};
use crate::session::{BreakpointRequest, PauseOnExceptions, Session};

const CONTROL_PROMPT: &str = "debug> ";
const DEBUG_PROMPT: &str = "> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Control,
    Debug,
}

enum Arg {
    Str(String),
    Num(i64),
}

impl Arg {
    fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            Arg::Num(_) => None,
        }
    }

    fn as_num(&self) -> Option<i64> {
        match self {
            Arg::Num(n) => Some(*n),
            Arg::Str(s) => s.parse().ok(),
        }
    }
}

/// Splits `verb(a, "b", 3)` into `("verb", [Arg::Str("b"), Arg::Num(3)]...)`.
/// A bare verb with no parens parses to zero args.
fn parse_command(line: &str) -> (String, Vec<Arg>) {
    let line = line.trim();
    let paren = line.find('(');
    let (verb, rest) = match paren {
        Some(idx) => (line[..idx].trim().to_string(), &line[idx + 1..]),
        None => return (line.to_string(), Vec::new()),
    };
    let inner = rest.strip_suffix(')').unwrap_or(rest);
    if inner.trim().is_empty() {
        return (verb, Vec::new());
    }

    let mut args = Vec::new();
    for part in split_top_level_commas(inner) {
        let part = part.trim();
        if let Some(stripped) = part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
            args.push(Arg::Str(stripped.to_string()));
        } else if let Some(stripped) = part.strip_prefix('\'').and_then(|p| p.strip_suffix('\'')) {
            args.push(Arg::Str(stripped.to_string()));
        } else if let Ok(n) = part.parse::<i64>() {
            args.push(Arg::Num(n));
        } else {
            args.push(Arg::Str(part.to_string()));
        }
    }
    (verb, args)
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

enum Editor {
    // `Option` so a read can move the editor onto a blocking-pool thread
    // and hand it back afterward; `None` only while such a read is in
    // flight (see `Editor::readline`).
    Tty(Option<TtyLineEditor>),
    Plain(PlainLineEditor),
}

impl Editor {
    async fn readline(&mut self, prompt: &str) -> Result<LineEvent, Error> {
        match self {
            // rustyline has no async API. Running it inline would block
            // the current-thread runtime for the duration of one
            // keystroke-driven read, freezing the protocol client's
            // receive loop, the child stdio pump, and event dispatch until
            // Enter is hit. Moving it onto `spawn_blocking` keeps those
            // running while the prompt sits idle.
            Editor::Tty(slot) => {
                let mut editor = slot.take().expect("tty editor missing between reads");
                let prompt = prompt.to_string();
                let (editor, result) = tokio::task::spawn_blocking(move || {
                    editor.set_prompt(&prompt);
                    let result = crate::line_editor::LineEditor::readline(&mut editor);
                    (editor, result)
                })
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
                *slot = Some(editor);
                result
            }
            Editor::Plain(editor) => editor.readline_async().await,
        }
    }

    fn add_history(&mut self, line: &str) {
        if let Editor::Tty(Some(editor)) = self {
            crate::line_editor::LineEditor::add_history(editor, line);
        }
    }
}

pub struct Repl {
    session: Session,
    client: Client,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    child: Option<ChildProcess>,
    target: Target,
    port: u16,
    mode: Mode,
    editor: Editor,
    colorize: bool,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

/// A cloneable handle that asks the REPL to shut down (child kill + client
/// reset) from outside its own input loop. Used to route SIGTERM/SIGHUP
/// into the same shutdown path as the `kill` verb and a plain EOF, instead
/// of calling `std::process::exit` from a signal handler and skipping
/// `Repl`'s and its fields' destructors.
#[derive(Clone)]
pub struct ShutdownHandle(mpsc::UnboundedSender<()>);

impl ShutdownHandle {
    pub fn request(&self) {
        let _ = self.0.send(());
    }
}

impl Repl {
    pub fn new(target: Target, port: u16, use_readline: bool) -> Result<(Self, ShutdownHandle), Error> {
        let (client, events_rx) = Client::new(remote_host(&target), port);
        let editor = if use_readline {
            Editor::Tty(Some(TtyLineEditor::new()?))
        } else {
            Editor::Plain(PlainLineEditor::new())
        };
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let repl = Self {
            session: Session::new(),
            client,
            events_rx,
            child: None,
            target,
            port,
            mode: Mode::Control,
            editor,
            colorize: std::env::var("NODE_DISABLE_COLORS").as_deref() != Ok("1"),
            shutdown_rx,
        };
        Ok((repl, ShutdownHandle(shutdown_tx)))
    }

    fn prompt(&self) -> &'static str {
        match self.mode {
            Mode::Control => CONTROL_PROMPT,
            Mode::Debug => DEBUG_PROMPT,
        }
    }

    /// Brings the target up (spawn or attach) and connects the protocol
    /// client, retrying on failure.
    pub async fn start(&mut self) -> Result<(), Error> {
        if let Target::Spawn { program, args } = &self.target {
            let child = ChildProcess::spawn(program, args, self.port).await?;
            self.child = Some(child);
        }
        connect_with_retry(&mut self.client).await?;
        self.drain_ready_event().await
    }

    async fn drain_ready_event(&mut self) -> Result<(), Error> {
        match self.events_rx.recv().await {
            Some(ClientEvent::Ready) => Ok(()),
            Some(ClientEvent::Error(message)) => Err(Error::Protocol(message)),
            _ => Err(Error::ConnectionReset),
        }
    }

    /// Main loop: read a line, handle it, repeat — interleaved with
    /// protocol events arriving from the client's receive task.
    pub async fn run(&mut self) -> Result<i32, Error> {
        loop {
            let prompt = self.prompt();
            tokio::select! {
                line = self.editor.readline(prompt) => {
                    match line? {
                        LineEvent::Eof => {
                            self.shutdown().await;
                            return Ok(0);
                        }
                        LineEvent::Interrupted => {
                            if self.mode == Mode::Debug {
                                self.exit_debug_mode();
                                continue;
                            }
                            self.shutdown().await;
                            return Ok(0);
                        }
                        LineEvent::Line(raw) => {
                            if let Some(code) = self.handle_line(raw).await? {
                                return Ok(code);
                            }
                        }
                    }
                }
                event = self.events_rx.recv() => {
                    self.handle_client_event(event).await;
                }
                Some(line) = child_output(&mut self.child) => {
                    println!("< {line}");
                }
                _ = self.shutdown_rx.recv() => {
                    self.shutdown().await;
                    return Ok(0);
                }
            }
        }
    }

    /// Child kill + client reset, the cleanup every quit path (`kill`, EOF,
    /// Ctrl-C at the top level, SIGTERM, SIGHUP) must run before the REPL
    /// returns, so `ChildProcess`'s `kill_on_drop` isn't the only thing
    /// standing between a quit and an orphaned target.
    async fn shutdown(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.kill().await;
        }
        self.client.reset();
    }

    async fn handle_client_event(&mut self, event: Option<ClientEvent>) {
        match event {
            Some(ClientEvent::Protocol(ev)) => {
                let update = self.session.handle_event(&ev.method, ev.params);
                self.render_update(update).await;
            }
            Some(ClientEvent::Close) => {
                println!("< program terminated");
            }
            Some(ClientEvent::Error(message)) => {
                println!("< {message}");
            }
            Some(ClientEvent::Ready) | None => {}
        }
    }

    async fn render_update(&mut self, update: crate::session::Update) {
        match update {
            crate::session::Update::Paused { break_line } => {
                println!("{break_line}");
                self.render_watchers().await;
            }
            crate::session::Update::BreakpointResolved(bp) => {
                if let Some(url) = &bp.location.script_url {
                    println!("breakpoint resolved at {url}:{}", bp.location.line_number + 1);
                }
            }
            _ => {}
        }
    }

    async fn render_watchers(&mut self) {
        if self.session.watchers().is_empty() {
            return;
        }
        let Some(frame) = self.session.selected_frame().cloned() else { return };
        let agent = Agent::new(&self.client);
        let exprs: Vec<String> = self.session.watchers().to_vec();
        for (i, expr) in exprs.iter().enumerate() {
            let rendered = match agent.debugger_evaluate_on_call_frame(&frame.call_frame_id, expr).await {
                Ok(value) => {
                    let result = value.get("result").cloned().unwrap_or(value);
                    format::render_remote_object(&result)
                }
                Err(e) => format!("<{}>", e),
            };
            println!("{}", format::render_watcher_line(i, expr, &rendered));
        }
    }

    /// Handles one input line; returns `Some(exit_code)` to end the REPL.
    async fn handle_line(&mut self, raw: String) -> Result<Option<i32>, Error> {
        if self.mode == Mode::Debug {
            return self.handle_debug_line(raw).await;
        }

        let line = if raw.trim().is_empty() { self.session.last_command().to_string() } else { raw.clone() };
        if line.trim().is_empty() {
            return Ok(None);
        }
        self.editor.add_history(&raw);

        let line = rewrite_bare_exec(&line);
        self.session.set_last_command(line.clone());
        self.session.history_mut().control.push(line.clone());

        let (verb, args) = parse_command(&line);
        self.dispatch_control(&verb, args).await
    }

    async fn handle_debug_line(&mut self, raw: String) -> Result<Option<i32>, Error> {
        self.editor.add_history(&raw);
        self.session.history_mut().debug.push(raw.clone());
        let agent = Agent::new(&self.client);

        let result = if let Some(frame) = self.session.selected_frame() {
            agent.debugger_evaluate_on_call_frame(&frame.call_frame_id.clone(), &raw).await
        } else {
            agent.runtime_evaluate(&raw).await
        };

        match result {
            Ok(value) => {
                let result = value.get("result").cloned().unwrap_or(value.clone());
                if value.get("exceptionDetails").is_some() {
                    let class_name = result.get("className").and_then(serde_json::Value::as_str).unwrap_or("Error");
                    let description = result.get("description").and_then(serde_json::Value::as_str).unwrap_or_default();
                    let (_, message) = format::render_thrown(class_name, description);
                    println!("Uncaught {message}");
                } else {
                    println!("{}", format::render_remote_object(&result));
                }
            }
            Err(e) => println!("{e}"),
        }
        Ok(None)
    }

    fn exit_debug_mode(&mut self) {
        self.mode = Mode::Control;
    }

    async fn dispatch_control(&mut self, verb: &str, args: Vec<Arg>) -> Result<Option<i32>, Error> {
        match verb {
            "run" => { /* already running by the time the REPL starts */ }
            "restart" => self.restart().await?,
            "kill" => {
                self.shutdown().await;
                return Ok(Some(0));
            }
            "cont" | "c" => {
                let result = Agent::new(&self.client).debugger_resume().await;
                self.run_resume(result).await;
            }
            "next" | "n" => {
                let result = Agent::new(&self.client).debugger_step_over().await;
                self.run_resume(result).await;
            }
            "step" | "s" => {
                let result = Agent::new(&self.client).debugger_step_into().await;
                self.run_resume(result).await;
            }
            "out" | "o" => {
                let result = Agent::new(&self.client).debugger_step_out().await;
                self.run_resume(result).await;
            }
            "pause" => {
                let _ = Agent::new(&self.client).debugger_pause().await;
            }
            "backtrace" | "bt" => self.print_backtrace(),
            "list" => self.print_list(args.first().and_then(Arg::as_num).unwrap_or(5) as u32).await?,
            "setBreakpoint" | "sb" => self.set_breakpoint(args).await?,
            "clearBreakpoint" | "cb" => self.clear_breakpoint(args).await?,
            "breakpoints" => self.print_breakpoints(),
            "breakOnException" => self.set_pause_on_exceptions(PauseOnExceptions::All).await,
            "breakOnUncaught" => self.set_pause_on_exceptions(PauseOnExceptions::Uncaught).await,
            "breakOnNone" => self.set_pause_on_exceptions(PauseOnExceptions::None).await,
            "watch" => {
                if let Some(expr) = args.first().and_then(Arg::as_str) {
                    self.session.watch(expr.to_string());
                }
            }
            "unwatch" => {
                if let Some(needle) = args.first().and_then(Arg::as_str) {
                    self.session.unwatch(needle);
                }
            }
            "watchers" => self.render_watchers().await,
            "exec" => {
                if let Some(expr) = args.first().and_then(Arg::as_str) {
                    let expr = expr.to_string();
                    self.handle_debug_line(expr).await?;
                }
            }
            "repl" => self.mode = Mode::Debug,
            "scripts" => self.print_scripts(),
            "version" => println!("{}", env!("CARGO_PKG_VERSION")),
            "help" => self.print_help(),
            other if !other.is_empty() => println!("unknown command: {other}"),
            _ => {}
        }
        Ok(None)
    }

    async fn run_resume(&mut self, result: Result<serde_json::Value, Error>) {
        if let Err(e) = result {
            println!("{e}");
        }
    }

    async fn restart(&mut self) -> Result<(), Error> {
        if let Some(child) = self.child.as_mut() {
            child.kill().await;
        }
        self.client.reset();
        self.session.clear_on_restart();

        if let Target::Spawn { program, args } = &self.target {
            self.child = Some(ChildProcess::spawn(program, args, self.port).await?);
        }
        connect_with_retry(&mut self.client).await?;
        self.drain_ready_event().await?;
        self.reissue_breakpoints().await;
        Ok(())
    }

    async fn reissue_breakpoints(&mut self) {
        let agent = Agent::new(&self.client);
        for location in self.session.breakpoints_to_reissue() {
            let Some(url) = &location.script_url else { continue };
            let escaped = regex::escape(url);
            let pattern = format!(r"^(.*[\/\\])?{escaped}$");
            let _ = agent.debugger_set_breakpoint_by_url(&pattern, location.line_number, None).await;
        }
    }

    fn print_backtrace(&self) {
        for (i, frame) in self.session.backtrace().iter().enumerate() {
            let url = frame
                .location
                .script_id
                .as_deref()
                .and_then(|id| self.session.scripts().find(|s| s.script_id == id))
                .map(|s| s.url.as_str())
                .unwrap_or("");
            println!(
                "{}",
                format::render_backtrace_frame(i, &frame.function_name, url, frame.location.line_number + 1)
            );
        }
    }

    async fn print_list(&mut self, delta: u32) -> Result<(), Error> {
        let Some(frame) = self.session.selected_frame().cloned() else {
            println!("not paused");
            return Ok(());
        };
        let Some(script_id) = &frame.location.script_id else { return Ok(()) };
        let agent = Agent::new(&self.client);
        let source = agent.debugger_get_script_source(script_id).await?;
        let text = source.get("scriptSource").and_then(serde_json::Value::as_str).unwrap_or_default();
        let lines: Vec<&str> = text.lines().collect();

        let current_line = frame.location.line_number + 1;
        let (start, end) = self.session.list_window(current_line, delta, lines.len() as u32);
        let window: Vec<&str> = lines
            .iter()
            .skip(start.saturating_sub(1) as usize)
            .take((end - start + 1) as usize)
            .copied()
            .collect();
        let bp_lines: Vec<u32> = self
            .session
            .breakpoints()
            .iter()
            .filter(|b| b.location.script_id.as_deref() == Some(script_id.as_str()))
            .map(|b| b.location.line_number + 1)
            .collect();

        print!(
            "{}",
            format::render_source_window(
                &window,
                start,
                current_line,
                frame.location.column_number,
                &bp_lines,
                self.colorize,
            )
        );
        Ok(())
    }

    async fn set_breakpoint(&mut self, args: Vec<Arg>) -> Result<(), Error> {
        let agent = Agent::new(&self.client);
        if args.is_empty() {
            let Some(location) = self.session.breakpoint_at_current_location() else {
                println!("not paused");
                return Ok(());
            };
            let Some(script_id) = location.script_id else { return Ok(()) };
            let response = agent.debugger_set_breakpoint(&script_id, location.line_number, None).await?;
            self.record_breakpoint_response(response);
            return Ok(());
        }

        if let Some(line) = args[0].as_num() {
            if args.len() == 1 && matches!(args[0], Arg::Num(_)) {
                match self.session.breakpoint_at_line(line) {
                    Ok(location) => {
                        let Some(script_id) = location.script_id else { return Ok(()) };
                        let response =
                            agent.debugger_set_breakpoint(&script_id, location.line_number, None).await?;
                        self.record_breakpoint_response(response);
                    }
                    Err(message) => println!("{message}"),
                }
                return Ok(());
            }
        }

        let Some(name) = args[0].as_str() else { return Ok(()) };
        let line = args.get(1).and_then(Arg::as_num);
        let condition = args.get(2).and_then(Arg::as_str).map(|s| s.to_string());

        match self.session.breakpoint_by_name(name, line, condition.clone()) {
            BreakpointRequest::ByScriptId { script_id, line_number, condition } => {
                let response = agent
                    .debugger_set_breakpoint(&script_id, line_number, condition.as_deref())
                    .await?;
                self.record_breakpoint_response(response);
            }
            BreakpointRequest::ByUrlRegex { url_regex, line_number, condition } => {
                let response = agent
                    .debugger_set_breakpoint_by_url(&url_regex, line_number, condition.as_deref())
                    .await?;
                self.record_breakpoint_response(response);
            }
            BreakpointRequest::DebugExpression(expr) => {
                let _ = agent.runtime_evaluate(&format!("debug({expr})")).await;
            }
            BreakpointRequest::Ambiguous => println!("Script name is ambiguous"),
            BreakpointRequest::InvalidLine => println!("Line should be a positive value"),
        }
        Ok(())
    }

    fn record_breakpoint_response(&mut self, response: serde_json::Value) {
        let breakpoint_id =
            response.get("breakpointId").and_then(serde_json::Value::as_str).map(str::to_string);
        let locations = response.get("locations").or_else(|| response.get("actualLocation"));
        let line_number = locations
            .and_then(|l| l.get(0).unwrap_or(l).get("lineNumber"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        let script_id = locations
            .and_then(|l| l.get(0).unwrap_or(l).get("scriptId"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        self.session.record_breakpoint(
            breakpoint_id,
            crate::session::Location { script_id, script_url: None, line_number, column_number: None },
        );
    }

    async fn clear_breakpoint(&mut self, args: Vec<Arg>) -> Result<(), Error> {
        let Some(url_substring) = args.first().and_then(Arg::as_str) else { return Ok(()) };
        let Some(line) = args.get(1).and_then(Arg::as_num) else { return Ok(()) };
        let Some(bp) = self.session.find_breakpoint_to_clear(url_substring, line as u32) else {
            println!("Couldn't find breakpoint matching {url_substring}:{line}");
            return Ok(());
        };
        let Some(id) = bp.breakpoint_id.clone() else { return Ok(()) };
        let agent = Agent::new(&self.client);
        agent.debugger_remove_breakpoint(&id).await?;
        self.session.remove_breakpoint(&id);
        Ok(())
    }

    fn print_breakpoints(&self) {
        for (i, bp) in self.session.breakpoints().iter().enumerate() {
            let location = bp
                .location
                .script_url
                .as_deref()
                .unwrap_or("<unresolved>");
            println!("#{i} {location}:{}", bp.location.line_number + 1);
        }
    }

    async fn set_pause_on_exceptions(&mut self, state: PauseOnExceptions) {
        self.session.set_pause_on_exceptions(state);
        let agent = Agent::new(&self.client);
        let _ = agent.debugger_set_pause_on_exceptions(state.as_state()).await;
    }

    fn print_scripts(&self) {
        for script in self.session.scripts() {
            if !script.is_native {
                println!("{}", script.url);
            }
        }
    }

    fn print_help(&self) {
        println!(
            "run, restart, kill, cont(c), next(n), step(s), out(o), pause, backtrace(bt), \
             list, setBreakpoint(sb), clearBreakpoint(cb), breakpoints, breakOnException, \
             breakOnUncaught, breakOnNone, watch, unwatch, watchers, exec, repl, scripts, \
             version, help"
        );
    }
}

/// Polls the child's merged stdout/stderr line channel, or never resolves
/// if there is no child (remote-attach mode). Lets `select!` treat "no
/// child" and "child produced nothing yet" uniformly.
async fn child_output(child: &mut Option<ChildProcess>) -> Option<String> {
    match child {
        Some(child) => child.output_lines.recv().await,
        None => std::future::pending().await,
    }
}

fn remote_host(target: &Target) -> String {
    match target {
        Target::Spawn { .. } => "127.0.0.1".to_string(),
        Target::Remote { host, .. } => host.clone(),
    }
}

/// Bare `exec <anything>` rewrites to `exec("<anything>")` before parsing.
fn rewrite_bare_exec(line: &str) -> String {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("exec ") {
        let mut out = String::with_capacity(rest.len() + 7);
        out.push_str("exec(\"");
        for c in rest.chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            let _ = write!(out, "{c}");
        }
        out.push_str("\")");
        out
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_command_handles_bare_verbs_and_calls() {
        assert_eq!(parse_command("cont").0, "cont");
        let (verb, args) = parse_command(r#"sb("break.js", 6)"#);
        assert_eq!(verb, "sb");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].as_str(), Some("break.js"));
        assert_eq!(args[1].as_num(), Some(6));
    }

    #[test]
    fn parse_command_empty_parens_has_no_args() {
        let (verb, args) = parse_command("setBreakpoint()");
        assert_eq!(verb, "setBreakpoint");
        assert!(args.is_empty());
    }

    #[test]
    fn rewrite_bare_exec_quotes_and_escapes() {
        assert_eq!(rewrite_bare_exec(r#"exec foo("bar")"#), r#"exec("foo(\"bar\")")"#);
        assert_eq!(rewrite_bare_exec("cont"), "cont");
    }

    #[test]
    fn split_top_level_commas_ignores_nested_parens() {
        let parts = split_top_level_commas(r#""a, b", 3"#);
        assert_eq!(parts.len(), 2);
    }
}
