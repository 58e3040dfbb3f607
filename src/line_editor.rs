//! Line editor adapter: treated as an external collaborator with a narrow
//! contract — prompt
//! setting, line events, SIGINT, history. Two implementations: an
//! interactive `rustyline` editor for TTYs, and a plain buffered-stdin
//! reader for `NODE_NO_READLINE=1` / non-TTY pipes.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::error::Error;

/// A line of input, or the two ways a read can end without one.
pub enum LineEvent {
    Line(String),
    Interrupted,
    Eof,
}

pub trait LineEditor {
    fn set_prompt(&mut self, prompt: &str);
    fn readline(&mut self) -> Result<LineEvent, Error>;
    fn add_history(&mut self, line: &str);
}

/// Interactive TTY editor. Blocking by nature (`rustyline` has no async
/// API); the REPL loop moves it onto `spawn_blocking` for each read so a
/// pending keystroke doesn't stall the rest of the event loop (see
/// `repl::Editor::readline`).
pub struct TtyLineEditor {
    editor: DefaultEditor,
    prompt: String,
}

impl TtyLineEditor {
    pub fn new() -> Result<Self, Error> {
        let editor = DefaultEditor::new().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { editor, prompt: String::new() })
    }
}

impl LineEditor for TtyLineEditor {
    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
    }

    fn readline(&mut self) -> Result<LineEvent, Error> {
        match self.editor.readline(&self.prompt) {
            Ok(line) => Ok(LineEvent::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(LineEvent::Interrupted),
            Err(ReadlineError::Eof) => Ok(LineEvent::Eof),
            Err(e) => Err(Error::Internal(e.to_string())),
        }
    }

    fn add_history(&mut self, line: &str) {
        let _ = self.editor.add_history_entry(line);
    }
}

/// `NODE_NO_READLINE=1`: a plain line reader over stdin with no prompt
/// echo, no editing, no history — just the next `\n`-terminated line.
pub struct PlainLineEditor {
    reader: BufReader<tokio::io::Stdin>,
}

impl PlainLineEditor {
    pub fn new() -> Self {
        Self { reader: BufReader::new(tokio::io::stdin()) }
    }

    pub async fn readline_async(&mut self) -> Result<LineEvent, Error> {
        read_one_line(&mut self.reader).await
    }
}

impl Default for PlainLineEditor {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads one `\n`-terminated line, stripping the trailing `\r\n`/`\n`.
/// Shared by [`PlainLineEditor`] and its tests, which exercise it over an
/// in-memory buffer instead of real stdin.
async fn read_one_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<LineEvent, Error> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(LineEvent::Eof);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(LineEvent::Line(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_editor_strips_trailing_newline() {
        let mut reader = BufReader::new(std::io::Cursor::new(b"hello\n".to_vec()));
        match read_one_line(&mut reader).await.unwrap() {
            LineEvent::Line(l) => assert_eq!(l, "hello"),
            _ => panic!("expected a line"),
        }
    }

    #[tokio::test]
    async fn empty_read_is_eof() {
        let mut reader = BufReader::new(std::io::Cursor::new(Vec::new()));
        assert!(matches!(read_one_line(&mut reader).await.unwrap(), LineEvent::Eof));
    }
}
