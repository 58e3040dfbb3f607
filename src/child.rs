//! Child-process lifecycle: spawn mode, remote mode, connection retry,
//! restart.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::client::Client;
use crate::error::Error;

const MAX_CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const LISTENING_MARKER: &str = "chrome-devtools://";

/// Where a session's target actually lives, decided once at CLI-parse time.
/// `Spawn` owns the child and must kill/respawn it on
/// `restart`; `Remote` never spawns anything.
pub enum Target {
    Spawn { program: String, args: Vec<String> },
    Remote { host: String, port: u16 },
}

pub struct ChildProcess {
    child: Child,
    pub output_lines: mpsc::UnboundedReceiver<String>,
}

impl ChildProcess {
    /// Spawns `program --inspect --debug-brk=<port> args...`, pipes its
    /// stdio to line channels, and resolves once `chrome-devtools://` has
    /// been seen on stderr (the target prints its devtools URL once the
    /// inspector is listening).
    pub async fn spawn(program: &str, args: &[String], port: u16) -> Result<Self, Error> {
        let mut command = Command::new(program);
        command
            .arg("--inspect")
            .arg(format!("--debug-brk={port}"))
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        tokio::task::spawn_local(pump_lines(stdout, output_tx.clone(), None));
        tokio::task::spawn_local(pump_lines(stderr, output_tx, Some(ready_tx)));

        ready_rx.await.map_err(|_| {
            Error::Protocol("target exited before printing its inspector URL".into())
        })?;

        Ok(Self { child, output_lines: output_rx })
    }

    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Reads `stream` line by line, forwarding each non-empty line to `tx`
/// (blank lines are dropped, per the child-output rendering rule). If
/// `ready` is `Some`, fires it the first time a line contains
/// [`LISTENING_MARKER`].
async fn pump_lines<R: tokio::io::AsyncRead + Unpin>(
    stream: R,
    tx: mpsc::UnboundedSender<String>,
    mut ready: Option<tokio::sync::oneshot::Sender<()>>,
) {
    let mut reader = BufReader::new(stream).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        if let Some(marker) = ready.take_if(|_| line.contains(LISTENING_MARKER)) {
            let _ = marker.send(());
        }
        if line.is_empty() {
            continue;
        }
        let _ = tx.send(line);
    }
}

/// Connects `client`, retrying up to [`MAX_CONNECT_ATTEMPTS`] times,
/// 500ms apart, printing a `.` to stdout between attempts. On exhaustion
/// returns `Error::ConnectionExhausted`.
pub async fn connect_with_retry(client: &mut Client) -> Result<(), Error> {
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match client.connect().await {
            Ok(()) => return Ok(()),
            Err(_) if attempt < MAX_CONNECT_ATTEMPTS => {
                print!(".");
                use std::io::Write;
                let _ = std::io::stdout().flush();
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(_) => {
                eprintln!(" failed to connect, please retry");
                return Err(Error::ConnectionExhausted);
            }
        }
    }
    unreachable!("loop always returns by the final attempt")
}

#[cfg(unix)]
pub fn signal_listen(pid: i32) -> Result<(), Error> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid), Signal::SIGUSR1).map_err(|errno| {
        if errno == nix::errno::Errno::ESRCH {
            Error::TargetNotFound(pid as u32)
        } else {
            Error::Io(std::io::Error::from(errno))
        }
    })
}

#[cfg(not(unix))]
pub fn signal_listen(_pid: i32) -> Result<(), Error> {
    Err(Error::Protocol("attach by pid is not supported on this platform".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pump_lines_fires_ready_only_once_on_marker() {
        let data = b"starting up\nDebugger listening on chrome-devtools://foo\nmore output\n".to_vec();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        pump_lines(std::io::Cursor::new(data), tx, Some(ready_tx)).await;

        assert!(ready_rx.await.is_ok());
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn pump_lines_drops_blank_lines() {
        let data = b"starting up\n\n\nmore output\n".to_vec();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pump_lines(std::io::Cursor::new(data), tx, None).await;

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["starting up".to_string(), "more output".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn signal_listen_reports_target_not_found_for_missing_pid() {
        // A pid this large is never a real process; nix::sys::signal::kill
        // returns ESRCH for it regardless of the caller's privileges.
        match signal_listen(i32::MAX) {
            Err(Error::TargetNotFound(pid)) => assert_eq!(pid, i32::MAX as u32),
            other => panic!("expected TargetNotFound, got {other:?}"),
        }
    }
}
