use std::io::IsTerminal;
use std::process::ExitCode;

use cdbg::cli::{self, Invocation};
use cdbg::error::Error;
use cdbg::logging;
use cdbg::repl::Repl;

fn main() -> ExitCode {
    logging::init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build the current-thread runtime");

    let local = tokio::task::LocalSet::new();
    let code = local.block_on(&runtime, run());
    ExitCode::from(code as u8)
}

async fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match cli::parse(&args) {
        Ok(Invocation::Version) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            0
        }
        Ok(Invocation::Run { target, port }) => match run_session(target, port).await {
            Ok(code) => code,
            Err(e) => report_error(&e),
        },
        Err(e) => report_error(&e),
    }
}

async fn run_session(target: cdbg::child::Target, port: u16) -> Result<i32, Error> {
    let (mut repl, shutdown) = Repl::new(target, port, use_readline())?;
    install_signal_handlers(shutdown);
    repl.start().await?;
    repl.run().await
}

/// Decides which [`cdbg::line_editor`] implementation backs the REPL.
/// `NODE_NO_READLINE=1` always wins (non-interactive, for scripted/piped
/// input). Otherwise the choice follows stdout's TTY-ness, same as the
/// terminal's own auto-detection — except `NODE_FORCE_READLINE=1`, which
/// forces the interactive `rustyline` editor even when stdout is not a
/// TTY. That forced case is the one spec.md §6 calls out as needing
/// process SIGINT mapped into a line-editor interrupt event; `rustyline`
/// already delivers that by reading termios state off stdin directly
/// (independent of stdout), so no extra signal wiring is needed here
/// beyond forcing the interactive path on.
fn use_readline() -> bool {
    if std::env::var("NODE_NO_READLINE").as_deref() == Ok("1") {
        return false;
    }
    if std::env::var("NODE_FORCE_READLINE").as_deref() == Ok("1") {
        return true;
    }
    std::io::stdout().is_terminal()
}

fn report_error(e: &Error) -> i32 {
    eprintln!("{e}");
    e.exit_code()
}

/// SIGTERM/SIGHUP always trigger child kill + client reset; the REPL's own
/// `Ctrl-C` handling in debug mode is a separate, in-band path (a
/// line-editor interrupt, not a process signal). Signals request shutdown
/// through `shutdown`, the same path `Repl::run` takes for `kill` and EOF,
/// rather than calling `std::process::exit` here, which would unwind past
/// `Repl` without running its (or `ChildProcess`'s) destructors.
#[cfg(unix)]
fn install_signal_handlers(shutdown: cdbg::repl::ShutdownHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [SignalKind::terminate(), SignalKind::hangup()] {
        if let Ok(mut stream) = signal(kind) {
            let shutdown = shutdown.clone();
            tokio::task::spawn_local(async move {
                stream.recv().await;
                shutdown.request();
            });
        }
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_shutdown: cdbg::repl::ShutdownHandle) {}

#[cfg(test)]
mod tests {
    use super::*;

    // This binary's test target runs in its own process, so mutating
    // process-wide env vars here doesn't race with other test targets.
    #[test]
    fn node_no_readline_always_wins() {
        std::env::set_var("NODE_NO_READLINE", "1");
        std::env::set_var("NODE_FORCE_READLINE", "1");
        assert!(!use_readline());
        std::env::remove_var("NODE_NO_READLINE");
        std::env::remove_var("NODE_FORCE_READLINE");
    }

    #[test]
    fn node_force_readline_overrides_tty_detection() {
        std::env::remove_var("NODE_NO_READLINE");
        std::env::set_var("NODE_FORCE_READLINE", "1");
        assert!(use_readline());
        std::env::remove_var("NODE_FORCE_READLINE");
    }
}
