//! CLI argument parsing: the five invocation shapes. None of them fit
//! `clap`'s derive model cleanly — `-p <pid>` and `host:port` are
//! positional-shape dispatch, not named options — so this is a small
//! hand-rolled parser instead.

use crate::child::Target;
use crate::error::Error;

pub const DEFAULT_PORT: u16 = 9229;

pub enum Invocation {
    Run { target: Target, port: u16 },
    Version,
}

const USAGE: &str = "\
Usage: cdbg script.js
       cdbg <host>:<port>
       cdbg -p <pid>
       cdbg --port=<port> script.js
       cdbg --version";

pub fn parse(args: &[String]) -> Result<Invocation, Error> {
    if args.is_empty() {
        return Err(Error::Usage(USAGE.to_string()));
    }

    if args[0] == "--version" {
        return Ok(Invocation::Version);
    }

    if args[0] == "-p" {
        let pid_str = args.get(1).ok_or_else(|| Error::Usage(USAGE.to_string()))?;
        let pid: i32 = pid_str.parse().map_err(|_| Error::Usage(USAGE.to_string()))?;
        crate::child::signal_listen(pid)?;
        return Ok(Invocation::Run {
            target: Target::Remote { host: "127.0.0.1".to_string(), port: DEFAULT_PORT },
            port: DEFAULT_PORT,
        });
    }

    if let Some(port_str) = args[0].strip_prefix("--port=") {
        let port: u16 = port_str.parse().map_err(|_| Error::Usage(USAGE.to_string()))?;
        let program = args.get(1).ok_or_else(|| Error::Usage(USAGE.to_string()))?.clone();
        let script_args = args[2..].to_vec();
        return Ok(Invocation::Run {
            target: Target::Spawn { program, args: script_args },
            port,
        });
    }

    if let Some((host, port_str)) = args[0].split_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return Ok(Invocation::Run {
                target: Target::Remote { host: host.to_string(), port },
                port,
            });
        }
    }

    let program = args[0].clone();
    let script_args = args[1..].to_vec();
    Ok(Invocation::Run { target: Target::Spawn { program, args: script_args }, port: DEFAULT_PORT })
}

pub fn usage() -> &'static str {
    USAGE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_is_usage_error() {
        assert!(matches!(parse(&[]), Err(Error::Usage(_))));
    }

    #[test]
    fn version_flag() {
        assert!(matches!(parse(&args(&["--version"])).unwrap(), Invocation::Version));
    }

    #[test]
    fn host_port_shape() {
        match parse(&args(&["localhost:9229"])).unwrap() {
            Invocation::Run { target: Target::Remote { host, port }, .. } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 9229);
            }
            _ => panic!("expected Remote target"),
        }
    }

    #[test]
    fn explicit_port_spawn_shape() {
        match parse(&args(&["--port=9230", "script.js", "a", "b"])).unwrap() {
            Invocation::Run { target: Target::Spawn { program, args }, port } => {
                assert_eq!(program, "script.js");
                assert_eq!(args, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(port, 9230);
            }
            _ => panic!("expected Spawn target"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn pid_flag_shape_parses_pid_from_argument_after_flag() {
        // `-p <pid>` actually sends SIGUSR1 to the given pid (src/child.rs
        // `signal_listen`). Ignore it for our own pid first so the default
        // SIGUSR1 disposition (terminate) doesn't kill the test process;
        // sending to self is the only pid a test can safely target.
        unsafe {
            nix::sys::signal::signal(
                nix::sys::signal::Signal::SIGUSR1,
                nix::sys::signal::SigHandler::SigIgn,
            )
            .unwrap();
        }
        let own_pid = std::process::id().to_string();
        match parse(&args(&["-p", &own_pid])).unwrap() {
            Invocation::Run { target: Target::Remote { host, port }, port: top_port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, DEFAULT_PORT);
                assert_eq!(top_port, DEFAULT_PORT);
            }
            _ => panic!("expected Remote target"),
        }
    }

    #[test]
    fn pid_flag_missing_pid_is_usage_error() {
        assert!(matches!(parse(&args(&["-p"])), Err(Error::Usage(_))));
    }

    #[test]
    fn bare_script_shape_defaults_port() {
        match parse(&args(&["script.js"])).unwrap() {
            Invocation::Run { target: Target::Spawn { program, .. }, port } => {
                assert_eq!(program, "script.js");
                assert_eq!(port, DEFAULT_PORT);
            }
            _ => panic!("expected Spawn target"),
        }
    }
}
