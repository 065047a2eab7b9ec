// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Child process creation

use crate::error::{DaemonError, Result};
use std::ffi::OsString;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};

/// Everything needed to start one child
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    /// Full argument vector, `args[0]` is the program
    pub args: &'a [OsString],
    /// Complete child environment (nothing else is inherited)
    pub env: &'a [(OsString, OsString)],
    /// Append child stdout/stderr here instead of inheriting them
    pub log_file: Option<&'a Path>,
}

/// How a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: u32,
    /// `None` when the child was terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
}

impl ChildExit {
    fn from_status(pid: u32, status: ExitStatus) -> Self {
        Self {
            pid,
            code: status.code(),
            success: status.success(),
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

pub trait ChildHandle {
    fn id(&self) -> u32;

    /// Block until the child exits. Intentionally unbounded.
    fn wait(&mut self) -> Result<ChildExit>;
}

impl ChildHandle for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn wait(&mut self) -> Result<ChildExit> {
        let pid = Child::id(self);
        Child::wait(self)
            .map(|status| ChildExit::from_status(pid, status))
            .map_err(|source| DaemonError::Wait { pid, source })
    }
}

/// Creates child processes for the supervisor
pub trait Spawner {
    type Child: ChildHandle;

    fn spawn(&mut self, request: &SpawnRequest<'_>) -> Result<Self::Child>;
}

/// Spawns real OS processes through `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandSpawner;

impl Spawner for CommandSpawner {
    type Child = Child;

    fn spawn(&mut self, request: &SpawnRequest<'_>) -> Result<Child> {
        let Some((program, rest)) = request.args.split_first() else {
            return Err(DaemonError::Spawn {
                program: PathBuf::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "empty argument vector",
                ),
            });
        };

        let mut command = Command::new(program);
        command
            .args(rest)
            .env_clear()
            .envs(request.env.iter().map(|(key, value)| (key, value)));

        if let Some(path) = request.log_file {
            // A sink that cannot be opened is fatal, output is never dropped silently
            let sink = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| DaemonError::LogSink {
                    path: path.to_path_buf(),
                    source,
                })?;
            let sink_err = sink.try_clone().map_err(|source| DaemonError::LogSink {
                path: path.to_path_buf(),
                source,
            })?;
            command.stdout(sink).stderr(sink_err);
        }

        command.spawn().map_err(|source| DaemonError::Spawn {
            program: PathBuf::from(program),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn path_env() -> Vec<(OsString, OsString)> {
        std::env::var_os("PATH")
            .map(|path| vec![(OsString::from("PATH"), path)])
            .unwrap_or_default()
    }

    #[test]
    fn test_empty_args_is_spawn_error() {
        let request = SpawnRequest {
            args: &[],
            env: &[],
            log_file: None,
        };
        let result = CommandSpawner.spawn(&request);
        assert!(matches!(result, Err(DaemonError::Spawn { .. })));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let args = os(&["/nonexistent/relaunch-test-binary"]);
        let request = SpawnRequest {
            args: &args,
            env: &[],
            log_file: None,
        };
        let err = CommandSpawner.spawn(&request).unwrap_err();
        match err {
            DaemonError::Spawn { program, .. } => {
                assert_eq!(program, PathBuf::from("/nonexistent/relaunch-test-binary"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unopenable_log_sink_fails_hard() {
        let args = os(&["sh", "-c", "exit 0"]);
        let env = path_env();
        let request = SpawnRequest {
            args: &args,
            env: &env,
            log_file: Some(Path::new("/nonexistent/dir/child.log")),
        };
        let result = CommandSpawner.spawn(&request);
        assert!(matches!(result, Err(DaemonError::LogSink { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_redirected_to_log_sink() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("child.log");
        std::fs::write(&log, "previous\n").unwrap();

        let args = os(&["sh", "-c", "echo out; echo err >&2; exit 3"]);
        let env = path_env();
        let request = SpawnRequest {
            args: &args,
            env: &env,
            log_file: Some(&log),
        };

        let mut child = CommandSpawner.spawn(&request).unwrap();
        let exit = ChildHandle::wait(&mut child).unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.starts_with("previous\n"));
        assert!(content.contains("out"));
        assert!(content.contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn test_environment_is_explicit() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("env.log");

        let args = os(&["sh", "-c", "echo marker=$RELAUNCH_TEST_MARKER"]);
        let mut env = path_env();
        env.push(("RELAUNCH_TEST_MARKER".into(), "7".into()));
        let request = SpawnRequest {
            args: &args,
            env: &env,
            log_file: Some(&log),
        };

        let mut child = CommandSpawner.spawn(&request).unwrap();
        assert!(ChildHandle::wait(&mut child).unwrap().success);
        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.trim(), "marker=7");
    }

    #[test]
    fn test_child_exit_display() {
        let exited = ChildExit {
            pid: 1,
            code: Some(2),
            success: false,
        };
        assert_eq!(exited.to_string(), "exit status 2");

        let signalled = ChildExit {
            pid: 1,
            code: None,
            success: false,
        };
        assert_eq!(signalled.to_string(), "terminated by signal");
    }
}
