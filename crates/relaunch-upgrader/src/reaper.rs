// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Startup cleanup of orphaned instances of the same application
//!
//! A handover that went wrong can leave a previous generation running next to
//! the new one. At startup every process whose command is the application, that
//! has been running longer than a grace period, and that is neither this process
//! nor its parent receives `SIGTERM`.

use crate::error::{Result, UpgradeError};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Linux keeps at most this many characters of a command name
const COMM_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub elapsed: Duration,
    pub command: String,
}

pub trait ProcessLister {
    fn list(&self) -> Result<Vec<ProcessEntry>>;
}

/// Reads the process table through `ps`
#[derive(Debug, Clone, Copy, Default)]
pub struct PsLister;

impl ProcessLister for PsLister {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=,etime=,comm="])
            .output()
            .map_err(|e| UpgradeError::ProcessList(format!("cannot run ps: {e}")))?;

        if !output.status.success() {
            return Err(UpgradeError::ProcessList(format!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub trait Signaller {
    fn terminate(&self, pid: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SigtermSignaller;

impl Signaller for SigtermSignaller {
    fn terminate(&self, pid: u32) -> Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| UpgradeError::ProcessList(format!("pid {pid} out of range")))?;
        signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
            .map_err(|e| UpgradeError::ProcessList(format!("SIGTERM to {pid} failed: {e}")))
    }
}

/// Parse `pid etime comm` lines, skipping anything malformed
pub fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let entry = parse_ps_line(line);
            if entry.is_none() && !line.trim().is_empty() {
                tracing::debug!("Skipping process entry: {line}");
            }
            entry
        })
        .collect()
}

fn parse_ps_line(line: &str) -> Option<ProcessEntry> {
    let (pid, rest) = line.trim().split_once(char::is_whitespace)?;
    let (etime, command) = rest.trim_start().split_once(char::is_whitespace)?;
    let command = command.trim();
    if command.is_empty() {
        return None;
    }

    Some(ProcessEntry {
        pid: pid.parse().ok()?,
        elapsed: parse_elapsed(etime)?,
        command: command.to_owned(),
    })
}

/// Parse an elapsed running time: `MM:SS`, `HH:MM:SS`, `D-HH:MM:SS` or `HhMM`
pub fn parse_elapsed(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Some((hours, minutes)) = value.split_once('h') {
        let hours: u64 = hours.parse().ok()?;
        let minutes: u64 = minutes.parse().ok()?;
        return clock_seconds(0, hours, minutes, 0).map(Duration::from_secs);
    }

    let (days, clock) = match value.split_once('-') {
        Some((days, clock)) => (days.parse::<u64>().ok()?, clock),
        None => (0, value),
    };

    let parts = clock
        .split(':')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    let seconds = match *parts.as_slice() {
        [minutes, seconds] if days == 0 => clock_seconds(0, 0, minutes, seconds)?,
        [hours, minutes, seconds] => clock_seconds(days, hours, minutes, seconds)?,
        _ => return None,
    };

    Some(Duration::from_secs(seconds))
}

/// `None` when the total does not fit in a u64
fn clock_seconds(days: u64, hours: u64, minutes: u64, seconds: u64) -> Option<u64> {
    days.checked_mul(86_400)?
        .checked_add(hours.checked_mul(3600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// The command's file name is the application, possibly truncated by the kernel
pub fn command_matches(command: &str, app_name: &str) -> bool {
    let name = Path::new(command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command);

    name == app_name || (name.len() == COMM_LEN && app_name.starts_with(name))
}

pub fn select_stale_peers(
    entries: &[ProcessEntry],
    app_name: &str,
    self_pid: u32,
    parent_pid: u32,
    grace: Duration,
) -> Vec<u32> {
    entries
        .iter()
        .filter(|e| e.pid != self_pid && e.pid != parent_pid)
        .filter(|e| e.elapsed > grace)
        .filter(|e| command_matches(&e.command, app_name))
        .map(|e| e.pid)
        .collect()
}

/// Terminate stale peers, returning the pids that were signalled
pub fn reap_stale_peers(
    lister: &dyn ProcessLister,
    signaller: &dyn Signaller,
    app_name: &str,
    self_pid: u32,
    parent_pid: u32,
    grace: Duration,
) -> Result<Vec<u32>> {
    if app_name.is_empty() {
        return Err(UpgradeError::Config(
            "app_name is required to reap stale peers".to_owned(),
        ));
    }

    let entries = lister.list()?;
    let stale = select_stale_peers(&entries, app_name, self_pid, parent_pid, grace);

    let mut signalled = Vec::with_capacity(stale.len());
    for pid in stale {
        match signaller.terminate(pid) {
            Ok(()) => {
                tracing::info!("Terminated stale {app_name} process with PID: {pid}");
                signalled.push(pid);
            }
            Err(e) => tracing::warn!("Failed to terminate stale process {pid}: {e}"),
        }
    }
    Ok(signalled)
}

/// [`reap_stale_peers`] against the live process table, sparing this process and its parent
pub fn reap_with_system(app_name: &str, grace: Duration) -> Result<Vec<u32>> {
    let parent = u32::try_from(nix::unistd::getppid().as_raw()).unwrap_or(0);
    reap_stale_peers(
        &PsLister,
        &SigtermSignaller,
        app_name,
        std::process::id(),
        parent,
        grace,
    )
}
