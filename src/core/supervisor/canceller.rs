//! Process tree termination
//!
//! Collects every descendant of a pid from the OS process table and signals
//! each one individually. Unix gets an interrupt first and a kill when a
//! tree outlives its grace period; Windows always gets a forced tree kill.
//! Per-pid failures are logged and otherwise ignored; a process that already
//! exited is not an error.

use std::collections::{HashMap, HashSet};
use std::process::{Command, Stdio};

/// Signal sent to each process of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSignal {
    /// SIGINT; the worker shuts down cleanly
    Interrupt,
    /// SIGKILL
    Kill,
}

impl TreeSignal {
    #[cfg_attr(not(unix), allow(dead_code))]
    fn kill_flag(self) -> &'static str {
        match self {
            TreeSignal::Interrupt => "-INT",
            TreeSignal::Kill => "-KILL",
        }
    }
}

/// Interrupts `pid` and all of its descendants. Returns how many pids were
/// signalled successfully.
pub fn kill_process_tree(pid: u32) -> usize {
    signal_process_tree(pid, TreeSignal::Interrupt)
}

/// Sends `sig` to `pid` and all of its descendants
pub fn signal_process_tree(pid: u32, sig: TreeSignal) -> usize {
    let table = match process_table() {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!(pid, error = %e, "Failed to read process table, signalling root only");
            Vec::new()
        }
    };

    let mut targets = vec![pid];
    targets.extend(descendants(&table, pid));

    let mut signalled = 0;
    for target in targets {
        match signal(target, sig) {
            Ok(()) => signalled += 1,
            Err(e) => tracing::warn!(pid = target, error = %e, "Failed to signal process"),
        }
    }
    signalled
}

/// All transitive children of `root` in `(pid, ppid)` pairs, parents first
pub fn descendants(table: &[(u32, u32)], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in table {
        children.entry(ppid).or_default().push(pid);
    }

    let mut seen = HashSet::from([root]);
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(parent) = stack.pop() {
        if let Some(kids) = children.get(&parent) {
            for &kid in kids {
                if seen.insert(kid) {
                    found.push(kid);
                    stack.push(kid);
                }
            }
        }
    }
    found
}

/// Current `(pid, ppid)` pairs
#[cfg(target_os = "linux")]
fn process_table() -> std::io::Result<Vec<(u32, u32)>> {
    let mut table = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // Processes can exit between read_dir and read.
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(ppid) = parse_stat_ppid(&stat) {
            table.push((pid, ppid));
        }
    }
    if table.is_empty() {
        return ps_table();
    }
    Ok(table)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_table() -> std::io::Result<Vec<(u32, u32)>> {
    ps_table()
}

#[cfg(not(unix))]
fn process_table() -> std::io::Result<Vec<(u32, u32)>> {
    // taskkill /T walks the tree itself.
    Ok(Vec::new())
}

/// Parent pid from a `/proc/<pid>/stat` line
///
/// The command name is parenthesised and may contain spaces, so fields are
/// counted from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(unix)]
fn ps_table() -> std::io::Result<Vec<(u32, u32)>> {
    let output = Command::new("ps")
        .args(["-A", "-o", "pid=,ppid="])
        .stderr(Stdio::null())
        .output()?;
    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg_attr(not(unix), allow(dead_code))]
fn parse_ps_output(output: &str) -> Vec<(u32, u32)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

#[cfg(unix)]
fn signal(pid: u32, sig: TreeSignal) -> std::io::Result<()> {
    let status = Command::new("kill")
        .args([sig.kill_flag(), &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("kill exited with {status}")))
    }
}

#[cfg(windows)]
fn signal(pid: u32, _sig: TreeSignal) -> std::io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("taskkill exited with {status}")))
    }
}

#[cfg(not(any(unix, windows)))]
fn signal(_pid: u32, _sig: TreeSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process signalling is not supported on this platform",
    ))
}
