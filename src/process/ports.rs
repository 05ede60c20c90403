//! Port discovery: which process listens on a given TCP port.
//!
//! The server utility reports the port it bound but not the pid of the
//! server process, so the session looks the owner up in the OS socket
//! table right after the server started.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use crate::{AppError, Result};

/// TCP state of a socket table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Passive socket accepting connections.
    Listen,
    /// Connected socket.
    Established,
    /// Any other state.
    Other,
}

/// One row of the socket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    /// Local port number.
    pub local_port: u16,
    /// TCP state.
    pub state: SocketState,
    /// Owning process, when the OS lets us see it.
    pub pid: Option<u32>,
}

/// Source of the current TCP socket table.
pub trait SocketTable: Send + Sync {
    /// Snapshot of all TCP sockets.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the table cannot be read.
    fn entries(&self) -> Result<Vec<SocketEntry>>;
}

/// Find the pid of the process listening on `port`.
///
/// # Errors
///
/// Returns `AppError::Connection` if no listening socket with a known
/// owner is bound to `port`, or the table's own error if it cannot be read.
pub fn find_listening_port_owner(table: &dyn SocketTable, port: u16) -> Result<u32> {
    let entry = table
        .entries()?
        .into_iter()
        .find(|entry| entry.local_port == port && entry.state == SocketState::Listen && entry.pid.is_some());

    match entry {
        Some(SocketEntry { pid: Some(pid), .. }) => {
            debug!(port, pid, "found socket listening on port");
            Ok(pid)
        }
        _ => Err(AppError::Connection(format!(
            "couldn't find socket connection listening on port {port}"
        ))),
    }
}

/// Socket table of the running OS.
#[must_use]
pub fn system_socket_table() -> Arc<dyn SocketTable> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcNetTable)
    } else if cfg!(windows) {
        Arc::new(NetstatTable)
    } else {
        Arc::new(UnsupportedTable)
    }
}

/// Linux socket table read from `/proc/net/tcp{,6}`, with owners resolved
/// through the socket inodes held open under `/proc/<pid>/fd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcNetTable;

impl SocketTable for ProcNetTable {
    fn entries(&self) -> Result<Vec<SocketEntry>> {
        let mut rows = Vec::new();
        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match fs::read_to_string(table) {
                Ok(content) => rows.extend(parse_proc_net(&content)),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(AppError::Io(format!("failed to read {table}: {err}"))),
            }
        }

        let owners = socket_inode_owners(Path::new("/proc"));
        Ok(rows
            .into_iter()
            .map(|row| SocketEntry {
                local_port: row.local_port,
                state: row.state,
                pid: owners.get(&row.inode).copied(),
            })
            .collect())
    }
}

/// Row of `/proc/net/tcp` before owner resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcNetRow {
    /// Local port number.
    pub local_port: u16,
    /// TCP state.
    pub state: SocketState,
    /// Socket inode.
    pub inode: u64,
}

/// Parse the content of `/proc/net/tcp` or `/proc/net/tcp6`.
///
/// Malformed lines are skipped.
#[must_use]
pub fn parse_proc_net(content: &str) -> Vec<ProcNetRow> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let state = match *fields.get(3)? {
                "0A" => SocketState::Listen,
                "01" => SocketState::Established,
                _ => SocketState::Other,
            };
            let inode = fields.get(9)?.parse().ok()?;
            Some(ProcNetRow {
                local_port,
                state,
                inode,
            })
        })
        .collect()
}

/// Map socket inodes to the pid holding them open.
///
/// Processes whose descriptors we may not read are skipped.
fn socket_inode_owners(proc_root: &Path) -> HashMap<u64, u32> {
    let mut owners = HashMap::new();
    let Ok(entries) = fs::read_dir(proc_root) else {
        return owners;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(target) = fs::read_link(fd.path()) {
                if let Some(inode) = parse_socket_link(&target.to_string_lossy()) {
                    owners.entry(inode).or_insert(pid);
                }
            }
        }
    }

    owners
}

/// Extract the inode from a `socket:[12345]` descriptor link.
#[must_use]
pub fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Socket table read from `netstat -ano -p TCP` (Windows output format).
#[derive(Debug, Clone, Copy, Default)]
pub struct NetstatTable;

impl SocketTable for NetstatTable {
    fn entries(&self) -> Result<Vec<SocketEntry>> {
        let output = Command::new("netstat")
            .args(["-ano", "-p", "TCP"])
            .output()
            .map_err(|err| AppError::Io(format!("failed to run netstat: {err}")))?;

        if !output.status.success() {
            return Err(AppError::Io(format!(
                "netstat exited with {}",
                output.status
            )));
        }

        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Stand-in for platforms without a supported socket table source.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedTable;

impl SocketTable for UnsupportedTable {
    fn entries(&self) -> Result<Vec<SocketEntry>> {
        Err(AppError::Io(format!(
            "port discovery is not supported on {}",
            std::env::consts::OS
        )))
    }
}

/// Parse `netstat -ano` output.
///
/// Expected rows look like `TCP  0.0.0.0:2036  0.0.0.0:0  LISTENING  4242`;
/// everything else is skipped.
#[must_use]
pub fn parse_netstat(output: &str) -> Vec<SocketEntry> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if !fields.first()?.eq_ignore_ascii_case("tcp") || fields.len() < 5 {
                return None;
            }
            let (_, port) = fields[1].rsplit_once(':')?;
            let local_port = port.parse().ok()?;
            let state = match fields[3] {
                "LISTENING" | "LISTEN" => SocketState::Listen,
                "ESTABLISHED" => SocketState::Established,
                _ => SocketState::Other,
            };
            Some(SocketEntry {
                local_port,
                state,
                pid: fields[4].parse().ok(),
            })
        })
        .collect()
}
