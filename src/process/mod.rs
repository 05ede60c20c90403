//! OS process plumbing.
//!
//! Covers process start/terminate with force-kill escalation and the
//! socket-table lookup that maps the server's port to its pid.

pub mod ports;
pub mod supervisor;

pub use ports::{find_listening_port_owner, system_socket_table, SocketTable};
pub use supervisor::{terminate_and_wait, ProcessHandle};
