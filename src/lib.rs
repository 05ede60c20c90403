#![forbid(unsafe_code)]

//! Client sessions against a COMSOL engine server.
//!
//! A [`Session`] starts a server for a requested engine version, connects
//! to it and can attach a desktop front-end, returning a handle to the
//! model the front-end shows.

pub mod config;
pub mod errors;
pub mod process;
pub mod registry;
pub mod rpc;
pub mod session;

pub use config::SessionConfig;
pub use errors::{AppError, Result};
pub use session::{Session, SessionDeps, SessionState};
