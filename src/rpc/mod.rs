//! Remote procedure channel to the engine's object model.
//!
//! The channel itself is an external collaborator: this module only
//! defines the seam ([`RemoteChannel`], [`ChannelFactory`]) and the wire
//! shape of a call. The session never talks to a channel directly; it goes
//! through the typed facade in [`facade`], which maps every
//! [`TransportError`] onto [`AppError::Api`](crate::AppError::Api).
//!
//! Submodules:
//! - `facade`: typed `ServerUtil` / `ModelUtil` / `Model` wrappers.
//! - `bridge`: channel implementation over a helper process's stdio.
//! - `codec`: NDJSON line framing used by the bridge.

pub mod bridge;
pub mod codec;
pub mod facade;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Boxed future returned by channel trait methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transport-level failure raised by a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    /// Short error text reported by the remote side.
    pub message: String,
    /// Optional extended description (exception info).
    #[serde(default)]
    pub detail: Option<String>,
}

impl TransportError {
    /// Create an error without extended description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attach an extended description.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = self.message.trim_end_matches('.');
        match &self.detail {
            Some(detail) => write!(f, "{message}: {}", detail.trim_end_matches('.')),
            None => f.write_str(message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Remote object a call is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum Target {
    /// Server utility object (starts the server, reports port and version).
    ServerUtil,
    /// Model utility object (connection and model registry).
    ModelUtil,
    /// A model living on the server.
    Model {
        /// Tag of the model.
        tag: String,
    },
    /// Parameter table of a model.
    Param {
        /// Tag of the owning model.
        tag: String,
    },
}

/// One remote procedure call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Receiving object.
    #[serde(flatten)]
    pub target: Target,
    /// Remote method name, spelled as the vendor API spells it.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Call {
    /// Build a call with positional arguments.
    pub fn new(target: Target, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target,
            method: method.into(),
            args,
        }
    }
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Target::ServerUtil => write!(f, "ComsolUtil.{}", self.method),
            Target::ModelUtil => write!(f, "ModelUtil.{}", self.method),
            Target::Model { tag } => write!(f, "Model[{tag}].{}", self.method),
            Target::Param { tag } => write!(f, "Model[{tag}].param().{}", self.method),
        }
    }
}

/// Opaque request/response channel to the engine.
///
/// Calls are issued one at a time; implementations need not support
/// concurrent invocations.
pub trait RemoteChannel: Send + Sync {
    /// Perform `call` and return its JSON result.
    fn invoke(&self, call: Call) -> ChannelFuture<'_, std::result::Result<Value, TransportError>>;
}

impl std::fmt::Debug for dyn RemoteChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("RemoteChannel")
    }
}

/// Resolves a channel for an installed engine version.
pub trait ChannelFactory: Send + Sync {
    /// Open a channel to the utility objects of `version`.
    ///
    /// `rebuild` asks the implementation to regenerate its type bindings
    /// before handing out the channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Version` if the version is not installed or not
    /// registered with the object model.
    fn resolve(
        &self,
        version: &str,
        rebuild: bool,
    ) -> ChannelFuture<'_, Result<Arc<dyn RemoteChannel>>>;
}
