//! Typed facade over a [`RemoteChannel`].
//!
//! Every public method builds a [`Call`], sends it through
//! [`Remote::invoke`] and decodes the result. `invoke` is the single place
//! where transport failures become [`AppError::Api`] and where calls are
//! traced when the session runs with `logging.debug` enabled.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::{Call, RemoteChannel, Target};
use crate::{AppError, Result};

/// Shared handle to a channel plus the call-tracing switch.
#[derive(Clone)]
pub struct Remote {
    channel: Arc<dyn RemoteChannel>,
    trace_calls: bool,
}

impl Debug for Remote {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("trace_calls", &self.trace_calls)
            .finish_non_exhaustive()
    }
}

impl Remote {
    /// Wrap `channel`; `trace_calls` logs every successful call at debug level.
    #[must_use]
    pub fn new(channel: Arc<dyn RemoteChannel>, trace_calls: bool) -> Self {
        Self {
            channel,
            trace_calls,
        }
    }

    /// Send `call` and translate transport failures.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` carrying the remote error text.
    pub async fn invoke(&self, call: Call) -> Result<Value> {
        let name = call.to_string();
        let args = self.trace_calls.then(|| call.args.clone());

        match self.channel.invoke(call).await {
            Ok(retval) => {
                if let Some(args) = args {
                    debug!(call = %name, ?args, %retval, "called api function");
                }
                Ok(retval)
            }
            Err(err) => {
                if self.trace_calls {
                    debug!(call = %name, %err, "api function failed");
                }
                Err(AppError::Api(err.to_string()))
            }
        }
    }

    async fn invoke_as<T: DeserializeOwned>(&self, call: Call) -> Result<T> {
        let name = call.to_string();
        let value = self.invoke(call).await?;
        serde_json::from_value(value)
            .map_err(|err| AppError::Api(format!("unexpected result from {name}: {err}")))
    }
}

/// Server utility object: starts the server and reports its state.
#[derive(Debug, Clone)]
pub struct ServerUtil {
    remote: Remote,
}

impl ServerUtil {
    /// Wrap a shared remote handle.
    #[must_use]
    pub fn new(remote: Remote) -> Self {
        Self { remote }
    }

    fn call(method: &str, args: Vec<Value>) -> Call {
        Call::new(Target::ServerUtil, method, args)
    }

    /// Start the server; `false` means the server refused to start and
    /// [`ServerUtil::error_message`] explains why.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the call itself fails.
    pub async fn start_server(&self, use_graphics: bool) -> Result<bool> {
        self.remote
            .invoke_as(Self::call("StartComsolServer", vec![json!(use_graphics)]))
            .await
    }

    /// Port the started server listens on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the call fails or the port is not a `u16`.
    pub async fn port(&self) -> Result<u16> {
        self.remote
            .invoke_as(Self::call("get_port", Vec::new()))
            .await
    }

    /// Last error reported by the server utility.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the call fails.
    pub async fn error_message(&self) -> Result<String> {
        self.remote
            .invoke_as(Self::call("get_errormessage", Vec::new()))
            .await
    }

    /// Full version string of the engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the call fails.
    pub async fn version(&self) -> Result<String> {
        self.remote
            .invoke_as(Self::call("get_version", Vec::new()))
            .await
    }
}

/// Model utility object: client connection and the server's model registry.
#[derive(Debug, Clone)]
pub struct ModelUtil {
    remote: Remote,
}

impl ModelUtil {
    /// Wrap a shared remote handle.
    #[must_use]
    pub fn new(remote: Remote) -> Self {
        Self { remote }
    }

    fn call(method: &str, args: Vec<Value>) -> Call {
        Call::new(Target::ModelUtil, method, args)
    }

    fn handle(&self, tag: &str) -> Model {
        Model {
            tag: tag.to_owned(),
            remote: self.remote.clone(),
        }
    }

    /// Connect the client to the server at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the server rejects the connection.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.remote
            .invoke(Self::call("Connect", vec![json!(host), json!(port)]))
            .await
            .map(drop)
    }

    /// Drop the client connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the call fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.remote
            .invoke(Self::call("Disconnect", Vec::new()))
            .await
            .map(drop)
    }

    /// Tags of all models currently on the server.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the server is busy or the call fails.
    pub async fn tags(&self) -> Result<Vec<String>> {
        self.remote.invoke_as(Self::call("tags", Vec::new())).await
    }

    /// Handle to the existing model tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if no such model exists.
    pub async fn model(&self, tag: &str) -> Result<Model> {
        self.remote
            .invoke(Self::call("Model", vec![json!(tag)]))
            .await?;
        Ok(self.handle(tag))
    }

    /// Create an empty model tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the tag is taken or the call fails.
    pub async fn create(&self, tag: &str) -> Result<Model> {
        self.remote
            .invoke(Self::call("create", vec![json!(tag)]))
            .await?;
        Ok(self.handle(tag))
    }

    /// Load the model file at `path` under `tag`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the file is not a valid model file.
    pub async fn load(&self, tag: &str, path: &Path) -> Result<Model> {
        let filename = path.to_string_lossy();
        self.remote
            .invoke(Self::call("load", vec![json!(tag), json!(filename)]))
            .await?;
        Ok(self.handle(tag))
    }

    /// Remove the model tagged `tag` from the server.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if no such model exists.
    pub async fn remove(&self, tag: &str) -> Result<()> {
        self.remote
            .invoke(Self::call("remove", vec![json!(tag)]))
            .await
            .map(drop)
    }

    /// A tag starting with `prefix` that no model on the server uses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the call fails.
    pub async fn unique_tag(&self, prefix: &str) -> Result<String> {
        self.remote
            .invoke_as(Self::call("uniquetag", vec![json!(prefix)]))
            .await
    }
}

/// Back-reference to a model living on the server.
///
/// The handle does not own the remote object; the model may be removed by
/// another client at any time, after which every call fails with
/// `AppError::Api`.
#[derive(Debug, Clone)]
pub struct Model {
    tag: String,
    remote: Remote,
}

impl Model {
    /// Tag identifying the model on the server.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Path of the file the model was loaded from; empty for unsaved models.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the model no longer exists.
    pub async fn file_path(&self) -> Result<String> {
        self.remote
            .invoke_as(Call::new(
                Target::Model {
                    tag: self.tag.clone(),
                },
                "getFilePath",
                Vec::new(),
            ))
            .await
    }

    /// Parameter table of the model.
    #[must_use]
    pub fn param(&self) -> Params {
        Params {
            tag: self.tag.clone(),
            remote: self.remote.clone(),
        }
    }
}

/// Named global parameters of one model.
#[derive(Debug, Clone)]
pub struct Params {
    tag: String,
    remote: Remote,
}

impl Params {
    fn call(&self, method: &str, args: Vec<Value>) -> Call {
        Call::new(
            Target::Param {
                tag: self.tag.clone(),
            },
            method,
            args,
        )
    }

    /// Set parameter `name` to the expression `value`, e.g. `"1[cm]"`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the model no longer exists.
    pub async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.remote
            .invoke(self.call("set", vec![json!(name), json!(value)]))
            .await
            .map(drop)
    }

    /// Expression of parameter `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the parameter is not defined.
    pub async fn get(&self, name: &str) -> Result<String> {
        self.remote
            .invoke_as(self.call("get", vec![json!(name)]))
            .await
    }

    /// Remove parameter `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if the parameter is not defined.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.remote
            .invoke(self.call("remove", vec![json!(name)]))
            .await
            .map(drop)
    }
}
