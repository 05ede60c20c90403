//! Channel implementation over a bridge helper process.
//!
//! The helper owns the vendor object model and exposes it as NDJSON over
//! its stdio. The exchange is strictly one request, one response:
//!
//! ```json
//! {"id":1,"call":{"object":"model_util","method":"tags","args":[]}}
//! {"id":1,"result":["Model1"]}
//! {"id":2,"call":{"object":"model","tag":"X","method":"getFilePath","args":[]}}
//! {"id":2,"error":{"message":"Unknown model","detail":"X"}}
//! ```
//!
//! Before the first call the client sends a `dispatch` request naming the
//! progids of both utility objects; the helper answers with an error if
//! they are not registered, which [`BridgeFactory`] reports as
//! `AppError::Version`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, info_span, Instrument};

use super::codec::BridgeCodec;
use super::{Call, ChannelFactory, ChannelFuture, RemoteChannel, TransportError};
use crate::config::BridgeConfig;
use crate::registry::{self, InstallRegistry, MODEL_UTIL_OBJECT, SERVER_UTIL_OBJECT};
use crate::{AppError, Result};

/// Response line sent back by the helper.
#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<TransportError>,
}

struct BridgeIo {
    // Held so `kill_on_drop` ends the helper with the channel.
    _child: Child,
    reader: FramedRead<ChildStdout, BridgeCodec>,
    writer: FramedWrite<ChildStdin, BridgeCodec>,
}

/// [`RemoteChannel`] backed by a spawned bridge helper.
pub struct BridgeChannel {
    io: Mutex<BridgeIo>,
    next_id: AtomicU64,
    pid: Option<u32>,
}

impl std::fmt::Debug for BridgeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeChannel")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl BridgeChannel {
    /// Spawn the helper described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the helper cannot be spawned or its stdio
    /// cannot be captured.
    pub fn spawn(config: &BridgeConfig) -> Result<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to spawn bridge helper {:?}: {err}",
                    config.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Io("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture bridge stdout".into()))?;

        let pid = child.id();
        info!(pid = pid.unwrap_or(0), command = %config.command, "bridge helper spawned");

        Ok(Self {
            io: Mutex::new(BridgeIo {
                _child: child,
                reader: FramedRead::new(stdout, BridgeCodec::new()),
                writer: FramedWrite::new(stdin, BridgeCodec::new()),
            }),
            next_id: AtomicU64::new(1),
            pid,
        })
    }

    /// Bind the helper to the utility objects of `version`.
    ///
    /// # Errors
    ///
    /// Returns the helper's `TransportError` if the progids are unknown.
    pub async fn dispatch(
        &self,
        version: &str,
        root: &std::path::Path,
        rebuild: bool,
    ) -> std::result::Result<(), TransportError> {
        let request = json!({
            "dispatch": {
                "server_util": registry::progid(SERVER_UTIL_OBJECT, version),
                "model_util": registry::progid(MODEL_UTIL_OBJECT, version),
                "root": root.to_string_lossy(),
                "rebuild": rebuild,
            }
        });
        self.exchange(request).await.map(drop)
    }

    /// Send one request object and wait for the response with its id.
    async fn exchange(&self, mut request: Value) -> std::result::Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Value::Object(ref mut map) = request {
            map.insert("id".into(), json!(id));
        }
        let line = serde_json::to_string(&request)
            .map_err(|err| TransportError::new("failed to encode bridge request").with_detail(err.to_string()))?;

        let mut io = self.io.lock().await;
        io.writer
            .send(line)
            .await
            .map_err(|err| TransportError::new("bridge write failed").with_detail(err.to_string()))?;

        loop {
            let Some(frame) = io.reader.next().await else {
                return Err(TransportError::new("bridge helper exited"));
            };
            let line = frame
                .map_err(|err| TransportError::new("bridge read failed").with_detail(err.to_string()))?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: Response = match serde_json::from_str(trimmed) {
                Ok(response) => response,
                Err(err) => {
                    debug!(error = %err, raw = trimmed, "bridge: non-response line, skipping");
                    continue;
                }
            };

            if response.id != id {
                debug!(expected = id, got = response.id, "bridge: stale response, skipping");
                continue;
            }

            return match response.error {
                Some(err) => Err(err),
                None => Ok(response.result),
            };
        }
    }
}

impl RemoteChannel for BridgeChannel {
    fn invoke(&self, call: Call) -> ChannelFuture<'_, std::result::Result<Value, TransportError>> {
        Box::pin(async move { self.exchange(json!({ "call": call })).await })
    }
}

/// [`ChannelFactory`] that spawns one bridge helper per resolved channel.
pub struct BridgeFactory {
    config: BridgeConfig,
    registry: Arc<dyn InstallRegistry>,
}

impl BridgeFactory {
    /// Create a factory for helpers described by `config`.
    #[must_use]
    pub fn new(config: BridgeConfig, registry: Arc<dyn InstallRegistry>) -> Self {
        Self { config, registry }
    }
}

impl ChannelFactory for BridgeFactory {
    fn resolve(
        &self,
        version: &str,
        rebuild: bool,
    ) -> ChannelFuture<'_, Result<Arc<dyn RemoteChannel>>> {
        let version = version.to_owned();
        let span = info_span!("resolve_channel", version = %version, rebuild);

        Box::pin(
            async move {
                // Unknown versions are rejected before anything is spawned.
                let root = self.registry.root_dir(&version)?;

                let channel = BridgeChannel::spawn(&self.config)?;
                channel
                    .dispatch(&version, &root, rebuild)
                    .await
                    .map_err(|err| {
                        AppError::Version(format!(
                            "couldn't find COM interface of COMSOL version {version:?}: {err}"
                        ))
                    })?;

                info!("bridge channel ready");
                let channel: Arc<dyn RemoteChannel> = Arc::new(channel);
                Ok(channel)
            }
            .instrument(span),
        )
    }
}
