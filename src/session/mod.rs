//! Session coordinator: one server, one client connection, at most one
//! attached front-end.
//!
//! A [`Session`] starts an engine server through the server utility,
//! discovers the server process via the port it listens on, connects the
//! model utility to it and can then launch a desktop front-end attached to
//! the same server. [`Session::shutdown`] tears all of that down in reverse
//! order and is safe to call repeatedly. Dropping a session that was never
//! shut down force-kills whatever is still running.

pub mod launch;
pub mod lockfile;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SessionConfig;
use crate::process::supervisor;
use crate::process::{
    find_listening_port_owner, system_socket_table, terminate_and_wait, ProcessHandle, SocketTable,
};
use crate::registry::{self, InstallRegistry, TableRegistry};
use crate::rpc::bridge::BridgeFactory;
use crate::rpc::facade::{Model, ModelUtil, Remote, ServerUtil};
use crate::rpc::ChannelFactory;
use crate::{AppError, Result};

use self::launch::{frontend_args, normalize_path, wait_for_frontend, ReadinessPolicy};

/// Host the client and the front-end connect to.
const SERVER_HOST: &str = "localhost";

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing started yet.
    Unstarted,
    /// Channel resolved, server being started.
    ServerStarting,
    /// Server running and client connected.
    Connected,
    /// Front-end process started, waiting for its model.
    FrontendAttaching,
    /// Front-end attached; its model is available.
    FrontendAttached,
    /// Teardown in progress.
    ShuttingDown,
    /// Torn down; every further operation except shutdown fails.
    Closed,
}

impl SessionState {
    /// Whether a front-end may be launched in this state.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::FrontendAttached)
    }
}

/// Collaborators a session talks to. Replaced in tests.
#[derive(Clone)]
pub struct SessionDeps {
    /// Resolves the remote channel for a version.
    pub factory: Arc<dyn ChannelFactory>,
    /// Maps versions to install roots.
    pub registry: Arc<dyn InstallRegistry>,
    /// OS socket table used for port discovery.
    pub sockets: Arc<dyn SocketTable>,
}

impl std::fmt::Debug for SessionDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDeps").finish_non_exhaustive()
    }
}

impl SessionDeps {
    /// Production collaborators: bridge helper, configured install table
    /// and the OS socket table.
    #[must_use]
    pub fn system(config: &SessionConfig) -> Self {
        let registry: Arc<dyn InstallRegistry> = Arc::new(TableRegistry::from_config(config));
        Self {
            factory: Arc::new(BridgeFactory::new(config.bridge.clone(), Arc::clone(&registry))),
            registry,
            sockets: system_socket_table(),
        }
    }
}

/// Client session bound to one engine server.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    deps: SessionDeps,
    state: SessionState,
    cu: Option<ServerUtil>,
    mu: Option<ModelUtil>,
    port: Option<u16>,
    connected: bool,
    server: ProcessHandle,
    frontend: ProcessHandle,
    mphfile: Option<PathBuf>,
    model: Option<Model>,
}

impl Session {
    /// Create an unstarted session. Nothing is resolved or spawned.
    #[must_use]
    pub fn new(config: SessionConfig, deps: SessionDeps) -> Self {
        Self {
            config,
            deps,
            state: SessionState::Unstarted,
            cu: None,
            mu: None,
            port: None,
            connected: false,
            server: ProcessHandle::empty(),
            frontend: ProcessHandle::empty(),
            mphfile: None,
            model: None,
        }
    }

    /// Create a session and start it.
    ///
    /// # Errors
    ///
    /// See [`Session::open`].
    pub async fn start(config: SessionConfig, deps: SessionDeps) -> Result<Self> {
        let mut session = Self::new(config, deps);
        session.open().await?;
        Ok(session)
    }

    /// Resolve the channel, start the server, find its process and connect
    /// the client.
    ///
    /// # Errors
    ///
    /// - `AppError::Version` if the version is not installed or its utility
    ///   objects are not registered. Nothing has been started in that case.
    /// - `AppError::Connection` if the server refuses to start or no process
    ///   listens on its port.
    /// - `AppError::AlreadyConnected` if this process already holds a client
    ///   connection. The server started here is shut down again first.
    /// - `AppError::Api` for any other failed remote call.
    pub async fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Err(AppError::Connection(format!(
                "session cannot be opened in state {:?}",
                self.state
            )));
        }

        let span = info_span!("session_open", version = %self.config.version);
        self.bring_up().instrument(span).await
    }

    async fn bring_up(&mut self) -> Result<()> {
        let channel = self
            .deps
            .factory
            .resolve(&self.config.version, self.config.rebuild)
            .await?;
        let remote = Remote::new(channel, self.config.logging.debug);
        self.cu = Some(ServerUtil::new(remote.clone()));
        self.mu = Some(ModelUtil::new(remote));

        self.state = SessionState::ServerStarting;
        self.start_server().await?;
        self.connect_client().await?;

        self.state = SessionState::Connected;
        Ok(())
    }

    async fn start_server(&mut self) -> Result<()> {
        let cu = self.server_util()?.clone();

        if !cu.start_server(false).await? {
            let message = cu.error_message().await?;
            return Err(AppError::Connection(format!(
                "couldn't start COMSOL {} server: {message}",
                self.config.version
            )));
        }

        let port = cu.port().await?;
        self.port = Some(port);

        let pid = find_listening_port_owner(self.deps.sockets.as_ref(), port)?;
        self.server = ProcessHandle::from_pid(pid);
        info!(
            version = %self.config.version,
            port,
            pid,
            name = self.server.name(),
            "server started listening on port"
        );
        Ok(())
    }

    async fn connect_client(&mut self) -> Result<()> {
        let port = self.require_port()?;
        let mu = self.mu()?.clone();

        match mu.connect(SERVER_HOST, port).await {
            Ok(()) => {
                self.connected = true;
                info!(port, "client connected to server");
                Ok(())
            }
            Err(err) => {
                debug!(%err, port, "client connection rejected");
                if let Err(cleanup) = self.shutdown().await {
                    warn!(%cleanup, "cleanup after rejected connection failed");
                }
                Err(AppError::AlreadyConnected(
                    "the client is already connected to the server".into(),
                ))
            }
        }
    }

    /// Start a front-end attached to this session's server and wait until
    /// its model is available.
    ///
    /// Any previously launched front-end is terminated first. With
    /// `filepath` set, the file is opened in the front-end and the returned
    /// model is the one loaded from it; otherwise the front-end starts with
    /// an empty model.
    ///
    /// # Errors
    ///
    /// - `AppError::Connection` if the session is not connected.
    /// - `AppError::Api` if `filepath` is not a loadable model file.
    /// - `AppError::Timeout` if the model does not appear in time. The
    ///   front-end has been terminated in that case.
    /// - `AppError::Inconsistent` if an empty front-end produced more than
    ///   one new model.
    pub async fn launch(&mut self, filepath: Option<&Path>) -> Result<Model> {
        if !self.state.is_connected() {
            return Err(AppError::Connection(format!(
                "cannot launch a front-end in state {:?}",
                self.state
            )));
        }

        self.terminate_frontend().await?;

        self.state = SessionState::FrontendAttaching;
        let span = info_span!("launch_frontend", port = self.port.unwrap_or(0));
        let result = self.attach_frontend(filepath).instrument(span).await;

        self.state = match result {
            Ok(_) => SessionState::FrontendAttached,
            Err(_) => SessionState::Connected,
        };
        result
    }

    async fn attach_frontend(&mut self, filepath: Option<&Path>) -> Result<Model> {
        let port = self.require_port()?;
        let mu = self.mu()?.clone();

        let snapshot: HashSet<String> = mu.tags().await?.into_iter().collect();
        let mphfile = match filepath {
            Some(path) => Some(validate_model_file(&mu, path).await?),
            None => None,
        };

        let root = self.deps.registry.root_dir(&self.config.version)?;
        let command = registry::frontend_executable(&root);
        let args = frontend_args(port, mphfile.as_deref());

        self.frontend = supervisor::start(&command, &args)?;
        self.mphfile.clone_from(&mphfile);
        debug!(pid = self.frontend.pid().unwrap_or(0), ?args, "started desktop client");

        let policy = ReadinessPolicy {
            timeout: self.config.timeout(),
            interval: self.config.poll_interval(),
            grace: self.config.grace_period(),
        };

        match wait_for_frontend(&mu, &snapshot, mphfile.as_deref(), &policy).await {
            Ok(model) => {
                info!(
                    port,
                    tag = model.tag(),
                    mphfile = ?mphfile,
                    "desktop client connected to the server"
                );
                self.model = Some(model.clone());
                Ok(model)
            }
            Err(err) => {
                if let Err(cleanup) = self.terminate_frontend().await {
                    warn!(%cleanup, "failed to terminate desktop client");
                }
                Err(err)
            }
        }
    }

    /// Terminate the front-end, drop its model from the server and remove
    /// the lock file of the file it had open. A no-op without a front-end.
    ///
    /// # Errors
    ///
    /// Returns the first `AppError::Io` hit while signalling the process or
    /// removing the lock file. The remaining steps still run.
    pub async fn terminate_frontend(&mut self) -> Result<()> {
        let mut first_error = None;

        let timeout = self.config.timeout();
        if let Err(err) = terminate_and_wait(&mut self.frontend, timeout).await {
            warn!(%err, "failed to terminate desktop client");
            first_error.get_or_insert(err);
        }

        self.remove_active_model().await;

        if let Some(mphfile) = self.mphfile.take() {
            if let Err(err) = lockfile::remove_lock_file(&mphfile) {
                warn!(path = %mphfile.display(), %err, "failed to remove lock file");
                first_error.get_or_insert(err);
            }
        }

        if matches!(
            self.state,
            SessionState::FrontendAttached | SessionState::FrontendAttaching
        ) {
            self.state = SessionState::Connected;
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn remove_active_model(&mut self) {
        let Some(model) = self.model.take() else {
            return;
        };
        let Some(mu) = self.mu.as_ref() else {
            return;
        };
        match mu.remove(model.tag()).await {
            Ok(()) => debug!(tag = model.tag(), "removed active model from server"),
            Err(err) => debug!(tag = model.tag(), %err, "active model already gone"),
        }
    }

    /// Terminate the front-end, disconnect the client and terminate the
    /// server. Safe in every state and idempotent.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a process cannot be signalled or a lock
    /// file cannot be removed.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::ShuttingDown;

        let mut first_error = None;

        if let Err(err) = self.terminate_frontend().await {
            warn!(%err, "failed to terminate desktop client");
            first_error.get_or_insert(err);
        }

        if self.connected {
            if let Some(mu) = self.mu.as_ref() {
                match mu.disconnect().await {
                    Ok(()) => debug!("client disconnected from server"),
                    Err(err) => debug!(%err, "client was not connected"),
                }
            }
            self.connected = false;
        }

        if let Err(err) = terminate_and_wait(&mut self.server, self.config.timeout()).await {
            warn!(%err, "failed to terminate server");
            first_error.get_or_insert(err);
        }

        self.state = SessionState::Closed;
        info!(port = self.port.unwrap_or(0), "session shut down");

        first_error.map_or(Ok(()), Err)
    }

    /// Port the server listens on, once started.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Engine version this session targets.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// Timeout for front-end attachment and process termination.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Model utility of the connected client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` before the channel is resolved.
    pub fn mu(&self) -> Result<&ModelUtil> {
        self.mu
            .as_ref()
            .ok_or_else(|| AppError::Connection("session is not started".into()))
    }

    /// Server utility that started the server.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` before the channel is resolved.
    pub fn server_util(&self) -> Result<&ServerUtil> {
        self.cu
            .as_ref()
            .ok_or_else(|| AppError::Connection("session is not started".into()))
    }

    /// Model of the attached front-end.
    #[must_use]
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// File opened in the attached front-end.
    #[must_use]
    pub fn mphfile(&self) -> Option<&Path> {
        self.mphfile.as_deref()
    }

    /// Server process.
    #[must_use]
    pub fn server(&self) -> &ProcessHandle {
        &self.server
    }

    /// Front-end process; empty until a launch.
    #[must_use]
    pub fn frontend(&self) -> &ProcessHandle {
        &self.frontend
    }

    fn require_port(&self) -> Result<u16> {
        self.port
            .ok_or_else(|| AppError::Connection("server port is unknown".into()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.frontend.is_running() || self.server.is_running() {
            warn!(state = ?self.state, "session dropped without shutdown, killing processes");
        }

        self.frontend.kill_now();
        if let Some(mphfile) = self.mphfile.take() {
            if let Err(err) = lockfile::remove_lock_file(&mphfile) {
                warn!(%err, "failed to remove lock file");
            }
        }
        self.server.kill_now();
    }
}

/// Normalize `path` and check that the server can load it as a model.
///
/// The probe model is removed again right away.
async fn validate_model_file(mu: &ModelUtil, path: &Path) -> Result<PathBuf> {
    let path = normalize_path(path)?;
    let tag = mu.unique_tag("Model").await?;
    mu.load(&tag, &path).await?;
    mu.remove(&tag).await?;
    debug!(path = %path.display(), "validated model file");
    Ok(path)
}
