//! Engine install lookup.
//!
//! Resolves the install root of an engine version and derives the names
//! that depend on it: the progid of the remote utility objects and the
//! path of the desktop front-end executable.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::SessionConfig;
use crate::{AppError, Result};

/// Remote object type of the server utility (`comsolcom.comsolutil.NN`).
pub const SERVER_UTIL_OBJECT: &str = "comsolutil";

/// Remote object type of the model utility (`comsolcom.modelutil.NN`).
pub const MODEL_UTIL_OBJECT: &str = "modelutil";

/// Lookup of engine install roots by version string.
pub trait InstallRegistry: Send + Sync {
    /// Return the install root of `version`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Version` if the version is not installed.
    fn root_dir(&self, version: &str) -> Result<PathBuf>;
}

/// Registry backed by the `[installs]` config table with an environment
/// variable fallback (`COMSOL53_ROOT` for version `5.3`).
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    installs: HashMap<String, PathBuf>,
}

impl TableRegistry {
    /// Create a registry from an explicit version → root table.
    #[must_use]
    pub fn new(installs: HashMap<String, PathBuf>) -> Self {
        Self { installs }
    }

    /// Create a registry from the `[installs]` section of `config`.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.installs.clone())
    }
}

impl InstallRegistry for TableRegistry {
    fn root_dir(&self, version: &str) -> Result<PathBuf> {
        let key = version_key(version);
        if key.is_empty() {
            return Err(not_installed(version));
        }

        let root = self
            .installs
            .get(version)
            .cloned()
            .or_else(|| env::var_os(root_env_var(version)).map(PathBuf::from))
            .ok_or_else(|| not_installed(version))?;

        debug!(version, root = %root.display(), "resolved install root");
        Ok(root)
    }
}

/// Version string with the dots stripped, e.g. `"5.3"` → `"53"`.
#[must_use]
pub fn version_key(version: &str) -> String {
    version.trim().replace('.', "")
}

/// Environment variable consulted when the config table has no entry.
#[must_use]
pub fn root_env_var(version: &str) -> String {
    format!("COMSOL{}_ROOT", version_key(version))
}

/// Build the progid under which a remote utility object is registered.
#[must_use]
pub fn progid(object: &str, version: &str) -> String {
    format!("comsolcom.{object}.{}", version_key(version))
}

/// Path of the desktop front-end executable below an install root.
#[must_use]
pub fn frontend_executable(root: &Path) -> PathBuf {
    if cfg!(windows) {
        root.join("bin").join("win64").join("comsol.exe")
    } else {
        root.join("bin").join("comsol")
    }
}

fn not_installed(version: &str) -> AppError {
    AppError::Version(format!(
        "couldn't find root directory of COMSOL version {version:?}; check that the \
         requested version is installed"
    ))
}
