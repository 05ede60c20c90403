//! Front-end readiness polling.
//!
//! After the front-end process starts, the only sign that it attached to
//! the server is a new model tag showing up there. The server publishes
//! models with some delay and may briefly list intermediate models, so
//! readiness is decided by polling the tag set against a snapshot taken
//! before the start.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::rpc::facade::{Model, ModelUtil};
use crate::{AppError, Result};

/// Timing constants for one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Overall budget.
    pub timeout: Duration,
    /// Delay between two polls.
    pub interval: Duration,
    /// Delay before acquiring a freshly spotted model.
    pub grace: Duration,
}

/// Command-line arguments that attach a front-end to `port`, optionally
/// opening `mphfile`.
#[must_use]
pub fn frontend_args(port: u16, mphfile: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "mphclient".to_owned(),
        "-server".to_owned(),
        "localhost".to_owned(),
        "-port".to_owned(),
        port.to_string(),
    ];
    if let Some(path) = mphfile {
        args.push("-open".to_owned());
        args.push(path.to_string_lossy().into_owned());
    }
    args
}

/// Tags present in `current` but not in `snapshot`, sorted.
#[must_use]
pub fn new_tags(current: &[String], snapshot: &HashSet<String>) -> Vec<String> {
    let mut fresh: Vec<String> = current
        .iter()
        .filter(|tag| !snapshot.contains(*tag))
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    fresh.sort();
    fresh
}

/// Absolute, lexically normalized form of `path` (`.` and `..` resolved
/// without touching the file system).
///
/// # Errors
///
/// Returns `AppError::Io` if the current directory cannot be determined.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .map_err(|err| AppError::Io(format!("cannot resolve {}: {err}", path.display())))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Poll until the front-end's model appears, then return it.
///
/// With `mphfile` unset exactly one new tag is expected. With `mphfile`
/// set, new models whose file path differs are removed from the server and
/// the one whose path matches is returned.
///
/// # Errors
///
/// - `AppError::Timeout` when `policy.timeout` elapses first.
/// - `AppError::Inconsistent` when an empty front-end yields more than one
///   new tag.
/// - `AppError::Api` when removing an intermediate model fails.
pub async fn wait_for_frontend(
    mu: &ModelUtil,
    snapshot: &HashSet<String>,
    mphfile: Option<&Path>,
    policy: &ReadinessPolicy,
) -> Result<Model> {
    let started = Instant::now();

    while started.elapsed() < policy.timeout {
        tokio::time::sleep(policy.interval).await;

        let fresh = match mu.tags().await {
            Ok(tags) => new_tags(&tags, snapshot),
            Err(err) => {
                debug!(%err, "server busy while listing tags");
                continue;
            }
        };
        debug!(count = fresh.len(), tags = ?fresh, "found new model(s) on server");

        let target = match mphfile {
            None => match fresh.as_slice() {
                [] => None,
                [tag] => Some(tag.clone()),
                _ => {
                    return Err(AppError::Inconsistent(format!(
                        "expected exactly one new model tag, found {fresh:?}"
                    )))
                }
            },
            Some(path) => select_opened_model(mu, &fresh, path).await?,
        };

        let Some(tag) = target else {
            continue;
        };

        tokio::time::sleep(policy.grace).await;
        match mu.model(&tag).await {
            Ok(model) => return Ok(model),
            Err(err) => {
                // An empty front-end creates and discards models while it starts.
                debug!(tag = %tag, %err, "model no longer exists on server");
            }
        }
    }

    Err(AppError::Timeout(format!(
        "couldn't establish a connection to the desktop within {} seconds; connection \
         attempt aborted",
        policy.timeout.as_secs()
    )))
}

/// Pick the new model loaded from `mphfile`, removing the others.
async fn select_opened_model(
    mu: &ModelUtil,
    fresh: &[String],
    mphfile: &Path,
) -> Result<Option<String>> {
    let mut target = None;

    for tag in fresh {
        let path = match file_path_of(mu, tag).await {
            Ok(path) => path,
            Err(err) => {
                debug!(tag = %tag, %err, "server busy while reading file path");
                continue;
            }
        };

        if Path::new(&path) == mphfile {
            target = Some(tag.clone());
        } else {
            mu.remove(tag).await?;
            debug!(tag = %tag, path = %path, "removed intermediate model from server");
        }
    }

    Ok(target)
}

async fn file_path_of(mu: &ModelUtil, tag: &str) -> Result<String> {
    mu.model(tag).await?.file_path().await
}
