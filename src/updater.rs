//! In-process equivalent of the generated update script.
//!
//! Same contract as `pull.sh`: nothing happens unless the sentinel file is
//! present or the update is forced; otherwise pull, restart, then remove the
//! sentinel. Each step is checked, and the sentinel survives a failed pull
//! or restart so the next run retries.

use crate::error::{Error, Result};
use crate::external::{ServiceManager, SourceControl};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// What an update run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateOutcome {
    /// Neither the sentinel nor force was present
    NothingToDo,
    /// Pulled and restarted
    Updated { sentinel_removed: bool },
}

/// Runs the pull-and-restart procedure for one service.
pub struct Updater {
    manager: Arc<dyn ServiceManager>,
    source: Arc<dyn SourceControl>,
    sentinel: String,
}

impl Updater {
    /// Create an updater using `sentinel` as the marker file name.
    pub fn new(
        manager: Arc<dyn ServiceManager>,
        source: Arc<dyn SourceControl>,
        sentinel: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            source,
            sentinel: sentinel.into(),
        }
    }

    /// Path of the sentinel file inside a working directory.
    pub fn sentinel_path(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.sentinel)
    }

    /// Update `unit` from the repository in `working_dir`.
    pub async fn run(&self, working_dir: &Path, unit: &str, force: bool) -> Result<UpdateOutcome> {
        if !working_dir.is_dir() {
            return Err(Error::WorkingDirMissing(working_dir.to_path_buf()));
        }

        let sentinel = self.sentinel_path(working_dir);
        let pending = sentinel.is_file();
        debug!(pending, force, sentinel = %sentinel.display(), "Checking for pending update");

        if !pending && !force {
            info!(unit = %unit, "No update pending");
            return Ok(UpdateOutcome::NothingToDo);
        }

        info!(unit = %unit, dir = %working_dir.display(), source = self.source.name(), "Pulling");
        self.source.pull(working_dir).await?;

        info!(unit = %unit, manager = self.manager.name(), "Restarting");
        self.manager.restart(unit).await?;

        let sentinel_removed = if sentinel.is_file() {
            std::fs::remove_file(&sentinel)?;
            true
        } else {
            false
        };

        info!(unit = %unit, "Update complete");
        Ok(UpdateOutcome::Updated { sentinel_removed })
    }
}
