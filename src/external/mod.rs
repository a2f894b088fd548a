//! External subsystems the provisioner drives.
//!
//! Two seams, each a trait so the pipeline can be exercised without a real
//! service manager or repository:
//!
//! - [`ServiceManager`]: reload unit definitions, restart a unit
//!   (`systemctl`)
//! - [`SourceControl`]: bring a working copy up to date (`git`)
//!
//! Every call returns a checked [`Result`]; a non-zero exit status or a
//! timeout is an error, never a silent success.

pub mod command;
pub mod git;
pub mod systemd;

use crate::config::CommandConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Service manager operations used by the provisioner and updater.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Re-read unit files.
    async fn daemon_reload(&self) -> Result<()>;

    /// Restart a unit by name.
    async fn restart(&self, unit: &str) -> Result<()>;

    /// Get a description of the backend for logging purposes.
    fn name(&self) -> &'static str;
}

/// Version control operations used by the updater.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Pull upstream changes into the working copy at `dir`.
    async fn pull(&self, dir: &Path) -> Result<()>;

    /// Get a description of the backend for logging purposes.
    fn name(&self) -> &'static str;
}

/// Build the system backends from configuration.
pub fn system_backends(config: &CommandConfig) -> (Systemctl, Git) {
    (
        Systemctl::new(&config.systemctl, config.timeout()),
        Git::new(&config.git, config.timeout()),
    )
}

// Re-export main types
pub use command::{run_checked, CommandOutput};
pub use git::Git;
pub use systemd::Systemctl;
