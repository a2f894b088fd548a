//! `systemctl` backend.

use super::command::run_checked;
use super::ServiceManager;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Service manager backed by the `systemctl` binary.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: PathBuf,
    timeout: Duration,
}

impl Systemctl {
    /// Create a backend invoking `program`.
    pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            timeout,
        }
    }
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new("systemctl", Duration::from_secs(120))
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn daemon_reload(&self) -> Result<()> {
        run_checked(&self.program, &["daemon-reload"], None, self.timeout).await?;
        info!("Reloaded systemd manager configuration");
        Ok(())
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        run_checked(&self.program, &["restart", unit], None, self.timeout).await?;
        info!(unit = %unit, "Restarted unit");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "systemctl"
    }
}
