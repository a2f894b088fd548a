//! `git` backend.

use super::command::run_checked;
use super::SourceControl;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Source control backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
    timeout: Duration,
}

impl Git {
    /// Create a backend invoking `program`.
    pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            timeout,
        }
    }
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git", Duration::from_secs(120))
    }
}

#[async_trait]
impl SourceControl for Git {
    async fn pull(&self, dir: &Path) -> Result<()> {
        let output = run_checked(&self.program, &["pull"], Some(dir), self.timeout).await?;
        info!(
            dir = %dir.display(),
            summary = %output.stdout.lines().last().unwrap_or(""),
            "Pulled repository"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "git"
    }
}
