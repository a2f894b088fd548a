//! The provisioning pipeline.
//!
//! One run of [`Provisioner::provision`]:
//!
//! 1. reserve the next identifier under the allocator lock
//! 2. derive the port, render the unit descriptor and the update script
//! 3. write the descriptor (never overwriting an existing one), mode 0644
//! 4. ask the service manager to reload its unit files
//! 5. write the update script (always overwriting), mode 0755
//! 6. commit the identifier to the counter and release the lock
//!
//! Rendering happens before anything touches the disk, so an unsafe value
//! leaves no trace. Once the descriptor exists the remaining steps are
//! attempted in order and their outcomes recorded in a [`ProvisionReport`];
//! a failed reload does not stop the script from being written.

use crate::allocator::{AllocationRecord, Allocator};
use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use crate::external::ServiceManager;
use crate::script::render_update_script;
use crate::unit::render_unit_descriptor;
use serde::{Deserialize, Serialize};
use std::fs::{OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Mode of unit descriptors: rw-r--r--
pub const DESCRIPTOR_MODE: u32 = 0o644;

/// Mode of update scripts: rwxr-xr-x
pub const SCRIPT_MODE: u32 = 0o755;

/// What to provision.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Application directory (absolute)
    pub working_dir: PathBuf,
    /// Update script location, defaults to `<home_root>/<basename>/<script_name>`
    pub script_path: Option<PathBuf>,
}

impl ProvisionRequest {
    /// Request for a working directory with the default script location.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            script_path: None,
        }
    }

    /// Override the script location.
    pub fn with_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = Some(path.into());
        self
    }
}

/// Rendered artifacts for one allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionPlan {
    pub record: AllocationRecord,
    pub unit_name: String,
    pub descriptor_path: PathBuf,
    pub descriptor: String,
    pub script_path: PathBuf,
    pub script: String,
}

/// Outcome of one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StepOutcome {
    Done,
    Failed(String),
}

impl StepOutcome {
    /// Check if the step succeeded.
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }

    fn from_result(step: &str, result: Result<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                warn!(step = %step, error = %e, "Provisioning step failed");
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Done => write!(f, "done"),
            StepOutcome::Failed(reason) => write!(f, "FAILED: {}", reason),
        }
    }
}

/// Result of a provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub record: AllocationRecord,
    pub unit_name: String,
    pub descriptor_path: PathBuf,
    pub script_path: PathBuf,
    /// `daemon-reload`
    pub reload: StepOutcome,
    /// Writing the update script
    pub script: StepOutcome,
}

impl ProvisionReport {
    /// Check if every step succeeded.
    pub fn is_success(&self) -> bool {
        self.reload.is_done() && self.script.is_done()
    }
}

/// Allocates identifiers and writes service artifacts.
pub struct Provisioner {
    config: ProvisionConfig,
    allocator: Allocator,
    manager: Arc<dyn ServiceManager>,
}

impl Provisioner {
    /// Create a provisioner.
    pub fn new(config: ProvisionConfig, manager: Arc<dyn ServiceManager>) -> Self {
        let allocator = Allocator::new(&config);
        Self {
            config,
            allocator,
            manager,
        }
    }

    /// Get the allocator.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Render the artifacts for an allocation without writing anything.
    pub fn plan(&self, request: &ProvisionRequest, record: AllocationRecord) -> Result<ProvisionPlan> {
        let working_dir = &request.working_dir;
        if !working_dir.is_absolute() {
            return Err(Error::UnsafeValue {
                field: "WorkingDirectory",
                reason: format!("not an absolute path: {}", working_dir.display()),
            });
        }
        if !working_dir.is_dir() {
            warn!(dir = %working_dir.display(), "Working directory does not exist yet");
        }

        let script_path = match request.script_path {
            Some(ref path) => path.clone(),
            None => self.config.script_path(working_dir)?,
        };

        let identifier = record.new_number;
        let descriptor = render_unit_descriptor(&self.config, identifier, record.port, working_dir)?;
        let script = render_update_script(&self.config, identifier, working_dir)?;

        Ok(ProvisionPlan {
            record,
            unit_name: self.config.unit_name(identifier),
            descriptor_path: self.config.unit_path(identifier),
            descriptor,
            script_path,
            script,
        })
    }

    /// Plan against the next free identifier without reserving it.
    pub fn preview(&self, request: &ProvisionRequest) -> Result<ProvisionPlan> {
        let record = self.allocator.peek()?;
        self.plan(request, record)
    }

    /// Run the full pipeline.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        // flock blocks until the lock is free
        let allocator = self.allocator.clone();
        let reservation = tokio::task::spawn_blocking(move || allocator.reserve())
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        let plan = self.plan(request, *reservation.record())?;

        let report = self.persist_and_activate(&plan).await?;
        reservation.commit()?;
        Ok(report)
    }

    /// Write the descriptor, reload the service manager and write the
    /// update script.
    ///
    /// Fails only when the descriptor cannot be written; later failures are
    /// reported in the returned [`ProvisionReport`].
    pub async fn persist_and_activate(&self, plan: &ProvisionPlan) -> Result<ProvisionReport> {
        write_descriptor(&plan.descriptor_path, &plan.descriptor)?;
        info!(
            unit = %plan.unit_name,
            port = plan.record.port,
            path = %plan.descriptor_path.display(),
            "Created unit descriptor"
        );
        Ok(self.activate(plan).await)
    }

    async fn activate(&self, plan: &ProvisionPlan) -> ProvisionReport {
        info!(manager = self.manager.name(), "Reloading service manager");
        let reload = StepOutcome::from_result("reload", self.manager.daemon_reload().await);

        let script = StepOutcome::from_result(
            "script",
            write_script(&plan.script_path, &plan.script),
        );
        if script.is_done() {
            info!(path = %plan.script_path.display(), "Wrote update script");
        }

        ProvisionReport {
            record: plan.record,
            unit_name: plan.unit_name.clone(),
            descriptor_path: plan.descriptor_path.clone(),
            script_path: plan.script_path.clone(),
            reload,
            script,
        }
    }
}

/// Create the descriptor file. An existing file is never replaced.
fn write_descriptor(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(DESCRIPTOR_MODE)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => Error::DescriptorExists(path.to_path_buf()),
            _ => Error::Io(e),
        })?;

    file.write_all(text.as_bytes())?;
    file.sync_all()?;

    // The creation mode is subject to the umask.
    std::fs::set_permissions(path, Permissions::from_mode(DESCRIPTOR_MODE))?;
    Ok(())
}

/// Write (or replace) the update script and mark it executable.
fn write_script(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    std::fs::set_permissions(path, Permissions::from_mode(SCRIPT_MODE))?;
    Ok(())
}
