//! gantry - Gunicorn service provisioner.
//!
//! This crate automates the deployment bookkeeping of Flask/Gunicorn
//! applications on a single host:
//!
//! - Allocating the next service identifier and its port
//! - Rendering a systemd unit for the application
//! - Rendering a companion update script (`pull.sh`)
//! - Reloading the service manager
//! - Pulling and restarting an application when an update is pending
//!
//! # Architecture
//!
//! - **Allocator**: derives identifiers from the unit directory and a
//!   persisted, lock-protected counter
//! - **Unit / Script**: typed renderers with escaping for their target format
//! - **Provisioner**: the reserve, render, persist, activate pipeline
//! - **Updater**: the in-process pull-and-restart procedure
//! - **External backends**: `systemctl` and `git` behind traits
//!
//! # Example
//!
//! ```no_run
//! use gantry::{ProvisionConfig, ProvisionRequest, Provisioner, Systemctl};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProvisionConfig::load(None)?;
//!     let manager = Arc::new(Systemctl::new("systemctl", config.commands.timeout()));
//!     let provisioner = Provisioner::new(config, manager);
//!     let report = provisioner
//!         .provision(&ProvisionRequest::new("/home/shop"))
//!         .await?;
//!     println!("{} on port {}", report.unit_name, report.record.port);
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod external;
pub mod inventory;
pub mod provisioner;
pub mod script;
pub mod unit;
pub mod updater;

// Re-export main types
pub use allocator::{compute_port, AllocationRecord, Allocator, Reservation};
pub use config::{CommandConfig, ProvisionConfig, TemplateConfig};
pub use error::{Error, Result};
pub use external::{Git, ServiceManager, SourceControl, Systemctl};
pub use inventory::InventoryEntry;
pub use provisioner::{
    ProvisionPlan, ProvisionReport, ProvisionRequest, Provisioner, StepOutcome,
};
pub use script::{render_update_script, UpdateScript};
pub use unit::{render_unit_descriptor, UnitDescriptor};
pub use updater::{UpdateOutcome, Updater};
