//! Error types for the gantry provisioner.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for provisioner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning or updating a service.
#[derive(Error, Debug)]
pub enum Error {
    /// A matching unit file yielded an identifier that cannot be used
    #[error("Cannot derive identifier from {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    /// Identifier space exhausted
    #[error("Identifier overflow after {0}")]
    IdentifierOverflow(u32),

    /// Port derived from an identifier does not fit in a TCP port
    #[error("Port out of range: {base} + {identifier} exceeds 65535")]
    PortOutOfRange { base: u16, identifier: u32 },

    /// A value cannot be embedded safely into a rendered artifact
    #[error("Unsafe value for {field}: {reason}")]
    UnsafeValue { field: &'static str, reason: String },

    /// The unit file for a freshly reserved identifier already exists
    #[error("Unit descriptor already exists: {0}")]
    DescriptorExists(PathBuf),

    /// Working directory of the managed application is missing
    #[error("Working directory does not exist: {0}")]
    WorkingDirMissing(PathBuf),

    /// External command exited unsuccessfully
    #[error("Command failed: {command} ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// External command could not be started
    #[error("Failed to spawn {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External command did not finish in time
    #[error("Command timed out after {timeout:?}: {command}")]
    CommandTimeout { command: String, timeout: Duration },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid unit file
    #[error("Invalid unit file: {path}: {reason}")]
    InvalidUnit { path: PathBuf, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
