//! Service identifier and port allocation.
//!
//! Identifiers are small positive integers appended to the unit prefix
//! (`flask_app1`, `flask_app2`, ...). The next identifier is one past the
//! highest identifier known, where "known" is the union of:
//!
//! - unit files already present in the unit directory, and
//! - the last identifier recorded in the persisted counter.
//!
//! Reservations take an exclusive `flock` on `<state_dir>/allocator.lock`
//! and hold it until the caller commits, so two provisioners started at the
//! same time never hand out the same identifier.

use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use nix::fcntl::{flock, FlockArg};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lock file name inside the state directory
pub const LOCK_FILE_NAME: &str = "allocator.lock";

/// Counter file name inside the state directory
pub const COUNTER_FILE_NAME: &str = "counter.toml";

/// Derived allocation for one provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Highest identifier already in use (0 when none)
    pub last_number: u32,
    /// Identifier handed out by this allocation
    pub new_number: u32,
    /// Port derived from `new_number`
    pub port: u16,
}

/// Port for an identifier: `base + identifier`.
pub fn compute_port(base: u16, identifier: u32) -> Result<u16> {
    u32::from(base)
        .checked_add(identifier)
        .and_then(|p| u16::try_from(p).ok())
        .ok_or(Error::PortOutOfRange { base, identifier })
}

/// A unit file discovered in the unit directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUnit {
    /// Path of the unit file
    pub path: PathBuf,
    /// Identifier extracted from its name
    pub identifier: u32,
}

/// Persisted allocator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterState {
    /// Last identifier handed out
    pub last: u32,
    /// Time of the last commit
    pub updated_at: DateTime<Utc>,
}

impl CounterState {
    /// Load the counter, treating a missing file as zero.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let state: Self = toml::from_str(&content)?;
        Ok(Some(state))
    }

    /// Write the counter through a temporary file and rename it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Scans the unit directory and manages the persisted counter.
#[derive(Debug, Clone)]
pub struct Allocator {
    unit_dir: PathBuf,
    unit_prefix: String,
    unit_suffix: String,
    state_dir: PathBuf,
    base_port: u16,
    digits: Regex,
}

impl Allocator {
    /// Create an allocator for the given configuration.
    pub fn new(config: &ProvisionConfig) -> Self {
        // Last run of digits, possibly followed by non-digits.
        let digits = Regex::new(r"([0-9]+)[^0-9]*$").expect("Invalid identifier regex");

        Self {
            unit_dir: config.unit_dir.clone(),
            unit_prefix: config.unit_prefix.clone(),
            unit_suffix: config.unit_suffix.clone(),
            state_dir: config.state_dir.clone(),
            base_port: config.base_port,
            digits,
        }
    }

    /// Path of the counter file.
    pub fn counter_path(&self) -> PathBuf {
        self.state_dir.join(COUNTER_FILE_NAME)
    }

    /// Path of the lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE_NAME)
    }

    /// Extract the identifier from a unit file name.
    ///
    /// Returns `Ok(None)` for names that do not match the prefix/suffix
    /// pattern or whose base name carries no digits. A digit run too large
    /// for `u32` is a discovery error.
    pub fn identifier_from_name(&self, file_name: &str) -> Result<Option<u32>> {
        if !file_name.starts_with(&self.unit_prefix) {
            return Ok(None);
        }
        let Some(stem) = file_name.strip_suffix(&self.unit_suffix) else {
            return Ok(None);
        };

        let Some(caps) = self.digits.captures(stem) else {
            warn!(name = %file_name, "Skipping unit file without identifier");
            return Ok(None);
        };

        caps[1]
            .parse::<u32>()
            .map(Some)
            .map_err(|e| Error::Discovery {
                path: self.unit_dir.join(file_name),
                reason: e.to_string(),
            })
    }

    /// List the provisioned unit files in the unit directory, sorted by
    /// identifier. A missing directory has no units.
    pub fn scan(&self) -> Result<Vec<DiscoveredUnit>> {
        if !self.unit_dir.exists() {
            debug!(dir = %self.unit_dir.display(), "Unit directory does not exist");
            return Ok(Vec::new());
        }

        let mut units = Vec::new();
        for entry in std::fs::read_dir(&self.unit_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if let Some(identifier) = self.identifier_from_name(name)? {
                units.push(DiscoveredUnit {
                    path: entry.path(),
                    identifier,
                });
            }
        }

        units.sort_by_key(|u| u.identifier);
        Ok(units)
    }

    /// Next identifier based on the directory scan alone: `1` when no unit
    /// exists, otherwise one past the highest identifier found.
    pub fn allocate_next_identifier(&self) -> Result<u32> {
        let last = self.scan()?.last().map(|u| u.identifier).unwrap_or(0);
        next_after(last)
    }

    /// Compute the allocation a reservation would make right now, without
    /// locking or persisting anything.
    pub fn peek(&self) -> Result<AllocationRecord> {
        let counter = CounterState::load(&self.counter_path())?;
        self.record_for(counter.as_ref())
    }

    /// Reserve the next identifier.
    ///
    /// Blocks until the allocator lock is available. The lock is released
    /// when the returned reservation is committed or dropped; dropping
    /// without committing leaves the counter untouched.
    pub fn reserve(&self) -> Result<Reservation> {
        std::fs::create_dir_all(&self.state_dir)?;

        let lock_path = self.lock_path();
        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        debug!(path = %lock_path.display(), "Waiting for allocator lock");
        flock(lock.as_raw_fd(), FlockArg::LockExclusive)?;

        // Owner PID, for whoever finds the lock held.
        lock.set_len(0)?;
        writeln!(lock, "{}", std::process::id())?;

        let counter_path = self.counter_path();
        let counter = CounterState::load(&counter_path)?;
        let record = self.record_for(counter.as_ref())?;

        info!(
            identifier = record.new_number,
            port = record.port,
            "Reserved service identifier"
        );

        Ok(Reservation {
            _lock: lock,
            counter_path,
            record,
        })
    }

    fn record_for(&self, counter: Option<&CounterState>) -> Result<AllocationRecord> {
        let scanned = self.scan()?.last().map(|u| u.identifier).unwrap_or(0);
        let persisted = counter.map(|c| c.last).unwrap_or(0);

        if persisted > scanned {
            debug!(persisted, scanned, "Counter is ahead of the unit directory");
        }

        let last_number = scanned.max(persisted);
        let new_number = next_after(last_number)?;
        let port = compute_port(self.base_port, new_number)?;

        Ok(AllocationRecord {
            last_number,
            new_number,
            port,
        })
    }
}

fn next_after(last: u32) -> Result<u32> {
    last.checked_add(1).ok_or(Error::IdentifierOverflow(last))
}

/// An identifier held under the allocator lock.
pub struct Reservation {
    _lock: File,
    counter_path: PathBuf,
    record: AllocationRecord,
}

impl Reservation {
    /// The reserved allocation.
    pub fn record(&self) -> &AllocationRecord {
        &self.record
    }

    /// Record the identifier as used and release the lock.
    pub fn commit(self) -> Result<AllocationRecord> {
        let state = CounterState {
            last: self.record.new_number,
            updated_at: Utc::now(),
        };
        state.save(&self.counter_path)?;
        debug!(last = state.last, "Committed allocator counter");
        Ok(self.record)
    }
}
