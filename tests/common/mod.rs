//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use gantry::{Error, ProvisionConfig, Result, ServiceManager, SourceControl};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Records calls made to the external backends.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<String>>,
    pub fail_reload: bool,
    pub fail_restart: bool,
    pub fail_pull: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, fail: bool) -> Result<()> {
        self.calls.lock().unwrap().push(call.clone());
        if fail {
            return Err(Error::CommandFailed {
                command: call,
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for Recorder {
    async fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload".to_string(), self.fail_reload)
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.record(format!("restart {}", unit), self.fail_restart)
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[async_trait]
impl SourceControl for Recorder {
    async fn pull(&self, dir: &Path) -> Result<()> {
        self.record(format!("pull {}", dir.display()), self.fail_pull)
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// A sandboxed host layout: unit dir, state dir, home root and one app.
pub struct Sandbox {
    pub temp: TempDir,
    pub config: ProvisionConfig,
    pub app_dir: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path();

        let config = ProvisionConfig {
            unit_dir: root.join("systemd"),
            state_dir: root.join("state"),
            home_root: root.join("home"),
            ..Default::default()
        };

        let app_dir = root.join("apps").join("shop");
        std::fs::create_dir_all(&config.unit_dir).unwrap();
        std::fs::create_dir_all(&app_dir).unwrap();

        Self {
            temp,
            config,
            app_dir,
        }
    }

    /// Drop an existing unit file into the unit directory.
    pub fn add_unit(&self, name: &str) {
        std::fs::write(self.config.unit_dir.join(name), "[Service]\nExecStart=/bin/true\n")
            .unwrap();
    }
}
