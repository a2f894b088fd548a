//! Update scripts for provisioned services.
//!
//! The script lives next to the application (`/home/<app>/pull.sh`) and is
//! what a deploy hook or an operator runs to roll out new code: it pulls the
//! repository and restarts the bound unit, but only when the sentinel file
//! is present or `-f` is given.

use crate::config::ProvisionConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Inputs of a rendered update script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateScript {
    /// Unit restarted by the script
    pub service: String,
    /// Application directory the script operates in
    pub working_dir: PathBuf,
    /// Sentinel file name, relative to the working directory
    pub sentinel: String,
    /// `git` executable
    pub git: PathBuf,
    /// `systemctl` executable
    pub systemctl: PathBuf,
}

impl UpdateScript {
    /// Build the script description for an identifier.
    pub fn new(config: &ProvisionConfig, identifier: u32, working_dir: &Path) -> Self {
        Self {
            service: config.unit_name(identifier),
            working_dir: working_dir.to_path_buf(),
            sentinel: config.sentinel.clone(),
            git: config.commands.git.clone(),
            systemctl: config.commands.systemctl.clone(),
        }
    }

    /// Render the script text.
    pub fn render(&self) -> Result<String> {
        let working_dir = shell_quote("working_dir", &path_str(&self.working_dir)?)?;
        let service = shell_quote("service", &self.service)?;
        let sentinel = shell_quote("sentinel", &self.sentinel)?;
        let git = shell_quote("git", &path_str(&self.git)?)?;
        let systemctl = shell_quote("systemctl", &path_str(&self.systemctl)?)?;

        Ok(format!(
            r#"#!/bin/bash
# Update script for {service_comment}.
set -u

WORKING_DIR={working_dir}
SERVICE={service}
SENTINEL={sentinel}
GIT={git}
SYSTEMCTL={systemctl}

cd "$WORKING_DIR" || exit 1

FORCE=0
while getopts ":f" opt; do
    case "$opt" in
        f) FORCE=1 ;;
        *)
            echo "Usage: $0 [-f]" >&2
            exit 1
            ;;
    esac
done

if [ -f "$SENTINEL" ] || [ "$FORCE" -eq 1 ]; then
    echo "Pulling latest changes in $WORKING_DIR"
    if ! "$GIT" pull; then
        echo "Pull failed, keeping $SENTINEL" >&2
        exit 1
    fi

    echo "Restarting $SERVICE"
    if ! "$SYSTEMCTL" restart "$SERVICE"; then
        echo "Restart of $SERVICE failed, keeping $SENTINEL" >&2
        exit 1
    fi

    if [ -f "$SENTINEL" ]; then
        rm -f -- "$SENTINEL"
    fi
    echo "Update of $SERVICE complete"
else
    echo "No update pending for $SERVICE, nothing to do"
fi

exit 0
"#,
            service_comment = self.service.replace(|c: char| c.is_control(), "?"),
        ))
    }
}

/// Render the update script for `identifier` with the configured commands.
pub fn render_update_script(
    config: &ProvisionConfig,
    identifier: u32,
    working_dir: &Path,
) -> Result<String> {
    UpdateScript::new(config, identifier, working_dir).render()
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::UnsafeValue {
            field: "path",
            reason: format!("not valid UTF-8: {}", path.display()),
        })
}

/// Quote a value for POSIX shells using single quotes.
pub fn shell_quote(field: &'static str, value: &str) -> Result<String> {
    if value.contains('\0') {
        return Err(Error::UnsafeValue {
            field,
            reason: "contains NUL byte".to_string(),
        });
    }
    Ok(format!("'{}'", value.replace('\'', r#"'\''"#)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("x", "plain").unwrap(), "'plain'");
        assert_eq!(shell_quote("x", "it's").unwrap(), r#"'it'\''s'"#);
        assert_eq!(shell_quote("x", "$(rm -rf /)").unwrap(), "'$(rm -rf /)'");
        assert!(shell_quote("x", "a\0b").is_err());
    }

    #[test]
    fn test_render_binds_service() {
        let text =
            render_update_script(&ProvisionConfig::default(), 7, Path::new("/home/shop")).unwrap();

        assert!(text.starts_with("#!/bin/bash\n"));
        assert!(text.contains("WORKING_DIR='/home/shop'\n"));
        assert!(text.contains("SERVICE='flask_app7'\n"));
        assert!(text.contains("SENTINEL='.update'\n"));
        assert!(text.contains("cd \"$WORKING_DIR\" || exit 1\n"));
    }

    #[test]
    fn test_render_quotes_working_dir() {
        let text = render_update_script(
            &ProvisionConfig::default(),
            1,
            Path::new("/home/o'brien app"),
        )
        .unwrap();
        assert!(text.contains(r#"WORKING_DIR='/home/o'\''brien app'"#));
    }
}
