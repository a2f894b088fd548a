//! systemd unit descriptors for Gunicorn services.
//!
//! A [`UnitDescriptor`] is built from an identifier, a port and the
//! application's working directory, then rendered to unit-file text. All
//! substituted values go through the escaping helpers below, so paths with
//! spaces, quotes or `%` render correctly and values that cannot be
//! represented at all (control characters, relative paths) are rejected.
//!
//! The module also reads units back ([`parse_unit`]), which the inventory
//! uses to report what has been provisioned.

use crate::config::{ProvisionConfig, TemplateConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A unit descriptor for one provisioned application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    /// Unit name without suffix (`flask_app7`)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Application directory
    pub working_directory: PathBuf,
    /// Value of the `PATH` environment variable
    pub path_env: PathBuf,
    /// Program and arguments of `ExecStart`
    pub exec_start: Vec<String>,
    /// `Restart=` policy
    pub restart: String,
    /// `User=`
    pub user: Option<String>,
    /// `Group=`
    pub group: Option<String>,
    /// `WantedBy=` target
    pub wanted_by: String,
}

impl UnitDescriptor {
    /// Build the descriptor for an identifier.
    pub fn new(
        name: impl Into<String>,
        port: u16,
        working_dir: &Path,
        template: &TemplateConfig,
    ) -> Self {
        let name = name.into();
        let bin_dir = working_dir.join(&template.venv_dir).join("bin");
        let server = bin_dir.join(&template.server);

        Self {
            description: format!("Gunicorn instance serving {}", name),
            name,
            working_directory: working_dir.to_path_buf(),
            path_env: bin_dir,
            exec_start: vec![
                server.to_string_lossy().into_owned(),
                "--workers".to_string(),
                template.workers.to_string(),
                "--bind".to_string(),
                format!("{}:{}", template.bind_host, port),
                template.app_module.clone(),
            ],
            restart: template.restart.clone(),
            user: template.user.clone(),
            group: template.group.clone(),
            wanted_by: template.wanted_by.clone(),
        }
    }

    /// Render to unit-file text.
    pub fn render(&self) -> Result<String> {
        let working_directory = path_str("WorkingDirectory", &self.working_directory)?;
        let working_directory = escape_value("WorkingDirectory", working_directory)?;
        if !self.working_directory.is_absolute() {
            return Err(Error::UnsafeValue {
                field: "WorkingDirectory",
                reason: format!("not an absolute path: {}", working_directory),
            });
        }
        let path_env = path_str("Environment", &self.path_env)?;

        let exec_start = self
            .exec_start
            .iter()
            .map(|arg| quote_exec_arg("ExecStart", arg))
            .collect::<Result<Vec<_>>>()?
            .join(" ");

        let mut lines = vec![
            "[Unit]".to_string(),
            format!("Description={}", escape_value("Description", &self.description)?),
            "After=network.target".to_string(),
            String::new(),
            "[Service]".to_string(),
        ];
        if let Some(ref user) = self.user {
            lines.push(format!("User={}", escape_value("User", user)?));
        }
        if let Some(ref group) = self.group {
            lines.push(format!("Group={}", escape_value("Group", group)?));
        }
        lines.extend([
            format!("WorkingDirectory={}", working_directory),
            format!(
                "Environment={}",
                quote_always("Environment", &format!("PATH={}", path_env))?
            ),
            format!("ExecStart={}", exec_start),
            format!("Restart={}", escape_value("Restart", &self.restart)?),
            String::new(),
            "[Install]".to_string(),
            format!("WantedBy={}", escape_value("WantedBy", &self.wanted_by)?),
        ]);

        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }
}

/// Render the unit descriptor for `identifier` with the configured template.
pub fn render_unit_descriptor(
    config: &ProvisionConfig,
    identifier: u32,
    port: u16,
    working_dir: &Path,
) -> Result<String> {
    UnitDescriptor::new(config.unit_name(identifier), port, working_dir, &config.template).render()
}

fn path_str<'a>(field: &'static str, path: &'a Path) -> Result<&'a str> {
    path.to_str().ok_or_else(|| Error::UnsafeValue {
        field,
        reason: format!("not valid UTF-8: {}", path.display()),
    })
}

fn reject_control(field: &'static str, value: &str) -> Result<()> {
    if let Some(c) = value.chars().find(|c| c.is_control()) {
        return Err(Error::UnsafeValue {
            field,
            reason: format!("contains control character {:?}", c),
        });
    }
    Ok(())
}

/// Escape a plain (unquoted) unit value: reject control characters and
/// double `%` so specifier expansion leaves the value alone.
pub fn escape_value(field: &'static str, value: &str) -> Result<String> {
    reject_control(field, value)?;
    if value != value.trim() {
        return Err(Error::UnsafeValue {
            field,
            reason: "leading or trailing whitespace".to_string(),
        });
    }
    Ok(value.replace('%', "%%"))
}

/// Quote a value in double quotes with C-style escapes for `\` and `"`.
pub fn quote_always(field: &'static str, value: &str) -> Result<String> {
    reject_control(field, value)?;
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '%' => out.push_str("%%"),
            _ => out.push(c),
        }
    }
    out.push('"');
    Ok(out)
}

/// Quote one `ExecStart` argument: `$` is doubled to stop variable
/// expansion, and the argument is quoted only when it needs to be.
pub fn quote_exec_arg(field: &'static str, arg: &str) -> Result<String> {
    reject_control(field, arg)?;
    let arg = arg.replace('$', "$$");
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if needs_quotes {
        quote_always(field, &arg)
    } else {
        Ok(arg.replace('%', "%%"))
    }
}

/// Parsed sections from a unit file.
#[derive(Debug, Default, Clone)]
pub struct UnitSections {
    pub unit: HashMap<String, String>,
    pub service: HashMap<String, String>,
    pub install: HashMap<String, String>,
}

/// Parse unit-file content into sections. Repeated keys are joined with a
/// space; unknown sections are ignored.
pub fn parse_sections(content: &str) -> UnitSections {
    let mut sections = UnitSections::default();
    let mut current_section = String::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].to_string();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().to_string();

            let section = match current_section.as_str() {
                "Unit" => &mut sections.unit,
                "Service" => &mut sections.service,
                "Install" => &mut sections.install,
                _ => continue,
            };

            if let Some(existing) = section.get_mut(&key) {
                existing.push(' ');
                existing.push_str(&value);
            } else {
                section.insert(key, value);
            }
        }
    }

    sections
}

/// Split an `ExecStart` line into arguments, undoing the quoting applied by
/// [`quote_exec_arg`].
pub fn split_exec(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_arg = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_arg = true;
            }
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                has_arg = true;
            }
            '%' | '$' if chars.peek() == Some(&c) => {
                chars.next();
                current.push(c);
                has_arg = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_arg {
                    args.push(std::mem::take(&mut current));
                    has_arg = false;
                }
            }
            c => {
                current.push(c);
                has_arg = true;
            }
        }
    }

    if has_arg {
        args.push(current);
    }
    args
}

/// Summary of a provisioned unit read back from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUnit {
    /// Unit name without suffix
    pub name: String,
    /// Description
    pub description: String,
    /// `WorkingDirectory=`
    pub working_directory: Option<PathBuf>,
    /// Port from the `--bind host:port` argument
    pub port: Option<u16>,
    /// Whether an `[Install]` target is set
    pub enabled: bool,
}

/// Parse a unit file into a [`ParsedUnit`].
pub fn parse_unit(content: &str, path: &Path) -> Result<ParsedUnit> {
    let sections = parse_sections(content);

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    let name = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
        .to_string();

    let exec_start = sections
        .service
        .get("ExecStart")
        .cloned()
        .unwrap_or_default();

    if exec_start.is_empty() {
        return Err(Error::InvalidUnit {
            path: path.to_path_buf(),
            reason: "missing ExecStart".to_string(),
        });
    }

    let args = split_exec(&exec_start);
    let port = args
        .iter()
        .position(|a| a == "--bind" || a == "-b")
        .and_then(|i| args.get(i + 1))
        .and_then(|bind| bind.rsplit_once(':'))
        .and_then(|(_, port)| port.parse().ok());

    let working_directory = sections
        .service
        .get("WorkingDirectory")
        .map(|s| PathBuf::from(s.replace("%%", "%")));

    let description = sections
        .unit
        .get("Description")
        .map(|s| s.replace("%%", "%"))
        .unwrap_or_default();

    let enabled = sections.install.contains_key("WantedBy")
        || sections.install.contains_key("RequiredBy");

    Ok(ParsedUnit {
        name,
        description,
        working_directory,
        port,
        enabled,
    })
}
