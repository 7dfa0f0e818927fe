//! Reboot persistence through a launchd LaunchAgent
//!
//! The agent runs `chargekeeper maintain_synchronous recover` at login, which
//! resumes the persisted target or exits quietly when there is none.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::constants::{paths, perms};
use crate::error::{ChargeKeeperError, Result};

/// Property list for the agent
pub fn render_launch_agent(binary: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{binary}</string>
        <string>maintain_synchronous</string>
        <string>recover</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
        label = paths::LAUNCH_AGENT_LABEL,
        binary = binary.display()
    )
}

/// `launchctl`, separated for tests
pub trait Launchctl {
    fn run(&self, args: &[&str]) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLaunchctl;

impl Launchctl for SystemLaunchctl {
    fn run(&self, args: &[&str]) -> Result<()> {
        debug!("launchctl {}", args.join(" "));
        let output = Command::new(paths::LAUNCHCTL)
            .args(args)
            .output()
            .map_err(|e| ChargeKeeperError::service(format!("failed to run launchctl: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ChargeKeeperError::service(format!(
                "launchctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Agent state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Installed,
    NotInstalled,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Installed => write!(f, "installed"),
            AgentStatus::NotInstalled => write!(f, "not installed"),
        }
    }
}

pub struct LaunchAgent<L: Launchctl> {
    path: PathBuf,
    binary: PathBuf,
    uid: u32,
    launchctl: L,
}

impl LaunchAgent<SystemLaunchctl> {
    /// Agent of the user `uid` with home `home`
    pub fn for_user(home: &Path, uid: u32) -> Self {
        Self::new(paths::launch_agent_in(home), paths::DAEMON_BINARY, uid, SystemLaunchctl)
    }
}

impl<L: Launchctl> LaunchAgent<L> {
    pub fn new(path: impl Into<PathBuf>, binary: impl Into<PathBuf>, uid: u32, launchctl: L) -> Self {
        Self { path: path.into(), binary: binary.into(), uid, launchctl }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> AgentStatus {
        if self.path.exists() {
            AgentStatus::Installed
        } else {
            AgentStatus::NotInstalled
        }
    }

    fn domain_target(&self) -> String {
        format!("gui/{}/{}", self.uid, paths::LAUNCH_AGENT_LABEL)
    }

    /// Write the agent if it differs from the rendered one, then enable it
    ///
    /// Returns true when the file was (re)written.
    pub fn create(&self) -> Result<bool> {
        let rendered = render_launch_agent(&self.binary);
        let written = match fs::read_to_string(&self.path) {
            Ok(existing) if existing == rendered => false,
            _ => {
                self.write(&rendered)?;
                info!("Registered LaunchAgent {}", self.path.display());
                true
            }
        };

        // Enabling an already enabled agent is a no-op for launchd.
        self.launchctl.run(&["enable", &self.domain_target()])?;
        Ok(written)
    }

    fn write(&self, content: &str) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| ChargeKeeperError::service(format!("invalid agent path {}", self.path.display())))?;
        fs::create_dir_all(dir).map_err(|e| ChargeKeeperError::FileWrite { path: dir.to_path_buf(), source: e })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ChargeKeeperError::FileWrite { path: dir.to_path_buf(), source: e })?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| ChargeKeeperError::FileWrite { path: tmp.path().to_path_buf(), source: e })?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(perms::LAUNCH_AGENT_MODE))?;
        tmp.persist(&self.path)
            .map_err(|e| ChargeKeeperError::FileWrite { path: self.path.clone(), source: e.error })?;
        Ok(())
    }

    /// Keep the file but stop launchd from running it
    pub fn disable(&self) -> Result<()> {
        self.launchctl.run(&["disable", &self.domain_target()])?;
        info!("Disabled LaunchAgent {}", paths::LAUNCH_AGENT_LABEL);
        Ok(())
    }

    /// Unload and delete the agent; a missing agent is not an error
    pub fn remove(&self) -> Result<()> {
        if !self.path.exists() {
            debug!("LaunchAgent {} not present", self.path.display());
            return Ok(());
        }
        let path = self.path.to_string_lossy().into_owned();
        if let Err(e) = self.launchctl.run(&["unload", &path]) {
            debug!("Unload failed (agent probably not loaded): {}", e);
        }
        fs::remove_file(&self.path).map_err(|e| ChargeKeeperError::FileWrite { path: self.path.clone(), source: e })?;
        info!("Removed LaunchAgent {}", self.path.display());
        Ok(())
    }
}
