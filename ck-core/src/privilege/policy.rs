//! Installs the sudoers drop-in that lets the daemon elevate its closed command table
//!
//! The policy text is a pure function of [`PrivilegedOp::all`]. Installing is
//! idempotent: when the installed file already matches byte for byte only its
//! ownership and mode are re-asserted. A changed policy is syntax checked with
//! `visudo` before it replaces the old one, and a rejected policy leaves the old
//! file untouched.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use tracing::{debug, error, info};

use crate::constants::{paths, perms};
use crate::error::{ChargeKeeperError, Result};
use crate::hw::smc::RegisterWrite;
use crate::privilege::auditor::{enforce, InstallLayout};
use crate::privilege::elevate::PrivilegedOp;

const HEADER: &str = "# Privilege policy for chargekeeper. Managed automatically, do not edit.\n";

fn alias(op: &PrivilegedOp) -> &'static str {
    match op {
        PrivilegedOp::Register(w) => match w {
            RegisterWrite::ChargingModernOn
            | RegisterWrite::ChargingModernOff
            | RegisterWrite::ChargingLegacyBOn
            | RegisterWrite::ChargingLegacyBOff
            | RegisterWrite::ChargingLegacyCOn
            | RegisterWrite::ChargingLegacyCOff => "CHARGEKEEPER_CHARGING",
            RegisterWrite::Led(_) => "CHARGEKEEPER_LED",
            _ => "CHARGEKEEPER_ADAPTER",
        },
        PrivilegedOp::UpdateSilent => "CHARGEKEEPER_UPDATE",
    }
}

/// Policy text for the full command table
pub fn render_policy() -> String {
    let ops = PrivilegedOp::all();
    let mut aliases: Vec<&'static str> = Vec::new();
    for op in &ops {
        let a = alias(op);
        if !aliases.contains(&a) {
            aliases.push(a);
        }
    }

    let mut out = String::from(HEADER);
    for a in &aliases {
        let commands: Vec<String> = ops.iter().filter(|op| alias(op) == *a).map(|op| op.to_string()).collect();
        out.push_str(&format!("Cmnd_Alias {} = \\\n    {}\n", a, commands.join(", \\\n    ")));
    }
    out.push('\n');
    for a in &aliases {
        out.push_str(&format!("ALL ALL = NOPASSWD: {a}\n"));
    }
    out
}

/// Syntax check for a candidate policy file
#[cfg_attr(test, mockall::automock)]
pub trait PolicyValidator {
    fn validate(&self, candidate: &Path) -> Result<()>;
}

/// `visudo -c -f <file>`
#[derive(Debug, Default, Clone, Copy)]
pub struct Visudo;

impl PolicyValidator for Visudo {
    fn validate(&self, candidate: &Path) -> Result<()> {
        let output = Command::new(paths::VISUDO)
            .arg("-c")
            .arg("-f")
            .arg(candidate)
            .output()
            .map_err(|e| ChargeKeeperError::PolicyRejected(format!("failed to run visudo: {e}")))?;
        if output.status.success() {
            return Ok(());
        }
        let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if detail.is_empty() {
            detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Err(ChargeKeeperError::PolicyRejected(detail))
    }
}

/// What [`PolicyInstaller::install`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Installed file already matched
    Unchanged,
    /// New policy written
    Replaced,
}

pub struct PolicyInstaller<V: PolicyValidator> {
    layout: InstallLayout,
    validator: V,
}

impl PolicyInstaller<Visudo> {
    /// Installer for the real sudoers folder
    pub fn system() -> Self {
        Self::new(InstallLayout::system(), Visudo)
    }
}

impl<V: PolicyValidator> PolicyInstaller<V> {
    pub fn new(layout: InstallLayout, validator: V) -> Self {
        Self { layout, validator }
    }

    pub fn install(&self) -> Result<PolicyOutcome> {
        let dir = &self.layout.sudoers_dir;
        let target = &self.layout.sudoers_file;
        let rendered = render_policy();

        fs::create_dir_all(dir).map_err(|e| ChargeKeeperError::FileWrite { path: dir.clone(), source: e })?;

        // sudo skips files whose name contains a dot, so the candidate is inert
        // while it sits in the drop-in folder.
        let mut candidate = tempfile::Builder::new()
            .prefix(".chargekeeper")
            .tempfile_in(dir)
            .map_err(|e| ChargeKeeperError::FileWrite { path: dir.clone(), source: e })?;
        candidate
            .write_all(rendered.as_bytes())
            .and_then(|_| candidate.flush())
            .map_err(|e| ChargeKeeperError::FileWrite { path: candidate.path().to_path_buf(), source: e })?;

        let outcome = match fs::read(target) {
            Ok(installed) if installed == rendered.as_bytes() => {
                debug!("Privilege policy {} is up to date", target.display());
                PolicyOutcome::Unchanged
            }
            _ => {
                if let Err(e) = self.validator.validate(candidate.path()) {
                    error!("Refusing to install privilege policy: {}", e);
                    return Err(e);
                }
                fs::set_permissions(candidate.path(), fs::Permissions::from_mode(perms::SUDOERS_FILE_MODE))
                    .map_err(|e| ChargeKeeperError::FileWrite { path: candidate.path().to_path_buf(), source: e })?;
                candidate
                    .persist(target)
                    .map_err(|e| ChargeKeeperError::FileWrite { path: target.clone(), source: e.error })?;
                info!("Installed privilege policy {}", target.display());
                PolicyOutcome::Replaced
            }
        };

        let (uid, gid) = (self.layout.system_uid, self.layout.system_gid);
        for fix in enforce(target, uid, gid, Some(perms::SUDOERS_FILE_MODE))?
            .into_iter()
            .chain(enforce(dir, uid, gid, Some(perms::SUDOERS_DIR_MODE))?)
        {
            info!("Fixed {}", fix);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn layout(root: &Path) -> InstallLayout {
        InstallLayout::rooted_at(root, nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    #[test]
    fn test_render_lists_every_command_once() {
        let text = render_policy();
        for op in PrivilegedOp::all() {
            assert_eq!(text.matches(&format!("{op},")).count() + text.matches(&format!("{op}\n")).count(), 1, "{op}");
        }
        assert!(text.contains("ALL ALL = NOPASSWD: CHARGEKEEPER_UPDATE\n"));
        assert!(text.contains("/usr/local/bin/smc -k ACLC -w 00"));
        assert_eq!(text, render_policy());
    }

    #[test]
    fn test_second_install_rewrites_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(tmp.path());
        let mut validator = MockPolicyValidator::new();
        validator.expect_validate().with(always()).times(1).returning(|_| Ok(()));
        let installer = PolicyInstaller::new(layout.clone(), validator);

        assert_eq!(installer.install().unwrap(), PolicyOutcome::Replaced);
        let before = fs::metadata(&layout.sudoers_file).unwrap();
        assert_eq!(before.mode() & 0o777, 0o440);

        assert_eq!(installer.install().unwrap(), PolicyOutcome::Unchanged);
        let after = fs::metadata(&layout.sudoers_file).unwrap();
        assert_eq!(before.ino(), after.ino());
        assert_eq!(before.mtime_nsec(), after.mtime_nsec());
        assert_eq!(fs::read_dir(&layout.sudoers_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_rejected_policy_keeps_old_file() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(tmp.path());
        fs::create_dir_all(&layout.sudoers_dir).unwrap();
        fs::write(&layout.sudoers_file, "# old policy\n").unwrap();

        let mut validator = MockPolicyValidator::new();
        validator
            .expect_validate()
            .returning(|_| Err(ChargeKeeperError::PolicyRejected("syntax error".into())));

        let err = PolicyInstaller::new(layout.clone(), validator).install().unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(fs::read_to_string(&layout.sudoers_file).unwrap(), "# old policy\n");
        assert_eq!(fs::read_dir(&layout.sudoers_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_restores_mode_of_unchanged_file() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(tmp.path());
        fs::create_dir_all(&layout.sudoers_dir).unwrap();
        fs::write(&layout.sudoers_file, render_policy()).unwrap();
        fs::set_permissions(&layout.sudoers_file, fs::Permissions::from_mode(0o644)).unwrap();

        let mut validator = MockPolicyValidator::new();
        validator.expect_validate().never();

        let outcome = PolicyInstaller::new(layout.clone(), validator).install().unwrap();
        assert_eq!(outcome, PolicyOutcome::Unchanged);
        assert_eq!(fs::metadata(&layout.sudoers_file).unwrap().mode() & 0o777, 0o440);
    }
}
