//! Ownership and permission audit of an installation
//!
//! Everything that can run elevated, and the folder holding it, must be owned and
//! writable by the superuser only. Everything in the user's state folder must belong
//! to the unprivileged owner, otherwise the detached loop cannot write its log.
//!
//! The auditor repairs what it can (owner, group, mode) and reports each repair.
//! A symlink or a missing binary cannot be repaired in place and is an integrity
//! failure.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Gid, Uid};
use tracing::{info, warn};

use crate::constants::{paths, perms};
use crate::error::{ChargeKeeperError, Result};
use crate::privilege::owner::Owner;

/// Locations of the system-owned parts of an installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub bin_dir: PathBuf,
    pub daemon_binary: PathBuf,
    pub smc_binary: PathBuf,
    pub sudoers_dir: PathBuf,
    pub sudoers_file: PathBuf,
    /// Expected owner of system files
    pub system_uid: u32,
    pub system_gid: u32,
}

impl InstallLayout {
    /// The real installation
    pub fn system() -> Self {
        Self {
            bin_dir: PathBuf::from(paths::BIN_DIR),
            daemon_binary: PathBuf::from(paths::DAEMON_BINARY),
            smc_binary: PathBuf::from(paths::SMC_BINARY),
            sudoers_dir: PathBuf::from(paths::SUDOERS_DIR),
            sudoers_file: PathBuf::from(paths::SUDOERS_FILE),
            system_uid: perms::ROOT_UID,
            system_gid: perms::WHEEL_GID,
        }
    }

    /// Same shape rooted somewhere else, owned by `uid:gid`
    pub fn rooted_at(root: &Path, uid: u32, gid: u32) -> Self {
        let bin_dir = root.join("bin");
        let sudoers_dir = root.join("sudoers.d");
        Self {
            daemon_binary: bin_dir.join("chargekeeper"),
            smc_binary: bin_dir.join("smc"),
            sudoers_file: sudoers_dir.join("chargekeeper"),
            bin_dir,
            sudoers_dir,
            system_uid: uid,
            system_gid: gid,
        }
    }

    /// Paths that must be real, system-owned entries before anything is run elevated
    pub fn elevated_paths(&self) -> [&Path; 3] {
        [&self.bin_dir, &self.daemon_binary, &self.smc_binary]
    }
}

/// Problems with the elevated paths, empty when the installation can be trusted
///
/// Read only; never repairs anything.
pub fn verify_elevated_paths(layout: &InstallLayout) -> Vec<ChargeKeeperError> {
    let mut problems = Vec::new();
    for path in layout.elevated_paths() {
        match fs::symlink_metadata(path) {
            Err(e) => problems.push(ChargeKeeperError::integrity(path, format!("not accessible: {e}"))),
            Ok(meta) if meta.file_type().is_symlink() => {
                problems.push(ChargeKeeperError::integrity(path, "is a symbolic link"))
            }
            Ok(meta) if meta.uid() != layout.system_uid => problems.push(ChargeKeeperError::integrity(
                path,
                format!("owned by uid {} instead of {}", meta.uid(), layout.system_uid),
            )),
            Ok(meta) if meta.mode() & perms::GROUP_OTHER_WRITE != 0 => {
                problems.push(ChargeKeeperError::integrity(path, "writable by group or others"))
            }
            Ok(_) => {}
        }
    }
    problems
}

/// Bring `path` to `uid:gid` and `mode`, returning a description of each change
///
/// Symlinks are refused rather than followed.
pub fn enforce(path: &Path, uid: u32, gid: u32, mode: Option<u32>) -> Result<Vec<String>> {
    let meta = fs::symlink_metadata(path).map_err(|e| ChargeKeeperError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    if meta.file_type().is_symlink() {
        return Err(ChargeKeeperError::integrity(path, "is a symbolic link"));
    }

    let mut fixes = Vec::new();
    if meta.uid() != uid || meta.gid() != gid {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
            ChargeKeeperError::integrity(path, format!("cannot change owner to {uid}:{gid}: {e}"))
        })?;
        fixes.push(format!(
            "{}: owner {}:{} -> {}:{}",
            path.display(),
            meta.uid(),
            meta.gid(),
            uid,
            gid
        ));
    }

    if let Some(mode) = mode {
        let current = meta.mode() & 0o7777;
        if current != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
                ChargeKeeperError::FileWrite { path: path.to_path_buf(), source: e }
            })?;
            fixes.push(format!("{}: mode {:o} -> {:o}", path.display(), current, mode));
        }
    }
    Ok(fixes)
}

/// Repairs applied by one audit
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub fixes: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.fixes.is_empty()
    }
}

/// Checks and repairs the whole installation
#[derive(Debug, Clone)]
pub struct InstallationAuditor {
    layout: InstallLayout,
    owner: Owner,
    state_dir: PathBuf,
    launch_agent: PathBuf,
}

impl InstallationAuditor {
    pub fn new(layout: InstallLayout, owner: Owner) -> Self {
        let state_dir = owner.state_dir();
        let launch_agent = owner.launch_agent();
        Self { layout, owner, state_dir, launch_agent }
    }

    /// Audit a state folder other than the owner's default one
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_launch_agent(mut self, path: impl Into<PathBuf>) -> Self {
        self.launch_agent = path.into();
        self
    }

    pub fn audit(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();
        let (suid, sgid) = (self.layout.system_uid, self.layout.system_gid);

        for path in self.layout.elevated_paths() {
            if fs::symlink_metadata(path).is_err() {
                return Err(ChargeKeeperError::integrity(path, "missing"));
            }
            report.fixes.extend(enforce(path, suid, sgid, Some(perms::BINARY_MODE))?);
        }

        if self.layout.sudoers_dir.exists() {
            report
                .fixes
                .extend(enforce(&self.layout.sudoers_dir, suid, sgid, Some(perms::SUDOERS_DIR_MODE))?);
        }
        if self.layout.sudoers_file.exists() {
            report.fixes.extend(enforce(
                &self.layout.sudoers_file,
                suid,
                sgid,
                Some(perms::SUDOERS_FILE_MODE),
            )?);
        }

        report.fixes.extend(self.audit_user_files()?);

        for fix in &report.fixes {
            info!("Fixed {}", fix);
        }
        Ok(report)
    }

    fn audit_user_files(&self) -> Result<Vec<String>> {
        let (uid, gid) = (self.owner.uid, self.owner.gid);
        let mut fixes = Vec::new();

        if self.state_dir.is_dir() {
            fixes.extend(enforce(&self.state_dir, uid, gid, None)?);
            let entries = fs::read_dir(&self.state_dir).map_err(|e| ChargeKeeperError::FileRead {
                path: self.state_dir.clone(),
                source: e,
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                match enforce(&path, uid, gid, None) {
                    Ok(f) => fixes.extend(f),
                    // A symlink in the state folder is skipped, never followed.
                    Err(ChargeKeeperError::Integrity { .. }) => {
                        warn!("Skipping symbolic link {}", path.display())
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if self.launch_agent.exists() {
            fixes.extend(enforce(&self.launch_agent, uid, gid, Some(perms::LAUNCH_AGENT_MODE))?);
        }
        Ok(fixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn me() -> (u32, u32) {
        (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    fn install(root: &Path) -> InstallLayout {
        let (uid, gid) = me();
        let layout = InstallLayout::rooted_at(root, uid, gid);
        fs::create_dir_all(&layout.bin_dir).unwrap();
        fs::write(&layout.daemon_binary, b"#!/bin/sh\n").unwrap();
        fs::write(&layout.smc_binary, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&layout.bin_dir, fs::Permissions::from_mode(0o755)).unwrap();
        layout
    }

    fn owner(home: &Path) -> Owner {
        let (uid, gid) = me();
        Owner { name: "tester".into(), uid, gid, home: home.to_path_buf() }
    }

    #[test]
    fn test_audit_repairs_modes_then_is_clean() {
        let tmp = TempDir::new().unwrap();
        let layout = install(tmp.path());
        fs::set_permissions(&layout.smc_binary, fs::Permissions::from_mode(0o777)).unwrap();

        let auditor = InstallationAuditor::new(layout.clone(), owner(tmp.path()));
        let first = auditor.audit().unwrap();
        assert!(first.fixes.iter().any(|f| f.contains("smc") && f.contains("777 -> 755")));

        let mode = fs::metadata(&layout.smc_binary).unwrap().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert!(auditor.audit().unwrap().is_clean());
    }

    #[test]
    fn test_symlinked_binary_is_integrity_failure() {
        let tmp = TempDir::new().unwrap();
        let layout = install(tmp.path());
        let real = tmp.path().join("elsewhere");
        fs::write(&real, b"x").unwrap();
        fs::remove_file(&layout.smc_binary).unwrap();
        symlink(&real, &layout.smc_binary).unwrap();

        let err = InstallationAuditor::new(layout.clone(), owner(tmp.path())).audit().unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(verify_elevated_paths(&layout).len(), 1);
    }

    #[test]
    fn test_missing_binary() {
        let tmp = TempDir::new().unwrap();
        let layout = install(tmp.path());
        fs::remove_file(&layout.daemon_binary).unwrap();
        assert!(InstallationAuditor::new(layout, owner(tmp.path())).audit().is_err());
    }

    #[test]
    fn test_verify_flags_foreign_owner() {
        let tmp = TempDir::new().unwrap();
        let mut layout = install(tmp.path());
        fs::set_permissions(&layout.daemon_binary, fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(&layout.smc_binary, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(verify_elevated_paths(&layout).is_empty());

        layout.system_uid = layout.system_uid.wrapping_add(1);
        assert_eq!(verify_elevated_paths(&layout).len(), 3);
    }

    #[test]
    fn test_launch_agent_mode() {
        let tmp = TempDir::new().unwrap();
        let layout = install(tmp.path());
        let agent = tmp.path().join("agent.plist");
        fs::write(&agent, b"<plist/>").unwrap();
        fs::set_permissions(&agent, fs::Permissions::from_mode(0o600)).unwrap();

        let report = InstallationAuditor::new(layout, owner(tmp.path()))
            .with_state_dir(tmp.path().join("state"))
            .with_launch_agent(&agent)
            .audit()
            .unwrap();
        assert!(report.fixes.iter().any(|f| f.contains("600 -> 644")));
    }
}
