//! Persistent state: charge targets and per-role process locks
//!
//! Everything lives as small plain files in the per-user state folder. There are no
//! transactions beyond "last writer wins"; only one maintenance loop is alive at a time.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::constants::paths;
use crate::data::target::ChargeTarget;
use crate::error::{ChargeKeeperError, Result};

/// Which control loop a lock belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Maintain,
    Calibrate,
}

impl Role {
    fn pid_file(self) -> &'static str {
        match self {
            Role::Maintain => paths::MAINTAIN_PID_FILE,
            Role::Calibrate => paths::CALIBRATE_PID_FILE,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Maintain => write!(f, "maintain"),
            Role::Calibrate => write!(f, "calibrate"),
        }
    }
}

/// A pid recorded for a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLock {
    pub pid: u32,
    pub role: Role,
}

/// Storage seam for targets and locks
pub trait StateStore {
    fn load_target(&self) -> Result<Option<ChargeTarget>>;
    /// Replaces any previous target; percentage and voltage targets exclude each other
    fn save_target(&self, target: &ChargeTarget) -> Result<()>;
    fn clear_target(&self) -> Result<()>;
    fn load_lock(&self, role: Role) -> Result<Option<ProcessLock>>;
    fn acquire_lock(&self, role: Role, pid: u32) -> Result<()>;
    fn release_lock(&self, role: Role) -> Result<()>;
}

/// File-backed store rooted at the per-user state folder
#[derive(Debug, Clone)]
pub struct FsStateStore {
    dir: PathBuf,
}

impl FsStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store at the default location (`CHARGEKEEPER_HOME` or `~/.chargekeeper`)
    pub fn open_default() -> Result<Self> {
        let dir = paths::state_dir()
            .ok_or_else(|| ChargeKeeperError::generic("could not determine the home directory"))?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn percentage_path(&self) -> PathBuf {
        self.dir.join(paths::PERCENTAGE_TARGET_FILE)
    }

    pub fn voltage_path(&self) -> PathBuf {
        self.dir.join(paths::VOLTAGE_TARGET_FILE)
    }

    pub fn lock_path(&self, role: Role) -> PathBuf {
        self.dir.join(role.pid_file())
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(paths::LOG_FILE)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| ChargeKeeperError::FileWrite {
            path: self.dir.clone(),
            source: e,
        })
    }

    fn read_target_file(&self, path: &Path) -> Result<Option<ChargeTarget>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path).map_err(|e| ChargeKeeperError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let target: ChargeTarget = serde_json::from_str(&contents)?;
        Ok(Some(target))
    }
}

/// Write via a temp file in the same folder, then rename over the destination
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| ChargeKeeperError::FileWrite { path: temp_path.clone(), source: e })?;
    file.write_all(contents.as_bytes())
        .map_err(|e| ChargeKeeperError::FileWrite { path: temp_path.clone(), source: e })?;
    file.sync_all()
        .map_err(|e| ChargeKeeperError::FileWrite { path: temp_path.clone(), source: e })?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| ChargeKeeperError::FileWrite { path: path.to_path_buf(), source: e })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChargeKeeperError::FileWrite { path: path.to_path_buf(), source: e }),
    }
}

impl StateStore for FsStateStore {
    fn load_target(&self) -> Result<Option<ChargeTarget>> {
        // Voltage first: save_target removes the other file, but a half-finished
        // write from an older run could leave both behind.
        if let Some(target) = self.read_target_file(&self.voltage_path())? {
            return Ok(Some(target));
        }
        self.read_target_file(&self.percentage_path())
    }

    fn save_target(&self, target: &ChargeTarget) -> Result<()> {
        self.ensure_dir()?;
        let (keep, drop_path) = if target.is_voltage() {
            (self.voltage_path(), self.percentage_path())
        } else {
            (self.percentage_path(), self.voltage_path())
        };

        let json = serde_json::to_string_pretty(target)?;
        write_atomic(&keep, &json)?;
        remove_if_exists(&drop_path)?;

        info!("Persisted charge target {} to {:?}", target, keep);
        Ok(())
    }

    fn clear_target(&self) -> Result<()> {
        remove_if_exists(&self.percentage_path())?;
        remove_if_exists(&self.voltage_path())?;
        debug!("Cleared persisted charge target");
        Ok(())
    }

    fn load_lock(&self, role: Role) -> Result<Option<ProcessLock>> {
        let path = self.lock_path(role);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChargeKeeperError::FileRead { path, source: e }),
        };
        match contents.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(ProcessLock { pid, role })),
            _ => {
                warn!("Ignoring malformed {} lock at {:?}: {:?}", role, path, contents.trim());
                Ok(None)
            }
        }
    }

    fn acquire_lock(&self, role: Role, pid: u32) -> Result<()> {
        self.ensure_dir()?;
        let path = self.lock_path(role);
        write_atomic(&path, &format!("{pid}\n"))?;
        debug!("Recorded {} lock for PID {}", role, pid);
        Ok(())
    }

    fn release_lock(&self, role: Role) -> Result<()> {
        remove_if_exists(&self.lock_path(role))
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    target: Mutex<Option<ChargeTarget>>,
    locks: Mutex<HashMap<Role, u32>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load_target(&self) -> Result<Option<ChargeTarget>> {
        Ok(*self.target.lock())
    }

    fn save_target(&self, target: &ChargeTarget) -> Result<()> {
        *self.target.lock() = Some(*target);
        Ok(())
    }

    fn clear_target(&self) -> Result<()> {
        *self.target.lock() = None;
        Ok(())
    }

    fn load_lock(&self, role: Role) -> Result<Option<ProcessLock>> {
        Ok(self.locks.lock().get(&role).map(|&pid| ProcessLock { pid, role }))
    }

    fn acquire_lock(&self, role: Role, pid: u32) -> Result<()> {
        self.locks.lock().insert(role, pid);
        Ok(())
    }

    fn release_lock(&self, role: Role) -> Result<()> {
        self.locks.lock().remove(&role);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsStateStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStateStore::new(dir.path().join("state"));
        (dir, store)
    }

    #[test]
    fn test_voltage_round_trip_clears_percentage_file() {
        let (_dir, store) = store();
        store.save_target(&ChargeTarget::percentage(80).unwrap()).unwrap();
        assert!(store.percentage_path().exists());

        store.save_target(&ChargeTarget::voltage(11.4, 0.3).unwrap()).unwrap();
        assert!(!store.percentage_path().exists());

        let loaded = store.load_target().unwrap().unwrap();
        assert_eq!(loaded, ChargeTarget::voltage(11.4, 0.3).unwrap());
    }

    #[test]
    fn test_percentage_overwrites_voltage() {
        let (_dir, store) = store();
        store.save_target(&ChargeTarget::voltage(12.0, 0.2).unwrap()).unwrap();
        let range = ChargeTarget::range(70, 80).unwrap().with_force_discharge(true);
        store.save_target(&range).unwrap();

        assert!(!store.voltage_path().exists());
        assert_eq!(store.load_target().unwrap(), Some(range));
    }

    #[test]
    fn test_clear_target() {
        let (_dir, store) = store();
        assert_eq!(store.load_target().unwrap(), None);
        store.clear_target().unwrap();

        store.save_target(&ChargeTarget::percentage(60).unwrap()).unwrap();
        store.clear_target().unwrap();
        assert_eq!(store.load_target().unwrap(), None);
    }

    #[test]
    fn test_lock_lifecycle() {
        let (_dir, store) = store();
        assert_eq!(store.load_lock(Role::Maintain).unwrap(), None);

        store.acquire_lock(Role::Maintain, 4242).unwrap();
        store.acquire_lock(Role::Calibrate, 77).unwrap();
        assert_eq!(
            store.load_lock(Role::Maintain).unwrap(),
            Some(ProcessLock { pid: 4242, role: Role::Maintain })
        );

        store.acquire_lock(Role::Maintain, 5000).unwrap();
        assert_eq!(store.load_lock(Role::Maintain).unwrap().map(|l| l.pid), Some(5000));

        store.release_lock(Role::Maintain).unwrap();
        assert_eq!(store.load_lock(Role::Maintain).unwrap(), None);
        assert_eq!(store.load_lock(Role::Calibrate).unwrap().map(|l| l.pid), Some(77));
    }

    #[test]
    fn test_malformed_lock_is_absent() {
        let (_dir, store) = store();
        store.ensure_dir().unwrap();
        fs::write(store.lock_path(Role::Maintain), "not-a-pid").unwrap();
        assert_eq!(store.load_lock(Role::Maintain).unwrap(), None);
    }
}
