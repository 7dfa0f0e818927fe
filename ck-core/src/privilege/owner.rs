//! The unprivileged user who owns the per-user state
//!
//! Elevated runs must not leave root-owned files in the user's home, so they need to
//! know who that user is. Candidates, in order: an explicit name, `SUDO_USER`, then
//! the owner of the console. A candidate that resolves to root is rejected.

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use nix::unistd::{Uid, User};
use tracing::debug;

use crate::constants::paths;
use crate::error::{ChargeKeeperError, Result};

/// Resolved account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Owner {
    pub fn state_dir(&self) -> PathBuf {
        paths::state_dir_in(&self.home)
    }

    pub fn launch_agent(&self) -> PathBuf {
        paths::launch_agent_in(&self.home)
    }
}

impl From<User> for Owner {
    fn from(u: User) -> Self {
        Self { name: u.name, uid: u.uid.as_raw(), gid: u.gid.as_raw(), home: u.dir }
    }
}

/// Where a candidate came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Name(String),
    Uid(u32),
}

/// Account lookups, separated for tests
pub trait UserDirectory {
    fn by_name(&self, name: &str) -> Option<Owner>;
    fn by_uid(&self, uid: u32) -> Option<Owner>;
}

/// The system account database
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUsers;

impl UserDirectory for SystemUsers {
    fn by_name(&self, name: &str) -> Option<Owner> {
        User::from_name(name).ok().flatten().map(Owner::from)
    }

    fn by_uid(&self, uid: u32) -> Option<Owner> {
        User::from_uid(Uid::from_raw(uid)).ok().flatten().map(Owner::from)
    }
}

/// First candidate that names a real, non-root account
pub fn select_owner(candidates: &[Candidate], users: &dyn UserDirectory) -> Result<Owner> {
    for candidate in candidates {
        let found = match candidate {
            Candidate::Name(n) if n.is_empty() => None,
            Candidate::Name(n) => users.by_name(n),
            Candidate::Uid(uid) => users.by_uid(*uid),
        };
        match found {
            Some(owner) if owner.uid != 0 => return Ok(owner),
            Some(_) => {
                // An explicit or inherited root answer means there is no usable owner.
                debug!("Owner candidate {:?} is root", candidate);
                return Err(ChargeKeeperError::OwnerUnknown);
            }
            None => debug!("Owner candidate {:?} did not resolve", candidate),
        }
    }
    Err(ChargeKeeperError::OwnerUnknown)
}

/// Resolve the owner for this process
///
/// Unprivileged runs are their own owner.
pub fn resolve_owner(explicit: Option<&str>) -> Result<Owner> {
    let users = SystemUsers;
    let euid = nix::unistd::geteuid();
    if !euid.is_root() {
        return users.by_uid(euid.as_raw()).ok_or(ChargeKeeperError::OwnerUnknown);
    }

    let mut candidates = Vec::new();
    if let Some(name) = explicit {
        candidates.push(Candidate::Name(name.to_string()));
    }
    if let Ok(name) = std::env::var("SUDO_USER") {
        candidates.push(Candidate::Name(name));
    }
    if let Ok(meta) = std::fs::metadata(paths::CONSOLE_DEVICE) {
        candidates.push(Candidate::Uid(meta.uid()));
    }
    select_owner(&candidates, &users)
}
