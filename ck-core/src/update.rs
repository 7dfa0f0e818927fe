//! Self-update with an integrity gate
//!
//! An update is only attempted when the elevated paths are real, root-owned files
//! and the policy still lets `update_silent` run without a prompt. Anything else
//! means the installation cannot be trusted and a full reinstall is required
//! instead; the update path is never taken in a weakened state.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::constants::update;
use crate::error::{ChargeKeeperError, Result};
use crate::privilege::{verify_elevated_paths, Elevator, InstallLayout, PrivilegedOp};

lazy_static! {
    static ref SCRIPT_VERSION_RE: Regex =
        Regex::new(r#"(?mi)^\s*(?:export\s+|local\s+)?version=["']?v?(\d+\.\d+\.\d+)"#).unwrap();
}

/// Parse `X.Y.Z` or `vX.Y.Z`
pub fn parse_version(s: &str) -> Result<(u32, u32, u32)> {
    let s = s.trim().trim_start_matches(['v', 'V']);
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 3 {
        return Err(ChargeKeeperError::Update(format!("invalid version {s}, expected X.Y.Z")));
    }
    let num = |p: &str| {
        p.parse::<u32>()
            .map_err(|_| ChargeKeeperError::Update(format!("invalid version component {p} in {s}")))
    };
    Ok((num(parts[0])?, num(parts[1])?, num(parts[2])?))
}

/// True when `remote` is strictly newer than `local`
pub fn is_newer(local: &str, remote: &str) -> Result<bool> {
    Ok(parse_version(remote)? > parse_version(local)?)
}

/// Version carried by a published update script
pub fn script_version(script: &str) -> Option<String> {
    SCRIPT_VERSION_RE.captures(script).map(|c| c[1].to_string())
}

/// Fetches published scripts
pub trait ScriptFetcher {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTPS fetcher
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(update::FETCH_TIMEOUT_SECS))
            .user_agent(update::USER_AGENT)
            .build()
            .map_err(|e| ChargeKeeperError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ScriptFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| ChargeKeeperError::Network(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ChargeKeeperError::Network(format!("{url}: HTTP {}", response.status())));
        }
        response.text().map_err(|e| ChargeKeeperError::Network(format!("{url}: {e}")))
    }
}

/// Runs a fetched script
pub trait ScriptRunner {
    fn run(&self, script: &str, args: &[&str]) -> Result<()>;
}

/// Pipes the script into the shell's stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ScriptRunner for ShellRunner {
    fn run(&self, script: &str, args: &[&str]) -> Result<()> {
        let mut child = Command::new(update::SHELL)
            .arg("-s")
            .arg("--")
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| ChargeKeeperError::Update(format!("failed to start {}: {e}", update::SHELL)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(ChargeKeeperError::Update(format!("script exited with {status}")))
        }
    }
}

/// Outcome of an update check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Installation cannot be trusted; reasons listed
    Reinstall(Vec<String>),
    UpToDate { remote: String },
    Available { remote: String, script: String },
}

pub struct Updater<'a> {
    layout: InstallLayout,
    elevator: &'a dyn Elevator,
    fetcher: &'a dyn ScriptFetcher,
    local_version: String,
}

impl<'a> Updater<'a> {
    pub fn new(layout: InstallLayout, elevator: &'a dyn Elevator, fetcher: &'a dyn ScriptFetcher) -> Self {
        Self { layout, elevator, fetcher, local_version: crate::constants::VERSION.to_string() }
    }

    pub fn with_local_version(mut self, version: impl Into<String>) -> Self {
        self.local_version = version.into();
        self
    }

    /// Reasons the installation fails the integrity gate
    pub fn integrity_problems(&self) -> Vec<String> {
        let mut problems: Vec<String> =
            verify_elevated_paths(&self.layout).into_iter().map(|e| e.to_string()).collect();
        if !self.elevator.can_run_unattended(PrivilegedOp::UpdateSilent) {
            problems.push(format!("{} cannot be elevated without a password", PrivilegedOp::UpdateSilent));
        }
        problems
    }

    pub fn check(&self) -> Result<UpdateDecision> {
        let problems = self.integrity_problems();
        if !problems.is_empty() {
            for p in &problems {
                warn!("Integrity check failed: {}", p);
            }
            return Ok(UpdateDecision::Reinstall(problems));
        }

        let script = self.fetcher.fetch(update::UPDATE_SCRIPT_URL)?;
        let remote = script_version(&script)
            .ok_or_else(|| ChargeKeeperError::Update("published update script carries no version".into()))?;

        if is_newer(&self.local_version, &remote)? {
            info!("Update available: {} -> {}", self.local_version, remote);
            Ok(UpdateDecision::Available { remote, script })
        } else {
            debug!("Installed {} is current (published {})", self.local_version, remote);
            Ok(UpdateDecision::UpToDate { remote })
        }
    }

    /// Fetch and run the canonical installer
    pub fn reinstall(&self, runner: &dyn ScriptRunner) -> Result<()> {
        let script = self.fetcher.fetch(update::SETUP_SCRIPT_URL)?;
        info!("Reinstalling from {}", update::SETUP_SCRIPT_URL);
        runner.run(&script, &[])
    }

    /// Fetch and run the published uninstaller
    pub fn uninstall(&self, runner: &dyn ScriptRunner, silent: bool) -> Result<()> {
        let script = self.fetcher.fetch(update::UNINSTALL_SCRIPT_URL)?;
        let args: &[&str] = if silent { &["silent"] } else { &[] };
        runner.run(&script, args)
    }
}
