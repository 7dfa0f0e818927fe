/*
 * This file is part of ChargeKeeper.
 *
 * Copyright (C) 2025 ChargeKeeper contributors
 *
 * ChargeKeeper is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * ChargeKeeper is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with ChargeKeeper. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command handlers
//!
//! Each subcommand maps to one function here. Validation always happens before
//! any lock, register or file is touched.

use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use ck_core::constants::{paths, VERSION};
use ck_core::privilege::auditor;
use ck_core::{
    is_root, preempt, resolve_owner, take_over, validate_percentage, BatteryReading,
    CapabilitySet, ChargeController, ChargeKeeperError, ChargeTarget, Converge, Elevator,
    FsStateStore, HttpFetcher, InstallLayout, InstallationAuditor, LaunchAgent, LedColor, Owner,
    PmsetTelemetry, PolicyInstaller, PolicyOutcome, PrivilegedOp, ProcessControl, Role,
    ScriptRunner, ShellRunner, SmcTool, StateStore, SudoElevator, SystemLaunchctl, SystemProcesses,
    TelemetrySource, UpdateDecision, Updater,
};
use tracing::{debug, info, warn};

use crate::cli::{Commands, MaintainArgs, Quiet, SilentCheck, Toggle};
use crate::logger;
use crate::supervisor::{Supervisor, SystemClock};

/// Everything a handler needs about this user and machine
pub struct Runtime {
    pub owner: Owner,
    pub store: FsStateStore,
    pub procs: SystemProcesses,
    pub elevator: SudoElevator,
}

impl Runtime {
    pub fn new(explicit_owner: Option<&str>) -> Result<Self> {
        let owner = resolve_owner(explicit_owner)?;
        let store = FsStateStore::new(paths::state_dir_for(&owner.home));
        debug!("Owner {} (uid {}), state in {}", owner.name, owner.uid, store.dir().display());
        Ok(Self { owner, store, procs: SystemProcesses, elevator: SudoElevator::new() })
    }

    fn smc(&self) -> SmcTool<SudoElevator> {
        SmcTool::new(self.elevator.clone())
    }

    fn launch_agent(&self) -> LaunchAgent<SystemLaunchctl> {
        LaunchAgent::for_user(&self.owner.home, self.owner.uid)
    }

    fn auditor(&self) -> InstallationAuditor {
        InstallationAuditor::new(InstallLayout::system(), self.owner.clone())
            .with_state_dir(self.store.dir())
    }
}

/// Run one subcommand
pub fn run(command: Commands) -> Result<()> {
    match &command {
        Commands::Version => {
            println!("{VERSION}");
            return Ok(());
        }
        Commands::UpdateSilent { check: Some(SilentCheck::IsEnabled) } => {
            let enabled = SudoElevator::new().can_run_unattended(PrivilegedOp::UpdateSilent);
            println!("{}", if enabled { "enabled" } else { "disabled" });
            return Ok(());
        }
        _ => {}
    }

    let explicit = match &command {
        Commands::Visudo { user } => user.as_deref(),
        _ => None,
    };
    let rt = Runtime::new(explicit)?;

    if is_root() && !matches!(command, Commands::Visudo { .. }) {
        match rt.auditor().audit() {
            Ok(report) if !report.is_clean() => info!("Repaired {} permission problem(s)", report.fixes.len()),
            Ok(_) => {}
            Err(e) => warn!("Installation audit failed: {}", e),
        }
    }

    match command {
        Commands::Status => status(&rt),
        Commands::StatusCsv => status_csv(&rt),
        Commands::Maintain(args) => maintain(&rt, &args),
        Commands::MaintainSynchronous(args) => maintain_synchronous(&rt, &args),
        Commands::Charge { percentage } => converge_once(&rt, Converge::Charge(validate_percentage(&percentage)?)),
        Commands::Discharge { percentage } => {
            converge_once(&rt, Converge::Discharge(validate_percentage(&percentage)?))
        }
        Commands::Calibrate => calibrate(&rt),
        Commands::CalibrateSynchronous => calibrate_synchronous(&rt),
        Commands::Charging { state } => charging(&rt, state),
        Commands::Adapter { state } => adapter(&rt, state),
        Commands::Update => update(&rt),
        Commands::UpdateSilent { .. } => update_silent(&rt),
        Commands::Reinstall { mode } => reinstall(&rt, mode.is_some()),
        Commands::Uninstall { mode } => uninstall(&rt, matches!(mode, Some(Quiet::Silent))),
        Commands::Visudo { .. } => visudo(&rt),
        Commands::CreateDaemon => {
            rt.launch_agent().create()?;
            println!("LaunchAgent registered at {}", rt.launch_agent().path().display());
            Ok(())
        }
        Commands::DisableDaemon => Ok(rt.launch_agent().disable()?),
        Commands::RemoveDaemon => Ok(rt.launch_agent().remove()?),
        Commands::Logs { lines } => {
            let path = rt.store.log_path();
            for line in logger::tail(&path, lines).with_context(|| format!("reading {}", path.display()))? {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Version => Ok(()),
    }
}

fn require_root(command: &str) -> Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(ChargeKeeperError::NotElevated(format!("run it as: sudo {} {}", paths::DAEMON_BINARY, command)).into())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Point-in-time view used by both status formats
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub reading: Option<BatteryReading>,
    pub charging: Option<bool>,
    pub discharging: Option<bool>,
    pub target: Option<ChargeTarget>,
    pub maintain_pid: Option<u32>,
    pub calibrate_pid: Option<u32>,
}

fn live_pid(rt: &Runtime, role: Role) -> Option<u32> {
    match rt.store.load_lock(role) {
        Ok(Some(lock)) if rt.procs.is_alive(lock.pid) => Some(lock.pid),
        Ok(_) => None,
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

fn snapshot(rt: &Runtime) -> StatusSnapshot {
    let smc = rt.smc();
    let ctl = ChargeController::new(&smc, CapabilitySet::probe(&smc));
    let reading = match PmsetTelemetry.read() {
        Ok(r) => Some(r),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };
    StatusSnapshot {
        reading,
        charging: ctl.charging_enabled(),
        discharging: ctl.discharging(),
        target: rt.store.load_target().unwrap_or_else(|e| {
            warn!("{}", e);
            None
        }),
        maintain_pid: live_pid(rt, Role::Maintain),
        calibrate_pid: live_pid(rt, Role::Calibrate),
    }
}

fn flag(value: Option<bool>, yes: &'static str, no: &'static str) -> &'static str {
    match value {
        Some(true) => yes,
        Some(false) => no,
        None => "unknown",
    }
}

/// Human readable status
pub fn format_status(s: &StatusSnapshot) -> String {
    let mut out = String::new();
    match &s.reading {
        Some(r) => {
            out.push_str(&format!("Battery at {}%", r.percentage));
            if let Some(remaining) = &r.remaining {
                out.push_str(&format!(" ({remaining} remaining)"));
            }
            if let Some(v) = r.voltage {
                out.push_str(&format!(", {v:.2}V"));
            }
            out.push_str(if r.plugged_in { ", adapter connected" } else { ", on battery" });
            out.push('\n');
        }
        None => out.push_str("Battery status unknown\n"),
    }
    out.push_str(&format!(
        "Charging {}, discharging {}\n",
        flag(s.charging, "enabled", "disabled"),
        flag(s.discharging, "forced", "off")
    ));
    match (&s.target, s.maintain_pid) {
        (Some(t), Some(pid)) => out.push_str(&format!("Maintaining {t} (PID {pid})\n")),
        (Some(t), None) => out.push_str(&format!("Target {t} set, but no maintenance loop is running\n")),
        (None, _) => out.push_str("Not maintaining\n"),
    }
    if let Some(pid) = s.calibrate_pid {
        out.push_str(&format!("Calibrating (PID {pid})\n"));
    }
    out
}

/// `percentage,remaining,charging,discharging,target`
pub fn format_status_csv(s: &StatusSnapshot) -> String {
    let (pct, remaining) = match &s.reading {
        Some(r) => (r.percentage.to_string(), r.remaining.clone().unwrap_or_default()),
        None => (String::new(), String::new()),
    };
    let target = s
        .target
        .as_ref()
        .map(|t| t.with_force_discharge(false).to_args().join(" "))
        .unwrap_or_default();
    format!(
        "{},{},{},{},{}",
        pct,
        remaining,
        flag(s.charging, "enabled", "disabled"),
        flag(s.discharging, "enabled", "disabled"),
        target
    )
}

fn status(rt: &Runtime) -> Result<()> {
    print!("{}", format_status(&snapshot(rt)));
    println!("LaunchAgent {}", rt.launch_agent().status());
    Ok(())
}

fn status_csv(rt: &Runtime) -> Result<()> {
    println!("{}", format_status_csv(&snapshot(rt)));
    Ok(())
}

// ============================================================================
// Maintenance
// ============================================================================

/// What a maintenance command asks for
#[derive(Debug, Clone, PartialEq)]
pub enum MaintainRequest {
    Stop,
    Recover,
    Target(ChargeTarget),
}

/// Parse maintenance arguments; nothing is touched on error
pub fn parse_maintain(args: &MaintainArgs) -> ck_core::Result<MaintainRequest> {
    match args.target.first().map(String::as_str) {
        Some("stop") if args.target.len() == 1 => Ok(MaintainRequest::Stop),
        Some("recover") if args.target.len() == 1 => Ok(MaintainRequest::Recover),
        _ => {
            let parts: Vec<&str> = args.target.iter().map(String::as_str).collect();
            Ok(MaintainRequest::Target(ChargeTarget::parse(&parts)?.with_force_discharge(args.force_discharge)))
        }
    }
}

/// Target the foreground loop should run, `None` when there is nothing to do
pub fn loop_target(store: &dyn StateStore, request: MaintainRequest) -> ck_core::Result<Option<ChargeTarget>> {
    match request {
        MaintainRequest::Target(t) => Ok(Some(t)),
        MaintainRequest::Recover => store.load_target(),
        MaintainRequest::Stop => Ok(None),
    }
}

/// Stop the calibration and maintenance loops, calibration first
///
/// Returns the pids that were signalled.
pub fn preempt_all(store: &dyn StateStore, procs: &dyn ProcessControl) -> ck_core::Result<Vec<u32>> {
    let mut stopped = Vec::new();
    for role in [Role::Calibrate, Role::Maintain] {
        stopped.extend(preempt(store, procs, role)?);
    }
    Ok(stopped)
}

/// Replace any running loop with one for the requested target
///
/// The target is validated before any lock or file is touched. It is persisted
/// before `spawn` runs, since the new loop leaves as soon as it no longer finds
/// its target. Returns the target and the pid `spawn` reported, or `None` for
/// `stop` and for `recover` with nothing persisted.
pub fn begin_maintenance(
    store: &dyn StateStore,
    procs: &dyn ProcessControl,
    args: &MaintainArgs,
    spawn: impl FnOnce(&ChargeTarget) -> Result<u32>,
) -> Result<Option<(ChargeTarget, u32)>> {
    let target = match parse_maintain(args)? {
        MaintainRequest::Target(t) => t,
        MaintainRequest::Recover => match store.load_target()? {
            Some(t) => t,
            None => return Ok(None),
        },
        MaintainRequest::Stop => return Ok(None),
    };

    preempt_all(store, procs)?;
    store.save_target(&target)?;
    let pid = spawn(&target)?;
    store.acquire_lock(Role::Maintain, pid)?;
    Ok(Some((target, pid)))
}

/// Run a one-shot job with both loops stopped, then hand the persisted target to `resume`
///
/// Returns the target that was resumed, if any.
pub fn run_exclusive(
    store: &dyn StateStore,
    procs: &dyn ProcessControl,
    job: impl FnOnce() -> ck_core::Result<()>,
    resume: impl FnOnce(&ChargeTarget) -> Result<()>,
) -> Result<Option<ChargeTarget>> {
    preempt_all(store, procs)?;
    job()?;
    match store.load_target()? {
        Some(target) => {
            resume(&target)?;
            Ok(Some(target))
        }
        None => Ok(None),
    }
}

fn maintain(rt: &Runtime, args: &MaintainArgs) -> Result<()> {
    if parse_maintain(args)? == MaintainRequest::Stop {
        return stop_maintenance(rt, true);
    }
    start_maintenance(rt, args)
}

/// Start the detached loop for `args`, which must not be `stop`
fn start_maintenance(rt: &Runtime, args: &MaintainArgs) -> Result<()> {
    let smc = rt.smc();
    let ctl = ChargeController::new(&smc, CapabilitySet::probe(&smc));
    if let Err(e) = ctl.disable_discharge() {
        warn!("{}", e);
    }

    let Some((target, pid)) = begin_maintenance(&rt.store, &rt.procs, args, |t| spawn_loop(rt, t))? else {
        println!("No maintenance target to recover");
        return Ok(());
    };

    if let Err(e) = rt.launch_agent().create() {
        warn!("Could not register the LaunchAgent: {}", e);
    }
    println!("Maintaining battery at {target} (PID {pid})");
    Ok(())
}

fn recover_args() -> MaintainArgs {
    MaintainArgs { target: vec!["recover".to_string()], force_discharge: false }
}

fn spawn_loop(rt: &Runtime, target: &ChargeTarget) -> Result<u32> {
    let mut args = vec!["maintain_synchronous".to_string()];
    args.extend(target.to_args());
    spawn_detached(rt, &args)
}

fn stop_maintenance(rt: &Runtime, print_status: bool) -> Result<()> {
    // Cleared first so a loop that misses the signal still leaves at its next tick.
    rt.store.clear_target()?;
    preempt_all(&rt.store, &rt.procs)?;
    if let Err(e) = rt.launch_agent().remove() {
        warn!("Could not remove the LaunchAgent: {}", e);
    }

    let smc = rt.smc();
    let ctl = ChargeController::new(&smc, CapabilitySet::probe(&smc));
    for result in [ctl.disable_discharge(), ctl.enable_charging(), ctl.set_led(LedColor::System)] {
        if let Err(e) = result {
            warn!("{}", e);
        }
    }
    println!("Stopped maintaining; charging normally");
    if print_status {
        status(rt)?;
    }
    Ok(())
}

fn maintain_synchronous(rt: &Runtime, args: &MaintainArgs) -> Result<()> {
    let Some(target) = loop_target(&rt.store, parse_maintain(args)?)? else {
        info!("No maintenance target; not starting a loop");
        return Ok(());
    };

    take_over(&rt.store, &rt.procs, Role::Maintain, rt.procs.current_pid())?;

    let smc = rt.smc();
    let caps = CapabilitySet::probe(&smc);
    let (telemetry, clock) = (PmsetTelemetry, SystemClock);
    let result = Supervisor::new(&smc, caps, &telemetry, &clock, &rt.store).maintain(&target, None);
    rt.store.release_lock(Role::Maintain)?;
    Ok(result?)
}

/// Start `args` as a detached copy of this binary logging to the state folder
fn spawn_detached(rt: &Runtime, args: &[String]) -> Result<u32> {
    let log = rt.store.log_path();
    match logger::truncate_if_large(&log) {
        Ok(true) => info!("Truncated {}", log.display()),
        Ok(false) => {}
        Err(e) => warn!("Could not truncate {}: {}", log.display(), e),
    }
    let out: File = logger::open_for_append(&log).with_context(|| format!("opening {}", log.display()))?;
    let err = out.try_clone()?;

    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from(paths::DAEMON_BINARY));
    let mut cmd = Command::new(exe);
    cmd.args(args).stdin(Stdio::null()).stdout(out).stderr(err).process_group(0);
    if is_root() {
        // Never leave a root loop writing into the user's home.
        cmd.uid(rt.owner.uid).gid(rt.owner.gid);
        for fix in auditor::enforce(&log, rt.owner.uid, rt.owner.gid, None)? {
            debug!("Fixed {}", fix);
        }
    }

    let child = cmd.spawn().with_context(|| format!("starting {}", args.join(" ")))?;
    debug!("Spawned {} as PID {}", args.join(" "), child.id());
    Ok(child.id())
}

// ============================================================================
// One-shot charge/discharge and calibration
// ============================================================================

fn converge_once(rt: &Runtime, goal: Converge) -> Result<()> {
    let smc = rt.smc();
    let caps = CapabilitySet::probe(&smc);
    let (telemetry, clock) = (PmsetTelemetry, SystemClock);
    let sup = Supervisor::new(&smc, caps, &telemetry, &clock, &rt.store);

    run_exclusive(&rt.store, &rt.procs, || sup.converge(goal), |target| {
        info!("Resuming maintenance at {}", target);
        start_maintenance(rt, &recover_args())
    })?;
    Ok(())
}

fn calibrate(rt: &Runtime) -> Result<()> {
    preempt_all(&rt.store, &rt.procs)?;
    let pid = spawn_detached(rt, &["calibrate_synchronous".to_string()])?;
    rt.store.acquire_lock(Role::Calibrate, pid)?;
    println!("Calibration started (PID {pid}); follow it with `chargekeeper logs`");
    Ok(())
}

fn calibrate_synchronous(rt: &Runtime) -> Result<()> {
    take_over(&rt.store, &rt.procs, Role::Calibrate, rt.procs.current_pid())?;
    preempt(&rt.store, &rt.procs, Role::Maintain)?;

    let smc = rt.smc();
    let caps = CapabilitySet::probe(&smc);
    let (telemetry, clock) = (PmsetTelemetry, SystemClock);
    let sup = Supervisor::new(&smc, caps, &telemetry, &clock, &rt.store);

    let mut resumed = false;
    sup.calibrate(|| {
        if let Some(target) = rt.store.load_target()? {
            let args = ["maintain_synchronous".to_string(), "recover".to_string()];
            let pid = spawn_detached(rt, &args).map_err(|e| ChargeKeeperError::process(e.to_string()))?;
            rt.store.acquire_lock(Role::Maintain, pid)?;
            info!("Resumed maintenance at {} (PID {})", target, pid);
            resumed = true;
        }
        Ok(())
    })?;

    if !resumed {
        sup.apply(&[ck_core::Effect::EnableCharging]);
    }
    info!("Calibration finished");
    Ok(())
}

// ============================================================================
// Manual switches
// ============================================================================

fn charging(rt: &Runtime, state: Toggle) -> Result<()> {
    let smc = rt.smc();
    let ctl = ChargeController::new(&smc, CapabilitySet::probe(&smc));
    match state {
        Toggle::On => ctl.enable_charging()?,
        Toggle::Off => ctl.disable_charging()?,
    }
    println!("Charging {}", flag(ctl.charging_enabled(), "enabled", "disabled"));
    Ok(())
}

fn adapter(rt: &Runtime, state: Toggle) -> Result<()> {
    let smc = rt.smc();
    let ctl = ChargeController::new(&smc, CapabilitySet::probe(&smc));
    match state {
        Toggle::On => ctl.disable_discharge()?,
        Toggle::Off => ctl.enable_discharge()?,
    }
    println!("Adapter {}", flag(ctl.discharging(), "off", "on"));
    Ok(())
}

// ============================================================================
// Installation
// ============================================================================

/// Install the policy and audit; the steps that follow any update
fn secure_installation(rt: &Runtime) -> Result<()> {
    match PolicyInstaller::system().install()? {
        PolicyOutcome::Replaced => println!("Privilege policy installed at {}", paths::SUDOERS_FILE),
        PolicyOutcome::Unchanged => println!("Privilege policy is up to date"),
    }
    let report = rt.auditor().audit()?;
    for fix in &report.fixes {
        println!("Fixed {fix}");
    }
    Ok(())
}

fn visudo(rt: &Runtime) -> Result<()> {
    require_root("visudo")?;
    secure_installation(rt)
}

/// Kill and restart the loop so it runs the freshly installed binary
fn restart_maintenance(rt: &Runtime) -> Result<()> {
    match rt.store.load_target()? {
        Some(_) => start_maintenance(rt, &recover_args()),
        None => Ok(()),
    }
}

fn update(rt: &Runtime) -> Result<()> {
    let fetcher = HttpFetcher::new()?;
    let updater = Updater::new(InstallLayout::system(), &rt.elevator, &fetcher);
    match updater.check()? {
        UpdateDecision::Reinstall(reasons) => {
            println!("The installation failed its integrity check and will be reinstalled:");
            for r in &reasons {
                println!("  {r}");
            }
            reinstall(rt, false)
        }
        UpdateDecision::UpToDate { remote } => {
            println!("ChargeKeeper {VERSION} is up to date (latest {remote})");
            Ok(())
        }
        UpdateDecision::Available { remote, .. } => {
            println!("Updating ChargeKeeper {VERSION} -> {remote}");
            rt.elevator.run(PrivilegedOp::UpdateSilent)?;
            restart_maintenance(rt)
        }
    }
}

fn update_silent(rt: &Runtime) -> Result<()> {
    require_root("update_silent")?;
    let fetcher = HttpFetcher::new()?;
    let updater = Updater::new(InstallLayout::system(), &rt.elevator, &fetcher);
    match updater.check()? {
        UpdateDecision::Reinstall(_) => reinstall(rt, true),
        UpdateDecision::UpToDate { .. } => Ok(()),
        UpdateDecision::Available { remote, script } => {
            info!("Installing ChargeKeeper {}", remote);
            ShellRunner.run(&script, &[])?;
            secure_installation(rt)
        }
    }
}

fn reinstall(rt: &Runtime, silent: bool) -> Result<()> {
    let fetcher = HttpFetcher::new()?;
    let updater = Updater::new(InstallLayout::system(), &rt.elevator, &fetcher);
    updater.reinstall(&ShellRunner)?;
    if is_root() {
        secure_installation(rt)?;
    }
    restart_maintenance(rt)?;
    if !silent {
        println!("ChargeKeeper reinstalled");
    }
    Ok(())
}

fn uninstall(rt: &Runtime, silent: bool) -> Result<()> {
    stop_maintenance(rt, false)?;
    let fetcher = HttpFetcher::new()?;
    Updater::new(InstallLayout::system(), &rt.elevator, &fetcher).uninstall(&ShellRunner, silent)?;
    if !silent {
        println!("ChargeKeeper removed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_core::process::fake::FakeProcesses;
    use ck_core::MemoryStateStore;

    fn args(target: &[&str], force: bool) -> MaintainArgs {
        MaintainArgs { target: target.iter().map(|s| s.to_string()).collect(), force_discharge: force }
    }

    #[test]
    fn test_parse_maintain_keywords() {
        assert_eq!(parse_maintain(&args(&["stop"], false)).unwrap(), MaintainRequest::Stop);
        assert_eq!(parse_maintain(&args(&["recover"], false)).unwrap(), MaintainRequest::Recover);
        let MaintainRequest::Target(t) = parse_maintain(&args(&["70-80"], true)).unwrap() else {
            panic!("expected a target");
        };
        assert!(t.force_discharge);
    }

    #[test]
    fn test_invalid_target_is_validation_error() {
        for bad in [&["101"][..], &["5-80"], &["80-70"], &["13V"], &["abc"]] {
            let err = parse_maintain(&args(bad, false)).unwrap_err();
            assert!(err.is_validation(), "{bad:?}: {err}");
            assert_eq!(err.exit_code(), 1);
        }
    }

    #[test]
    fn test_recover_without_target_is_noop() {
        let store = MemoryStateStore::new();
        assert_eq!(loop_target(&store, MaintainRequest::Recover).unwrap(), None);

        let target = ChargeTarget::percentage(80).unwrap();
        store.save_target(&target).unwrap();
        assert_eq!(loop_target(&store, MaintainRequest::Recover).unwrap(), Some(target));
    }

    #[test]
    fn test_preempt_all_stops_calibration_first() {
        let store = MemoryStateStore::new();
        let procs = FakeProcesses::new(1, &[10, 20]);
        store.acquire_lock(Role::Maintain, 10).unwrap();
        store.acquire_lock(Role::Calibrate, 20).unwrap();

        assert_eq!(preempt_all(&store, &procs).unwrap(), vec![20, 10]);
        assert_eq!(store.load_lock(Role::Calibrate).unwrap(), None);
        assert_eq!(store.load_lock(Role::Maintain).unwrap(), None);
    }

    #[test]
    fn test_maintain_interrupts_calibration() {
        let store = MemoryStateStore::new();
        let procs = FakeProcesses::new(1, &[20]);
        store.acquire_lock(Role::Calibrate, 20).unwrap();

        let started = begin_maintenance(&store, &procs, &args(&["70-80"], false), |t| {
            assert_eq!(store.load_target().unwrap().as_ref(), Some(t));
            Ok(300)
        })
        .unwrap();

        let target = ChargeTarget::range(70, 80).unwrap();
        assert_eq!(started, Some((target, 300)));
        assert_eq!(*procs.terminated.lock(), vec![20]);
        assert_eq!(store.load_lock(Role::Calibrate).unwrap(), None);
        assert_eq!(store.load_lock(Role::Maintain).unwrap().unwrap().pid, 300);
    }

    #[test]
    fn test_invalid_maintain_touches_nothing() {
        let store = MemoryStateStore::new();
        let procs = FakeProcesses::new(1, &[20]);
        store.acquire_lock(Role::Calibrate, 20).unwrap();

        let err = begin_maintenance(&store, &procs, &args(&["9-80"], false), |_| panic!("spawned")).unwrap_err();

        assert!(err.downcast_ref::<ChargeKeeperError>().is_some_and(|e| e.is_validation()));
        assert!(procs.terminated.lock().is_empty());
        assert_eq!(store.load_target().unwrap(), None);
        assert_eq!(store.load_lock(Role::Calibrate).unwrap().unwrap().pid, 20);
    }

    #[test]
    fn test_recover_and_stop_start_nothing() {
        let store = MemoryStateStore::new();
        let procs = FakeProcesses::new(1, &[]);
        for keyword in ["recover", "stop"] {
            let started = begin_maintenance(&store, &procs, &args(&[keyword], false), |_| panic!("spawned")).unwrap();
            assert_eq!(started, None);
        }
    }

    #[test]
    fn test_one_shot_resumes_only_persisted_target() {
        let store = MemoryStateStore::new();
        let procs = FakeProcesses::new(1, &[10, 20]);
        store.acquire_lock(Role::Maintain, 10).unwrap();
        store.acquire_lock(Role::Calibrate, 20).unwrap();

        let mut ran = false;
        let resumed = run_exclusive(
            &store,
            &procs,
            || {
                assert!(!procs.is_alive(10) && !procs.is_alive(20));
                ran = true;
                Ok(())
            },
            |_| panic!("nothing to resume"),
        )
        .unwrap();
        assert!(ran);
        assert_eq!(resumed, None);

        let target = ChargeTarget::percentage(80).unwrap();
        store.save_target(&target).unwrap();
        let mut seen = None;
        let resumed = run_exclusive(&store, &procs, || Ok(()), |t| {
            seen = Some(*t);
            Ok(())
        })
        .unwrap();
        assert_eq!(resumed, Some(target));
        assert_eq!(seen, Some(target));
    }

    #[test]
    fn test_failed_one_shot_does_not_resume() {
        let store = MemoryStateStore::new();
        store.save_target(&ChargeTarget::percentage(80).unwrap()).unwrap();
        let procs = FakeProcesses::new(1, &[]);

        let result = run_exclusive(
            &store,
            &procs,
            || Err(ChargeKeeperError::Telemetry("pmset failed".into())),
            |_| panic!("resumed after a failure"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_status_formats() {
        let snap = StatusSnapshot {
            reading: Some(BatteryReading {
                percentage: 80,
                remaining: Some("1:02".into()),
                plugged_in: true,
                os_charging: false,
                voltage: Some(12.5),
            }),
            charging: Some(false),
            discharging: None,
            target: Some(ChargeTarget::range(70, 80).unwrap()),
            maintain_pid: Some(321),
            calibrate_pid: None,
        };
        assert_eq!(format_status_csv(&snap), "80,1:02,disabled,unknown,70-80");
        let text = format_status(&snap);
        assert!(text.contains("Battery at 80% (1:02 remaining), 12.50V, adapter connected"));
        assert!(text.contains("Maintaining 70-80% (PID 321)"));
        assert!(text.contains("Charging disabled, discharging unknown"));

        assert_eq!(format_status_csv(&StatusSnapshot::default()), ",,unknown,unknown,");

        let voltage = StatusSnapshot {
            target: Some(ChargeTarget::voltage(11.4, 0.3).unwrap().with_force_discharge(true)),
            ..Default::default()
        };
        assert_eq!(format_status_csv(&voltage), ",,unknown,unknown,11.4V 0.3V");
    }
}
