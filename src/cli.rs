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

//! Command Line Interface

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "chargekeeper")]
#[command(version)]
#[command(about = "ChargeKeeper - battery charge limiting for macOS")]
#[command(long_about = "ChargeKeeper - battery charge limiting for macOS

Keeps the battery between a lower and an upper bound by switching the
charger through the SMC, and resumes after a reboot.

EXAMPLES:
    chargekeeper maintain 80               Hold the battery at 80%
    chargekeeper maintain 70-80            Charge below 70%, stop at 80%
    chargekeeper maintain 11.4V 0.2V       Hold the pack voltage at 11.4V +/- 0.2V
    chargekeeper maintain 80 --force-discharge
    chargekeeper maintain stop             Stop and charge normally again
    chargekeeper charge 90                 Charge once to 90%
    chargekeeper discharge 50              Discharge on the adapter to 50%
    chargekeeper calibrate                 Run a full calibration cycle
    chargekeeper logs 50                   Show the last 50 log lines

ENVIRONMENT VARIABLES:
    CHARGEKEEPER_LOG=debug     Log filter (default: info)
    CHARGEKEEPER_HOME=<dir>    Relocate the state folder

FILES:
    ~/.chargekeeper/                               Targets, locks and log
    ~/Library/LaunchAgents/chargekeeper.plist      Reboot persistence
    /private/etc/sudoers.d/chargekeeper            Privilege policy")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
#[command(rename_all = "snake_case")]
pub enum Commands {
    /// Show battery and charger status
    Status,

    /// Status as one comma separated line
    StatusCsv,

    /// Keep the battery at a percentage, range or voltage
    Maintain(MaintainArgs),

    /// Run the maintenance loop in the foreground
    #[command(hide = true)]
    MaintainSynchronous(MaintainArgs),

    /// Charge to a percentage, then stop charging
    Charge {
        /// Target percentage
        percentage: String,
    },

    /// Discharge on the adapter to a percentage
    Discharge {
        /// Target percentage
        percentage: String,
    },

    /// Discharge to 15%, charge to 100%, hold, discharge to 80%, then resume
    Calibrate,

    /// Run the calibration sequence in the foreground
    #[command(hide = true)]
    CalibrateSynchronous,

    /// Switch charging on or off
    Charging { state: Toggle },

    /// Switch the power adapter on or off
    Adapter { state: Toggle },

    /// Update to the latest release
    Update,

    /// Update without prompting (run through the privilege policy)
    UpdateSilent { check: Option<SilentCheck> },

    /// Reinstall from the canonical installer
    Reinstall { mode: Option<Quiet> },

    /// Remove ChargeKeeper
    Uninstall { mode: Option<Quiet> },

    /// Install the privilege policy and repair permissions
    Visudo {
        /// User owning the state folder (defaults to the invoking user)
        user: Option<String>,
    },

    /// Register the LaunchAgent
    CreateDaemon,

    /// Keep the LaunchAgent but stop it from running
    DisableDaemon,

    /// Remove the LaunchAgent
    RemoveDaemon,

    /// Show the end of the log
    Logs {
        #[arg(default_value_t = ck_core::constants::logging::DEFAULT_TAIL_LINES)]
        lines: usize,
    },

    /// Print the version
    Version,
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct MaintainArgs {
    /// `80`, `70-80`, `11.4V [0.2V]`, `stop` or `recover`
    #[arg(required = true, num_args = 1..=2)]
    pub target: Vec<String>,

    /// Discharge to the lower bound before maintaining
    #[arg(long)]
    pub force_discharge: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilentCheck {
    /// Report whether unattended updates are possible
    #[value(name = "is_enabled")]
    IsEnabled,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quiet {
    Silent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("chargekeeper").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_snake_case_commands() {
        assert_eq!(parse(&["status_csv"]), Commands::StatusCsv);
        assert_eq!(parse(&["create_daemon"]), Commands::CreateDaemon);
        assert_eq!(parse(&["update_silent", "is_enabled"]), Commands::UpdateSilent { check: Some(SilentCheck::IsEnabled) });
        assert_eq!(parse(&["calibrate_synchronous"]), Commands::CalibrateSynchronous);
    }

    #[test]
    fn test_maintain_forms() {
        let Commands::Maintain(args) = parse(&["maintain", "11.4V", "0.2V", "--force-discharge"]) else {
            panic!("expected maintain");
        };
        assert_eq!(args.target, vec!["11.4V", "0.2V"]);
        assert!(args.force_discharge);

        let Commands::MaintainSynchronous(args) = parse(&["maintain_synchronous", "70-80"]) else {
            panic!("expected maintain_synchronous");
        };
        assert_eq!(args.target, vec!["70-80"]);
        assert!(!args.force_discharge);
    }

    #[test]
    fn test_logs_default() {
        assert_eq!(parse(&["logs"]), Commands::Logs { lines: 100 });
        assert_eq!(parse(&["logs", "20"]), Commands::Logs { lines: 20 });
    }

    #[test]
    fn test_rejects_unknown_toggle() {
        assert!(Cli::try_parse_from(["chargekeeper", "charging", "maybe"]).is_err());
        assert!(Cli::try_parse_from(["chargekeeper", "maintain"]).is_err());
    }
}
