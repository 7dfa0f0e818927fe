//! Constants and configuration values for ChargeKeeper
//!
//! Centralizes all magic numbers, paths, register keys and timings.
//! This is the single source of truth for configuration values; there is no
//! configuration file.

use std::time::Duration;

/// Version recorded at build time, compared against the published update script
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// System paths
pub mod paths {
    use std::path::{Path, PathBuf};

    /// Folder holding the daemon binary and the SMC tool
    pub const BIN_DIR: &str = "/usr/local/bin";

    /// Installed daemon binary
    pub const DAEMON_BINARY: &str = "/usr/local/bin/chargekeeper";

    /// Installed SMC read/write tool
    pub const SMC_BINARY: &str = "/usr/local/bin/smc";

    /// Folder for sudoers drop-in files
    pub const SUDOERS_DIR: &str = "/private/etc/sudoers.d";

    /// Installed privilege policy
    pub const SUDOERS_FILE: &str = "/private/etc/sudoers.d/chargekeeper";

    /// Policy syntax checker
    pub const VISUDO: &str = "/usr/sbin/visudo";

    /// Elevation front-end
    pub const SUDO: &str = "/usr/bin/sudo";

    /// Power management telemetry
    pub const PMSET: &str = "/usr/bin/pmset";

    /// IORegistry dump, used for battery voltage
    pub const IOREG: &str = "/usr/sbin/ioreg";

    /// Service supervisor control
    pub const LAUNCHCTL: &str = "/bin/launchctl";

    /// Device owned by the user logged in at the console
    pub const CONSOLE_DEVICE: &str = "/dev/console";

    /// Environment variable overriding the per-user state folder
    pub const HOME_OVERRIDE_ENV: &str = "CHARGEKEEPER_HOME";

    /// Name of the per-user state folder inside the home directory
    pub const STATE_DIR_NAME: &str = ".chargekeeper";

    /// Percentage or range target
    pub const PERCENTAGE_TARGET_FILE: &str = "maintain.percentage";

    /// Voltage target
    pub const VOLTAGE_TARGET_FILE: &str = "maintain.voltage";

    /// Lock for the maintenance loop
    pub const MAINTAIN_PID_FILE: &str = "chargekeeper.pid";

    /// Lock for the calibration sequence
    pub const CALIBRATE_PID_FILE: &str = "calibrate.pid";

    /// Log written by the detached loop
    pub const LOG_FILE: &str = "chargekeeper.log";

    /// LaunchAgent descriptor file name
    pub const LAUNCH_AGENT_FILE: &str = "chargekeeper.plist";

    /// LaunchAgent label
    pub const LAUNCH_AGENT_LABEL: &str = "com.chargekeeper.app";

    /// State folder inside a given home directory
    pub fn state_dir_in(home: &Path) -> PathBuf {
        home.join(STATE_DIR_NAME)
    }

    /// LaunchAgent path inside a given home directory
    pub fn launch_agent_in(home: &Path) -> PathBuf {
        home.join("Library").join("LaunchAgents").join(LAUNCH_AGENT_FILE)
    }

    /// Per-user state folder of the current process
    ///
    /// `CHARGEKEEPER_HOME` wins over the home directory so tests and packaging
    /// can relocate state.
    pub fn state_dir() -> Option<PathBuf> {
        state_dir_override().or_else(|| dirs::home_dir().map(|h| state_dir_in(&h)))
    }

    /// State folder for the user with home `home`, honouring `CHARGEKEEPER_HOME`
    pub fn state_dir_for(home: &Path) -> PathBuf {
        state_dir_override().unwrap_or_else(|| state_dir_in(home))
    }

    fn state_dir_override() -> Option<PathBuf> {
        std::env::var(HOME_OVERRIDE_ENV).ok().filter(|d| !d.is_empty()).map(PathBuf::from)
    }
}

/// SMC register keys and the values written to them
pub mod smc {
    /// Charging control on recent firmware (4 byte value)
    pub const CHARGING_MODERN: &str = "CHTE";
    /// Charging control on older firmware, primary key
    pub const CHARGING_LEGACY_B: &str = "CH0B";
    /// Charging control on older firmware, companion key written together with CH0B
    pub const CHARGING_LEGACY_C: &str = "CH0C";
    /// Adapter (force discharge) control on recent firmware
    pub const ADAPTER_MODERN: &str = "CHIE";
    /// Adapter control, first legacy variant
    pub const ADAPTER_LEGACY_J: &str = "CH0J";
    /// Adapter control, second legacy variant
    pub const ADAPTER_LEGACY_I: &str = "CH0I";
    /// MagSafe LED colour
    pub const MAGSAFE_LED: &str = "ACLC";

    pub const CHARGING_MODERN_ON: &str = "00000000";
    pub const CHARGING_MODERN_OFF: &str = "01000000";
    pub const CHARGING_LEGACY_ON: &str = "00";
    pub const CHARGING_LEGACY_OFF: &str = "02";

    pub const ADAPTER_ON: &str = "00";
    pub const ADAPTER_MODERN_OFF: &str = "08";
    pub const ADAPTER_LEGACY_OFF: &str = "01";

    pub const LED_SYSTEM: &str = "00";
    pub const LED_OFF: &str = "01";
    pub const LED_GREEN: &str = "03";
    pub const LED_ORANGE: &str = "04";

    /// Marker printed by the SMC tool for keys the controller does not implement
    pub const NO_DATA_MARKER: &str = "no data";
}

/// Charge target limits
pub mod limits {
    /// Highest valid percentage
    pub const MAX_PERCENTAGE: u8 = 100;

    /// Lowest lower bound accepted for a percentage range
    pub const MIN_RANGE_LOWER: u8 = 10;

    /// Voltage target window in volts
    pub const MIN_VOLTAGE: f32 = 10.5;
    pub const MAX_VOLTAGE: f32 = 12.6;

    /// Hysteresis window in volts
    pub const MIN_HYSTERESIS: f32 = 0.1;
    pub const MAX_HYSTERESIS: f32 = 2.0;

    /// Hysteresis used when a voltage target omits it
    pub const DEFAULT_HYSTERESIS: f32 = 0.1;
}

/// Control loop timings
pub mod timing {
    use super::*;

    /// Maintenance loop cadence
    pub const MAINTAIN_INTERVAL: Duration = Duration::from_secs(60);

    /// One-shot charge/discharge cadence while far from the target
    pub const CONVERGE_INTERVAL: Duration = Duration::from_secs(60);

    /// One-shot charge/discharge cadence close to the target
    pub const CONVERGE_NEAR_INTERVAL: Duration = Duration::from_secs(20);

    /// Distance to the target (percentage points) that switches to the near cadence
    pub const CONVERGE_NEAR_POINTS: u8 = 3;

    /// How long calibration holds the battery at 100%
    pub const CALIBRATION_HOLD: Duration = Duration::from_secs(60 * 60);
}

/// Calibration sequence set points
pub mod calibration {
    /// First discharge target
    pub const DISCHARGE_LOW: u8 = 15;
    /// Full charge target
    pub const CHARGE_FULL: u8 = 100;
    /// Final discharge target
    pub const DISCHARGE_FINAL: u8 = 80;
}

/// Log file handling
pub mod logging {
    /// Size above which the log is truncated before a new loop starts
    pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

    /// Lines kept when the log is truncated
    pub const KEEP_LOG_LINES: usize = 100;

    /// Default number of lines printed by `logs`
    pub const DEFAULT_TAIL_LINES: usize = 100;

    /// Environment variable holding the tracing filter
    pub const LOG_FILTER_ENV: &str = "CHARGEKEEPER_LOG";
}

/// Update sources
pub mod update {
    /// Published update script; carries the latest version string
    pub const UPDATE_SCRIPT_URL: &str =
        "https://raw.githubusercontent.com/chargekeeper/chargekeeper/main/update.sh";

    /// Canonical installer used for full reinstalls
    pub const SETUP_SCRIPT_URL: &str =
        "https://raw.githubusercontent.com/chargekeeper/chargekeeper/main/setup.sh";

    /// Published uninstaller
    pub const UNINSTALL_SCRIPT_URL: &str =
        "https://raw.githubusercontent.com/chargekeeper/chargekeeper/main/uninstall.sh";

    /// Interpreter the fetched scripts are handed to
    pub const SHELL: &str = "/bin/bash";

    /// HTTP timeout for script fetches
    pub const FETCH_TIMEOUT_SECS: u64 = 30;

    pub const USER_AGENT: &str = concat!("chargekeeper/", env!("CARGO_PKG_VERSION"));
}

/// Ownership and permission expectations
pub mod perms {
    /// Superuser id
    pub const ROOT_UID: u32 = 0;
    /// `wheel` group id on macOS
    pub const WHEEL_GID: u32 = 0;
    /// Binaries and their folder
    pub const BINARY_MODE: u32 = 0o755;
    /// Sudoers folder
    pub const SUDOERS_DIR_MODE: u32 = 0o755;
    /// Sudoers drop-in
    pub const SUDOERS_FILE_MODE: u32 = 0o440;
    /// LaunchAgent plist
    pub const LAUNCH_AGENT_MODE: u32 = 0o644;
    /// Group/other write bits
    pub const GROUP_OTHER_WRITE: u32 = 0o022;
}
