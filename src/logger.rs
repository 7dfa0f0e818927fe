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

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::Path;

use ck_core::constants::logging;
use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber
///
/// The filter comes from `CHARGEKEEPER_LOG`, defaulting to `info`. The detached loop
/// has its stderr appended to the log file, so this is also what ends up there.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(logging::LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Last `n` lines of `path`; a missing file has none
pub fn tail(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    let skip = lines.len().saturating_sub(n);
    Ok(lines.into_iter().skip(skip).collect())
}

/// Keep only the last lines once the log grows past the size limit
///
/// Returns true when the file was truncated.
pub fn truncate_if_large(path: &Path) -> std::io::Result<bool> {
    truncate_with_limit(path, logging::MAX_LOG_BYTES, logging::KEEP_LOG_LINES)
}

fn truncate_with_limit(path: &Path, max_bytes: u64, keep: usize) -> std::io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => {}
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }
    let mut kept = tail(path, keep)?.join("\n");
    kept.push('\n');
    fs::write(path, kept)?;
    Ok(true)
}

/// Append handle for the detached loop's stdout and stderr
pub fn open_for_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
