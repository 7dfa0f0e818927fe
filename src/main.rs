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

use clap::Parser;
use ck_error::{ChargeKeeperError, EXIT_FAILURE, EXIT_INTERRUPTED};
use tracing::{debug, error};

use chargekeeper::cli::Cli;
use chargekeeper::{handlers, logger};

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ChargeKeeperError>()
        .map(ChargeKeeperError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}

fn main() {
    logger::init_logging();

    // Interrupts end the process immediately; a running loop is not unwound.
    if let Err(e) = ctrlc::set_handler(|| std::process::exit(EXIT_INTERRUPTED)) {
        debug!("Could not install the interrupt handler: {}", e);
    }

    let cli = Cli::parse();
    debug!("Running {:?}", cli.command);

    if let Err(err) = handlers::run(cli.command) {
        error!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}
