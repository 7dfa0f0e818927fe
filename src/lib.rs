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

//! ChargeKeeper - battery charge limiting for macOS
//!
//! The binary's command surface. Hardware access, targets, the state machine and
//! the privilege layer live in `ck_core`; this crate wires them to the command
//! line and runs the control loops.

pub mod cli;
pub mod handlers;
pub mod logger;
pub mod supervisor;
