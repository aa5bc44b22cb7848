// Copyright 2024-2026 Presage Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for the presage core.
//!
//! ## Usage
//!
//! ```bash
//! presage-core-cli config show       # Effective config as TOML
//! presage-core-cli config defaults   # Built-in defaults as TOML
//! presage-core-cli config validate   # Exit 0 when no warnings
//! presage-core-cli simulate          # Run against an in-memory backend
//! ```

pub mod config_cmd;
pub mod simulate;

pub use config_cmd::{run_defaults, run_show, run_validate, CONFIG_PATH_ENV};
pub use simulate::{run_simulate, simulate, SimulateOptions, SimulationReport};
