// Copyright 2024-2026 Presage Contributors
// SPDX-License-Identifier: Apache-2.0

//! presage-core-cli entry point.
//!
//! ## Subcommands
//!
//! - `config show|defaults|validate` - inspect configuration
//! - `simulate` - exercise every component against an in-memory backend
//! - `version`, `help`

use std::process::ExitCode;

use presage_core::cli::{config_cmd, run_defaults, run_show, run_simulate, run_validate};
use presage_core::telemetry::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let config_path = flag_value(&args, "--config");

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let code = match subcommand {
                "show" => run_show(config_path),
                "defaults" => run_defaults(),
                "validate" => run_validate(config_path),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    1
                }
            };
            exit_code(code)
        }
        "simulate" => {
            let config = match config_cmd::load(config_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Config error: {}", e);
                    return ExitCode::from(2u8);
                }
            };
            if let Err(e) = init_logging(&config.logging) {
                eprintln!("Logging disabled: {}", e);
            }
            let rest: Vec<String> = strip_flag(&args[2..], "--config");
            exit_code(run_simulate(config, &rest).await)
        }
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("presage-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// `args` without `flag` and its value.
fn strip_flag(args: &[String], flag: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            iter.next();
        } else {
            out.push(arg.clone());
        }
    }
    out
}

fn print_usage() {
    eprintln!(
        "presage-core {} - speculative execution and optimistic consistency core

USAGE:
    presage-core-cli <COMMAND> [OPTIONS]

COMMANDS:
    config     Inspect configuration (show, defaults, validate)
    simulate   Run the core against an in-memory backend and print stats
    version    Show version information
    help       Show this help message

OPTIONS:
    --config FILE  Load configuration from a TOML file
    -h, --help     Show help for command
    -V, --version  Show version information

ENVIRONMENT:
    PRESAGE_CONFIG     TOML config file (same as --config)
    PRESAGE_*          Per-field overrides, see `config defaults`
    PRESAGE_LOG_LEVEL  Log filter directive

EXIT CODES:
    0  Success
    1  Failure or validation warnings
    2  Configuration error
",
        env!("CARGO_PKG_VERSION")
    );
}

fn print_command_help(command: &str) {
    match command {
        "config" => eprintln!(
            "presage-core-cli config - Inspect configuration

USAGE:
    presage-core-cli config [show|defaults|validate] [--config FILE]

DESCRIPTION:
    show      Effective configuration (file, then environment overrides)
    defaults  Built-in defaults, ignoring file and environment
    validate  Warn about settings that load but behave badly
"
        ),
        "simulate" => eprintln!(
            "presage-core-cli simulate - Exercise the core

USAGE:
    presage-core-cli simulate [--rounds N] [--latency-ms N] [--fail-every N] [--config FILE]

DESCRIPTION:
    Navigates a repeating set of notes so the prefetcher learns the pattern,
    edits notes optimistically, and drops connectivity for the middle third
    of the run so edits queue and replay. Prints a JSON report of every
    component's statistics.

EXAMPLES:
    presage-core-cli simulate
    presage-core-cli simulate --rounds 100 --fail-every 7
"
        ),
        _ => print_usage(),
    }
}
