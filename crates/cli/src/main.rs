//! avrsim command-line front end.
//!
//! Usage:
//!   avrsim run <image> [--max-steps N] [--memory-size N] [--reduced] [--dump] [--save-state FILE]
//!   avrsim retarget <image> <output> [--format hex|bin]
//!   avrsim repl [--arch avr|arm64] [image]
//!
//! `-v` raises the log level to debug, `-vv` to trace. `RUST_LOG` takes
//! precedence when set.

mod repl;
mod retarget;
mod run;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use avrsim_core::loader::Image;

#[derive(Parser, Debug)]
#[command(name = "avrsim", author, version, about = "AVR instruction-set simulator", arg_required_else_help = true)]
struct Cli {
    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an image and execute it until it halts or loops on itself
    Run(run::RunArgs),
    /// Rewrite an image as Intel HEX or a flat binary
    Retarget(retarget::RetargetArgs),
    /// Interactive stepping, disassembly and memory inspection
    Repl(repl::ReplArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Parse `0x`-prefixed hex or plain decimal.
pub(crate) fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

/// AVR entry point as a program-counter word.
pub(crate) fn avr_entry(image: &Image) -> Result<u16> {
    u16::try_from(image.entry)
        .with_context(|| format!("entry point 0x{:x} is outside the 16-bit program space", image.entry_byte()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run::run(args),
        Command::Retarget(args) => retarget::run(args),
        Command::Repl(args) => repl::run(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x100"), Ok(256));
        assert_eq!(parse_number("0XfF"), Ok(255));
        assert_eq!(parse_number("65536"), Ok(65536));
        assert!(parse_number("0xzz").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn test_avr_entry_range() {
        let low = Image::parse(b":0400100001020304E2\n:0400000500000100F6\n:00000001FF\n").unwrap();
        assert_eq!(avr_entry(&low).unwrap(), 0x80);
        let high = Image::parse(b":0400100001020304E2\n:0400000500020000F5\n:00000001FF\n").unwrap();
        assert_eq!(high.entry, 0x10000);
        let err = avr_entry(&high).unwrap_err();
        assert!(err.to_string().contains("0x20000"), "{}", err);
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from(["avrsim", "-vv", "run", "fw.hex", "--memory-size", "0x8000", "--dump"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Run(_)));
        assert!(Cli::try_parse_from(["avrsim", "frobnicate"]).is_err());
    }
}
