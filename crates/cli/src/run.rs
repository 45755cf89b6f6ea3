use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use log::info;

use avrsim_core::{debugger, loader, savestate, Arch, Avr, Config, Core, RunOutcome, Variant, DEFAULT_MEMORY_SIZE};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Firmware image (ELF or Intel HEX)
    image: PathBuf,

    /// Stop after this many instructions
    #[arg(long, default_value_t = 10_000_000)]
    max_steps: u64,

    /// Size of the flat address space in bytes
    #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE, value_parser = crate::parse_number)]
    memory_size: u32,

    /// Decode LDS/STS in their 16-bit reduced-core form
    #[arg(long)]
    reduced: bool,

    /// Print the registers when execution stops
    #[arg(long)]
    dump: bool,

    /// Write a snapshot of the final machine state to FILE
    #[arg(long, value_name = "FILE")]
    save_state: Option<PathBuf>,
}

pub fn run(args: RunArgs) -> Result<ExitCode> {
    let image = loader::load_file(&args.image)?;
    if image.arch != Arch::Avr {
        bail!("{} is an {} image; only AVR images can be executed", args.image.display(), image.arch);
    }
    let entry = crate::avr_entry(&image)?;

    let variant = if args.reduced { Variant::Reduced } else { Variant::Enhanced };
    let mut avr = Avr::new(Config { memory_size: args.memory_size, variant, ..Config::default() });
    image
        .load_into(&mut avr.mem)
        .with_context(|| format!("loading {} into {} bytes of memory", args.image.display(), args.memory_size))?;
    avr.cpu.pc = entry;
    info!("Running from 0x{:04X}, budget {} steps", image.entry_byte(), args.max_steps);

    let outcome = avr.run(args.max_steps);
    match &outcome {
        RunOutcome::Halted(err) => println!("Halted: {}", err),
        RunOutcome::SelfLoop { pc } => println!("Stopped: jump to self at 0x{:04X}", (*pc as u32) * 2),
        RunOutcome::Budget => println!("Stopped: {} steps executed", args.max_steps),
    }
    println!("Cycles: {}", avr.cpu.cycles);
    if args.dump {
        println!("{}", avr.dump_regs());
        print!("Ports:\n{}", debugger::dump_ports(&avr.io.ports));
    }

    if let Some(path) = &args.save_state {
        savestate::save_to_file(&avr.snapshot(), path)
            .with_context(|| format!("saving state to {}", path.display()))?;
        println!("State saved to {}", path.display());
    }

    Ok(match outcome {
        RunOutcome::Halted(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}
