//! Interactive loop over a [`Core`].
//!
//! Addresses are byte addresses; they accept `0x` hex or decimal. `asm`
//! words are always hex.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;

use avrsim_core::{
    arm64, debugger, disasm, loader, savestate, Arch, Arm64, Avr, Config, Core, FlatMemory, Memory, Variant,
    DEFAULT_MEMORY_SIZE,
};

use crate::parse_number;

const HELP: &str = "\
Commands:
  help                 show this text
  quit                 leave the REPL
  arch [avr|arm64]     show or switch architecture (switching clears the machine)
  asm <hex words...>   disassemble opcodes given on the line
  load <file>          load an ELF, Mach-O or Intel HEX image
  step [n]             execute n instructions (default 1), tracing each
  run [n]              execute until halt, jump to self, or n steps
  regs                 show registers
  mem <addr> [len]     hex dump memory (default 64 bytes)
  dis [addr] [n]       disassemble n instructions (default 10) from addr or PC
  reset                reset the core, keeping memory
  save [file]          write a snapshot (default: <image>.state)
  restore [file]       read a snapshot (default: <image>.state)";

const DEFAULT_RUN_STEPS: u64 = 1_000_000;

#[derive(Args, Debug)]
pub struct ReplArgs {
    /// Architecture to start with
    #[arg(long, default_value_t = Arch::Avr)]
    arch: Arch,

    /// Size of the flat address space in bytes
    #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE, value_parser = parse_number)]
    memory_size: u32,

    /// Image to load before the first prompt
    image: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn make_core(arch: Arch, memory_size: u32) -> Box<dyn Core> {
    match arch {
        Arch::Avr => Box::new(Avr::new(Config { memory_size, ..Config::default() })),
        Arch::Arm64 => Box::new(Arm64::new(memory_size)),
    }
}

fn word_width(arch: Arch) -> u32 {
    match arch {
        Arch::Avr => 2,
        Arch::Arm64 => 4,
    }
}

fn parse_word(s: &str) -> Result<u32> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|_| anyhow!("'{}' is not a hex word", s))
}

fn parse_arg(s: Option<&str>, default: u32) -> Result<u32> {
    match s {
        Some(s) => parse_number(s).map_err(|e| anyhow!(e)),
        None => Ok(default),
    }
}

pub struct Repl {
    core: Box<dyn Core>,
    arch: Arch,
    memory_size: u32,
    image: Option<PathBuf>,
}

impl Repl {
    pub fn new(arch: Arch, memory_size: u32) -> Self {
        Repl { core: make_core(arch, memory_size), arch, memory_size, image: None }
    }

    fn byte_addr(&self, word: u32) -> u32 {
        word.wrapping_mul(word_width(self.arch))
    }

    fn switch_arch(&mut self, arch: Arch) {
        self.arch = arch;
        self.core = make_core(arch, self.memory_size);
        self.image = None;
    }

    pub fn load(&mut self, path: &Path, out: &mut impl Write) -> Result<()> {
        let image = loader::load_file(path)?;
        let entry = match image.arch {
            Arch::Avr => u32::from(crate::avr_entry(&image)?),
            Arch::Arm64 => image.entry,
        };
        if image.arch != self.arch {
            writeln!(out, "Switching to {}", image.arch)?;
        }
        self.switch_arch(image.arch);
        image.load_into(self.core.memory_mut()).with_context(|| format!("loading {}", path.display()))?;
        self.core.set_pc(entry);
        self.image = Some(path.to_path_buf());
        writeln!(
            out,
            "Loaded {} ({} {}, {} segment(s), entry 0x{:04X})",
            path.display(),
            image.format,
            image.arch,
            image.segments.len(),
            image.entry_byte()
        )?;
        Ok(())
    }

    fn state_file(&self, arg: Option<&str>) -> Result<PathBuf> {
        match (arg, &self.image) {
            (Some(p), _) => Ok(PathBuf::from(p)),
            (None, Some(image)) => Ok(savestate::state_path(image)),
            (None, None) => bail!("no file given and no image loaded"),
        }
    }

    fn disassemble(&self, start_word: u32, count: u32, out: &mut impl Write) -> Result<()> {
        let mut word = start_word;
        for _ in 0..count {
            let (text, len) = self.core.disassemble(word);
            writeln!(out, "0x{:04X}: {}", self.byte_addr(word), text)?;
            word = word.wrapping_add(len);
        }
        Ok(())
    }

    fn asm(&self, words: &[&str], out: &mut impl Write) -> Result<()> {
        if words.is_empty() {
            bail!("usage: asm <hex words...>");
        }
        let words = words.iter().map(|w| parse_word(w)).collect::<Result<Vec<u32>>>()?;
        match self.arch {
            Arch::Avr => {
                let mut scratch = FlatMemory::new((words.len() as u32 + 1) * 2);
                for (i, w) in words.iter().enumerate() {
                    scratch.write_bytes(i as u32 * 2, &(*w as u16).to_le_bytes());
                }
                for line in disasm::disassemble_range(&scratch, 0, words.len() as u32 * 2, Variant::Enhanced) {
                    writeln!(out, "{}", line)?;
                }
            }
            Arch::Arm64 => {
                for (i, w) in words.iter().enumerate() {
                    writeln!(out, "0x{:04X}: {:08X}  {}", i * 4, w, arm64::printer::format(*w))?;
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, count: u32, out: &mut impl Write) -> Result<()> {
        for _ in 0..count {
            let pc = self.core.pc();
            let (text, _) = self.core.disassemble(pc);
            writeln!(out, "  0x{:04X}: {}", self.byte_addr(pc), text)?;
            if let Err(err) = self.core.step() {
                writeln!(out, "Halted: {}", err)?;
                break;
            }
        }
        Ok(())
    }

    fn run(&mut self, max_steps: u64, out: &mut impl Write) -> Result<()> {
        let mut executed = 0u64;
        while executed < max_steps {
            let pc = self.core.pc();
            if let Err(err) = self.core.step() {
                writeln!(out, "Halted: {}", err)?;
                break;
            }
            executed += 1;
            if self.core.pc() == pc {
                writeln!(out, "Stopped: jump to self at 0x{:04X}", self.byte_addr(pc))?;
                break;
            }
        }
        writeln!(out, "{} instruction(s) executed", executed)?;
        Ok(())
    }

    /// Execute one command line.
    pub fn execute(&mut self, line: &str, out: &mut impl Write) -> Result<Flow> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<&str> = parts.collect();

        match cmd {
            "help" | "h" | "?" => writeln!(out, "{}", HELP)?,
            "quit" | "q" | "exit" => return Ok(Flow::Quit),
            "arch" => match args.first() {
                None => writeln!(out, "Architecture: {}", self.arch)?,
                Some(name) => {
                    let arch: Arch = name.parse().map_err(|e: String| anyhow!(e))?;
                    self.switch_arch(arch);
                    writeln!(out, "Architecture: {}", arch)?;
                }
            },
            "asm" => self.asm(&args, out)?,
            "load" => {
                let path = args.first().ok_or_else(|| anyhow!("usage: load <file>"))?;
                self.load(Path::new(path), out)?;
            }
            "step" | "s" => {
                let n = parse_arg(args.first().copied(), 1)?;
                self.step(n, out)?;
            }
            "run" | "r" => {
                let n = match args.first() {
                    Some(s) => parse_number(s).map_err(|e| anyhow!(e))? as u64,
                    None => DEFAULT_RUN_STEPS,
                };
                self.run(n, out)?;
            }
            "regs" | "d" => writeln!(out, "{}", self.core.debug_dump())?,
            "mem" | "m" => {
                let addr = args.first().ok_or_else(|| anyhow!("usage: mem <addr> [len]"))?;
                let addr = parse_number(addr).map_err(|e| anyhow!(e))?;
                let len = parse_arg(args.get(1).copied(), 64)?;
                write!(out, "{}", debugger::dump_ram(self.core.memory(), addr, len))?;
            }
            "dis" => {
                let pc_byte = self.byte_addr(self.core.pc());
                let addr = parse_arg(args.first().copied(), pc_byte)?;
                let n = parse_arg(args.get(1).copied(), 10)?;
                self.disassemble(addr / word_width(self.arch), n, out)?;
            }
            "reset" => {
                self.core.reset();
                writeln!(out, "Reset.")?;
            }
            "save" => {
                let path = self.state_file(args.first().copied())?;
                savestate::save_to_file(&self.core.snapshot(), &path)
                    .with_context(|| format!("saving {}", path.display()))?;
                writeln!(out, "Saved {}", path.display())?;
            }
            "restore" => {
                let path = self.state_file(args.first().copied())?;
                let snapshot = savestate::load_from_file(&path, self.arch)
                    .with_context(|| format!("reading {}", path.display()))?;
                self.core.restore(snapshot)?;
                writeln!(out, "Restored {}", path.display())?;
            }
            _ => writeln!(out, "Unknown command.")?,
        }
        Ok(Flow::Continue)
    }
}

pub fn run(args: ReplArgs) -> Result<ExitCode> {
    let mut repl = Repl::new(args.arch, args.memory_size);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    if let Some(path) = &args.image {
        repl.load(path, &mut stdout)?;
    }
    writeln!(stdout, "Type 'help' for commands.")?;

    let mut line = String::new();
    loop {
        write!(stdout, "{}> ", repl.arch)?;
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            break;
        }
        match repl.execute(line.trim(), &mut stdout) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => writeln!(stdout, "error: {:#}", e)?,
        }
    }
    writeln!(stdout, "Done.")?;
    Ok(ExitCode::SUCCESS)
}
