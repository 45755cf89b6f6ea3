use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use avrsim_core::{hex, loader, Image};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Intel HEX text
    Hex,
    /// Flat binary starting at address zero
    Bin,
}

#[derive(Args, Debug)]
pub struct RetargetArgs {
    /// Input image (ELF, Mach-O or Intel HEX)
    image: PathBuf,

    /// Output file
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Hex)]
    format: OutputFormat,
}

fn render(image: &Image, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Hex => hex::encode(&image.segments, image.entry_byte()).into_bytes(),
        OutputFormat::Bin => image.flatten(),
    }
}

pub fn run(args: RetargetArgs) -> Result<ExitCode> {
    let image = loader::load_file(&args.image)?;
    let out = render(&image, args.format);
    std::fs::write(&args.output, &out).with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "Wrote {} ({} bytes, {} segment(s), {} {})",
        args.output.display(),
        out.len(),
        image.segments.len(),
        image.format,
        image.arch
    );
    Ok(ExitCode::SUCCESS)
}
