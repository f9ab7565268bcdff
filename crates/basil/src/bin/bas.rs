use std::path::PathBuf;
use std::process::ExitCode;

use basil::{AppError, EXIT_FAILURE, assemble_file, init_logging};
use clap::Parser;
use nibble_machine::assembler::AssemblerOptions;
use nibble_machine::{NibbleOrder, Packing};
use tracing::Level;

/// Assembler for the nibble machine.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Binary image to write
    output: PathBuf,

    /// Keep the per-pass listings (`<output>.1`, `.2`, `.3`) and write the
    /// symbol file `<output>.sym`
    #[arg(short, long)]
    keep: bool,

    /// Encode one opcode per byte instead of two
    #[arg(short, long)]
    byte_instructions: bool,

    /// Put the first nibble of each byte in the low half
    #[arg(short = 'B', long, conflicts_with = "byte_instructions")]
    big_endian: bool,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

impl Args {
    fn options(&self) -> AssemblerOptions {
        let packing = if self.byte_instructions {
            Packing::Bytes
        } else if self.big_endian {
            Packing::Nibbles(NibbleOrder::Big)
        } else {
            Packing::Nibbles(NibbleOrder::Little)
        };
        AssemblerOptions {
            packing,
            keep_intermediates: self.keep,
        }
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(args.log_level);

    match main_real(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn main_real(args: &Args) -> Result<(), AppError> {
    tracing::debug!(
        "assembling {} into {}",
        args.source.display(),
        args.output.display()
    );
    let assembly = assemble_file(&args.source, &args.output, args.options())?;
    tracing::info!(
        "{}: {} nibbles, {} warnings",
        args.output.display(),
        assembly.nibble_count,
        assembly.warnings.len()
    );
    Ok(())
}
