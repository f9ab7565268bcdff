use std::io;
use std::path::PathBuf;
use std::process::{self, ExitCode};
use std::sync::atomic::Ordering;

use basil::{
    AppError, EXIT_FAILURE, EXIT_FAULT, StreamHost, init_logging, interrupted_message, load_image,
};
use clap::Parser;
use nibble_machine::{Machine, MachineConfig, NibbleOrder, Packing};
use tracing::Level;

/// Interpreter for nibble machine images.
// No `version`: clap would claim `-V`.
#[derive(Parser)]
#[command(about, long_about = None)]
struct Args {
    /// Image produced by `bas`
    image: PathBuf,

    /// Log every executed instruction
    #[arg(short, long)]
    verbose: bool,

    /// Also log the counter, byte offset and raw byte of every fetch
    #[arg(short = 'V', long)]
    very_verbose: bool,

    /// Read the first nibble of each byte from the low half
    #[arg(short = 'b', long)]
    big_endian: bool,

    /// The image holds one opcode per byte
    #[arg(long, conflicts_with = "big_endian")]
    byte_instructions: bool,
}

impl Args {
    fn level(&self) -> Level {
        if self.very_verbose {
            Level::TRACE
        } else if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    fn config(&self) -> MachineConfig {
        let packing = if self.byte_instructions {
            Packing::Bytes
        } else if self.big_endian {
            Packing::Nibbles(NibbleOrder::Big)
        } else {
            Packing::Nibbles(NibbleOrder::Little)
        };
        MachineConfig { packing }
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
    init_logging(args.level());

    // The machine only stops on a fault, so success is never returned.
    let error = main_real(&args);
    tracing::error!("{error}");
    ExitCode::from(error.exit_code())
}

fn main_real(args: &Args) -> AppError {
    let image = match load_image(&args.image) {
        Ok(image) => image,
        Err(error) => return error,
    };
    tracing::debug!("loaded {} bytes", image.len());

    let mut host = StreamHost::new(io::stdin().lock(), io::stdout().lock());
    let counter = host.counter();
    let installed = ctrlc::set_handler(move || {
        tracing::error!("{}", interrupted_message(counter.load(Ordering::Relaxed)));
        process::exit(i32::from(EXIT_FAULT));
    });
    if let Err(error) = installed {
        return AppError::Signal(error.to_string());
    }

    let mut machine = Machine::new(&image, args.config());
    AppError::Fault(machine.run(&mut host))
}
