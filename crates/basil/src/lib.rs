//! Host side of the nibble machine toolchain: file handling, logging and
//! the stream-backed [`Host`] used by `basilsim`.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use nibble_machine::assembler::{Assembler, AssemblerError, AssemblerOptions, Assembly};
use nibble_machine::{Fault, Host, MachineError, StackWord, Trace};
use thiserror_no_std::Error;
use tracing::Level;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_FAULT: u8 = 2;
pub const EXIT_RESOURCE: u8 = 3;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("cannot read {path}: {error}")]
    ReadSource { path: String, error: io::Error },
    #[error("cannot write {path}: {error}")]
    WriteOutput { path: String, error: io::Error },
    #[error("{path}:{}{error}", line_separator(.error))]
    Assemble { path: String, error: AssemblerError },
    #[error("cannot open {path}: {error}")]
    OpenImage { path: String, error: io::Error },
    #[error("cannot stat {path}: {error}")]
    Metadata { path: String, error: io::Error },
    #[error("cannot allocate {size} bytes for {path}")]
    Allocation { path: String, size: u64 },
    #[error("cannot load {path}: {error}")]
    LoadImage { path: String, error: io::Error },
    #[error("cannot install interrupt handler: {0}")]
    Signal(String),
    #[error("{0}")]
    Fault(Fault),
}

impl AppError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::ReadSource { .. }
            | AppError::WriteOutput { .. }
            | AppError::Assemble { .. }
            | AppError::OpenImage { .. } => EXIT_FAILURE,
            AppError::Fault(_) => EXIT_FAULT,
            AppError::Metadata { .. }
            | AppError::Allocation { .. }
            | AppError::LoadImage { .. }
            | AppError::Signal(_) => EXIT_RESOURCE,
        }
    }
}

/// `file:line: message` when the error has a line, `file: message` otherwise.
fn line_separator(error: &AssemblerError) -> &'static str {
    match error.line_number() {
        Some(_) => "",
        None => " ",
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Installs the stderr subscriber shared by both tools.
pub fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

/// Assembles `text`, naming `path` in diagnostics. Warnings are logged and
/// returned with the assembly.
pub fn assemble_source(
    path: &Path,
    text: &str,
    options: AssemblerOptions,
) -> Result<Assembly, AppError> {
    let assemble_error = |error| AppError::Assemble {
        path: display(path),
        error,
    };
    let mut assembler = Assembler::new(options);
    for line in text.lines() {
        assembler.add_line(line).map_err(assemble_error)?;
    }
    tracing::trace!("running passes");
    let assembly = assembler.finish().map_err(assemble_error)?;
    for warning in &assembly.warnings {
        tracing::warn!("{}:{warning}", path.display());
    }
    tracing::debug!(
        "{} nibbles, {} bytes",
        assembly.nibble_count,
        assembly.image.len()
    );
    Ok(assembly)
}

/// `<output>.<suffix>`
pub fn artifact_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    fs::write(path, contents).map_err(|error| AppError::WriteOutput {
        path: display(path),
        error,
    })
}

/// Reads `source`, assembles it and writes the image to `output`, plus the
/// per-pass listings and symbol file when they were kept.
pub fn assemble_file(
    source: &Path,
    output: &Path,
    options: AssemblerOptions,
) -> Result<Assembly, AppError> {
    let text = fs::read_to_string(source).map_err(|error| AppError::ReadSource {
        path: display(source),
        error,
    })?;
    let assembly = assemble_source(source, &text, options)?;
    write_file(output, &assembly.image)?;
    if let Some(intermediates) = &assembly.intermediates {
        for (suffix, contents) in [
            ("1", &intermediates.expanded),
            ("2", &intermediates.stripped),
            ("3", &intermediates.resolved),
            ("sym", &intermediates.symbols),
        ] {
            let path = artifact_path(output, suffix);
            tracing::debug!("writing {}", path.display());
            write_file(&path, contents.as_bytes())?;
        }
    }
    Ok(assembly)
}

/// Loads a whole image into memory. The buffer is reserved up front so an
/// oversized file fails as an allocation error rather than aborting.
pub fn load_image(path: &Path) -> Result<Vec<u8>, AppError> {
    let mut file = File::open(path).map_err(|error| AppError::OpenImage {
        path: display(path),
        error,
    })?;
    let size = file
        .metadata()
        .map_err(|error| AppError::Metadata {
            path: display(path),
            error,
        })?
        .len();
    let allocation = || AppError::Allocation {
        path: display(path),
        size,
    };
    let mut image = Vec::new();
    image
        .try_reserve_exact(usize::try_from(size).map_err(|_| allocation())?)
        .map_err(|_| allocation())?;
    file.read_to_end(&mut image)
        .map_err(|error| AppError::LoadImage {
            path: display(path),
            error,
        })?;
    Ok(image)
}

/// [`Host`] over byte streams. Every fetch publishes the instruction
/// counter so an interrupt handler on another thread can report it.
pub struct StreamHost<R, W> {
    input: R,
    output: W,
    counter: Arc<AtomicU32>,
}

impl<R: Read, W: Write> StreamHost<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            counter: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared view of the counter of the instruction being executed, as a
    /// fault at that instruction would report it.
    pub fn counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.counter)
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: Read, W: Write> Host for StreamHost<R, W> {
    fn get(&mut self) -> Result<Option<u8>, MachineError> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::error!("get: {error}");
                    return Err(MachineError::Input);
                }
            }
        }
    }

    fn put(&mut self, byte: u8) -> Result<(), MachineError> {
        self.output
            .write_all(&[byte])
            .and_then(|()| self.output.flush())
            .map_err(|error| {
                tracing::error!("put: {error}");
                MachineError::Output
            })
    }

    fn trace(&mut self, event: Trace) {
        match event {
            Trace::Fetch {
                counter,
                next,
                slot,
            } => {
                self.counter.store(next, Ordering::Relaxed);
                tracing::trace!(
                    "{counter}: {} {}: {:x}: {:x}",
                    slot.selector,
                    slot.byte_index,
                    slot.nibble,
                    slot.byte
                );
            }
            Trace::PushOperand(value) => tracing::debug!("push {value}"),
            Trace::Execute(op) => tracing::debug!("{op}"),
        }
    }
}

/// Message printed when the simulator is interrupted.
pub fn interrupted_message(counter: StackWord) -> String {
    format!("interrupted: pc = {counter}")
}

#[cfg(test)]
mod test;
