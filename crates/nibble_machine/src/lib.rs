#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! Toolchain for the nibble machine, a stack machine whose instruction
//! stream is made of 4-bit units.
//!
//! The [`assembler`] turns mnemonic source into a packed byte image and
//! [`Machine`] executes that image. Every instruction occupies one nibble
//! except `push`, whose operand is the nibble that follows it. Stack values
//! are 32-bit words, so wider constants are built at run time out of
//! 4-bit pushes and arithmetic.

extern crate alloc;

use core::fmt;

use heapless::Vec;
use thiserror_no_std::Error;
use variant_count::VariantCount;

pub mod assembler;
pub mod image;
pub mod token;

pub use image::{NibbleOrder, Packing};


pub type Nibble = u8;
pub type StackWord = u32;

/// Words the operand stack can hold before `StackOverflow`.
pub const STACK_CAPACITY: usize = 4096;

pub type Stack = Vec<StackWord, STACK_CAPACITY>;

#[repr(u8)] // Must match Nibble
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Push,
    And,
    Not,
    Or,
    Mul,
    Div,
    Add,
    Cmp,
    Pop,
    Swap,
    Dup,
    Ppc,
    Get,
    Put,
    Br,
    Undefined,
}

const _: () = assert!(Opcode::VARIANT_COUNT == 16);

impl Opcode {
    pub fn from_nibble(nibble: Nibble) -> Self {
        match nibble & image::NIBBLE_MASK {
            0 => Opcode::Push,
            1 => Opcode::And,
            2 => Opcode::Not,
            3 => Opcode::Or,
            4 => Opcode::Mul,
            5 => Opcode::Div,
            6 => Opcode::Add,
            7 => Opcode::Cmp,
            8 => Opcode::Pop,
            9 => Opcode::Swap,
            10 => Opcode::Dup,
            11 => Opcode::Ppc,
            12 => Opcode::Get,
            13 => Opcode::Put,
            14 => Opcode::Br,
            _ => Opcode::Undefined,
        }
    }

    pub fn nibble(self) -> Nibble {
        self as Nibble
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Push => "push",
            Opcode::And => "and",
            Opcode::Not => "not",
            Opcode::Or => "or",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Add => "add",
            Opcode::Cmp => "cmp",
            Opcode::Pop => "pop",
            Opcode::Swap => "swap",
            Opcode::Dup => "dup",
            Opcode::Ppc => "ppc",
            Opcode::Get => "get",
            Opcode::Put => "put",
            Opcode::Br => "br",
            Opcode::Undefined => "und",
        }
    }

    /// Case-insensitive lookup, including the `psh`, `swp` and `branch`
    /// aliases. `und` is not assemblable.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        const ALIASES: [(&str, Opcode); 3] = [
            ("psh", Opcode::Push),
            ("swp", Opcode::Swap),
            ("branch", Opcode::Br),
        ];
        (0..Opcode::Undefined.nibble())
            .map(Opcode::from_nibble)
            .map(|op| (op.mnemonic(), op))
            .chain(ALIASES)
            .find(|(mnemonic, _)| mnemonic.eq_ignore_ascii_case(name))
            .map(|(_, op)| op)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineError {
    #[error("underflow")]
    StackUnderflow,
    #[error("overflow")]
    StackOverflow,
    #[error("undefined opcode")]
    UndefinedOpcode,
    #[error("division by zero or overflow in div")]
    DivisionByZero,
    #[error("executing code outside of program space")]
    ExecutedPastEnd,
    #[error("received EOF")]
    EndOfInput,
    #[error("failed to read input")]
    Input,
    #[error("failed to write output")]
    Output,
}

/// A runtime fault together with the instruction counter it happened at.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{error}: pc = {counter}")]
pub struct Fault {
    pub counter: StackWord,
    pub error: MachineError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineConfig {
    pub packing: Packing,
}

/// Events reported to [`Host::trace`] while the machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    Fetch {
        counter: StackWord,
        /// Counter while the fetched nibble executes; faults report this.
        next: StackWord,
        slot: image::Slot,
    },
    PushOperand(Nibble),
    Execute(Opcode),
}

/// The world outside the machine: `get`/`put` I/O and tracing.
pub trait Host {
    /// Next input byte, `Ok(None)` at end of input.
    fn get(&mut self) -> Result<Option<u8>, MachineError>;

    fn put(&mut self, byte: u8) -> Result<(), MachineError>;

    fn trace(&mut self, _event: Trace) {}
}

pub struct Machine<'a> {
    image: &'a [u8],
    packing: Packing,
    stack: Stack,
    counter: StackWord,
    push_pending: bool,
}

impl<'a> Machine<'a> {
    pub fn new(image: &'a [u8], config: MachineConfig) -> Self {
        Self {
            image,
            packing: config.packing,
            stack: Vec::new(),
            counter: 0,
            push_pending: false,
        }
    }

    /// Stack contents, bottom first.
    pub fn stack(&self) -> &[StackWord] {
        self.stack.as_slice()
    }

    /// Nibble address of the next instruction.
    pub fn counter(&self) -> StackWord {
        self.counter
    }

    /// Runs until a fault stops the machine. There is no halt instruction,
    /// so this only returns once something went wrong or the program ran
    /// off the end of the image.
    pub fn run<H: Host>(&mut self, host: &mut H) -> Fault {
        loop {
            if let Err(fault) = self.step(host) {
                return fault;
            }
        }
    }

    /// Fetches and executes one nibble.
    pub fn step<H: Host>(&mut self, host: &mut H) -> Result<(), Fault> {
        let slot = usize::try_from(self.counter)
            .ok()
            .and_then(|position| image::nibble_at(self.image, position, self.packing))
            .ok_or(self.fault(MachineError::ExecutedPastEnd))?;
        // The counter already names the next nibble while this one runs,
        // which is what `ppc` pushes and what `br` overwrites.
        let next = self.counter.wrapping_add(1);
        host.trace(Trace::Fetch {
            counter: self.counter,
            next,
            slot,
        });
        self.counter = next;
        self.execute(slot.nibble, host)
            .map_err(|error| self.fault(error))
    }

    fn fault(&self, error: MachineError) -> Fault {
        Fault {
            counter: self.counter,
            error,
        }
    }

    fn execute<H: Host>(&mut self, nibble: Nibble, host: &mut H) -> Result<(), MachineError> {
        if self.push_pending {
            self.push_pending = false;
            host.trace(Trace::PushOperand(nibble));
            return push(&mut self.stack, StackWord::from(nibble));
        }
        let mut op = Opcode::from_nibble(nibble);
        loop {
            if op != Opcode::Push {
                host.trace(Trace::Execute(op));
            }
            match self.dispatch(op, host)? {
                Some(computed) => op = Opcode::from_nibble(computed),
                None => return Ok(()),
            }
        }
    }

    /// Runs `op`. `swap 0` returns the nibble it computed for `execute` to run.
    fn dispatch<H: Host>(
        &mut self,
        op: Opcode,
        host: &mut H,
    ) -> Result<Option<Nibble>, MachineError> {
        let stack = &mut self.stack;
        match op {
            Opcode::Push => {
                self.push_pending = true;
            }
            Opcode::And => {
                let (a, b) = pop2(stack)?;
                push(stack, a & b)?;
            }
            Opcode::Not => {
                let a = pop(stack)?;
                push(stack, !a)?;
            }
            Opcode::Or => {
                let (a, b) = pop2(stack)?;
                push(stack, a | b)?;
            }
            Opcode::Mul => {
                let (a, b) = pop2_signed(stack)?;
                push(stack, a.wrapping_mul(b) as StackWord)?;
            }
            Opcode::Div => {
                let (a, b) = pop2_signed(stack)?;
                let quotient = a.checked_div(b).ok_or(MachineError::DivisionByZero)?;
                push(stack, quotient as StackWord)?;
            }
            Opcode::Add => {
                let (a, b) = pop2_signed(stack)?;
                push(stack, a.wrapping_add(b) as StackWord)?;
            }
            Opcode::Cmp => {
                let (a, b) = pop2(stack)?;
                push(stack, StackWord::from(a == b))?;
            }
            Opcode::Pop => {
                pop(stack)?;
            }
            Opcode::Swap => {
                let depth = pop(stack)?;
                let top = stack
                    .len()
                    .checked_sub(1)
                    .ok_or(MachineError::StackUnderflow)?;
                if depth == 0 {
                    // Computed dispatch: the popped word's low nibble runs
                    // as if it had been read from the instruction stream.
                    let code = pop(stack)? & StackWord::from(image::NIBBLE_MASK);
                    return Ok(Some(code as Nibble));
                }
                let other = usize::try_from(depth)
                    .ok()
                    .and_then(|depth| top.checked_sub(depth))
                    .ok_or(MachineError::StackUnderflow)?;
                stack.swap(top, other);
            }
            Opcode::Dup => {
                let value = *stack.last().ok_or(MachineError::StackUnderflow)?;
                push(stack, value)?;
            }
            Opcode::Ppc => {
                push(stack, self.counter)?;
            }
            Opcode::Get => {
                let byte = host.get()?.ok_or(MachineError::EndOfInput)?;
                push(stack, StackWord::from(byte))?;
            }
            Opcode::Put => {
                let value = pop(stack)?;
                host.put((value & 0xFF) as u8)?;
            }
            Opcode::Br => {
                let test = pop(stack)?;
                let target = pop(stack)?;
                if test != 0 {
                    self.counter = target;
                }
            }
            Opcode::Undefined => return Err(MachineError::UndefinedOpcode),
        }
        Ok(None)
    }
}

fn pop(stack: &mut Stack) -> Result<StackWord, MachineError> {
    stack.pop().ok_or(MachineError::StackUnderflow)
}

/// Pops `a` (the top) and then `b`.
fn pop2(stack: &mut Stack) -> Result<(StackWord, StackWord), MachineError> {
    let a = pop(stack)?;
    let b = pop(stack)?;
    Ok((a, b))
}

fn pop2_signed(stack: &mut Stack) -> Result<(i32, i32), MachineError> {
    let (a, b) = pop2(stack)?;
    Ok((a as i32, b as i32))
}

fn push(stack: &mut Stack, value: StackWord) -> Result<(), MachineError> {
    if stack.push(value).is_err() {
        return Err(MachineError::StackOverflow);
    }
    Ok(())
}
