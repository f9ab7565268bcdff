//! Four-pass assembler.
//!
//! 1. [`expand_pushes`] rewrites every `push` whose operand does not fit in
//!    a nibble into a sequence that rebuilds the value on the stack.
//! 2. [`SymbolTable::build`] records label addresses, counted in nibbles,
//!    and drops the label lines.
//! 3. [`resolve`] replaces `name:digit` references with one nibble of the
//!    label's address.
//! 4. [`encode`] maps mnemonics and literals to nibbles, which
//!    [`image::pack`] then packs into bytes.
//!
//! Each pass consumes the complete output of the one before it.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use thiserror_no_std::Error;

use crate::image::{self, NIBBLE_MASK, Packing};
use crate::token::{self, LineKind, Reference, SourceLine, Token, write_joined};
use crate::{Nibble, Opcode};

const NIBBLE_BITS: u32 = 4;

/// Addresses are 16 bits wide, four nibbles.
pub const ADDRESS_MASK: u32 = 0xFFFF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("{0}")]
    Kind(AssemblerErrorKind),
    #[error("{line}: {kind}")]
    WithLine { line: u32, kind: AssemblerErrorKind },
}

impl AssemblerError {
    pub(crate) fn with_line(self, line: u32) -> Self {
        match self {
            AssemblerError::WithLine { .. } => self,
            AssemblerError::Kind(kind) => AssemblerError::WithLine { line, kind },
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::Kind(_) => None,
            Self::WithLine { line, .. } => Some(*line),
        }
    }

    pub fn error_kind(&self) -> &AssemblerErrorKind {
        match self {
            Self::Kind(kind) => kind,
            Self::WithLine { kind, .. } => kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerErrorKind {
    #[error("push requires an immediate operand")]
    MissingPushOperand,
    #[error("undefined reference to '{0}'")]
    UndefinedReference(String),
    #[error("invalid label reference digit in '{0}'")]
    InvalidReferenceDigit(String),
    #[error("invalid label '{0}'")]
    InvalidLabel(String),
    #[error("invalid opcode: {0}")]
    InvalidOpcode(String),
    #[error("too many source lines")]
    LineNumberOverflow,
    #[error("program counter overflow")]
    ProgramCounterOverflow,
}

/// Non-fatal findings; assembly carries on with a substitute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub line: u32,
    pub kind: WarningKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    ImmediateTruncated(i64),
    LabelRedefined { name: String, previous: u32, pc: u32 },
    AddressTruncated { name: String, pc: u32 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.line)?;
        match &self.kind {
            WarningKind::ImmediateTruncated(value) => {
                write!(f, "immediate value truncated to 4 bits: {value}")
            }
            WarningKind::LabelRedefined { name, previous, pc } => {
                write!(f, "label '{name}' redefined (was {previous}, now {pc})")
            }
            WarningKind::AddressTruncated { name, pc } => {
                write!(f, "address of label '{name}' truncated to 16 bits: {pc}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerOptions {
    pub packing: Packing,
    /// Render the output of every pass and the symbol listing.
    pub keep_intermediates: bool,
}

/// Text form of each pass's output, for debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intermediates {
    pub expanded: String,
    pub stripped: String,
    pub resolved: String,
    /// One `name: pc` line per label definition.
    pub symbols: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub image: Vec<u8>,
    /// Length of the instruction stream in nibbles.
    pub nibble_count: usize,
    pub warnings: Vec<Warning>,
    pub intermediates: Option<Intermediates>,
}

pub struct Assembler {
    options: AssemblerOptions,
    lines: Vec<SourceLine>,
    line_number: u32,
}

impl Assembler {
    pub fn new(options: AssemblerOptions) -> Self {
        Self {
            options,
            lines: Vec::new(),
            line_number: 0,
        }
    }

    pub fn add_line(&mut self, line: &str) -> Result<(), AssemblerError> {
        self.line_number = self
            .line_number
            .checked_add(1)
            .ok_or(AssemblerError::Kind(AssemblerErrorKind::LineNumberOverflow))?;
        let lines = token::tokenize_line(self.line_number, line)?;
        self.lines.extend(lines);
        Ok(())
    }

    /// Runs all four passes over the collected lines.
    pub fn finish(self) -> Result<Assembly, AssemblerError> {
        let keep = self.options.keep_intermediates;
        let mut warnings = Vec::new();
        let mut intermediates = Intermediates::default();

        let expanded = expand_pushes(self.lines)?;
        if keep {
            intermediates.expanded = render(&expanded);
        }

        let (symbols, stripped) = SymbolTable::build(expanded, &mut warnings)?;
        if keep {
            intermediates.stripped = render(&stripped);
            intermediates.symbols = symbols.listing();
        }

        let resolved = resolve(stripped, &symbols)?;
        drop(symbols);
        if keep {
            intermediates.resolved = render(&resolved);
        }

        let nibbles = encode(&resolved, &mut warnings)?;
        Ok(Assembly {
            image: image::pack(&nibbles, self.options.packing),
            nibble_count: nibbles.len(),
            warnings,
            intermediates: keep.then_some(intermediates),
        })
    }
}

pub fn assemble(source: &str, options: AssemblerOptions) -> Result<Assembly, AssemblerError> {
    let mut assembler = Assembler::new(options);
    for line in source.lines() {
        assembler.add_line(line)?;
    }
    assembler.finish()
}

fn render<T: fmt::Display>(lines: &[T]) -> String {
    let mut out = String::new();
    for line in lines {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{line}");
    }
    out
}

fn nibble_of(value: u32, digit: u8) -> Nibble {
    let shift = NIBBLE_BITS.wrapping_mul(u32::from(digit));
    (value.wrapping_shr(shift) & u32::from(NIBBLE_MASK)) as Nibble
}

fn fits_nibble(value: i64) -> bool {
    (0..=i64::from(NIBBLE_MASK)).contains(&value)
}

fn mnemonic(op: Opcode) -> Token {
    Token::Identifier(op.mnemonic().to_string())
}

fn is_push(token: &Token) -> bool {
    matches!(token, Token::Identifier(name) if Opcode::from_mnemonic(name) == Some(Opcode::Push))
}

enum Step {
    /// Push the next address field, most significant first.
    Field,
    Literal(i64),
    Op(Opcode),
}

/// Rebuilds `f3 << 12 | f2 << 8 | f1 << 4 | f0` from 4-bit pushes. The
/// shifts are multiplications by powers of sixteen built from small
/// constants, and the fields are disjoint, so `or` combines them.
const EXPANSION: [Step; 23] = [
    // f3 * 8^4
    Step::Field,
    Step::Literal(8),
    Step::Op(Opcode::Dup),
    Step::Op(Opcode::Mul),
    Step::Op(Opcode::Dup),
    Step::Op(Opcode::Mul),
    Step::Op(Opcode::Mul),
    // f2 * (15 + 1)^2
    Step::Field,
    Step::Literal(15),
    Step::Literal(1),
    Step::Op(Opcode::Add),
    Step::Op(Opcode::Dup),
    Step::Op(Opcode::Mul),
    Step::Op(Opcode::Mul),
    // f1 * 4^2
    Step::Field,
    Step::Literal(4),
    Step::Op(Opcode::Dup),
    Step::Op(Opcode::Mul),
    Step::Op(Opcode::Mul),
    // f0
    Step::Field,
    Step::Op(Opcode::Or),
    Step::Op(Opcode::Or),
    Step::Op(Opcode::Or),
];

/// Nibbles taken by one expanded `push`.
pub const EXPANSION_NIBBLES: usize = 31;

fn expansion(number: u32, fields: [Token; 4], out: &mut Vec<SourceLine>) {
    let mut fields = fields.into_iter();
    for step in EXPANSION.iter() {
        let tokens = match step {
            Step::Field => match fields.next() {
                Some(field) => vec![mnemonic(Opcode::Push), field],
                None => continue,
            },
            Step::Literal(value) => vec![mnemonic(Opcode::Push), Token::Number(*value)],
            Step::Op(op) => vec![mnemonic(*op)],
        };
        out.push(SourceLine::instruction(number, tokens));
    }
}

/// The four fields of a `push` operand that needs expanding, or the operand
/// itself when it can stay as it is.
fn wide_operand(operand: Token) -> Result<[Token; 4], Token> {
    match operand {
        Token::Number(value) if !fits_nibble(value) => {
            let value = u32::from(value as u16);
            Ok([3, 2, 1, 0].map(|digit| Token::Number(i64::from(nibble_of(value, digit)))))
        }
        Token::Identifier(name) => Ok([3, 2, 1, 0].map(|digit| {
            Token::Reference(Reference {
                name: name.clone(),
                digit,
            })
        })),
        operand => Err(operand),
    }
}

/// Pass 1.
pub fn expand_pushes(lines: Vec<SourceLine>) -> Result<Vec<SourceLine>, AssemblerError> {
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let number = line.number;
        match line.kind {
            LineKind::Label(name) => out.push(SourceLine::label(number, name)),
            LineKind::Instruction(tokens) => expand_line(number, tokens, &mut out)?,
        }
    }
    Ok(out)
}

fn expand_line(
    number: u32,
    tokens: Vec<Token>,
    out: &mut Vec<SourceLine>,
) -> Result<(), AssemblerError> {
    let mut pending = Vec::new();
    let mut tokens = tokens.into_iter();
    while let Some(token) = tokens.next() {
        if !is_push(&token) {
            pending.push(token);
            continue;
        }
        let operand = tokens
            .next()
            .ok_or(AssemblerError::Kind(AssemblerErrorKind::MissingPushOperand).with_line(number))?;
        match wide_operand(operand) {
            Ok(fields) => {
                if !pending.is_empty() {
                    out.push(SourceLine::instruction(number, core::mem::take(&mut pending)));
                }
                expansion(number, fields, out);
            }
            Err(operand) => {
                pending.push(token);
                pending.push(operand);
            }
        }
    }
    if !pending.is_empty() {
        out.push(SourceLine::instruction(number, pending));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    /// Nibbles preceding the definition.
    pub pc: u32,
    pub line: u32,
}

/// Labels collected by pass 2 and read by pass 3.
///
/// Definitions are kept in the order they were seen. When a name is
/// defined more than once the last definition wins for every lookup;
/// pass 2 reports the redefinition as a warning.
#[derive(Debug, Default)]
pub struct SymbolTable {
    definitions: Vec<Label>,
    latest: BTreeMap<String, usize>,
}

/// A source line with only instruction tokens left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionLine {
    pub number: u32,
    pub tokens: Vec<Token>,
}

impl fmt::Display for InstructionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.tokens)
    }
}

impl SymbolTable {
    /// Pass 2.
    pub fn build(
        lines: Vec<SourceLine>,
        warnings: &mut Vec<Warning>,
    ) -> Result<(Self, Vec<InstructionLine>), AssemblerError> {
        let mut table = Self::default();
        let mut out = Vec::with_capacity(lines.len());
        let mut pc: u32 = 0;
        for line in lines {
            match line.kind {
                LineKind::Label(name) => {
                    table.define(
                        Label {
                            name,
                            pc,
                            line: line.number,
                        },
                        warnings,
                    );
                }
                LineKind::Instruction(tokens) => {
                    pc = u32::try_from(tokens.len())
                        .ok()
                        .and_then(|count| pc.checked_add(count))
                        .ok_or(
                            AssemblerError::Kind(AssemblerErrorKind::ProgramCounterOverflow)
                                .with_line(line.number),
                        )?;
                    out.push(InstructionLine {
                        number: line.number,
                        tokens,
                    });
                }
            }
        }
        Ok((table, out))
    }

    fn define(&mut self, label: Label, warnings: &mut Vec<Warning>) {
        if label.pc > ADDRESS_MASK {
            warnings.push(Warning {
                line: label.line,
                kind: WarningKind::AddressTruncated {
                    name: label.name.clone(),
                    pc: label.pc,
                },
            });
        }
        if let Some(previous) = self.lookup(&label.name) {
            warnings.push(Warning {
                line: label.line,
                kind: WarningKind::LabelRedefined {
                    name: label.name.clone(),
                    previous: previous.pc,
                    pc: label.pc,
                },
            });
        }
        self.latest.insert(label.name.clone(), self.definitions.len());
        self.definitions.push(label);
    }

    pub fn lookup(&self, name: &str) -> Option<&Label> {
        self.latest
            .get(name)
            .and_then(|index| self.definitions.get(*index))
    }

    pub fn listing(&self) -> String {
        let mut out = String::new();
        for label in &self.definitions {
            let _ = writeln!(out, "{}: {}", label.name, label.pc);
        }
        out
    }
}

/// Token stream after label resolution: numbers and mnemonics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Number(i64),
    Mnemonic(String),
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Number(value) => write!(f, "{value}"),
            Word::Mnemonic(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub number: u32,
    pub words: Vec<Word>,
}

impl fmt::Display for ResolvedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_joined(f, &self.words)
    }
}

/// Pass 3.
pub fn resolve(
    lines: Vec<InstructionLine>,
    symbols: &SymbolTable,
) -> Result<Vec<ResolvedLine>, AssemblerError> {
    lines
        .into_iter()
        .map(|line| {
            let number = line.number;
            let words = line
                .tokens
                .into_iter()
                .map(|token| match token {
                    Token::Number(value) => Ok(Word::Number(value)),
                    Token::Identifier(name) => Ok(Word::Mnemonic(name)),
                    Token::Reference(Reference { name, digit }) => {
                        let label = symbols.lookup(&name).ok_or_else(|| {
                            AssemblerError::Kind(AssemblerErrorKind::UndefinedReference(
                                name.clone(),
                            ))
                            .with_line(number)
                        })?;
                        let nibble = nibble_of(label.pc & ADDRESS_MASK, digit);
                        Ok(Word::Number(i64::from(nibble)))
                    }
                })
                .collect::<Result<Vec<_>, AssemblerError>>()?;
            Ok(ResolvedLine { number, words })
        })
        .collect()
}

/// Pass 4: one nibble per word.
pub fn encode(
    lines: &[ResolvedLine],
    warnings: &mut Vec<Warning>,
) -> Result<Vec<Nibble>, AssemblerError> {
    let mut nibbles = Vec::new();
    for line in lines {
        for word in &line.words {
            let nibble = match word {
                Word::Number(value) => {
                    if !fits_nibble(*value) {
                        warnings.push(Warning {
                            line: line.number,
                            kind: WarningKind::ImmediateTruncated(*value),
                        });
                    }
                    (*value & i64::from(NIBBLE_MASK)) as Nibble
                }
                Word::Mnemonic(name) => Opcode::from_mnemonic(name)
                    .ok_or_else(|| {
                        AssemblerError::Kind(AssemblerErrorKind::InvalidOpcode(name.clone()))
                            .with_line(line.number)
                    })?
                    .nibble(),
            };
            nibbles.push(nibble);
        }
    }
    Ok(nibbles)
}
