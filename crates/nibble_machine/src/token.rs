//! Line tokenizer shared by every assembler pass.
//!
//! Each source line is classified once into a [`LineKind`] carrying tagged
//! [`Token`]s; later passes rewrite these values and never look at the raw
//! text again.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::assembler::{AssemblerError, AssemblerErrorKind};

pub const COMMENT: char = ';';
pub const LABEL_SUFFIX: char = ':';

/// Highest nibble selectable by a `name:digit` reference.
pub const MAX_REFERENCE_DIGIT: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Number(i64),
    Identifier(String),
    Reference(Reference),
}

/// `name:digit`, one nibble of a label's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub digit: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Label(String),
    Instruction(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line in the original source; expansions keep the number of
    /// the line they came from.
    pub number: u32,
    pub kind: LineKind,
}

impl SourceLine {
    pub fn instruction(number: u32, tokens: Vec<Token>) -> Self {
        Self {
            number,
            kind: LineKind::Instruction(tokens),
        }
    }

    pub fn label(number: u32, name: String) -> Self {
        Self {
            number,
            kind: LineKind::Label(name),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "{value}"),
            Token::Identifier(name) => f.write_str(name),
            Token::Reference(reference) => {
                write!(f, "{}{LABEL_SUFFIX}{}", reference.name, reference.digit)
            }
        }
    }
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LineKind::Label(name) => write!(f, "{name}{LABEL_SUFFIX}"),
            LineKind::Instruction(tokens) => write_joined(f, tokens),
        }
    }
}

/// Writes `items` separated by single spaces.
pub fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index != 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Splits one line of source. Blank and comment-only lines yield nothing; a
/// leading `name:` yields a label line, followed by an instruction line when
/// more tokens come after it.
pub fn tokenize_line(number: u32, line: &str) -> Result<Vec<SourceLine>, AssemblerError> {
    let code = match line.split_once(COMMENT) {
        Some((code, _)) => code,
        None => line,
    };
    let mut words = code.split_whitespace().peekable();
    let mut lines = Vec::new();

    if let Some(name) = words.peek().and_then(|first| label_definition(first)) {
        let name = name.map_err(|kind| AssemblerError::Kind(kind).with_line(number))?;
        lines.push(SourceLine::label(number, name));
        words.next();
    }

    let tokens = words
        .map(classify)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|kind| AssemblerError::Kind(kind).with_line(number))?;
    if !tokens.is_empty() {
        lines.push(SourceLine::instruction(number, tokens));
    }
    Ok(lines)
}

/// Tokenizes a whole source text.
pub fn tokenize(source: &str) -> Result<Vec<SourceLine>, AssemblerError> {
    let mut lines = Vec::new();
    let mut number: u32 = 0;
    for line in source.lines() {
        number = number
            .checked_add(1)
            .ok_or(AssemblerError::Kind(AssemblerErrorKind::LineNumberOverflow))?;
        lines.extend(tokenize_line(number, line)?);
    }
    Ok(lines)
}

/// `Some` when `word` is `name:` with nothing after the colon.
fn label_definition(word: &str) -> Option<Result<String, AssemblerErrorKind>> {
    let (name, rest) = word.split_once(LABEL_SUFFIX)?;
    if !rest.is_empty() {
        return None;
    }
    Some(validate_name(name, word))
}

fn classify(word: &str) -> Result<Token, AssemblerErrorKind> {
    if let Some(value) = parse_number(word) {
        return Ok(Token::Number(value));
    }
    let Some((name, rest)) = word.split_once(LABEL_SUFFIX) else {
        return Ok(Token::Identifier(word.to_string()));
    };
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        // `name:` after the first token, or `name:x`.
        return Err(AssemblerErrorKind::InvalidLabel(word.to_string()));
    }
    let name = validate_name(name, word)?;
    let digit = match rest.parse::<u8>() {
        Ok(digit) if rest.len() == 1 && digit <= MAX_REFERENCE_DIGIT => digit,
        _ => return Err(AssemblerErrorKind::InvalidReferenceDigit(word.to_string())),
    };
    Ok(Token::Reference(Reference { name, digit }))
}

fn validate_name(name: &str, word: &str) -> Result<String, AssemblerErrorKind> {
    if name.is_empty() || parse_number(name).is_some() {
        return Err(AssemblerErrorKind::InvalidLabel(word.to_string()));
    }
    Ok(name.to_string())
}

/// Parses an integer literal the way C's `strtol` with base 0 does: an
/// optional sign, then `0x` hexadecimal, `0` octal or decimal. The whole
/// word has to be consumed, otherwise it is not a number.
pub fn parse_number(word: &str) -> Option<i64> {
    let (negative, unsigned) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word.strip_prefix('+').unwrap_or(word)),
    };
    let (radix, digits) = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        (16, hex)
    } else if unsigned.len() > 1 && unsigned.starts_with('0') {
        (8, unsigned.get(1..)?)
    } else {
        (10, unsigned)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

#[cfg(test)]
mod test;
