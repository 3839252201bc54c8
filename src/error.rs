//! Error kinds. Anything derived from untrusted input (a binary chunk or an assembly listing)
//! surfaces as one of the three error types below. States the algorithms themselves should
//! never reach are `unreachable!` instead.

use std::io;
use thiserror::Error;

/// The binary chunk does not match the fixed Lua 5.1 layout.
#[derive(Error, Debug)]
pub enum FormatError {
  #[error("bad chunk header: {0:02x?}")]
  BadHeader(Vec<u8>),

  #[error("unexpected end of chunk at offset {offset}")]
  Truncated { offset: usize },

  #[error("{count} trailing bytes after the root function")]
  TrailingBytes { count: usize },

  #[error("function code does not end with `Return 0 1 0` (last word {last:#010x})")]
  MissingSentinel { last: u32 },

  #[error("function code is empty")]
  EmptyCode,

  #[error("unknown constant tag {0}")]
  UnknownConstantTag(u8),

  #[error("boolean constant has value {0}, expected 0 or 1")]
  BadBoolean(u8),

  #[error("string constant is absent (zero length)")]
  AbsentString,

  #[error("string is not NUL terminated")]
  UnterminatedString,

  #[error("string is not valid UTF-8: {0}")]
  InvalidUtf8(#[from] std::string::FromUtf8Error),

  #[error("functions nested deeper than {0} levels")]
  TooDeep(usize),

  #[error("instruction {word:#010x}: opcode {opcode} is out of range")]
  UnknownOpcode { word: u32, opcode: u32 },

  #[error("instruction {word:#010x}: operand {operand} of {name} must be zero, found {value}")]
  NonZeroOperand { word: u32, name: &'static str, operand: char, value: u32 },

  #[error("instruction {word:#010x}: operand {operand} of {name} has invalid value {value}")]
  BadOperand { word: u32, name: &'static str, operand: char, value: u32 },

  #[error("instruction {word:#010x}: constant #{index} is out of range ({count} constants)")]
  ConstantOutOfRange { word: u32, index: u32, count: usize },

  #[error("instruction {word:#010x}: constant #{index} of {name} must be a string")]
  ConstantNotString { word: u32, name: &'static str, index: u32 },

  #[error("instruction {index}: jump target {target} lies outside the function")]
  TargetOutOfRange { index: usize, target: i64 },

  #[error("numeric for at {prep} targets {target}, which is not a matching ForLoop")]
  UnpairedForPrep { prep: usize, target: usize },

  #[error("ForLoop at {index} loops back to {target}, not to the instruction after its ForPrep")]
  UnpairedForLoop { index: usize, target: usize },
}

/// A jump pattern does not match any structured-control template.
#[derive(Error, Debug)]
pub enum ControlFlowError {
  #[error("TForLoop at {index} is not followed by a backward jump")]
  TForWithoutLoopJump { index: usize },

  #[error("TForLoop at {index} is not entered by a forward jump at {entry}")]
  TForWithoutEntryJump { index: usize, entry: i64 },

  #[error("conditional at {index} is not followed by a jump")]
  ConditionWithoutJump { index: usize },

  #[error("conditional at {index} skips to a jump that goes backward to {target}")]
  BackwardConditionalJump { index: usize, target: usize },

  #[error("{kind} at {index} was left unclassified")]
  Unclassified { kind: &'static str, index: usize },
}

/// The assembly text does not match the listing grammar.
#[derive(Error, Debug)]
#[error("line {line}: {kind}")]
pub struct ParseError {
  pub line: usize,
  pub kind: ParseErrorKind,
}

#[derive(Error, Debug)]
pub enum ParseErrorKind {
  #[error("unrecognised syntax: {0:?}")]
  Syntax(String),

  #[error("{0} is not an operation")]
  NotAnOperation(String),

  #[error("{name} requires {expected} operands but was given {given}")]
  WrongArity { name: &'static str, expected: usize, given: usize },

  #[error("operand {value} of {name} is out of range")]
  OperandOutOfRange { name: &'static str, value: i64 },

  #[error("bad constant literal: {0:?}")]
  BadConstant(String),

  #[error("header field {value} does not fit in a byte")]
  HeaderOutOfRange { value: u32 },

  #[error("{0} appears outside of a function")]
  OutsideFunction(&'static str),

  #[error("{0} appears after the function's FUNCS_NUM marker")]
  AfterNestingMarker(&'static str),

  #[error("function is missing its FUNCS_NUM marker")]
  MissingNestingMarker,

  #[error("{0} declared child functions were never supplied")]
  MissingChildren(u32),

  #[error("unexpected FUNC: no function is waiting for children")]
  UnexpectedFunction,

  #[error("no function found")]
  Empty,
}

/// Any failure of the two collaborator entry points.
#[derive(Error, Debug)]
pub enum Error {
  #[error("format error: {0}")]
  Format(#[from] FormatError),

  #[error("control flow error: {0}")]
  ControlFlow(#[from] ControlFlowError),

  #[error("parse error: {0}")]
  Parse(#[from] ParseError),

  #[error("IO error: {0}")]
  Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
