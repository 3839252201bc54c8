/*!
  The human readable textual form of bytecode is called assembly. This module parses the
  listing written by `crate::listing` back into a `Chunk`. The grammar is line oriented:

    FUNC [<n>: <path>] (<line>, <lastline>, <nups>, <nparams>, <flags>, <maxstack>) ;; ...
    SOURCE "<name>"
    CONST <index> <literal>
    <anything> ; <Mnemonic> <operands>
    LINES <line>*
    LOCAL "<name>" <startpc> <endpc>
    UPVALUE "<name>"
    FUNCS_NUM: <n>

  Blank lines and lines starting with `#` are skipped. On an instruction line only the text
  after the last ` ; ` is read, so indices, goto tags, indentation and the readable form are
  free to change. The mnemonic names come from the `strum` derives on `Opcode`.

  Each function ends with its `FUNCS_NUM` marker, after which exactly that many `FUNC` blocks
  follow as its children. The open functions are kept on a stack, and a function is closed
  as soon as its last child is.
*/

use std::convert::TryFrom;
use std::str::FromStr;

use nom::{
  branch::alt,
  bytes::complete::{is_not, tag, take_while1},
  character::complete::{char as one_char, digit1, space0, space1},
  combinator::{all_consuming, map, map_res, opt, recognize, rest},
  error::ErrorKind,
  multi::{many0, separated_list},
  sequence::{delimited, pair, preceded, terminated, tuple},
  IResult
};
use tracing::debug;

use super::{encode_instruction, Instruction, Opcode};
use crate::chunk::{Chunk, Constant, DebugInfo, Local, Prototype, SENTINEL};
use crate::error::{ParseError, ParseErrorKind};
use crate::operand::Operand;

/// One meaningful line of a listing.
#[derive(Clone, Debug, PartialEq)]
enum Statement<'a> {
  Function([u32; 6]),
  Source(String),
  /// The literal text, evaluated when the statement is applied.
  Constant(&'a str),
  Operation(&'a str, Vec<i64>),
  Lines(Vec<u32>),
  Local(Local),
  Upvalue(String),
  Children(u32),
}

impl<'a> Statement<'a> {
  fn name(&self) -> &'static str {
    match self {
      Statement::Function(_) => "FUNC",
      Statement::Source(_) => "SOURCE",
      Statement::Constant(_) => "CONST",
      Statement::Operation(..) => "instruction",
      Statement::Lines(_) => "LINES",
      Statement::Local(_) => "LOCAL",
      Statement::Upvalue(_) => "UPVALUE",
      Statement::Children(_) => "FUNCS_NUM",
    }
  }
}

// region Line parsers

fn number(input: &str) -> IResult<&str, u32> {
  map_res(digit1, u32::from_str)(input)
}

/// Resolves the escapes `\\ \" \' \n \r \t \0 \u{hex}`, returning the character and the rest.
fn escape(input: &str) -> Option<(char, &str)> {
  let mut chars = input.chars();
  let ch =
    match chars.next()? {
      'n' => '\n',
      'r' => '\r',
      't' => '\t',
      '0' => '\0',
      '\\' => '\\',
      '"' => '"',
      '\'' => '\'',
      'u' => {
        let braced = chars.as_str().strip_prefix('{')?;
        let close = braced.find('}')?;
        let ch = u32::from_str_radix(&braced[..close], 16).ok().and_then(std::char::from_u32)?;
        return Some((ch, &braced[close + 1..]));
      }
      _ => return None
    };
  Some((ch, chars.as_str()))
}

/// A double quoted string with the escapes Rust's `Debug` produces.
fn string_literal(input: &str) -> IResult<&str, String> {
  let failure = || nom::Err::Error((input, ErrorKind::Escaped));
  let mut remaining = match input.strip_prefix('"') {
    Some(remaining) => remaining,
    None => return Err(nom::Err::Error((input, ErrorKind::Char)))
  };
  let mut text = String::new();
  loop {
    let mut chars = remaining.chars();
    match chars.next() {
      None => return Err(failure()),
      Some('"') => return Ok((chars.as_str(), text)),
      Some('\\') => {
        let (ch, after) = escape(chars.as_str()).ok_or_else(failure)?;
        text.push(ch);
        remaining = after;
      }
      Some(ch) => {
        text.push(ch);
        remaining = chars.as_str();
      }
    }
  }
}

fn function(input: &str) -> IResult<&str, Statement<'_>> {
  let fields = separated_list(tuple((space0, one_char(','), space0)), number);
  let (input, (_, _, _, _, header, _)) = tuple((
    tag("FUNC"),
    space1,
    delimited(one_char('['), is_not("]"), one_char(']')),
    space0,
    delimited(one_char('('), fields, one_char(')')),
    rest
  ))(input)?;
  match <[u32; 6]>::try_from(&header[..]) {
    Ok(header) => Ok((input, Statement::Function(header))),
    Err(_) => Err(nom::Err::Error((input, ErrorKind::Count)))
  }
}

fn source(input: &str) -> IResult<&str, Statement<'_>> {
  map(preceded(pair(tag("SOURCE"), space1), string_literal), Statement::Source)(input)
}

fn constant(input: &str) -> IResult<&str, Statement<'_>> {
  map(
    preceded(tuple((tag("CONST"), space1, digit1, space1)), rest),
    |text: &str| Statement::Constant(text.trim_end())
  )(input)
}

fn line_table(input: &str) -> IResult<&str, Statement<'_>> {
  map(preceded(tag("LINES"), many0(preceded(space1, number))), Statement::Lines)(input)
}

fn local(input: &str) -> IResult<&str, Statement<'_>> {
  map(
    tuple((tag("LOCAL"), space1, string_literal, space1, number, space1, number)),
    |(_, _, name, _, start_pc, _, end_pc)| Statement::Local(Local { name, start_pc, end_pc })
  )(input)
}

fn upvalue(input: &str) -> IResult<&str, Statement<'_>> {
  map(preceded(pair(tag("UPVALUE"), space1), string_literal), Statement::Upvalue)(input)
}

fn children(input: &str) -> IResult<&str, Statement<'_>> {
  map(preceded(pair(tag("FUNCS_NUM:"), space0), number), Statement::Children)(input)
}

fn directive(input: &str) -> IResult<&str, Statement<'_>> {
  alt((children, function, source, constant, line_table, local, upvalue))(input)
}

/// An operand as written in a mnemonic: a signed integer, or `#k` for constant `k`.
fn operand(input: &str) -> IResult<&str, i64> {
  alt((
    map_res(preceded(one_char('#'), digit1), |digits: &str| {
      digits.parse::<u16>().map(|k| i64::from(Operand::Constant(u32::from(k)).field()))
    }),
    map_res(recognize(pair(opt(one_char('-')), digit1)), i64::from_str)
  ))(input)
}

fn mnemonic(input: &str) -> IResult<&str, Statement<'_>> {
  map(
    terminated(
      pair(take_while1(|ch: char| ch.is_ascii_alphabetic()), many0(preceded(space1, operand))),
      space0
    ),
    |(name, operands)| Statement::Operation(name, operands)
  )(input)
}

/// Classifies one line. `Ok(None)` is a blank line or a comment.
fn statement(line: &str) -> Result<Option<Statement<'_>>, ParseErrorKind> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return Ok(None);
  }
  if let Ok((_, statement)) = all_consuming(terminated(directive, space0))(trimmed) {
    return Ok(Some(statement));
  }
  let operation = match trimmed.rfind(" ; ") {
    Some(at) => Some(&trimmed[at + 3..]),
    None => trimmed.strip_prefix("; ")
  };
  match operation.map(|text| all_consuming(mnemonic)(text.trim_start())) {
    Some(Ok((_, statement))) => Ok(Some(statement)),
    _ => Err(ParseErrorKind::Syntax(trimmed.to_string()))
  }
}

/// Evaluates a `CONST` literal. Numbers use the syntax Rust prints them with, including `inf`
/// and `NaN`. A NaN other than the canonical one is written with its bits, `NaN:0x<hex>`.
fn constant_literal(text: &str) -> Result<Constant, ParseErrorKind> {
  let bad = || ParseErrorKind::BadConstant(text.to_string());
  match text {
    "nil" => Ok(Constant::Nil),
    "true" => Ok(Constant::Boolean(true)),
    "false" => Ok(Constant::Boolean(false)),
    _ if text.starts_with('"') => {
      match all_consuming(string_literal)(text) {
        Ok((_, s)) => Ok(Constant::String(s)),
        Err(_) => Err(bad())
      }
    }
    _ => {
      match text.strip_prefix("NaN:0x") {
        Some(hex) => {
          match u64::from_str_radix(hex, 16).map(f64::from_bits) {
            Ok(n) if n.is_nan() => Ok(Constant::Number(n)),
            _ => Err(bad())
          }
        }
        None => text.parse::<f64>().map(Constant::Number).map_err(|_| bad())
      }
    }
  }
}

// endregion

// region Tree building

/// A function whose `FUNC` line has been read but which is not closed yet.
struct Frame {
  prototype: Prototype,
  /// Set by `FUNCS_NUM`. After that only child functions may follow.
  children: Option<u32>,
}

#[derive(Default)]
struct Builder {
  stack: Vec<Frame>,
  root: Option<Prototype>,
}

impl Builder {
  fn apply(&mut self, statement: Statement) -> Result<(), ParseErrorKind> {
    match statement {
      Statement::Function(header) => self.open(header),
      Statement::Children(count) => {
        let frame = self.body("FUNCS_NUM")?;
        frame.children = Some(count);
        self.settle();
        Ok(())
      }
      statement => {
        let prototype = &mut self.body(statement.name())?.prototype;
        match statement {
          Statement::Source(name) => prototype.source = Some(name),
          Statement::Constant(text) => prototype.constants.push(constant_literal(text)?),
          Statement::Operation(name, operands) => {
            let opcode = Opcode::from_str(name)
              .map_err(|_| ParseErrorKind::NotAnOperation(name.to_string()))?;
            let instruction = Instruction::from_operands(opcode, &operands)?;
            prototype.code.push(encode_instruction(&instruction));
          }
          Statement::Lines(lines) => prototype.debug.line_info.extend(lines),
          Statement::Local(local) => prototype.debug.locals.push(local),
          Statement::Upvalue(name) => prototype.debug.upvalue_names.push(name),
          Statement::Function(_) | Statement::Children(_) => {
            unreachable!("Error: nesting statements are handled above")
          }
        }
        Ok(())
      }
    }
  }

  /// The innermost open function, which must not have seen its `FUNCS_NUM` yet.
  fn body(&mut self, name: &'static str) -> Result<&mut Frame, ParseErrorKind> {
    match self.stack.last_mut() {
      None => Err(ParseErrorKind::OutsideFunction(name)),
      Some(frame) if frame.children.is_some() => Err(ParseErrorKind::AfterNestingMarker(name)),
      Some(frame) => Ok(frame)
    }
  }

  fn open(&mut self, header: [u32; 6]) -> Result<(), ParseErrorKind> {
    match self.stack.last() {
      None if self.root.is_some() => return Err(ParseErrorKind::UnexpectedFunction),
      Some(Frame { children: None, .. }) => return Err(ParseErrorKind::MissingNestingMarker),
      // An open parent always has room: `settle` closes it once it is full.
      _ => {}
    }
    let byte = |value: u32| u8::try_from(value).map_err(|_| ParseErrorKind::HeaderOutOfRange { value });
    let [line_defined, last_line_defined, upvalues, parameters, flags, max_stack] = header;
    let prototype = Prototype {
      source: None,
      line_defined,
      last_line_defined,
      upvalue_count: byte(upvalues)?,
      parameter_count: byte(parameters)?,
      vararg_flags: byte(flags)?,
      max_stack_size: byte(max_stack)?,
      code: Vec::new(),
      constants: Vec::new(),
      children: Vec::new(),
      debug: DebugInfo::default()
    };
    self.stack.push(Frame { prototype, children: None });
    Ok(())
  }

  /// Closes every function on top of the stack that has all of its children.
  fn settle(&mut self) {
    loop {
      let complete = match self.stack.last() {
        Some(frame) => frame.children == Some(frame.prototype.children.len() as u32),
        None => false
      };
      if !complete {
        break;
      }
      let mut prototype = match self.stack.pop() {
        Some(frame) => frame.prototype,
        None => unreachable!("Error: closing a function with an empty stack")
      };
      if prototype.code.last() != Some(&SENTINEL) {
        prototype.code.push(SENTINEL);
      }
      debug!(
        depth = self.stack.len(),
        instructions = prototype.code.len(),
        constants = prototype.constants.len(),
        children = prototype.children.len(),
        "assembled function"
      );
      match self.stack.last_mut() {
        Some(parent) => parent.prototype.children.push(prototype),
        None => self.root = Some(prototype)
      }
    }
  }

  fn finish(self) -> Result<Chunk, ParseErrorKind> {
    match self.stack.last() {
      Some(Frame { children: None, .. }) => Err(ParseErrorKind::MissingNestingMarker),
      Some(Frame { children: Some(count), prototype }) => {
        Err(ParseErrorKind::MissingChildren(count - prototype.children.len() as u32))
      }
      None => self.root.map(|main| Chunk { main }).ok_or(ParseErrorKind::Empty)
    }
  }
}

// endregion

/// Parses a complete listing into a chunk. Every function gets the trailing `Return 0 1 0` if
/// its listing does not end with it.
pub fn parse_assembly(text: &str) -> Result<Chunk, ParseError> {
  let mut builder = Builder::default();
  let mut line_count = 0;
  for (index, line) in text.lines().enumerate() {
    line_count = index + 1;
    let at_line = |kind| ParseError { line: index + 1, kind };
    if let Some(statement) = statement(line).map_err(at_line)? {
      builder.apply(statement).map_err(at_line)?;
    }
  }
  builder.finish().map_err(|kind| ParseError { line: line_count, kind })
}
