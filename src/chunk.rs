/*!
  The binary envelope of a Lua 5.1 chunk. A chunk is a fixed 12 byte header followed by exactly
  one function prototype. All integers are 32 bit little-endian and all numbers are 64 bit
  IEEE-754 floats. The layout of a prototype is:

    source name        string
    line defined       u32
    last line defined  u32
    upvalue count      u8
    parameter count    u8
    vararg flags       u8
    max stack size     u8
    code               u32 count, then u32 words
    constants          u32 count, then tagged records
    children           u32 count, then prototypes
    line info          u32 count, then u32s
    locals             u32 count, then (string, u32, u32)
    upvalue names      u32 count, then strings

  Note that the debug tables of a prototype follow all of its children.

  A string is a u32 length that counts a mandatory trailing NUL, then the bytes, then the NUL.
  A length of zero means the string is absent, which is not the same as empty.

  This module knows nothing about what the instructions mean.
*/

use std::io::{self, Cursor, Read, Write};
use std::fmt::{Display, Formatter};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::error::FormatError;

pub const HEADER: [u8; 12] = [0x1B, b'L', b'u', b'a', b'Q', 0x00, 0x01, 0x04, 0x04, 0x04, 0x08, 0x00];

/// `Return 0 1 0`, which every function's code ends with.
pub const SENTINEL: u32 = 0x0080_001E;

/// Prototypes nested deeper than this are rejected rather than recursed into.
pub const MAX_DEPTH: usize = 200;

// Constant record tags
const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
  Nil,
  Boolean(bool),
  Number(f64),
  String(String)
}

impl Constant {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Constant::String(s) => Some(s),
      _ => None
    }
  }

  /// Size of the constant record in bytes.
  pub fn encoded_len(&self) -> usize {
    match self {
      Constant::Nil => 1,
      Constant::Boolean(_) => 2,
      Constant::Number(_) => 9,
      Constant::String(s) => 1 + string_len(Some(s))
    }
  }
}

impl Display for Constant {
  /// The literal form, which the assembly parser reads back.
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Constant::Nil => write!(f, "nil"),
      Constant::Boolean(b) => write!(f, "{}", b),
      Constant::Number(n) if n.is_nan() && n.to_bits() != f64::NAN.to_bits() => {
        write!(f, "NaN:{:#018x}", n.to_bits())
      }
      Constant::Number(n) => write!(f, "{:?}", n),
      Constant::String(s) => write!(f, "{:?}", s)
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Local {
  pub name: String,
  pub start_pc: u32,
  pub end_pc: u32
}

/// The optional debug tables. Stripped chunks have all three empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugInfo {
  pub line_info: Vec<u32>,
  pub locals: Vec<Local>,
  pub upvalue_names: Vec<String>
}

impl DebugInfo {
  pub fn is_empty(&self) -> bool {
    self.line_info.is_empty() && self.locals.is_empty() && self.upvalue_names.is_empty()
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prototype {
  pub source: Option<String>,
  pub line_defined: u32,
  pub last_line_defined: u32,
  pub upvalue_count: u8,
  pub parameter_count: u8,
  pub vararg_flags: u8,
  pub max_stack_size: u8,
  pub code: Vec<u32>,
  pub constants: Vec<Constant>,
  pub children: Vec<Prototype>,
  pub debug: DebugInfo
}

impl Prototype {
  /// Offset of the first instruction word, given the offset the prototype starts at.
  pub fn code_offset(&self, start: usize) -> usize {
    start + string_len(self.source.as_deref()) + 12 + 4
  }

  /// Offset of the first child prototype, given the offset the prototype starts at.
  pub fn children_offset(&self, start: usize) -> usize {
    self.code_offset(start)
      + 4 * self.code.len()
      + 4 + self.constants.iter().map(Constant::encoded_len).sum::<usize>()
      + 4
  }

  /// Total size of the prototype in bytes, children and debug tables included.
  pub fn encoded_len(&self) -> usize {
    self.children_offset(0)
      + self.children.iter().map(Prototype::encoded_len).sum::<usize>()
      + 4 + 4 * self.debug.line_info.len()
      + 4 + self.debug.locals.iter().map(|l| string_len(Some(&l.name)) + 8).sum::<usize>()
      + 4 + self.debug.upvalue_names.iter().map(|u| string_len(Some(u))).sum::<usize>()
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
  pub main: Prototype
}

/// Size in bytes of an encoded string, length prefix included.
pub fn string_len(s: Option<&str>) -> usize {
  match s {
    Some(s) => 4 + s.len() + 1,
    None => 4
  }
}

// region Decoding

struct Reader<'a> {
  cursor: Cursor<&'a [u8]>
}

impl<'a> Reader<'a> {
  fn offset(&self) -> usize {
    self.cursor.position() as usize
  }

  fn remaining(&self) -> usize {
    self.cursor.get_ref().len().saturating_sub(self.offset())
  }

  fn truncated<T>(&self, result: io::Result<T>) -> Result<T, FormatError> {
    result.map_err(|_| FormatError::Truncated { offset: self.offset() })
  }

  fn byte(&mut self) -> Result<u8, FormatError> {
    let result = self.cursor.read_u8();
    self.truncated(result)
  }

  fn int(&mut self) -> Result<u32, FormatError> {
    let result = self.cursor.read_u32::<LittleEndian>();
    self.truncated(result)
  }

  fn number(&mut self) -> Result<f64, FormatError> {
    let result = self.cursor.read_f64::<LittleEndian>();
    self.truncated(result)
  }

  fn string(&mut self) -> Result<Option<String>, FormatError> {
    let length = self.int()? as usize;
    if length == 0 {
      return Ok(None);
    }
    if length > self.remaining() {
      return Err(FormatError::Truncated { offset: self.offset() + self.remaining() });
    }
    let mut bytes = vec![0u8; length];
    let result = self.cursor.read_exact(&mut bytes);
    self.truncated(result)?;
    match bytes.pop() {
      Some(0) => Ok(Some(String::from_utf8(bytes)?)),
      _ => Err(FormatError::UnterminatedString)
    }
  }

  fn present_string(&mut self) -> Result<String, FormatError> {
    self.string()?.ok_or(FormatError::AbsentString)
  }

  /// Reads `count` items, without trusting `count` for preallocation.
  fn list<T, F>(&mut self, mut item: F) -> Result<Vec<T>, FormatError>
    where F: FnMut(&mut Self) -> Result<T, FormatError>
  {
    let count = self.int()?;
    let mut items = Vec::with_capacity((count as usize).min(self.remaining()));
    for _ in 0..count {
      items.push(item(self)?);
    }
    Ok(items)
  }

  fn constant(&mut self) -> Result<Constant, FormatError> {
    match self.byte()? {
      TAG_NIL => Ok(Constant::Nil),
      TAG_BOOLEAN => match self.byte()? {
        0 => Ok(Constant::Boolean(false)),
        1 => Ok(Constant::Boolean(true)),
        other => Err(FormatError::BadBoolean(other))
      },
      TAG_NUMBER => Ok(Constant::Number(self.number()?)),
      TAG_STRING => Ok(Constant::String(self.present_string()?)),
      other => Err(FormatError::UnknownConstantTag(other))
    }
  }

  fn prototype(&mut self, depth: usize) -> Result<Prototype, FormatError> {
    if depth > MAX_DEPTH {
      return Err(FormatError::TooDeep(MAX_DEPTH));
    }
    let source = self.string()?;
    let line_defined = self.int()?;
    let last_line_defined = self.int()?;
    let upvalue_count = self.byte()?;
    let parameter_count = self.byte()?;
    let vararg_flags = self.byte()?;
    let max_stack_size = self.byte()?;

    let code = self.list(Reader::int)?;
    match code.last() {
      None => return Err(FormatError::EmptyCode),
      Some(&last) if last != SENTINEL => return Err(FormatError::MissingSentinel { last }),
      _ => {}
    }
    let constants = self.list(Reader::constant)?;
    let children = self.list(|reader| reader.prototype(depth + 1))?;

    let line_info = self.list(Reader::int)?;
    let locals = self.list(|reader| {
      Ok(Local {
        name: reader.present_string()?,
        start_pc: reader.int()?,
        end_pc: reader.int()?
      })
    })?;
    let upvalue_names = self.list(Reader::present_string)?;

    debug!(
      depth,
      instructions = code.len(),
      constants = constants.len(),
      children = children.len(),
      "decoded function"
    );

    Ok(Prototype {
      source,
      line_defined,
      last_line_defined,
      upvalue_count,
      parameter_count,
      vararg_flags,
      max_stack_size,
      code,
      constants,
      children,
      debug: DebugInfo { line_info, locals, upvalue_names }
    })
  }
}

/// Parses a complete binary chunk.
pub fn decode(bytes: &[u8]) -> Result<Chunk, FormatError> {
  if bytes.len() < HEADER.len() || bytes[..HEADER.len()] != HEADER {
    let seen = bytes.iter().take(HEADER.len()).copied().collect();
    return Err(FormatError::BadHeader(seen));
  }
  let mut reader = Reader { cursor: Cursor::new(bytes) };
  reader.cursor.set_position(HEADER.len() as u64);
  let main = reader.prototype(0)?;
  match reader.remaining() {
    0 => Ok(Chunk { main }),
    count => Err(FormatError::TrailingBytes { count })
  }
}

// endregion

// region Encoding

fn write_string<W: Write>(out: &mut W, s: Option<&str>) -> io::Result<()> {
  match s {
    None => out.write_u32::<LittleEndian>(0),
    Some(s) => {
      out.write_u32::<LittleEndian>(s.len() as u32 + 1)?;
      out.write_all(s.as_bytes())?;
      out.write_u8(0)
    }
  }
}

fn write_constant<W: Write>(out: &mut W, constant: &Constant) -> io::Result<()> {
  match constant {
    Constant::Nil => out.write_u8(TAG_NIL),
    Constant::Boolean(b) => {
      out.write_u8(TAG_BOOLEAN)?;
      out.write_u8(*b as u8)
    }
    Constant::Number(n) => {
      out.write_u8(TAG_NUMBER)?;
      out.write_f64::<LittleEndian>(*n)
    }
    Constant::String(s) => {
      out.write_u8(TAG_STRING)?;
      write_string(out, Some(s))
    }
  }
}

fn write_prototype<W: Write>(out: &mut W, proto: &Prototype) -> io::Result<()> {
  write_string(out, proto.source.as_deref())?;
  out.write_u32::<LittleEndian>(proto.line_defined)?;
  out.write_u32::<LittleEndian>(proto.last_line_defined)?;
  out.write_all(&[
    proto.upvalue_count,
    proto.parameter_count,
    proto.vararg_flags,
    proto.max_stack_size
  ])?;

  out.write_u32::<LittleEndian>(proto.code.len() as u32)?;
  for word in &proto.code {
    out.write_u32::<LittleEndian>(*word)?;
  }
  out.write_u32::<LittleEndian>(proto.constants.len() as u32)?;
  for constant in &proto.constants {
    write_constant(out, constant)?;
  }
  out.write_u32::<LittleEndian>(proto.children.len() as u32)?;
  for child in &proto.children {
    write_prototype(out, child)?;
  }

  out.write_u32::<LittleEndian>(proto.debug.line_info.len() as u32)?;
  for line in &proto.debug.line_info {
    out.write_u32::<LittleEndian>(*line)?;
  }
  out.write_u32::<LittleEndian>(proto.debug.locals.len() as u32)?;
  for local in &proto.debug.locals {
    write_string(out, Some(&local.name))?;
    out.write_u32::<LittleEndian>(local.start_pc)?;
    out.write_u32::<LittleEndian>(local.end_pc)?;
  }
  out.write_u32::<LittleEndian>(proto.debug.upvalue_names.len() as u32)?;
  for name in &proto.debug.upvalue_names {
    write_string(out, Some(name))?;
  }
  Ok(())
}

/// Writes the chunk to any byte sink.
pub fn write_chunk<W: Write>(out: &mut W, chunk: &Chunk) -> io::Result<()> {
  out.write_all(&HEADER)?;
  write_prototype(out, &chunk.main)
}

/// Serializes the chunk into a fresh buffer.
pub fn encode(chunk: &Chunk) -> Vec<u8> {
  let mut bytes = Vec::with_capacity(HEADER.len() + chunk.main.encoded_len());
  match write_chunk(&mut bytes, chunk) {
    Ok(()) => bytes,
    Err(e) => unreachable!("Error: writing a chunk to memory failed: {}", e)
  }
}

// endregion
