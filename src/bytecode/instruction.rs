use std::fmt::{Display, Formatter};

use super::{encode_instruction, Opcode, Scheme, MAX_A, MAX_B, MAX_BX, MAX_C, SBX_BIAS};
use crate::chunk::Constant;
use crate::error::{FormatError, ParseErrorKind};
use crate::operand::Operand;

/// Number of list items a single `SetList` flushes ("fields per flush").
const FIELDS_PER_FLUSH: u32 = 50;

/// Holds the unencoded components of an instruction. There is one variant per operand scheme,
/// named after it, so fields a scheme reserves as zero have nowhere to live.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Instruction {
  /// [B:9][C:9][A:8][OpCode:6]
  ABC { opcode: Opcode, a: u32, b: u32, c: u32 },
  /// [0:9][C:9][A:8][OpCode:6]
  AB0C { opcode: Opcode, a: u32, c: u32 },
  /// [B:9][0:9][A:8][OpCode:6]
  ABC0 { opcode: Opcode, a: u32, b: u32 },
  /// [0:18][A:8][OpCode:6]
  AB0C0 { opcode: Opcode, a: u32 },
  /// [Bx:18][A:8][OpCode:6]
  ABx { opcode: Opcode, a: u32, bx: u32 },
  /// [sBx:18][A:8][OpCode:6]
  AsBx { opcode: Opcode, a: u32, sbx: i32 },
  /// [sBx:18][0:8][OpCode:6]
  A0sBx { opcode: Opcode, sbx: i32 },
}

/// The mnemonic line, e.g. `EQ  0 0 #0`. This is the form the assembler reads back.
impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match *self {
      Instruction::ABC { opcode, a, b, c } => {
        write!(
          f, "{}  {} {} {}",
          opcode, a, field(b, opcode.b_is_rk()), field(c, opcode.c_is_rk())
        )
      }
      Instruction::AB0C { opcode, a, c } => {
        write!(f, "{}  {} {}", opcode, a, field(c, opcode.c_is_rk()))
      }
      Instruction::ABC0 { opcode, a, b } => {
        write!(f, "{}  {} {}", opcode, a, field(b, opcode.b_is_rk()))
      }
      Instruction::AB0C0 { opcode, a } => write!(f, "{}  {}", opcode, a),
      Instruction::ABx { opcode, a, bx } => write!(f, "{}  {} {}", opcode, a, bx),
      Instruction::AsBx { opcode, a, sbx } => write!(f, "{}  {} {}", opcode, a, sbx),
      Instruction::A0sBx { opcode, sbx } => write!(f, "{}  {}", opcode, sbx),
    }
  }
}

/// A `B` or `C` field as written on a mnemonic line: `#k` only where the opcode reads it as RK.
fn field(value: u32, is_rk: bool) -> String {
  match is_rk {
    true => Operand::resolve(value).to_string(),
    false => value.to_string()
  }
}

fn check_range(opcode: Opcode, value: i64, low: i64, high: i64) -> Result<u32, ParseErrorKind> {
  if value < low || value > high {
    return Err(ParseErrorKind::OperandOutOfRange { name: opcode.name(), value });
  }
  Ok(value as u32)
}

fn reg(index: u32) -> String {
  format!("r{}", index)
}

/// Registers `from..to` joined by `separator`.
fn regs(from: u32, to: u32, separator: &str) -> String {
  (from..to).map(reg).collect::<Vec<String>>().join(separator)
}

/// Decodes the "floating point byte" table size hints of `NewTable`. The 9-bit field can
/// encode sizes past `u64`, which give `None`.
fn fb2int(x: u32) -> Option<u64> {
  match x >> 3 {
    0 => Some(u64::from(x)),
    e => (8 + u64::from(x & 7)).checked_mul(1u64.checked_shl(e - 1)?)
  }
}

/// A table size hint, or the raw field as `fb:<x>` when it has no `u64` value.
fn table_size(x: u32) -> String {
  match fb2int(x) {
    Some(size) => size.to_string(),
    None => format!("fb:{}", x)
  }
}

fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) if first.is_ascii_alphabetic() || first == '_' => {
      chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    }
    _ => false
  }
}

impl Instruction {
  pub fn opcode(&self) -> Opcode {
    match *self {
      Instruction::ABC { opcode, .. }
      | Instruction::AB0C { opcode, .. }
      | Instruction::ABC0 { opcode, .. }
      | Instruction::AB0C0 { opcode, .. }
      | Instruction::ABx { opcode, .. }
      | Instruction::AsBx { opcode, .. }
      | Instruction::A0sBx { opcode, .. } => opcode,
    }
  }

  /// Operand `A`, zero for schemes without one.
  pub fn a(&self) -> u32 {
    match *self {
      Instruction::ABC { a, .. }
      | Instruction::AB0C { a, .. }
      | Instruction::ABC0 { a, .. }
      | Instruction::AB0C0 { a, .. }
      | Instruction::ABx { a, .. }
      | Instruction::AsBx { a, .. } => a,
      Instruction::A0sBx { .. } => 0,
    }
  }

  pub fn b(&self) -> u32 {
    match *self {
      Instruction::ABC { b, .. } | Instruction::ABC0 { b, .. } => b,
      _ => 0
    }
  }

  pub fn c(&self) -> u32 {
    match *self {
      Instruction::ABC { c, .. } | Instruction::AB0C { c, .. } => c,
      _ => 0
    }
  }

  pub fn bx(&self) -> u32 {
    match *self {
      Instruction::ABx { bx, .. } => bx,
      _ => 0
    }
  }

  /// The signed displacement of jumps and numeric for loops.
  pub fn sbx(&self) -> Option<i32> {
    match *self {
      Instruction::AsBx { sbx, .. } | Instruction::A0sBx { sbx, .. } => Some(sbx),
      _ => None
    }
  }

  /**
    Builds an instruction from the operand values written on a mnemonic line, where constant
    operands have already had `RK_BIAS` added. Fails if the operand count does not match the
    opcode's scheme or a value does not fit its field.
  */
  pub fn from_operands(opcode: Opcode, operands: &[i64]) -> Result<Instruction, ParseErrorKind> {
    let scheme = opcode.scheme();
    if operands.len() != scheme.arity() {
      return Err(ParseErrorKind::WrongArity {
        name: opcode.name(),
        expected: scheme.arity(),
        given: operands.len()
      });
    }
    let a = |value| check_range(opcode, value, 0, MAX_A as i64);
    let b = |value| check_range(opcode, value, 0, MAX_B as i64);
    let c = |value| check_range(opcode, value, 0, MAX_C as i64);
    let sbx = |value| {
      check_range(opcode, value, -(SBX_BIAS as i64), MAX_BX as i64 - SBX_BIAS as i64)
        .map(|_| value as i32)
    };

    let instruction =
      match scheme {
        Scheme::ABC => Instruction::ABC {
          opcode,
          a: a(operands[0])?,
          b: b(operands[1])?,
          c: c(operands[2])?
        },
        Scheme::AB0C => Instruction::AB0C { opcode, a: a(operands[0])?, c: c(operands[1])? },
        Scheme::ABC0 => Instruction::ABC0 { opcode, a: a(operands[0])?, b: b(operands[1])? },
        Scheme::AB0C0 => Instruction::AB0C0 { opcode, a: a(operands[0])? },
        Scheme::ABx => Instruction::ABx {
          opcode,
          a: a(operands[0])?,
          bx: check_range(opcode, operands[1], 0, MAX_BX as i64)?
        },
        Scheme::AsBx => Instruction::AsBx { opcode, a: a(operands[0])?, sbx: sbx(operands[1])? },
        Scheme::A0sBx => Instruction::A0sBx { opcode, sbx: sbx(operands[0])? },
      };
    Ok(instruction)
  }

  /**
    Checks the operand values that the bit layout alone cannot rule out: flag operands that
    must be 0 or 1, counts that must be positive, and every index into the constant table or
    the list of child functions.
  */
  pub fn check(&self, constants: &[Constant], child_count: usize) -> Result<(), FormatError> {
    let word = encode_instruction(self);
    let opcode = self.opcode();
    let name = opcode.name();
    let bad = |operand: char, value: u32| FormatError::BadOperand { word, name, operand, value };
    let constant = |index: u32| {
      constants.get(index as usize).ok_or(FormatError::ConstantOutOfRange {
        word,
        index,
        count: constants.len()
      })
    };

    match opcode {
      Opcode::LoadBool if self.b() > 1 => return Err(bad('B', self.b())),
      Opcode::LoadBool if self.c() > 1 => return Err(bad('C', self.c())),
      Opcode::Eq | Opcode::Lt | Opcode::Le if self.a() > 1 => return Err(bad('A', self.a())),
      Opcode::Test | Opcode::TestSet if self.c() > 1 => return Err(bad('C', self.c())),
      Opcode::TForLoop | Opcode::SetList if self.c() == 0 => return Err(bad('C', 0)),
      Opcode::LoadK => {
        constant(self.bx())?;
      }
      Opcode::GetGlobal | Opcode::SetGlobal => {
        if constant(self.bx())?.as_str().is_none() {
          return Err(FormatError::ConstantNotString { word, name, index: self.bx() });
        }
      }
      Opcode::Closure if self.bx() as usize >= child_count => return Err(bad('x', self.bx())),
      _ => {}
    }

    for &(is_rk, value) in [(opcode.b_is_rk(), self.b()), (opcode.c_is_rk(), self.c())].iter() {
      if let Some(k) = Operand::resolve(value).constant_index().filter(|_| is_rk) {
        constant(k as u32)?;
      }
    }
    Ok(())
  }

  /// Renders operand `field` as a register or constant literal.
  fn rk(field: u32, constants: &[Constant]) -> String {
    match Operand::resolve(field) {
      Operand::Register(i) => reg(i),
      Operand::Constant(k) => {
        match constants.get(k as usize) {
          Some(constant) => constant.to_string(),
          None => format!("#{}", k)
        }
      }
    }
  }

  /// Renders a table index as `.name` when the key is a plain identifier, or `[key]` otherwise.
  fn index(field: u32, constants: &[Constant]) -> String {
    match Operand::resolve(field) {
      Operand::Constant(k) => {
        match constants.get(k as usize).and_then(Constant::as_str) {
          Some(name) if is_identifier(name) => format!(".{}", name),
          _ => format!("[{}]", Instruction::rk(field, constants))
        }
      }
      Operand::Register(i) => format!("[{}]", reg(i))
    }
  }

  fn global(bx: u32, constants: &[Constant]) -> String {
    match constants.get(bx as usize) {
      Some(Constant::String(name)) if is_identifier(name) => name.to_string(),
      Some(constant) => constant.to_string(),
      None => format!("#{}", bx)
    }
  }

  /**
    A readable, Lua-flavored rendering of what the instruction does, e.g. `r0 = r1.field`.
    This is for the reader only; the assembler ignores it. Constants that are out of range
    render as `#k` instead of failing, since `check` is what rejects them.
  */
  pub fn describe(&self, constants: &[Constant]) -> String {
    let (a, b, c) = (self.a(), self.b(), self.c());
    match self.opcode() {
      Opcode::Move => format!("r{} = r{}", a, b),
      Opcode::LoadK => {
        format!("r{} = {}", a, Instruction::rk(self.bx() + crate::operand::RK_BIAS, constants))
      }
      Opcode::LoadBool => {
        let skip = if c != 0 { ", PC++" } else { "" };
        format!("r{} = {}{}", a, b != 0, skip)
      }
      Opcode::LoadNil => format!("{} = nil", regs(a, b + 1, " = ")),
      Opcode::GetUpval => format!("r{} = UP[{}]", a, b),
      Opcode::GetGlobal => format!("r{} = <{}>", a, Instruction::global(self.bx(), constants)),
      Opcode::GetTable => format!("r{} = r{}{}", a, b, Instruction::index(c, constants)),
      Opcode::SetGlobal => format!("<{}> = r{}", Instruction::global(self.bx(), constants), a),
      Opcode::SetUpval => format!("UP[{}] = r{}", b, a),
      Opcode::SetTable => {
        format!("r{}{} = {}", a, Instruction::index(b, constants), Instruction::rk(c, constants))
      }
      Opcode::NewTable => {
        match (b, c) {
          (0, 0) => format!("r{} = {{}}", a),
          (b, c) => format!("r{} = {{}}  ({}, {})", a, table_size(b), table_size(c))
        }
      }
      Opcode::SelfCall => {
        format!("r{}, r{} = r{}{}, r{}", a, a + 1, b, Instruction::index(c, constants), b)
      }
      Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
        let operator = match self.opcode() {
          Opcode::Add => "+",
          Opcode::Sub => "-",
          Opcode::Mul => "*",
          Opcode::Div => "/",
          Opcode::Mod => "%",
          _ => "^"
        };
        format!(
          "r{} = {} {} {}",
          a, Instruction::rk(b, constants), operator, Instruction::rk(c, constants)
        )
      }
      Opcode::Unm => format!("r{} = -r{}", a, b),
      Opcode::Not => format!("r{} = not r{}", a, b),
      Opcode::Len => format!("r{} = #r{}", a, b),
      Opcode::Concat => format!("r{} = {}", a, regs(b, c + 1, " .. ")),
      Opcode::Jmp => format!("PC += {}", self.sbx().unwrap_or(0)),
      Opcode::Eq | Opcode::Lt | Opcode::Le => {
        let operator = match (self.opcode(), a) {
          (Opcode::Eq, 0) => "==",
          (Opcode::Eq, _) => "!=",
          (Opcode::Lt, 0) => "<",
          (Opcode::Lt, _) => ">=",
          (_, 0) => "<=",
          _ => ">"
        };
        format!(
          "IF {} {} {}:  PC++",
          Instruction::rk(b, constants), operator, Instruction::rk(c, constants)
        )
      }
      Opcode::Test => format!("IF{} r{}:  PC++", if c != 0 { " not" } else { "" }, a),
      Opcode::TestSet => {
        format!("IF{} r{}:  PC++  else  r{} = r{}", if c != 0 { " not" } else { "" }, b, a, b)
      }
      Opcode::Call => {
        let results = match c {
          0 => format!("r{}...", a),
          1 => "_".to_string(),
          c => regs(a, a + c - 1, ", ")
        };
        let arguments = match b {
          0 => format!("r{}...", a + 1),
          b => regs(a + 1, a + b, ", ")
        };
        format!("{} = r{}({})", results, a, arguments)
      }
      Opcode::TailCall => {
        let arguments = match b {
          0 => format!("r{}...", a + 1),
          b => regs(a + 1, a + b, ", ")
        };
        format!("return r{}({})", a, arguments)
      }
      Opcode::Return => {
        match b {
          0 => format!("return r{}...", a),
          1 => "return".to_string(),
          b => format!("return {}", regs(a, a + b - 1, ", "))
        }
      }
      Opcode::ForLoop => {
        format!(
          "FORend r{} += r{},  IF r{} <?= r{}: {{ PC += {}, r{} = r{} }}",
          a, a + 2, a, a + 1, self.sbx().unwrap_or(0), a + 3, a
        )
      }
      Opcode::ForPrep => {
        format!("FORstart r{} -= r{},  PC += {}", a, a + 2, self.sbx().unwrap_or(0))
      }
      Opcode::TForLoop => {
        format!(
          "TFORloop {} = r{}(r{}, r{}),  IF r{} != nil:  r{} = r{}  else  PC++",
          regs(a + 3, a + 3 + c, ", "), a, a + 1, a + 2, a + 3, a + 2, a + 3
        )
      }
      Opcode::SetList => {
        let first = FIELDS_PER_FLUSH * c.saturating_sub(1);
        match b {
          0 => format!("r{}[{}...] = r{}...", a, first + 1, a + 1),
          b => format!("r{}[{}..{}] = r{}..r{}", a, first + 1, first + b, a + 1, a + b)
        }
      }
      Opcode::Close => format!("CLOSE r{}+", a),
      Opcode::Closure => format!("r{} = closure(KPROTO[{}], r{}, ...)", a, self.bx(), a),
      Opcode::VarArg => {
        match b {
          0 => format!("r{}... = ...", a),
          1 => "_ = ...".to_string(),
          b => format!("{} = ...", regs(a, a + b - 1, ", "))
        }
      }
    }
  }
}
