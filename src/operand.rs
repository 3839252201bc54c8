//! An `Either` type that holds a register index or a constant index, with some convenience
//! functions for the "RK" operand convention.

use std::fmt::{Display, Formatter};

/// Operand fields at or above this value index the constant table.
pub const RK_BIAS: u32 = 256;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Operand {
  /// An index into the function's register window.
  Register(u32),
  /// An index into the function's constant table.
  Constant(u32)
}

impl Operand {
  /// Resolves a raw RK field. Values below `RK_BIAS` are registers, the rest are constants.
  pub fn resolve(field: u32) -> Operand {
    match field {
      value if value < RK_BIAS => Operand::Register(value),
      value => Operand::Constant(value - RK_BIAS)
    }
  }

  /// The raw field value this operand encodes to.
  pub fn field(&self) -> u32 {
    match self {
      Operand::Register(i) => *i,
      Operand::Constant(k) => *k + RK_BIAS
    }
  }

  pub fn constant_index(&self) -> Option<usize> {
    match self {
      Operand::Constant(k) => Some(*k as usize),
      _ => None
    }
  }
}

impl Display for Operand {
  /// The form used on mnemonic lines: a bare register number, or `#k` for constants.
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Operand::Register(i) => write!(f, "{}", i),
      Operand::Constant(k) => write!(f, "#{}", k)
    }
  }
}
