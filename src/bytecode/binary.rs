/*!
  This module is responsible for the encoding and decoding of binary instructions. It only
  looks at bit fields. Checks that need the constant table live in `Instruction::check`.
*/
use std::convert::TryFrom;

use super::{Instruction, Opcode, Scheme};
use crate::error::FormatError;

// If you change these you must also change `encode_instruction` and `decode_instruction`.
const OPCODE_MASK: u32 = 0x3F;
const A_SHIFT: u32 = 6;
const C_SHIFT: u32 = 14;
const B_SHIFT: u32 = 23;
const BX_SHIFT: u32 = 14;

pub const MAX_A: u32 = 0xFF;
pub const MAX_B: u32 = 0x1FF;
pub const MAX_C: u32 = 0x1FF;
pub const MAX_BX: u32 = 0x3FFFF;
pub const SBX_BIAS: i32 = 131071;

/// Decomposes a word into its raw fields. All of them are extracted; the scheme decides
/// which are meaningful.
struct Fields {
  a: u32,
  b: u32,
  c: u32,
  bx: u32,
}

impl Fields {
  fn of(word: u32) -> Fields {
    Fields {
      a: (word >> A_SHIFT) & MAX_A,
      c: (word >> C_SHIFT) & MAX_C,
      b: (word >> B_SHIFT) & MAX_B,
      bx: word >> BX_SHIFT,
    }
  }
}

fn require_zero(word: u32, opcode: Opcode, operand: char, value: u32) -> Result<(), FormatError> {
  match value {
    0 => Ok(()),
    value => Err(FormatError::NonZeroOperand { word, name: opcode.name(), operand, value })
  }
}

/// Splits a word into its opcode and the operands its scheme defines. Fails if the opcode is
/// outside the catalogue or a field the scheme reserves is nonzero.
pub fn decode_instruction(word: u32) -> Result<Instruction, FormatError> {
  let opcode = match Opcode::try_from((word & OPCODE_MASK) as u8) {
    Ok(opcode) => opcode,
    Err(_) => return Err(FormatError::UnknownOpcode { word, opcode: word & OPCODE_MASK })
  };
  let Fields { a, b, c, bx } = Fields::of(word);
  let sbx = bx as i32 - SBX_BIAS;

  let instruction =
    match opcode.scheme() {
      Scheme::ABC => Instruction::ABC { opcode, a, b, c },
      Scheme::AB0C => {
        require_zero(word, opcode, 'B', b)?;
        Instruction::AB0C { opcode, a, c }
      }
      Scheme::ABC0 => {
        require_zero(word, opcode, 'C', c)?;
        Instruction::ABC0 { opcode, a, b }
      }
      Scheme::AB0C0 => {
        require_zero(word, opcode, 'B', b)?;
        require_zero(word, opcode, 'C', c)?;
        Instruction::AB0C0 { opcode, a }
      }
      Scheme::ABx => Instruction::ABx { opcode, a, bx },
      Scheme::AsBx => Instruction::AsBx { opcode, a, sbx },
      Scheme::A0sBx => {
        require_zero(word, opcode, 'A', a)?;
        Instruction::A0sBx { opcode, sbx }
      }
    };

  Ok(instruction)
}

/**
  Encodes the instruction into a word. Operand values are assumed to be in range, which
  `Instruction::from_operands` guarantees for parsed instructions.
*/
pub fn encode_instruction(instruction: &Instruction) -> u32 {
  let opcode = instruction.opcode().code() as u32;
  match *instruction {
    Instruction::ABC { a, b, c, .. } => {
      // [B:9][C:9][A:8][OpCode:6]
      opcode + (a << A_SHIFT) + (c << C_SHIFT) + (b << B_SHIFT)
    }
    Instruction::AB0C { a, c, .. } => opcode + (a << A_SHIFT) + (c << C_SHIFT),
    Instruction::ABC0 { a, b, .. } => opcode + (a << A_SHIFT) + (b << B_SHIFT),
    Instruction::AB0C0 { a, .. } => opcode + (a << A_SHIFT),
    Instruction::ABx { a, bx, .. } => {
      // [Bx:18][A:8][OpCode:6]
      opcode + (a << A_SHIFT) + (bx << BX_SHIFT)
    }
    Instruction::AsBx { a, sbx, .. } => {
      opcode + (a << A_SHIFT) + (((sbx + SBX_BIAS) as u32) << BX_SHIFT)
    }
    Instruction::A0sBx { sbx, .. } => opcode + (((sbx + SBX_BIAS) as u32) << BX_SHIFT),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chunk::SENTINEL;

  #[test]
  fn known_words() {
    // GetTable  0 0 #3
    assert_eq!(
      encode_instruction(&Instruction::ABC { opcode: Opcode::GetTable, a: 0, b: 0, c: 259 }),
      0x0040_C006
    );
    // jmp -6
    assert_eq!(
      encode_instruction(&Instruction::A0sBx { opcode: Opcode::Jmp, sbx: -6 }),
      0x7FFE_4016
    );
    assert_eq!(
      encode_instruction(&Instruction::ABC0 { opcode: Opcode::Return, a: 0, b: 1 }),
      SENTINEL
    );
  }

  #[test]
  fn decodes_each_scheme() {
    assert_eq!(
      decode_instruction(0x0040_C006).unwrap(),
      Instruction::ABC { opcode: Opcode::GetTable, a: 0, b: 0, c: 259 }
    );
    assert_eq!(
      decode_instruction(0x7FFE_4016).unwrap(),
      Instruction::A0sBx { opcode: Opcode::Jmp, sbx: -6 }
    );
    assert_eq!(
      decode_instruction(SENTINEL).unwrap(),
      Instruction::ABC0 { opcode: Opcode::Return, a: 0, b: 1 }
    );
    // Close 5
    assert_eq!(decode_instruction(35 + (5 << 6)).unwrap(), Instruction::AB0C0 { opcode: Opcode::Close, a: 5 });
    // LoadK 1 70000
    assert_eq!(
      decode_instruction(1 + (1 << 6) + (70000 << 14)).unwrap(),
      Instruction::ABx { opcode: Opcode::LoadK, a: 1, bx: 70000 }
    );
    // ForPrep 2 +4
    assert_eq!(
      decode_instruction(32 + (2 << 6) + (((4 + SBX_BIAS) as u32) << 14)).unwrap(),
      Instruction::AsBx { opcode: Opcode::ForPrep, a: 2, sbx: 4 }
    );
    // Test 3 1
    assert_eq!(
      decode_instruction(26 + (3 << 6) + (1 << 14)).unwrap(),
      Instruction::AB0C { opcode: Opcode::Test, a: 3, c: 1 }
    );
  }

  #[test]
  fn sbx_extremes() {
    for sbx in &[-SBX_BIAS, -1, 0, 1, SBX_BIAS + 1] {
      let instruction = Instruction::A0sBx { opcode: Opcode::Jmp, sbx: *sbx };
      assert_eq!(decode_instruction(encode_instruction(&instruction)).unwrap(), instruction);
    }
  }

  #[test]
  fn rejects_unknown_opcode() {
    assert!(matches!(
      decode_instruction(38),
      Err(FormatError::UnknownOpcode { opcode: 38, .. })
    ));
    assert!(matches!(
      decode_instruction(63 + (1 << 6)),
      Err(FormatError::UnknownOpcode { opcode: 63, .. })
    ));
  }

  #[test]
  fn rejects_nonzero_reserved_fields() {
    // Move with C = 1
    assert!(matches!(
      decode_instruction(0 + (1 << 14)),
      Err(FormatError::NonZeroOperand { operand: 'C', value: 1, .. })
    ));
    // Test with B = 2
    assert!(matches!(
      decode_instruction(26 + (2 << 23)),
      Err(FormatError::NonZeroOperand { operand: 'B', value: 2, .. })
    ));
    // Close with C = 3
    assert!(matches!(
      decode_instruction(35 + (3 << 14)),
      Err(FormatError::NonZeroOperand { operand: 'C', value: 3, .. })
    ));
    // jmp with A = 1
    assert!(matches!(
      decode_instruction(22 + (1 << 6) + ((SBX_BIAS as u32) << 14)),
      Err(FormatError::NonZeroOperand { operand: 'A', value: 1, .. })
    ));
  }
}
