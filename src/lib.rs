/*!
  A disassembler and assembler for Lua 5.1 bytecode chunks.

  `disassemble` turns a binary chunk into an assembly listing in which loops and conditionals
  recovered from the jump structure are shown by indentation and labels. `assemble` reads a
  listing back and produces the binary chunk. A listing made with `Options::assembly()`
  assembles to exactly the bytes it was made from.

  The pipeline is

    bytes -> chunk::decode -> bytecode::decode_instruction -> flow::reconstruct -> listing::render
    text  -> bytecode::parse_assembly -> chunk::encode

  None of it does any I/O.
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod error;
pub mod operand;
pub mod chunk;
pub mod bytecode;
pub mod flow;
pub mod listing;

pub use error::{ControlFlowError, Error, FormatError, ParseError, ParseErrorKind, Result};
pub use listing::Options;

/// Decodes a binary chunk and renders it as a listing.
pub fn disassemble(bytes: &[u8], options: &Options) -> Result<String> {
  let chunk = chunk::decode(bytes)?;
  listing::render(&chunk, options)
}

/// Parses a listing and encodes it as a binary chunk.
pub fn assemble(text: &str) -> Result<Vec<u8>> {
  let chunk = bytecode::parse_assembly(text)?;
  Ok(chunk::encode(&chunk))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::{encode_instruction, Instruction, Opcode};
  use crate::chunk::tests::bare_prototype;
  use crate::chunk::{encode, Chunk, Constant, SENTINEL};

  fn word(instruction: Instruction) -> u32 {
    encode_instruction(&instruction)
  }

  /// for i = 1, 3 do if i == 2 then break end end; while x do x = nil end
  fn loops_chunk() -> Chunk {
    let mut main = bare_prototype(vec![
      word(Instruction::ABx { opcode: Opcode::LoadK, a: 0, bx: 0 }),             // 0
      word(Instruction::ABx { opcode: Opcode::LoadK, a: 1, bx: 1 }),             // 1
      word(Instruction::ABx { opcode: Opcode::LoadK, a: 2, bx: 0 }),             // 2
      word(Instruction::AsBx { opcode: Opcode::ForPrep, a: 0, sbx: 3 }),         // 3
      word(Instruction::ABC { opcode: Opcode::Eq, a: 0, b: 3, c: 258 }),         // 4
      word(Instruction::A0sBx { opcode: Opcode::Jmp, sbx: 1 }),                  // 5
      word(Instruction::A0sBx { opcode: Opcode::Jmp, sbx: 1 }),                  // 6
      word(Instruction::AsBx { opcode: Opcode::ForLoop, a: 0, sbx: -4 }),        // 7
      word(Instruction::ABx { opcode: Opcode::GetGlobal, a: 0, bx: 3 }),         // 8
      word(Instruction::AB0C { opcode: Opcode::Test, a: 0, c: 0 }),              // 9
      word(Instruction::A0sBx { opcode: Opcode::Jmp, sbx: 3 }),                  // 10
      word(Instruction::ABC0 { opcode: Opcode::LoadNil, a: 0, b: 0 }),           // 11
      word(Instruction::ABx { opcode: Opcode::SetGlobal, a: 0, bx: 3 }),         // 12
      word(Instruction::A0sBx { opcode: Opcode::Jmp, sbx: -6 }),                 // 13
      SENTINEL,                                                                  // 14
    ]);
    main.max_stack_size = 4;
    main.constants = vec![
      Constant::Number(1.0),
      Constant::Number(3.0),
      Constant::Number(2.0),
      Constant::String("x".to_string()),
    ];
    Chunk { main }
  }

  #[test]
  fn binary_text_binary() {
    let bytes = encode(&loops_chunk());
    let text = disassemble(&bytes, &Options::assembly()).unwrap();
    assert_eq!(assemble(&text).unwrap(), bytes);
    // And the listing of the reassembled bytes is the same listing.
    assert_eq!(disassemble(&assemble(&text).unwrap(), &Options::assembly()).unwrap(), text);
  }

  #[test]
  fn loops_are_labelled() {
    let text = disassemble(&encode(&loops_chunk()), &Options::assembly()).unwrap();
    let lines: Vec<&str> = text.lines().filter(|line| line.contains(" ; ")).collect();
    assert!(lines[3].contains("FORStart"));
    assert!(lines[6].contains("BREAK: "), "{}", lines[6]);
    assert!(lines[8].contains("WHILE: "), "{}", lines[8]);
    assert!(lines[11].contains(".   .   r0 = nil"), "{}", lines[11]);
  }

  #[test]
  fn non_canonical_nan_survives_a_round_trip() {
    let mut main = bare_prototype(vec![
      word(Instruction::ABx { opcode: Opcode::LoadK, a: 0, bx: 0 }),
      word(Instruction::ABx { opcode: Opcode::LoadK, a: 1, bx: 1 }),
      SENTINEL,
    ]);
    main.max_stack_size = 2;
    main.constants = vec![Constant::Number(-f64::NAN), Constant::Number(f64::NAN)];
    let bytes = encode(&Chunk { main });
    let text = disassemble(&bytes, &Options::assembly()).unwrap();
    assert!(text.contains("CONST 0 NaN:0xfff8000000000000"), "{}", text);
    assert!(text.contains("CONST 1 NaN\n"), "{}", text);
    assert_eq!(assemble(&text).unwrap(), bytes);
  }

  #[test]
  fn largest_table_size_hints_disassemble() {
    let mut main = bare_prototype(vec![
      word(Instruction::ABC { opcode: Opcode::NewTable, a: 0, b: 511, c: 511 }),
      word(Instruction::ABC { opcode: Opcode::NewTable, a: 0, b: 128, c: 0 }),
      SENTINEL,
    ]);
    main.max_stack_size = 1;
    let bytes = encode(&Chunk { main });
    let text = disassemble(&bytes, &Options::assembly()).unwrap();
    assert!(text.contains("NewTable  0 511 511"), "{}", text);
    assert_eq!(assemble(&text).unwrap(), bytes);
  }

  #[test]
  fn errors_name_their_stage() {
    assert!(matches!(
      disassemble(b"\x1bLuaR", &Options::default()),
      Err(Error::Format(FormatError::BadHeader(_)))
    ));
    assert!(matches!(assemble("FUNC\n"), Err(Error::Parse(_))));

    // The second test has no jump to skip.
    let mut main = bare_prototype(vec![
      word(Instruction::AB0C { opcode: Opcode::Test, a: 0, c: 0 }),
      word(Instruction::A0sBx { opcode: Opcode::Jmp, sbx: 0 }),
      word(Instruction::AB0C { opcode: Opcode::Test, a: 0, c: 0 }),
      SENTINEL,
    ]);
    main.max_stack_size = 1;
    assert!(matches!(
      disassemble(&encode(&Chunk { main }), &Options::default()),
      Err(Error::ControlFlow(ControlFlowError::ConditionWithoutJump { index: 2 }))
    ));
  }
}
