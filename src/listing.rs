/*!
  Renders a chunk as an assembly listing. Each function is written as

    FUNC [<n>: <path>] (<line>, <lastline>, <nups>, <nparams>, <flags>, <maxstack>) ;; ...
    SOURCE, CONST declarations
    one line per instruction
    LINES, LOCAL, UPVALUE debug tables
    FUNCS_NUM: <number of children>

  followed by its children, depth first. `<n>` counts functions in the order they are
  written and `<path>` is the position of the function among its siblings at each level.

  An instruction line is the index, the goto tag, one `.   ` per indentation level, the
  readable form with its labels, and finally ` ; ` and the mnemonic the assembler reads:

  ```text
  6.  if         8   .   IF r0 == 1.0:  PC++                                  ; EQ  0 0 #1
  ```

  Without `Options::constants` the directives the assembler needs are commented out, so the
  listing is for reading only.
*/

use crate::bytecode::{decode_instruction, Instruction};
use crate::chunk::{Chunk, DebugInfo, Prototype, HEADER};
use crate::error::{Error, FormatError};
use crate::flow::{reconstruct, Reconstruction, Separator};

const HEADER_COMMENT: &str =
  "line defined, last line defined, #upvalues, #parameters, \
   1=VARARG_HASARG|2=VARARG_ISVARARG|4=VARARG_NEEDSARG, #registers";

/// Width the readable form is padded to, so the mnemonics line up.
const SEMANTIC_WIDTH: usize = 60;

/// What to include in a listing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Options {
  /// Emit `CONST` declarations and the other directives re-assembly needs.
  pub constants: bool,
  /// Prefix instruction lines with their file offset and raw word in hex.
  pub hex: bool,
  /// Only the indented readable form. Not re-parseable.
  pub concise: bool,
  /// Dump the reconstructed blocks as comments and set loops off with blank lines.
  pub diagnostics: bool,
}

impl Options {
  /// The settings whose output `bytecode::parse_assembly` reads back exactly.
  pub fn assembly() -> Options {
    Options { constants: true, ..Options::default() }
  }
}

struct Listing<'o> {
  options: &'o Options,
  out: String,
  /// Functions written so far.
  count: usize,
}

impl<'o> Listing<'o> {
  fn line(&mut self, text: &str) {
    self.out.push_str(text);
    self.out.push('\n');
  }

  /// A line the assembler needs, commented out when constants are not shown.
  fn directive(&mut self, text: &str) {
    if self.options.constants {
      self.line(text);
    } else {
      self.line(&format!("# {}", text));
    }
  }

  fn function(&mut self, prototype: &Prototype, path: &[usize], start: usize) -> Result<(), Error> {
    let code = prototype.code.iter()
      .map(|&word| -> Result<Instruction, FormatError> {
        let instruction = decode_instruction(word)?;
        instruction.check(&prototype.constants, prototype.children.len())?;
        Ok(instruction)
      })
      .collect::<Result<Vec<Instruction>, FormatError>>()?;
    let reconstruction = reconstruct(&code)?;

    let position = path.iter().map(usize::to_string).collect::<Vec<String>>().join(", ");
    self.line("");
    self.line(&format!(
      "FUNC [{}: {}] ({}, {}, {}, {}, {}, {}) ;; {}",
      self.count,
      position,
      prototype.line_defined,
      prototype.last_line_defined,
      prototype.upvalue_count,
      prototype.parameter_count,
      prototype.vararg_flags,
      prototype.max_stack_size,
      HEADER_COMMENT
    ));
    self.count += 1;

    if let Some(source) = &prototype.source {
      self.directive(&format!("SOURCE {:?}", source));
    }
    if self.options.constants {
      for (index, constant) in prototype.constants.iter().enumerate() {
        self.line(&format!("CONST {} {}", index, constant));
      }
    }

    self.instructions(prototype, &code, &reconstruction, start);
    if self.options.diagnostics && !self.options.concise {
      self.diagnostics(&reconstruction);
    }

    let debug = &prototype.debug;
    if !debug.is_empty() {
      self.debug_directives(debug);
    }
    self.directive(&format!("FUNCS_NUM: {}", prototype.children.len()));

    let mut child_start = prototype.children_offset(start);
    let mut child_path = path.to_vec();
    child_path.push(0);
    for (position, child) in prototype.children.iter().enumerate() {
      if let Some(last) = child_path.last_mut() {
        *last = position;
      }
      self.function(child, &child_path, child_start)?;
      child_start += child.encoded_len();
    }
    Ok(())
  }

  fn instructions(
    &mut self,
    prototype: &Prototype,
    code: &[Instruction],
    reconstruction: &Reconstruction,
    start: usize
  ) {
    let code_offset = prototype.code_offset(start);
    let separators = reconstruction.separators(self.options.diagnostics);
    let rows = code.iter().zip(&reconstruction.lines).zip(separators).enumerate();

    for (index, ((instruction, annotation), separator)) in rows {
      let indent = annotation.indent.max(0) as usize;
      let semantic = format!("{}{}", annotation.prefix(), instruction.describe(&prototype.constants));
      if self.options.concise {
        self.line(&format!("{}{}", "   ".repeat(indent), semantic));
        continue;
      }

      match separator {
        Some(Separator::Blank) => self.line(""),
        Some(Separator::Note { end, label }) => self.line(&format!("\t# {}: {}", end, label)),
        None => {}
      }
      let mut text = String::new();
      if self.options.hex {
        text.push_str(&format!("{:5x} {:8x} ", code_offset + 4 * index, prototype.code[index]));
      }
      let (kind, target) = match annotation.goto {
        Some(goto) => (goto.kind.to_string(), goto.target.to_string()),
        None => (String::new(), String::new())
      };
      text.push_str(&format!(
        "{:3}.  {:<8} {:>3}   {}{:<width$} ; {}",
        index,
        kind,
        target,
        ".   ".repeat(indent),
        semantic,
        instruction,
        width = SEMANTIC_WIDTH
      ));
      self.line(&text);
    }
  }

  fn diagnostics(&mut self, reconstruction: &Reconstruction) {
    let mut blocks: Vec<(usize, usize)> =
      reconstruction.loops.iter().map(|b| (b.start, b.end)).collect();
    blocks.sort();
    let mut stack: Vec<(usize, usize)> =
      reconstruction.conditionals.iter().map(|b| (b.start, b.end)).collect();
    stack.sort();
    let regions: Vec<(usize, &str)> =
      reconstruction.regions.iter().map(|r| (r.end, r.label.as_str())).collect();

    self.line(&format!("#blocks: {:?}", blocks));
    self.line(&format!("#stack:  {:?}", stack));
    self.line(&format!("#stack2: {:?}", regions));
  }

  /// `LINES`, `LOCAL` and `UPVALUE`, which carry the debug tables through a round trip.
  fn debug_directives(&mut self, debug: &DebugInfo) {
    if !debug.line_info.is_empty() {
      let lines = debug.line_info.iter().map(u32::to_string).collect::<Vec<String>>().join(" ");
      self.directive(&format!("LINES {}", lines));
    }
    for local in &debug.locals {
      self.directive(&format!("LOCAL {:?} {} {}", local.name, local.start_pc, local.end_pc));
    }
    for name in &debug.upvalue_names {
      self.directive(&format!("UPVALUE {:?}", name));
    }
  }
}

/// Renders every function of the chunk. Fails if an instruction does not decode or a function's
/// jumps do not form structured control flow.
pub fn render(chunk: &Chunk, options: &Options) -> Result<String, Error> {
  let mut listing = Listing { options, out: String::new(), count: 0 };
  listing.function(&chunk.main, &[0], HEADER.len())?;
  Ok(listing.out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::{encode_instruction, parse_assembly, Opcode};
  use crate::chunk::tests::bare_prototype;
  use crate::chunk::{encode, Constant, Local, SENTINEL};

  fn word(instruction: Instruction) -> u32 {
    encode_instruction(&instruction)
  }

  fn mov(a: u32, b: u32) -> u32 {
    word(Instruction::ABC0 { opcode: Opcode::Move, a, b })
  }

  /// `EQ 0 r0 #0`, a `jmp` over three moves, then the return.
  fn scenario() -> Chunk {
    let mut main = bare_prototype(vec![
      word(Instruction::ABC { opcode: Opcode::Eq, a: 0, b: 0, c: 256 }),
      word(Instruction::A0sBx { opcode: Opcode::Jmp, sbx: 3 }),
      mov(1, 0),
      mov(1, 0),
      mov(1, 0),
      SENTINEL,
    ]);
    main.constants = vec![Constant::Number(0.0)];
    Chunk { main }
  }

  fn instruction_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|line| line.contains(" ; ")).collect()
  }

  #[test]
  fn scenario_tags_and_indentation() {
    let text = render(&scenario(), &Options::assembly()).unwrap();
    let lines = instruction_lines(&text);
    assert_eq!(lines.len(), 6);
    let prefix = |index: usize, kind: &str, target: &str| {
      format!("{:3}.  {:<8} {:>3}   ", index, kind, target)
    };
    assert!(lines[0].starts_with(&format!("{}IF r0 == 0.0:  PC++", prefix(0, "if", "2"))));
    assert!(lines[0].ends_with(" ; EQ  0 0 #0"));
    assert!(lines[1].starts_with(&format!("{}PC += 3", prefix(1, "jmp", "5"))));
    for (index, line) in lines[2..5].iter().enumerate() {
      assert!(line.starts_with(&format!("{}.   r1 = r0", prefix(index + 2, "", ""))), "{}", line);
    }
    assert!(lines[5].starts_with(&format!("{}return ", prefix(5, "", ""))));
  }

  #[test]
  fn scenario_reassembles_to_the_same_words() {
    let chunk = scenario();
    let text = render(&chunk, &Options::assembly()).unwrap();
    let reassembled = parse_assembly(&text).unwrap();
    assert_eq!(reassembled.main.code, chunk.main.code);
    assert_eq!(encode(&reassembled), encode(&chunk));
  }

  #[test]
  fn nested_functions_round_trip() {
    let mut grandchild = bare_prototype(vec![SENTINEL]);
    grandchild.line_defined = 4;
    let mut first = bare_prototype(vec![
      word(Instruction::ABx { opcode: Opcode::Closure, a: 0, bx: 0 }),
      SENTINEL
    ]);
    first.children = vec![grandchild];
    first.debug.upvalue_names = vec!["self \"quoted\"".to_string()];
    let second = bare_prototype(vec![SENTINEL]);

    let mut main = bare_prototype(vec![
      word(Instruction::ABx { opcode: Opcode::Closure, a: 0, bx: 0 }),
      word(Instruction::ABx { opcode: Opcode::Closure, a: 1, bx: 1 }),
      SENTINEL
    ]);
    main.source = Some("@nested.lua".to_string());
    main.constants = vec![
      Constant::Nil,
      Constant::Boolean(false),
      Constant::Number(f64::INFINITY),
      Constant::String("tab\there\n".to_string()),
      Constant::String(String::new()),
    ];
    main.children = vec![first, second];
    main.debug.line_info = vec![1, 2, 3];
    main.debug.locals = vec![Local { name: "f".to_string(), start_pc: 1, end_pc: 3 }];
    let chunk = Chunk { main };

    let text = render(&chunk, &Options::assembly()).unwrap();
    assert!(text.contains("FUNC [0: 0] "));
    assert!(text.contains("FUNC [1: 0, 0] "));
    assert!(text.contains("FUNC [2: 0, 0, 0] "));
    assert!(text.contains("FUNC [3: 0, 1] "));
    assert_eq!(parse_assembly(&text).unwrap(), chunk);
  }

  #[test]
  fn stripped_functions_have_no_debug_directives() {
    let text = render(&scenario(), &Options::assembly()).unwrap();
    assert!(!text.contains("LINES"));
    assert!(!text.contains("LOCAL"));
    assert!(!text.contains("UPVALUE"));

    let mut chunk = scenario();
    chunk.main.debug.upvalue_names = vec!["up".to_string()];
    let text = render(&chunk, &Options::assembly()).unwrap();
    assert!(text.contains("UPVALUE \"up\""));
    assert!(!text.contains("LINES"));
    assert_eq!(parse_assembly(&text).unwrap(), chunk);
  }

  #[test]
  fn hex_offsets_follow_the_layout() {
    let chunk = scenario();
    let options = Options { hex: true, ..Options::assembly() };
    let text = render(&chunk, &options).unwrap();
    let lines = instruction_lines(&text);
    // 12 byte header, absent source, 12 header bytes and the code count.
    assert!(lines[0].starts_with(&format!("{:5x} {:8x} ", 32, chunk.main.code[0])));
    assert!(lines[5].starts_with(&format!("{:5x} {:8x} ", 52, SENTINEL)));
    // Still re-assembles.
    assert_eq!(parse_assembly(&text).unwrap(), chunk);
  }

  #[test]
  fn without_constants_directives_are_comments() {
    let text = render(&scenario(), &Options::default()).unwrap();
    assert!(!text.contains("\nCONST"));
    assert!(text.contains("\n# FUNCS_NUM: 0\n"));
  }

  #[test]
  fn concise_lines() {
    let options = Options { concise: true, ..Options::default() };
    let text = render(&scenario(), &options).unwrap();
    assert!(text.contains("\nIF r0 == 0.0:  PC++\n"), "{}", text);
    assert!(text.contains("\n   r1 = r0\n"));
    assert!(!text.contains(" ; "));
  }

  #[test]
  fn diagnostics_dump_blocks() {
    let options = Options { diagnostics: true, ..Options::assembly() };
    let text = render(&scenario(), &options).unwrap();
    assert!(text.contains("#blocks: []\n"));
    assert!(text.contains("#stack:  [(0, 5)]\n"));
    assert!(text.contains("#stack2: [(5, \"0\")]\n"));
  }

  #[test]
  fn rejects_undecodable_code() {
    let chunk = Chunk { main: bare_prototype(vec![63, SENTINEL]) };
    assert!(matches!(
      render(&chunk, &Options::assembly()),
      Err(Error::Format(FormatError::UnknownOpcode { .. }))
    ));

    let chunk = Chunk {
      main: bare_prototype(vec![word(Instruction::ABx { opcode: Opcode::LoadK, a: 0, bx: 0 }), SENTINEL])
    };
    assert!(matches!(
      render(&chunk, &Options::assembly()),
      Err(Error::Format(FormatError::ConstantOutOfRange { .. }))
    ));
  }
}
