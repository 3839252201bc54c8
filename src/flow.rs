/*!
  Recovers structured control flow from the relative jumps of one function.

  Lua 5.1 compiles every loop and conditional to a handful of fixed jump patterns. Each
  jump-carrying instruction first gets a goto tag, which is its kind and its absolute target.
  The tags are then classified by a fixed sequence of passes, each of which removes the tags it
  explains from the working set:

    1. numeric `for`      `ForPrep` at i jumps to the `ForLoop` at j, which loops back to i+1
    2. generic `for`      `TForLoop` at i, a backward `jmp` at i+1, and the entry `jmp` at j-1
    3. `while`/`repeat`   any other backward `jmp`
    4. `break`            a forward `jmp` to just past an enclosing loop
    5. `if`/`else`        a conditional at i and its `jmp` at i+1, then the remaining `jmp`s
    6. regions            chained conditions are folded together for a comment in the listing

  Whatever is left after the passes is an error. Nothing here guesses.

  The result only affects how the listing is indented and labelled. The instructions are
  never changed.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use strum_macros::{Display as StrumDisplay, IntoStaticStr};
use tracing::{trace, warn};

use crate::bytecode::{Instruction, Opcode};
use crate::error::{ControlFlowError, Error, FormatError};

/// The control-transfer role of one instruction.
#[derive(StrumDisplay, IntoStaticStr, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum GotoKind {
  #[strum(serialize = "jmp")]
  Jump,
  /// A comparison or test, which skips the following `jmp`.
  #[strum(serialize = "if")]
  If,
  #[strum(serialize = "FORStart")]
  ForStart,
  #[strum(serialize = "FORend")]
  ForEnd,
  #[strum(serialize = "TFor")]
  TFor,
  /// `LoadBool` with its skip flag set.
  #[strum(serialize = "LoadB1")]
  LoadSkip,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub struct Goto {
  pub kind: GotoKind,
  /// Absolute index of the instruction control may transfer to. May equal the length of the
  /// code, meaning "past the end".
  pub target: usize,
}

impl Goto {
  /// Computes the tag of the instruction at `index` in code of length `len`.
  pub fn of(instruction: &Instruction, index: usize, len: usize) -> Result<Option<Goto>, FormatError> {
    let (kind, offset) =
      match instruction.opcode() {
        Opcode::Jmp => (GotoKind::Jump, instruction.sbx().unwrap_or(0)),
        Opcode::ForPrep => (GotoKind::ForStart, instruction.sbx().unwrap_or(0)),
        Opcode::ForLoop => (GotoKind::ForEnd, instruction.sbx().unwrap_or(0)),
        Opcode::TForLoop => (GotoKind::TFor, 1),
        Opcode::LoadBool if instruction.c() != 0 => (GotoKind::LoadSkip, 1),
        opcode if opcode.is_conditional() => (GotoKind::If, 1),
        _ => return Ok(None)
      };
    let target = index as i64 + 1 + offset as i64;
    if target < 0 || target > len as i64 {
      return Err(FormatError::TargetOutOfRange { index, target });
    }
    Ok(Some(Goto { kind, target: target as usize }))
  }
}

/// Boundary labels, written in front of the instruction's readable form.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Label {
  While,
  Repeat,
  TFor,
  Break,
  Else,
  /// The `else` of a `LoadBool` pair materializing a comparison.
  Else2,
  /// A lone `jmp` left when the compiler drops an always-true condition.
  IfTrueElse,
}

impl Display for Label {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let text = match self {
      Label::While => "WHILE: ",
      Label::Repeat => "REPEAT: ",
      Label::TFor => "TFOR:  ",
      Label::Break => "BREAK: ",
      Label::Else => "ELSE: ",
      Label::Else2 => "ELSE2: ",
      Label::IfTrueElse => "IF-TRUE-ELSE: ",
    };
    write!(f, "{}", text)
  }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum BlockKind {
  NumericFor,
  GenericFor,
  While,
  RepeatUntil,
  If,
  IfElse,
}

/// A reconstructed instruction range, both ends inclusive for loops. For conditionals `start`
/// is the test and `end` is the target of its jump.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub struct Block {
  pub kind: BlockKind,
  pub start: usize,
  pub end: usize,
}

/// The rendering hints for one instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Annotation {
  pub goto: Option<Goto>,
  pub indent: i32,
  /// In the order the passes applied them.
  pub labels: Vec<Label>,
}

impl Annotation {
  /// Labels as written in front of the line, most recent first.
  pub fn prefix(&self) -> String {
    self.labels.iter().rev().map(Label::to_string).collect()
  }
}

/// A run of conditionals folded together in pass 6. `label` lists the indices of the tests,
/// with `x` marking a contiguous fold and `y` an identical-end fold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
  pub end: usize,
  pub label: String,
}

impl Region {
  pub fn is_merged(&self) -> bool {
    self.label.contains(' ')
  }

  /// Index of the first test in the region.
  pub fn first(&self) -> Option<usize> {
    self.label.split(' ').next().and_then(|s| s.parse().ok())
  }
}

/// What goes before a listing line, besides the line itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Separator {
  Blank,
  Note { end: usize, label: String },
}

#[derive(Clone, Debug, Default)]
pub struct Reconstruction {
  pub lines: Vec<Annotation>,
  pub loops: Vec<Block>,
  pub conditionals: Vec<Block>,
  pub regions: Vec<Region>,
}

impl Reconstruction {
  /**
    Where to put separators in the listing. Merged regions get a blank line before their end and
    a note before their first test. With `diagnostics`, loops are also set off by blank lines;
    region separators take precedence.
  */
  pub fn separators(&self, diagnostics: bool) -> Vec<Option<Separator>> {
    let mut separators = vec![None; self.lines.len()];
    if diagnostics {
      for block in &self.loops {
        for index in &[block.start, block.end + 1] {
          if let Some(slot) = separators.get_mut(*index) {
            *slot = Some(Separator::Blank);
          }
        }
      }
    }
    for region in self.regions.iter().filter(|r| r.is_merged()) {
      if let Some(slot) = separators.get_mut(region.end) {
        *slot = Some(Separator::Blank);
      }
    }
    for region in self.regions.iter().filter(|r| r.is_merged()) {
      let first = match region.first() {
        Some(first) => first,
        None => continue
      };
      if let Some(slot) = separators.get_mut(first) {
        *slot = Some(Separator::Note { end: region.end, label: region.label.clone() });
      }
    }
    separators
  }
}

/// The tags not yet explained, by kind, in index order.
struct WorkingSet(BTreeMap<GotoKind, BTreeSet<usize>>);

impl WorkingSet {
  /// A snapshot to iterate over while removing from the set itself.
  fn snapshot(&self, kind: GotoKind) -> Vec<usize> {
    self.0.get(&kind).map(|set| set.iter().copied().collect()).unwrap_or_default()
  }

  fn contains(&self, kind: GotoKind, index: usize) -> bool {
    self.0.get(&kind).map_or(false, |set| set.contains(&index))
  }

  fn remove(&mut self, kind: GotoKind, index: usize) {
    if let Some(set) = self.0.get_mut(&kind) {
      set.remove(&index);
    }
  }

  fn first_left(&self) -> Option<(GotoKind, usize)> {
    self.0.iter()
      .find_map(|(kind, set)| set.iter().next().map(|index| (*kind, *index)))
  }
}

struct Reconstructor {
  lines: Vec<Annotation>,
  working: WorkingSet,
  loops: Vec<Block>,
  conditionals: Vec<Block>,
}

impl Reconstructor {
  fn goto(&self, index: usize) -> Option<Goto> {
    self.lines.get(index).and_then(|line| line.goto)
  }

  /// The target of a tag known to be present.
  fn target(&self, index: usize) -> usize {
    match self.goto(index) {
      Some(goto) => goto.target,
      None => unreachable!("Error: instruction {} has no goto tag", index)
    }
  }

  fn indent(&mut self, range: std::ops::Range<usize>, delta: i32) {
    let end = range.end.min(self.lines.len());
    for line in &mut self.lines[range.start.min(end)..end] {
      line.indent += delta;
    }
  }

  fn label(&mut self, index: usize, label: Label) {
    self.lines[index].labels.push(label);
  }

  fn is_conditional(&self, index: usize) -> bool {
    self.goto(index).map_or(false, |goto| goto.kind == GotoKind::If)
  }

  // 1. `ForPrep` at i jumps to the `ForLoop` at j, which must loop back to i+1.
  fn numeric_for(&mut self) -> Result<(), FormatError> {
    for i in self.working.snapshot(GotoKind::ForStart) {
      let j = self.target(i);
      match self.goto(j) {
        Some(Goto { kind: GotoKind::ForEnd, target }) if j > i => {
          if target != i + 1 {
            return Err(FormatError::UnpairedForLoop { index: j, target });
          }
        }
        _ => return Err(FormatError::UnpairedForPrep { prep: i, target: j })
      }
      self.indent(i + 1..j + 1, 1);
      self.loops.push(Block { kind: BlockKind::NumericFor, start: i, end: j });
      self.working.remove(GotoKind::ForEnd, j);
      self.working.remove(GotoKind::ForStart, i);
      trace!(start = i, end = j, "numeric for");
    }
    if let Some(j) = self.working.snapshot(GotoKind::ForEnd).first() {
      return Err(FormatError::UnpairedForLoop { index: *j, target: self.target(*j) });
    }
    Ok(())
  }

  // 2. `TForLoop` at i, followed by a `jmp` back to the loop body at j, which is entered
  //    through a `jmp` at j-1 that targets i.
  fn generic_for(&mut self) -> Result<(), ControlFlowError> {
    for i in self.working.snapshot(GotoKind::TFor) {
      let j = match self.goto(i + 1) {
        Some(Goto { kind: GotoKind::Jump, target }) if target < i => target,
        _ => return Err(ControlFlowError::TForWithoutLoopJump { index: i })
      };
      let entry = j as i64 - 1;
      if j == 0 || self.goto(j - 1) != Some(Goto { kind: GotoKind::Jump, target: i }) {
        return Err(ControlFlowError::TForWithoutEntryJump { index: i, entry });
      }
      self.indent(j..i + 2, 1);
      self.loops.push(Block { kind: BlockKind::GenericFor, start: j - 1, end: i + 1 });
      self.working.remove(GotoKind::Jump, i + 1);
      self.working.remove(GotoKind::Jump, j - 1);
      self.working.remove(GotoKind::TFor, i);
      self.label(j - 1, Label::TFor);
      trace!(start = j - 1, end = i + 1, "generic for");
    }
    Ok(())
  }

  // 3. Every remaining backward `jmp` closes a `while` or `repeat` loop. A `repeat` ends with its
  //    `until` test right before the `jmp`.
  fn while_and_repeat(&mut self) {
    for i in self.working.snapshot(GotoKind::Jump) {
      let j = self.target(i);
      if j > i {
        continue;
      }
      self.indent(j + 1..i + 1, 1);
      self.working.remove(GotoKind::Jump, i);
      let kind =
        if i > 0 && self.is_conditional(i - 1) {
          self.working.remove(GotoKind::If, i - 1);
          self.label(j, Label::Repeat);
          BlockKind::RepeatUntil
        } else {
          self.label(j, Label::While);
          BlockKind::While
        };
      self.loops.push(Block { kind, start: j, end: i });
      trace!(start = j, end = i, ?kind, "loop");
    }
  }

  // 4. A forward `jmp` to just past an enclosing loop is a `break`. When a test precedes it, the
  //    pair is the loop's own exit condition and the `jmp` stays for pass 5.
  fn breaks(&mut self) {
    for i in self.working.snapshot(GotoKind::Jump) {
      let target = self.target(i);
      let exits_loop = self.loops.iter()
        .any(|block| block.start < i && i < block.end && target == block.end + 1);
      if !exits_loop {
        continue;
      }
      self.label(i, Label::Break);
      if !(i > 0 && self.is_conditional(i - 1)) {
        self.working.remove(GotoKind::Jump, i);
      }
      trace!(index = i, "break");
    }
  }

  // 5. Each remaining test at i pairs with the `jmp` at i+1. Jumps left after that are `else`s.
  fn conditionals(&mut self) -> Result<(), ControlFlowError> {
    for i in self.working.snapshot(GotoKind::If) {
      if !self.working.contains(GotoKind::Jump, i + 1) {
        return Err(ControlFlowError::ConditionWithoutJump { index: i });
      }
      let j = self.target(i + 1);
      if j <= i {
        return Err(ControlFlowError::BackwardConditionalJump { index: i, target: j });
      }
      self.indent(i + 2..j, 1);
      self.working.remove(GotoKind::If, i);
      self.working.remove(GotoKind::Jump, i + 1);
      self.conditionals.push(Block { kind: BlockKind::If, start: i, end: j });
      trace!(start = i, end = j, "if");
    }

    for i in self.working.snapshot(GotoKind::Jump) {
      let j = self.target(i);
      if j <= i {
        unreachable!("Error: backward jump at {} survived the loop pass", i);
      }
      let ends_at = |conditionals: &[Block], end: usize| {
        conditionals.iter().position(|block| block.end == end)
      };

      if let Some(position) = ends_at(&self.conditionals[..], i + 1) {
        self.lines[i].indent -= 1;
        self.label(i, Label::Else);
        self.conditionals[position].kind = BlockKind::IfElse;
      } else if ends_at(&self.conditionals[..], i + 2).is_some()
        && self.goto(i + 1) == Some(Goto { kind: GotoKind::LoadSkip, target: i + 3 })
      {
        self.lines[i].indent -= 1;
        self.label(i, Label::Else2);
        self.working.remove(GotoKind::LoadSkip, i + 1);
      } else {
        self.label(i, Label::IfTrueElse);
      }
      self.working.remove(GotoKind::Jump, i);
      self.indent(i + 1..j, 1);
      trace!(index = i, target = j, "else");
    }

    // Boolean skips outside an `ELSE2` pair stay within the expression that produced them.
    for i in self.working.snapshot(GotoKind::LoadSkip) {
      self.working.remove(GotoKind::LoadSkip, i);
    }

    match self.working.first_left() {
      Some((kind, index)) => Err(ControlFlowError::Unclassified { kind: kind.into(), index }),
      None => Ok(())
    }
  }
}

/**
  Pass 6. Folds a conditional into its predecessor when the predecessor's jump lands on the first
  instruction of this one's body (contiguous, `x`) or when both jump to the same place (identical,
  `y`). This only feeds a comment in the listing.
*/
pub fn coalesce(conditionals: &[Block]) -> Vec<Region> {
  let mut pending: Vec<(usize, usize)> = conditionals.iter().map(|b| (b.start, b.end)).collect();
  pending.sort();

  let mut regions: Vec<Region> = Vec::new();
  for (start, end) in pending {
    regions.push(Region { end, label: start.to_string() });
    while regions.len() > 1 {
      let n = regions.len();
      let contiguous = regions[n - 2].end == start + 2;
      let identical = regions[n - 2].end == regions[n - 1].end;
      if contiguous && identical {
        warn!(
          start,
          end,
          "conditional regions are both contiguous and identical; folding as contiguous"
        );
      }
      if contiguous {
        let previous = regions.remove(n - 2);
        let last = &mut regions[n - 2];
        last.label = format!("{} {} x", previous.label, last.label);
      } else if identical {
        if let Some(last) = regions.pop() {
          regions[n - 2].label.push_str(&format!(" {} y", last.label));
        }
      } else {
        break;
      }
    }
  }
  regions
}

/// Runs all passes over the decoded code of one function.
pub fn reconstruct(code: &[Instruction]) -> Result<Reconstruction, Error> {
  let mut lines = Vec::with_capacity(code.len());
  let mut working = WorkingSet(BTreeMap::new());
  for (index, instruction) in code.iter().enumerate() {
    let goto = Goto::of(instruction, index, code.len())?;
    if let Some(goto) = goto {
      working.0.entry(goto.kind).or_insert_with(BTreeSet::new).insert(index);
    }
    lines.push(Annotation { goto, ..Annotation::default() });
  }

  let mut reconstructor = Reconstructor {
    lines,
    working,
    loops: Vec::new(),
    conditionals: Vec::new()
  };
  reconstructor.numeric_for()?;
  reconstructor.generic_for()?;
  reconstructor.while_and_repeat();
  reconstructor.breaks();
  reconstructor.conditionals()?;

  let regions = coalesce(&reconstructor.conditionals);
  Ok(Reconstruction {
    lines: reconstructor.lines,
    loops: reconstructor.loops,
    conditionals: reconstructor.conditionals,
    regions
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn abc(opcode: Opcode, a: u32, b: u32, c: u32) -> Instruction {
    Instruction::ABC { opcode, a, b, c }
  }

  fn jmp(sbx: i32) -> Instruction {
    Instruction::A0sBx { opcode: Opcode::Jmp, sbx }
  }

  fn test(a: u32) -> Instruction {
    Instruction::AB0C { opcode: Opcode::Test, a, c: 0 }
  }

  fn mov(a: u32) -> Instruction {
    Instruction::ABC0 { opcode: Opcode::Move, a, b: 0 }
  }

  fn ret() -> Instruction {
    Instruction::ABC0 { opcode: Opcode::Return, a: 0, b: 1 }
  }

  fn indents(reconstruction: &Reconstruction) -> Vec<i32> {
    reconstruction.lines.iter().map(|line| line.indent).collect()
  }

  #[test]
  fn if_then_block() {
    // EQ 0 r0 #0; jmp +3; three more
    let code = vec![abc(Opcode::Eq, 0, 0, 256), jmp(3), mov(1), mov(2), ret()];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[0].goto, Some(Goto { kind: GotoKind::If, target: 2 }));
    assert_eq!(result.lines[1].goto, Some(Goto { kind: GotoKind::Jump, target: 5 }));
    assert_eq!(indents(&result), vec![0, 0, 1, 1, 1]);
    assert_eq!(result.conditionals, vec![Block { kind: BlockKind::If, start: 0, end: 5 }]);
  }

  #[test]
  fn if_else() {
    // if r0 then r1 = r0 else r2 = r0 end
    let code = vec![test(0), jmp(2), mov(1), jmp(1), mov(2), ret()];
    let result = reconstruct(&code).unwrap();
    assert_eq!(indents(&result), vec![0, 0, 1, 0, 1, 0]);
    assert_eq!(result.lines[3].labels, vec![Label::Else]);
    assert_eq!(result.conditionals[0].kind, BlockKind::IfElse);
  }

  #[test]
  fn independent_ifs_restore_depth() {
    let mut code = Vec::new();
    for _ in 0..3 {
      code.extend(vec![test(0), jmp(2), mov(1), mov(2)]);
    }
    code.push(ret());
    let result = reconstruct(&code).unwrap();
    assert_eq!(indents(&result), vec![0, 0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 0]);
  }

  #[test]
  fn numeric_for() {
    let code = vec![
      Instruction::AsBx { opcode: Opcode::ForPrep, a: 0, sbx: 1 },
      mov(4),
      Instruction::AsBx { opcode: Opcode::ForLoop, a: 0, sbx: -2 },
      ret(),
    ];
    let result = reconstruct(&code).unwrap();
    assert_eq!(indents(&result), vec![0, 1, 1, 0]);
    assert_eq!(result.loops, vec![Block { kind: BlockKind::NumericFor, start: 0, end: 2 }]);
  }

  #[test]
  fn unpaired_for_loops_are_format_errors() {
    // ForPrep lands on a Move.
    let code = vec![
      Instruction::AsBx { opcode: Opcode::ForPrep, a: 0, sbx: 0 },
      mov(4),
      ret(),
    ];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::Format(FormatError::UnpairedForPrep { prep: 0, target: 1 }))
    ));
    // ForLoop loops back to the wrong place.
    let code = vec![
      Instruction::AsBx { opcode: Opcode::ForPrep, a: 0, sbx: 1 },
      mov(4),
      Instruction::AsBx { opcode: Opcode::ForLoop, a: 0, sbx: -3 },
      ret(),
    ];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::Format(FormatError::UnpairedForLoop { index: 2, target: 0 }))
    ));
    // ForLoop with no ForPrep.
    let code = vec![mov(4), Instruction::AsBx { opcode: Opcode::ForLoop, a: 0, sbx: -2 }, ret()];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::Format(FormatError::UnpairedForLoop { index: 1, .. }))
    ));
  }

  #[test]
  fn generic_for() {
    // jmp to TForLoop; body; TForLoop; jmp back to body
    let code = vec![
      jmp(1),
      mov(5),
      Instruction::AB0C { opcode: Opcode::TForLoop, a: 0, c: 1 },
      jmp(-3),
      ret(),
    ];
    let result = reconstruct(&code).unwrap();
    assert_eq!(indents(&result), vec![0, 1, 1, 1, 0]);
    assert_eq!(result.lines[0].labels, vec![Label::TFor]);
    assert_eq!(result.loops, vec![Block { kind: BlockKind::GenericFor, start: 0, end: 3 }]);
  }

  #[test]
  fn generic_for_without_entry_jump() {
    let code = vec![
      mov(0),
      mov(5),
      Instruction::AB0C { opcode: Opcode::TForLoop, a: 0, c: 1 },
      jmp(-3),
      ret(),
    ];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::ControlFlow(ControlFlowError::TForWithoutEntryJump { index: 2, entry: 0 }))
    ));
  }

  #[test]
  fn generic_for_without_loop_jump() {
    let code = vec![
      Instruction::AB0C { opcode: Opcode::TForLoop, a: 0, c: 1 },
      mov(1),
      ret(),
    ];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::ControlFlow(ControlFlowError::TForWithoutLoopJump { index: 0 }))
    ));
  }

  #[test]
  fn while_loop_with_exit_test() {
    // while r0 do r1 = r0 end
    let code = vec![test(0), jmp(2), mov(1), jmp(-4), ret()];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[0].labels, vec![Label::While]);
    assert_eq!(result.loops, vec![Block { kind: BlockKind::While, start: 0, end: 3 }]);
    // The exit test's jump lands past the loop but belongs to the condition.
    assert_eq!(result.lines[1].labels, vec![Label::Break]);
    assert_eq!(indents(&result), vec![0, 1, 2, 2, 0]);
  }

  #[test]
  fn repeat_until() {
    // repeat r1 = r0 until r0
    let code = vec![mov(1), test(0), jmp(-3), ret()];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[0].labels, vec![Label::Repeat]);
    assert_eq!(result.loops[0].kind, BlockKind::RepeatUntil);
    assert_eq!(indents(&result), vec![0, 1, 1, 0]);
  }

  #[test]
  fn unconditional_break() {
    // while true do break end, as a loop whose body jumps out.
    let code = vec![mov(0), jmp(1), jmp(-3), ret()];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[1].labels, vec![Label::Break]);
    assert_eq!(result.conditionals, vec![]);
  }

  #[test]
  fn lone_forward_jump_is_if_true_else() {
    let code = vec![jmp(1), mov(0), ret()];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[0].labels, vec![Label::IfTrueElse]);
    assert_eq!(indents(&result), vec![0, 1, 0]);
  }

  #[test]
  fn boolean_materialization() {
    // r0 = (r1 == r2) compiles to EQ; jmp; LoadBool 0 0 1; LoadBool 0 1 0
    let code = vec![
      abc(Opcode::Eq, 1, 1, 2),
      jmp(1),
      abc(Opcode::LoadBool, 0, 0, 1),
      abc(Opcode::LoadBool, 0, 1, 0),
      ret(),
    ];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[2].goto, Some(Goto { kind: GotoKind::LoadSkip, target: 4 }));
    assert_eq!(result.lines[3].labels, vec![]);
  }

  #[test]
  fn boolean_pair_else() {
    let code = vec![
      test(0),
      jmp(2),
      jmp(2),
      abc(Opcode::LoadBool, 0, 0, 1),
      abc(Opcode::LoadBool, 0, 1, 0),
      ret(),
    ];
    let result = reconstruct(&code).unwrap();
    assert_eq!(result.lines[2].labels, vec![Label::Else2]);
    assert_eq!(indents(&result), vec![0, 0, 0, 2, 1, 0]);
  }

  #[test]
  fn conditional_without_jump() {
    let code = vec![test(0), mov(1), ret()];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::ControlFlow(ControlFlowError::ConditionWithoutJump { index: 0 }))
    ));
  }

  #[test]
  fn jump_outside_function() {
    let code = vec![jmp(5), ret()];
    assert!(matches!(
      reconstruct(&code),
      Err(Error::Format(FormatError::TargetOutOfRange { index: 0, target: 6 }))
    ));
  }

  #[test]
  fn coalesce_folds() {
    let block = |start, end| Block { kind: BlockKind::If, start, end };
    // `if a or b`: the first test's jump lands on the body of the second.
    let regions = coalesce(&[block(0, 4), block(2, 6)]);
    assert_eq!(regions, vec![Region { end: 6, label: "0 2 x".to_string() }]);
    // `if a and b`: both jump to the same place.
    let regions = coalesce(&[block(0, 6), block(2, 6)]);
    assert_eq!(regions, vec![Region { end: 6, label: "0 2 y".to_string() }]);
    // Both rules hold when the first region ends where the second starts and both share an
    // end. The contiguous fold wins.
    let regions = coalesce(&[block(0, 4), block(2, 4)]);
    assert_eq!(regions, vec![Region { end: 4, label: "0 2 x".to_string() }]);
    // Unrelated regions are left alone.
    let regions = coalesce(&[block(0, 3), block(5, 8)]);
    assert_eq!(regions.len(), 2);
    assert!(!regions[0].is_merged());
  }

  #[test]
  fn merged_regions_get_separators() {
    let result = Reconstruction {
      lines: vec![Annotation::default(); 8],
      regions: vec![Region { end: 6, label: "0 2 y".to_string() }],
      ..Reconstruction::default()
    };
    let separators = result.separators(false);
    assert_eq!(separators[6], Some(Separator::Blank));
    assert_eq!(separators[0], Some(Separator::Note { end: 6, label: "0 2 y".to_string() }));
    assert_eq!(separators.iter().filter(|s| s.is_some()).count(), 2);
  }
}
