/*!

  Lua 5.1 instructions are single 32 bit words. The low 6 bits hold the opcode, and the
  remaining 26 bits hold up to three operands laid out as follows:

    [B:9][C:9][A:8][OpCode:6]        general case
    [  Bx:18 ][A:8][OpCode:6]        constant and prototype indices
    [ sBx:18 ][A:8][OpCode:6]        signed jump displacements

  `sBx` is stored as `Bx` biased by `SBX_BIAS`, so there is no sign bit. Fields of 256 or more
  in an "RK" position index the constant table (see `crate::operand`).

  Each opcode is bound to exactly one of seven operand schemes. The scheme says which fields
  are meaningful and which must be zero. Rather than storing the scheme next to the opcode,
  `Instruction` has one variant per scheme, so a decoded instruction cannot carry a field its
  scheme says is absent.

*/

mod binary;
mod instruction;
mod assembly;

pub use binary::{decode_instruction, encode_instruction, SBX_BIAS, MAX_A, MAX_B, MAX_C, MAX_BX};
pub use instruction::Instruction;
pub use assembly::parse_assembly;

use prettytable::{format as TableFormat, Table};
use strum::IntoEnumIterator;
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/**
  Opcodes of the Lua 5.1 virtual machine.

  The numeric value of each opcode is its position in this list, so the order is significant
  and matches the reference implementation. The `strum` names are the mnemonics used in
  assembly listings.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, EnumIter, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq, Debug,           Hash
)]
#[repr(u8)]
pub enum Opcode {
  Move,                                   // R(A) := R(B)
  LoadK,                                  // R(A) := Kst(Bx)
  LoadBool,                               // R(A) := (Bool)B; if (C) pc++
  #[strum(serialize = "LoadNIL")]
  LoadNil,                                // R(A) := ... := R(B) := nil
  #[strum(serialize = "GetUPVal")]
  GetUpval,                               // R(A) := UpValue[B]
  GetGlobal,                              // R(A) := Gbl[Kst(Bx)]
  GetTable,                               // R(A) := R(B)[RK(C)]
  SetGlobal,                              // Gbl[Kst(Bx)] := R(A)
  #[strum(serialize = "SetUPVal")]
  SetUpval,                               // UpValue[B] := R(A)
  SetTable,                               // R(A)[RK(B)] := RK(C)
  NewTable,                               // R(A) := {} (size = B,C)
  #[strum(serialize = "Self")]
  SelfCall,                               // R(A+1) := R(B); R(A) := R(B)[RK(C)]
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  Pow,
  #[strum(serialize = "UnM")]
  Unm,                                    // R(A) := -R(B)
  #[strum(serialize = "NOT")]
  Not,                                    // R(A) := not R(B)
  Len,                                    // R(A) := length of R(B)
  Concat,                                 // R(A) := R(B).. ... ..R(C)
  #[strum(serialize = "jmp")]
  Jmp,                                    // pc += sBx
  #[strum(serialize = "EQ")]
  Eq,                                     // if ((RK(B) == RK(C)) ~= A) then pc++
  #[strum(serialize = "LT")]
  Lt,                                     // if ((RK(B) <  RK(C)) ~= A) then pc++
  #[strum(serialize = "LE")]
  Le,                                     // if ((RK(B) <= RK(C)) ~= A) then pc++
  Test,                                   // if not (R(A) <=> C) then pc++
  TestSet,                                // if (R(B) <=> C) then R(A) := R(B) else pc++
  Call,
  TailCall,
  Return,
  ForLoop,
  ForPrep,
  TForLoop,
  SetList,
  Close,
  Closure,
  #[strum(serialize = "VARarg")]
  VarArg,
  // Opcode 37
}

/// The seven operand layouts. The digit `0` marks a field that must be zero.
#[derive(StrumDisplay, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Scheme {
  ABC,
  AB0C,
  ABC0,
  AB0C0,
  ABx,
  AsBx,
  A0sBx,
}

impl Scheme {
  /// Number of operands written on a mnemonic line.
  pub fn arity(&self) -> usize {
    match self {
      Scheme::ABC => 3,
      Scheme::AB0C | Scheme::ABC0 | Scheme::ABx | Scheme::AsBx => 2,
      Scheme::AB0C0 | Scheme::A0sBx => 1,
    }
  }
}

impl Opcode {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  pub fn name(&self) -> &'static str {
    self.into()
  }

  pub fn scheme(&self) -> Scheme {
    use Opcode::*;
    match self {
      LoadBool | GetTable | SetTable | NewTable | SelfCall
      | Add | Sub | Mul | Div | Mod | Pow | Concat
      | Eq | Lt | Le | TestSet | Call | SetList          => Scheme::ABC,

      Test | TForLoop                                    => Scheme::AB0C,

      Move | LoadNil | GetUpval | SetUpval | Unm | Not | Len
      | TailCall | Return | VarArg                       => Scheme::ABC0,

      Close                                              => Scheme::AB0C0,

      LoadK | GetGlobal | SetGlobal | Closure            => Scheme::ABx,

      ForLoop | ForPrep                                  => Scheme::AsBx,

      Jmp                                                => Scheme::A0sBx,
    }
  }

  /// Whether operand `B` may name a constant.
  pub fn b_is_rk(&self) -> bool {
    use Opcode::*;
    match self {
      SetTable | Add | Sub | Mul | Div | Mod | Pow | Eq | Lt | Le => true,
      _ => false
    }
  }

  /// Whether operand `C` may name a constant.
  pub fn c_is_rk(&self) -> bool {
    use Opcode::*;
    match self {
      GetTable | SetTable | SelfCall | Add | Sub | Mul | Div | Mod | Pow | Eq | Lt | Le => true,
      _ => false
    }
  }

  /// Comparisons and tests skip the following instruction, which is always a jump.
  pub fn is_conditional(&self) -> bool {
    use Opcode::*;
    match self {
      Eq | Lt | Le | Test | TestSet => true,
      _ => false
    }
  }

  /// A one line description of the operation, as in the reference `lopcodes.h`.
  pub fn summary(&self) -> &'static str {
    use Opcode::*;
    match self {
      Move      => "R(A) := R(B)",
      LoadK     => "R(A) := Kst(Bx)",
      LoadBool  => "R(A) := (Bool)B; if (C) pc++",
      LoadNil   => "R(A) := ... := R(B) := nil",
      GetUpval  => "R(A) := UpValue[B]",
      GetGlobal => "R(A) := Gbl[Kst(Bx)]",
      GetTable  => "R(A) := R(B)[RK(C)]",
      SetGlobal => "Gbl[Kst(Bx)] := R(A)",
      SetUpval  => "UpValue[B] := R(A)",
      SetTable  => "R(A)[RK(B)] := RK(C)",
      NewTable  => "R(A) := {} (size = B,C)",
      SelfCall  => "R(A+1) := R(B); R(A) := R(B)[RK(C)]",
      Add       => "R(A) := RK(B) + RK(C)",
      Sub       => "R(A) := RK(B) - RK(C)",
      Mul       => "R(A) := RK(B) * RK(C)",
      Div       => "R(A) := RK(B) / RK(C)",
      Mod       => "R(A) := RK(B) % RK(C)",
      Pow       => "R(A) := RK(B) ^ RK(C)",
      Unm       => "R(A) := -R(B)",
      Not       => "R(A) := not R(B)",
      Len       => "R(A) := length of R(B)",
      Concat    => "R(A) := R(B).. ... ..R(C)",
      Jmp       => "pc += sBx",
      Eq        => "if ((RK(B) == RK(C)) ~= A) then pc++",
      Lt        => "if ((RK(B) <  RK(C)) ~= A) then pc++",
      Le        => "if ((RK(B) <= RK(C)) ~= A) then pc++",
      Test      => "if not (R(A) <=> C) then pc++",
      TestSet   => "if (R(B) <=> C) then R(A) := R(B) else pc++",
      Call      => "R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))",
      TailCall  => "return R(A)(R(A+1), ... ,R(A+B-1))",
      Return    => "return R(A), ... ,R(A+B-2)",
      ForLoop   => "R(A) += R(A+2); if R(A) <?= R(A+1) then { pc += sBx; R(A+3) = R(A) }",
      ForPrep   => "R(A) -= R(A+2); pc += sBx",
      TForLoop  => "R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2)); if R(A+3) ~= nil then R(A+2) = R(A+3) else pc++",
      SetList   => "R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B",
      Close     => "close all variables in the stack up to (>=) R(A)",
      Closure   => "R(A) := closure(KPROTO[Bx], R(A), ... ,R(A+n))",
      VarArg    => "R(A), R(A+1), ..., R(A+B-1) = vararg",
    }
  }
}

lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

/// The opcode catalogue as a table of number, mnemonic, operand scheme and effect.
pub fn catalogue() -> Table {
  let mut table = Table::new();
  table.set_format(*TABLE_DISPLAY_FORMAT);
  table.set_titles(row![ubr->"#", ubl->"Mnemonic", ubl->"Scheme", ubl->"Effect"]);
  for opcode in Opcode::iter() {
    table.add_row(row![r->opcode.code(), opcode.name(), opcode.scheme(), opcode.summary()]);
  }
  table
}
