use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{info, Level};

use luasm::{assemble, bytecode, disassemble, Error, Options};

/// Lua 5.1 bytecode disassembler and assembler
#[derive(Parser)]
#[command(name = "luasm", version)]
struct Cli {
  /// Enable debug logging
  #[arg(long, global = true)]
  debug: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Write the assembly listing of a binary chunk
  Disasm(DisasmArgs),
  /// Assemble a listing into a binary chunk
  Asm(AsmArgs),
  /// Print the opcode catalogue
  Opcodes,
}

#[derive(clap::Args, Debug)]
struct DisasmArgs {
  /// Binary chunk to read
  input: PathBuf,

  /// Listing to write, `-` for standard output (defaults to the input with `.asm`)
  output: Option<PathBuf>,

  /// Declare constants, needed to assemble the listing again
  #[arg(short = 'c', long)]
  constants: bool,

  /// Prefix instructions with their file offset and raw word
  #[arg(short = 'x', long)]
  hex: bool,

  /// Only the indented readable form
  #[arg(short = 'C', long)]
  concise: bool,

  /// Dump the reconstructed blocks as comments
  #[arg(short = 'd', long)]
  diagnostics: bool,
}

impl DisasmArgs {
  fn options(&self) -> Options {
    Options {
      constants: self.constants,
      hex: self.hex,
      concise: self.concise,
      diagnostics: self.diagnostics,
    }
  }
}

#[derive(clap::Args, Debug)]
struct AsmArgs {
  /// Listing to read
  input: PathBuf,

  /// Binary chunk to write (defaults to the input with `.lu`)
  output: Option<PathBuf>,
}

fn init_tracing(level: Level) {
  let _ = tracing_subscriber::fmt()
    .without_time()
    .with_target(false)
    .with_max_level(level)
    .try_init();
}

fn output_path(input: &Path, output: &Option<PathBuf>, extension: &str) -> PathBuf {
  match output {
    Some(path) => path.clone(),
    None => input.with_extension(extension)
  }
}

fn run(command: Command) -> Result<(), Error> {
  match command {
    Command::Disasm(args) => {
      let bytes = fs::read(&args.input)?;
      let text = disassemble(&bytes, &args.options())?;
      match &args.output {
        Some(path) if path.as_os_str() == "-" => io::stdout().write_all(text.as_bytes())?,
        output => {
          let path = output_path(&args.input, output, "asm");
          fs::write(&path, text)?;
          info!("wrote {}", path.display());
        }
      }
    }

    Command::Asm(args) => {
      let text = fs::read_to_string(&args.input)?;
      let bytes = assemble(&text)?;
      let path = output_path(&args.input, &args.output, "lu");
      fs::write(&path, bytes)?;
      info!("wrote {}", path.display());
    }

    Command::Opcodes => {
      bytecode::catalogue().printstd();
    }
  }
  Ok(())
}

fn main() {
  let cli = Cli::parse();
  init_tracing(if cli.debug { Level::DEBUG } else { Level::INFO });

  if let Err(e) = run(cli.command) {
    eprintln!("Error: {}", e);
    process::exit(1);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_disasm_flags() {
    let cli = Cli::try_parse_from(["luasm", "--debug", "disasm", "in.lu", "-", "-c", "-x"]).unwrap();
    assert!(cli.debug);
    match cli.command {
      Command::Disasm(args) => {
        assert_eq!(args.output, Some(PathBuf::from("-")));
        assert_eq!(args.options(), Options { constants: true, hex: true, ..Options::default() });
      }
      _ => panic!("expected disasm")
    }
  }

  #[test]
  fn default_output_paths() {
    assert_eq!(output_path(Path::new("dir/a.lu"), &None, "asm"), PathBuf::from("dir/a.asm"));
    assert_eq!(output_path(Path::new("a.asm"), &None, "lu"), PathBuf::from("a.lu"));
    let explicit = Some(PathBuf::from("b.out"));
    assert_eq!(output_path(Path::new("a.asm"), &explicit, "lu"), PathBuf::from("b.out"));
  }
}
