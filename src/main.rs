use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::debug;
use snafu::{ResultExt, Snafu};
use sslc::{CompileError, Emitter, Lexer, WriteSink};

/// Compile a tiny scripting language to x86-64 NASM assembly.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
  /// Source files, concatenated in order. Reads stdin when none are given.
  files: Vec<PathBuf>,
  /// Write assembly to this file instead of stdout.
  #[arg(short, long)]
  output: Option<PathBuf>,
  /// Print the token stream instead of compiling.
  #[arg(long)]
  tokens_only: bool,
}

#[derive(Debug, Snafu)]
enum CliError {
  #[snafu(display("failed to read {}: {}", path.display(), source))]
  ReadFile { path: PathBuf, source: io::Error },

  #[snafu(display("failed to read stdin: {source}"))]
  ReadStdin { source: io::Error },

  #[snafu(display("failed to create {}: {}", path.display(), source))]
  CreateOutput { path: PathBuf, source: io::Error },

  #[snafu(display("{source}"))]
  Compile { source: CompileError },
}

fn read_source(files: &[PathBuf]) -> Result<String, CliError> {
  let mut source = String::new();
  if files.is_empty() {
    io::stdin()
      .read_to_string(&mut source)
      .context(ReadStdinSnafu)?;
    return Ok(source);
  }

  for path in files {
    debug!("reading {}", path.display());
    let text = fs::read_to_string(path).context(ReadFileSnafu { path: path.clone() })?;
    if !source.is_empty() && !source.ends_with('\n') {
      source.push('\n');
    }
    source.push_str(&text);
  }
  Ok(source)
}

fn dump_tokens(source: &str, sink: &mut impl Emitter) -> Result<(), CompileError> {
  let mut lexer = Lexer::new(source);
  loop {
    let token = lexer.next_token()?;
    sink.emit_line(&token.to_string())?;
    if token.is_eof() {
      return sink.finish();
    }
  }
}

fn emit<W: Write>(cli: &Cli, source: &str, writer: W) -> Result<(), CliError> {
  let mut sink = WriteSink::new(writer);
  if cli.tokens_only {
    return dump_tokens(source, &mut sink).context(CompileSnafu);
  }
  sslc::compile_to(source, sink).context(CompileSnafu)?;
  Ok(())
}

fn run(cli: &Cli) -> Result<(), CliError> {
  let source = read_source(&cli.files)?;
  match &cli.output {
    Some(path) => {
      let file = File::create(path).context(CreateOutputSnafu { path: path.clone() })?;
      emit(cli, &source, BufWriter::new(file))
    }
    None => emit(cli, &source, io::stdout().lock()),
  }
}

fn main() {
  env_logger::init();
  let cli = Cli::parse();

  if let Err(err) = run(&cli) {
    eprintln!("{err}");
    process::exit(-1);
  }
}
