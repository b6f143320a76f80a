//! Code generation support: the output sink, the data section, label
//! allocation and the instruction tables used by the parser.
//!
//! The generated code is a simple accumulator machine. Integers live in
//! `EAX`, string pointers in `RAX`, floats in `XMM0` and booleans in `AL`.
//! The left operand of a binary expression is parked on the stack while the
//! right one is computed, then restored into `RBX` or `XMM1`.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use log::debug;
use snafu::ResultExt;

use crate::error::{CompileResult, IoSnafu};
use crate::tokenizer::Symbol;
use crate::ty::ValueType;

/// Destination for emitted assembly, one line at a time.
pub trait Emitter {
  fn emit_line(&mut self, line: &str) -> CompileResult<()>;

  /// Called once after the last line has been emitted.
  fn finish(&mut self) -> CompileResult<()> {
    Ok(())
  }

  /// Emit an indented instruction.
  fn instruction(&mut self, text: &str) -> CompileResult<()> {
    self.emit_line(&format!("  {text}"))
  }

  /// Emit a label definition.
  fn label(&mut self, name: &str) -> CompileResult<()> {
    self.emit_line(&format!("{name}:"))
  }

  /// Emit a directive at column zero.
  fn directive(&mut self, text: &str) -> CompileResult<()> {
    self.emit_line(text)
  }
}

impl Emitter for String {
  fn emit_line(&mut self, line: &str) -> CompileResult<()> {
    self.push_str(line);
    self.push('\n');
    Ok(())
  }
}

impl Emitter for Vec<String> {
  fn emit_line(&mut self, line: &str) -> CompileResult<()> {
    self.push(line.to_string());
    Ok(())
  }
}

impl<E: Emitter + ?Sized> Emitter for &mut E {
  fn emit_line(&mut self, line: &str) -> CompileResult<()> {
    (**self).emit_line(line)
  }

  fn finish(&mut self) -> CompileResult<()> {
    (**self).finish()
  }
}

/// Streams lines into any writer, e.g. stdout or a file.
pub struct WriteSink<W: Write> {
  writer: W,
}

impl<W: Write> WriteSink<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

impl<W: Write> Emitter for WriteSink<W> {
  fn emit_line(&mut self, line: &str) -> CompileResult<()> {
    writeln!(self.writer, "{line}").context(IoSnafu)
  }

  fn finish(&mut self) -> CompileResult<()> {
    self.writer.flush().context(IoSnafu)
  }
}

/// Global label counter shared by jump targets and constant names.
#[derive(Debug, Default)]
pub struct Labels {
  index: u32,
}

impl Labels {
  pub fn next(&mut self, prefix: &str) -> String {
    self.index += 1;
    format!("{prefix}_{}", self.index)
  }

  /// Number of names handed out so far.
  pub fn count(&self) -> u32 {
    self.index
  }
}

/// Everything that ends up in `section .data`, in first-registration order.
#[derive(Debug, Default)]
pub struct DataSection {
  entries: Vec<String>,
  seen: HashSet<String>,
  strings: HashMap<String, String>,
  floats: HashMap<u64, String>,
}

impl DataSection {
  /// Register a declaration line; duplicates are ignored.
  pub fn add(&mut self, entry: impl Into<String>) {
    let entry = entry.into();
    if self.seen.insert(entry.clone()) {
      debug!("data: {entry}");
      self.entries.push(entry);
    }
  }

  /// Declare the storage slot for a variable. Returns the slot name.
  pub fn declare_variable(&mut self, name: char, ty: ValueType) -> String {
    let slot = format!("_{name}");
    if let Some(storage) = ty.storage() {
      self.add(format!("{slot}: {storage}"));
    }
    slot
  }

  /// Label of the interned string constant with this text.
  pub fn string_constant(&mut self, value: &str, labels: &mut Labels) -> String {
    if let Some(name) = self.strings.get(value) {
      return name.clone();
    }
    let name = labels.next("CONST");
    self.add(format!("{name}: db {}, 0", nasm_string(value)));
    self.strings.insert(value.to_string(), name.clone());
    name
  }

  /// Label of the interned float constant with this value.
  pub fn float_constant(&mut self, value: f64, labels: &mut Labels) -> String {
    if let Some(name) = self.floats.get(&value.to_bits()) {
      return name.clone();
    }
    let name = labels.next("FLOAT");
    self.add(format!("{name}: dq {value:?}"));
    self.floats.insert(value.to_bits(), name.clone());
    name
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  /// Emit `section .data` with every entry, or nothing if there are none.
  pub fn emit(&self, out: &mut impl Emitter) -> CompileResult<()> {
    if self.is_empty() {
      return Ok(());
    }
    out.directive("section .data")?;
    for entry in &self.entries {
      out.instruction(entry)?;
    }
    Ok(())
  }
}

/// Render text as a NASM string literal. Plain text goes in double quotes;
/// anything with quotes, backslashes or ASCII control characters uses a
/// backquoted string, which understands C-style escapes.
pub fn nasm_string(value: &str) -> String {
  let plain = !value
    .chars()
    .any(|c| matches!(c, '"' | '`' | '\\') || c.is_ascii_control());
  if plain {
    return format!("\"{value}\"");
  }

  let mut out = String::from("`");
  for c in value.chars() {
    match c {
      '`' => out.push_str("\\`"),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
      c => out.push(c),
    }
  }
  out.push('`');
  out
}

const ARITH_OPCODES: [(Symbol, ValueType, &[&str]); 8] = [
  (Symbol::Plus, ValueType::Int, &["add EAX, EBX"]),
  (Symbol::Star, ValueType::Int, &["imul EAX, EBX"]),
  (Symbol::Minus, ValueType::Int, &["xchg EAX, EBX", "sub EAX, EBX"]),
  (Symbol::Slash, ValueType::Int, &["xchg EAX, EBX", "cdq", "idiv EBX"]),
  (Symbol::Plus, ValueType::Float, &["addsd XMM0, XMM1"]),
  (Symbol::Star, ValueType::Float, &["mulsd XMM0, XMM1"]),
  (Symbol::Minus, ValueType::Float, &["subsd XMM1, XMM0", "movsd XMM0, XMM1"]),
  (Symbol::Slash, ValueType::Float, &["divsd XMM1, XMM0", "movsd XMM0, XMM1"]),
];

const CMP_OPCODES: [(ValueType, &str); 2] = [
  (ValueType::Int, "cmp EBX, EAX"),
  (ValueType::Float, "comisd XMM1, XMM0"),
];

const SET_OPCODES: [(Symbol, ValueType, &str); 12] = [
  (Symbol::Eq, ValueType::Int, "setz"),
  (Symbol::Ne, ValueType::Int, "setnz"),
  (Symbol::Lt, ValueType::Int, "setl"),
  (Symbol::Gt, ValueType::Int, "setg"),
  (Symbol::Le, ValueType::Int, "setle"),
  (Symbol::Ge, ValueType::Int, "setge"),
  (Symbol::Eq, ValueType::Float, "setz"),
  (Symbol::Ne, ValueType::Float, "setnz"),
  (Symbol::Lt, ValueType::Float, "setb"),
  (Symbol::Gt, ValueType::Float, "seta"),
  (Symbol::Le, ValueType::Float, "setbe"),
  (Symbol::Ge, ValueType::Float, "setae"),
];

/// Instructions combining `RBX`/`XMM1` (left) with `EAX`/`XMM0` (right),
/// leaving the result in `EAX`/`XMM0`.
pub fn arith_opcode(op: Symbol, ty: ValueType) -> Option<&'static [&'static str]> {
  ARITH_OPCODES
    .iter()
    .find(|(symbol, operand, _)| *symbol == op && *operand == ty)
    .map(|(_, _, code)| *code)
}

/// Compare instruction setting the flags for `left <op> right`.
pub fn cmp_opcode(ty: ValueType) -> Option<&'static str> {
  CMP_OPCODES
    .iter()
    .find(|(operand, _)| *operand == ty)
    .map(|(_, code)| *code)
}

/// Condition-set instruction turning the flags into 0/1.
pub fn set_opcode(op: Symbol, ty: ValueType) -> Option<&'static str> {
  SET_OPCODES
    .iter()
    .find(|(symbol, operand, _)| *symbol == op && *operand == ty)
    .map(|(_, _, code)| *code)
}
