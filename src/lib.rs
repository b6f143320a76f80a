//! Crate root: wires together the compilation pipeline.
//!
//! Compilation is a single pass with no syntax tree in between:
//! - `tokenizer` hands out tokens one at a time on request.
//! - `parser` recognises statements, checks types and emits code as it goes.
//! - `codegen` holds the output sink, data section, labels and opcode tables.
//! - `ty` knows the value types and how a variable's letter decides its type.
//! - `error` defines the single error type every stage reports through.

pub mod codegen;
pub mod error;
pub mod parser;
pub mod tokenizer;
pub mod ty;

pub use codegen::{Emitter, WriteSink};
pub use error::{CompileError, CompileResult};
pub use parser::Parser;
pub use tokenizer::{Lexer, Token, tokenize};

/// Compile a source string into NASM assembly text.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  compile_to(source, String::new())
}

/// Compile a source string into assembly, one element per line.
pub fn compile_lines(source: &str) -> CompileResult<Vec<String>> {
  compile_to(source, Vec::new())
}

/// Compile into any sink. Lines are emitted while parsing, so on error the
/// sink may already hold a prefix of the program.
pub fn compile_to<E: Emitter>(source: &str, emitter: E) -> CompileResult<E> {
  Parser::new(source, emitter).parse()
}
