//! Shared error utilities used across the compilation pipeline.
//!
//! Every failure is fatal: the first error stops compilation and is handed
//! back to the caller. Diagnostics point at the offending byte with a caret,
//! in the style of the chibicc family of compilers.

use std::fmt;

use snafu::Snafu;

use crate::tokenizer::Keyword;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{excerpt} unknown symbol '{symbol}'"))]
  UnknownSymbol { symbol: char, excerpt: Excerpt },

  #[snafu(display("{excerpt} unclosed string literal"))]
  UnclosedStringLiteral { excerpt: Excerpt },

  #[snafu(display("{excerpt} unknown keyword \"{word}\""))]
  UnknownKeyword { word: String, excerpt: Excerpt },

  #[snafu(display("{excerpt} invalid number \"{text}\": {reason}"))]
  InvalidNumber {
    text: String,
    reason: String,
    excerpt: Excerpt,
  },

  #[snafu(display("{excerpt} expected {expected}, but got \"{found}\""))]
  UnexpectedToken {
    expected: String,
    found: String,
    excerpt: Excerpt,
  },

  #[snafu(display("{excerpt} expected keyword \"{expected}\", but got \"{found}\""))]
  MissingExpectedKeyword {
    expected: Keyword,
    found: String,
    excerpt: Excerpt,
  },

  #[snafu(display("{excerpt} type mismatch: {detail} (at \"{found}\")"))]
  TypeMismatch {
    detail: String,
    found: String,
    excerpt: Excerpt,
  },

  #[snafu(display("failed to write assembly: {source}"))]
  Io { source: std::io::Error },
}

/// The source line containing an error, with the column to underline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
  pub line: usize,
  pub column: usize,
  pub text: String,
}

impl Excerpt {
  /// Build an excerpt anchored at a byte offset in the source.
  pub fn at(source: &str, loc: usize) -> Self {
    let mut safe_loc = loc.min(source.len());
    while !source.is_char_boundary(safe_loc) {
      safe_loc -= 1;
    }
    let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |i| safe_loc + i);
    Self {
      line: source[..line_start].matches('\n').count() + 1,
      column: source[line_start..safe_loc].chars().count(),
      text: source[line_start..line_end].trim_end_matches('\r').to_string(),
    }
  }
}

impl fmt::Display for Excerpt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let prefix = format!("{}: '", self.line);
    writeln!(f, "{prefix}{}'", self.text)?;
    write!(
      f,
      "{}^",
      " ".repeat(prefix.chars().count() + self.column)
    )
  }
}
