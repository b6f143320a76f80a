//! Lexical analysis: pulls tokens out of the raw program text on demand.
//!
//! The lexer only ever looks one character ahead and never backtracks.
//! Two-character symbols are probed before single-character ones, but the
//! second character is only consumed when the pair is a real symbol.

use std::fmt;

use log::trace;

use crate::error::{
  CompileResult, Excerpt, InvalidNumberSnafu, UnclosedStringLiteralSnafu, UnknownKeywordSnafu,
  UnknownSymbolSnafu,
};
use crate::ty::{ValueType, variable_type};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Const,
  Var,
  Keyword,
  Symbol,
  Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
  If,
  Then,
  Else,
  EndIf,
  For,
  To,
  Step,
  EndFor,
  Print,
  Println,
}

const KEYWORDS: [(&str, Keyword); 10] = [
  ("if", Keyword::If),
  ("then", Keyword::Then),
  ("else", Keyword::Else),
  ("endif", Keyword::EndIf),
  ("for", Keyword::For),
  ("to", Keyword::To),
  ("step", Keyword::Step),
  ("endfor", Keyword::EndFor),
  ("print", Keyword::Print),
  ("println", Keyword::Println),
];

impl Keyword {
  /// Keywords are matched without regard to case.
  pub fn lookup(word: &str) -> Option<Keyword> {
    KEYWORDS
      .iter()
      .find(|(text, _)| text.eq_ignore_ascii_case(word))
      .map(|(_, keyword)| *keyword)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Keyword::If => "if",
      Keyword::Then => "then",
      Keyword::Else => "else",
      Keyword::EndIf => "endif",
      Keyword::For => "for",
      Keyword::To => "to",
      Keyword::Step => "step",
      Keyword::EndFor => "endfor",
      Keyword::Print => "print",
      Keyword::Println => "println",
    }
  }
}

impl fmt::Display for Keyword {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
  Plus,
  Minus,
  Star,
  Slash,
  Assign,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

const TWO_CHAR_SYMBOLS: [(&str, Symbol); 4] = [
  ("==", Symbol::Eq),
  ("!=", Symbol::Ne),
  ("<=", Symbol::Le),
  (">=", Symbol::Ge),
];

impl Symbol {
  fn from_char(c: char) -> Option<Symbol> {
    let symbol = match c {
      '+' => Symbol::Plus,
      '-' => Symbol::Minus,
      '*' => Symbol::Star,
      '/' => Symbol::Slash,
      '=' => Symbol::Assign,
      '<' => Symbol::Lt,
      '>' => Symbol::Gt,
      _ => return None,
    };
    Some(symbol)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Symbol::Plus => "+",
      Symbol::Minus => "-",
      Symbol::Star => "*",
      Symbol::Slash => "/",
      Symbol::Assign => "=",
      Symbol::Eq => "==",
      Symbol::Ne => "!=",
      Symbol::Lt => "<",
      Symbol::Le => "<=",
      Symbol::Gt => ">",
      Symbol::Ge => ">=",
    }
  }

  /// Whether the symbol can join two atoms into an expression.
  pub fn is_operator(self) -> bool {
    self != Symbol::Assign
  }

  pub fn is_relational(self) -> bool {
    matches!(
      self,
      Symbol::Eq | Symbol::Ne | Symbol::Lt | Symbol::Le | Symbol::Gt | Symbol::Ge
    )
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Payload carried by a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
  Int(i32),
  Float(f64),
  Str(String),
  Var(char),
  Keyword(Keyword),
  Symbol(Symbol),
  Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  pub value: TokenValue,
  pub value_type: Option<ValueType>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  fn new(
    kind: TokenKind,
    value: TokenValue,
    value_type: Option<ValueType>,
    loc: usize,
    len: usize,
  ) -> Self {
    Self {
      kind,
      value,
      value_type,
      loc,
      len,
    }
  }

  pub(crate) fn eof(loc: usize) -> Self {
    Self::new(TokenKind::Eof, TokenValue::Eof, None, loc, 0)
  }

  pub fn is_eof(&self) -> bool {
    self.kind == TokenKind::Eof
  }

  pub fn is_keyword(&self, keyword: Keyword) -> bool {
    self.value == TokenValue::Keyword(keyword)
  }

  pub fn symbol(&self) -> Option<Symbol> {
    match self.value {
      TokenValue::Symbol(symbol) => Some(symbol),
      _ => None,
    }
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.value {
      TokenValue::Int(value) => write!(f, "CONST Int {value}"),
      TokenValue::Float(value) => write!(f, "CONST Float {value:?}"),
      TokenValue::Str(value) => write!(f, "CONST Str {value:?}"),
      TokenValue::Var(name) => match self.value_type {
        Some(ty) => write!(f, "VAR {ty} {name}"),
        None => write!(f, "VAR {name}"),
      },
      TokenValue::Keyword(keyword) => write!(f, "KEYWORD {keyword}"),
      TokenValue::Symbol(symbol) => write!(f, "SYMBOL {symbol}"),
      TokenValue::Eof => f.write_str("EOF"),
    }
  }
}

/// Pull-based tokenizer over a borrowed source string.
pub struct Lexer<'a> {
  source: &'a str,
  pos: usize,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Self { source, pos: 0 }
  }

  pub fn source(&self) -> &'a str {
    self.source
  }

  /// Produce the next token. Once the input is exhausted every call returns `Eof`.
  pub fn next_token(&mut self) -> CompileResult<Token> {
    self.skip_blanks();
    let start = self.pos;
    let Some(c) = self.peek() else {
      trace!("token EOF at {start}");
      return Ok(Token::eof(start));
    };

    let token = if c.is_ascii_digit() {
      self.number(start)?
    } else if c.is_ascii_alphabetic() {
      self.word(c, start)?
    } else if c == '"' {
      self.string(start)?
    } else {
      self.symbol(c, start)?
    };
    trace!("token {token} at {start}");
    Ok(token)
  }

  fn peek(&self) -> Option<char> {
    self.source[self.pos..].chars().next()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += c.len_utf8();
    Some(c)
  }

  fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
    while self.peek().is_some_and(&pred) {
      self.bump();
    }
  }

  /// Whitespace and `#` comments, in any interleaving.
  fn skip_blanks(&mut self) {
    loop {
      self.eat_while(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
      if self.peek() != Some('#') {
        break;
      }
      self.eat_while(|c| c != '\n');
    }
  }

  fn number(&mut self, start: usize) -> CompileResult<Token> {
    self.eat_while(|c| c.is_ascii_digit());
    if self.peek() == Some('.') {
      self.bump();
      self.eat_while(|c| c.is_ascii_digit());
      let text = &self.source[start..self.pos];
      let value = text.parse::<f64>().map_err(|err| {
        InvalidNumberSnafu {
          text,
          reason: err.to_string(),
          excerpt: Excerpt::at(self.source, start),
        }
        .build()
      })?;
      if !value.is_finite() {
        return InvalidNumberSnafu {
          text,
          reason: "out of range for a 64-bit float",
          excerpt: Excerpt::at(self.source, start),
        }
        .fail();
      }
      return Ok(self.token(
        TokenKind::Const,
        TokenValue::Float(value),
        Some(ValueType::Float),
        start,
      ));
    }

    let text = &self.source[start..self.pos];
    let value = text.parse::<i32>().map_err(|err| {
      InvalidNumberSnafu {
        text,
        reason: err.to_string(),
        excerpt: Excerpt::at(self.source, start),
      }
      .build()
    })?;
    Ok(self.token(
      TokenKind::Const,
      TokenValue::Int(value),
      Some(ValueType::Int),
      start,
    ))
  }

  /// A lone letter is a variable; a run of letters must be a keyword.
  fn word(&mut self, first: char, start: usize) -> CompileResult<Token> {
    self.pos += first.len_utf8();
    if !self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
      return Ok(self.token(
        TokenKind::Var,
        TokenValue::Var(first),
        Some(variable_type(first)),
        start,
      ));
    }

    self.eat_while(|c| c.is_ascii_alphabetic());
    let word = &self.source[start..self.pos];
    match Keyword::lookup(word) {
      Some(keyword) => Ok(self.token(
        TokenKind::Keyword,
        TokenValue::Keyword(keyword),
        None,
        start,
      )),
      None => UnknownKeywordSnafu {
        word,
        excerpt: Excerpt::at(self.source, start),
      }
      .fail(),
    }
  }

  fn string(&mut self, start: usize) -> CompileResult<Token> {
    self.bump();
    let body_start = self.pos;
    let Some(len) = self.source[body_start..].find('"') else {
      self.pos = self.source.len();
      return UnclosedStringLiteralSnafu {
        excerpt: Excerpt::at(self.source, start),
      }
      .fail();
    };
    let value = self.source[body_start..body_start + len].to_string();
    self.pos = body_start + len + 1;
    Ok(self.token(
      TokenKind::Const,
      TokenValue::Str(value),
      Some(ValueType::Str),
      start,
    ))
  }

  fn symbol(&mut self, c: char, start: usize) -> CompileResult<Token> {
    let rest = &self.source[start..];
    if let Some((text, symbol)) = TWO_CHAR_SYMBOLS
      .into_iter()
      .find(|(text, _)| rest.starts_with(text))
    {
      self.pos += text.len();
      return Ok(self.token(
        TokenKind::Symbol,
        TokenValue::Symbol(symbol),
        None,
        start,
      ));
    }

    self.pos += c.len_utf8();
    match Symbol::from_char(c) {
      Some(symbol) => Ok(self.token(
        TokenKind::Symbol,
        TokenValue::Symbol(symbol),
        None,
        start,
      )),
      None => UnknownSymbolSnafu {
        symbol: c,
        excerpt: Excerpt::at(self.source, start),
      }
      .fail(),
    }
  }

  fn token(
    &self,
    kind: TokenKind,
    value: TokenValue,
    value_type: Option<ValueType>,
    start: usize,
  ) -> Token {
    Token::new(kind, value, value_type, start, self.pos - start)
  }
}

/// Lex the whole input into a vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut lexer = Lexer::new(input);
  let mut tokens = Vec::new();
  loop {
    let token = lexer.next_token()?;
    let done = token.is_eof();
    tokens.push(token);
    if done {
      return Ok(tokens);
    }
  }
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = (token.loc + token.len).min(source.len());
  &source[token.loc.min(end)..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: &Token, source: &str) -> String {
  match token.kind {
    TokenKind::Eof => "EOF".to_string(),
    _ => token_text(token, source).to_string(),
  }
}
