//! Recursive-descent parser that type-checks and emits code as it goes.
//!
//! There is no syntax tree: each production writes its instructions to the
//! output sink the moment it is recognised. The grammar is small enough that
//! one token of lookahead decides every branch:
//!
//! ```text
//! program    := statement*
//! statement  := assignment | if | for | print
//! assignment := VAR '=' expr
//! if         := IF expr THEN statement* (ELSE statement*)? ENDIF
//! for        := FOR VAR '=' expr TO expr statement* ENDFOR
//! print      := (PRINT | PRINTLN) expr
//! expr       := atom (OPERATOR atom)?
//! atom       := CONST | VAR
//! ```

use log::{debug, info};

use crate::codegen::{DataSection, Emitter, Labels, arith_opcode, cmp_opcode, set_opcode};
use crate::error::{
  CompileError, CompileResult, Excerpt, MissingExpectedKeywordSnafu, TypeMismatchSnafu,
  UnexpectedTokenSnafu,
};
use crate::tokenizer::{Keyword, Lexer, Symbol, Token, TokenValue, describe_token};
use crate::ty::{ValueType, variable_type};

/// Single-pass compiler state for one program.
pub struct Parser<'a, E: Emitter> {
  lexer: Lexer<'a>,
  token: Token,
  out: E,
  data: DataSection,
  labels: Labels,
}

impl<'a, E: Emitter> Parser<'a, E> {
  pub fn new(source: &'a str, out: E) -> Self {
    Self {
      lexer: Lexer::new(source),
      token: Token::eof(0),
      out,
      data: DataSection::default(),
      labels: Labels::default(),
    }
  }

  /// Compile the whole program, handing the sink back on success.
  ///
  /// Lines already written to the sink stay there when an error is returned.
  pub fn parse(mut self) -> CompileResult<E> {
    self.out.directive("global main")?;
    self.out.directive("section .text")?;
    self.out.label("main")?;
    self.advance()?;

    self.statements(&[])?;

    self.out.instruction("extern exit")?;
    self.out.instruction("mov RCX, 0")?;
    self.out.instruction("call exit")?;
    self.data.emit(&mut self.out)?;
    self.out.finish()?;

    info!(
      "compiled {} bytes of source: {} data entries, {} labels",
      self.lexer.source().len(),
      self.data.entries().len(),
      self.labels.count()
    );
    Ok(self.out)
  }

  fn advance(&mut self) -> CompileResult<()> {
    self.token = self.lexer.next_token()?;
    Ok(())
  }

  /// Parse statements until EOF or one of the terminating keywords.
  fn statements(&mut self, terminators: &[Keyword]) -> CompileResult<()> {
    while !self.token.is_eof()
      && !terminators
        .iter()
        .any(|keyword| self.token.is_keyword(*keyword))
    {
      self.statement()?;
    }
    Ok(())
  }

  fn statement(&mut self) -> CompileResult<()> {
    match self.token.value {
      TokenValue::Var(_) => self.assignment(),
      TokenValue::Keyword(Keyword::If) => self.if_stmt(),
      TokenValue::Keyword(Keyword::For) => self.for_stmt(),
      TokenValue::Keyword(Keyword::Print | Keyword::Println) => self.print_stmt(),
      _ => Err(self.unexpected("a statement")),
    }
  }

  fn assignment(&mut self) -> CompileResult<()> {
    let (slot, ty) = self.variable()?;
    self.expect_symbol(Symbol::Assign)?;

    let start = self.token.clone();
    let expr_ty = self.expr()?;
    if expr_ty != ty {
      return Err(self.mismatch_at(
        &start,
        format!("cannot assign {expr_ty} to {ty} variable {slot}"),
      ));
    }

    let store = match ty {
      ValueType::Int => format!("mov [{slot}], EAX"),
      ValueType::Str => format!("mov [{slot}], RAX"),
      ValueType::Float => format!("movq [{slot}], XMM0"),
      ValueType::Bool => {
        return Err(self.mismatch_at(&start, "Bool values cannot be stored"));
      }
    };
    self.out.instruction(&store)
  }

  fn if_stmt(&mut self) -> CompileResult<()> {
    self.expect_keyword(Keyword::If)?;
    let else_label = self.labels.next("else");
    let endif_label = self.labels.next("endif");
    debug!("if: {else_label}, {endif_label}");

    let start = self.token.clone();
    let cond_ty = self.expr()?;
    if cond_ty != ValueType::Bool {
      return Err(self.mismatch_at(
        &start,
        format!("if condition must be Bool, was {cond_ty}"),
      ));
    }
    self.expect_keyword(Keyword::Then)?;

    self.out.instruction("cmp AL, 0")?;
    self.out.instruction(&format!("jz {else_label}"))?;

    self.statements(&[Keyword::Else, Keyword::EndIf])?;
    let has_else = self.token.is_keyword(Keyword::Else);
    if has_else {
      self.out.instruction(&format!("jmp {endif_label}"))?;
    }
    self.out.label(&else_label)?;

    if has_else {
      self.advance()?;
      self.statements(&[Keyword::EndIf])?;
    }
    self.expect_keyword(Keyword::EndIf)?;
    self.out.label(&endif_label)
  }

  fn for_stmt(&mut self) -> CompileResult<()> {
    self.expect_keyword(Keyword::For)?;

    let TokenValue::Var(name) = self.token.value else {
      return Err(self.unexpected("a loop variable"));
    };
    let var_ty = variable_type(name);
    if var_ty != ValueType::Int {
      return Err(self.mismatch(format!(
        "for variable '{name}' must be Int, was {var_ty}"
      )));
    }
    let (slot, _) = self.variable()?;
    self.expect_symbol(Symbol::Assign)?;

    let start = self.token.clone();
    let from_ty = self.expr()?;
    if from_ty != ValueType::Int {
      return Err(self.mismatch_at(
        &start,
        format!("for start value must be Int, was {from_ty}"),
      ));
    }
    self.out.instruction(&format!("mov [{slot}], EAX"))?;
    self.expect_keyword(Keyword::To)?;

    let top_label = self.labels.next("for");
    let end_label = self.labels.next("endfor");
    debug!("for {slot}: {top_label}, {end_label}");
    self.out.label(&top_label)?;

    // The bound is evaluated again on every iteration.
    let bound = self.token.clone();
    let to_ty = self.expr()?;
    if to_ty != ValueType::Int {
      return Err(self.mismatch_at(
        &bound,
        format!("for end value must be Int, was {to_ty}"),
      ));
    }
    self.out.instruction(&format!("cmp [{slot}], EAX"))?;
    self.out.instruction(&format!("jge {end_label}"))?;

    self.statements(&[Keyword::EndFor])?;
    self.expect_keyword(Keyword::EndFor)?;

    self.out.instruction(&format!("inc DWORD [{slot}]"))?;
    self.out.instruction(&format!("jmp {top_label}"))?;
    self.out.label(&end_label)
  }

  fn print_stmt(&mut self) -> CompileResult<()> {
    let newline = self.token.is_keyword(Keyword::Println);
    self.advance()?;
    let ty = self.expr()?;

    match ty {
      ValueType::Int => {
        // println folds the newline into the format string.
        let format = if newline {
          self.format_string("INT_NL_FMT", "'%d', 10")
        } else {
          self.format_string("INT_FMT", "'%d'")
        };
        self.out.instruction(&format!("mov RCX, {format}"))?;
        self.out.instruction("mov EDX, EAX")?;
      }
      ValueType::Float => {
        let format = self.format_string("FLOAT_FMT", "'%.16g'");
        self.out.instruction(&format!("mov RCX, {format}"))?;
        self.out.instruction("movq RDX, XMM0")?;
      }
      ValueType::Str => {
        let format = self.format_string("STR_FMT", "'%s'");
        self.out.instruction(&format!("mov RCX, {format}"))?;
        self.out.instruction("mov RDX, RAX")?;
      }
      ValueType::Bool => {
        let format = self.format_string("STR_FMT", "'%s'");
        let yes = self.format_string("TRUE", "'true'");
        let no = self.format_string("FALSE", "'false'");
        self.out.instruction("cmp AL, 1")?;
        self.out.instruction(&format!("mov RCX, {format}"))?;
        self.out.instruction(&format!("mov RDX, {no}"))?;
        self.out.instruction(&format!("mov R8, {yes}"))?;
        self.out.instruction("cmovz RDX, R8")?;
      }
    }

    self.out.instruction("sub RSP, 0x20")?;
    self.out.instruction("extern printf")?;
    self.out.instruction("call printf")?;
    if newline && ty != ValueType::Int {
      self.out.instruction("extern putchar")?;
      self.out.instruction("mov RCX, 10")?;
      self.out.instruction("call putchar")?;
    }
    self.out.instruction("add RSP, 0x20")
  }

  /// Register a zero-terminated string under a fixed name.
  fn format_string(&mut self, name: &'static str, body: &str) -> &'static str {
    self.data.add(format!("{name}: db {body}, 0"));
    name
  }

  /// Evaluate an atom, or two atoms joined by one operator, into the
  /// accumulator for the resulting type.
  fn expr(&mut self) -> CompileResult<ValueType> {
    let left = self.atom()?;
    let Some(op) = self.token.symbol().filter(|symbol| symbol.is_operator()) else {
      return Ok(left);
    };
    let op_token = self.token.clone();

    if left == ValueType::Float {
      self.out.instruction("sub RSP, 0x08")?;
      self.out.instruction("movq [RSP], XMM0")?;
    } else {
      self.out.instruction("push RAX")?;
    }
    self.advance()?;

    let right_token = self.token.clone();
    let right = self.atom()?;
    if left != right {
      return Err(self.mismatch_at(
        &right_token,
        format!("cannot apply '{op}' to {left} and {right}"),
      ));
    }

    if left == ValueType::Float {
      self.out.instruction("movq XMM1, [RSP]")?;
      self.out.instruction("add RSP, 0x08")?;
    } else {
      self.out.instruction("pop RBX")?;
    }

    if let Some(code) = arith_opcode(op, left) {
      for line in code {
        self.out.instruction(line)?;
      }
      return Ok(left);
    }
    if op.is_relational()
      && let (Some(cmp), Some(set)) = (cmp_opcode(left), set_opcode(op, left))
    {
      self.out.instruction(cmp)?;
      self.out.instruction(&format!("{set} AL"))?;
      return Ok(ValueType::Bool);
    }
    Err(self.mismatch_at(
      &op_token,
      format!("operator '{op}' is not defined for {left}"),
    ))
  }

  fn atom(&mut self) -> CompileResult<ValueType> {
    match self.token.value.clone() {
      TokenValue::Int(value) => {
        self.out.instruction(&format!("mov EAX, {value}"))?;
        self.advance()?;
        Ok(ValueType::Int)
      }
      TokenValue::Float(value) => {
        let name = self.data.float_constant(value, &mut self.labels);
        self.out.instruction(&format!("movq XMM0, [{name}]"))?;
        self.advance()?;
        Ok(ValueType::Float)
      }
      TokenValue::Str(value) => {
        let name = self.data.string_constant(&value, &mut self.labels);
        self.out.instruction(&format!("mov RAX, {name}"))?;
        self.advance()?;
        Ok(ValueType::Str)
      }
      TokenValue::Var(_) => {
        let (slot, ty) = self.variable()?;
        let load = match ty {
          ValueType::Float => format!("movq XMM0, [{slot}]"),
          ValueType::Str => format!("mov RAX, [{slot}]"),
          _ => format!("mov EAX, [{slot}]"),
        };
        self.out.instruction(&load)?;
        Ok(ty)
      }
      _ => Err(self.unexpected("a constant or variable")),
    }
  }

  /// Consume a variable token, declaring its storage on first sight.
  fn variable(&mut self) -> CompileResult<(String, ValueType)> {
    let TokenValue::Var(name) = self.token.value else {
      return Err(self.unexpected("a variable"));
    };
    let ty = variable_type(name);
    let slot = self.data.declare_variable(name, ty);
    self.advance()?;
    Ok((slot, ty))
  }

  fn expect_keyword(&mut self, keyword: Keyword) -> CompileResult<()> {
    if self.token.is_keyword(keyword) {
      return self.advance();
    }
    MissingExpectedKeywordSnafu {
      expected: keyword,
      found: self.found(),
      excerpt: self.excerpt(),
    }
    .fail()
  }

  fn expect_symbol(&mut self, symbol: Symbol) -> CompileResult<()> {
    if self.token.symbol() == Some(symbol) {
      return self.advance();
    }
    Err(self.unexpected(&format!("\"{symbol}\"")))
  }

  fn found(&self) -> String {
    describe_token(&self.token, self.lexer.source())
  }

  fn excerpt(&self) -> Excerpt {
    Excerpt::at(self.lexer.source(), self.token.loc)
  }

  fn unexpected(&self, expected: &str) -> CompileError {
    UnexpectedTokenSnafu {
      expected,
      found: self.found(),
      excerpt: self.excerpt(),
    }
    .build()
  }

  fn mismatch(&self, detail: impl Into<String>) -> CompileError {
    self.mismatch_at(&self.token, detail)
  }

  fn mismatch_at(&self, token: &Token, detail: impl Into<String>) -> CompileError {
    TypeMismatchSnafu {
      detail,
      found: describe_token(token, self.lexer.source()),
      excerpt: Excerpt::at(self.lexer.source(), token.loc),
    }
    .build()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  fn compile(source: &str) -> CompileResult<Vec<String>> {
    Parser::new(source, Vec::new()).parse()
  }

  fn lines(source: &str) -> Vec<String> {
    compile(source).unwrap_or_else(|err| panic!("{source:?} failed:\n{err}"))
  }

  fn contains(code: &[String], line: &str) -> bool {
    code.iter().any(|l| l == line)
  }

  fn data_section(code: &[String]) -> Vec<String> {
    code
      .iter()
      .skip_while(|line| *line != "section .data")
      .skip(1)
      .map(|line| line.trim().to_string())
      .collect()
  }

  #[test]
  fn empty_program() {
    assert_eq!(
      lines(""),
      vec![
        "global main",
        "section .text",
        "main:",
        "  extern exit",
        "  mov RCX, 0",
        "  call exit",
      ]
    );
  }

  #[test]
  fn assign_int() {
    let code = lines("i=3");
    assert!(contains(&code, "  mov EAX, 3"));
    assert!(contains(&code, "  mov [_i], EAX"));
    assert_eq!(data_section(&code), vec!["_i: dd 0"]);
  }

  #[test]
  fn assign_string_and_float() {
    let code = lines("s=\"hi\" a=3.0");
    assert!(contains(&code, "  mov RAX, CONST_1"));
    assert!(contains(&code, "  mov [_s], RAX"));
    assert!(contains(&code, "  movq XMM0, [FLOAT_2]"));
    assert!(contains(&code, "  movq [_a], XMM0"));
    assert_eq!(
      data_section(&code),
      vec![
        "_s: dq 0",
        "CONST_1: db \"hi\", 0",
        "_a: dq 0.0",
        "FLOAT_2: dq 3.0"
      ]
    );
  }

  #[test]
  fn assign_var_reads_slot() {
    let code = lines("i=3 j=i");
    assert!(contains(&code, "  mov EAX, [_i]"));
    assert!(contains(&code, "  mov [_j], EAX"));
  }

  #[test]
  fn int_subtraction_swaps_operands() {
    let code = lines("i=5-2");
    let start = code.iter().position(|l| l == "  mov EAX, 5").unwrap();
    assert_eq!(
      &code[start..start + 6],
      [
        "  mov EAX, 5",
        "  push RAX",
        "  mov EAX, 2",
        "  pop RBX",
        "  xchg EAX, EBX",
        "  sub EAX, EBX",
      ]
    );
  }

  #[test]
  fn float_operands_use_stack_slot() {
    let code = lines("a=1.5/0.5");
    assert!(contains(&code, "  sub RSP, 0x08"));
    assert!(contains(&code, "  movq [RSP], XMM0"));
    assert!(contains(&code, "  movq XMM1, [RSP]"));
    assert!(contains(&code, "  add RSP, 0x08"));
    assert!(contains(&code, "  divsd XMM1, XMM0"));
    assert!(contains(&code, "  movsd XMM0, XMM1"));
  }

  #[test]
  fn float_comparisons_use_unsigned_sets() {
    for (op, set) in [("<", "setb"), ("<=", "setbe"), (">", "seta"), (">=", "setae")] {
      let code = lines(&format!("println 3.0{op}4.0"));
      assert!(contains(&code, "  comisd XMM1, XMM0"), "{op}");
      assert!(contains(&code, &format!("  {set} AL")), "{op}");
    }
  }

  #[test]
  fn print_bool_selects_words_without_branching() {
    let code = lines("println 3==3");
    assert!(contains(&code, "  cmp EBX, EAX"));
    assert!(contains(&code, "  setz AL"));
    assert!(contains(&code, "  cmovz RDX, R8"));
    assert!(contains(&code, "  call putchar"));
    assert!(!code.iter().any(|l| l.trim_start().starts_with("jz")));
    assert_eq!(
      data_section(&code),
      vec![
        "STR_FMT: db '%s', 0",
        "TRUE: db 'true', 0",
        "FALSE: db 'false', 0"
      ]
    );
  }

  #[test]
  fn print_formats_by_type() {
    let code = lines("print 1 println 2 print 1.5 print \"s\"");
    let data = data_section(&code);
    assert!(data.contains(&"INT_FMT: db '%d', 0".to_string()));
    assert!(data.contains(&"INT_NL_FMT: db '%d', 10, 0".to_string()));
    assert!(data.contains(&"FLOAT_FMT: db '%.16g', 0".to_string()));
    assert!(data.contains(&"STR_FMT: db '%s', 0".to_string()));
    assert!(contains(&code, "  movq RDX, XMM0"));
    assert!(!contains(&code, "  call putchar"));
  }

  #[test]
  fn println_string_adds_newline() {
    let code = lines("println \"hi\"");
    let call = code.iter().position(|l| l == "  call printf").unwrap();
    assert_eq!(
      &code[call + 1..call + 5],
      [
        "  extern putchar",
        "  mov RCX, 10",
        "  call putchar",
        "  add RSP, 0x20"
      ]
    );
  }

  #[test]
  fn if_else_layout() {
    let code = lines("if 1==1 then println 1 else println 2 endif");
    let body: Vec<_> = code
      .iter()
      .filter(|l| l.ends_with(':') || l.contains("jz") || l.contains("jmp"))
      .cloned()
      .collect();
    assert_eq!(
      body,
      vec!["main:", "  jz else_1", "  jmp endif_2", "else_1:", "endif_2:"]
    );
  }

  #[test]
  fn if_without_else_still_defines_endif() {
    let code = lines("if 1<2 then endif");
    assert!(contains(&code, "else_1:"));
    assert!(contains(&code, "endif_2:"));
    assert!(!code.iter().any(|l| l.contains("jmp")));
  }

  #[test]
  fn for_loop_layout() {
    let code = lines("for i = 1 to 10 println i endfor");
    let start = code.iter().position(|l| l == "  mov [_i], EAX").unwrap();
    assert_eq!(code[start + 1], "for_1:");
    assert_eq!(code[start + 2], "  mov EAX, 10");
    assert_eq!(code[start + 3], "  cmp [_i], EAX");
    assert_eq!(code[start + 4], "  jge endfor_2");
    let end = code.iter().position(|l| l == "endfor_2:").unwrap();
    assert_eq!(code[end - 2], "  inc DWORD [_i]");
    assert_eq!(code[end - 1], "  jmp for_1");
  }

  #[test]
  fn nested_labels_are_unique() {
    let code = lines(
      "for i = 1 to 3
         for j = i to 3
           if i < j then
             if j == 2 then println j else println i endif
           else
             println \"same\"
           endif
         endfor
       endfor
       if 1.0 == 1.0 then println 1 endif",
    );
    let labels: Vec<_> = code.iter().filter(|l| l.ends_with(':')).collect();
    let unique: HashSet<_> = labels.iter().collect();
    assert_eq!(labels.len(), unique.len());
    assert_eq!(labels.len(), 1 + 2 * 5);
  }

  #[test]
  fn variables_declared_once_in_first_use_order() {
    let code = lines("j=1 i=j i=i+j println i println j");
    assert_eq!(
      data_section(&code),
      vec!["_j: dd 0", "_i: dd 0", "INT_NL_FMT: db '%d', 10, 0"]
    );
  }

  #[test]
  fn variable_case_is_preserved_in_slot() {
    let code = lines("a=1.0 A=2.0");
    assert!(contains(&code, "  movq [_A], XMM0"));
    assert_eq!(
      data_section(&code),
      vec!["_a: dq 0.0", "FLOAT_1: dq 1.0", "_A: dq 0.0", "FLOAT_2: dq 2.0"]
    );
  }

  #[test]
  fn operand_variables_are_declared() {
    let code = lines("println k");
    assert_eq!(
      data_section(&code),
      vec!["_k: dd 0", "INT_NL_FMT: db '%d', 10, 0"]
    );
  }

  #[test]
  fn literals_are_interned() {
    let code = lines("s=\"x\" t=\"x\" u=\"y\" a=1.5 b=1.5 c=2.5");
    assert_eq!(
      data_section(&code)
        .iter()
        .filter(|l| l.starts_with("CONST_") || l.starts_with("FLOAT_"))
        .cloned()
        .collect::<Vec<_>>(),
      vec![
        "CONST_1: db \"x\", 0",
        "CONST_2: db \"y\", 0",
        "FLOAT_3: dq 1.5",
        "FLOAT_4: dq 2.5"
      ]
    );
  }

  #[test]
  fn type_errors() {
    for source in [
      "a = \"x\"",
      "i = 1.5",
      "s = 3",
      "i = 1 + 1.0",
      "s = \"a\" + \"b\"",
      "if 1 then endif",
      "for a = 1 to 2 endfor",
      "for i = 1.0 to 2 endfor",
      "for i = 1 to \"x\" endfor",
      "i = 1 < 2",
    ] {
      let err = compile(source).unwrap_err();
      assert!(
        matches!(err, CompileError::TypeMismatch { .. }),
        "{source}: {err}"
      );
    }
  }

  #[test]
  fn missing_keywords() {
    for source in [
      "if 1==1 println 1 endif",
      "if 1==1 then println 1",
      "if 1==1 then println 1 else println 2",
      "for i = 1 10 endfor",
      "for i = 1 to 10 println i",
    ] {
      let err = compile(source).unwrap_err();
      assert!(
        matches!(err, CompileError::MissingExpectedKeyword { .. }),
        "{source}: {err}"
      );
    }
  }

  #[test]
  fn unexpected_tokens() {
    for source in [
      "3",
      "i 3",
      "i = then",
      "endif",
      "for 3 = 1 to 2 endfor",
      "i = 1 = 2",
      "println",
      "step",
    ] {
      let err = compile(source).unwrap_err();
      assert!(
        matches!(err, CompileError::UnexpectedToken { .. }),
        "{source}: {err}"
      );
    }
  }

  #[test]
  fn partial_output_is_kept_on_error() {
    let mut code: Vec<String> = Vec::new();
    let err = Parser::new("i=1 a=\"x\"", &mut code).parse().unwrap_err();
    assert!(matches!(err, CompileError::TypeMismatch { .. }));
    assert!(contains(&code, "  mov [_i], EAX"));
    assert!(!code.iter().any(|l| l == "section .data"));
  }
}
