use std::fmt;

/// The four kinds of values a program can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
  Int,
  Float,
  Str,
  Bool,
}

impl ValueType {
  pub fn name(self) -> &'static str {
    match self {
      ValueType::Int => "Int",
      ValueType::Float => "Float",
      ValueType::Str => "Str",
      ValueType::Bool => "Bool",
    }
  }

  /// Data directive for a zero-initialised variable of this type.
  ///
  /// Booleans never live in memory, so they have no storage.
  pub fn storage(self) -> Option<&'static str> {
    match self {
      ValueType::Int => Some("dd 0"),
      ValueType::Float => Some("dq 0.0"),
      ValueType::Str => Some("dq 0"),
      ValueType::Bool => None,
    }
  }
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Type of a variable, decided by its letter alone: `a`..`h` hold floats,
/// `i`..`n` hold integers and every other letter holds a string.
pub fn variable_type(letter: char) -> ValueType {
  match letter.to_ascii_lowercase() {
    'a'..='h' => ValueType::Float,
    'i'..='n' => ValueType::Int,
    _ => ValueType::Str,
  }
}
