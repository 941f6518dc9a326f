//! Precompile statements.
//!
//! A statement names a callable and the concrete argument types a call should
//! be forced with during image construction, e.g. `Example.hello(string)`.
//! Statements come from two sources: a recorded-statement file (parsed here)
//! and a precompile script executed inside the build session (recorded by
//! [`crate::session`]). The combined set is a union; duplicates collapse.
//!
//! Statements may reference symbols that are not part of the loaded package
//! set. Those are skipped with a warning at compile time rather than failing
//! the build, so optional packages can be referenced defensively.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use mlua::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// The concrete type of a single call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
  Nil,
  Boolean,
  Integer,
  Number,
  String,
  Table,
  Function,
}

impl TypeTag {
  /// Parse a type name as written in a statements file.
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "nil" => Some(TypeTag::Nil),
      "boolean" => Some(TypeTag::Boolean),
      "integer" => Some(TypeTag::Integer),
      "number" => Some(TypeTag::Number),
      "string" => Some(TypeTag::String),
      "table" => Some(TypeTag::Table),
      "function" => Some(TypeTag::Function),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      TypeTag::Nil => "nil",
      TypeTag::Boolean => "boolean",
      TypeTag::Integer => "integer",
      TypeTag::Number => "number",
      TypeTag::String => "string",
      TypeTag::Table => "table",
      TypeTag::Function => "function",
    }
  }

  /// Classify a runtime value. Returns `None` for values whose type cannot be
  /// named in a statement (userdata, threads, ...); calls passing those are
  /// not recordable.
  pub fn of(value: &LuaValue) -> Option<Self> {
    match value {
      LuaValue::Nil => Some(TypeTag::Nil),
      LuaValue::Boolean(_) => Some(TypeTag::Boolean),
      LuaValue::Integer(_) => Some(TypeTag::Integer),
      LuaValue::Number(_) => Some(TypeTag::Number),
      LuaValue::String(_) => Some(TypeTag::String),
      LuaValue::Table(_) => Some(TypeTag::Table),
      LuaValue::Function(_) => Some(TypeTag::Function),
      _ => None,
    }
  }

  /// Produce a synthetic argument of this type, used to force a call.
  pub fn synthesize(&self, lua: &Lua) -> LuaResult<LuaValue> {
    Ok(match self {
      TypeTag::Nil => LuaValue::Nil,
      TypeTag::Boolean => LuaValue::Boolean(false),
      TypeTag::Integer => LuaValue::Integer(0),
      TypeTag::Number => LuaValue::Number(0.0),
      TypeTag::String => LuaValue::String(lua.create_string("")?),
      TypeTag::Table => LuaValue::Table(lua.create_table()?),
      TypeTag::Function => LuaValue::Function(lua.create_function(|_, ()| Ok(()))?),
    })
  }
}

impl std::fmt::Display for TypeTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A (callable, argument-type-signature) pair to force during the build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Statement {
  /// Dotted path to the callable, rooted at a loaded package or a global.
  pub callable: String,
  /// Concrete argument types, in call order.
  pub arg_types: Vec<TypeTag>,
}

impl Statement {
  pub fn new(callable: impl Into<String>, arg_types: Vec<TypeTag>) -> Self {
    Self {
      callable: callable.into(),
      arg_types,
    }
  }
}

impl std::fmt::Display for Statement {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let types: Vec<&str> = self.arg_types.iter().map(TypeTag::as_str).collect();
    write!(f, "{}({})", self.callable, types.join(", "))
  }
}

/// Errors that make an entire collection source unusable.
#[derive(Debug, Error)]
pub enum CollectError {
  /// The statements file could not be read at all.
  #[error("cannot read statements file '{path}': {source}")]
  File {
    path: String,
    #[source]
    source: io::Error,
  },

  /// The precompile script raised an error; everything it recorded is
  /// discarded.
  #[error("precompile script '{path}' failed: {message}")]
  Script { path: String, message: String },
}

/// Why a single statement line was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("expected 'Callable(type, ...)'")]
  Syntax,

  #[error("invalid callable path '{0}'")]
  BadCallable(String),

  #[error("unknown argument type '{0}'")]
  UnknownType(String),
}

/// Parse a single statement line, e.g. `Example.hello(string, integer)`.
pub fn parse_line(line: &str) -> Result<Statement, ParseError> {
  let line = line.trim();

  let open = line.find('(').ok_or(ParseError::Syntax)?;
  if !line.ends_with(')') {
    return Err(ParseError::Syntax);
  }

  let callable = line[..open].trim();
  if callable.is_empty() || !callable.split('.').all(is_identifier) {
    return Err(ParseError::BadCallable(callable.to_string()));
  }

  let args = line[open + 1..line.len() - 1].trim();
  let arg_types = if args.is_empty() {
    Vec::new()
  } else {
    args
      .split(',')
      .map(|part| {
        let part = part.trim();
        TypeTag::parse(part).ok_or_else(|| ParseError::UnknownType(part.to_string()))
      })
      .collect::<Result<Vec<_>, _>>()?
  };

  Ok(Statement::new(callable, arg_types))
}

fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Collect statements from a recorded-statement file.
///
/// Blank lines and `#` comments are ignored. Malformed lines are skipped with
/// a warning; only a file that cannot be read at all is fatal.
pub fn collect_file(path: &Path) -> Result<BTreeSet<Statement>, CollectError> {
  let content = fs::read_to_string(path).map_err(|e| CollectError::File {
    path: path.display().to_string(),
    source: e,
  })?;

  let mut statements = BTreeSet::new();
  for (lineno, line) in content.lines().enumerate() {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    match parse_line(trimmed) {
      Ok(statement) => {
        statements.insert(statement);
      }
      Err(e) => {
        warn!(
          path = %path.display(),
          line = lineno + 1,
          error = %e,
          "skipping malformed precompile statement"
        );
      }
    }
  }

  debug!(path = %path.display(), count = statements.len(), "collected statements from file");

  Ok(statements)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  mod parsing {
    use super::*;

    #[test]
    fn simple_statement() {
      let s = parse_line("Example.hello(string)").unwrap();
      assert_eq!(s.callable, "Example.hello");
      assert_eq!(s.arg_types, vec![TypeTag::String]);
    }

    #[test]
    fn multiple_args_and_whitespace() {
      let s = parse_line("  M.f( string , integer,table )  ").unwrap();
      assert_eq!(s.arg_types, vec![TypeTag::String, TypeTag::Integer, TypeTag::Table]);
    }

    #[test]
    fn zero_arg_statement() {
      let s = parse_line("init()").unwrap();
      assert_eq!(s.callable, "init");
      assert!(s.arg_types.is_empty());
    }

    #[test]
    fn deep_callable_path() {
      let s = parse_line("A.b.c_d(nil)").unwrap();
      assert_eq!(s.callable, "A.b.c_d");
    }

    #[test]
    fn missing_parens_fails() {
      assert_eq!(parse_line("Example.hello"), Err(ParseError::Syntax));
    }

    #[test]
    fn unknown_type_fails() {
      assert_eq!(
        parse_line("f(strang)"),
        Err(ParseError::UnknownType("strang".to_string()))
      );
    }

    #[test]
    fn bad_callable_fails() {
      assert!(matches!(parse_line("1bad(string)"), Err(ParseError::BadCallable(_))));
      assert!(matches!(parse_line("a..b(string)"), Err(ParseError::BadCallable(_))));
      assert!(matches!(parse_line("(string)"), Err(ParseError::BadCallable(_))));
    }

    #[test]
    fn display_roundtrip() {
      let s = parse_line("Example.hello(string, integer)").unwrap();
      assert_eq!(parse_line(&s.to_string()).unwrap(), s);
    }
  }

  mod file_collection {
    use super::*;
    use std::fs;

    #[test]
    fn collects_and_deduplicates() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("statements.txt");
      fs::write(
        &path,
        "# warm-up calls\n\
         Example.hello(string)\n\
         \n\
         Example.hello(string)\n\
         Example.hello(integer)\n",
      )
      .unwrap();

      let set = collect_file(&path).unwrap();
      assert_eq!(set.len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("statements.txt");
      fs::write(&path, "not a statement\nExample.hello(string)\nf(bogus_type)\n").unwrap();

      let set = collect_file(&path).unwrap();
      assert_eq!(set.len(), 1);
      assert!(set.contains(&Statement::new("Example.hello", vec![TypeTag::String])));
    }

    #[test]
    fn unreadable_file_is_fatal() {
      let temp = TempDir::new().unwrap();
      let result = collect_file(&temp.path().join("missing.txt"));
      assert!(matches!(result, Err(CollectError::File { .. })));
    }
  }

  mod type_tags {
    use super::*;

    #[test]
    fn parse_and_as_str_are_inverse() {
      for name in ["nil", "boolean", "integer", "number", "string", "table", "function"] {
        assert_eq!(TypeTag::parse(name).unwrap().as_str(), name);
      }
    }

    #[test]
    fn synthesized_values_classify_back() {
      let lua = Lua::new();
      for tag in [
        TypeTag::Nil,
        TypeTag::Boolean,
        TypeTag::Integer,
        TypeTag::Number,
        TypeTag::String,
        TypeTag::Table,
        TypeTag::Function,
      ] {
        let value = tag.synthesize(&lua).unwrap();
        assert_eq!(TypeTag::of(&value), Some(tag));
      }
    }
  }
}
