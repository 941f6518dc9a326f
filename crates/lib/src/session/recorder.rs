//! Call recording for precompile scripts.
//!
//! While a precompile script runs, every function exported by a loaded
//! package is replaced with a proxy that records the call's argument types
//! before delegating to the original. Calls whose argument types cannot all
//! be named in a statement (userdata, threads) are not recorded.
//!
//! The proxies are removed again after the script finishes so the session's
//! package state is unaffected; package chunks are dumped at load time and
//! never see the proxies at all.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use mlua::prelude::*;

use crate::statement::{Statement, TypeTag};

/// Installed recording proxies plus the originals needed to undo them.
pub struct Recorder {
  recorded: Rc<RefCell<BTreeSet<Statement>>>,
  originals: Vec<(LuaTable, String, LuaFunction)>,
}

impl Recorder {
  /// Wrap every exported function of the given package tables.
  pub fn install(lua: &Lua, packages: &[(String, LuaTable)]) -> LuaResult<Self> {
    let recorded = Rc::new(RefCell::new(BTreeSet::new()));
    let mut originals = Vec::new();

    for (pkg, table) in packages {
      // Collect first; mutating a table while iterating it is undefined.
      let exported: Vec<(String, LuaFunction)> = table
        .pairs::<LuaValue, LuaValue>()
        .flatten()
        .filter_map(|(k, v)| match (k, v) {
          (LuaValue::String(k), LuaValue::Function(f)) => Some((k.to_string_lossy(), f)),
          _ => None,
        })
        .collect();

      for (key, original) in exported {
        let callable = format!("{}.{}", pkg, key);
        let sink = recorded.clone();
        let target = original.clone();

        let wrapper = lua.create_function(move |_, args: LuaMultiValue| {
          let types: Option<Vec<TypeTag>> = args.iter().map(TypeTag::of).collect();
          if let Some(types) = types {
            sink.borrow_mut().insert(Statement::new(callable.clone(), types));
          }
          target.call::<LuaMultiValue>(args)
        })?;

        table.set(key.as_str(), wrapper)?;
        originals.push((table.clone(), key, original));
      }
    }

    Ok(Self { recorded, originals })
  }

  /// Restore the original functions and return everything recorded.
  pub fn uninstall(self) -> LuaResult<BTreeSet<Statement>> {
    for (table, key, original) in self.originals {
      table.set(key.as_str(), original)?;
    }

    let recorded = Rc::try_unwrap(self.recorded)
      .map(RefCell::into_inner)
      .unwrap_or_else(|rc| rc.borrow().clone());
    Ok(recorded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn demo_package(lua: &Lua) -> LuaTable {
    lua
      .load(
        r#"
          local M = {}
          function M.hello(name) return "hello " .. tostring(name) end
          function M.add(a, b) return a + b end
          M.version = "1.0"
          return M
        "#,
      )
      .eval::<LuaTable>()
      .unwrap()
  }

  #[test]
  fn records_calls_with_resolvable_types() {
    let lua = Lua::new();
    let pkg = demo_package(&lua);
    lua.globals().set("Demo", &pkg).unwrap();

    let recorder = Recorder::install(&lua, &[("Demo".to_string(), pkg)]).unwrap();
    lua.load(r#"Demo.hello("friend"); Demo.add(1, 2)"#).exec().unwrap();
    let recorded = recorder.uninstall().unwrap();

    assert!(recorded.contains(&Statement::new("Demo.hello", vec![TypeTag::String])));
    assert!(recorded.contains(&Statement::new("Demo.add", vec![TypeTag::Integer, TypeTag::Integer])));
  }

  #[test]
  fn duplicate_calls_collapse() {
    let lua = Lua::new();
    let pkg = demo_package(&lua);
    lua.globals().set("Demo", &pkg).unwrap();

    let recorder = Recorder::install(&lua, &[("Demo".to_string(), pkg)]).unwrap();
    lua
      .load(r#"for _ = 1, 5 do Demo.hello("x") end"#)
      .exec()
      .unwrap();
    let recorded = recorder.uninstall().unwrap();

    assert_eq!(recorded.len(), 1);
  }

  #[test]
  fn proxies_delegate_to_original() {
    let lua = Lua::new();
    let pkg = demo_package(&lua);
    lua.globals().set("Demo", &pkg).unwrap();

    let recorder = Recorder::install(&lua, &[("Demo".to_string(), pkg)]).unwrap();
    let result: String = lua.load(r#"return Demo.hello("world")"#).eval().unwrap();
    recorder.uninstall().unwrap();

    assert_eq!(result, "hello world");
  }

  #[test]
  fn uninstall_restores_originals() {
    let lua = Lua::new();
    let pkg = demo_package(&lua);
    lua.globals().set("Demo", &pkg).unwrap();

    let before: LuaFunction = pkg.get("hello").unwrap();
    let recorder = Recorder::install(&lua, &[("Demo".to_string(), pkg.clone())]).unwrap();
    recorder.uninstall().unwrap();
    let after: LuaFunction = pkg.get("hello").unwrap();

    // Calls after uninstall are not recorded; the table holds the original again.
    assert_eq!(before, after);
  }

  #[test]
  fn non_function_exports_are_untouched() {
    let lua = Lua::new();
    let pkg = demo_package(&lua);

    let recorder = Recorder::install(&lua, &[("Demo".to_string(), pkg.clone())]).unwrap();
    let version: String = pkg.get("version").unwrap();
    recorder.uninstall().unwrap();

    assert_eq!(version, "1.0");
  }
}
