/// `scripting/sandbox.rs` - Lua VM restrictions per script instance
///
/// Every instance gets its own VM with only the pure standard libraries
/// (string, table, math, coroutine, utf8). No io, os, debug or package, and
/// the file loaders of the base library are removed.
use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Value};

use crate::config::RuntimeConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SandboxLimits {
    /// Heap cap for the VM in bytes
    pub memory_limit: Option<usize>,
}

impl From<&RuntimeConfig> for SandboxLimits {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            memory_limit: config.memory_limit_bytes(),
        }
    }
}

fn script_libs() -> StdLib {
    StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE | StdLib::UTF8
}

/// Creates a new Lua VM with sandbox restrictions applied.
pub fn create_sandboxed_vm(limits: &SandboxLimits) -> LuaResult<Lua> {
    let lua = Lua::new_with(script_libs(), LuaOptions::default())?;

    let globals = lua.globals();
    for name in ["dofile", "loadfile"] {
        globals.set(name, Value::Nil)?;
    }

    if let Some(bytes) = limits.memory_limit {
        lua.set_memory_limit(bytes)?;
    }

    Ok(lua)
}
