/// `scripting/` - Lua scripts bound to a slot of the remote scene
///
/// Each script runs in its own isolated Lua VM (mlua) and talks to the
/// engine through its `ctx` table. Script errors are caught and logged;
/// they never take down the runtime or other scripts.
pub mod api;
pub mod context;
pub mod engine;
pub mod lifecycle;
pub mod math;
pub mod sandbox;

pub use context::{ClockSnapshot, LogLevel, ScriptLog, ScriptLogEntry};
pub use engine::{InstanceSummary, ScriptRuntime, TickMode};
pub use lifecycle::InstanceState;
