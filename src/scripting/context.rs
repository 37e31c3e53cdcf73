/// `scripting/context.rs` - per-instance state a script sees as `ctx`
///
/// The Lua side of the context is a plain table built by `api`. This module
/// owns what the runtime mutates on it every tick (the clock) and the log
/// sink shared by all instances.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use mlua::{Lua, Result as LuaResult, Table, Value};
use serde::{Deserialize, Serialize};

use super::api::{build_context_table, lua_value_to_json, ContextBinding};

// ── Log sink ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptLogEntry {
    pub level: LogLevel,
    pub script_id: String,
    pub script_name: String,
    pub message: String,
    pub timestamp: i64,
}

/// Bounded log shared by every instance; oldest entries fall off first.
#[derive(Debug, Clone)]
pub struct ScriptLog {
    entries: Arc<Mutex<VecDeque<ScriptLogEntry>>>,
    capacity: usize,
}

impl ScriptLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, level: LogLevel, script_id: &str, script_name: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => log::info!("[script:{script_name}] {message}"),
            LogLevel::Warn => log::warn!("[script:{script_name}] {message}"),
            LogLevel::Error => log::error!("[script:{script_name}] {message}"),
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ScriptLogEntry {
            level,
            script_id: script_id.to_string(),
            script_name: script_name.to_string(),
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Last `limit` entries, oldest first.
    pub fn entries(&self, limit: usize) -> Vec<ScriptLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries_for(&self, script_id: &str) -> Vec<ScriptLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.script_id == script_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Seconds since the instance started, seconds since the previous tick,
/// and the number of ticks this instance has seen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub time: f64,
    pub delta_time: f64,
    pub frame_count: u64,
}

#[derive(Debug, Clone)]
struct ScriptClock {
    started_at: Instant,
    snapshot: ClockSnapshot,
}

// ── Context ───────────────────────────────────────────────────────────────────

pub struct ScriptContext {
    target_slot_id: String,
    table: Table,
    clock: ScriptClock,
}

impl ScriptContext {
    pub fn new(lua: &Lua, binding: ContextBinding) -> LuaResult<Self> {
        let table = build_context_table(lua, &binding)?;
        Ok(Self {
            target_slot_id: binding.target_slot_id,
            table,
            clock: ScriptClock {
                started_at: Instant::now(),
                snapshot: ClockSnapshot {
                    time: 0.0,
                    delta_time: 0.0,
                    frame_count: 0,
                },
            },
        })
    }

    pub fn target_slot_id(&self) -> &str {
        &self.target_slot_id
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn clock(&self) -> ClockSnapshot {
        self.clock.snapshot
    }

    /// Moves the clock one frame forward and mirrors it onto `ctx`.
    pub fn advance(&mut self, now: Instant, delta_time: f64) -> LuaResult<()> {
        let snapshot = &mut self.clock.snapshot;
        snapshot.time = now.saturating_duration_since(self.clock.started_at).as_secs_f64();
        snapshot.delta_time = delta_time;
        snapshot.frame_count += 1;

        self.table.set("time", snapshot.time)?;
        self.table.set("deltaTime", snapshot.delta_time)?;
        self.table.set("frameCount", snapshot.frame_count)?;
        Ok(())
    }

    /// Current value of `ctx.vars[key]`, as JSON.
    pub fn var(&self, key: &str) -> LuaResult<Option<serde_json::Value>> {
        let vars: Table = self.table.get("vars")?;
        match vars.get::<Value>(key)? {
            Value::Nil => Ok(None),
            value => Ok(Some(lua_value_to_json(value))),
        }
    }
}
