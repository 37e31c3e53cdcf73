/// `scripting/lifecycle.rs` - instance states and the hooks that drive them
use serde::{Deserialize, Serialize};

/// Starting → Running → Stopping → Removed. A start hook that is still
/// in flight when `stop` arrives leaves the instance in Stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Removed,
}

impl InstanceState {
    /// A live instance blocks another `run` with the same id.
    pub fn is_live(self) -> bool {
        matches!(self, InstanceState::Starting | InstanceState::Running)
    }
}

/// Optional functions a script may define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Start,
    Update,
    Destroy,
}

impl Hook {
    /// Name the script binds the hook to.
    pub fn function_name(self) -> &'static str {
        match self {
            Hook::Start => "onStart",
            Hook::Update => "onUpdate",
            Hook::Destroy => "onDestroy",
        }
    }
}
