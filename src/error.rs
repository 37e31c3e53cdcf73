/// `error.rs` - error taxonomy for the engine link and the script runtime
///
/// Transport and timeout failures are scoped to a single call. Domain-level
/// rejections (`success: false`) are not errors at this layer; they travel
/// back as `Response` data.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected or connecting")]
    AlreadyConnected,

    #[error("WebSocket connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request {message_id} timed out after {after_ms} ms")]
    Timeout { message_id: String, after_ms: u64 },

    #[error("Message id '{0}' is already pending")]
    DuplicateMessageId(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),
}

impl LinkError {
    /// Close-driven failure handed to every pending call when the socket goes away.
    pub fn closed(code: u16, reason: &str) -> Self {
        if reason.is_empty() {
            Self::Transport(format!("connection closed ({code})"))
        } else {
            Self::Transport(format!("connection closed ({code}): {reason}"))
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Compile error: {message}")]
    Compile { message: String, line: Option<u32> },

    #[error("Lua VM error: {0}")]
    Vm(#[from] mlua::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Anything that makes the `slotlink` binary exit non-zero.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("Engine rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    Input(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type LinkResult<T> = std::result::Result<T, LinkError>;
