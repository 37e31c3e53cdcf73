/// `commands/` - `slotlink` command line front end
///
/// Each subcommand maps onto one handler in the `*_commands` modules. The
/// endpoint is taken from `--url`, then `SLOTLINK_URL`, then the config
/// file, then the built-in default.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    config::Config,
    error::CliError,
    link::{Response, UNBOUNDED_DEPTH},
    state::AppState,
};

pub mod component_commands;
pub mod script_commands;
pub mod slot_commands;

#[derive(Parser, Debug)]
#[command(name = "slotlink", version, about = "Drive a remote scene engine over WebSocket")]
pub struct Cli {
    /// Engine endpoint (overrides SLOTLINK_URL and the config file)
    #[arg(short, long, global = true)]
    pub url: Option<String>,

    /// TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a slot as JSON
    GetSlot {
        slot_id: String,
        /// Levels of children to include (negative = all)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        depth: i32,
        /// Include component members
        #[arg(long)]
        components: bool,
    },
    /// Create a slot under a parent
    AddSlot {
        parent_id: String,
        #[arg(long)]
        name: Option<String>,
        /// Slot attributes as JSON, e.g. '{"position":{"x":0,"y":1,"z":0}}'
        #[arg(long)]
        attrs: Option<String>,
    },
    /// Patch a slot with JSON attributes
    UpdateSlot { slot_id: String, attrs: String },
    RemoveSlot { slot_id: String },
    GetComponent { component_id: String },
    /// Attach a component to a slot
    AddComponent {
        slot_id: String,
        component_type: String,
        /// Members as JSON, keyed by member name
        #[arg(long)]
        members: Option<String>,
    },
    /// Patch component members with JSON
    UpdateComponent { component_id: String, members: String },
    RemoveComponent { component_id: String },
    /// Search a subtree for the first slot with this name
    Find {
        name: String,
        #[arg(long, default_value = "Root")]
        from: String,
        #[arg(long, default_value_t = UNBOUNDED_DEPTH, allow_negative_numbers = true)]
        depth: i32,
    },
    /// Print a slot hierarchy
    Tree {
        #[arg(default_value = "Root")]
        slot_id: String,
        #[arg(long, default_value_t = UNBOUNDED_DEPTH, allow_negative_numbers = true)]
        depth: i32,
        /// Show component types next to each slot
        #[arg(long)]
        components: bool,
    },
    /// Run a Lua script against a slot, then print its log
    RunScript {
        file: PathBuf,
        #[arg(long)]
        target: String,
        /// How long to keep the script running
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,
        #[arg(long)]
        name: Option<String>,
    },
}

/// What a handler wants printed.
#[derive(Debug, PartialEq)]
pub enum Output {
    Json(Value),
    Text(String),
}

/// Resolve config, connect, run one command, shut down.
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = resolve_config(&cli)?;
    let state = AppState::new(config);
    state.connect().await?;

    let result = dispatch(&state, cli.command).await;
    state.shutdown().await;

    match result? {
        Output::Json(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        ),
        Output::Text(text) => println!("{text}"),
    }
    Ok(())
}

pub fn resolve_config(cli: &Cli) -> Result<Config, CliError> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut config = config.apply_env();
    if let Some(url) = &cli.url {
        config.link.url = url.clone();
    }
    Ok(config)
}

pub async fn dispatch(state: &AppState, command: Command) -> Result<Output, CliError> {
    match command {
        Command::GetSlot {
            slot_id,
            depth,
            components,
        } => slot_commands::get_slot(state, &slot_id, depth, components).await,
        Command::AddSlot {
            parent_id,
            name,
            attrs,
        } => slot_commands::add_slot(state, &parent_id, name, attrs.as_deref()).await,
        Command::UpdateSlot { slot_id, attrs } => {
            slot_commands::update_slot(state, &slot_id, &attrs).await
        }
        Command::RemoveSlot { slot_id } => slot_commands::remove_slot(state, &slot_id).await,
        Command::Find { name, from, depth } => {
            slot_commands::find(state, &name, &from, depth).await
        }
        Command::Tree {
            slot_id,
            depth,
            components,
        } => slot_commands::tree(state, &slot_id, depth, components).await,
        Command::GetComponent { component_id } => {
            component_commands::get_component(state, &component_id).await
        }
        Command::AddComponent {
            slot_id,
            component_type,
            members,
        } => {
            component_commands::add_component(state, &slot_id, &component_type, members.as_deref())
                .await
        }
        Command::UpdateComponent {
            component_id,
            members,
        } => component_commands::update_component(state, &component_id, &members).await,
        Command::RemoveComponent { component_id } => {
            component_commands::remove_component(state, &component_id).await
        }
        Command::RunScript {
            file,
            target,
            seconds,
            name,
        } => script_commands::run_script(state, &file, &target, seconds, name).await,
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `data` of a successful response; `success: false` becomes an error.
pub(crate) fn accepted(response: Response) -> Result<Value, CliError> {
    if response.success {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(CliError::Rejected(response.failure_message()))
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(what: &str, text: &str) -> Result<T, CliError> {
    serde_json::from_str(text).map_err(|e| CliError::Input(format!("{what}: {e}")))
}
