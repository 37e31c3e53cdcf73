/// `commands/slot_commands.rs` - slot subcommands and the tree printer
use std::fmt::Write;

use super::{accepted, parse_json, Output};
use crate::{
    error::CliError,
    link::{SlotData, SlotPatch},
    state::AppState,
};

pub async fn get_slot(
    state: &AppState,
    slot_id: &str,
    depth: i32,
    components: bool,
) -> Result<Output, CliError> {
    let response = state.client.get_slot(slot_id, depth, components).await?;
    accepted(response).map(Output::Json)
}

/// `attrs` is parsed first; `--name` wins over a name inside it.
pub async fn add_slot(
    state: &AppState,
    parent_id: &str,
    name: Option<String>,
    attrs: Option<&str>,
) -> Result<Output, CliError> {
    let mut patch = match attrs {
        Some(text) => parse_json::<SlotPatch>("slot attributes", text)?,
        None => SlotPatch::default(),
    };
    if name.is_some() {
        patch.name = name;
    }
    let response = state.client.add_slot(parent_id, patch).await?;
    accepted(response).map(Output::Json)
}

pub async fn update_slot(state: &AppState, slot_id: &str, attrs: &str) -> Result<Output, CliError> {
    let patch = parse_json::<SlotPatch>("slot attributes", attrs)?;
    let response = state.client.update_slot(slot_id, patch).await?;
    accepted(response).map(Output::Json)
}

pub async fn remove_slot(state: &AppState, slot_id: &str) -> Result<Output, CliError> {
    let response = state.client.remove_slot(slot_id).await?;
    accepted(response).map(Output::Json)
}

pub async fn find(state: &AppState, name: &str, from: &str, depth: i32) -> Result<Output, CliError> {
    let response = state.client.find_slot_by_name(name, from, depth).await?;
    match accepted(response)? {
        serde_json::Value::Null => Err(CliError::NotFound(format!("no slot named '{name}' under {from}"))),
        found => Ok(Output::Json(found)),
    }
}

pub async fn tree(
    state: &AppState,
    slot_id: &str,
    depth: i32,
    components: bool,
) -> Result<Output, CliError> {
    let response = state.client.get_slot(slot_id, depth, components).await?;
    if !response.success {
        return Err(CliError::Rejected(response.failure_message()));
    }
    let root = response.slot()?;
    Ok(Output::Text(render_tree(&root)))
}

// ── Tree printer ──────────────────────────────────────────────────────────────

pub fn render_tree(root: &SlotData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", label(root));
    render_children(root, "", &mut out);
    out.truncate(out.trim_end().len());
    out
}

fn render_children(slot: &SlotData, prefix: &str, out: &mut String) {
    let count = slot.children.len();
    for (i, child) in slot.children.iter().enumerate() {
        let last = i + 1 == count;
        let (branch, indent) = if last { ("└─ ", "   ") } else { ("├─ ", "│  ") };
        let _ = writeln!(out, "{prefix}{branch}{}", label(child));
        render_children(child, &format!("{prefix}{indent}"), out);
    }
}

fn label(slot: &SlotData) -> String {
    let name = match slot.name() {
        "" => "<unnamed>",
        name => name,
    };
    let mut text = format!("{name} ({})", slot.id());
    if !slot.components.is_empty() {
        let types: Vec<&str> = slot
            .components
            .iter()
            .map(|c| short_type(c.type_name()))
            .collect();
        let _ = write!(text, " [{}]", types.join(", "));
    }
    text
}

/// `[Engine]Engine.Light` → `Light`
fn short_type(full: &str) -> &str {
    full.rsplit(['.', ']']).next().unwrap_or(full)
}
