/// `commands/component_commands.rs` - component subcommands
use std::collections::BTreeMap;

use super::{accepted, parse_json, Output};
use crate::{error::CliError, link::Member, state::AppState};

type Members = BTreeMap<String, Member>;

pub async fn get_component(state: &AppState, component_id: &str) -> Result<Output, CliError> {
    let response = state.client.get_component(component_id).await?;
    accepted(response).map(Output::Json)
}

pub async fn add_component(
    state: &AppState,
    slot_id: &str,
    component_type: &str,
    members: Option<&str>,
) -> Result<Output, CliError> {
    let members = match members {
        Some(text) => parse_json::<Members>("component members", text)?,
        None => Members::new(),
    };
    let response = state
        .client
        .add_component(slot_id, component_type, members)
        .await?;
    accepted(response).map(Output::Json)
}

pub async fn update_component(
    state: &AppState,
    component_id: &str,
    members: &str,
) -> Result<Output, CliError> {
    let members = parse_json::<Members>("component members", members)?;
    if members.is_empty() {
        return Err(CliError::Input("no members to update".into()));
    }
    let response = state.client.update_component(component_id, members).await?;
    accepted(response).map(Output::Json)
}

pub async fn remove_component(state: &AppState, component_id: &str) -> Result<Output, CliError> {
    let response = state.client.remove_component(component_id).await?;
    accepted(response).map(Output::Json)
}
