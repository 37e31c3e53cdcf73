/// `link/client.rs` - typed command surface over the engine session
///
/// Every call gets a fresh UUID message id, is registered for correlation,
/// written to the session and awaited. A `Response` with `success: false` is
/// handed back as-is; only transport failures and timeouts are `Err`.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::protocol::{ComponentData, Member, Request, Response, SlotPatch};
use super::registry::CorrelationRegistry;
use super::session::{EventHandler, Session, SessionEvent};
use crate::error::{LinkError, LinkResult};

/// Depth value meaning "the whole subtree".
pub const UNBOUNDED_DEPTH: i32 = -1;

#[derive(Clone)]
pub struct CommandClient {
    session: Session,
    registry: CorrelationRegistry,
}

impl CommandClient {
    pub fn new(session: Session, registry: CorrelationRegistry) -> Self {
        Self { session, registry }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Connect the session with this client's registry wired to its events.
    pub async fn connect(&self, url: &str) -> LinkResult<()> {
        let registry = self.registry.clone();
        let handler: EventHandler = Arc::new(move |event| route(&registry, event));
        self.session.connect(url, handler).await
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Route one session event into the registry.
    pub fn dispatch(&self, event: SessionEvent) {
        route(&self.registry, event);
    }

    async fn call(&self, build: impl FnOnce(String) -> Request) -> LinkResult<Response> {
        let request = build(Uuid::new_v4().to_string());
        let message_id = request.message_id().to_string();
        let text = serde_json::to_string(&request).map_err(|e| LinkError::Encode(e.to_string()))?;

        let pending = self.registry.register(&message_id)?;
        if let Err(e) = self.session.send(text) {
            self.registry.cancel(&message_id);
            return Err(e);
        }
        log::debug!("-> {} {}", request.kind(), message_id);

        let response = pending.await?;
        if !response.success {
            log::debug!("<- {} {} failed: {}", request.kind(), message_id, response.failure_message());
        }
        Ok(response)
    }

    // ── Slots ─────────────────────────────────────────────────────────────

    /// `depth`: 0 = slot only, N = N levels of children, negative = everything.
    pub async fn get_slot(
        &self,
        slot_id: &str,
        depth: i32,
        include_component_data: bool,
    ) -> LinkResult<Response> {
        self.call(|message_id| Request::GetSlot {
            message_id,
            slot_id: slot_id.to_string(),
            depth,
            include_component_data,
        })
        .await
    }

    pub async fn add_slot(&self, parent_id: &str, patch: SlotPatch) -> LinkResult<Response> {
        let patch = SlotPatch {
            parent_id: Some(parent_id.to_string()),
            ..patch
        };
        self.call(|message_id| Request::AddSlot {
            message_id,
            data: patch.into_data(None),
        })
        .await
    }

    pub async fn update_slot(&self, slot_id: &str, patch: SlotPatch) -> LinkResult<Response> {
        self.call(|message_id| Request::UpdateSlot {
            message_id,
            data: patch.into_data(Some(slot_id.to_string())),
        })
        .await
    }

    pub async fn remove_slot(&self, slot_id: &str) -> LinkResult<Response> {
        self.call(|message_id| Request::RemoveSlot {
            message_id,
            slot_id: slot_id.to_string(),
        })
        .await
    }

    // ── Components ────────────────────────────────────────────────────────

    pub async fn get_component(&self, component_id: &str) -> LinkResult<Response> {
        self.call(|message_id| Request::GetComponent {
            message_id,
            component_id: component_id.to_string(),
        })
        .await
    }

    pub async fn add_component(
        &self,
        slot_id: &str,
        component_type: &str,
        members: BTreeMap<String, Member>,
    ) -> LinkResult<Response> {
        self.call(|message_id| Request::AddComponent {
            message_id,
            container_slot_id: slot_id.to_string(),
            data: ComponentData {
                id: None,
                component_type: Some(component_type.to_string()),
                members,
            },
        })
        .await
    }

    pub async fn update_component(
        &self,
        component_id: &str,
        members: BTreeMap<String, Member>,
    ) -> LinkResult<Response> {
        self.call(|message_id| Request::UpdateComponent {
            message_id,
            data: ComponentData {
                id: Some(component_id.to_string()),
                component_type: None,
                members,
            },
        })
        .await
    }

    pub async fn remove_component(&self, component_id: &str) -> LinkResult<Response> {
        self.call(|message_id| Request::RemoveComponent {
            message_id,
            component_id: component_id.to_string(),
        })
        .await
    }

    // ── Derived helpers ───────────────────────────────────────────────────

    /// Fetch one subtree and search it depth-first. `data` is the match or null.
    pub async fn find_slot_by_name(
        &self,
        name: &str,
        start_id: &str,
        depth: i32,
    ) -> LinkResult<Response> {
        let response = self.get_slot(start_id, depth, false).await?;
        if !response.success {
            return Ok(response);
        }
        let root = response.slot()?;
        let found = match root.find_by_name(name) {
            Some(slot) => serde_json::to_value(slot)?,
            None => Value::Null,
        };
        Ok(response.map_data(|_| found))
    }

    /// `data` becomes the array of direct children.
    pub async fn list_children(&self, slot_id: &str) -> LinkResult<Response> {
        let response = self.get_slot(slot_id, 1, false).await?;
        Ok(project(response, "children"))
    }

    /// `data` becomes the array of the slot's components, members included.
    pub async fn list_components(&self, slot_id: &str) -> LinkResult<Response> {
        let response = self.get_slot(slot_id, 0, true).await?;
        Ok(project(response, "components"))
    }

    /// Set or append one element of a list member.
    ///
    /// Appending takes two wire calls: the list first grows by a placeholder
    /// (a null reference for reference lists) and the placeholder is then
    /// patched with `value`. Callers see a single operation.
    pub async fn upsert_list_element(
        &self,
        component_id: &str,
        member: &str,
        index: Option<usize>,
        value: Member,
    ) -> LinkResult<Response> {
        let current = self.get_component(component_id).await?;
        if !current.success {
            return Ok(current);
        }
        let component = current.component()?;

        let mut elements = match component.members.get(member) {
            Some(Member::List(elements)) => elements.clone(),
            Some(other) => {
                return Ok(Response::failure(
                    current.source_message_id,
                    format!("member '{member}' is a {}, not a list", other.type_name()),
                ))
            }
            None => {
                return Ok(Response::failure(
                    current.source_message_id,
                    format!("component {component_id} has no member '{member}'"),
                ))
            }
        };

        if let Some(i) = index.filter(|i| *i < elements.len()) {
            elements[i] = inherit_target_type(value, Some(&elements[i]));
            return self
                .update_component(component_id, single(member, Member::List(elements)))
                .await;
        }

        let sibling = elements.iter().find(|e| matches!(e, Member::Reference { .. }));
        let value = inherit_target_type(value, sibling);
        let placeholder = match &value {
            Member::Reference { target_type, .. } => Member::Reference {
                target_id: None,
                target_type: target_type.clone(),
            },
            other => other.clone(),
        };
        let needs_patch = placeholder != value;
        elements.push(placeholder);

        let grown = self
            .update_component(component_id, single(member, Member::List(elements.clone())))
            .await?;
        if !grown.success || !needs_patch {
            return Ok(grown);
        }

        if let Some(last) = elements.last_mut() {
            *last = value;
        }
        self.update_component(component_id, single(member, Member::List(elements)))
            .await
    }
}

fn route(registry: &CorrelationRegistry, event: SessionEvent) {
    match event {
        SessionEvent::Open => log::debug!("Engine session open"),
        SessionEvent::Message(text) => match serde_json::from_str::<Response>(&text) {
            Ok(response) => {
                let id = response.source_message_id.clone();
                registry.settle(&id, response);
            }
            Err(e) => log::warn!("Ignoring malformed engine message: {e}"),
        },
        SessionEvent::Closed { code, reason } => {
            registry.reject_all(LinkError::closed(code, &reason));
        }
        SessionEvent::Error(msg) => {
            registry.reject_all(LinkError::Transport(msg));
        }
    }
}

/// A reference given without a target type takes the one already in the list.
fn inherit_target_type(value: Member, existing: Option<&Member>) -> Member {
    match (value, existing) {
        (
            Member::Reference {
                target_id,
                target_type: None,
            },
            Some(Member::Reference {
                target_type: Some(known),
                ..
            }),
        ) => Member::Reference {
            target_id,
            target_type: Some(known.clone()),
        },
        (value, _) => value,
    }
}

fn project(response: Response, key: &str) -> Response {
    if !response.success {
        return response;
    }
    response.map_data(|data| match data.get(key) {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        _ => Value::Array(Vec::new()),
    })
}

fn single(name: &str, member: Member) -> BTreeMap<String, Member> {
    BTreeMap::from([(name.to_string(), member)])
}
