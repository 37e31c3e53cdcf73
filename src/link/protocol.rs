/// `link/protocol.rs` - wire envelopes exchanged with the scene engine
///
/// Requests are tagged by `$type` and carry a `messageId`; every response
/// echoes it back as `sourceMessageId`. Payload fields are wrapped the way the
/// engine sends them (`{ "value": ... }`, `{ "targetId": ... }`).
use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{LinkError, LinkResult};

// ── Value types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Float2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Float3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Float3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatQ {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for FloatQ {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl FloatQ {
    pub const IDENTITY: FloatQ = FloatQ { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "opaque_alpha")]
    pub a: f32,
}

fn opaque_alpha() -> f32 {
    1.0
}

/// `{ "value": T }` wrapper used for every slot attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: T,
}

impl<T> Field<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefField {
    pub target_id: Option<String>,
}

// ── Slot payload ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RefField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Field<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Field<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Field<Float3>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Field<FloatQ>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Field<Float3>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<Field<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<Field<bool>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SlotData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentData>,
}

impl SlotData {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.name
            .as_ref()
            .and_then(|f| f.value.as_deref())
            .unwrap_or_default()
    }

    /// Depth-first, pre-order search of this subtree (self included).
    pub fn find_by_name(&self, name: &str) -> Option<&SlotData> {
        if self.name() == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_name(name))
    }
}

/// Script/CLI-friendly slot attributes, flattened out of the wire wrappers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SlotPatch {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub position: Option<Float3>,
    pub rotation: Option<FloatQ>,
    pub scale: Option<Float3>,
    #[serde(alias = "active")]
    pub is_active: Option<bool>,
    pub persistent: Option<bool>,
    pub parent_id: Option<String>,
}

impl SlotPatch {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn into_data(self, id: Option<String>) -> SlotData {
        SlotData {
            id,
            parent: self.parent_id.map(|target| RefField {
                target_id: Some(target),
            }),
            name: self.name.map(|n| Field::new(Some(n))),
            tag: self.tag.map(|t| Field::new(Some(t))),
            position: self.position.map(Field::new),
            rotation: self.rotation.map(Field::new),
            scale: self.scale.map(Field::new),
            is_active: self.is_active.map(Field::new),
            persistent: self.persistent.map(Field::new),
            children: Vec::new(),
            components: Vec::new(),
        }
    }
}

// ── Component payload ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
    #[serde(default)]
    pub members: BTreeMap<String, Member>,
}

impl ComponentData {
    pub fn type_name(&self) -> &str {
        self.component_type.as_deref().unwrap_or_default()
    }
}

/// A single component member, tagged on the wire by `$type`.
///
/// Tags this client does not know about decode to `Unknown`, which keeps the
/// raw JSON and writes it back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(Option<String>),
    Float2(Float2),
    Float3(Float3),
    Quaternion(FloatQ),
    Color(Color),
    Enum {
        value: String,
        enum_type: Option<String>,
    },
    Reference {
        target_id: Option<String>,
        target_type: Option<String>,
    },
    List(Vec<Member>),
    Unknown {
        type_name: String,
        raw: Value,
    },
}

impl Member {
    pub fn reference(target_id: Option<String>) -> Self {
        Member::Reference {
            target_id,
            target_type: None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Member::Float(_) => "float",
            Member::Int(_) => "int",
            Member::Bool(_) => "bool",
            Member::String(_) => "string",
            Member::Float2(_) => "float2",
            Member::Float3(_) => "float3",
            Member::Quaternion(_) => "quaternion",
            Member::Color(_) => "color",
            Member::Enum { .. } => "enum",
            Member::Reference { .. } => "reference",
            Member::List(_) => "list",
            Member::Unknown { type_name, .. } => type_name,
        }
    }

    pub fn to_json(&self) -> Value {
        let tag = self.type_name();
        match self {
            Member::Float(v) => json!({ "$type": tag, "value": v }),
            Member::Int(v) => json!({ "$type": tag, "value": v }),
            Member::Bool(v) => json!({ "$type": tag, "value": v }),
            Member::String(v) => json!({ "$type": tag, "value": v }),
            Member::Float2(v) => json!({ "$type": tag, "value": v }),
            Member::Float3(v) => json!({ "$type": tag, "value": v }),
            Member::Quaternion(v) => json!({ "$type": tag, "value": v }),
            Member::Color(v) => json!({ "$type": tag, "value": v }),
            Member::Enum { value, enum_type } => {
                let mut out = json!({ "$type": tag, "value": value });
                if let Some(enum_type) = enum_type {
                    out["enumType"] = json!(enum_type);
                }
                out
            }
            Member::Reference {
                target_id,
                target_type,
            } => {
                let mut out = json!({ "$type": tag, "targetId": target_id });
                if let Some(target_type) = target_type {
                    out["targetType"] = json!(target_type);
                }
                out
            }
            Member::List(elements) => {
                let elements: Vec<Value> = elements.iter().map(Member::to_json).collect();
                json!({ "$type": tag, "elements": elements })
            }
            Member::Unknown { raw, .. } => raw.clone(),
        }
    }

    pub fn from_json(raw: Value) -> Result<Self, String> {
        let type_name = raw
            .get("$type")
            .and_then(Value::as_str)
            .ok_or_else(|| "member is missing '$type'".to_string())?
            .to_string();

        let member = match type_name.as_str() {
            "float" => Member::Float(field(&raw, "value")?),
            "int" => Member::Int(field(&raw, "value")?),
            "bool" => Member::Bool(field(&raw, "value")?),
            "string" => Member::String(field(&raw, "value")?),
            "float2" => Member::Float2(field(&raw, "value")?),
            "float3" => Member::Float3(field(&raw, "value")?),
            "quaternion" => Member::Quaternion(field(&raw, "value")?),
            "color" => Member::Color(field(&raw, "value")?),
            "enum" => Member::Enum {
                value: field(&raw, "value")?,
                enum_type: field(&raw, "enumType")?,
            },
            "reference" => Member::Reference {
                target_id: field(&raw, "targetId")?,
                target_type: field(&raw, "targetType")?,
            },
            "list" => {
                let elements = match raw.get("elements") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .cloned()
                        .map(Member::from_json)
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(Value::Null) | None => Vec::new(),
                    // Lua has no distinct empty array
                    Some(Value::Object(map)) if map.is_empty() => Vec::new(),
                    Some(other) => return Err(format!("list elements must be an array, got {other}")),
                };
                Member::List(elements)
            }
            _ => Member::Unknown { type_name, raw },
        };
        Ok(member)
    }
}

fn field<T: DeserializeOwned>(raw: &Value, key: &str) -> Result<T, String> {
    let value = raw.get(key).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| format!("{key}: {e}"))
}

impl Serialize for Member {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Member {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Member::from_json(raw).map_err(D::Error::custom)
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    GetSlot {
        message_id: String,
        slot_id: String,
        depth: i32,
        include_component_data: bool,
    },
    AddSlot {
        message_id: String,
        data: SlotData,
    },
    UpdateSlot {
        message_id: String,
        data: SlotData,
    },
    RemoveSlot {
        message_id: String,
        slot_id: String,
    },
    GetComponent {
        message_id: String,
        component_id: String,
    },
    AddComponent {
        message_id: String,
        container_slot_id: String,
        data: ComponentData,
    },
    UpdateComponent {
        message_id: String,
        data: ComponentData,
    },
    RemoveComponent {
        message_id: String,
        component_id: String,
    },
}

impl Request {
    pub fn message_id(&self) -> &str {
        match self {
            Request::GetSlot { message_id, .. }
            | Request::AddSlot { message_id, .. }
            | Request::UpdateSlot { message_id, .. }
            | Request::RemoveSlot { message_id, .. }
            | Request::GetComponent { message_id, .. }
            | Request::AddComponent { message_id, .. }
            | Request::UpdateComponent { message_id, .. }
            | Request::RemoveComponent { message_id, .. } => message_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetSlot { .. } => "getSlot",
            Request::AddSlot { .. } => "addSlot",
            Request::UpdateSlot { .. } => "updateSlot",
            Request::RemoveSlot { .. } => "removeSlot",
            Request::GetComponent { .. } => "getComponent",
            Request::AddComponent { .. } => "addComponent",
            Request::UpdateComponent { .. } => "updateComponent",
            Request::RemoveComponent { .. } => "removeComponent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    pub source_message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<String>,
}

impl Response {
    pub fn ok(source_message_id: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            source_message_id: source_message_id.into(),
            data: Some(data),
            error_info: None,
        }
    }

    pub fn failure(source_message_id: impl Into<String>, error_info: impl Into<String>) -> Self {
        Self {
            success: false,
            source_message_id: source_message_id.into(),
            data: None,
            error_info: Some(error_info.into()),
        }
    }

    /// Message to surface when `success` is false.
    pub fn failure_message(&self) -> String {
        self.error_info
            .clone()
            .unwrap_or_else(|| "command failed without error info".to_string())
    }

    /// Replace the payload, keeping success flag and correlation.
    pub fn map_data(self, f: impl FnOnce(Value) -> Value) -> Self {
        Self {
            data: self.data.map(f),
            ..self
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> LinkResult<T> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| LinkError::Decode("response carries no data".to_string()))?;
        Ok(serde_json::from_value(data)?)
    }

    pub fn slot(&self) -> LinkResult<SlotData> {
        self.decode()
    }

    pub fn component(&self) -> LinkResult<ComponentData> {
        self.decode()
    }
}
