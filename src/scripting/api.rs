/// `scripting/api.rs` - builds the `ctx` table handed to every script
///
/// Method-style entries (`ctx:getSlot()`) take the table itself as their
/// first argument. Slot and component methods are async: the calling
/// coroutine suspends until the engine answers, and a `success: false`
/// response is raised as a Lua error carrying the engine's error info.
/// `ctx.math` holds plain functions (`ctx.math.lerp(a, b, t)`).
use std::collections::BTreeMap;
use std::future::Future;

use mlua::{FromLuaMulti, Function, Lua, Result as LuaResult, Table, Value, Variadic};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;

use super::context::{LogLevel, ScriptLog};
use super::math;
use crate::error::LinkError;
use crate::link::protocol::{Float3, Member, Response, SlotPatch};
use crate::link::{CommandClient, UNBOUNDED_DEPTH};

/// Posted by `ctx:stop()`. `serial` names the instance that asked, so a
/// request outliving its instance never stops a later run under the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub script_id: String,
    pub serial: u64,
}

/// Everything a context table closes over.
#[derive(Clone)]
pub struct ContextBinding {
    pub script_id: String,
    pub script_name: String,
    pub target_slot_id: String,
    /// Unique per instance, even across runs that reuse `script_id`.
    pub serial: u64,
    pub client: CommandClient,
    pub log: ScriptLog,
    /// Drained by the runtime at the start of each tick.
    pub stop_requests: mpsc::UnboundedSender<StopRequest>,
}

pub fn build_context_table(lua: &Lua, binding: &ContextBinding) -> LuaResult<Table> {
    let ctx = lua.create_table()?;
    ctx.set("scriptId", binding.script_id.as_str())?;
    ctx.set("scriptName", binding.script_name.as_str())?;
    ctx.set("targetSlotId", binding.target_slot_id.as_str())?;
    ctx.set("vars", lua.create_table()?)?;
    ctx.set("time", 0.0)?;
    ctx.set("deltaTime", 0.0)?;
    ctx.set("frameCount", 0)?;

    register_log(lua, &ctx, binding)?;
    register_control(lua, &ctx, binding)?;
    register_slots(lua, &ctx, binding)?;
    register_components(lua, &ctx, binding)?;
    ctx.set("math", math_table(lua)?)?;
    Ok(ctx)
}

// ── log ───────────────────────────────────────────────────────────────────────

fn register_log(lua: &Lua, ctx: &Table, binding: &ContextBinding) -> LuaResult<()> {
    macro_rules! log_fn {
        ($level:expr) => {{
            let sink = binding.log.clone();
            let id = binding.script_id.clone();
            let name = binding.script_name.clone();
            lua.create_function(move |_, (_this, parts): (Table, Variadic<Value>)| {
                let message = parts.iter().map(display).collect::<Vec<_>>().join(" ");
                sink.push($level, &id, &name, message);
                Ok(())
            })?
        }};
    }

    ctx.set("log", log_fn!(LogLevel::Info))?;
    ctx.set("warn", log_fn!(LogLevel::Warn))?;
    ctx.set("error", log_fn!(LogLevel::Error))?;
    Ok(())
}

fn display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy(),
        Value::Table(_) => lua_value_to_json(value.clone()).to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

// ── control ───────────────────────────────────────────────────────────────────

fn register_control(lua: &Lua, ctx: &Table, binding: &ContextBinding) -> LuaResult<()> {
    let stop_requests = binding.stop_requests.clone();
    let request = StopRequest {
        script_id: binding.script_id.clone(),
        serial: binding.serial,
    };
    ctx.set(
        "stop",
        lua.create_function(move |_, _this: Table| {
            // Runtime gone means the instance is already being torn down
            let _ = stop_requests.send(request.clone());
            Ok(())
        })?,
    )?;
    Ok(())
}

// ── slots ─────────────────────────────────────────────────────────────────────

fn register_slots(lua: &Lua, ctx: &Table, binding: &ContextBinding) -> LuaResult<()> {
    let client = &binding.client;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "getSlot",
        command(lua, client, move |client, (_, id): (Table, Option<String>)| {
            let id = id.unwrap_or_else(|| target.clone());
            async move { client.get_slot(&id, 0, false).await.map_err(link_error) }
        })?,
    )?;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "getChildren",
        command(lua, client, move |client, (_, id): (Table, Option<String>)| {
            let id = id.unwrap_or_else(|| target.clone());
            async move { client.list_children(&id).await.map_err(link_error) }
        })?,
    )?;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "findSlot",
        command(
            lua,
            client,
            move |client, (_, name, start, depth): (Table, String, Option<String>, Option<i32>)| {
                let start = start.unwrap_or_else(|| target.clone());
                let depth = depth.unwrap_or(UNBOUNDED_DEPTH);
                async move {
                    client
                        .find_slot_by_name(&name, &start, depth)
                        .await
                        .map_err(link_error)
                }
            },
        )?,
    )?;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "createSlot",
        command(
            lua,
            client,
            move |client, (_, attrs, parent): (Table, Option<Table>, Option<String>)| {
                let patch = patch_from(attrs);
                let parent = parent.unwrap_or_else(|| target.clone());
                async move { client.add_slot(&parent, patch?).await.map_err(link_error) }
            },
        )?,
    )?;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "updateSlot",
        command(lua, client, move |client, (_, attrs): (Table, Table)| {
            let patch = from_table::<SlotPatch>(attrs);
            let id = target.clone();
            async move { client.update_slot(&id, patch?).await.map_err(link_error) }
        })?,
    )?;

    ctx.set(
        "updateSlotById",
        command(lua, client, |client, (_, id, attrs): (Table, String, Table)| {
            let patch = from_table::<SlotPatch>(attrs);
            async move { client.update_slot(&id, patch?).await.map_err(link_error) }
        })?,
    )?;

    ctx.set(
        "removeSlot",
        command(lua, client, |client, (_, id): (Table, String)| async move {
            client.remove_slot(&id).await.map_err(link_error)
        })?,
    )?;

    Ok(())
}

// ── components ────────────────────────────────────────────────────────────────

fn register_components(lua: &Lua, ctx: &Table, binding: &ContextBinding) -> LuaResult<()> {
    let client = &binding.client;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "getComponents",
        command(lua, client, move |client, (_, id): (Table, Option<String>)| {
            let id = id.unwrap_or_else(|| target.clone());
            async move { client.list_components(&id).await.map_err(link_error) }
        })?,
    )?;

    ctx.set(
        "getComponent",
        command(lua, client, |client, (_, id): (Table, String)| async move {
            client.get_component(&id).await.map_err(link_error)
        })?,
    )?;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "addComponent",
        command(
            lua,
            client,
            move |client, (_, component_type, members, slot): (Table, String, Option<Table>, Option<String>)| {
                let members = members_from(members);
                let slot = slot.unwrap_or_else(|| target.clone());
                async move {
                    client
                        .add_component(&slot, &component_type, members?)
                        .await
                        .map_err(link_error)
                }
            },
        )?,
    )?;

    ctx.set(
        "updateComponent",
        command(lua, client, |client, (_, id, members): (Table, String, Table)| {
            let members = members_from(Some(members));
            async move {
                client
                    .update_component(&id, members?)
                    .await
                    .map_err(link_error)
            }
        })?,
    )?;

    ctx.set(
        "removeComponent",
        command(lua, client, |client, (_, id): (Table, String)| async move {
            client.remove_component(&id).await.map_err(link_error)
        })?,
    )?;

    let target = binding.target_slot_id.clone();
    ctx.set(
        "findComponent",
        command(
            lua,
            client,
            move |client, (_, component_type, slot): (Table, String, Option<String>)| {
                let slot = slot.unwrap_or_else(|| target.clone());
                async move {
                    let response = client.list_components(&slot).await.map_err(link_error)?;
                    Ok::<_, mlua::Error>(response.map_data(|data| {
                        first_of_type(data, &component_type)
                    }))
                }
            },
        )?,
    )?;

    // Index is 1-based like every Lua sequence; nil or past-the-end appends.
    ctx.set(
        "setListElement",
        command(
            lua,
            client,
            |client, (_, id, member, index, value): (Table, String, String, Option<i64>, Value)| {
                let value = element_from(value);
                let index = index.filter(|i| *i >= 1).map(|i| (i - 1) as usize);
                async move {
                    client
                        .upsert_list_element(&id, &member, index, value?)
                        .await
                        .map_err(link_error)
                }
            },
        )?,
    )?;

    Ok(())
}

/// First component whose type is `wanted`, either exactly or as the last
/// segment of a namespaced type (`[Engine]Engine.Light` matches `Light`).
fn first_of_type(components: serde_json::Value, wanted: &str) -> serde_json::Value {
    let serde_json::Value::Array(items) = components else {
        return serde_json::Value::Null;
    };
    items
        .into_iter()
        .find(|c| {
            let actual = c["componentType"].as_str().unwrap_or_default();
            actual == wanted || actual.rsplit(['.', ']']).next() == Some(wanted)
        })
        .unwrap_or(serde_json::Value::Null)
}

// ── ctx.math ──────────────────────────────────────────────────────────────────

fn math_table(lua: &Lua) -> LuaResult<Table> {
    let tbl = lua.create_table()?;

    tbl.set("lerp", lua.create_function(|_, (a, b, t): (f64, f64, f64)| Ok(math::lerp(a, b, t)))?)?;
    tbl.set(
        "inverseLerp",
        lua.create_function(|_, (a, b, v): (f64, f64, f64)| Ok(math::inverse_lerp(a, b, v)))?,
    )?;
    tbl.set(
        "clamp",
        lua.create_function(|_, (v, min, max): (f64, f64, f64)| Ok(math::clamp(v, min, max)))?,
    )?;
    tbl.set("deg2rad", lua.create_function(|_, deg: f64| Ok(math::deg_to_rad(deg)))?)?;
    tbl.set("rad2deg", lua.create_function(|_, rad: f64| Ok(math::rad_to_deg(rad)))?)?;

    tbl.set(
        "float3",
        lua.create_function(|lua, (x, y, z): (Option<f32>, Option<f32>, Option<f32>)| {
            to_lua(
                lua,
                &Float3::new(x.unwrap_or(0.0), y.unwrap_or(0.0), z.unwrap_or(0.0)),
            )
        })?,
    )?;
    tbl.set(
        "euler",
        lua.create_function(|lua, (x, y, z): (f32, f32, f32)| {
            to_lua(lua, &math::euler_to_quat(Float3::new(x, y, z)))
        })?,
    )?;
    tbl.set(
        "toEuler",
        lua.create_function(|lua, q: Table| to_lua(lua, &math::quat_to_euler(from_table(q)?)))?,
    )?;
    tbl.set(
        "color",
        lua.create_function(|lua, (r, g, b, a): (f32, f32, f32, Option<f32>)| {
            to_lua(lua, &math::color(r, g, b, a))
        })?,
    )?;
    tbl.set(
        "hexColor",
        lua.create_function(|lua, hex: String| match math::hex_color(&hex) {
            Some(color) => to_lua(lua, &color),
            None => Err(mlua::Error::RuntimeError(format!("invalid hex color '{hex}'"))),
        })?,
    )?;

    Ok(tbl)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Wraps an engine command as an async Lua function.
fn command<A, F, Fut>(lua: &Lua, client: &CommandClient, f: F) -> LuaResult<Function>
where
    A: FromLuaMulti + Send + 'static,
    F: Fn(CommandClient, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LuaResult<Response>> + Send + 'static,
{
    let client = client.clone();
    lua.create_async_function(move |lua, args: A| {
        let call = f(client.clone(), args);
        async move { response_into_lua(&lua, call.await?) }
    })
}

fn response_into_lua(lua: &Lua, response: Response) -> LuaResult<Value> {
    if !response.success {
        return Err(mlua::Error::RuntimeError(response.failure_message()));
    }
    match &response.data {
        Some(data) => json_to_lua_value(lua, data),
        None => Ok(Value::Nil),
    }
}

fn link_error(err: LinkError) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

fn patch_from(attrs: Option<Table>) -> LuaResult<SlotPatch> {
    match attrs {
        Some(attrs) => from_table(attrs),
        None => Ok(SlotPatch::default()),
    }
}

fn members_from(members: Option<Table>) -> LuaResult<BTreeMap<String, Member>> {
    match members {
        Some(members) => from_table(members),
        None => Ok(BTreeMap::new()),
    }
}

/// A bare string is shorthand for a reference to that id.
fn element_from(value: Value) -> LuaResult<Member> {
    match value {
        Value::String(id) => Ok(Member::reference(Some(id.to_string_lossy()))),
        Value::Table(_) => {
            Member::from_json(lua_value_to_json(value)).map_err(mlua::Error::RuntimeError)
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "list element must be a member table or an id string, got {}",
            other.type_name()
        ))),
    }
}

fn from_table<T: DeserializeOwned>(table: Table) -> LuaResult<T> {
    serde_json::from_value(lua_value_to_json(Value::Table(table)))
        .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
}

fn to_lua<T: Serialize>(lua: &Lua, value: &T) -> LuaResult<Value> {
    let json = serde_json::to_value(value).map_err(mlua::Error::external)?;
    json_to_lua_value(lua, &json)
}

/// Lua → JSON. Sequences become arrays; any other table, including an
/// empty one, becomes an object with its string keys.
pub fn lua_value_to_json(val: Value) -> serde_json::Value {
    match val {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::json!(i),
        Value::Number(n) => serde_json::json!(n),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy()),
        Value::Table(t) => {
            let pairs: Vec<_> = t.clone().pairs::<Value, Value>().filter_map(|p| p.ok()).collect();
            let is_array = !pairs.is_empty()
                && pairs.iter().enumerate().all(|(i, (k, _))| {
                    matches!(k, Value::Integer(n) if *n == (i as i64 + 1))
                });
            if is_array {
                serde_json::Value::Array(pairs.into_iter().map(|(_, v)| lua_value_to_json(v)).collect())
            } else {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs {
                    if let Value::String(ks) = k {
                        map.insert(ks.to_string_lossy(), lua_value_to_json(v));
                    }
                }
                serde_json::Value::Object(map)
            }
        }
        _ => serde_json::Value::Null,
    }
}

pub fn json_to_lua_value(lua: &Lua, val: &serde_json::Value) -> LuaResult<Value> {
    match val {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s.as_str())?)),
        serde_json::Value::Array(arr) => {
            let t = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                t.set(i + 1, json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
        serde_json::Value::Object(obj) => {
            let t = lua.create_table()?;
            for (k, v) in obj {
                t.set(k.as_str(), json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::LinkConfig;
    use crate::link::mock::{MockEngine, MockReply};
    use crate::link::{CorrelationRegistry, Session};
    use crate::scripting::sandbox::{create_sandboxed_vm, SandboxLimits};

    struct Bound {
        lua: Lua,
        log: ScriptLog,
        stops: mpsc::UnboundedReceiver<StopRequest>,
    }

    fn bind(client: CommandClient) -> Bound {
        let lua = create_sandboxed_vm(&SandboxLimits::default()).unwrap();
        let log = ScriptLog::new(50);
        let (tx, stops) = mpsc::unbounded_channel();
        let binding = ContextBinding {
            script_id: "s1".into(),
            script_name: "spinner".into(),
            target_slot_id: "Target".into(),
            serial: 7,
            client,
            log: log.clone(),
            stop_requests: tx,
        };
        let ctx = build_context_table(&lua, &binding).unwrap();
        lua.globals().set("ctx", ctx).unwrap();
        Bound { lua, log, stops }
    }

    fn offline() -> CommandClient {
        CommandClient::new(
            Session::new(&LinkConfig::default()),
            CorrelationRegistry::new(Duration::from_secs(5)),
        )
    }

    async fn online(engine: &MockEngine) -> CommandClient {
        let client = offline();
        client.connect(&engine.url).await.unwrap();
        client
    }

    fn engine(request: &serde_json::Value) -> MockReply {
        match request["$type"].as_str() {
            Some("getSlot") if request["slotId"] == "Missing" => {
                MockReply::fail(request, "Slot not found")
            }
            Some("getSlot") if request["includeComponentData"] == true => MockReply::ok(
                request,
                json!({
                    "id": request["slotId"],
                    "components": [
                        { "id": "C1", "componentType": "[Engine]Engine.Spinner", "members": {} },
                        { "id": "C2", "componentType": "[Engine]Engine.Light", "members": {} }
                    ]
                }),
            ),
            Some("getSlot") => MockReply::ok(
                request,
                json!({
                    "id": request["slotId"],
                    "name": { "value": "Thing" },
                    "children": [{ "id": "Kid1", "name": { "value": "Kid" } }]
                }),
            ),
            Some("getComponent") => MockReply::ok(
                request,
                json!({
                    "id": request["componentId"],
                    "componentType": "Engine.Renderer",
                    "members": {
                        "materials": { "$type": "list", "elements": [
                            { "$type": "reference", "targetId": "M1", "targetType": "Material" },
                            { "$type": "reference", "targetId": "M2", "targetType": "Material" }
                        ] }
                    }
                }),
            ),
            _ => MockReply::ok(request, json!({ "id": "New" })),
        }
    }

    #[test]
    fn context_fields_and_vars() {
        let bound = bind(offline());
        let (id, target, frame, vars): (String, String, i64, Table) = bound
            .lua
            .load("return ctx.scriptId, ctx.targetSlotId, ctx.frameCount, ctx.vars")
            .eval()
            .unwrap();
        assert_eq!((id.as_str(), target.as_str(), frame), ("s1", "Target", 0));
        assert_eq!(vars.raw_len(), 0);
    }

    #[test]
    fn log_methods_join_arguments_into_sink() {
        let bound = bind(offline());
        bound
            .lua
            .load(r#"ctx:log("speed", 2, true) ctx:warn("careful") ctx:error({ a = 1 })"#)
            .exec()
            .unwrap();

        let entries = bound.log.entries(10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "speed 2 true");
        assert_eq!(entries[0].script_id, "s1");
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(entries[2].message, r#"{"a":1}"#);
    }

    #[test]
    fn stop_posts_id_and_serial() {
        let mut bound = bind(offline());
        bound.lua.load("ctx:stop()").exec().unwrap();
        assert_eq!(
            bound.stops.try_recv().unwrap(),
            StopRequest {
                script_id: "s1".into(),
                serial: 7
            }
        );
    }

    #[test]
    fn math_helpers() {
        let bound = bind(offline());
        let (lerped, y, alpha): (f64, f64, f64) = bound
            .lua
            .load(
                "return ctx.math.lerp(0, 10, 0.5), ctx.math.euler(0, 90, 0).y, ctx.math.hexColor('#00000080').a",
            )
            .eval()
            .unwrap();
        assert_eq!(lerped, 5.0);
        assert!((y - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!((alpha - 128.0 / 255.0).abs() < 1e-4);

        let bad = bound.lua.load("return ctx.math.hexColor('nope')").exec();
        assert!(bad.unwrap_err().to_string().contains("invalid hex color"));
    }

    #[test]
    fn json_conversion_of_tables() {
        let lua = Lua::new();
        let seq: Value = lua.load("return { 1, 'two', true }").eval().unwrap();
        assert_eq!(lua_value_to_json(seq), json!([1, "two", true]));
        let empty: Value = lua.load("return {}").eval().unwrap();
        assert_eq!(lua_value_to_json(empty), json!({}));
        let nested: Value = lua.load("return { x = 1.5, list = { 'a' } }").eval().unwrap();
        assert_eq!(lua_value_to_json(nested), json!({ "x": 1.5, "list": ["a"] }));
    }

    #[tokio::test]
    async fn get_slot_defaults_to_target() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (id, name): (String, String) = bound
            .lua
            .load("local s = ctx:getSlot() return s.id, s.name.value")
            .eval_async()
            .await
            .unwrap();
        assert_eq!((id.as_str(), name.as_str()), ("Target", "Thing"));
    }

    #[tokio::test]
    async fn failed_response_raises_error_info() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (ok, message): (bool, String) = bound
            .lua
            .load(r#"local ok, err = pcall(function() return ctx:getSlot("Missing") end) return ok, tostring(err)"#)
            .eval_async()
            .await
            .unwrap();
        assert!(!ok);
        assert!(message.contains("Slot not found"), "{message}");
    }

    #[tokio::test]
    async fn offline_call_raises_not_connected() {
        let bound = bind(offline());
        let err = bound.lua.load("return ctx:getSlot()").exec_async().await.unwrap_err();
        assert!(err.to_string().contains("Not connected"), "{err}");
    }

    #[tokio::test]
    async fn create_slot_parents_under_target() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let id: String = bound
            .lua
            .load(r#"return ctx:createSlot({ name = "Child", position = { x = 1, y = 2, z = 3 } }).id"#)
            .eval_async()
            .await
            .unwrap();
        assert_eq!(id, "New");

        let sent = &mock.requests_of("addSlot")[0]["data"];
        assert_eq!(sent["parent"]["targetId"], "Target");
        assert_eq!(sent["name"]["value"], "Child");
        assert_eq!(sent["position"]["value"]["y"], 2.0);
    }

    #[tokio::test]
    async fn unknown_slot_attribute_is_rejected_before_sending() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let err = bound
            .lua
            .load(r#"ctx:updateSlot({ nmae = "typo" })"#)
            .exec_async()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nmae"), "{err}");
        assert!(mock.requests_of("updateSlot").is_empty());
    }

    #[tokio::test]
    async fn find_component_matches_short_type_name() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (found, missing): (String, Value) = bound
            .lua
            .load(r#"return ctx:findComponent("Light").id, ctx:findComponent("Collider")"#)
            .eval_async()
            .await
            .unwrap();
        assert_eq!(found, "C2");
        assert!(missing.is_nil());
    }

    #[tokio::test]
    async fn set_list_element_uses_one_based_index() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        bound
            .lua
            .load(r#"ctx:setListElement("R1", "materials", 1, "M9")"#)
            .exec_async()
            .await
            .unwrap();

        let updates = mock.requests_of("updateComponent");
        assert_eq!(updates.len(), 1);
        let elements = &updates[0]["data"]["members"]["materials"]["elements"];
        assert_eq!(elements[0]["targetId"], "M9");
        assert_eq!(elements[1]["targetId"], "M2");
        assert_eq!(elements[0]["targetType"], "Material");
    }

    #[tokio::test]
    async fn get_children_fetches_one_level_of_target() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (count, first): (i64, String) = bound
            .lua
            .load("local kids = ctx:getChildren() return #kids, kids[1].id")
            .eval_async()
            .await
            .unwrap();
        assert_eq!((count, first.as_str()), (1, "Kid1"));

        let sent = &mock.requests_of("getSlot")[0];
        assert_eq!(sent["slotId"], "Target");
        assert_eq!(sent["depth"], 1);
        assert_eq!(sent["includeComponentData"], false);
    }

    #[tokio::test]
    async fn find_slot_takes_start_and_depth() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (found, missing): (String, Value) = bound
            .lua
            .load(r#"return ctx:findSlot("Kid", "Root", 3).id, ctx:findSlot("Nobody")"#)
            .eval_async()
            .await
            .unwrap();
        assert_eq!(found, "Kid1");
        assert!(missing.is_nil());

        let sent = mock.requests_of("getSlot");
        assert_eq!(sent[0]["slotId"], "Root");
        assert_eq!(sent[0]["depth"], 3);
        assert_eq!(sent[1]["slotId"], "Target");
        assert_eq!(sent[1]["depth"], UNBOUNDED_DEPTH);
    }

    #[tokio::test]
    async fn update_slot_by_id_patches_that_slot() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let id: String = bound
            .lua
            .load(r#"return ctx:updateSlotById("S9", { name = "Renamed", active = false }).id"#)
            .eval_async()
            .await
            .unwrap();
        assert_eq!(id, "New");

        let data = &mock.requests_of("updateSlot")[0]["data"];
        assert_eq!(data["id"], "S9");
        assert_eq!(data["name"]["value"], "Renamed");
        assert_eq!(data["isActive"]["value"], false);
        assert!(data.get("parent").is_none());
    }

    #[tokio::test]
    async fn remove_slot_sends_given_id() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        bound.lua.load(r#"ctx:removeSlot("S9")"#).exec_async().await.unwrap();

        let sent = mock.requests_of("removeSlot");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["slotId"], "S9");
    }

    #[tokio::test]
    async fn get_components_defaults_to_target() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (count, second): (i64, String) = bound
            .lua
            .load(r#"local own = ctx:getComponents() ctx:getComponents("Other") return #own, own[2].componentType"#)
            .eval_async()
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(second, "[Engine]Engine.Light");

        let sent = mock.requests_of("getSlot");
        assert_eq!(sent[0]["slotId"], "Target");
        assert_eq!(sent[0]["includeComponentData"], true);
        assert_eq!(sent[1]["slotId"], "Other");
    }

    #[tokio::test]
    async fn get_component_returns_members() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let (kind, second): (String, String) = bound
            .lua
            .load(r#"local c = ctx:getComponent("R1") return c.componentType, c.members.materials.elements[2].targetId"#)
            .eval_async()
            .await
            .unwrap();
        assert_eq!((kind.as_str(), second.as_str()), ("Engine.Renderer", "M2"));
        assert_eq!(mock.requests_of("getComponent")[0]["componentId"], "R1");
    }

    #[tokio::test]
    async fn add_component_type_then_members_then_slot() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        let id: String = bound
            .lua
            .load(
                r#"
                ctx:addComponent("Engine.Light")
                return ctx:addComponent("Engine.Spinner", { speed = { ["$type"] = "float", value = 90 } }, "S2").id
                "#,
            )
            .eval_async()
            .await
            .unwrap();
        assert_eq!(id, "New");

        let sent = mock.requests_of("addComponent");
        assert_eq!(sent[0]["containerSlotId"], "Target");
        assert_eq!(sent[0]["data"]["componentType"], "Engine.Light");
        assert_eq!(sent[0]["data"]["members"], json!({}));
        assert_eq!(sent[1]["containerSlotId"], "S2");
        assert_eq!(sent[1]["data"]["componentType"], "Engine.Spinner");
        assert_eq!(sent[1]["data"]["members"]["speed"]["$type"], "float");
        assert_eq!(sent[1]["data"]["members"]["speed"]["value"], 90.0);
    }

    #[tokio::test]
    async fn update_component_sends_id_and_members() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        bound
            .lua
            .load(r#"ctx:updateComponent("C1", { enabled = { ["$type"] = "bool", value = false } })"#)
            .exec_async()
            .await
            .unwrap();

        let data = &mock.requests_of("updateComponent")[0]["data"];
        assert_eq!(data["id"], "C1");
        assert!(data.get("componentType").is_none());
        assert_eq!(data["members"]["enabled"]["$type"], "bool");
        assert_eq!(data["members"]["enabled"]["value"], false);
    }

    #[tokio::test]
    async fn remove_component_sends_given_id() {
        let mock = MockEngine::spawn(engine).await;
        let bound = bind(online(&mock).await);

        bound.lua.load(r#"ctx:removeComponent("C2")"#).exec_async().await.unwrap();
        assert_eq!(mock.requests_of("removeComponent")[0]["componentId"], "C2");
    }
}
