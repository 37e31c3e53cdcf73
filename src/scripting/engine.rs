/// `scripting/engine.rs` - script runtime and the shared tick loop
///
/// `ScriptRuntime` owns every running instance. Each instance has its own
/// sandboxed VM and `ctx` table. One tick loop, shared by all instances,
/// runs only while at least one instance exists.
///
/// Script source is evaluated once at `run` time. Hooks are picked up by
/// name (`onStart`, `onUpdate`, `onDestroy`); a script that ends with its
/// own top-level `return` is rejected at compile time.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::{Duration, Instant};

use mlua::{Function, Lua, Table};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    api::{ContextBinding, StopRequest},
    context::{ClockSnapshot, LogLevel, ScriptContext, ScriptLog, ScriptLogEntry},
    lifecycle::{Hook, InstanceState},
    sandbox::{create_sandboxed_vm, SandboxLimits},
};
use crate::config::RuntimeConfig;
use crate::error::ScriptError;
use crate::link::CommandClient;

/// How ticks are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// A background task ticks at this interval while instances exist.
    Timer(Duration),
    /// Nothing ticks unless the owner calls `tick()`.
    Manual,
}

// ── Instance ──────────────────────────────────────────────────────────────────

struct Hooks {
    start: Option<Function>,
    update: Option<Function>,
    destroy: Option<Function>,
}

impl Hooks {
    fn get(&self, hook: Hook) -> Option<Function> {
        match hook {
            Hook::Start => self.start.clone(),
            Hook::Update => self.update.clone(),
            Hook::Destroy => self.destroy.clone(),
        }
    }
}

struct ScriptInstance {
    id: String,
    serial: u64,
    name: String,
    // Keeps the VM alive for as long as the instance is referenced
    _lua: Lua,
    hooks: Hooks,
    context: Mutex<ScriptContext>,
    state: Mutex<InstanceState>,
}

impl ScriptInstance {
    fn context(&self) -> MutexGuard<'_, ScriptContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ctx_table(&self) -> Table {
        self.context().table().clone()
    }

    fn state(&self) -> InstanceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: InstanceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Moves `from` → `to` only if the instance is still in `from`.
    fn advance_state(&self, from: InstanceState, to: InstanceState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

/// Read-only view of an instance for callers outside the runtime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub target_slot_id: String,
    pub state: InstanceState,
    pub clock: ClockSnapshot,
}

// ── Runtime ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Instances {
    live: Vec<Arc<ScriptInstance>>,
    loop_task: Option<JoinHandle<()>>,
    last_tick: Option<Instant>,
}

/// Shared handle - lives in AppState.
#[derive(Clone)]
pub struct ScriptRuntime {
    client: CommandClient,
    log: ScriptLog,
    limits: SandboxLimits,
    mode: TickMode,
    instances: Arc<Mutex<Instances>>,
    next_serial: Arc<AtomicU64>,
    stop_tx: mpsc::UnboundedSender<StopRequest>,
    stop_rx: Arc<Mutex<mpsc::UnboundedReceiver<StopRequest>>>,
}

impl ScriptRuntime {
    pub fn new(client: CommandClient, config: &RuntimeConfig, mode: TickMode) -> Self {
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        Self {
            client,
            log: ScriptLog::new(config.log_capacity),
            limits: SandboxLimits::from(config),
            mode,
            instances: Arc::new(Mutex::new(Instances::default())),
            next_serial: Arc::new(AtomicU64::new(1)),
            stop_tx,
            stop_rx: Arc::new(Mutex::new(stop_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Instances> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Compile and start a script. `Ok(false)` if `id` is already live.
    ///
    /// Compile failures are returned and leave nothing behind. Errors thrown
    /// by `onStart` are logged; the instance still enters the running set.
    pub async fn run(
        &self,
        id: &str,
        name: &str,
        code: &str,
        target_slot_id: &str,
    ) -> Result<bool, ScriptError> {
        if self.is_running(id) {
            log::debug!("Script {id} is already running, ignoring run");
            return Ok(false);
        }
        // Top-level code runs here, outside the instances lock
        let instance = Arc::new(self.compile(id, name, code, target_slot_id)?);
        {
            let mut instances = self.lock();
            // A concurrent run may have registered the id while we compiled
            if instances.live.iter().any(|i| i.id == id && i.state().is_live()) {
                log::debug!("Script {id} is already running, ignoring run");
                return Ok(false);
            }
            instances.live.push(Arc::clone(&instance));
            self.ensure_loop(&mut instances);
        }
        log::info!("Started script '{name}' ({id}) on slot {target_slot_id}");

        self.call_hook(&instance, Hook::Start).await;
        instance.advance_state(InstanceState::Starting, InstanceState::Running);
        Ok(true)
    }

    /// Run `onDestroy` and remove the instance. `false` if nothing live has `id`.
    pub async fn stop(&self, id: &str) -> bool {
        self.stop_instance(id, None, false).await
    }

    /// Stop every instance, then the tick loop.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self
            .lock()
            .live
            .iter()
            .filter(|i| i.state().is_live())
            .map(|i| i.id.clone())
            .collect();
        for id in ids {
            self.stop_instance(&id, None, false).await;
        }
        if let Some(task) = self.lock().loop_task.take() {
            task.abort();
        }
        log::info!("Script runtime shut down");
    }

    /// One frame for every running instance. Returns how many were ticked.
    ///
    /// Stop requests from `ctx:stop()` are handled first. Each `onUpdate`
    /// runs inline until it finishes or suspends on an engine call; a
    /// suspended update carries on in its own task so one slow script
    /// never holds up the others.
    pub async fn tick(&self) -> usize {
        self.tick_inner(false).await
    }

    // ── Introspection ─────────────────────────────────────────────────────

    /// Instances in the running set, including ones still starting or stopping.
    pub fn running_count(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock().live.iter().any(|i| i.id == id && i.state().is_live())
    }

    pub fn instances(&self) -> Vec<InstanceSummary> {
        self.lock()
            .live
            .iter()
            .map(|i| {
                let ctx = i.context();
                InstanceSummary {
                    id: i.id.clone(),
                    name: i.name.clone(),
                    target_slot_id: ctx.target_slot_id().to_string(),
                    state: i.state(),
                    clock: ctx.clock(),
                }
            })
            .collect()
    }

    pub fn clock(&self, id: &str) -> Option<ClockSnapshot> {
        self.find(id).map(|i| i.context().clock())
    }

    /// `ctx.vars[key]` of a running instance.
    pub fn var(&self, id: &str, key: &str) -> Option<serde_json::Value> {
        let instance = self.find(id)?;
        let ctx = instance.context();
        match ctx.var(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Reading var '{key}' of script {id} failed: {e}");
                None
            }
        }
    }

    pub fn log(&self) -> &ScriptLog {
        &self.log
    }

    pub fn log_entries(&self, limit: usize) -> Vec<ScriptLogEntry> {
        self.log.entries(limit)
    }

    pub fn is_loop_active(&self) -> bool {
        self.lock()
            .loop_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn find(&self, id: &str) -> Option<Arc<ScriptInstance>> {
        self.lock().live.iter().find(|i| i.id == id).cloned()
    }

    fn compile(
        &self,
        id: &str,
        name: &str,
        code: &str,
        target_slot_id: &str,
    ) -> Result<ScriptInstance, ScriptError> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let lua = create_sandboxed_vm(&self.limits)?;
        let context = ScriptContext::new(
            &lua,
            ContextBinding {
                script_id: id.to_string(),
                script_name: name.to_string(),
                target_slot_id: target_slot_id.to_string(),
                serial,
                client: self.client.clone(),
                log: self.log.clone(),
                stop_requests: self.stop_tx.clone(),
            },
        )?;

        // Same first line as the user's code so error line numbers match
        let chunk = format!(
            "local ctx = ...; local {}, {}, {}; {code}\nreturn {0}, {1}, {2}",
            Hook::Start.function_name(),
            Hook::Update.function_name(),
            Hook::Destroy.function_name(),
        );
        let (start, update, destroy) = lua
            .load(chunk)
            .set_name(format!("={name}"))
            .call::<(Option<Function>, Option<Function>, Option<Function>)>(context.table().clone())
            .map_err(|e| {
                let message = e.to_string();
                let line = parse_error_line(&message);
                log::warn!("Script '{name}' ({id}) failed to compile: {message}");
                ScriptError::Compile { message, line }
            })?;

        Ok(ScriptInstance {
            id: id.to_string(),
            serial,
            name: name.to_string(),
            _lua: lua,
            hooks: Hooks {
                start,
                update,
                destroy,
            },
            context: Mutex::new(context),
            state: Mutex::new(InstanceState::Starting),
        })
    }

    async fn call_hook(&self, instance: &ScriptInstance, hook: Hook) {
        let Some(function) = instance.hooks.get(hook) else {
            return;
        };
        if let Err(e) = function.call_async::<()>(instance.ctx_table()).await {
            self.report(instance, hook, &e);
        }
    }

    fn report(&self, instance: &ScriptInstance, hook: Hook, err: &mlua::Error) {
        self.log.push(
            LogLevel::Error,
            &instance.id,
            &instance.name,
            format!("{} failed: {err}", hook.function_name()),
        );
    }

    /// With `serial` set, only that exact instance is stopped; a request
    /// from an instance that is already gone matches nothing.
    ///
    /// `from_loop` is set when the tick loop itself is stopping an instance;
    /// the loop then winds itself down instead of being aborted.
    async fn stop_instance(&self, id: &str, serial: Option<u64>, from_loop: bool) -> bool {
        let instance = {
            let instances = self.lock();
            let Some(instance) = instances
                .live
                .iter()
                .find(|i| {
                    i.id == id && i.state().is_live() && (serial.is_none() || serial == Some(i.serial))
                })
                .cloned()
            else {
                return false;
            };
            instance.set_state(InstanceState::Stopping);
            instance
        };

        self.call_hook(&instance, Hook::Destroy).await;

        {
            let mut instances = self.lock();
            instances.live.retain(|i| !Arc::ptr_eq(i, &instance));
            instance.set_state(InstanceState::Removed);
            if instances.live.is_empty() {
                instances.last_tick = None;
                if !from_loop {
                    if let Some(task) = instances.loop_task.take() {
                        task.abort();
                        log::debug!("Tick loop stopped, no scripts left");
                    }
                }
            }
        }
        log::info!("Stopped script '{}' ({id})", instance.name);
        true
    }

    async fn tick_inner(&self, from_loop: bool) -> usize {
        let requested: Vec<StopRequest> = {
            let mut rx = self.stop_rx.lock().unwrap_or_else(PoisonError::into_inner);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for request in requested {
            let stopped = self
                .stop_instance(&request.script_id, Some(request.serial), from_loop)
                .await;
            if !stopped {
                log::debug!("Dropping stale stop request for script {}", request.script_id);
            }
        }

        let now = Instant::now();
        let (running, delta_time) = {
            let mut instances = self.lock();
            let delta_time = instances
                .last_tick
                .map(|last| now.saturating_duration_since(last).as_secs_f64())
                .unwrap_or(0.0);
            instances.last_tick = Some(now);
            let running: Vec<_> = instances
                .live
                .iter()
                .filter(|i| i.state() == InstanceState::Running)
                .cloned()
                .collect();
            (running, delta_time)
        };

        for instance in &running {
            let advanced = instance.context().advance(now, delta_time);
            if let Err(e) = advanced {
                self.report(instance, Hook::Update, &e);
                continue;
            }
            let Some(update) = instance.hooks.get(Hook::Update) else {
                continue;
            };

            let mut call = Box::pin(update.call_async::<()>(instance.ctx_table()));
            match futures_util::poll!(call.as_mut()) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => self.report(instance, Hook::Update, &e),
                Poll::Pending => {
                    let runtime = self.clone();
                    let instance = Arc::clone(instance);
                    tokio::spawn(async move {
                        if let Err(e) = call.await {
                            runtime.report(&instance, Hook::Update, &e);
                        }
                    });
                }
            }
        }
        running.len()
    }

    fn ensure_loop(&self, instances: &mut Instances) {
        let TickMode::Timer(interval) = self.mode else {
            return;
        };
        if instances
            .loop_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }
        instances.last_tick = Some(Instant::now());
        let runtime = self.clone();
        instances.loop_task = Some(tokio::spawn(runtime.drive(interval)));
        log::debug!("Tick loop started ({} ms)", interval.as_millis());
    }

    async fn drive(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick of a tokio interval completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.tick_inner(true).await;

            let mut instances = self.lock();
            if instances.live.is_empty() {
                instances.loop_task = None;
                instances.last_tick = None;
                log::debug!("Tick loop stopped, no scripts left");
                break;
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Line number from a Lua error message (e.g. "name:5: attempt to ...")
fn parse_error_line(err: &str) -> Option<u32> {
    err.split(':').skip(1).find_map(|part| part.trim().parse::<u32>().ok())
}
