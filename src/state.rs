/// `state.rs` - the single link and runtime shared by every command handler
use crate::{
    config::Config,
    error::LinkResult,
    link::{CommandClient, CorrelationRegistry, Session},
    scripting::{ScriptRuntime, TickMode},
};

/// Global application state: one session, one correlation registry, one
/// command client, one script runtime.
pub struct AppState {
    pub config: Config,
    pub client: CommandClient,
    pub scripts: ScriptRuntime,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let mode = TickMode::Timer(config.runtime.tick_interval());
        Self::with_tick_mode(config, mode)
    }

    pub fn with_tick_mode(config: Config, mode: TickMode) -> Self {
        let session = Session::new(&config.link);
        let registry = CorrelationRegistry::new(config.link.request_timeout());
        let client = CommandClient::new(session, registry);
        let scripts = ScriptRuntime::new(client.clone(), &config.runtime, mode);
        Self {
            config,
            client,
            scripts,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.link.url
    }

    /// Connect to the configured endpoint.
    pub async fn connect(&self) -> LinkResult<()> {
        log::info!("Connecting to {}", self.url());
        self.client.connect(self.url()).await
    }

    /// Stop all scripts (destroy hooks included), then drop the connection.
    pub async fn shutdown(&self) {
        self.scripts.shutdown().await;
        if self.client.is_connected() {
            self.client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::link::mock::{MockEngine, MockReply};

    #[tokio::test]
    async fn scripts_share_the_state_client() {
        let engine = MockEngine::spawn(|req| MockReply::ok(req, json!({ "id": "S1" }))).await;
        let mut config = Config::default();
        config.link.url = engine.url.clone();
        let state = AppState::with_tick_mode(config, TickMode::Manual);

        state.connect().await.unwrap();
        let code = r#"function onStart(ctx) ctx.vars.id = ctx:getSlot().id end"#;
        assert!(state.scripts.run("a", "reader", code, "S1").await.unwrap());
        assert_eq!(state.scripts.var("a", "id"), Some(json!("S1")));

        state.shutdown().await;
        assert_eq!(state.scripts.running_count(), 0);
        assert!(!state.client.is_connected());
    }

    #[tokio::test]
    async fn shutdown_without_connection_is_quiet() {
        let state = AppState::new(Config::default());
        state.shutdown().await;
        assert!(!state.client.is_connected());
    }
}
