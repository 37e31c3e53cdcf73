/// `commands/script_commands.rs` - run a script file against the live engine
use std::path::Path;
use std::time::Duration;

use super::Output;
use crate::{error::CliError, scripting::ScriptLogEntry, state::AppState};

/// Runs until `seconds` pass, the script stops itself, or Ctrl-C.
/// The destroy hook always runs before the log is printed.
pub async fn run_script(
    state: &AppState,
    file: &Path,
    target: &str,
    seconds: f64,
    name: Option<String>,
) -> Result<Output, CliError> {
    let limit = Duration::try_from_secs_f64(seconds)
        .map_err(|_| CliError::Input(format!("--seconds must be a duration >= 0, got {seconds}")))?;
    let code = std::fs::read_to_string(file).map_err(|source| CliError::Io {
        path: file.display().to_string(),
        source,
    })?;
    let name = name.unwrap_or_else(|| {
        file.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("script")
            .to_string()
    });
    let id = uuid::Uuid::new_v4().to_string();

    state.scripts.run(&id, &name, &code, target).await?;
    wait_while_running(state, &id, limit).await;
    state.scripts.stop(&id).await;

    let lines: Vec<String> = state
        .scripts
        .log()
        .entries_for(&id)
        .iter()
        .map(format_entry)
        .collect();
    Ok(Output::Text(lines.join("\n")))
}

async fn wait_while_running(state: &AppState, id: &str, limit: Duration) {
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);
    let mut check = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping script");
                break;
            }
            _ = check.tick() => {
                if !state.scripts.is_running(id) {
                    log::debug!("Script {id} stopped itself");
                    break;
                }
            }
        }
    }
}

fn format_entry(entry: &ScriptLogEntry) -> String {
    let time = chrono::DateTime::from_timestamp_millis(entry.timestamp)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_default();
    format!("{time} [{}] {}", entry.level, entry.message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::link::mock::{MockEngine, MockReply};

    fn write_script(code: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("slotlink-{}.lua", uuid::Uuid::new_v4()));
        std::fs::write(&path, code).unwrap();
        path
    }

    async fn connected(engine: &MockEngine) -> AppState {
        let mut config = Config::default();
        config.link.url = engine.url.clone();
        config.runtime.tick_interval_ms = 5;
        let state = AppState::new(config);
        state.connect().await.unwrap();
        state
    }

    #[tokio::test]
    async fn runs_until_script_stops_itself() {
        let engine = MockEngine::spawn(|req| {
            MockReply::ok(req, json!({ "id": req["slotId"], "name": { "value": "Cube" } }))
        })
        .await;
        let state = connected(&engine).await;
        let path = write_script(
            r#"
            function onStart(ctx) ctx:log("on", ctx:getSlot().name.value) end
            function onUpdate(ctx) if ctx.frameCount >= 3 then ctx:stop() end end
            function onDestroy(ctx) ctx:log("frames", ctx.frameCount) end
            "#,
        );

        let started = std::time::Instant::now();
        let Output::Text(text) = run_script(&state, &path, "S1", 30.0, None).await.unwrap() else {
            panic!("run-script should print text");
        };
        std::fs::remove_file(&path).unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{text}");
        assert!(lines[0].ends_with("[info] on Cube"), "{text}");
        assert!(lines[1].contains("frames 3"), "{text}");
        assert_eq!(state.scripts.running_count(), 0);
    }

    #[tokio::test]
    async fn compile_error_fails_the_command() {
        let engine = MockEngine::spawn(|req| MockReply::ok(req, json!({}))).await;
        let state = connected(&engine).await;
        let path = write_script("function onUpdate(ctx)");

        let err = run_script(&state, &path, "S1", 1.0, Some("broken".into()))
            .await
            .unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, CliError::Script(_)));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let state = AppState::new(Config::default());
        let err = run_script(&state, Path::new("/nonexistent/x.lua"), "S1", 1.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }

    #[tokio::test]
    async fn unrepresentable_durations_are_rejected() {
        let state = AppState::new(Config::default());
        for seconds in [-1.0, 1e20, f64::NAN, f64::INFINITY] {
            let err = run_script(&state, Path::new("x.lua"), "S1", seconds, None)
                .await
                .unwrap_err();
            assert!(matches!(err, CliError::Input(_)), "{seconds}: {err}");
        }
    }
}
