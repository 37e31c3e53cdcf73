pub mod commands;
pub mod config;
pub mod error;
pub mod link;
pub mod scripting;
pub mod state;

use std::process::ExitCode;

use clap::Parser;

use commands::Cli;

/// Entry point of the `slotlink` binary.
pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // One engine connection and one tick loop; a single thread is plenty.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to build Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(commands::execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
