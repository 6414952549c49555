//! Main Entrypoint for the Rumi Agent Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging and loading prompts.
//! 3. Wiring the room relay, the action client, the tool dispatcher and the
//!    realtime engine factory into a session orchestrator.
//! 4. Cleaning up stale rooms, then serving sessions back-to-back until
//!    Ctrl+C.

use anyhow::Context;
use clap::Parser;
use rumi_agent::{
    admin::LiveKitRoomAdmin,
    config::Config,
    prompts::Prompts,
    provider::{ProviderEngineFactory, ProviderSettings},
    relay::RoomRelay,
};
use rumi_core::{
    SessionHandle, SessionOrchestrator, SessionSettings, ToolDispatcher,
    action_client::HttpActionClient, tools::default_catalog,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// Pause before waiting for the next participant after a failed session.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "agent", version, about = "Voice session orchestrator for the Rumi hospitality robot")]
struct Cli {
    /// Serve a single session, then exit.
    #[arg(long)]
    once: bool,
}

/// Listens for the `Ctrl+C` signal to shut down gracefully.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing agent...");

    let prompts = Prompts::load(&config.prompts_path)?;

    // --- 3. Wire Collaborators ---
    let session = SessionHandle::new();
    let actions = Arc::new(HttpActionClient::with_timeout(
        config.robot_api_base.clone(),
        config.robot_api_timeout,
    ));
    let dispatcher = Arc::new(ToolDispatcher::new(default_catalog(), session, actions));
    let relay = Arc::new(RoomRelay::new(
        config.room_name.clone(),
        config.agent_identity.clone(),
        config.bind_address,
    ));
    let engines = Arc::new(ProviderEngineFactory::new(ProviderSettings::from_config(
        &config,
    )));

    let settings = SessionSettings {
        instructions: prompts.instructions,
        greeting: prompts.greeting,
        participant_timeout: config.participant_timeout,
        stale_room_pattern: config.stale_room_pattern.clone(),
        ..SessionSettings::default()
    };
    let mut orchestrator = SessionOrchestrator::new(relay, engines, dispatcher, settings);
    if let Some(admin) = &config.room_admin {
        orchestrator = orchestrator.with_room_admin(Arc::new(LiveKitRoomAdmin::new(admin)));
    }

    info!(
        provider = ?config.provider,
        model = %config.model,
        room = %config.room_name,
        bind_address = %config.bind_address,
        robot_api = %config.robot_api_base,
        "Agent configured. Starting..."
    );

    // --- 4. Serve Sessions ---
    orchestrator.startup().await;

    let serve = async {
        loop {
            let result = orchestrator.run_session().await;
            if orchestrator.is_shutting_down() {
                return Ok(());
            }
            match result {
                Ok(summary) => info!(?summary, "Session finished."),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Session failed, waiting for the next participant.");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
            if cli.once {
                return Ok(());
            }
        }
    };
    tokio::pin!(serve);

    let result = tokio::select! {
        result = &mut serve => result,
        _ = shutdown_signal() => {
            // Let the current session close its engine before exiting.
            orchestrator.shutdown();
            serve.await
        }
    };
    result.context("Agent stopped")?;

    orchestrator.session().clear();
    info!("Agent has shut down.");
    Ok(())
}
