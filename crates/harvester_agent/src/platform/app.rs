use std::path::PathBuf;

use agent_logging::{agent_info, agent_warn};
use anyhow::{Context, Result};
use harvester_core::ConnectionEvent;
use harvester_engine::Harvester;
use tokio::sync::broadcast::error::RecvError;

use super::config::load_settings;
use super::logging;

/// Runs the agent until ctrl-c. `settings_path` is an optional RON file.
pub async fn run_agent(settings_path: Option<String>) -> Result<()> {
    let settings_path = settings_path.map(PathBuf::from);
    let settings = load_settings(settings_path.as_deref())?;
    logging::initialize(
        settings.log.destination,
        settings.log.level_filter()?,
        settings.log.file.as_deref(),
    );

    let harvester = Harvester::new(settings.agent).context("failed to build harvester")?;
    let mut events = harvester.subscribe();
    harvester.start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    agent_warn!("failed to listen for ctrl-c: {}", err);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected) => {
                    agent_info!("{} connected to {}", harvester.name(), harvester.config().host);
                }
                Ok(ConnectionEvent::Disconnected) => {
                    agent_warn!("{} lost its collector; retrying", harvester.name());
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    agent_info!("shutting down {}", harvester.name());
    harvester.shutdown();
    Ok(())
}
