//! OS signal mapping
//!
//! Interrupt (SIGINT) posts `Stop` and the listener returns; hangup
//! (SIGHUP) posts `Reload` and the listener keeps running. The pipeline
//! itself never touches signal handlers; tests and embedders post events
//! on the bus directly.

use crate::events::{EventBus, PipelineEvent};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Spawn the signal listener as a background task.
pub fn spawn(bus: Arc<EventBus>) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(listen(bus))
}

/// Listen for OS signals and translate them to pipeline events.
///
/// Returns after posting `Stop`.
#[cfg(unix)]
pub async fn listen(bus: Arc<EventBus>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                info!("shutdown initiated");
                bus.post(PipelineEvent::Stop);
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("reload initiated");
                bus.post(PipelineEvent::Reload);
            }
        }
    }
}

/// Listen for ctrl-c and translate it to `Stop`. Reload has no portable
/// signal outside unix.
#[cfg(not(unix))]
pub async fn listen(bus: Arc<EventBus>) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown initiated");
    bus.post(PipelineEvent::Stop);
    Ok(())
}
