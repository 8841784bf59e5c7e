//! Process-wide reload/stop event bus
//!
//! A single publisher-subscriber bus broadcasts [`PipelineEvent`]s to two
//! kinds of listeners: internal worker loops, which subscribe a broadcast
//! receiver at spawn time and select on it, and plugin globals, which are
//! registered by name and notified synchronously under the panic trap.
//!
//! `Reload` is advisory — the topology is not rebuilt. `Stop` terminates
//! worker loops at their next select.

use crate::plugin::PluginGlobal;
use crate::safecall;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Events broadcast to every stage and worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Advisory reload hint, typically mapped from SIGHUP
    Reload,
    /// Graceful shutdown, typically mapped from SIGINT
    Stop,
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Reload => f.write_str("reload"),
            PipelineEvent::Stop => f.write_str("stop"),
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// The pipeline's event bus.
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    globals: RwLock<Vec<(String, Arc<dyn PluginGlobal>)>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            globals: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe a worker loop to event broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Register a plugin global for synchronous event notification.
    pub fn register_global(&self, name: impl Into<String>, global: Arc<dyn PluginGlobal>) {
        self.globals.write().push((name.into(), global));
    }

    /// Number of registered plugin globals.
    pub fn global_count(&self) -> usize {
        self.globals.read().len()
    }

    /// Broadcast an event to subscribed workers and notify every plugin
    /// global. A panicking handler is logged and the remaining globals
    /// are still notified.
    pub fn post(&self, event: PipelineEvent) {
        // No subscribers is fine; plugin globals are notified regardless.
        let _ = self.tx.send(event);

        for (name, global) in self.globals.read().iter() {
            if let Err(e) = safecall::call(|| global.event(event)) {
                warn!(plugin = %name, event = %event, error = %e, "event handler panicked");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
