//! Built-in outputs

use crate::events::PipelineEvent;
use crate::pack::Pack;
use crate::plugin::{Output, Plugin, PluginConfig, PluginContext, PluginGlobal};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use virta_core::Message;

/// Output that emits every delivered message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOutput;

impl LogOutput {
    /// Create a log output.
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for LogOutput {}

#[async_trait]
impl Output for LogOutput {
    async fn deliver(&self, pack: &Pack) {
        info!(target: "virta::outputs", message = ?pack.message, "delivered");
    }
}

const COUNT_CHANNEL_CAPACITY: usize = 30_000;
const RATE_TICK: Duration = Duration::from_secs(1);
const AGGREGATE_TICK: Duration = Duration::from_secs(10);

/// Throughput counter output.
///
/// Deliveries feed a shared counting loop that logs the per-second
/// message rate and, every ten seconds, a min/max/mean summary of the
/// collected rates. The loop is the plugin's shared global, created once
/// by `init_once`; a `Reload` event resets the counters.
pub struct CounterOutput {
    tx: OnceLock<mpsc::Sender<u64>>,
}

impl CounterOutput {
    /// Create a counter output.
    pub fn new() -> Self {
        Self {
            tx: OnceLock::new(),
        }
    }
}

impl Default for CounterOutput {
    fn default() -> Self {
        Self::new()
    }
}

struct CounterGlobal {
    reset: Arc<AtomicBool>,
}

impl PluginGlobal for CounterGlobal {
    fn event(&self, event: PipelineEvent) {
        if event == PipelineEvent::Reload {
            self.reset.store(true, Ordering::SeqCst);
        }
    }
}

impl Plugin for CounterOutput {
    fn init_once(
        &mut self,
        _config: &PluginConfig,
        ctx: &PluginContext,
    ) -> Result<Option<Arc<dyn PluginGlobal>>, virta_core::PluginError> {
        let (tx, rx) = mpsc::channel(COUNT_CHANNEL_CAPACITY);
        let reset = Arc::new(AtomicBool::new(false));
        tokio::spawn(counter_loop(rx, ctx.bus.subscribe(), reset.clone()));
        let _ = self.tx.set(tx);
        Ok(Some(Arc::new(CounterGlobal { reset })))
    }
}

#[async_trait]
impl Output for CounterOutput {
    async fn deliver(&self, _pack: &Pack) {
        if let Some(tx) = self.tx.get() {
            let _ = tx.send(1).await;
        }
    }
}

async fn counter_loop(
    mut rx: mpsc::Receiver<u64>,
    mut stop: broadcast::Receiver<PipelineEvent>,
    reset: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(RATE_TICK);
    let mut aggregate = tokio::time::interval(AGGREGATE_TICK);
    let mut count: u64 = 0;
    let mut last_count: u64 = 0;
    let mut last_time = tokio::time::Instant::now();
    let mut zeroes: u8 = 0;
    let mut rates: Vec<f64> = Vec::new();

    loop {
        tokio::select! {
            biased;
            event = stop.recv() => match event {
                Ok(PipelineEvent::Stop) | Err(broadcast::error::RecvError::Closed) => return,
                _ => {}
            },
            _ = aggregate.tick() => {
                if rates.is_empty() {
                    continue;
                }
                let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
                let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = rates.iter().sum::<f64>() / rates.len() as f64;
                info!(target: "virta::outputs", min, max, mean, "rate summary");
                rates.clear();
            }
            _ = ticker.tick() => {
                if reset.swap(false, Ordering::SeqCst) {
                    count = 0;
                    last_count = 0;
                    rates.clear();
                    last_time = tokio::time::Instant::now();
                    continue;
                }
                let now = tokio::time::Instant::now();
                let sent = count - last_count;
                last_count = count;
                let elapsed = now.duration_since(last_time).as_secs_f64();
                last_time = now;
                if sent == 0 {
                    // Stay quiet after a few idle ticks.
                    if zeroes == 3 {
                        continue;
                    }
                    zeroes += 1;
                } else {
                    zeroes = 0;
                }
                let rate = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };
                info!(target: "virta::outputs", count, rate, "messages");
                rates.push(rate);
            }
            inc = rx.recv() => match inc {
                Some(inc) => count += inc,
                None => return,
            },
        }
    }
}

/// Output that captures delivered messages for inspection.
///
/// Clonable handle over shared state, for development and tests: register
/// a clone as the output and keep one to read what was delivered.
#[derive(Clone, Default)]
pub struct DebugOutput {
    inner: Arc<DebugState>,
}

#[derive(Default)]
struct DebugState {
    messages: Mutex<Vec<Message>>,
    delivered: AtomicU64,
}

impl DebugOutput {
    /// Create a capture output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deliveries so far.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::SeqCst)
    }

    /// Snapshot of the captured messages.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages.lock().clone()
    }

    /// Drain the captured messages.
    pub fn take_all(&self) -> Vec<Message> {
        std::mem::take(&mut *self.inner.messages.lock())
    }
}

impl Plugin for DebugOutput {}

#[async_trait]
impl Output for DebugOutput {
    async fn deliver(&self, pack: &Pack) {
        self.inner.messages.lock().push(pack.message.clone());
        self.inner.delivered.fetch_add(1, Ordering::SeqCst);
    }
}
