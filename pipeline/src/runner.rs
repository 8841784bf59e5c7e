//! The runner adapter: a universal driver for writer plugins
//!
//! Plugins that serialize messages and push them somewhere all need the
//! same scaffolding: a private pool of reusable scratch buffers, a worker
//! that owns the write side, and panic-trapped handoff between the two.
//! The runner provides that scaffolding once, so a plugin only implements
//! [`DataRecycler`] plus either [`Writer`] (one write per message) or
//! [`BatchWriter`] (accumulate, commit on a tick).
//!
//! ```text
//! deliver ──► [scratch recycle] ──► prep_out_data ──► [scratch data] ──► worker
//!                    ▲                                                     │
//!                    └──────────────── zero_out_data ◄─────────────────────┘
//! ```
//!
//! [`Runner`] and [`BatchRunner`] implement [`Output`], [`Filter`], and
//! [`Input`], so the same scaffolding can drive any stage that needs it.
//! A scratch is never shared between tasks, and every error path zeroes
//! the scratch and returns it to the pool.

use crate::events::PipelineEvent;
use crate::pack::Pack;
use crate::plugin::{Filter, Input, Output, Plugin, PluginConfig, PluginContext, PluginGlobal};
use crate::safecall;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};
use virta_core::PluginError;

/// Scratch-buffer lifecycle implemented by every writer plugin.
///
/// `make_out_data` is called `2 × pool_size` times at startup to stock
/// the scratch pool. `zero_out_data` and `prep_out_data` run concurrently
/// on different scratches; they must mutate only their `out_data`
/// argument.
pub trait DataRecycler: Send + Sync {
    /// The reusable scratch object handed to `write`/`batch`.
    type OutData: Send + 'static;

    /// Create one scratch object for the pool.
    fn make_out_data(&self) -> Self::OutData;

    /// Reset a used scratch object for reuse.
    fn zero_out_data(&self, out_data: &mut Self::OutData);

    /// Populate the scratch from the pack's message.
    ///
    /// `timeout` is `None` unless the runner is driving an input.
    fn prep_out_data(
        &self,
        pack: &Pack,
        out_data: &mut Self::OutData,
        timeout: Option<Duration>,
    ) -> Result<(), PluginError>;
}

/// A single-shot writer: one `write` per prepared scratch.
#[async_trait]
pub trait Writer: DataRecycler + PluginGlobal + 'static {
    /// One-time setup with the merged configuration.
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }

    /// Emit one prepared scratch to the destination.
    async fn write(&self, out_data: &mut Self::OutData) -> Result<(), PluginError>;
}

/// A batching writer: scratches accumulate via `batch`, a periodic tick
/// drives `commit`.
#[async_trait]
pub trait BatchWriter: DataRecycler + PluginGlobal + 'static {
    /// One-time setup; returns the commit tick interval.
    fn init(&mut self, config: &PluginConfig) -> Result<Duration, PluginError>;

    /// Fold one prepared scratch into the pending batch.
    async fn batch(&self, out_data: &mut Self::OutData) -> Result<(), PluginError>;

    /// Commit the pending batch.
    async fn commit(&self) -> Result<(), PluginError>;
}

/// Per-plugin-kind shared state for the runner adapter.
///
/// Owns the scratch channel pair (each sized `2 × pool_size`) and
/// forwards pipeline events to the writer.
pub struct RunnerGlobal<T: Send + 'static> {
    data_tx: async_channel::Sender<T>,
    data_rx: async_channel::Receiver<T>,
    recycle_tx: async_channel::Sender<T>,
    recycle_rx: async_channel::Receiver<T>,
    events: Option<Arc<dyn PluginGlobal>>,
}

impl<T: Send + 'static> RunnerGlobal<T> {
    fn new(capacity: usize, events: Option<Arc<dyn PluginGlobal>>) -> Self {
        let (data_tx, data_rx) = async_channel::bounded(capacity);
        let (recycle_tx, recycle_rx) = async_channel::bounded(capacity);
        Self {
            data_tx,
            data_rx,
            recycle_tx,
            recycle_rx,
            events,
        }
    }

    /// Scratch objects currently idle in the recycle channel.
    pub fn idle_scratch(&self) -> usize {
        self.recycle_rx.len()
    }
}

impl<T: Send + 'static> PluginGlobal for RunnerGlobal<T> {
    fn event(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.event(event);
        }
    }
}

/// Drives a [`Writer`] plugin.
pub struct Runner<W: Writer> {
    name: String,
    pending: Option<W>,
    writer: Option<Arc<W>>,
    global: Option<Arc<RunnerGlobal<W::OutData>>>,
}

impl<W: Writer> Runner<W> {
    /// Wrap a writer under a plugin name.
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            pending: Some(writer),
            writer: None,
            global: None,
        }
    }

    /// The runner's shared global, once initialized.
    pub fn global(&self) -> Option<&Arc<RunnerGlobal<W::OutData>>> {
        self.global.as_ref()
    }

    fn parts(&self) -> Result<(&Arc<W>, &Arc<RunnerGlobal<W::OutData>>), PluginError> {
        match (&self.writer, &self.global) {
            (Some(writer), Some(global)) => Ok((writer, global)),
            _ => Err(PluginError::Init(format!(
                "runner '{}' used before initialization",
                self.name
            ))),
        }
    }
}

impl<W: Writer> Plugin for Runner<W> {
    fn init_once(
        &mut self,
        config: &PluginConfig,
        ctx: &PluginContext,
    ) -> Result<Option<Arc<dyn PluginGlobal>>, PluginError> {
        let mut writer = self.pending.take().ok_or_else(|| {
            PluginError::Init(format!("runner '{}' initialized twice", self.name))
        })?;
        writer.init(config)?;
        let writer = Arc::new(writer);

        let capacity = 2 * ctx.pool_size;
        let global = Arc::new(RunnerGlobal::new(
            capacity,
            Some(writer.clone() as Arc<dyn PluginGlobal>),
        ));
        preallocate_out_data(&self.name, writer.as_ref(), &global, capacity)?;

        tokio::spawn(write_loop(
            self.name.clone(),
            writer.clone(),
            global.clone(),
            ctx.bus.subscribe(),
        ));

        self.writer = Some(writer);
        self.global = Some(global.clone());
        Ok(Some(global))
    }
}

#[async_trait]
impl<W: Writer> Output for Runner<W> {
    async fn deliver(&self, pack: &Pack) {
        if let Err(e) = self.hand_off(pack, None).await {
            warn!(plugin = %self.name, error = %e, "prep_out_data failed, dropping pack");
        }
    }
}

#[async_trait]
impl<W: Writer> Filter for Runner<W> {
    async fn filter_msg(&self, pack: &mut Pack) {
        if let Err(e) = self.hand_off(pack, None).await {
            warn!(plugin = %self.name, error = %e, "prep_out_data failed");
        }
    }
}

#[async_trait]
impl<W: Writer> Input for Runner<W> {
    async fn read(&self, pack: &mut Pack, timeout: Option<Duration>) -> Result<(), PluginError> {
        self.hand_off(pack, timeout).await
    }
}

impl<W: Writer> Runner<W> {
    async fn hand_off(&self, pack: &Pack, timeout: Option<Duration>) -> Result<(), PluginError> {
        let (writer, global) = self.parts()?;
        hand_off(&self.name, writer.as_ref(), global, pack, timeout).await
    }
}

/// Drives a [`BatchWriter`] plugin.
pub struct BatchRunner<W: BatchWriter> {
    name: String,
    pending: Option<W>,
    writer: Option<Arc<W>>,
    global: Option<Arc<RunnerGlobal<W::OutData>>>,
}

impl<W: BatchWriter> BatchRunner<W> {
    /// Wrap a batch writer under a plugin name.
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            pending: Some(writer),
            writer: None,
            global: None,
        }
    }

    /// The runner's shared global, once initialized.
    pub fn global(&self) -> Option<&Arc<RunnerGlobal<W::OutData>>> {
        self.global.as_ref()
    }

    fn parts(&self) -> Result<(&Arc<W>, &Arc<RunnerGlobal<W::OutData>>), PluginError> {
        match (&self.writer, &self.global) {
            (Some(writer), Some(global)) => Ok((writer, global)),
            _ => Err(PluginError::Init(format!(
                "runner '{}' used before initialization",
                self.name
            ))),
        }
    }

    async fn hand_off(&self, pack: &Pack, timeout: Option<Duration>) -> Result<(), PluginError> {
        let (writer, global) = self.parts()?;
        hand_off(&self.name, writer.as_ref(), global, pack, timeout).await
    }
}

impl<W: BatchWriter> Plugin for BatchRunner<W> {
    fn init_once(
        &mut self,
        config: &PluginConfig,
        ctx: &PluginContext,
    ) -> Result<Option<Arc<dyn PluginGlobal>>, PluginError> {
        let mut writer = self.pending.take().ok_or_else(|| {
            PluginError::Init(format!("runner '{}' initialized twice", self.name))
        })?;
        let tick = writer.init(config)?;
        let writer = Arc::new(writer);

        let capacity = 2 * ctx.pool_size;
        let global = Arc::new(RunnerGlobal::new(
            capacity,
            Some(writer.clone() as Arc<dyn PluginGlobal>),
        ));
        preallocate_out_data(&self.name, writer.as_ref(), &global, capacity)?;

        tokio::spawn(batch_loop(
            self.name.clone(),
            writer.clone(),
            global.clone(),
            ctx.bus.subscribe(),
            tick,
        ));

        self.writer = Some(writer);
        self.global = Some(global.clone());
        Ok(Some(global))
    }
}

#[async_trait]
impl<W: BatchWriter> Output for BatchRunner<W> {
    async fn deliver(&self, pack: &Pack) {
        if let Err(e) = self.hand_off(pack, None).await {
            warn!(plugin = %self.name, error = %e, "prep_out_data failed, dropping pack");
        }
    }
}

#[async_trait]
impl<W: BatchWriter> Filter for BatchRunner<W> {
    async fn filter_msg(&self, pack: &mut Pack) {
        if let Err(e) = self.hand_off(pack, None).await {
            warn!(plugin = %self.name, error = %e, "prep_out_data failed");
        }
    }
}

#[async_trait]
impl<W: BatchWriter> Input for BatchRunner<W> {
    async fn read(&self, pack: &mut Pack, timeout: Option<Duration>) -> Result<(), PluginError> {
        self.hand_off(pack, timeout).await
    }
}

/// Claim a scratch, prep it under the panic trap, and queue it for the
/// worker. Every error path returns the scratch to the pool first.
async fn hand_off<R: DataRecycler + ?Sized>(
    name: &str,
    recycler: &R,
    global: &RunnerGlobal<R::OutData>,
    pack: &Pack,
    timeout: Option<Duration>,
) -> Result<(), PluginError> {
    let mut out_data = global
        .recycle_rx
        .recv()
        .await
        .map_err(|_| PluginError::Write("scratch pool closed".to_string()))?;

    match safecall::call(|| recycler.prep_out_data(pack, &mut out_data, timeout)) {
        Ok(Ok(())) => global
            .data_tx
            .send(out_data)
            .await
            .map_err(|_| PluginError::Write("scratch data channel closed".to_string())),
        Ok(Err(e)) | Err(e) => {
            recycle_out_data(name, recycler, global, out_data).await;
            Err(e)
        }
    }
}

/// Zero a used scratch and return it to the pool. A panic inside
/// `zero_out_data` drops the scratch rather than recycling a poisoned
/// object.
async fn recycle_out_data<R: DataRecycler + ?Sized>(
    name: &str,
    recycler: &R,
    global: &RunnerGlobal<R::OutData>,
    mut out_data: R::OutData,
) {
    match safecall::call(|| recycler.zero_out_data(&mut out_data)) {
        Ok(()) => {
            if global.recycle_tx.send(out_data).await.is_err() {
                debug!(plugin = %name, "scratch recycle channel closed");
            }
        }
        Err(e) => {
            warn!(plugin = %name, error = %e, "zero_out_data panicked, dropping scratch");
        }
    }
}

fn preallocate_out_data<R: DataRecycler + ?Sized>(
    name: &str,
    recycler: &R,
    global: &RunnerGlobal<R::OutData>,
    count: usize,
) -> Result<(), PluginError> {
    for _ in 0..count {
        let out_data = safecall::call(|| recycler.make_out_data())
            .map_err(|e| PluginError::Init(format!("make_out_data failed for '{name}': {e}")))?;
        global
            .recycle_tx
            .try_send(out_data)
            .map_err(|_| PluginError::Init(format!("scratch preallocation overflow for '{name}'")))?;
    }
    Ok(())
}

/// Worker loop for a plain writer: write each scratch, recycle it.
async fn write_loop<W: Writer>(
    name: String,
    writer: Arc<W>,
    global: Arc<RunnerGlobal<W::OutData>>,
    mut stop: broadcast::Receiver<PipelineEvent>,
) {
    loop {
        tokio::select! {
            biased;
            event = stop.recv() => match event {
                Ok(PipelineEvent::Stop) | Err(broadcast::error::RecvError::Closed) => return,
                _ => {}
            },
            out_data = global.data_rx.recv() => {
                let Ok(mut out_data) = out_data else { return };
                match safecall::call_async(writer.write(&mut out_data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) | Err(e) => error!(plugin = %name, error = %e, "writer error"),
                }
                recycle_out_data(&name, writer.as_ref(), &global, out_data).await;
            }
        }
    }
}

/// Worker loop for a batch writer: batch each scratch, commit on ticks.
async fn batch_loop<W: BatchWriter>(
    name: String,
    writer: Arc<W>,
    global: Arc<RunnerGlobal<W::OutData>>,
    mut stop: broadcast::Receiver<PipelineEvent>,
    tick: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + tick, tick);
    loop {
        tokio::select! {
            biased;
            event = stop.recv() => match event {
                Ok(PipelineEvent::Stop) | Err(broadcast::error::RecvError::Closed) => return,
                _ => {}
            },
            _ = ticker.tick() => {
                match safecall::call_async(writer.commit()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) | Err(e) => error!(plugin = %name, error = %e, "batch commit error"),
                }
            }
            out_data = global.data_rx.recv() => {
                let Ok(mut out_data) = out_data else { return };
                match safecall::call_async(writer.batch(&mut out_data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) | Err(e) => error!(plugin = %name, error = %e, "batch error"),
                }
                recycle_out_data(&name, writer.as_ref(), &global, out_data).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{FilterChainSpec, SharedConfig};
    use crate::events::EventBus;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ctx(pool_size: usize) -> PluginContext {
        PluginContext {
            pool_size,
            bus: Arc::new(EventBus::new()),
        }
    }

    fn test_pack(payload: &str) -> Pack {
        let config = Arc::new(SharedConfig {
            pool_size: 2,
            default_decoder: "json".to_string(),
            default_filter_chain: "default".to_string(),
            filter_chains: HashMap::from([("default".to_string(), FilterChainSpec::default())]),
        });
        let mut pack = Pack::new(config);
        pack.message.set_payload(payload);
        pack
    }

    #[derive(Default)]
    struct LineWriter {
        written: Mutex<Vec<String>>,
        made: AtomicUsize,
        zeroed: AtomicUsize,
        panic_on_prep: bool,
    }

    impl PluginGlobal for Arc<LineWriter> {}

    impl DataRecycler for Arc<LineWriter> {
        type OutData = String;

        fn make_out_data(&self) -> String {
            self.made.fetch_add(1, Ordering::SeqCst);
            String::with_capacity(64)
        }

        fn zero_out_data(&self, out_data: &mut String) {
            self.zeroed.fetch_add(1, Ordering::SeqCst);
            out_data.clear();
        }

        fn prep_out_data(
            &self,
            pack: &Pack,
            out_data: &mut String,
            _timeout: Option<Duration>,
        ) -> Result<(), PluginError> {
            if self.panic_on_prep {
                panic!("prep exploded");
            }
            out_data.push_str(pack.message.payload().unwrap_or(""));
            Ok(())
        }
    }

    #[async_trait]
    impl Writer for Arc<LineWriter> {
        async fn write(&self, out_data: &mut String) -> Result<(), PluginError> {
            self.written.lock().push(out_data.clone());
            Ok(())
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn runner_writes_prepared_scratch() {
        let writer = Arc::new(LineWriter::default());
        let mut runner = Runner::new("lines", writer.clone());

        let ctx = test_ctx(2);
        let global = runner.init_once(&PluginConfig::Null, &ctx).unwrap();
        assert!(global.is_some());
        assert_eq!(writer.made.load(Ordering::SeqCst), 4);

        runner.deliver(&test_pack("hello")).await;
        settle().await;

        assert_eq!(writer.written.lock().as_slice(), &["hello".to_string()]);
        // The scratch came back: zeroed once, pool back to full strength.
        assert_eq!(writer.zeroed.load(Ordering::SeqCst), 1);
        assert_eq!(runner.global().unwrap().idle_scratch(), 4);
    }

    #[tokio::test]
    async fn prep_panic_returns_scratch_to_pool() {
        let writer = Arc::new(LineWriter {
            panic_on_prep: true,
            ..Default::default()
        });
        let mut runner = Runner::new("lines", writer.clone());
        runner.init_once(&PluginConfig::Null, &test_ctx(2)).unwrap();

        runner.deliver(&test_pack("lost")).await;
        settle().await;

        assert!(writer.written.lock().is_empty());
        assert_eq!(writer.zeroed.load(Ordering::SeqCst), 1);
        assert_eq!(runner.global().unwrap().idle_scratch(), 4);
    }

    #[tokio::test]
    async fn runner_as_input_propagates_prep_errors() {
        struct NoDataWriter;
        impl PluginGlobal for NoDataWriter {}
        impl DataRecycler for NoDataWriter {
            type OutData = String;
            fn make_out_data(&self) -> String {
                String::new()
            }
            fn zero_out_data(&self, out_data: &mut String) {
                out_data.clear();
            }
            fn prep_out_data(
                &self,
                _pack: &Pack,
                _out_data: &mut String,
                timeout: Option<Duration>,
            ) -> Result<(), PluginError> {
                assert!(timeout.is_some(), "input path must forward the timeout");
                Err(PluginError::NoData)
            }
        }
        #[async_trait]
        impl Writer for NoDataWriter {
            async fn write(&self, _out_data: &mut String) -> Result<(), PluginError> {
                Ok(())
            }
        }

        let mut runner = Runner::new("src", NoDataWriter);
        runner.init_once(&PluginConfig::Null, &test_ctx(1)).unwrap();

        let mut pack = test_pack("");
        let err = runner
            .read(&mut pack, Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert_eq!(err, PluginError::NoData);
        assert_eq!(runner.global().unwrap().idle_scratch(), 2);
    }

    #[tokio::test]
    async fn stop_event_terminates_write_loop() {
        let writer = Arc::new(LineWriter::default());
        let mut runner = Runner::new("lines", writer.clone());
        let ctx = test_ctx(1);
        runner.init_once(&PluginConfig::Null, &ctx).unwrap();

        ctx.bus.post(PipelineEvent::Stop);
        settle().await;

        // After stop the worker no longer drains the data channel.
        runner.deliver(&test_pack("late")).await;
        settle().await;
        assert!(writer.written.lock().is_empty());
    }
}
