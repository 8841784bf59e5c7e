//! The pipeline runtime: input runners, the dispatcher, output runners
//!
//! ```text
//! inputs ──► [data] ──► decode ──► filter chain ──► fan-out ──► outputs
//!    ▲                                                             │
//!    └────────────────────── [recycle] ◄──────────────────────────-┘
//! ```
//!
//! The pool exclusively owns every [`Pack`]. Inputs claim zeroed packs
//! from the recycle channel, fill them, and send them to the dispatcher.
//! The dispatcher decodes, selects a filter chain, runs the filters in
//! order, then fans the pack out to the chain's outputs. A pack no output
//! accepted is recycled by the dispatcher; otherwise the last output to
//! finish delivery reclaims and recycles it.
//!
//! # Ownership
//!
//! The mutable phase (decode and filters) runs on the owned pack, so at
//! most one stage can touch it. Fan-out wraps the pack in an `Arc` and
//! sends one handle per output; the dispatcher keeps none. Each output
//! releases its handle through [`Arc::into_inner`], so exactly the last
//! holder gets the pack back, zeroes it, and returns it to the pool.

use crate::config::{PipelineBuilder, SharedConfig};
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::lookup::ChainLookup;
use crate::pack::{Pack, SharedPack};
use crate::plugin::{Decoder, Filter, Input, Output};
use crate::safecall;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use virta_core::PluginError;

/// Pack accounting at shutdown.
///
/// At quiescence the pool's packs are split between the recycle channel
/// (idle) and the data channel (read but never dispatched); together they
/// must account for the whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Packs recovered from the recycle channel
    pub idle_packs: usize,
    /// Packs recovered from the data channel
    pub pending_packs: usize,
}

impl ShutdownReport {
    /// Total packs recovered.
    pub fn total(&self) -> usize {
        self.idle_packs + self.pending_packs
    }
}

/// The assembled pipeline, ready to run.
///
/// Built by [`PipelineBuilder`]; `run` consumes it, drives the dispatcher
/// until a `Stop` event, joins every worker, and reports the recovered
/// pool.
pub struct Pipeline {
    shared: Arc<SharedConfig>,
    lookup: Box<dyn ChainLookup>,
    bus: Arc<EventBus>,
    read_timeout: Duration,
    decoders: HashMap<String, Arc<dyn Decoder>>,
    filters: HashMap<String, Arc<dyn Filter>>,
    outputs: HashMap<String, Arc<dyn Output>>,
    inputs: HashMap<String, Arc<dyn Input>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<SharedConfig>,
        lookup: Box<dyn ChainLookup>,
        bus: Arc<EventBus>,
        read_timeout: Duration,
        decoders: HashMap<String, Arc<dyn Decoder>>,
        filters: HashMap<String, Arc<dyn Filter>>,
        outputs: HashMap<String, Arc<dyn Output>>,
        inputs: HashMap<String, Arc<dyn Input>>,
    ) -> Self {
        Self {
            shared,
            lookup,
            bus,
            read_timeout,
            decoders,
            filters,
            outputs,
            inputs,
        }
    }

    /// The event bus, for posting `Reload`/`Stop` and for the signal loop.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// The shared, read-only configuration.
    pub fn config(&self) -> &Arc<SharedConfig> {
        &self.shared
    }

    /// Run the pipeline until a `Stop` event is posted on the bus.
    ///
    /// Spawns one runner per output, pre-fills the pool, spawns one
    /// runner per input, then dispatches packs from the data channel.
    /// On `Stop` every worker exits at its next select; outputs drain
    /// packs already dispatched to them before exiting.
    pub async fn run(self) -> Result<ShutdownReport> {
        let pool_size = self.shared.pool_size;
        info!(
            pool_size,
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            filter_chains = self.shared.filter_chains.len(),
            "starting pipeline"
        );
        if self.outputs.is_empty() {
            warn!("no outputs registered, every pack will be recycled undelivered");
        }

        let (data_tx, data_rx) = async_channel::bounded::<Pack>(pool_size + 1);
        let (recycle_tx, recycle_rx) = async_channel::bounded::<Pack>(pool_size + 1);

        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut out_chans: HashMap<String, async_channel::Sender<SharedPack>> = HashMap::new();
        for (name, output) in &self.outputs {
            let (ingress, handle) = OutputRunner::start(
                name.clone(),
                output.clone(),
                pool_size + 1,
                recycle_tx.clone(),
                self.bus.subscribe(),
            );
            out_chans.insert(name.clone(), ingress);
            workers.push(handle);
            info!(output = %name, "output started");
        }

        for _ in 0..pool_size {
            recycle_tx
                .send(Pack::new(self.shared.clone()))
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
        }

        for (name, input) in &self.inputs {
            workers.push(InputRunner::start(
                name.clone(),
                input.clone(),
                self.read_timeout,
                data_tx.clone(),
                recycle_rx.clone(),
                recycle_tx.clone(),
                self.bus.subscribe(),
            ));
            info!(input = %name, "input started");
        }
        // Input runners hold the only senders now; if they all exit the
        // dispatcher sees the channel close.
        drop(data_tx);

        let mut events = self.bus.subscribe();
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(PipelineEvent::Stop) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(PipelineEvent::Reload) => info!("reload event received"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscription lagged");
                    }
                },
                pack = data_rx.recv() => match pack {
                    Ok(pack) => {
                        if let Some(mut pack) = self.dispatch(pack, &out_chans, &recycle_tx).await {
                            pack.zero();
                            let _ = recycle_tx.send(pack).await;
                        }
                    }
                    Err(_) => break,
                },
            }
        }

        // Closing the ingress channels lets output runners finish their
        // drain even if they missed the broadcast.
        drop(out_chans);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task failed");
            }
        }

        let mut idle_packs = 0;
        while recycle_rx.try_recv().is_ok() {
            idle_packs += 1;
        }
        let mut pending_packs = 0;
        while data_rx.try_recv().is_ok() {
            pending_packs += 1;
        }
        info!(idle_packs, pending_packs, "shutdown complete");
        Ok(ShutdownReport {
            idle_packs,
            pending_packs,
        })
    }

    /// Run one pack through decode, the filter chain, and fan-out.
    ///
    /// Returns the pack when no output accepted it and it should be
    /// recycled by the caller.
    async fn dispatch(
        &self,
        mut pack: Pack,
        out_chans: &HashMap<String, async_channel::Sender<SharedPack>>,
        recycle_tx: &async_channel::Sender<Pack>,
    ) -> Option<Pack> {
        // Decode stage
        if !pack.decoded {
            let Some(decoder) = self.decoders.get(&pack.decoder) else {
                warn!(decoder = %pack.decoder, "decoder doesn't exist, dropping pack");
                return Some(pack);
            };
            let decoder = decoder.clone();
            match safecall::call(|| decoder.decode(&mut pack)) {
                Ok(Ok(())) => pack.decoded = true,
                Ok(Err(e)) | Err(e) => {
                    warn!(decoder = %pack.decoder, error = %e, "error decoding message");
                    return Some(pack);
                }
            }
        }

        // Filter-chain selection: a lookup hit reassigns the pack's chain,
        // a miss keeps whatever the pack already carries.
        if let Some(chain_name) = self.lookup.locate_chain(&pack.message) {
            if pack.filter_chain != chain_name {
                pack.filter_chain.clear();
                pack.filter_chain.push_str(chain_name);
            }
        }
        let Some(chain) = self.shared.filter_chains.get(&pack.filter_chain) else {
            warn!(chain = %pack.filter_chain, "filter chain doesn't exist, dropping pack");
            return Some(pack);
        };
        pack.chain_count += 1;

        // Seed the fan-out set before the filters run so they may rewrite it.
        pack.output_names.clear();
        pack.output_names.extend(chain.outputs.iter().cloned());

        for filter_name in &chain.filters {
            let Some(filter) = self.filters.get(filter_name) else {
                warn!(filter = %filter_name, "filter not registered, skipping");
                continue;
            };
            if let Err(e) = safecall::call_async(filter.filter_msg(&mut pack)).await {
                warn!(filter = %filter_name, error = %e, "filter panicked, blocking pack");
                pack.blocked = true;
            }
            if pack.blocked {
                return Some(pack);
            }
        }

        // Fan-out: resolve ingress channels, then hand off one Arc per
        // output and keep none here.
        let mut targets: Vec<async_channel::Sender<SharedPack>> =
            Vec::with_capacity(pack.output_names.len());
        for output_name in &pack.output_names {
            match out_chans.get(output_name) {
                Some(ingress) => targets.push(ingress.clone()),
                None => warn!(output = %output_name, "output doesn't exist"),
            }
        }
        if targets.is_empty() {
            return Some(pack);
        }

        let last = targets.len() - 1;
        let mut remaining = Some(Arc::new(pack));
        for (i, ingress) in targets.into_iter().enumerate() {
            let Some(current) = remaining.take() else {
                break;
            };
            let handle = if i == last {
                current
            } else {
                remaining = Some(Arc::clone(&current));
                current
            };
            if let Err(async_channel::SendError(handle)) = ingress.send(handle).await {
                warn!("output ingress closed, releasing pack");
                release_shared(handle, recycle_tx).await;
            }
        }
        None
    }
}

/// Release one output's handle on a fanned-out pack.
///
/// Only the last holder gets the pack back; it is zeroed and returned to
/// the pool. Earlier holders simply drop their reference.
pub(crate) async fn release_shared(pack: SharedPack, recycle_tx: &async_channel::Sender<Pack>) {
    if let Some(mut pack) = Arc::into_inner(pack) {
        pack.zero();
        if recycle_tx.send(pack).await.is_err() {
            debug!("recycle channel closed, dropping pack");
        }
    }
}

/// Drives one input: claim a pack, read into it, hand it to the dispatcher.
struct InputRunner {
    name: String,
    input: Arc<dyn Input>,
    timeout: Duration,
}

impl InputRunner {
    #[allow(clippy::too_many_arguments)]
    fn start(
        name: String,
        input: Arc<dyn Input>,
        timeout: Duration,
        data_tx: async_channel::Sender<Pack>,
        recycle_rx: async_channel::Receiver<Pack>,
        recycle_tx: async_channel::Sender<Pack>,
        stop: broadcast::Receiver<PipelineEvent>,
    ) -> JoinHandle<()> {
        let runner = Self {
            name,
            input,
            timeout,
        };
        tokio::spawn(runner.run(data_tx, recycle_rx, recycle_tx, stop))
    }

    async fn run(
        self,
        data_tx: async_channel::Sender<Pack>,
        recycle_rx: async_channel::Receiver<Pack>,
        recycle_tx: async_channel::Sender<Pack>,
        mut stop: broadcast::Receiver<PipelineEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                event = stop.recv() => match event {
                    Ok(PipelineEvent::Stop) | Err(broadcast::error::RecvError::Closed) => return,
                    _ => {}
                },
                pack = recycle_rx.recv() => {
                    let Ok(mut pack) = pack else { return };
                    match safecall::call_async(self.input.read(&mut pack, Some(self.timeout))).await {
                        Ok(Ok(())) => {
                            if let Err(async_channel::SendError(pack)) = data_tx.send(pack).await {
                                let _ = recycle_tx.send(pack).await;
                                return;
                            }
                        }
                        Ok(Err(PluginError::NoData)) => {
                            debug!(input = %self.name, "read timed out, no data");
                            pack.zero();
                            let _ = recycle_tx.send(pack).await;
                        }
                        Ok(Err(e)) | Err(e) => {
                            warn!(input = %self.name, error = %e, "input read failed");
                            pack.zero();
                            let _ = recycle_tx.send(pack).await;
                        }
                    }
                },
            }
        }
    }
}

/// Drives one output: receive fanned-out packs, deliver, release.
struct OutputRunner {
    name: String,
    output: Arc<dyn Output>,
}

impl OutputRunner {
    fn start(
        name: String,
        output: Arc<dyn Output>,
        capacity: usize,
        recycle_tx: async_channel::Sender<Pack>,
        stop: broadcast::Receiver<PipelineEvent>,
    ) -> (async_channel::Sender<SharedPack>, JoinHandle<()>) {
        let (ingress_tx, ingress_rx) = async_channel::bounded(capacity);
        let runner = Self { name, output };
        let handle = tokio::spawn(runner.run(ingress_rx, recycle_tx, stop));
        (ingress_tx, handle)
    }

    async fn run(
        self,
        ingress: async_channel::Receiver<SharedPack>,
        recycle_tx: async_channel::Sender<Pack>,
        mut stop: broadcast::Receiver<PipelineEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                event = stop.recv() => match event {
                    Ok(PipelineEvent::Stop) | Err(broadcast::error::RecvError::Closed) => break,
                    _ => {}
                },
                pack = ingress.recv() => match pack {
                    Ok(pack) => self.deliver(pack, &recycle_tx).await,
                    Err(_) => return,
                },
            }
        }
        // Packs already dispatched to this output are still processed.
        while let Ok(pack) = ingress.try_recv() {
            self.deliver(pack, &recycle_tx).await;
        }
    }

    async fn deliver(&self, pack: SharedPack, recycle_tx: &async_channel::Sender<Pack>) {
        if let Err(e) = safecall::call_async(self.output.deliver(&pack)).await {
            error!(output = %self.name, error = %e, "output delivery failed");
        }
        release_shared(pack, recycle_tx).await;
    }
}
