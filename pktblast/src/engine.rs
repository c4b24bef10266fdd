//! The traffic engine: worker launch, statistics ticks, shutdown.
//!
//! The control thread owns the engine. It spawns one pinned worker thread
//! per lcore binding, runs the statistics tick on its own schedule while
//! polling the shared stop flag, publishes each snapshot for the render
//! layer, and finally joins every worker and closes the ports.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::config::{RunConfig, RunContext};
use crate::error::{Error, Result};
use crate::lcore::{self, LcoreBinding};
use crate::nic::NicDriver;
use crate::port::Port;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::worker::Worker;

/// Granularity of the control thread's stop-flag poll while it waits out
/// a statistics interval.
const TICK_POLL: Duration = Duration::from_millis(20);

/// The per-core traffic engine.
pub struct Engine<N: NicDriver> {
    ctx: Arc<RunContext>,
    nic: Arc<N>,
    ports: Vec<Arc<Port>>,
    bindings: Vec<LcoreBinding>,
    aggregator: StatsAggregator,
    snapshot: Arc<ArcSwap<StatsSnapshot>>,
    workers: Vec<(u32, JoinHandle<Result<()>>)>,
}

impl<N: NicDriver> Engine<N> {
    /// Validate configuration and bindings, and build per-port state.
    ///
    /// Queue counts per port are derived from the binding plan; each
    /// port's MAC comes from the driver.
    pub fn new(config: RunConfig, nic: Arc<N>, bindings: Vec<LcoreBinding>) -> Result<Self> {
        config.validate()?;
        if config.num_ports > nic.num_ports() {
            return Err(Error::InvalidConfig(format!(
                "config asks for {} ports but the driver exposes {}",
                config.num_ports,
                nic.num_ports()
            )));
        }
        for binding in &bindings {
            binding.validate()?;
            if binding.port >= config.num_ports {
                return Err(Error::PortOutOfRange {
                    lcore: binding.lcore,
                    port: binding.port,
                });
            }
        }

        let mut rx_counts = vec![0u16; config.num_ports as usize];
        let mut tx_counts = vec![0u16; config.num_ports as usize];
        for binding in &bindings {
            rx_counts[binding.port as usize] += binding.rx_queue_count();
            tx_counts[binding.port as usize] += binding.tx_queue_count();
        }

        // Each port allocates one counter block per queue id, so every
        // queue id must land inside the range the plan itself derives.
        for binding in &bindings {
            let rx_limit = rx_counts[binding.port as usize];
            let tx_limit = tx_counts[binding.port as usize];
            if let Some(q) = binding.rx_qid {
                if q >= rx_limit {
                    return Err(Error::QueueOutOfRange {
                        lcore: binding.lcore,
                        queue: q,
                    });
                }
            }
            if let Some(q) = binding.tx_qid {
                if q >= tx_limit {
                    return Err(Error::QueueOutOfRange {
                        lcore: binding.lcore,
                        queue: q,
                    });
                }
            }
        }

        let ports: Vec<Arc<Port>> = (0..config.num_ports)
            .map(|pid| {
                Arc::new(Port::new(
                    pid,
                    nic.mac_addr(pid),
                    rx_counts[pid as usize],
                    tx_counts[pid as usize],
                ))
            })
            .collect();

        let aggregator = StatsAggregator::new(&ports);
        Ok(Self {
            ctx: Arc::new(RunContext::new(config)),
            nic,
            ports,
            bindings,
            aggregator,
            snapshot: Arc::new(ArcSwap::from_pointee(StatsSnapshot::default())),
            workers: Vec::new(),
        })
    }

    /// Shared run context (stop flag + configuration).
    pub fn context(&self) -> Arc<RunContext> {
        self.ctx.clone()
    }

    /// The most recently published statistics snapshot.
    pub fn snapshot(&self) -> Arc<StatsSnapshot> {
        self.snapshot.load_full()
    }

    /// Handle for readers that outlive borrows of the engine.
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<StatsSnapshot>> {
        self.snapshot.clone()
    }

    /// Per-port engine state, for inspection.
    pub fn ports(&self) -> &[Arc<Port>] {
        &self.ports
    }

    /// Spawn one pinned worker thread per binding.
    pub fn launch(&mut self) -> Result<()> {
        if self.ctx.config.promiscuous {
            for port in &self.ports {
                debug!(port = port.id(), "enabling promiscuous mode");
                self.nic.set_promiscuous(port.id(), true);
            }
        }
        for binding in self.bindings.clone() {
            let worker = Worker::new(
                self.ctx.clone(),
                self.nic.clone(),
                self.ports[binding.port as usize].clone(),
                binding,
            );
            let handle = thread::Builder::new()
                .name(format!("pktblast-lcore-{}", binding.lcore))
                .spawn(move || {
                    if let Err(e) = lcore::pin_current_thread(binding.lcore as usize) {
                        warn!(
                            lcore = binding.lcore,
                            error = %e,
                            "failed to pin worker, performance may be degraded"
                        );
                    }
                    worker.run()
                })
                .map_err(Error::Launch)?;
            self.workers.push((binding.lcore, handle));
        }
        debug!(workers = self.workers.len(), "workers launched");
        Ok(())
    }

    /// Run one statistics tick and publish the snapshot.
    pub fn tick(&mut self) -> Arc<StatsSnapshot> {
        let snap = Arc::new(
            self.aggregator
                .tick(&*self.nic, &self.ports, &self.ctx.config),
        );
        self.snapshot.store(snap.clone());
        snap
    }

    /// Launch workers and drive statistics ticks until the stop flag is
    /// set, rendering each snapshot through `render`. Joins all workers
    /// before returning.
    pub fn run_until_stopped<F>(&mut self, mut render: F) -> Result<()>
    where
        F: FnMut(&StatsSnapshot),
    {
        self.launch()?;
        loop {
            let snap = self.tick();
            render(&snap);
            if self.ctx.stopping() {
                break;
            }
            // Sleep out the interval while staying responsive to the flag.
            let deadline = Instant::now()
                + Duration::from_secs(self.ctx.config.stats_interval_secs);
            while Instant::now() < deadline && !self.ctx.stopping() {
                thread::sleep(TICK_POLL);
            }
        }
        self.shutdown()
    }

    /// Stop workers, join them, and close the ports.
    ///
    /// The joins are unbounded: a worker that never observes the stop flag
    /// stalls shutdown. Known limitation.
    pub fn shutdown(&mut self) -> Result<()> {
        self.ctx.stop();
        let mut first_err = None;
        for (lcore, handle) in self.workers.drain(..) {
            debug!(lcore, "waiting for worker to exit");
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(Error::WorkerPanic { lcore });
                    }
                }
            }
        }
        for port in &self.ports {
            debug!(port = port.id(), "closing port");
            self.nic.close_port(port.id());
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
