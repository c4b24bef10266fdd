//! Per-core burst loops.
//!
//! Each worker runs one of three loops fixed at launch: RX drain, paced TX,
//! or combined RX/TX. The loops are tight spins on a dedicated pinned
//! thread: no allocation, no blocking calls, and the stop flag is polled
//! every iteration, so shutdown latency is bounded by one in-flight burst.

use std::sync::Arc;

use arrayvec::ArrayVec;
use tracing::debug;

use crate::config::RunContext;
use crate::error::{Error, Result};
use crate::lcore::{LcoreBinding, LcoreRole};
use crate::nic::{Burst, FrameBuf, NicDriver, QueueId};
use crate::port::Port;
use crate::stats::QueueCounters;

/// One worker core's execution state: its binding plus shared handles.
pub struct Worker<N: NicDriver> {
    ctx: Arc<RunContext>,
    nic: Arc<N>,
    port: Arc<Port>,
    binding: LcoreBinding,
}

impl<N: NicDriver> Worker<N> {
    pub fn new(ctx: Arc<RunContext>, nic: Arc<N>, port: Arc<Port>, binding: LcoreBinding) -> Self {
        Self {
            ctx,
            nic,
            port,
            binding,
        }
    }

    /// Dispatch to the role's loop and run it until shutdown.
    ///
    /// An unknown role or missing queue assignment is a build-time bug in
    /// the binding plan; it is reported as an error, never retried.
    pub fn run(&self) -> Result<()> {
        self.binding.validate()?;
        debug!(
            lcore = self.binding.lcore,
            port = self.port.id(),
            role = ?self.binding.role,
            "starting worker loop"
        );
        match self.binding.role {
            LcoreRole::RxOnly => self.rx_loop(),
            LcoreRole::TxOnly => self.tx_loop(),
            LcoreRole::RxTx => self.rxtx_loop(),
            LcoreRole::Unknown => {
                return Err(Error::UnknownRole {
                    lcore: self.binding.lcore,
                });
            }
        }
        debug!(
            lcore = self.binding.lcore,
            port = self.port.id(),
            "worker loop exited"
        );
        Ok(())
    }

    /// Drain one RX burst: account packets/bytes, bulk-release everything.
    #[inline]
    fn rx_drain(&self, rx_qid: QueueId, max: usize, bufs: &mut Burst<N::Buf>, c: &QueueCounters) {
        let nb_pkts = self
            .nic
            .receive_burst(self.port.id(), rx_qid, max, bufs);
        if nb_pkts > 0 {
            let bytes: u64 = bufs.iter().map(|b| b.pkt_len() as u64).sum();
            c.add_rx(nb_pkts as u64, bytes);
            self.nic.bulk_release(bufs);
        }
    }

    /// One transmit burst against the already-templated send pool.
    ///
    /// Pool exhaustion and short accepts are transient pressure: counted,
    /// never escalated. A short accept releases the rejected tail and books
    /// only the shortfall; the burst's sent counters are skipped.
    #[inline]
    fn tx_pass(&self, tx_qid: QueueId, now: u64, bufs: &mut Burst<N::Buf>, c: &QueueCounters) {
        let burst = self.ctx.config.burst_size as usize;
        if self.nic.bulk_allocate(self.port.id(), burst, bufs) {
            let nb_pkts = self.nic.transmit_burst(self.port.id(), tx_qid, bufs);
            if nb_pkts != burst {
                let drops = bufs.len() as u64;
                self.nic.bulk_release(bufs);
                c.add_tx_drops(drops);
                return;
            }
            // Sent bytes exclude the FCS.
            let plen = self.ctx.config.frame_len() as u64;
            c.add_tx(
                nb_pkts as u64,
                nb_pkts as u64 * plen,
                self.nic.timer_cycles() - now,
            );
        } else {
            c.incr_no_mbufs();
        }
    }

    /// Pure traffic sink: maximum-rate RX polling, no pacing.
    fn rx_loop(&self) {
        let rx_qid = self.binding.rx_qid.expect("validated");
        let rx_burst = self.ctx.config.burst_size as usize * 2;
        let c = self.port.queue(rx_qid);
        let mut bufs: Burst<N::Buf> = ArrayVec::new();

        while !self.ctx.stopping() {
            self.rx_drain(rx_qid, rx_burst, &mut bufs, c);
        }
    }

    /// Pure traffic source: transmit bursts on the cycle-budget schedule.
    fn tx_loop(&self) {
        let tx_qid = self.binding.tx_qid.expect("validated");
        let c = self.port.queue(tx_qid);
        let mut bufs: Burst<N::Buf> = ArrayVec::new();

        self.port
            .ensure_tx_templates(&*self.nic, &self.ctx.config, tx_qid);

        let mut burst_deadline = self.nic.timer_cycles() + self.port.tx_cycles();

        while !self.ctx.stopping() {
            let now = self.nic.timer_cycles();
            if now < burst_deadline {
                continue;
            }
            let tx_cycles = self.port.tx_cycles();
            burst_deadline = now + tx_cycles;

            if tx_cycles == 0 || self.ctx.config.tx_rate == 0 {
                continue;
            }
            self.tx_pass(tx_qid, now, &mut bufs, c);
        }
    }

    /// Combined loop: RX drain is prioritized every iteration, transmission
    /// is amortized on the same schedule as the TX-only loop.
    fn rxtx_loop(&self) {
        let rx_qid = self.binding.rx_qid.expect("validated");
        let tx_qid = self.binding.tx_qid.expect("validated");
        let rx_burst = self.ctx.config.burst_size as usize * 2;
        let rx_c = self.port.queue(rx_qid);
        let tx_c = self.port.queue(tx_qid);
        let mut bufs: Burst<N::Buf> = ArrayVec::new();

        self.port
            .ensure_tx_templates(&*self.nic, &self.ctx.config, tx_qid);

        let mut burst_deadline = self.nic.timer_cycles() + self.port.tx_cycles();

        while !self.ctx.stopping() {
            let now = self.nic.timer_cycles();

            self.rx_drain(rx_qid, rx_burst, &mut bufs, rx_c);

            if now >= burst_deadline {
                let tx_cycles = self.port.tx_cycles();
                burst_deadline = now + tx_cycles;

                if tx_cycles == 0 || self.ctx.config.tx_rate == 0 {
                    continue;
                }
                self.tx_pass(tx_qid, now, &mut bufs, tx_c);
            }
        }
    }
}
