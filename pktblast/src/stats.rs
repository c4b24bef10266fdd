//! Per-queue counters and the statistics/rate engine.
//!
//! Each queue's live counters (`QueueCounters`) are written only by the
//! worker that owns the queue; the `previous` and `rate` halves of the
//! triple buffer are owned by [`StatsAggregator`] and touched only at tick
//! time. That single-writer-per-field discipline needs no locking. The live
//! counters are relaxed atomics so the tick's cross-thread reads are
//! well-defined; a read that lands mid-burst is merely stale by a packet.

use std::ops::Sub;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RunConfig;
use crate::nic::{DeviceErrorCounters, LinkStatus, NicDriver, PortId};
use crate::port::Port;
use crate::rate::RatePlan;

/// Live, monotonically increasing counters for one queue pair.
///
/// Written by exactly one worker core. `tx_time` is the wall-cycle cost of
/// the last full transmit burst, an instantaneous diagnostic rather than an
/// accumulator.
#[derive(Debug, Default)]
pub struct QueueCounters {
    ipackets: AtomicU64,
    ibytes: AtomicU64,
    opackets: AtomicU64,
    obytes: AtomicU64,
    no_mbufs: AtomicU64,
    tx_drops: AtomicU64,
    tx_time: AtomicU64,
}

impl QueueCounters {
    /// Account one receive burst.
    #[inline]
    pub fn add_rx(&self, pkts: u64, bytes: u64) {
        self.ipackets.fetch_add(pkts, Ordering::Relaxed);
        self.ibytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account one fully accepted transmit burst.
    #[inline]
    pub fn add_tx(&self, pkts: u64, bytes: u64, cycles: u64) {
        self.opackets.fetch_add(pkts, Ordering::Relaxed);
        self.obytes.fetch_add(bytes, Ordering::Relaxed);
        self.tx_time.store(cycles, Ordering::Relaxed);
    }

    /// Account packets the hardware refused in a short transmit.
    #[inline]
    pub fn add_tx_drops(&self, pkts: u64) {
        self.tx_drops.fetch_add(pkts, Ordering::Relaxed);
    }

    /// Account one failed bulk allocation.
    #[inline]
    pub fn incr_no_mbufs(&self) {
        self.no_mbufs.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the live counters into a plain value.
    pub fn snapshot(&self) -> QueueTotals {
        QueueTotals {
            ipackets: self.ipackets.load(Ordering::Relaxed),
            ibytes: self.ibytes.load(Ordering::Relaxed),
            opackets: self.opackets.load(Ordering::Relaxed),
            obytes: self.obytes.load(Ordering::Relaxed),
            no_mbufs: self.no_mbufs.load(Ordering::Relaxed),
            tx_drops: self.tx_drops.load(Ordering::Relaxed),
            tx_time: self.tx_time.load(Ordering::Relaxed),
        }
    }
}

/// A plain copy of one queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueTotals {
    pub ipackets: u64,
    pub ibytes: u64,
    pub opackets: u64,
    pub obytes: u64,
    pub no_mbufs: u64,
    pub tx_drops: u64,
    /// Cycles spent in the last transmit call; copied, never differenced.
    pub tx_time: u64,
}

impl Sub for QueueTotals {
    type Output = QueueTotals;

    /// Counter delta between two snapshots. Wrapping, so a counter that
    /// overflows u64 still produces the correct difference.
    fn sub(self, prev: QueueTotals) -> QueueTotals {
        QueueTotals {
            ipackets: self.ipackets.wrapping_sub(prev.ipackets),
            ibytes: self.ibytes.wrapping_sub(prev.ibytes),
            opackets: self.opackets.wrapping_sub(prev.opackets),
            obytes: self.obytes.wrapping_sub(prev.obytes),
            no_mbufs: self.no_mbufs.wrapping_sub(prev.no_mbufs),
            tx_drops: self.tx_drops.wrapping_sub(prev.tx_drops),
            tx_time: self.tx_time,
        }
    }
}

impl QueueTotals {
    fn per_second(self, interval_secs: u64) -> QueueTotals {
        QueueTotals {
            ipackets: self.ipackets / interval_secs,
            ibytes: self.ibytes / interval_secs,
            opackets: self.opackets / interval_secs,
            obytes: self.obytes / interval_secs,
            no_mbufs: self.no_mbufs / interval_secs,
            tx_drops: self.tx_drops / interval_secs,
            tx_time: self.tx_time,
        }
    }

    fn accumulate(&mut self, other: &QueueTotals) {
        self.ipackets += other.ipackets;
        self.ibytes += other.ibytes;
        self.opackets += other.opackets;
        self.obytes += other.obytes;
        self.no_mbufs += other.no_mbufs;
        self.tx_drops += other.tx_drops;
        self.tx_time = self.tx_time.max(other.tx_time);
    }
}

/// Per-port section of a statistics snapshot.
#[derive(Debug, Clone)]
pub struct PortSnapshot {
    pub port: PortId,
    pub link: LinkStatus,
    /// Rate plan in force until the next tick.
    pub plan: RatePlan,
    /// True per-second rates for each queue pair.
    pub queues: Vec<QueueTotals>,
    /// Sum of the queue rates.
    pub totals: QueueTotals,
    /// Device error-counter deltas since the previous tick.
    pub errors: DeviceErrorCounters,
}

/// The periodically refreshed report handed to the render layer.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub ports: Vec<PortSnapshot>,
    pub burst_size: u16,
    pub mbuf_count: u32,
    pub pkt_size: u32,
    pub nb_rxd: u16,
    pub nb_txd: u16,
    pub tx_rate: u32,
    pub interval_secs: u64,
}

/// The single stats writer: owns the `previous` and `rate` halves of every
/// queue's triple buffer and the previous device-counter snapshots.
#[derive(Debug)]
pub struct StatsAggregator {
    prev: Vec<Vec<QueueTotals>>,
    prev_dev: Vec<DeviceErrorCounters>,
}

impl StatsAggregator {
    /// Allocate previous-snapshot buffers for the given ports.
    pub fn new(ports: &[Arc<Port>]) -> Self {
        Self {
            prev: ports
                .iter()
                .map(|p| vec![QueueTotals::default(); p.num_queues()])
                .collect(),
            prev_dev: vec![DeviceErrorCounters::default(); ports.len()],
        }
    }

    /// Run one statistics tick.
    ///
    /// Re-evaluates each port's rate plan (feeding the new cycle budget
    /// back into the port for the transmit workers), differences every
    /// queue's counters against the previous tick, and produces the
    /// snapshot for the render layer.
    pub fn tick<N: NicDriver>(
        &mut self,
        nic: &N,
        ports: &[Arc<Port>],
        config: &RunConfig,
    ) -> StatsSnapshot {
        let interval = config.stats_interval_secs;
        let mut out = StatsSnapshot {
            ports: Vec::with_capacity(ports.len()),
            burst_size: config.burst_size,
            mbuf_count: config.mbuf_count,
            pkt_size: config.pkt_size,
            nb_rxd: config.nb_rxd,
            nb_txd: config.nb_txd,
            tx_rate: config.tx_rate,
            interval_secs: interval,
        };

        for (idx, port) in ports.iter().enumerate() {
            let link = nic.link_status(port.id());
            let plan = RatePlan::compute(
                config.pkt_size,
                config.tx_rate,
                link.speed_mbps,
                config.burst_size,
                port.num_tx_queues(),
                nic.timer_hz(),
            );
            port.set_tx_cycles(plan.tx_cycles);

            let dev = nic.device_error_counters(port.id());
            let prev_dev = self.prev_dev[idx];
            let errors = DeviceErrorCounters {
                imissed: dev.imissed.wrapping_sub(prev_dev.imissed),
                ierrors: dev.ierrors.wrapping_sub(prev_dev.ierrors),
                oerrors: dev.oerrors.wrapping_sub(prev_dev.oerrors),
                rx_nombuf: dev.rx_nombuf.wrapping_sub(prev_dev.rx_nombuf),
            };
            self.prev_dev[idx] = dev;

            let mut queues = Vec::with_capacity(port.num_queues());
            let mut totals = QueueTotals::default();
            for (q, counters) in port.queues().iter().enumerate() {
                let curr = counters.snapshot();
                let rate = curr - self.prev[idx][q];
                self.prev[idx][q] = curr;
                let per_sec = rate.per_second(interval);
                totals.accumulate(&per_sec);
                queues.push(per_sec);
            }

            out.ports.push(PortSnapshot {
                port: port.id(),
                link,
                plan,
                queues,
                totals,
                errors,
            });
        }
        out
    }
}
