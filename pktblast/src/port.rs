//! Per-port engine state shared across worker cores.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RunConfig;
use crate::nic::{MacAddr, NicDriver, PortId, QueueId};
use crate::stats::QueueCounters;
use crate::template;

/// One NIC port as the engine sees it: identity, queue counters, the
/// transmit cycle budget, and the one-shot template-initialization gate.
///
/// Owned by the engine for the process lifetime and shared by `Arc` with
/// every worker bound to it.
#[derive(Debug)]
pub struct Port {
    id: PortId,
    mac: MacAddr,
    num_rx_queues: u16,
    num_tx_queues: u16,
    queues: Vec<QueueCounters>,
    /// Written by the stats tick, read by transmit workers every deadline.
    tx_cycles: AtomicU64,
    /// One winner stamps the send pool; the flag lives under the lock so
    /// racing workers wait for construction to finish before transmitting.
    tx_inited: Mutex<bool>,
}

impl Port {
    /// Create engine state for one port.
    pub fn new(id: PortId, mac: MacAddr, num_rx_queues: u16, num_tx_queues: u16) -> Self {
        let num_queues = num_rx_queues.max(num_tx_queues).max(1) as usize;
        Self {
            id,
            mac,
            num_rx_queues,
            num_tx_queues,
            queues: (0..num_queues).map(|_| QueueCounters::default()).collect(),
            tx_cycles: AtomicU64::new(0),
            tx_inited: Mutex::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    #[inline]
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    #[inline]
    pub fn num_rx_queues(&self) -> u16 {
        self.num_rx_queues
    }

    #[inline]
    pub fn num_tx_queues(&self) -> u16 {
        self.num_tx_queues
    }

    /// Number of queue-pair counter blocks.
    #[inline]
    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    /// All queue counter blocks, indexed by queue id.
    #[inline]
    pub fn queues(&self) -> &[QueueCounters] {
        &self.queues
    }

    /// Counter block for one queue id.
    #[inline]
    pub fn queue(&self, qid: QueueId) -> &QueueCounters {
        &self.queues[qid as usize]
    }

    /// Current transmit cycle budget; 0 disables transmission.
    #[inline]
    pub fn tx_cycles(&self) -> u64 {
        self.tx_cycles.load(Ordering::Relaxed)
    }

    /// Install a new cycle budget (stats tick only).
    #[inline]
    pub fn set_tx_cycles(&self, cycles: u64) {
        self.tx_cycles.store(cycles, Ordering::Relaxed);
    }

    /// One-shot template initialization for this port's send pool.
    ///
    /// The first transmit-capable worker to get here stamps the template
    /// into every pool buffer; workers racing in behind it block on the
    /// lock until stamping completes, observe the flag, and skip.
    pub fn ensure_tx_templates<N: NicDriver>(&self, nic: &N, config: &RunConfig, tx_qid: QueueId) {
        let mut inited = self.tx_inited.lock().unwrap();
        if !*inited {
            *inited = true;
            template::stamp_tx_pool(nic, self.id, self.mac, tx_qid, config);
        }
    }

    /// Whether the send pool has been templated yet.
    pub fn tx_templates_ready(&self) -> bool {
        *self.tx_inited.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackConfig, LoopbackNic};
    use crate::nic::FrameBuf;

    #[test]
    fn queue_blocks_cover_both_directions() {
        let port = Port::new(0, MacAddr([0; 6]), 2, 3);
        assert_eq!(port.num_queues(), 3);
        assert_eq!(port.num_rx_queues(), 2);
        assert_eq!(port.num_tx_queues(), 3);
    }

    #[test]
    fn template_init_runs_once() {
        let nic = LoopbackNic::new(LoopbackConfig {
            num_ports: 1,
            pool_size: 8,
            ..LoopbackConfig::default()
        });
        let config = RunConfig::default();
        let port = Port::new(0, nic.mac_addr(0), 1, 1);

        assert!(!port.tx_templates_ready());
        port.ensure_tx_templates(&nic, &config, 0);
        assert!(port.tx_templates_ready());

        // Every pool buffer carries the stamped frame.
        let mut stamped = 0;
        nic.stamp_pool(0, &mut |buf| {
            assert_eq!(buf.pkt_len(), config.frame_len());
            assert_eq!(buf.data()[12..14], 0x0800u16.to_be_bytes());
            stamped += 1;
        });
        assert_eq!(stamped, 8);

        // A second call with a different queue id must not re-stamp.
        port.ensure_tx_templates(&nic, &config, 1);
        nic.stamp_pool(0, &mut |buf| {
            assert_eq!(buf.data()[5], 0);
        });
    }
}
