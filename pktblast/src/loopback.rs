//! In-memory loopback NIC driver.
//!
//! Ports are wired in even/odd pairs: whatever port 0 transmits shows up on
//! port 1's RX rings and vice versa (a lone port loops back to itself).
//! Each port owns a finite buffer pool and bounded per-queue RX rings, so
//! pool exhaustion and partial transmit accepts behave like real hardware.
//! Link speed is settable per port; 0 means link down.
//!
//! This is the driver behind `pktblast-cli` and the test suite.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::nic::{
    Burst, DeviceErrorCounters, FrameBuf, LinkStatus, MacAddr, NicDriver, PortId, QueueId,
};

/// Shape of the simulated NIC.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Number of ports (paired even/odd).
    pub num_ports: u16,
    /// RX/TX queue pairs per port.
    pub num_queues: u16,
    /// Buffers in each port's pool.
    pub pool_size: u32,
    /// Data room per buffer in bytes.
    pub data_room: usize,
    /// Depth of each RX ring (descriptor ring analogue).
    pub ring_depth: usize,
    /// Initial link speed in Mbps for every port.
    pub link_speed_mbps: u32,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            num_ports: 2,
            num_queues: 1,
            pool_size: 8192,
            data_room: 2048,
            ring_depth: 1024,
            link_speed_mbps: 10_000,
        }
    }
}

/// A pool buffer of the loopback driver.
///
/// Remembers its originating port so release returns it to the right pool.
pub struct LoopbackBuf {
    origin: PortId,
    len: usize,
    data: Box<[u8]>,
}

impl FrameBuf for LoopbackBuf {
    #[inline]
    fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    #[inline]
    fn pkt_len(&self) -> usize {
        self.len
    }

    #[inline]
    fn set_pkt_len(&mut self, len: usize) {
        assert!(len <= self.data.len(), "pkt_len {len} exceeds data room");
        self.len = len;
    }
}

struct LoopbackPort {
    mac: MacAddr,
    peer: usize,
    link_speed_mbps: AtomicU32,
    pool: Mutex<Vec<LoopbackBuf>>,
    rx_rings: Vec<Mutex<VecDeque<LoopbackBuf>>>,
    oerrors: AtomicU64,
    closed: AtomicU32,
    promiscuous: AtomicU32,
}

/// The loopback NIC. Shared by `Arc` across every worker thread.
pub struct LoopbackNic {
    config: LoopbackConfig,
    ports: Vec<LoopbackPort>,
    epoch: Instant,
}

impl LoopbackNic {
    /// Build the simulated device. Pools are fully populated up front.
    pub fn new(config: LoopbackConfig) -> Self {
        let n = config.num_ports as usize;
        let mut ports = Vec::with_capacity(n);
        for p in 0..n {
            let peer = if p ^ 1 < n { p ^ 1 } else { p };
            let pool = (0..config.pool_size)
                .map(|_| LoopbackBuf {
                    origin: p as PortId,
                    len: 0,
                    data: vec![0u8; config.data_room].into_boxed_slice(),
                })
                .collect();
            let rx_rings = (0..config.num_queues)
                .map(|_| Mutex::new(VecDeque::with_capacity(config.ring_depth)))
                .collect();
            ports.push(LoopbackPort {
                // Locally administered address, low byte = port id.
                mac: MacAddr([0x02, 0xb1, 0xa5, 0x70, 0x00, p as u8]),
                peer,
                link_speed_mbps: AtomicU32::new(config.link_speed_mbps),
                pool: Mutex::new(pool),
                rx_rings,
                oerrors: AtomicU64::new(0),
                closed: AtomicU32::new(0),
                promiscuous: AtomicU32::new(0),
            });
        }
        Self {
            config,
            ports,
            epoch: Instant::now(),
        }
    }

    /// Change a port's link speed (0 takes the link down).
    pub fn set_link_speed(&self, port: PortId, mbps: u32) {
        self.ports[port as usize]
            .link_speed_mbps
            .store(mbps, Ordering::Relaxed);
    }

    /// Number of buffers currently sitting in a port's pool.
    pub fn pool_available(&self, port: PortId) -> usize {
        self.ports[port as usize].pool.lock().unwrap().len()
    }

    /// Whether a port is in promiscuous mode.
    ///
    /// The loopback fabric delivers every frame regardless; the flag is
    /// tracked so callers can observe what the engine configured.
    pub fn promiscuous(&self, port: PortId) -> bool {
        self.ports[port as usize].promiscuous.load(Ordering::Relaxed) != 0
    }

    fn ring(&self, port: PortId, queue: QueueId) -> &Mutex<VecDeque<LoopbackBuf>> {
        let port = &self.ports[port as usize];
        &port.rx_rings[queue as usize % port.rx_rings.len()]
    }
}

impl NicDriver for LoopbackNic {
    type Buf = LoopbackBuf;

    fn receive_burst(
        &self,
        port: PortId,
        queue: QueueId,
        max: usize,
        out: &mut Burst<Self::Buf>,
    ) -> usize {
        if self.ports[port as usize].closed.load(Ordering::Relaxed) != 0 {
            return 0;
        }
        let mut ring = self.ring(port, queue).lock().unwrap();
        let room = out.capacity() - out.len();
        let take = max.min(room).min(ring.len());
        for _ in 0..take {
            out.push(ring.pop_front().unwrap());
        }
        take
    }

    fn transmit_burst(&self, port: PortId, queue: QueueId, bufs: &mut Burst<Self::Buf>) -> usize {
        if self.ports[port as usize].closed.load(Ordering::Relaxed) != 0 {
            return 0;
        }
        let peer = self.ports[port as usize].peer;
        let mut ring = self.ring(peer as PortId, queue).lock().unwrap();
        let room = self.config.ring_depth.saturating_sub(ring.len());
        let accepted = bufs.len().min(room);
        for buf in bufs.drain(..accepted) {
            ring.push_back(buf);
        }
        let rejected = bufs.len();
        if rejected > 0 {
            self.ports[port as usize]
                .oerrors
                .fetch_add(rejected as u64, Ordering::Relaxed);
        }
        accepted
    }

    fn bulk_allocate(&self, port: PortId, count: usize, out: &mut Burst<Self::Buf>) -> bool {
        let mut pool = self.ports[port as usize].pool.lock().unwrap();
        if pool.len() < count || out.capacity() - out.len() < count {
            return false;
        }
        for _ in 0..count {
            out.push(pool.pop().unwrap());
        }
        true
    }

    fn bulk_release(&self, bufs: &mut Burst<Self::Buf>) {
        for buf in bufs.drain(..) {
            let mut pool = self.ports[buf.origin as usize].pool.lock().unwrap();
            pool.push(buf);
        }
    }

    fn stamp_pool(&self, port: PortId, f: &mut dyn FnMut(&mut Self::Buf)) {
        let mut pool = self.ports[port as usize].pool.lock().unwrap();
        for buf in pool.iter_mut() {
            f(buf);
        }
    }

    fn link_status(&self, port: PortId) -> LinkStatus {
        let speed = self.ports[port as usize]
            .link_speed_mbps
            .load(Ordering::Relaxed);
        LinkStatus {
            speed_mbps: speed,
            up: speed > 0,
        }
    }

    fn mac_addr(&self, port: PortId) -> MacAddr {
        self.ports[port as usize].mac
    }

    fn device_error_counters(&self, port: PortId) -> DeviceErrorCounters {
        DeviceErrorCounters {
            imissed: 0,
            ierrors: 0,
            oerrors: self.ports[port as usize].oerrors.load(Ordering::Relaxed),
            rx_nombuf: 0,
        }
    }

    fn num_ports(&self) -> u16 {
        self.ports.len() as u16
    }

    fn timer_hz(&self) -> u64 {
        1_000_000_000
    }

    fn timer_cycles(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn set_promiscuous(&self, port: PortId, on: bool) {
        self.ports[port as usize]
            .promiscuous
            .store(u32::from(on), Ordering::Relaxed);
    }

    fn close_port(&self, port: PortId) {
        self.ports[port as usize].closed.store(1, Ordering::Relaxed);
        for ring in &self.ports[port as usize].rx_rings {
            ring.lock().unwrap().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrayvec::ArrayVec;

    fn small_nic() -> LoopbackNic {
        LoopbackNic::new(LoopbackConfig {
            num_ports: 2,
            num_queues: 1,
            pool_size: 64,
            data_room: 256,
            ring_depth: 16,
            link_speed_mbps: 1000,
        })
    }

    #[test]
    fn transmit_lands_on_peer_rx() {
        let nic = small_nic();
        let mut bufs: Burst<LoopbackBuf> = ArrayVec::new();
        assert!(nic.bulk_allocate(0, 4, &mut bufs));
        for buf in bufs.iter_mut() {
            buf.set_pkt_len(60);
        }
        assert_eq!(nic.transmit_burst(0, 0, &mut bufs), 4);
        assert!(bufs.is_empty());

        let mut rx: Burst<LoopbackBuf> = ArrayVec::new();
        assert_eq!(nic.receive_burst(1, 0, 8, &mut rx), 4);
        assert_eq!(rx[0].pkt_len(), 60);
        nic.bulk_release(&mut rx);
        assert_eq!(nic.pool_available(0), 64);
    }

    #[test]
    fn full_ring_accepts_partially() {
        let nic = small_nic();
        let mut bufs: Burst<LoopbackBuf> = ArrayVec::new();
        assert!(nic.bulk_allocate(0, 20, &mut bufs));
        let accepted = nic.transmit_burst(0, 0, &mut bufs);
        assert_eq!(accepted, 16);
        assert_eq!(bufs.len(), 4);
        assert_eq!(nic.device_error_counters(0).oerrors, 4);
        nic.bulk_release(&mut bufs);
    }

    #[test]
    fn bulk_allocate_is_all_or_nothing() {
        let nic = small_nic();
        let mut bufs: Burst<LoopbackBuf> = ArrayVec::new();
        assert!(!nic.bulk_allocate(0, 65, &mut bufs));
        assert!(bufs.is_empty());
        assert!(nic.bulk_allocate(0, 64, &mut bufs));
        assert_eq!(nic.pool_available(0), 0);
        let mut more: Burst<LoopbackBuf> = ArrayVec::new();
        assert!(!nic.bulk_allocate(0, 1, &mut more));
        nic.bulk_release(&mut bufs);
        assert_eq!(nic.pool_available(0), 64);
    }

    #[test]
    fn link_speed_is_settable() {
        let nic = small_nic();
        assert!(nic.link_status(0).up);
        nic.set_link_speed(0, 0);
        let link = nic.link_status(0);
        assert!(!link.up);
        assert_eq!(link.speed_mbps, 0);
    }

    #[test]
    fn promiscuous_flag_round_trips() {
        let nic = small_nic();
        assert!(!nic.promiscuous(0));
        nic.set_promiscuous(0, true);
        assert!(nic.promiscuous(0));
        nic.set_promiscuous(0, false);
        assert!(!nic.promiscuous(0));
    }

    #[test]
    fn single_port_loops_to_itself() {
        let nic = LoopbackNic::new(LoopbackConfig {
            num_ports: 1,
            ..LoopbackConfig::default()
        });
        let mut bufs: Burst<LoopbackBuf> = ArrayVec::new();
        assert!(nic.bulk_allocate(0, 2, &mut bufs));
        assert_eq!(nic.transmit_burst(0, 0, &mut bufs), 2);
        let mut rx: Burst<LoopbackBuf> = ArrayVec::new();
        assert_eq!(nic.receive_burst(0, 0, 8, &mut rx), 2);
        nic.bulk_release(&mut rx);
    }
}
