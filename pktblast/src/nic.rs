//! NIC abstraction consumed by the traffic engine.
//!
//! The engine never talks to hardware directly; it is generic over a
//! [`NicDriver`] that exposes burst receive/transmit, bulk pool
//! allocate/release, link status, and device error counters. The in-tree
//! implementation is [`crate::loopback::LoopbackNic`]; a DPDK-backed driver
//! would plug in at the same seam.

use arrayvec::ArrayVec;
use std::fmt;

/// Ethernet device port ID.
pub type PortId = u16;

/// Queue ID for RX/TX queues.
pub type QueueId = u16;

/// Upper bound on buffers moved in one burst call.
///
/// Sized for the RX path, which requests up to twice the configured burst.
pub const BURST_CAP: usize = 256;

/// Fixed-capacity buffer batch used on the hot path.
///
/// Workers reuse one of these per loop; no allocation happens per burst.
pub type Burst<B> = ArrayVec<B, BURST_CAP>;

/// A six-byte Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Link state snapshot for one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Link speed in Mbps; 0 when the link is down.
    pub speed_mbps: u32,
    /// Whether the link is up.
    pub up: bool,
}

/// Device-level error counters, monotonic from the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceErrorCounters {
    /// Packets missed because RX descriptors were exhausted.
    pub imissed: u64,
    /// Erroneous received packets.
    pub ierrors: u64,
    /// Failed transmitted packets.
    pub oerrors: u64,
    /// RX mbuf allocation failures inside the device.
    pub rx_nombuf: u64,
}

/// A driver-owned packet buffer.
pub trait FrameBuf {
    /// Valid packet bytes.
    fn data(&self) -> &[u8];

    /// Mutable access to the valid packet bytes.
    fn data_mut(&mut self) -> &mut [u8];

    /// Current packet length in bytes.
    fn pkt_len(&self) -> usize;

    /// Set the packet length. Must not exceed the buffer's data room.
    fn set_pkt_len(&mut self, len: usize);
}

/// The NIC seam the engine runs against.
///
/// All methods take `&self`; a driver is shared across every worker thread.
/// The burst methods are the hot path and must not block.
pub trait NicDriver: Send + Sync + 'static {
    /// Buffer handle type moved through bursts.
    type Buf: FrameBuf + Send;

    /// Non-blocking batch receive of up to `max` packets, appended to `out`.
    ///
    /// Returns the number of packets received.
    fn receive_burst(
        &self,
        port: PortId,
        queue: QueueId,
        max: usize,
        out: &mut Burst<Self::Buf>,
    ) -> usize;

    /// Transmit as many of `bufs` as the hardware accepts.
    ///
    /// Accepted buffers are drained from the front of `bufs`; the
    /// unaccepted remainder stays owned by the caller. Returns the
    /// accepted count.
    fn transmit_burst(&self, port: PortId, queue: QueueId, bufs: &mut Burst<Self::Buf>) -> usize;

    /// All-or-nothing bulk allocation of `count` buffers from the port's
    /// send pool, appended to `out`. Returns false (and appends nothing)
    /// if the pool cannot satisfy the request.
    fn bulk_allocate(&self, port: PortId, count: usize, out: &mut Burst<Self::Buf>) -> bool;

    /// Release every buffer in `bufs` back to its originating pool.
    fn bulk_release(&self, bufs: &mut Burst<Self::Buf>);

    /// Visit every buffer of the port's send pool exactly once.
    ///
    /// Used for one-shot packet templating; not a hot-path call.
    fn stamp_pool(&self, port: PortId, f: &mut dyn FnMut(&mut Self::Buf));

    /// Current link status for a port.
    fn link_status(&self, port: PortId) -> LinkStatus;

    /// MAC address of a port.
    fn mac_addr(&self, port: PortId) -> MacAddr;

    /// Monotonic device-level error counters for a port.
    fn device_error_counters(&self, port: PortId) -> DeviceErrorCounters;

    /// Number of ports the driver exposes.
    fn num_ports(&self) -> u16;

    /// Frequency of the cycle counter in Hz.
    fn timer_hz(&self) -> u64;

    /// Current cycle counter value.
    fn timer_cycles(&self) -> u64;

    /// Enable or disable promiscuous reception on a port. Default: no-op.
    fn set_promiscuous(&self, _port: PortId, _on: bool) {}

    /// Stop and close a port at shutdown. Default: no-op.
    fn close_port(&self, _port: PortId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_addr_display() {
        let mac = MacAddr([0x3c, 0xfd, 0xfe, 0xe4, 0x34, 0xc0]);
        assert_eq!(mac.to_string(), "3c:fd:fe:e4:34:c0");
    }

    #[test]
    fn link_status_default_is_down() {
        let link = LinkStatus::default();
        assert!(!link.up);
        assert_eq!(link.speed_mbps, 0);
    }
}
