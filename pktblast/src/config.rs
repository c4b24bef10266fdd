//! Run configuration and shared run context.
//!
//! `RunConfig` is read-only after launch. The only mutable piece of shared
//! state is the stop flag in [`RunContext`], flipped once by the control
//! thread (or a signal handler) and polled by every worker loop.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::nic::BURST_CAP;
use crate::template::ETHER_CRC_LEN;

/// Maximum standard Ethernet frame size including FCS.
pub const ETHER_MAX_LEN: u32 = 1518;
/// Minimum Ethernet frame size including FCS.
pub const ETHER_MIN_LEN: u32 = 64;

/// Process-lifetime run configuration.
///
/// Built with the setter methods, validated once by [`RunConfig::validate`]
/// before launch, then never mutated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Frame size on the wire in bytes, including the 4-byte FCS.
    pub pkt_size: u32,
    /// Packets per transmit burst.
    pub burst_size: u16,
    /// Number of buffers in each port's send pool.
    pub mbuf_count: u32,
    /// RX descriptor ring size.
    pub nb_rxd: u16,
    /// TX descriptor ring size.
    pub nb_txd: u16,
    /// Target transmit rate as a percentage of line rate. 0 disables TX.
    pub tx_rate: u32,
    /// Statistics interval in seconds.
    pub stats_interval_secs: u64,
    /// Number of ports driven by the engine.
    pub num_ports: u16,
    /// Base address of the /24 used for random template src/dst addresses.
    pub subnet: Ipv4Addr,
    /// Whether to put every port into promiscuous mode at launch.
    pub promiscuous: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pkt_size: 64,
            burst_size: 32,
            mbuf_count: 8192,
            nb_rxd: 1024,
            nb_txd: 1024,
            tx_rate: 100,
            stats_interval_secs: 1,
            num_ports: 1,
            // RFC 2544 benchmarking block.
            subnet: Ipv4Addr::new(198, 18, 0, 0),
            promiscuous: false,
        }
    }
}

impl RunConfig {
    /// Create a configuration with the default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame size in bytes (including FCS).
    pub fn pkt_size(mut self, size: u32) -> Self {
        self.pkt_size = size;
        self
    }

    /// Set the transmit burst size.
    pub fn burst_size(mut self, burst: u16) -> Self {
        self.burst_size = burst;
        self
    }

    /// Set the send-pool buffer count.
    pub fn mbuf_count(mut self, count: u32) -> Self {
        self.mbuf_count = count;
        self
    }

    /// Set RX/TX descriptor ring sizes.
    pub fn ring_sizes(mut self, rxd: u16, txd: u16) -> Self {
        self.nb_rxd = rxd;
        self.nb_txd = txd;
        self
    }

    /// Set the target rate percentage (0 disables transmission).
    pub fn tx_rate(mut self, percent: u32) -> Self {
        self.tx_rate = percent;
        self
    }

    /// Set the statistics interval in seconds.
    pub fn stats_interval(mut self, secs: u64) -> Self {
        self.stats_interval_secs = secs;
        self
    }

    /// Set the number of ports.
    pub fn num_ports(mut self, ports: u16) -> Self {
        self.num_ports = ports;
        self
    }

    /// Set the /24 subnet used for random template addresses.
    pub fn subnet(mut self, base: Ipv4Addr) -> Self {
        self.subnet = base;
        self
    }

    /// Enable or disable promiscuous mode on every port at launch.
    pub fn promiscuous(mut self, on: bool) -> Self {
        self.promiscuous = on;
        self
    }

    /// Length of the template frame actually handed to the NIC (no FCS).
    #[inline]
    pub fn frame_len(&self) -> usize {
        (self.pkt_size - ETHER_CRC_LEN) as usize
    }

    /// Check all values are in range.
    pub fn validate(&self) -> Result<()> {
        if self.pkt_size < ETHER_MIN_LEN || self.pkt_size > ETHER_MAX_LEN {
            return Err(Error::InvalidConfig(format!(
                "pkt_size {} not in [{ETHER_MIN_LEN}, {ETHER_MAX_LEN}]",
                self.pkt_size
            )));
        }
        if self.burst_size == 0 || (self.burst_size as usize) * 2 > BURST_CAP {
            return Err(Error::InvalidConfig(format!(
                "burst_size {} not in [1, {}]",
                self.burst_size,
                BURST_CAP / 2
            )));
        }
        if self.mbuf_count < self.burst_size as u32 {
            return Err(Error::InvalidConfig(format!(
                "mbuf_count {} smaller than one burst of {}",
                self.mbuf_count, self.burst_size
            )));
        }
        if self.nb_rxd == 0 || self.nb_txd == 0 {
            return Err(Error::InvalidConfig("descriptor ring sizes must be nonzero".into()));
        }
        if self.tx_rate > 100 {
            return Err(Error::InvalidConfig(format!(
                "tx_rate {}% not in [0, 100]",
                self.tx_rate
            )));
        }
        if self.stats_interval_secs == 0 {
            return Err(Error::InvalidConfig("stats_interval_secs must be nonzero".into()));
        }
        if self.num_ports == 0 {
            return Err(Error::InvalidConfig("num_ports must be nonzero".into()));
        }
        Ok(())
    }
}

/// Shared run context passed by `Arc` into every worker.
///
/// Single producer flips the stop flag; workers poll it every loop
/// iteration. Visibility is all that is required, so relaxed loads are used
/// on the hot path.
#[derive(Debug)]
pub struct RunContext {
    /// Immutable run configuration.
    pub config: RunConfig,
    force_quit: AtomicBool,
}

impl RunContext {
    /// Create a context around a validated configuration.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            force_quit: AtomicBool::new(false),
        }
    }

    /// Request cooperative shutdown of all workers.
    pub fn stop(&self) {
        self.force_quit.store(true, Ordering::Release);
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn stopping(&self) -> bool {
        self.force_quit.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(RunConfig::new().pkt_size(32).validate().is_err());
        assert!(RunConfig::new().pkt_size(9000).validate().is_err());
        assert!(RunConfig::new().burst_size(0).validate().is_err());
        assert!(RunConfig::new().burst_size(200).validate().is_err());
        assert!(RunConfig::new().tx_rate(101).validate().is_err());
        assert!(RunConfig::new().stats_interval(0).validate().is_err());
        assert!(RunConfig::new().num_ports(0).validate().is_err());
        assert!(RunConfig::new().mbuf_count(8).validate().is_err());
    }

    #[test]
    fn promiscuous_defaults_off() {
        assert!(!RunConfig::default().promiscuous);
        assert!(RunConfig::new().promiscuous(true).promiscuous);
    }

    #[test]
    fn stop_flag_round_trip() {
        let ctx = RunContext::new(RunConfig::default());
        assert!(!ctx.stopping());
        ctx.stop();
        assert!(ctx.stopping());
    }
}
