//! Cycle-budget rate control.
//!
//! Converts a target percentage of line rate into the number of timer
//! cycles a transmit worker waits between bursts. Re-evaluated once per
//! statistics tick, never per burst.

/// Frame check sequence bytes counted on the wire.
pub const FCS_LEN: u64 = 4;

/// Fixed per-packet wire overhead: preamble (7) + SFD (1) + inter-frame
/// gap (12) + FCS (4).
pub const PKT_OVERHEAD_LEN: u64 = 24;

/// Output of one rate evaluation for one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatePlan {
    /// Bits on the wire per frame, including fixed link-layer overhead.
    pub wire_bits: u64,
    /// Link speed in bits per second (0 when the link is down).
    pub link_speed_bps: u64,
    /// Target packets per second.
    pub pps: u64,
    /// Port-level cycle budget between transmit bursts.
    ///
    /// Shared coarsely across all transmit-capable queues of the port
    /// (scaled by queue count, not divided per core). Known limitation of
    /// the scheme, preserved deliberately.
    pub tx_cycles: u64,
}

impl RatePlan {
    /// Evaluate the schedule for one port.
    ///
    /// A link speed of 0 disables transmission until the next evaluation;
    /// the plan self-heals when the link comes back. `tx_rate` of 0 also
    /// yields a zero budget.
    pub fn compute(
        pkt_size: u32,
        tx_rate: u32,
        link_speed_mbps: u32,
        burst_size: u16,
        num_tx_queues: u16,
        timer_hz: u64,
    ) -> Self {
        let wire_bits = (u64::from(pkt_size) - FCS_LEN + PKT_OVERHEAD_LEN) * 8;

        if link_speed_mbps == 0 {
            return Self {
                wire_bits,
                ..Self::default()
            };
        }

        let link_speed_bps = u64::from(link_speed_mbps) * 1_000_000;
        let rate = if tx_rate == 0 { 1 } else { u64::from(tx_rate) };
        let pps = ((link_speed_bps / wire_bits) * rate / 100).max(1);
        let cycles_per_burst = (timer_hz / pps) * u64::from(burst_size);

        let tx_cycles = if tx_rate == 0 {
            0
        } else {
            u64::from(num_tx_queues) * cycles_per_burst
        };

        Self {
            wire_bits,
            link_speed_bps,
            pps,
            tx_cycles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMER_HZ: u64 = 2_000_000_000;

    #[test]
    fn reference_scenario_64b_100pct_10g() {
        // 64B frame at 100% of 10 Gbps, burst 32.
        let plan = RatePlan::compute(64, 100, 10_000, 32, 1, TIMER_HZ);
        assert_eq!(plan.wire_bits, 640);
        assert_eq!(plan.pps, 15_625_000);
        assert_eq!(plan.tx_cycles, (TIMER_HZ / 15_625_000) * 32);
    }

    #[test]
    fn pps_formula_holds_for_all_rates() {
        for rate in 1..=100u32 {
            let plan = RatePlan::compute(64, rate, 10_000, 32, 1, TIMER_HZ);
            let expected = (10_000_000_000u64 / 640) * u64::from(rate) / 100;
            assert_eq!(plan.pps, expected.max(1));
            assert!(plan.pps >= 1);
            assert!(plan.tx_cycles > 0);
        }
    }

    #[test]
    fn link_down_zeroes_the_budget() {
        for rate in [0u32, 1, 50, 100] {
            let plan = RatePlan::compute(64, rate, 0, 32, 1, TIMER_HZ);
            assert_eq!(plan.tx_cycles, 0);
            assert_eq!(plan.pps, 0);
            assert_eq!(plan.link_speed_bps, 0);
            assert_eq!(plan.wire_bits, 640);
        }
    }

    #[test]
    fn zero_rate_disables_tx_but_keeps_pps_floor() {
        let plan = RatePlan::compute(64, 0, 10_000, 32, 1, TIMER_HZ);
        assert_eq!(plan.tx_cycles, 0);
        // pps is still computed (at the 1% floor path) for reporting.
        assert!(plan.pps >= 1);
    }

    #[test]
    fn pps_never_below_one_on_slow_links() {
        // 1 Mbps link, large frames, 1% rate: the raw quotient floors to 0.
        let plan = RatePlan::compute(1518, 1, 1, 32, 1, TIMER_HZ);
        assert_eq!(plan.pps, 1);
    }

    #[test]
    fn budget_scales_with_tx_queue_count() {
        let one = RatePlan::compute(64, 100, 10_000, 32, 1, TIMER_HZ);
        let four = RatePlan::compute(64, 100, 10_000, 32, 4, TIMER_HZ);
        assert_eq!(four.tx_cycles, one.tx_cycles * 4);
    }
}
