//! Logical-core roles, bindings, and thread pinning.
//!
//! A binding maps one worker core to one port, one role, and its queue
//! assignments. Bindings are plain value types fixed before launch; there
//! is no runtime role transition.

use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::Pid;

use crate::error::{Error, Result};
use crate::nic::QueueId;

/// Role of one worker core, fixed at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcoreRole {
    /// Pure traffic sink: drain RX at maximum poll rate.
    RxOnly,
    /// Pure traffic source: rate-paced transmit bursts.
    TxOnly,
    /// RX drain every iteration, transmit on the shared schedule.
    RxTx,
    /// Misconfiguration sentinel; fatal at dispatch.
    Unknown,
}

/// Static mapping of one worker core to its port, role, and queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcoreBinding {
    /// Logical core (and CPU) the worker thread is pinned to.
    pub lcore: u32,
    /// Index into the engine's port table.
    pub port: u16,
    /// Fixed role for this core.
    pub role: LcoreRole,
    /// Receive queue, required for `RxOnly` and `RxTx`.
    pub rx_qid: Option<QueueId>,
    /// Transmit queue, required for `TxOnly` and `RxTx`.
    pub tx_qid: Option<QueueId>,
}

impl LcoreBinding {
    /// An RX-only binding.
    pub fn rx(lcore: u32, port: u16, rx_qid: QueueId) -> Self {
        Self {
            lcore,
            port,
            role: LcoreRole::RxOnly,
            rx_qid: Some(rx_qid),
            tx_qid: None,
        }
    }

    /// A TX-only binding.
    pub fn tx(lcore: u32, port: u16, tx_qid: QueueId) -> Self {
        Self {
            lcore,
            port,
            role: LcoreRole::TxOnly,
            rx_qid: None,
            tx_qid: Some(tx_qid),
        }
    }

    /// A combined RX/TX binding.
    pub fn rxtx(lcore: u32, port: u16, rx_qid: QueueId, tx_qid: QueueId) -> Self {
        Self {
            lcore,
            port,
            role: LcoreRole::RxTx,
            rx_qid: Some(rx_qid),
            tx_qid: Some(tx_qid),
        }
    }

    /// Reject unknown roles and missing queue assignments.
    ///
    /// A failure here is a build-time bug in the binding plan, not a
    /// transient fault; callers abort.
    pub fn validate(&self) -> Result<()> {
        match self.role {
            LcoreRole::Unknown => Err(Error::UnknownRole { lcore: self.lcore }),
            LcoreRole::RxOnly if self.rx_qid.is_none() => Err(Error::MissingQueue {
                lcore: self.lcore,
                role: self.role,
            }),
            LcoreRole::TxOnly if self.tx_qid.is_none() => Err(Error::MissingQueue {
                lcore: self.lcore,
                role: self.role,
            }),
            LcoreRole::RxTx if self.rx_qid.is_none() || self.tx_qid.is_none() => {
                Err(Error::MissingQueue {
                    lcore: self.lcore,
                    role: self.role,
                })
            }
            _ => Ok(()),
        }
    }

    /// Number of RX queues this binding contributes to its port.
    pub fn rx_queue_count(&self) -> u16 {
        u16::from(self.rx_qid.is_some())
    }

    /// Number of TX queues this binding contributes to its port.
    pub fn tx_queue_count(&self) -> u16 {
        u16::from(self.tx_qid.is_some())
    }
}

/// Build a default binding plan: `cores_per_port` workers per port, lcore
/// ids assigned sequentially starting at 1 (0 is the control thread).
///
/// One core per port runs combined RX/TX; two split into an RX sink and a
/// TX source; more than two split roughly in half with one queue per core.
pub fn plan_bindings(num_ports: u16, cores_per_port: u16) -> Vec<LcoreBinding> {
    let mut bindings = Vec::new();
    let mut lcore = 1u32;
    for port in 0..num_ports {
        match cores_per_port {
            0 | 1 => {
                bindings.push(LcoreBinding::rxtx(lcore, port, 0, 0));
                lcore += 1;
            }
            2 => {
                bindings.push(LcoreBinding::rx(lcore, port, 0));
                bindings.push(LcoreBinding::tx(lcore + 1, port, 0));
                lcore += 2;
            }
            n => {
                let rx_cores = n / 2;
                for q in 0..rx_cores {
                    bindings.push(LcoreBinding::rx(lcore, port, q));
                    lcore += 1;
                }
                for q in 0..(n - rx_cores) {
                    bindings.push(LcoreBinding::tx(lcore, port, q));
                    lcore += 1;
                }
            }
        }
    }
    bindings
}

/// Pin the calling thread to one CPU.
///
/// Mirrors what EAL does for its lcore threads with pthread affinity.
pub fn pin_current_thread(cpu: usize) -> Result<()> {
    let mut set = CpuSet::new();
    set.set(cpu).map_err(Error::Affinity)?;
    sched_setaffinity(Pid::from_raw(0), &set).map_err(Error::Affinity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_catches_misconfiguration() {
        assert!(LcoreBinding::rx(1, 0, 0).validate().is_ok());
        assert!(LcoreBinding::tx(1, 0, 0).validate().is_ok());
        assert!(LcoreBinding::rxtx(1, 0, 0, 0).validate().is_ok());

        let unknown = LcoreBinding {
            lcore: 3,
            port: 0,
            role: LcoreRole::Unknown,
            rx_qid: None,
            tx_qid: None,
        };
        assert!(matches!(
            unknown.validate(),
            Err(Error::UnknownRole { lcore: 3 })
        ));

        let unbound = LcoreBinding {
            lcore: 4,
            port: 0,
            role: LcoreRole::TxOnly,
            rx_qid: None,
            tx_qid: None,
        };
        assert!(matches!(
            unbound.validate(),
            Err(Error::MissingQueue { lcore: 4, .. })
        ));
    }

    #[test]
    fn plan_one_core_per_port() {
        let plan = plan_bindings(2, 1);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], LcoreBinding::rxtx(1, 0, 0, 0));
        assert_eq!(plan[1], LcoreBinding::rxtx(2, 1, 0, 0));
    }

    #[test]
    fn plan_split_roles() {
        let plan = plan_bindings(1, 2);
        assert_eq!(plan[0].role, LcoreRole::RxOnly);
        assert_eq!(plan[1].role, LcoreRole::TxOnly);

        let plan = plan_bindings(1, 5);
        let rx = plan.iter().filter(|b| b.role == LcoreRole::RxOnly).count();
        let tx = plan.iter().filter(|b| b.role == LcoreRole::TxOnly).count();
        assert_eq!((rx, tx), (2, 3));
        // One queue per core, numbered from zero per direction.
        assert_eq!(plan[2].rx_qid, None);
        assert_eq!(plan[2].tx_qid, Some(0));
        assert_eq!(plan[4].tx_qid, Some(2));
    }
}
