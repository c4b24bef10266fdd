//! pktblast: a per-core NIC traffic generator and benchmark engine.
//!
//! The engine drives multiple transmit/receive queues from dedicated,
//! pinned CPU cores to produce and measure packet traffic against a device
//! under test:
//!
//! - [`worker`]: role-based burst loops (RX-only, TX-only, combined RX/TX)
//!   spinning until cooperative shutdown
//! - [`rate`]: cycle-budget rate control converting a target percentage of
//!   line rate into a polling schedule
//! - [`template`]: one-shot, race-safe packet templating so the send path
//!   never reconstructs headers
//! - [`stats`]: the triple-buffered statistics engine turning monotonic
//!   per-queue counters into per-second rates
//!
//! Hardware access goes through the [`nic::NicDriver`] trait; the in-tree
//! [`loopback::LoopbackNic`] driver lets the engine run and be tested
//! without NIC hardware.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pktblast::config::RunConfig;
//! use pktblast::engine::Engine;
//! use pktblast::lcore::plan_bindings;
//! use pktblast::loopback::{LoopbackConfig, LoopbackNic};
//!
//! let config = RunConfig::new().num_ports(2).tx_rate(50);
//! let nic = Arc::new(LoopbackNic::new(LoopbackConfig::default()));
//! let bindings = plan_bindings(2, 1);
//! let mut engine = Engine::new(config, nic, bindings).unwrap();
//! engine.launch().unwrap();
//! let snapshot = engine.tick();
//! assert_eq!(snapshot.ports.len(), 2);
//! engine.context().stop();
//! engine.shutdown().unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod lcore;
pub mod loopback;
pub mod nic;
pub mod port;
pub mod rate;
pub mod stats;
pub mod template;
pub mod worker;

pub use config::{RunConfig, RunContext};
pub use engine::Engine;
pub use error::{Error, Result};
pub use lcore::{LcoreBinding, LcoreRole, plan_bindings};
pub use nic::{FrameBuf, LinkStatus, MacAddr, NicDriver, PortId, QueueId};
pub use rate::RatePlan;
pub use stats::StatsSnapshot;
