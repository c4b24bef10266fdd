//! End-to-end engine tests over the loopback driver.
//!
//! These spin real pinned worker threads, so each test keeps its run short
//! and always drives a cooperative shutdown.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pktblast::config::RunConfig;
use pktblast::engine::Engine;
use pktblast::error::Error;
use pktblast::lcore::{LcoreBinding, plan_bindings};
use pktblast::loopback::{LoopbackConfig, LoopbackNic};
use pktblast::nic::{FrameBuf, NicDriver};

fn loopback(num_ports: u16, num_queues: u16, link_speed_mbps: u32) -> Arc<LoopbackNic> {
    Arc::new(LoopbackNic::new(LoopbackConfig {
        num_ports,
        num_queues,
        link_speed_mbps,
        ..LoopbackConfig::default()
    }))
}

#[test]
fn traffic_flows_between_paired_ports() {
    let nic = loopback(2, 1, 10_000);
    let config = RunConfig::new().num_ports(2);
    let mut engine = Engine::new(config, nic, plan_bindings(2, 1)).unwrap();

    engine.launch().unwrap();
    // First tick installs the cycle budgets and enables transmission.
    engine.tick();
    thread::sleep(Duration::from_millis(300));
    let snap = engine.tick();

    for port in &snap.ports {
        assert!(port.link.up);
        assert_eq!(port.plan.wire_bits, 640);
        assert_eq!(port.plan.pps, 15_625_000);
        assert!(port.plan.tx_cycles > 0);
        assert!(port.totals.opackets > 0, "port {} sent nothing", port.port);
        assert!(port.totals.ipackets > 0, "port {} received nothing", port.port);
        // Sent bytes exclude the FCS: 60 bytes per 64-byte frame.
        assert_eq!(port.totals.obytes, port.totals.opackets * 60);
    }

    engine.context().stop();
    engine.shutdown().unwrap();
}

#[test]
fn link_down_disables_tx_and_recovers() {
    let nic = loopback(2, 1, 0);
    let config = RunConfig::new().num_ports(2);
    let mut engine = Engine::new(config, nic.clone(), plan_bindings(2, 1)).unwrap();

    engine.launch().unwrap();
    engine.tick();
    thread::sleep(Duration::from_millis(150));
    let snap = engine.tick();
    for port in &snap.ports {
        assert!(!port.link.up);
        assert_eq!(port.plan.tx_cycles, 0);
        assert_eq!(port.plan.pps, 0);
        assert_eq!(port.totals.opackets, 0);
    }

    // Bring the links up; the next tick self-heals the schedule.
    nic.set_link_speed(0, 10_000);
    nic.set_link_speed(1, 10_000);
    engine.tick();
    thread::sleep(Duration::from_millis(300));
    let snap = engine.tick();
    for port in &snap.ports {
        assert!(port.plan.tx_cycles > 0);
        assert!(port.totals.opackets > 0);
    }

    engine.context().stop();
    engine.shutdown().unwrap();
}

#[test]
fn racing_tx_workers_stamp_the_pool_once() {
    let nic = loopback(2, 2, 10_000);
    let config = RunConfig::new().num_ports(1);
    // Two transmit-capable cores race into their loops on the same port.
    let bindings = vec![LcoreBinding::tx(1, 0, 0), LcoreBinding::tx(2, 0, 1)];
    let mut engine = Engine::new(config, nic.clone(), bindings).unwrap();

    engine.launch().unwrap();
    engine.tick();
    thread::sleep(Duration::from_millis(100));
    engine.context().stop();
    engine.shutdown().unwrap();

    // Exactly one template won: every pool buffer carries the same queue id
    // in the destination MAC's low byte.
    let mut qids = Vec::new();
    nic.stamp_pool(0, &mut |buf| {
        if buf.pkt_len() > 0 {
            qids.push(buf.data()[5]);
        }
    });
    assert!(!qids.is_empty());
    let winner = qids[0];
    assert!(winner == 0 || winner == 1);
    assert!(qids.iter().all(|q| *q == winner));
}

#[test]
fn zero_rate_never_transmits() {
    let nic = loopback(2, 1, 10_000);
    let config = RunConfig::new().num_ports(2).tx_rate(0);
    let mut engine = Engine::new(config, nic, plan_bindings(2, 1)).unwrap();

    engine.launch().unwrap();
    engine.tick();
    thread::sleep(Duration::from_millis(150));
    let snap = engine.tick();
    for port in &snap.ports {
        assert_eq!(port.plan.tx_cycles, 0);
        assert_eq!(port.totals.opackets, 0);
        assert_eq!(port.totals.tx_drops, 0);
    }

    engine.context().stop();
    engine.shutdown().unwrap();
}

#[test]
fn rejects_bad_binding_plans() {
    let nic = loopback(2, 1, 10_000);
    let config = RunConfig::new().num_ports(2);

    // Port index beyond the configured range.
    let bad_port = vec![LcoreBinding::rxtx(1, 7, 0, 0)];
    assert!(Engine::new(config.clone(), nic.clone(), bad_port).is_err());

    // Configuration asking for more ports than the driver exposes.
    let too_many = RunConfig::new().num_ports(4);
    assert!(Engine::new(too_many, nic, plan_bindings(4, 1)).is_err());
}

#[test]
fn rejects_queue_ids_beyond_the_plan() {
    let nic = loopback(2, 1, 10_000);
    let config = RunConfig::new().num_ports(1);

    // One TX core contributes one queue, so queue id 5 has no counter
    // block; it must be rejected at construction, not panic a worker.
    let stray_tx = vec![LcoreBinding::tx(1, 0, 5)];
    assert!(matches!(
        Engine::new(config.clone(), nic.clone(), stray_tx),
        Err(Error::QueueOutOfRange { lcore: 1, queue: 5 })
    ));

    let stray_rx = vec![LcoreBinding::rxtx(1, 0, 3, 0)];
    assert!(matches!(
        Engine::new(config.clone(), nic.clone(), stray_rx),
        Err(Error::QueueOutOfRange { lcore: 1, queue: 3 })
    ));

    // Queue ids inside the derived range still pass.
    let split = vec![LcoreBinding::tx(1, 0, 0), LcoreBinding::tx(2, 0, 1)];
    assert!(Engine::new(config, nic, split).is_ok());
}

#[test]
fn promiscuous_mode_is_applied_at_launch() {
    let nic = loopback(2, 1, 10_000);
    let config = RunConfig::new().num_ports(2).promiscuous(true);
    let mut engine = Engine::new(config, nic.clone(), plan_bindings(2, 1)).unwrap();

    assert!(!nic.promiscuous(0));
    engine.launch().unwrap();
    assert!(nic.promiscuous(0));
    assert!(nic.promiscuous(1));

    engine.context().stop();
    engine.shutdown().unwrap();
}

#[test]
fn run_until_stopped_renders_and_joins() {
    let nic = loopback(2, 1, 10_000);
    let config = RunConfig::new().num_ports(2);
    let mut engine = Engine::new(config, nic, plan_bindings(2, 1)).unwrap();

    let ctx = engine.context();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(250));
        ctx.stop();
    });

    let mut renders = 0;
    engine
        .run_until_stopped(|snap| {
            assert_eq!(snap.ports.len(), 2);
            renders += 1;
        })
        .unwrap();
    stopper.join().unwrap();
    assert!(renders >= 1);
}
