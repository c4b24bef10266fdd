//! pktblast command-line traffic generator.
//!
//! Drives the pktblast engine over the in-memory loopback driver: ports are
//! wired in even/odd pairs, each with its own finite buffer pool, so the
//! full RX/TX/rate/statistics pipeline runs without NIC hardware. A
//! DPDK-backed `NicDriver` would slot in here unchanged.
//!
//! # Usage
//!
//! ```bash
//! # Two ports, one combined RX/TX core each, 50% of a 10G line
//! pktblast --ports 2 --rate 50
//!
//! # Split RX and TX onto separate cores, 128-byte frames
//! pktblast --cores-per-port 2 --size 128
//! ```
//!
//! Stop with Ctrl-C; the engine drains its workers and prints a final
//! report.

use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pktblast::config::RunConfig;
use pktblast::engine::Engine;
use pktblast::lcore::plan_bindings;
use pktblast::loopback::{LoopbackConfig, LoopbackNic};
use pktblast::stats::StatsSnapshot;

#[derive(Parser, Debug)]
#[command(name = "pktblast")]
#[command(about = "Per-core NIC traffic generator and benchmark tool")]
struct Args {
    /// Frame size on the wire in bytes, including FCS
    #[arg(short = 's', long, default_value_t = 64)]
    size: u32,

    /// Packets per transmit burst
    #[arg(short = 'b', long, default_value_t = 32)]
    burst: u16,

    /// Buffers in each port's send pool
    #[arg(short = 'm', long, default_value_t = 8192)]
    mbufs: u32,

    /// RX descriptor ring size
    #[arg(long, default_value_t = 1024)]
    rxd: u16,

    /// TX descriptor ring size
    #[arg(long, default_value_t = 1024)]
    txd: u16,

    /// Target transmit rate as a percentage of line rate (0 disables TX)
    #[arg(short = 'r', long, default_value_t = 100)]
    rate: u32,

    /// Statistics interval in seconds
    #[arg(short = 't', long, default_value_t = 1)]
    interval: u64,

    /// Number of ports (wired in even/odd loopback pairs)
    #[arg(short = 'p', long, default_value_t = 2)]
    ports: u16,

    /// Worker cores per port: 1 = combined RX/TX, 2 = RX + TX split,
    /// more = one queue per core
    #[arg(short = 'c', long, default_value_t = 1)]
    cores_per_port: u16,

    /// Base of the /24 used for random template addresses
    #[arg(long, default_value = "198.18.0.0")]
    subnet: Ipv4Addr,

    /// Simulated link speed in Mbps
    #[arg(long, default_value_t = 10_000)]
    link_speed: u32,

    /// Put every port into promiscuous mode
    #[arg(short = 'P', long)]
    promiscuous: bool,
}

fn render(snap: &StatsSnapshot) {
    println!("Port    : Rate statistics per queue");
    for port in &snap.ports {
        let link = if port.link.up {
            format!("link up at {} Mbps", port.link.speed_mbps)
        } else {
            "link down".to_string()
        };
        println!(
            "{:2} >> {}, WireSize {} bits, PPS {}, Cycles/Burst {}",
            port.port, link, port.plan.wire_bits, port.plan.pps, port.plan.tx_cycles
        );
        print_row("RxQs", port.queues.iter().map(|q| q.ipackets));
        print_row("TxQs", port.queues.iter().map(|q| q.opackets));
        print_row("TxDrop", port.queues.iter().map(|q| q.tx_drops));
        print_row("NoMBUF", port.queues.iter().map(|q| q.no_mbufs));
        print_row("TxTime", port.queues.iter().map(|q| q.tx_time));
        println!(
            "  Missed: {}, ierr: {}, oerr: {}, rxNoMbuf: {}",
            port.errors.imissed, port.errors.ierrors, port.errors.oerrors, port.errors.rx_nombuf
        );
    }
    println!(
        "Burst: {}, MBUF Count: {}, PktSize: {}, Rx/Tx {}/{}, Rate {}%\n",
        snap.burst_size, snap.mbuf_count, snap.pkt_size, snap.nb_rxd, snap.nb_txd, snap.tx_rate
    );
}

fn print_row(name: &str, values: impl Iterator<Item = u64>) {
    let mut total = 0u64;
    print!("  {name:<6}:");
    for v in values {
        total += v;
        print!(" {v:>12}");
    }
    println!(" Total: {total:>12}");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = RunConfig::new()
        .pkt_size(args.size)
        .burst_size(args.burst)
        .mbuf_count(args.mbufs)
        .ring_sizes(args.rxd, args.txd)
        .tx_rate(args.rate)
        .stats_interval(args.interval)
        .num_ports(args.ports)
        .subnet(args.subnet)
        .promiscuous(args.promiscuous);

    let nic = Arc::new(LoopbackNic::new(LoopbackConfig {
        num_ports: args.ports,
        num_queues: args.cores_per_port.max(1),
        pool_size: args.mbufs,
        data_room: 2048,
        ring_depth: args.rxd as usize,
        link_speed_mbps: args.link_speed,
    }));

    let bindings = plan_bindings(args.ports, args.cores_per_port);
    info!(
        ports = args.ports,
        workers = bindings.len(),
        rate = args.rate,
        "starting traffic engine"
    );

    let mut engine = Engine::new(config, nic, bindings)?;

    let ctx = engine.context();
    ctrlc::set_handler(move || {
        info!("signal received, preparing to exit");
        ctx.stop();
    })?;

    engine.run_until_stopped(render)?;
    println!("Bye...");
    Ok(())
}
