use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use log::error;

use ping_rs::config::Args;
use ping_rs::{Pinger, SystemResolver, Target};

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(args.log_level())
        .format_target(false)
        .init();

    let target = match Target::resolve(&args.host, args.network(), Arc::new(SystemResolver)) {
        Ok(target) => target,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let mut pinger = Pinger::from_target(target, &mut rand::thread_rng());
    pinger.set_privileged(args.privileged);
    *pinger.config_mut() = args.into_config();

    pinger.on_recv(|pkt| {
        let ttl = pkt.ttl.map(|t| format!(" ttl={t}")).unwrap_or_default();
        println!(
            "{} bytes from {}: icmp_seq={}{ttl} time={:.3?}",
            pkt.nbytes, pkt.ip_addr, pkt.seq, pkt.rtt
        );
    });
    pinger.on_duplicate(|pkt| {
        println!(
            "{} bytes from {}: icmp_seq={} time={:.3?} (DUP!)",
            pkt.nbytes, pkt.ip_addr, pkt.seq, pkt.rtt
        );
    });
    pinger.on_finish(|stats| {
        println!("\n--- {} ping statistics ---", stats.addr);
        println!(
            "{} packets transmitted, {} packets received, {} duplicates, {:.1}% packet loss",
            stats.packets_sent, stats.packets_recv, stats.packets_recv_duplicates, stats.packet_loss
        );
        println!(
            "round-trip min/avg/max/stddev = {:.3?}/{:.3?}/{:.3?}/{:.3?}",
            stats.min_rtt, stats.avg_rtt, stats.max_rtt, stats.std_dev_rtt
        );
    });

    let handle = pinger.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || handle.stop()) {
        error!("Could not install Ctrl-C handler: {e}");
    }

    println!("PING {} ({}):", pinger.addr(), pinger.ip_addr());
    match pinger.run() {
        Ok(stats) if stats.packets_recv > 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}
