use std::{
    net::IpAddr,
    num::ParseFloatError,
    time::Duration,
};

use clap::Parser;

use crate::net::Network;
use crate::probe::MIN_PAYLOAD_LEN;

/// Per-run settings of a `Pinger`.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Wait between two requests
    pub interval: Duration,
    /// How long a request may stay unanswered before it counts as lost
    pub timeout: Duration,
    /// Requests to send; 0 sends until stopped
    pub count: usize,
    /// ICMP payload bytes (never less than the timestamp and token)
    pub size: usize,
    pub ttl: u8,
    pub source: Option<IpAddr>,
    /// Total time limit for a run
    pub deadline: Option<Duration>,
    pub record_rtts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            count: 0,
            size: MIN_PAYLOAD_LEN,
            ttl: 64,
            source: None,
            deadline: None,
            record_rtts: true,
        }
    }
}

fn parse_seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e: ParseFloatError| e.to_string())?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Send ICMP echo requests to a host", long_about = None)]
pub struct Args {
    /// Hostname or IP address to ping
    pub host: String,

    /// Stop after sending this many requests (0 = until interrupted)
    #[arg(short, long, default_value_t = 0)]
    pub count: usize,

    /// Seconds between requests
    #[arg(short, long, value_parser = parse_seconds, default_value = "1")]
    pub interval: Duration,

    /// Seconds to wait for each reply
    #[arg(short = 'W', long, value_parser = parse_seconds, default_value = "1")]
    pub timeout: Duration,

    /// Seconds before the whole run stops, regardless of count
    #[arg(short = 'w', long, value_parser = parse_seconds)]
    pub deadline: Option<Duration>,

    /// ICMP payload size in bytes
    #[arg(short, long, default_value_t = MIN_PAYLOAD_LEN)]
    pub size: usize,

    /// IP time-to-live / IPv6 hop limit
    #[arg(short, long, default_value_t = 64)]
    pub ttl: u8,

    /// Source address to send from
    #[arg(short = 'I', long)]
    pub source: Option<IpAddr>,

    /// Use a raw socket (needs root or CAP_NET_RAW)
    #[arg(short, long)]
    pub privileged: bool,

    /// Address family to resolve the host to: ip, ip4 or ip6
    #[arg(long, value_name = "NETWORK", conflicts_with_all = ["ipv4", "ipv6"])]
    pub network: Option<Network>,

    /// Same as --network ip4
    #[arg(short = '4', conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Same as --network ip6
    #[arg(short = '6')]
    pub ipv6: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn network(&self) -> Network {
        if let Some(network) = self.network {
            network
        } else if self.ipv4 {
            Network::Ip4
        } else if self.ipv6 {
            Network::Ip6
        } else {
            Network::Ip
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    pub fn into_config(self) -> Config {
        Config {
            interval: self.interval,
            timeout: self.timeout,
            count: self.count,
            size: self.size,
            ttl: self.ttl,
            source: self.source,
            deadline: self.deadline,
            record_rtts: true,
        }
    }
}
