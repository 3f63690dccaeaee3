//! ICMP echo ("ping") engine.
//!
//! A [`Pinger`] resolves its target once and opens a fresh ICMP socket for
//! each run. A raw socket is used when privileged, and a datagram ping
//! socket otherwise. Each run has one thread that sends echo requests at a
//! fixed interval and another that matches replies against the requests
//! still outstanding. Replies are told apart from other pingers on the host
//! by the echo identifier and a random token in the payload.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let mut pinger = ping_rs::Pinger::new("example.com")?;
//! pinger.config_mut().count = 3;
//! pinger.config_mut().interval = Duration::from_millis(500);
//! pinger.on_recv(|pkt| println!("seq={} time={:?}", pkt.seq, pkt.rtt));
//!
//! let stats = pinger.run()?;
//! println!("{:.1}% loss, avg {:?}", stats.packet_loss, stats.avg_rtt);
//! # Ok::<(), ping_rs::PingError>(())
//! ```

pub mod config;
pub mod error;
pub mod net;
pub mod pinger;
pub mod probe;
pub mod state;
pub mod stats;
pub mod validate;

mod recv;
mod send;

pub use config::Config;
pub use error::{PingError, ProtocolError, Result};
pub use net::{Network, Resolve, SystemResolver, Target, TransportKind};
pub use pinger::{Packet, Pinger, StopHandle};
pub use state::RunState;
pub use stats::Statistics;
