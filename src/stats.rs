use std::{net::IpAddr, time::Duration};

use num::integer::Roots;

use crate::state::PingState;

/// Point-in-time view of a pinger's counters and latency samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Statistics {
    pub addr: String,
    pub ip_addr: IpAddr,
    pub packets_sent: usize,
    pub packets_recv: usize,
    pub packets_recv_duplicates: usize,
    /// Percentage of sent requests without an accepted reply
    pub packet_loss: f64,
    pub rtts: Vec<Duration>,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub avg_rtt: Duration,
    pub std_dev_rtt: Duration,
}

impl Statistics {
    pub(crate) fn compute(state: &PingState, addr: &str, ip_addr: IpAddr) -> Self {
        let rtt = RttSummary::compute(&state.rtts);
        Self {
            addr: addr.to_string(),
            ip_addr,
            packets_sent: state.packets_sent,
            packets_recv: state.packets_recv,
            packets_recv_duplicates: state.packets_recv_duplicates,
            packet_loss: packet_loss(state.packets_sent, state.packets_recv),
            rtts: state.rtts.clone(),
            min_rtt: rtt.min,
            max_rtt: rtt.max,
            avg_rtt: rtt.avg,
            std_dev_rtt: rtt.std_dev,
        }
    }
}

pub fn packet_loss(sent: usize, recv: usize) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    sent.saturating_sub(recv) as f64 / sent as f64 * 100.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RttSummary {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub std_dev: Duration,
}

impl RttSummary {
    /// Two passes over whole nanoseconds: the mean and the variance are both
    /// truncated before the integer square root.
    pub fn compute(rtts: &[Duration]) -> Self {
        let n = rtts.len() as u128;
        if n == 0 {
            return Self::default();
        }

        let mut min = rtts[0];
        let mut max = rtts[0];
        let mut sum: u128 = 0;
        for rtt in rtts {
            min = min.min(*rtt);
            max = max.max(*rtt);
            sum += rtt.as_nanos();
        }
        let avg = sum / n;

        let sum_squares: u128 = rtts
            .iter()
            .map(|rtt| {
                let diff = rtt.as_nanos().abs_diff(avg);
                diff * diff
            })
            .sum();
        let std_dev = Roots::sqrt(&(sum_squares / n));

        Self {
            min,
            max,
            avg: from_nanos(avg),
            std_dev: from_nanos(std_dev),
        }
    }
}

fn from_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
