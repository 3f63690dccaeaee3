use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

use crate::error::PingError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Cancelled => "cancelled",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How an incoming reply was classified against the outstanding requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Duplicate,
    /// Carries our identity but a sequence we never sent
    Unsolicited,
}

/// Counters and samples shared by the send and receive activities. The
/// cumulative counters survive across runs; the `run_*` counters drive the
/// termination of a single run.
#[derive(Debug, Default)]
pub struct PingState {
    pub sequence: u16,
    pub packets_sent: usize,
    pub packets_recv: usize,
    pub packets_recv_duplicates: usize,
    pub rtts: Vec<Duration>,
    pub run_sent: usize,
    pub run_recv: usize,
    run: u32,
    // Unanswered sequences, tagged with the run that sent them
    outstanding: HashMap<u16, u32>,
    received: HashSet<u16>,
}

impl PingState {
    pub fn begin_run(&mut self) {
        self.run = self.run.wrapping_add(1);
        self.run_sent = 0;
        self.run_recv = 0;
    }

    /// Reserve the next sequence number and count the request as sent.
    pub fn next_request(&mut self) -> u16 {
        let seq = self.sequence;
        self.sequence = seq.wrapping_add(1);
        self.packets_sent += 1;
        self.run_sent += 1;

        // After wrapping, a reused sequence starts out unanswered again
        self.received.remove(&seq);
        self.outstanding.insert(seq, self.run);
        seq
    }

    /// A reply for a sequence that is still outstanding is accepted no
    /// matter how late it arrives; only a second reply is a duplicate. A
    /// reply to an earlier run counts toward the totals but not toward the
    /// current run's completion.
    pub fn record_reply(&mut self, seq: u16, rtt: Duration, record_rtt: bool) -> Verdict {
        if self.received.contains(&seq) {
            self.packets_recv_duplicates += 1;
            return Verdict::Duplicate;
        }
        let Some(run) = self.outstanding.remove(&seq) else {
            return Verdict::Unsolicited;
        };

        self.received.insert(seq);
        self.packets_recv += 1;
        if run == self.run {
            self.run_recv += 1;
        }
        if record_rtt {
            self.rtts.push(rtt);
        }
        Verdict::Accepted
    }

    /// Whether a bounded run has an answer for every request it sent.
    pub fn all_answered(&self, count: usize) -> bool {
        count > 0 && self.run_sent >= count && self.run_recv >= count
    }
}

#[derive(Debug)]
pub(crate) enum StopReason {
    Finished,
    Cancelled,
    Failed(PingError),
}

/// Stop signal observed by both activities of a run. The first reason
/// recorded wins; later calls to `stop` are ignored.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    reason: Mutex<Option<StopReason>>,
    cond: Condvar,
}

impl Signal {
    pub fn reset(&self) {
        *self.lock() = None;
    }

    pub fn stop(&self, reason: StopReason) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.cond.notify_all();
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().is_some()
    }

    /// Sleep for up to `timeout`, waking early on stop. Returns whether the
    /// signal is stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let slot = self.lock();
        if slot.is_some() {
            return true;
        }
        let (slot, _) = self
            .cond
            .wait_timeout_while(slot, timeout, |reason| reason.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.is_some()
    }

    pub fn take(&self) -> Option<StopReason> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<StopReason>> {
        self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stops the signal when dropped, so a panicking activity still releases
/// its partner.
pub(crate) struct StopOnExit<'a>(pub &'a Signal);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.stop(StopReason::Failed(PingError::Transport(
                std::io::Error::other("ping activity panicked"),
            )));
        } else {
            self.0.stop(StopReason::Finished);
        }
    }
}
