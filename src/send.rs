use std::time::Instant;

use log::{debug, trace, warn};

use crate::error::{is_transient_send_error, PingError, Result};
use crate::pinger::{Packet, RunContext};
use crate::probe::EchoRequest;
use crate::state::{StopOnExit, StopReason};

/// Send activity of a run: one echo request per interval until the count is
/// reached, then waits out the last reply window.
pub(crate) struct Sender<'a> {
    ctx: &'a RunContext<'a>,
    deadline: Option<Instant>,
}

impl<'a> Sender<'a> {
    pub fn new(ctx: &'a RunContext<'a>, deadline: Option<Instant>) -> Self {
        Self { ctx, deadline }
    }

    pub fn run(&self) {
        debug!("Sender started for {}", self.ctx.ip_addr);
        let _guard = StopOnExit(self.ctx.signal);

        let count = self.ctx.config.count;
        let mut next_send = Instant::now();
        let mut last_send: Option<Instant> = None;

        loop {
            if self.ctx.signal.is_stopped() {
                break;
            }

            let now = Instant::now();
            if self.deadline.is_some_and(|deadline| now >= deadline) {
                debug!("Run deadline reached");
                self.ctx.signal.stop(StopReason::Cancelled);
                break;
            }

            let (run_sent, answered) = {
                let state = self.ctx.lock_state();
                (state.run_sent, state.all_answered(count))
            };

            let wake = if count > 0 && run_sent >= count {
                let window_end = last_send.map_or(now, |sent| sent + self.ctx.config.timeout);
                if answered || now >= window_end {
                    self.ctx.signal.stop(StopReason::Finished);
                    break;
                }
                window_end
            } else if now >= next_send {
                if let Err(e) = self.send_one() {
                    self.ctx.signal.stop(StopReason::Failed(e));
                    break;
                }
                last_send = Some(now);
                next_send += self.ctx.config.interval;
                if next_send < now {
                    next_send = now;
                }
                continue;
            } else {
                next_send
            };

            let wake = self.deadline.map_or(wake, |deadline| wake.min(deadline));
            self.ctx
                .signal
                .wait_timeout(wake.saturating_duration_since(Instant::now()));
        }

        debug!("Sender finished");
    }

    fn send_one(&self) -> Result<()> {
        let (seq, bytes) = {
            let mut state = self.ctx.lock_state();
            let seq = state.next_request();
            let request = EchoRequest {
                id: self.ctx.identity.id(),
                seq,
                sent_nanos: self.ctx.nanos_since_epoch(Instant::now()),
                token: self.ctx.identity.token(),
                size: self.ctx.config.size,
            };
            (seq, request.encode(self.ctx.family))
        };

        let packet = Packet {
            nbytes: bytes.len(),
            addr: self.ctx.addr.to_string(),
            ip_addr: self.ctx.ip_addr,
            seq,
            id: self.ctx.id,
            rtt: Default::default(),
            ttl: None,
        };

        match self.ctx.transport.send_to(&bytes, self.ctx.ip_addr) {
            Ok(_) => {
                trace!("Sent echo request seq={seq} to {}", self.ctx.ip_addr);
                self.ctx.handlers.send(&packet);
                Ok(())
            }
            Err(e) if is_transient_send_error(&e) => {
                warn!("Sending seq={seq} to {} failed: {e}", self.ctx.ip_addr);
                self.ctx.handlers.send_error(&packet, &PingError::Transport(e));
                Ok(())
            }
            Err(e) => Err(PingError::Transport(e)),
        }
    }
}
