use std::time::Duration;

use log::{debug, trace};

use crate::error::{PingError, ProtocolError};
use crate::net::Frame;
use crate::pinger::{Packet, RunContext};
use crate::probe::decode_reply;
use crate::state::{StopOnExit, StopReason, Verdict};

// Upper bound on one blocking receive, so a stop is noticed promptly
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receive activity of a run: pulls frames off the transport and matches
/// them against this pinger's outstanding requests.
pub(crate) struct Receiver<'a> {
    ctx: &'a RunContext<'a>,
}

impl<'a> Receiver<'a> {
    pub fn new(ctx: &'a RunContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn run(&self) {
        debug!("Receiver started, expecting identifier {}", self.ctx.id);
        let _guard = StopOnExit(self.ctx.signal);
        let wait = self.ctx.config.timeout.min(RECV_POLL_INTERVAL);

        while !self.ctx.signal.is_stopped() {
            match self.ctx.transport.recv(wait) {
                Ok(Some(frame)) => self.process_frame(frame),
                Ok(None) => {}
                Err(PingError::Protocol(e)) => self.discard(e),
                Err(e) => {
                    self.ctx.signal.stop(StopReason::Failed(e));
                    break;
                }
            }
        }

        debug!("Receiver finished");
    }

    fn process_frame(&self, frame: Frame) {
        let reply = match decode_reply(&frame.bytes, self.ctx.family) {
            Ok(reply) => reply,
            Err(e) => return self.discard(e),
        };

        if !self.ctx.identity.matches(&reply, self.ctx.id) {
            trace!(
                "Ignoring echo reply id={} seq={} from {}: not ours",
                reply.id,
                reply.seq,
                frame.from
            );
            return;
        }

        let sent_at = Duration::from_nanos(reply.sent_nanos);
        let received_at = Duration::from_nanos(self.ctx.nanos_since_epoch(frame.received_at));
        let rtt = received_at.saturating_sub(sent_at);

        let (verdict, finished) = {
            let mut state = self.ctx.lock_state();
            let verdict = state.record_reply(reply.seq, rtt, self.ctx.config.record_rtts);
            (verdict, state.all_answered(self.ctx.config.count))
        };

        let packet = Packet {
            nbytes: reply.len,
            addr: self.ctx.addr.to_string(),
            ip_addr: frame.from,
            seq: reply.seq,
            id: reply.id,
            rtt,
            ttl: frame.ttl,
        };

        match verdict {
            Verdict::Accepted => self.ctx.handlers.recv(&packet),
            Verdict::Duplicate => {
                debug!("Duplicate reply for seq={} from {}", reply.seq, frame.from);
                self.ctx.handlers.duplicate(&packet);
            }
            Verdict::Unsolicited => {
                debug!("Reply for unsent seq={} from {}", reply.seq, frame.from);
            }
        }

        if finished {
            self.ctx.signal.stop(StopReason::Finished);
        }
    }

    fn discard(&self, err: ProtocolError) {
        match err {
            // Raw sockets see every ICMP message on the host
            ProtocolError::UnexpectedType { .. } => trace!("Skipping frame: {err}"),
            _ => {
                debug!("Discarding frame: {err}");
                self.ctx.handlers.recv_error(&PingError::Protocol(err));
            }
        }
    }
}
