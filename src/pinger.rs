use std::{
    fmt,
    net::IpAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};
use rand::RngCore;

use crate::config::Config;
use crate::error::{PingError, Result};
use crate::net::{open_transport, Network, Target, Transport, TransportKind};
use crate::probe::Family;
use crate::recv::Receiver;
use crate::send::Sender;
use crate::state::{PingState, RunState, Signal, StopReason};
use crate::stats::Statistics;
use crate::validate::Identity;

/// One sent request or received reply, as reported to the handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Size of the ICMP message
    pub nbytes: usize,
    pub addr: String,
    pub ip_addr: IpAddr,
    pub seq: u16,
    pub id: u16,
    /// Zero for sent packets
    pub rtt: Duration,
    /// TTL of a reply, when the transport exposes the IP header
    pub ttl: Option<u8>,
}

type PacketHandler = Arc<dyn Fn(&Packet) + Send + Sync>;
type FinishHandler = Arc<dyn Fn(&Statistics) + Send + Sync>;
type SendErrorHandler = Arc<dyn Fn(&Packet, &PingError) + Send + Sync>;
type RecvErrorHandler = Arc<dyn Fn(&PingError) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Handlers {
    on_send: Option<PacketHandler>,
    on_recv: Option<PacketHandler>,
    on_duplicate: Option<PacketHandler>,
    on_finish: Option<FinishHandler>,
    on_send_error: Option<SendErrorHandler>,
    on_recv_error: Option<RecvErrorHandler>,
}

impl Handlers {
    pub fn send(&self, packet: &Packet) {
        if let Some(f) = &self.on_send {
            f(packet)
        }
    }

    pub fn recv(&self, packet: &Packet) {
        if let Some(f) = &self.on_recv {
            f(packet)
        }
    }

    pub fn duplicate(&self, packet: &Packet) {
        if let Some(f) = &self.on_duplicate {
            f(packet)
        }
    }

    pub fn finish(&self, stats: &Statistics) {
        if let Some(f) = &self.on_finish {
            f(stats)
        }
    }

    pub fn send_error(&self, packet: &Packet, err: &PingError) {
        if let Some(f) = &self.on_send_error {
            f(packet, err)
        }
    }

    pub fn recv_error(&self, err: &PingError) {
        if let Some(f) = &self.on_recv_error {
            f(err)
        }
    }
}

/// Everything the send and receive activities of one run share.
pub(crate) struct RunContext<'a> {
    pub transport: &'a dyn Transport,
    pub state: &'a Mutex<PingState>,
    pub signal: &'a Signal,
    pub handlers: &'a Handlers,
    pub identity: &'a Identity,
    pub config: &'a Config,
    pub addr: &'a str,
    pub ip_addr: IpAddr,
    pub family: Family,
    /// Identifier actually carried on the wire
    pub id: u16,
    pub epoch: Instant,
}

impl RunContext<'_> {
    pub fn lock_state(&self) -> MutexGuard<'_, PingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn nanos_since_epoch(&self, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}

/// Cancels the run of the `Pinger` it was taken from.
#[derive(Clone)]
pub struct StopHandle(Arc<Signal>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.stop(StopReason::Cancelled);
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StopHandle").finish()
    }
}

/// ICMP echo engine for a single target.
///
/// Configure it before calling [`Pinger::run`]. Counters and samples
/// accumulate across runs and stay readable through
/// [`Pinger::statistics`] after a run returns, or from another thread
/// while it is in progress.
pub struct Pinger {
    target: Target,
    config: Config,
    privileged: bool,
    identity: Identity,
    epoch: Instant,
    state: Mutex<PingState>,
    run_state: Mutex<RunState>,
    signal: Arc<Signal>,
    handlers: Handlers,
}

impl Pinger {
    pub fn new(addr: &str) -> Result<Self> {
        Self::with_rng(addr, &mut rand::thread_rng())
    }

    pub fn with_rng<R: RngCore + ?Sized>(addr: &str, rng: &mut R) -> Result<Self> {
        Ok(Self::from_target(Target::new(addr)?, rng))
    }

    pub fn from_target<R: RngCore + ?Sized>(target: Target, rng: &mut R) -> Self {
        Self {
            target,
            config: Config::default(),
            privileged: false,
            identity: Identity::generate(rng),
            epoch: Instant::now(),
            state: Mutex::new(PingState::default()),
            run_state: Mutex::new(RunState::Idle),
            signal: Arc::new(Signal::default()),
            handlers: Handlers::default(),
        }
    }

    pub fn set_addr(&mut self, addr: &str) -> Result<()> {
        self.target.set_addr(addr)
    }

    pub fn set_ip_addr(&mut self, ip: IpAddr) {
        self.target.set_ip_addr(ip)
    }

    pub fn set_network(&mut self, network: Network) {
        self.target.set_network(network)
    }

    /// Text the target was given as, hostname or literal.
    pub fn addr(&self) -> &str {
        self.target.addr()
    }

    pub fn ip_addr(&self) -> IpAddr {
        self.target.ip_addr()
    }

    pub fn network(&self) -> Network {
        self.target.network()
    }

    /// Raw sockets when true, datagram ping sockets otherwise. Read once at
    /// the start of each run.
    pub fn set_privileged(&mut self, privileged: bool) {
        self.privileged = privileged;
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn id(&self) -> u16 {
        self.identity.id()
    }

    pub fn packets_sent(&self) -> usize {
        self.lock_state().packets_sent
    }

    pub fn packets_recv(&self) -> usize {
        self.lock_state().packets_recv
    }

    pub fn packets_recv_duplicates(&self) -> usize {
        self.lock_state().packets_recv_duplicates
    }

    pub fn state(&self) -> RunState {
        *self.run_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.signal.clone())
    }

    pub fn on_send(&mut self, f: impl Fn(&Packet) + Send + Sync + 'static) {
        self.handlers.on_send = Some(Arc::new(f));
    }

    pub fn on_recv(&mut self, f: impl Fn(&Packet) + Send + Sync + 'static) {
        self.handlers.on_recv = Some(Arc::new(f));
    }

    pub fn on_duplicate(&mut self, f: impl Fn(&Packet) + Send + Sync + 'static) {
        self.handlers.on_duplicate = Some(Arc::new(f));
    }

    pub fn on_finish(&mut self, f: impl Fn(&Statistics) + Send + Sync + 'static) {
        self.handlers.on_finish = Some(Arc::new(f));
    }

    pub fn on_send_error(&mut self, f: impl Fn(&Packet, &PingError) + Send + Sync + 'static) {
        self.handlers.on_send_error = Some(Arc::new(f));
    }

    pub fn on_recv_error(&mut self, f: impl Fn(&PingError) + Send + Sync + 'static) {
        self.handlers.on_recv_error = Some(Arc::new(f));
    }

    /// Fresh snapshot of the counters and RTT samples.
    pub fn statistics(&self) -> Statistics {
        let state = self.lock_state();
        Statistics::compute(&state, self.target.addr(), self.target.ip_addr())
    }

    /// Ping until the configured count is answered or timed out, the
    /// deadline passes, or a [`StopHandle`] cancels the run.
    ///
    /// Cancellation is not an error: the statistics gathered so far are
    /// returned. Transport failures end the run with an error after the
    /// finish handler has seen the final statistics.
    pub fn run(&self) -> Result<Statistics> {
        self.run_with_opener(open_transport)
    }

    /// `run` with the transport constructor supplied by the caller.
    pub(crate) fn run_with_opener<F>(&self, open: F) -> Result<Statistics>
    where
        F: FnOnce(TransportKind, Family, Option<IpAddr>, u8) -> Result<Box<dyn Transport>>,
    {
        self.begin()?;

        let kind = TransportKind::from_privileged(self.privileged);
        let transport = match open(
            kind,
            self.target.family(),
            self.config.source,
            self.config.ttl,
        ) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Opening {kind} socket failed: {e}");
                self.set_run_state(RunState::Failed);
                return Err(e);
            }
        };

        self.run_on(transport)
    }

    /// Drive a run over an already opened transport. The caller must have
    /// moved the pinger to `Running`.
    pub(crate) fn run_on(&self, transport: Box<dyn Transport>) -> Result<Statistics> {
        self.signal.reset();
        self.lock_state().begin_run();

        let id = transport.identifier().unwrap_or(self.identity.id());
        if id != self.identity.id() {
            info!("Transport overrides echo identifier {} with {id}", self.identity.id());
        }
        info!(
            "PING {} ({}) over {} socket",
            self.target.addr(),
            self.target.ip_addr(),
            transport.kind()
        );

        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        let ctx = RunContext {
            transport: transport.as_ref(),
            state: &self.state,
            signal: &self.signal,
            handlers: &self.handlers,
            identity: &self.identity,
            config: &self.config,
            addr: self.target.addr(),
            ip_addr: self.target.ip_addr(),
            family: self.target.family(),
            id,
            epoch: self.epoch,
        };

        thread::scope(|scope| {
            scope.spawn(|| Receiver::new(&ctx).run());
            Sender::new(&ctx, deadline).run();
        });

        let reason = self.signal.take().unwrap_or(StopReason::Finished);
        if let Err(e) = transport.close() {
            warn!("Closing transport failed: {e}");
        }

        let (run_state, result) = match reason {
            StopReason::Finished => (RunState::Finished, Ok(())),
            StopReason::Cancelled => (RunState::Cancelled, Ok(())),
            StopReason::Failed(e) => (RunState::Failed, Err(e)),
        };
        self.set_run_state(run_state);

        let stats = self.statistics();
        info!(
            "Run {run_state}: {} sent, {} received, {:.1}% loss",
            stats.packets_sent, stats.packets_recv, stats.packet_loss
        );
        self.handlers.finish(&stats);
        result.map(|()| stats)
    }

    fn begin(&self) -> Result<()> {
        let mut run_state = self.run_state.lock().unwrap_or_else(PoisonError::into_inner);
        if *run_state == RunState::Running {
            return Err(PingError::AlreadyRunning);
        }
        *run_state = RunState::Running;
        Ok(())
    }

    fn set_run_state(&self, state: RunState) {
        *self.run_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn lock_state(&self) -> MutexGuard<'_, PingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Pinger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinger")
            .field("target", &self.target)
            .field("config", &self.config)
            .field("privileged", &self.privileged)
            .field("id", &self.identity.id())
            .field("state", &self.state())
            .finish()
    }
}
