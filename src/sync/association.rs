use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::{ClockConfig, Error, Poll, Result, ServerId, MAX_DISPERSION, PACKET_SIZE};
use crate::network::Transport;
use crate::protocol::{
    Activation, AssociationState, LeapIndicator, Mode, Packet, ACCEPTED_VERSIONS, MAX_STRATUM,
};
use crate::time::{elapsed_seconds, Timestamp};
use super::filter::{offset_and_delay, Sample, SampleRing};

/// Resolution of our own stamps (about 1 µs)
const LOCAL_PRECISION: f64 = 1.0 / 1_048_576.0;

/// Fraction bits below stamping resolution, filled with random bits so the
/// echoed originate timestamp doubles as a nonce
const NONCE_MASK: u32 = 0xfff;

/// A new best dispersion below this share of the previous one counts as an
/// improvement worth republishing
const IMPROVEMENT_RATIO: f64 = 0.9;

/// Tuning for a single association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationConfig {
    /// Shortest poll interval exponent
    pub min_poll: Poll,
    /// Longest poll interval exponent
    pub max_poll: Poll,
    /// Samples needed before trust
    pub min_samples: usize,
    /// Largest dispersion that still allows trust, seconds
    pub max_dispersion: f64,
    /// Largest delay accepted as a sample, seconds
    pub max_delay: f64,
    /// Consecutive missed cycles that withdraw trust
    pub failure_threshold: u32,
}

impl From<&ClockConfig> for AssociationConfig {
    fn from(config: &ClockConfig) -> Self {
        AssociationConfig {
            min_poll: config.min_poll,
            max_poll: config.max_poll,
            min_samples: config.min_samples,
            max_dispersion: config.max_dispersion,
            max_delay: config.max_delay,
            failure_threshold: config.failure_threshold,
        }
    }
}

impl Default for AssociationConfig {
    fn default() -> Self {
        AssociationConfig::from(&ClockConfig::default())
    }
}

/// Snapshot an association publishes after each round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationReport {
    /// Configured server this association came from
    pub server: ServerId,
    /// Address being queried
    pub addr: SocketAddr,
    /// Lifecycle state
    pub state: AssociationState,
    /// Best offset, seconds
    pub offset: f64,
    /// Dispersion of the best offset, seconds
    pub dispersion: f64,
    /// Delay of the best sample, seconds
    pub delay: f64,
    /// Samples held
    pub samples: usize,
    /// Current poll exponent
    pub poll: Poll,
    /// Whether the offset is reliable
    pub trusted: bool,
    /// Missed cycles in a row
    pub consecutive_failures: u32,
}

/// Result of an accepted reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundUpdate {
    /// The sample the reply produced
    pub sample: Sample,
    /// Trust after the round
    pub trusted: bool,
    /// Whether the round flipped trust
    pub trust_changed: bool,
    /// Whether the best dispersion improved materially
    pub dispersion_improved: bool,
}

impl RoundUpdate {
    /// Whether the combined offset should be recomputed
    pub fn is_significant(&self) -> bool {
        self.trust_changed || self.dispersion_improved
    }
}

/// Client association with one server address.
///
/// The association performs no I/O of its own: the scheduler decides when
/// to call [`Association::send_query`] and hands it every datagram that
/// arrives from the server's address.
#[derive(Debug)]
pub struct Association {
    server: ServerId,
    addr: SocketAddr,
    config: AssociationConfig,
    state: AssociationState,
    poll: Poll,
    samples: SampleRing,
    /// T1 of the query awaiting a reply
    outstanding: Option<Timestamp>,
    trusted: bool,
    offset: f64,
    dispersion: f64,
    delay: f64,
    consecutive_failures: u32,
    leap: LeapIndicator,
    stratum: u8,
}

impl Association {
    /// Creates an idle association
    pub fn new(server: ServerId, addr: SocketAddr, config: AssociationConfig) -> Self {
        let poll = config.min_poll;
        Association {
            server,
            addr,
            config,
            state: AssociationState::Idle,
            poll,
            samples: SampleRing::new(),
            outstanding: None,
            trusted: false,
            offset: 0.0,
            dispersion: MAX_DISPERSION,
            delay: 0.0,
            consecutive_failures: 0,
            leap: LeapIndicator::Unsynchronized,
            stratum: 0,
        }
    }

    /// Starts or resumes querying. A fresh start clears all history; a
    /// snoozed association keeps it.
    pub fn enable(&mut self) -> Result<()> {
        let (state, activation) = self.state.activate()?;
        self.state = state;

        match activation {
            Activation::Fresh => {
                self.reset();
                debug!(server = %self.server, addr = %self.addr, "association enabled");
            }
            Activation::Resume => {
                self.outstanding = None;
                debug!(server = %self.server, addr = %self.addr, "association resumed");
            }
            Activation::Unchanged => {}
        }
        Ok(())
    }

    /// Pauses querying, keeping history
    pub fn snooze(&mut self) {
        self.state = self.state.snooze();
        self.outstanding = None;
    }

    /// Stops for good; the association no longer counts as trusted
    pub fn finish(&mut self) {
        if !self.state.is_terminal() {
            debug!(server = %self.server, addr = %self.addr, "association finished");
        }
        self.state = AssociationState::Stopped;
        self.outstanding = None;
        self.trusted = false;
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.outstanding = None;
        self.trusted = false;
        self.offset = 0.0;
        self.dispersion = MAX_DISPERSION;
        self.delay = 0.0;
        self.consecutive_failures = 0;
        self.poll = self.config.min_poll;
        self.leap = LeapIndicator::Unsynchronized;
        self.stratum = 0;
    }

    /// Sends one request stamped with the current device time.
    ///
    /// A previous query still unanswered counts as a missed cycle, as does a
    /// failed send. Returns the T1 the reply must echo.
    pub fn send_query<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<Timestamp> {
        if !self.state.is_active() {
            return Err(Error::invalid_state(format!(
                "cannot query while {}",
                self.state
            )));
        }

        if self.outstanding.take().is_some() {
            self.register_failure("no reply to previous query");
        }

        let t1 = Timestamp::now().with_low_bits(rand::random::<u32>(), NONCE_MASK);
        let mut buf = BytesMut::with_capacity(PACKET_SIZE);
        Packet::client_request(self.poll, t1).write_to(&mut buf);

        match transport.send_datagram(&buf, self.addr) {
            Ok(()) => {
                self.outstanding = Some(t1);
                Ok(t1)
            }
            Err(e) => {
                self.register_failure("send failed");
                Err(e)
            }
        }
    }

    /// Processes a datagram from the server, `recv_time` being T4.
    ///
    /// Malformed and stale replies are rejected without touching any state.
    /// Anomalous timestamps consume the outstanding query, add no sample and
    /// count as a missed cycle.
    pub fn on_reply(&mut self, payload: &[u8], recv_time: Timestamp) -> Result<RoundUpdate> {
        let packet = Packet::parse(payload)?;

        if packet.mode != Mode::Server {
            return Err(Error::malformed(format!("unexpected mode {:?}", packet.mode)));
        }
        if !ACCEPTED_VERSIONS.contains(&packet.version) {
            return Err(Error::malformed(format!("unsupported version {}", packet.version)));
        }

        let t1 = match self.outstanding {
            Some(t1) if t1 == packet.originate => t1,
            Some(t1) => {
                return Err(Error::stale(format!(
                    "originate {} does not match last query {}",
                    packet.originate, t1
                )))
            }
            None => return Err(Error::stale("no query outstanding")),
        };

        if let Some(code) = packet.kiss_code() {
            self.outstanding = None;
            return Err(self.handle_kiss(code));
        }
        if packet.receive.is_zero() || packet.transmit.is_zero() {
            return Err(Error::malformed("server timestamps missing"));
        }
        self.outstanding = None;

        let (offset, delay) = match self.measure(t1, packet.receive, packet.transmit, recv_time) {
            Ok(measured) => measured,
            Err(e) => {
                self.register_failure("anomalous reply");
                return Err(e);
            }
        };

        let sample = Sample {
            offset,
            delay,
            dispersion: packet.root_dispersion_secs()
                + delay / 2.0
                + packet.precision_secs()
                + LOCAL_PRECISION,
            computed_at: recv_time.to_system_time(),
        };
        self.samples.push(sample);
        self.leap = packet.leap;
        self.stratum = packet.stratum;
        self.consecutive_failures = 0;

        let was_trusted = self.trusted;
        let previous_dispersion = self.dispersion;
        self.select_best();
        self.trusted = self.evaluate_trust();
        self.adjust_poll();

        let update = RoundUpdate {
            sample,
            trusted: self.trusted,
            trust_changed: was_trusted != self.trusted,
            dispersion_improved: self.dispersion < previous_dispersion * IMPROVEMENT_RATIO,
        };

        debug!(
            server = %self.server,
            addr = %self.addr,
            offset = sample.offset,
            delay = sample.delay,
            dispersion = sample.dispersion,
            trusted = self.trusted,
            poll = self.poll.exponent(),
            "sample accepted"
        );
        if update.trust_changed {
            info!(server = %self.server, addr = %self.addr, trusted = self.trusted, "trust changed");
        }

        Ok(update)
    }

    /// Offset and delay of a round, rejecting stamps no real exchange produces
    fn measure(&self, t1: Timestamp, t2: Timestamp, t3: Timestamp, t4: Timestamp) -> Result<(f64, f64)> {
        if elapsed_seconds(t2, t3) < 0.0 {
            return Err(Error::anomaly("server sent before it received"));
        }
        let (offset, delay) = offset_and_delay(t1, t2, t3, t4);
        if !offset.is_finite() || !delay.is_finite() {
            return Err(Error::anomaly("non-finite offset or delay"));
        }
        if delay < 0.0 {
            return Err(Error::anomaly(format!("negative delay {:.6}s", delay)));
        }
        if delay > self.config.max_delay {
            return Err(Error::anomaly(format!("delay {:.3}s exceeds limit", delay)));
        }
        Ok((offset, delay))
    }

    fn handle_kiss(&mut self, code: String) -> Error {
        match code.as_str() {
            "RATE" => {
                self.poll = self.poll.increase(self.config.max_poll);
                warn!(server = %self.server, addr = %self.addr, poll = self.poll.exponent(), "server asked to slow down");
            }
            "DENY" | "RSTR" => {
                warn!(server = %self.server, addr = %self.addr, %code, "server refused service");
                self.finish();
            }
            _ => debug!(server = %self.server, addr = %self.addr, %code, "kiss code ignored"),
        }
        Error::kiss_of_death(code)
    }

    fn register_failure(&mut self, reason: &str) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        debug!(
            server = %self.server,
            addr = %self.addr,
            failures = self.consecutive_failures,
            reason,
            "missed cycle"
        );

        if self.trusted && self.consecutive_failures >= self.config.failure_threshold {
            self.trusted = false;
            warn!(server = %self.server, addr = %self.addr, "server unreachable, trust withdrawn");
        }
    }

    fn select_best(&mut self) {
        if let Some(best) = self.samples.best() {
            self.offset = best.offset;
            self.dispersion = best.dispersion;
            self.delay = best.delay;
        }
    }

    fn evaluate_trust(&self) -> bool {
        self.samples.len() >= self.config.min_samples
            && self.dispersion <= self.config.max_dispersion
            && self.leap != LeapIndicator::Unsynchronized
            && (1..=MAX_STRATUM).contains(&self.stratum)
    }

    fn adjust_poll(&mut self) {
        let converging = self.samples.len() < self.config.min_samples
            || self.dispersion > self.config.max_dispersion;

        let poll = if converging {
            self.poll.decrease(self.config.min_poll)
        } else if self.trusted {
            self.poll.increase(self.config.max_poll)
        } else {
            self.poll
        };
        self.poll = poll.clamp_to(self.config.min_poll, self.config.max_poll);
    }

    /// Configured server
    pub fn server(&self) -> &ServerId {
        &self.server
    }

    /// Address queried
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Lifecycle state
    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Current poll exponent
    pub fn poll(&self) -> Poll {
        self.poll
    }

    /// Time until the next query
    pub fn poll_interval(&self) -> Duration {
        self.poll.interval()
    }

    /// Whether the current offset is reliable
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Best offset, seconds
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Dispersion of the best offset, seconds
    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }

    /// Sample history
    pub fn samples(&self) -> &SampleRing {
        &self.samples
    }

    /// Missed cycles in a row
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a query is awaiting its reply
    pub fn has_outstanding_query(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Snapshot for the aggregator
    pub fn report(&self) -> AssociationReport {
        AssociationReport {
            server: self.server.clone(),
            addr: self.addr,
            state: self.state,
            offset: self.offset,
            dispersion: self.dispersion,
            delay: self.delay,
            samples: self.samples.len(),
            poll: self.poll,
            trusted: self.trusted,
            consecutive_failures: self.consecutive_failures,
        }
    }
}
