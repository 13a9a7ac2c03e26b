use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Serialize, Deserialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::{DelayQueue, Key};
use tracing::{debug, info, trace, warn};

use crate::core::Error;
use crate::network::{Datagram, Transport};
use crate::protocol::AssociationState;
use super::aggregator::Aggregator;
use super::association::{Association, AssociationReport};
use super::filter::Sample;

/// Per-round notification from the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssociationEvent {
    /// A reply produced a sample
    Sampled {
        report: AssociationReport,
        sample: Sample,
    },
    /// A cycle ended without a usable reply
    Missed {
        report: AssociationReport,
        reason: String,
    },
    /// The association stopped for good
    Finished { report: AssociationReport },
}

impl AssociationEvent {
    /// Report carried by the event
    pub fn report(&self) -> &AssociationReport {
        match self {
            AssociationEvent::Sampled { report, .. }
            | AssociationEvent::Missed { report, .. }
            | AssociationEvent::Finished { report } => report,
        }
    }
}

/// Owner requests delivered to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Snooze,
    Resume,
}

/// Single task driving every association.
///
/// Each active association holds one entry in the delay queue; when it
/// fires a query goes out and the next cycle is armed at the current poll
/// interval. Replies re-arm the timer with the adapted interval.
pub(crate) struct Scheduler {
    associations: Vec<Association>,
    by_addr: HashMap<SocketAddr, usize>,
    timers: DelayQueue<usize>,
    keys: Vec<Option<Key>>,
    transport: Arc<dyn Transport>,
    inbound: mpsc::Receiver<Datagram>,
    commands: mpsc::Receiver<Command>,
    aggregator: Arc<Aggregator>,
    events: broadcast::Sender<AssociationEvent>,
    cancel: CancellationToken,
    recompute_interval: Duration,
    last_recompute: Option<Instant>,
    recompute_due: Option<Instant>,
}

impl Scheduler {
    pub(crate) fn new(
        associations: Vec<Association>,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Datagram>,
        commands: mpsc::Receiver<Command>,
        aggregator: Arc<Aggregator>,
        events: broadcast::Sender<AssociationEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let by_addr = associations
            .iter()
            .enumerate()
            .map(|(index, assoc)| (assoc.addr(), index))
            .collect();
        let keys = associations.iter().map(|_| None).collect();

        Scheduler {
            associations,
            by_addr,
            timers: DelayQueue::new(),
            keys,
            transport,
            inbound,
            commands,
            aggregator,
            events,
            cancel,
            recompute_interval: Duration::from_secs(1),
            last_recompute: None,
            recompute_due: None,
        }
    }

    /// Sets the minimum spacing between offset recomputations
    pub(crate) fn with_recompute_interval(mut self, interval: Duration) -> Self {
        self.recompute_interval = interval;
        self
    }

    /// Runs until cancelled or until the owner goes away, then finishes
    /// every association.
    pub(crate) async fn run(mut self) {
        info!(associations = self.associations.len(), "scheduler started");
        for index in 0..self.associations.len() {
            self.enable(index);
        }

        loop {
            let recompute_due = self.recompute_due;

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    self.poll_association(expired.into_inner());
                }

                Some(datagram) = self.inbound.recv() => self.handle_datagram(datagram),

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("clock handle dropped");
                        break;
                    }
                },

                _ = sleep_until(recompute_due.unwrap_or_else(Instant::now)), if recompute_due.is_some() => {
                    self.recompute();
                }
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "command received");
        match command {
            Command::Snooze => {
                for index in 0..self.associations.len() {
                    self.associations[index].snooze();
                    self.unschedule(index);
                    self.aggregator.record(self.associations[index].report());
                }
            }
            Command::Resume => {
                // active associations keep their timers
                for index in 0..self.associations.len() {
                    if self.associations[index].state() == AssociationState::Snoozed {
                        self.enable(index);
                    }
                }
            }
        }
    }

    fn enable(&mut self, index: usize) {
        let assoc = &mut self.associations[index];
        if let Err(e) = assoc.enable() {
            debug!(addr = %assoc.addr(), error = %e, "association not enabled");
            return;
        }
        self.aggregator.record(assoc.report());
        self.schedule(index, Duration::ZERO);
    }

    fn poll_association(&mut self, index: usize) {
        self.keys[index] = None;

        let assoc = &mut self.associations[index];
        if !assoc.state().is_active() {
            return;
        }

        let was_trusted = assoc.is_trusted();
        let unanswered = assoc.has_outstanding_query();
        let missed = match assoc.send_query(self.transport.as_ref()) {
            Ok(t1) => {
                trace!(addr = %assoc.addr(), %t1, "query sent");
                unanswered.then(|| "no reply to previous query".to_string())
            }
            Err(e) => {
                warn!(addr = %assoc.addr(), error = %e, "query failed");
                Some(e.to_string())
            }
        };

        let trust_lost = was_trusted && !assoc.is_trusted();
        let interval = assoc.poll_interval();
        let report = assoc.report();

        if let Some(reason) = missed {
            self.aggregator.record(report.clone());
            self.emit(AssociationEvent::Missed { report, reason });
        }
        if trust_lost {
            self.request_recompute();
        }
        self.schedule(index, interval);
    }

    fn handle_datagram(&mut self, datagram: Datagram) {
        let Some(&index) = self.by_addr.get(&datagram.source) else {
            trace!(source = %datagram.source, "datagram from unknown source");
            return;
        };

        let assoc = &mut self.associations[index];
        let was_trusted = assoc.is_trusted();
        match assoc.on_reply(&datagram.payload, datagram.received_at) {
            Ok(update) => {
                let interval = assoc.poll_interval();
                let report = assoc.report();
                self.aggregator.record(report.clone());
                self.schedule(index, interval);
                self.emit(AssociationEvent::Sampled {
                    report,
                    sample: update.sample,
                });
                if update.is_significant() {
                    self.request_recompute();
                }
            }
            Err(e) if e.is_discarded_reply() => {
                debug!(source = %datagram.source, error = %e, "reply discarded");
            }
            Err(e) => {
                warn!(source = %datagram.source, error = %e, "reply rejected");
                let report = assoc.report();
                let finished = report.state.is_terminal();
                let trust_lost = was_trusted && !report.trusted;
                let interval = assoc.poll_interval();
                self.aggregator.record(report.clone());

                if finished {
                    self.unschedule(index);
                    self.emit(AssociationEvent::Finished { report });
                    self.request_recompute();
                } else {
                    if matches!(e, Error::KissOfDeath(_)) {
                        self.schedule(index, interval);
                    }
                    self.emit(AssociationEvent::Missed {
                        report,
                        reason: e.to_string(),
                    });
                    if trust_lost {
                        self.request_recompute();
                    }
                }
            }
        }
    }

    fn schedule(&mut self, index: usize, delay: Duration) {
        match &self.keys[index] {
            Some(key) => self.timers.reset(key, delay),
            None => self.keys[index] = Some(self.timers.insert(index, delay)),
        }
    }

    fn unschedule(&mut self, index: usize) {
        if let Some(key) = self.keys[index].take() {
            self.timers.remove(&key);
        }
    }

    /// Recomputes now, or defers to the end of the throttle window
    fn request_recompute(&mut self) {
        if let Some(last) = self.last_recompute {
            let ready_at = last + self.recompute_interval;
            if Instant::now() < ready_at {
                self.recompute_due = Some(ready_at);
                return;
            }
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        self.last_recompute = Some(Instant::now());
        self.recompute_due = None;
        let offset = self.aggregator.current_offset();
        trace!(offset, "offset recomputed");
    }

    fn emit(&self, event: AssociationEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn shutdown(&mut self) {
        self.timers.clear();
        self.keys.iter_mut().for_each(|key| *key = None);

        for assoc in &mut self.associations {
            let was_running = !assoc.state().is_terminal();
            assoc.finish();
            let report = assoc.report();
            self.aggregator.record(report.clone());
            if was_running {
                let _ = self.events.send(AssociationEvent::Finished { report });
            }
        }
        info!("scheduler stopped");
    }
}
