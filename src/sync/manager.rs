use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{ClockConfig, Error, Result, ServerId};
use crate::network::{Datagram, ServerResolver, Transport, UdpTransport};
use super::aggregator::{Aggregator, PublishedOffset};
use super::association::{Association, AssociationConfig, AssociationReport};
use super::scheduler::{AssociationEvent, Command, Scheduler};

const COMMAND_CAPACITY: usize = 8;

struct Running {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum Lifecycle {
    Created,
    Running(Running),
    Stopped,
}

/// Network clock: real time as agreed by a set of time servers.
///
/// The clock is owned by whoever creates it; there is no global instance.
/// Readers that live on other threads can share the read side through
/// [`NetworkClock::aggregator`].
///
/// # Examples
///
/// ```no_run
/// use netclock::{ClockConfig, NetworkClock};
///
/// # async fn run() -> netclock::Result<()> {
/// let mut clock = NetworkClock::new(ClockConfig::with_servers(["time.nist.gov"])?);
/// clock.start().await?;
/// println!("network time: {:?}", clock.network_time());
/// clock.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct NetworkClock {
    config: ClockConfig,
    aggregator: Arc<Aggregator>,
    events: broadcast::Sender<AssociationEvent>,
    lifecycle: Lifecycle,
}

impl NetworkClock {
    /// Creates a stopped clock; no I/O happens until [`NetworkClock::start`]
    pub fn new(config: ClockConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        NetworkClock {
            config,
            aggregator: Arc::new(Aggregator::new()),
            events,
            lifecycle: Lifecycle::Created,
        }
    }

    /// Resolves the configured servers, binds the UDP transport and starts
    /// querying. Each host name becomes one association per distinct
    /// address.
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_startable()?;
        self.config.validate()?;

        let servers = ServerResolver::new().resolve_all(&self.config.servers).await;
        if servers.is_empty() {
            return Err(Error::network("none of the configured servers could be resolved"));
        }

        let (transport, inbound) = UdpTransport::bind(
            &self.config.bind_addrs,
            self.config.channel_capacity,
            CancellationToken::new(),
        )
        .await?;
        debug!(local = ?transport.local_addrs(), "transport ready");

        self.start_with(Arc::new(transport), inbound, servers)
    }

    /// Starts querying `servers` over a caller-supplied transport, with
    /// replies delivered on `inbound`. Must run inside a tokio runtime.
    pub fn start_with(
        &mut self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<Datagram>,
        servers: Vec<(ServerId, SocketAddr)>,
    ) -> Result<()> {
        self.ensure_startable()?;
        self.config.validate()?;
        if servers.is_empty() {
            return Err(Error::config("no server addresses to query"));
        }

        let assoc_config = AssociationConfig::from(&self.config);
        let associations: Vec<Association> = servers
            .into_iter()
            .map(|(server, addr)| Association::new(server, addr, assoc_config.clone()))
            .collect();
        info!(associations = associations.len(), "starting network clock");

        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            associations,
            transport,
            inbound,
            commands_rx,
            Arc::clone(&self.aggregator),
            self.events.clone(),
            cancel.clone(),
        )
        .with_recompute_interval(self.config.recompute_interval);

        self.lifecycle = Lifecycle::Running(Running {
            commands,
            cancel,
            handle: tokio::spawn(scheduler.run()),
        });
        Ok(())
    }

    fn ensure_startable(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Created => Ok(()),
            Lifecycle::Running(_) => Err(Error::invalid_state("clock already started")),
            Lifecycle::Stopped => Err(Error::invalid_state("clock has been stopped")),
        }
    }

    /// Finishes every association and waits for the scheduler to exit; no
    /// query goes out after this returns.
    pub async fn stop(&mut self) -> Result<()> {
        let lifecycle = std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped);
        if let Lifecycle::Running(running) = lifecycle {
            running.cancel.cancel();
            running
                .handle
                .await
                .map_err(|e| Error::invalid_state(format!("scheduler task failed: {}", e)))?;
            info!("network clock stopped");
        }
        Ok(())
    }

    /// Pauses every association, keeping its history
    pub async fn snooze(&self) -> Result<()> {
        self.send(Command::Snooze).await
    }

    /// Resumes every snoozed association
    pub async fn resume(&self) -> Result<()> {
        self.send(Command::Resume).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        match &self.lifecycle {
            Lifecycle::Running(running) => running
                .commands
                .send(command)
                .await
                .map_err(|_| Error::invalid_state("scheduler is not running")),
            _ => Err(Error::invalid_state("clock is not running")),
        }
    }

    /// Whether the scheduler is running
    pub fn is_running(&self) -> bool {
        matches!(&self.lifecycle, Lifecycle::Running(r) if !r.handle.is_finished())
    }

    /// Device time corrected by the current offset
    pub fn network_time(&self) -> SystemTime {
        self.aggregator.network_time()
    }

    /// Network time minus device time, seconds
    pub fn current_offset(&self) -> f64 {
        self.aggregator.current_offset()
    }

    /// Whether at least one server is currently trusted
    pub fn is_trusted(&self) -> bool {
        self.aggregator.is_trusted()
    }

    /// Latest report of every association
    pub fn reports(&self) -> Vec<AssociationReport> {
        self.aggregator.reports()
    }

    /// Receiver notified whenever a new offset is published
    pub fn subscribe(&self) -> watch::Receiver<PublishedOffset> {
        self.aggregator.subscribe()
    }

    /// Receiver of per-round association events
    pub fn events(&self) -> broadcast::Receiver<AssociationEvent> {
        self.events.subscribe()
    }

    /// Shared read side, usable from any thread
    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Configuration in use
    pub fn config(&self) -> &ClockConfig {
        &self.config
    }
}

impl Drop for NetworkClock {
    fn drop(&mut self) {
        if let Lifecycle::Running(running) = &self.lifecycle {
            running.cancel.cancel();
        }
    }
}
