use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::address::{Address, UniqueAddress};
use crate::association::registry::AssociationRegistry;
use crate::association::Association;
use crate::config::{TransportConfig, DRIVER_ERROR_POLL_DELAY, DRIVER_ERROR_POLL_INTERVAL};
use crate::control::ControlMessage;
use crate::driver::{
    DriverError, MediaDriver, CONTROL_STREAM_ID, LARGE_STREAM_ID, ORDINARY_STREAM_ID,
};
use crate::error::{Error, Result};
use crate::event::TransportEvent;
use crate::inbound::{
    CompressionObserver, ControlJunction, InboundContext, InboundDispatcher, InboundPipeline,
    QuarantineObserver,
};
use crate::outbound::OutboundSetup;
use crate::pool::{
    EnvelopeBufferPool, ObjectPool, MAX_FRAME_SIZE, MAX_LARGE_FRAME_SIZE, MAX_POOLED_BUFFERS,
};
use crate::udp::UdpDriver;
use crate::wildcard::WildcardMatcher;

/// Events buffered per subscriber before older ones are overwritten.
const EVENT_CHANNEL_SIZE: usize = 64;

/// The remoting transport: media driver, three supervised inbound pipelines
/// and the association registry with its outbound lanes.
///
/// `shutdown` is idempotent and pulls one shared kill-switch; every attached
/// pipeline completes cleanly within a scheduling quantum and no restart is
/// attempted afterwards.
pub struct Transport {
    name: String,
    config: Arc<TransportConfig>,
    driver: Arc<dyn MediaDriver>,
    local: UniqueAddress,
    registry: Arc<AssociationRegistry>,
    junction: Arc<ControlJunction>,
    setup: Arc<OutboundSetup>,
    events: broadcast::Sender<TransportEvent>,
    kill: broadcast::Sender<()>,
    shutdown: Arc<AtomicBool>,
}

impl Transport {
    /// Starts the transport on the embedded UDP media driver.
    pub async fn start(
        config: TransportConfig,
        dispatcher: Arc<dyn InboundDispatcher>,
    ) -> Result<Arc<Self>> {
        config.check()?;
        if !config.embedded_media_driver {
            return Err(Error::ErrConfigNoMediaDriver);
        }
        let driver =
            UdpDriver::bind(&config.system_name, &config.hostname, config.port).await?;
        Transport::start_with_driver(config, driver, dispatcher).await
    }

    /// Starts the transport on an externally managed media driver.
    pub async fn start_with_driver(
        config: TransportConfig,
        driver: Arc<dyn MediaDriver>,
        dispatcher: Arc<dyn InboundDispatcher>,
    ) -> Result<Arc<Self>> {
        config.check()?;
        let config = Arc::new(config);
        let name = config.system_name.clone();

        let local = UniqueAddress::new(
            Address::new(&config.system_name, &config.hostname, driver.local_port()),
            mint_uid(),
        );
        log::debug!("[{}] starting transport at {}", name, local);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (kill, _) = broadcast::channel(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let junction = ControlJunction::new();
        let large_matcher = Arc::new(WildcardMatcher::new(&config.large_message_destinations));

        let setup = Arc::new(OutboundSetup {
            config: Arc::clone(&config),
            driver: Arc::clone(&driver),
            local: local.clone(),
            events: events.clone(),
            kill: kill.clone(),
            shutdown: Arc::clone(&shutdown),
            large_matcher,
            junction: Arc::clone(&junction),
            envelope_pool: Arc::new(ObjectPool::new(config.outbound_envelope_pool_capacity)),
            frame_pool: Arc::new(EnvelopeBufferPool::new(MAX_FRAME_SIZE, MAX_POOLED_BUFFERS)),
            large_frame_pool: Arc::new(EnvelopeBufferPool::new(
                MAX_LARGE_FRAME_SIZE,
                MAX_POOLED_BUFFERS,
            )),
        });
        let registry = Arc::new(AssociationRegistry::new(Arc::clone(&setup)));

        let ctx: Arc<dyn InboundContext> = Arc::new(TransportContext {
            registry: Arc::clone(&registry),
            setup: Arc::clone(&setup),
        });

        // built-in control observers, notified in registration order
        junction.attach(Arc::new(QuarantineObserver {
            ctx: Arc::clone(&ctx),
        }));
        junction.attach(Arc::new(CompressionObserver {
            ctx: Arc::clone(&ctx),
        }));

        // the large pipeline only exists when a destination is configured
        let mut stream_ids = vec![CONTROL_STREAM_ID, ORDINARY_STREAM_ID];
        if !config.large_message_destinations.is_empty() {
            stream_ids.push(LARGE_STREAM_ID);
        }
        for stream_id in stream_ids {
            let pipeline = InboundPipeline {
                name: name.clone(),
                stream_id,
                ctx: Arc::clone(&ctx),
                dispatcher: Arc::clone(&dispatcher),
                junction: Arc::clone(&junction),
                driver: Arc::clone(&driver),
                kill: kill.clone(),
                shutdown: Arc::clone(&shutdown),
                events: events.clone(),
                config: Arc::clone(&config),
            };
            tokio::spawn(pipeline.supervise());
        }

        {
            let name = name.clone();
            let driver = Arc::clone(&driver);
            let kill_rx = kill.subscribe();
            let driver_timeout = config.driver_timeout;
            tokio::spawn(async move {
                error_log_loop(name, driver, kill_rx, driver_timeout).await;
            });
        }

        Ok(Arc::new(Transport {
            name,
            config,
            driver,
            local,
            registry,
            junction,
            setup,
            events,
            kill,
            shutdown,
        }))
    }

    pub fn local_address(&self) -> &UniqueAddress {
        &self.local
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The registry owning every association of this transport.
    pub fn registry(&self) -> &Arc<AssociationRegistry> {
        &self.registry
    }

    pub fn association(&self, remote: &Address) -> Result<Arc<Association>> {
        self.registry.association(remote)
    }

    /// The inbound control-message fan-out point.
    pub fn control_subject(&self) -> Arc<ControlJunction> {
        Arc::clone(&self.junction)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sends a user message; the recipient path picks the ordinary or large
    /// pipeline.
    pub async fn send(
        &self,
        recipient_address: &Address,
        recipient: &str,
        sender: Option<&str>,
        message: Bytes,
        manifest: &str,
        serializer_id: i32,
    ) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::ErrTransportShutdown);
        }
        let association = self.registry.association(recipient_address)?;
        let mut envelope = self.setup.envelope_pool.acquire();
        envelope.sender = sender.map(str::to_owned);
        envelope.recipient = Some(recipient.to_owned());
        envelope.recipient_address = Some(recipient_address.clone());
        envelope.message = message;
        envelope.manifest = manifest.to_owned();
        envelope.serializer_id = serializer_id;
        association.send(envelope).await
    }

    /// Sends a system message with reliable, ordered delivery.
    pub async fn send_system(&self, recipient_address: &Address, message: Bytes) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::ErrTransportShutdown);
        }
        let association = self.registry.association(recipient_address)?;
        association.send_system(message).await
    }

    /// Enqueues a protocol message on the peer's control lane.
    pub fn send_control(&self, to: &Address, message: Box<dyn ControlMessage>) -> Result<()> {
        let association = self.registry.association(to)?;
        association.send_control(message);
        Ok(())
    }

    /// Bans the given UID of `remote` (or its current incarnation when
    /// `uid` is unspecified).
    pub fn quarantine(&self, remote: &Address, uid: Option<u64>, reason: &str) -> Result<()> {
        let association = self.registry.association(remote)?;
        association.quarantine(reason, uid);
        Ok(())
    }

    /// Idempotent: pulls the shared kill-switch and closes the driver.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::debug!("[{}] shutting down transport at {}", self.name, self.local);
        let _ = self.kill.send(());
        // let attached pipelines observe the pull before the driver goes away
        tokio::task::yield_now().await;
        self.driver.close().await?;
        log::debug!("[{}] transport shut down", self.name);
        Ok(())
    }
}

/// Mints the process-incarnation UID. Zero is reserved for "unset".
fn mint_uid() -> u64 {
    loop {
        let uid: u64 = rand::random();
        if uid != 0 {
            return uid;
        }
    }
}

/// [`InboundContext`] backed by the registry; handed to inbound stages and
/// built-in observers.
struct TransportContext {
    registry: Arc<AssociationRegistry>,
    setup: Arc<OutboundSetup>,
}

impl InboundContext for TransportContext {
    fn local_address(&self) -> &UniqueAddress {
        &self.setup.local
    }

    fn send_control(&self, to: &Address, message: Box<dyn ControlMessage>) {
        match self.registry.association(to) {
            Ok(association) => association.send_control(message),
            Err(err) => {
                log::warn!(
                    "[{}] cannot send control message to {}: {}",
                    self.setup.local.address.system,
                    to,
                    err
                );
            }
        }
    }

    fn association(&self, remote: &Address) -> Result<Arc<Association>> {
        self.registry.association(remote)
    }

    fn association_by_uid(&self, uid: u64) -> Option<Arc<Association>> {
        self.registry.association_by_uid(uid)
    }

    fn complete_handshake(&self, peer: UniqueAddress) -> Result<Arc<Association>> {
        self.registry.set_uid(peer)
    }

    fn publish_event(&self, event: TransportEvent) {
        self.setup.publish(event);
    }
}

/// Periodically drains the driver error log. Conductor timeouts are logged
/// at error level without terminating; one persisting beyond
/// `driver_timeout` escalates to an unresponsive-driver report.
async fn error_log_loop(
    name: String,
    driver: Arc<dyn MediaDriver>,
    mut kill_rx: broadcast::Receiver<()>,
    driver_timeout: Duration,
) {
    tokio::select! {
        _ = kill_rx.recv() => return,
        _ = tokio::time::sleep(DRIVER_ERROR_POLL_DELAY) => {}
    }

    let mut interval = tokio::time::interval(DRIVER_ERROR_POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut conductor_timeout_since: Option<Instant> = None;
    loop {
        let errors = driver.poll_errors();
        let mut saw_conductor_timeout = false;
        for error in errors {
            match &error {
                DriverError::ConductorServiceTimeout(_) => {
                    saw_conductor_timeout = true;
                    log::error!("[{}] media driver error: {}", name, error);
                }
                DriverError::Other(_) => {
                    log::error!("[{}] media driver error: {}", name, error);
                }
            }
        }
        if saw_conductor_timeout {
            let since = conductor_timeout_since.get_or_insert_with(Instant::now);
            if since.elapsed() > driver_timeout {
                log::error!(
                    "[{}] media driver unresponsive for more than {:?}",
                    name,
                    driver_timeout
                );
            }
        } else {
            conductor_timeout_since = None;
        }

        tokio::select! {
            _ = kill_rx.recv() => return,
            _ = interval.tick() => {}
        }
    }
}
