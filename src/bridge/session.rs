//! Bridge session with statum state machine
//!
//! One session exists per started bridge. It runs as a single actor task that
//! owns the subscription registry and the teardown list and is the only writer
//! of the connection state and status channels.
//!
//! # State Machine
//!
//! ```text
//! Starting ──arm──► Running ──run──► Stopping ──teardown──► Stopped
//! ```
//!
//! # Event flow
//!
//! ```text
//! broker watcher ──BrokerEvent────┐
//! sweep ticker ───SessionCommand──┼──► actor ──► PublishGate ──► broker
//! SessionHandle ──SessionCommand──┘      │
//!                                        └──► DebouncedPublisher (per binding)
//! ```

use chrono::{DateTime, Local};
use rumqttc::QoS;
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::binding::DisplayNode;
use super::debounce::DebouncedPublisher;
use super::error::BridgeError;
use super::gate::PublishGate;
use super::registry::SubscriptionRegistry;
use super::topic::{self, InboundTopic};
use crate::config::BridgeConfig;
use crate::mqtt::{
    BrokerClient, BrokerConnection, BrokerConnector, BrokerEvent, ConnectionState,
    InboundMessage, OutboundMessage,
};
use crate::telemetry::TelemetryBus;

/// How often expired subscriptions are removed
pub const SWEEP_PERIOD: Duration = Duration::from_millis(1000);
const COMMAND_CAPACITY: usize = 32;

/// Everything a session needs from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub system_id: String,
    pub nodes: Vec<DisplayNode>,
    pub keepalive_ttl: Duration,
}

impl SessionSettings {
    /// Fails when no system id can be resolved; no session may exist without one
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let system_id = config
            .vessel
            .system_id()
            .ok_or(BridgeError::MissingSystemId)?;

        Ok(Self {
            system_id,
            nodes: config.nodes.iter().map(DisplayNode::from).collect(),
            keepalive_ttl: Duration::from_secs(config.broker.keepalive_ttl),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusLevel {
    Ok,
    Error,
}

/// Operator visible status of a session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub level: StatusLevel,
    pub message: String,
    pub since: DateTime<Local>,
    pub messages_received: usize,
    pub messages_ignored: usize,
}

impl SessionStatus {
    fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            since: Local::now(),
            messages_received: 0,
            messages_ignored: 0,
        }
    }
}

/// Requests handled by the session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// Periodic tick that expires stale subscriptions
    Sweep,
    /// Registers or renews a subscription for the keepalive TTL
    RenewSubscription { topic: String },
    ActiveSubscriptions {
        response_tx: oneshot::Sender<Vec<String>>,
    },
}

type TeardownAction = Box<dyn FnOnce() + Send>;

/// Callbacks to run when the session stops, in registration order
#[derive(Default)]
pub struct TeardownActions {
    actions: Vec<(String, TeardownAction)>,
}

impl TeardownActions {
    pub fn push(&mut self, name: impl Into<String>, action: impl FnOnce() + Send + 'static) {
        self.actions.push((name.into(), Box::new(action)));
    }

    /// Runs and clears every action, returns how many ran
    pub fn run_all(&mut self) -> usize {
        let actions = std::mem::take(&mut self.actions);
        let count = actions.len();
        for (name, action) in actions {
            debug!("Running teardown action: {}", name);
            action();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// States for the session lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Starting, // Broker connection opened, nothing scheduled yet
    Running,  // Handling events
    Stopping, // Event loop left, teardown pending
    Stopped,  // All teardown actions ran
}

#[machine]
pub struct BridgeSession<S: SessionState> {
    settings: SessionSettings,
    bus: Arc<dyn TelemetryBus>,
    client: Arc<dyn BrokerClient>,
    connection: watch::Sender<ConnectionState>,
    status: watch::Sender<SessionStatus>,
    subscriptions: SubscriptionRegistry,
    on_stop: TeardownActions,
    publishers_attached: bool,
}

impl<S: SessionState> BridgeSession<S> {
    pub fn system_id(&self) -> &str {
        &self.settings.system_id
    }

    fn set_status(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            StatusLevel::Ok => info!("{}", message),
            StatusLevel::Error => error!("{}", message),
        }
        self.status.send_modify(|status| {
            status.level = level;
            status.message = message;
            status.since = Local::now();
        });
    }
}

impl BridgeSession<Starting> {
    /// Opens the broker connection under the client id derived from the system id
    pub fn open(
        settings: SessionSettings,
        bus: Arc<dyn TelemetryBus>,
        connector: &dyn BrokerConnector,
    ) -> Result<(Self, mpsc::Receiver<BrokerEvent>), BridgeError> {
        let client_id = topic::client_id(&settings.system_id);
        let BrokerConnection { client, events } = connector.connect(&client_id)?;

        let (connection, _) = watch::channel(ConnectionState::Connecting);
        let (status, _) = watch::channel(SessionStatus::new(StatusLevel::Ok, "Starting"));

        let session = Self::new(
            settings,
            bus,
            client,
            connection,
            status,
            SubscriptionRegistry::new(),
            TeardownActions::default(),
            false, // publishers_attached
        );
        Ok((session, events))
    }

    /// Schedules the sweep and the broker disconnect, then starts running
    pub fn arm(mut self, commands: mpsc::Sender<SessionCommand>) -> BridgeSession<Running> {
        let sweep_cancel = CancellationToken::new();
        tokio::spawn(sweep_ticker(commands, sweep_cancel.clone()));
        self.on_stop.push("sweep timer", move || sweep_cancel.cancel());

        let client = self.client.clone();
        self.on_stop.push("broker disconnect", move || {
            if let Err(e) = client.disconnect() {
                warn!("Failed to disconnect from broker: {}", e);
            }
        });

        debug!("Session armed for system {}", self.settings.system_id);
        self.transition()
    }
}

impl BridgeSession<Running> {
    /// Handles broker events and commands until `shutdown` is cancelled
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BrokerEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
        shutdown: CancellationToken,
    ) -> BridgeSession<Stopping> {
        info!("Bridge session running for system {}", self.settings.system_id);
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Broker event stream ended");
                        events_open = false;
                    }
                },
                Some(command) = commands.recv() => self.handle_command(command),
            }
        }

        info!("Transitioning to Stopping state: {}", self.settings.system_id);
        self.transition()
    }

    fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => self.on_connect(),
            BrokerEvent::Closed => {
                self.connection.send_replace(ConnectionState::Disconnected);
                self.set_status(StatusLevel::Error, "MQTT connection closed");
            }
            BrokerEvent::Error(e) => {
                self.set_status(
                    StatusLevel::Error,
                    format!("Error connecting to MQTT broker: {}", e),
                );
            }
            BrokerEvent::Message(message) => self.on_message(message),
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Sweep => {
                let expired = self.subscriptions.sweep(Instant::now());
                if !expired.is_empty() {
                    debug!("Expired {} subscriptions", expired.len());
                }
            }
            SessionCommand::RenewSubscription { topic } => {
                if let Err(e) = self.subscriptions.renew(topic, self.settings.keepalive_ttl) {
                    warn!("Could not register subscription: {}", e);
                }
            }
            SessionCommand::ActiveSubscriptions { response_tx } => {
                let mut topics = Vec::with_capacity(self.subscriptions.len());
                topics.extend(self.subscriptions.topics().map(str::to_string));
                if response_tx.send(topics).is_err() {
                    error!("Failed to send response");
                }
            }
        }
    }

    fn gate(&self) -> PublishGate {
        PublishGate::new(self.client.clone(), self.connection.subscribe())
    }

    fn on_connect(&mut self) {
        self.connection.send_replace(ConnectionState::Connected);
        self.set_status(StatusLevel::Ok, "MQTT Connected");

        let filter = topic::inbound_filter(&self.settings.system_id);
        if let Err(e) = self.client.subscribe(&filter, QoS::AtLeastOnce) {
            warn!("Failed to subscribe to {}: {}", filter, e);
        }

        self.send_pages();
        self.attach_publishers();
    }

    fn send_pages(&self) {
        let gate = self.gate();
        for node in &self.settings.nodes {
            debug!("Sending pages to node {}", node.name);
            gate.publish(OutboundMessage::retained(
                topic::command_topic(&node.name),
                topic::page_load_payload(&node.pages),
            ));
        }
    }

    /// Starts one debounced publisher per binding, once per session
    fn attach_publishers(&mut self) {
        if self.publishers_attached {
            debug!("Publishers already attached, skipping");
            return;
        }

        for node in &self.settings.nodes {
            for binding in &node.bindings {
                let gate = self.gate();
                let command_topic = topic::command_topic(&binding.node_name);
                let publisher = DebouncedPublisher::spawn(
                    binding.clone(),
                    self.bus.subscribe(&binding.path),
                    CancellationToken::new(),
                    move |keyword, value| {
                        gate.publish(OutboundMessage::retained(
                            command_topic.clone(),
                            topic::value_update_payload(keyword, &value),
                        ));
                    },
                );

                debug!(
                    "Attached publisher {} -> {} every {:?}",
                    binding.path, binding.keyword, binding.interval
                );
                self.on_stop
                    .push(format!("publisher {}", publisher.path()), move || {
                        publisher.cancel()
                    });
            }
        }

        self.publishers_attached = true;
    }

    fn on_message(&mut self, message: InboundMessage) {
        debug!(
            "Received message to topic {}: {}",
            message.topic, message.content
        );

        let topic = InboundTopic::parse(&message.topic);
        if !topic.is_for(&self.settings.system_id) {
            debug!("Unknown system id {:?}. Ignoring", topic.system_id);
            self.status.send_modify(|status| status.messages_ignored += 1);
            return;
        }

        self.status.send_modify(|status| status.messages_received += 1);
        self.dispatch(&topic, &message);
    }

    /// Extension point for inbound actions; none are handled yet
    fn dispatch(&mut self, topic: &InboundTopic, message: &InboundMessage) {
        debug!(
            "Unknown action {} for {} ({} bytes). Ignoring",
            topic.action,
            topic.sub_path,
            message.content.len()
        );
    }
}

impl BridgeSession<Stopping> {
    /// Closes the publish gate, then runs every teardown action in order
    pub fn teardown(mut self) -> BridgeSession<Stopped> {
        self.connection.send_replace(ConnectionState::Disconnected);
        let ran = self.on_stop.run_all();
        info!("Session {} stopped after {} teardown actions", self.settings.system_id, ran);
        self.transition()
    }
}

impl BridgeSession<Stopped> {}

async fn sweep_ticker(commands: mpsc::Sender<SessionCommand>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if commands.send(SessionCommand::Sweep).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Handle to a running session task
pub struct SessionHandle {
    system_id: String,
    commands: mpsc::Sender<SessionCommand>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<SessionStatus>,
    connection: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Connects and spawns the session actor
    pub fn spawn(
        settings: SessionSettings,
        bus: Arc<dyn TelemetryBus>,
        connector: &dyn BrokerConnector,
    ) -> Result<Self, BridgeError> {
        let system_id = settings.system_id.clone();
        info!("Starting bridge session with system id {}", system_id);

        let (session, events) = BridgeSession::open(settings, bus, connector)?;
        let status = session.status.subscribe();
        let connection = session.connection.subscribe();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let running = session.arm(command_tx.clone());

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let stopping = running.run(events, command_rx, token).await;
            let _stopped = stopping.teardown();
        });

        Ok(Self {
            system_id,
            commands: command_tx,
            shutdown,
            task: Some(task),
            status,
            connection,
        })
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Registers or renews a subscription for the configured keepalive TTL
    pub async fn renew_subscription(&self, topic: impl Into<String>) -> Result<(), BridgeError> {
        self.commands
            .send(SessionCommand::RenewSubscription {
                topic: topic.into(),
            })
            .await
            .map_err(|e| BridgeError::Client(format!("Session is not running: {}", e)))
    }

    pub async fn active_subscriptions(&self) -> Result<Vec<String>, BridgeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::ActiveSubscriptions { response_tx })
            .await
            .map_err(|e| BridgeError::Client(format!("Session is not running: {}", e)))?;
        response_rx
            .await
            .map_err(|e| BridgeError::Client(format!("Session dropped request: {}", e)))
    }

    /// Stops the session and waits for teardown; calling it again is a no-op
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            debug!("Session {} already stopped", self.system_id);
            return;
        };

        self.shutdown.cancel();
        if let Err(e) = task.await {
            error!("Session task panicked: {} - {}", self.system_id, e);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Owner of at most one session
///
/// A bridge whose identity could not be resolved never holds a session, and
/// stopping it is a no-op.
#[derive(Default)]
pub struct Bridge {
    session: Option<SessionHandle>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session, replacing any running one
    pub async fn start(
        &mut self,
        config: &BridgeConfig,
        bus: Arc<dyn TelemetryBus>,
        connector: &dyn BrokerConnector,
    ) -> Result<(), BridgeError> {
        debug!("Bridge starting");
        self.stop().await;

        let settings = SessionSettings::from_config(config).inspect_err(|e| error!("{}", e))?;
        self.session = Some(SessionHandle::spawn(settings, bus, connector)?);
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop().await;
            info!("Bridge stopped");
        }
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, NodeConfig, PathConfig, VesselConfig};
    use crate::telemetry::{LocalBus, PathValue};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOLTAGE: &str = "electrical.batteries.1.voltage";
    const PLATE_TOPIC: &str = "hasp/plate/command";

    #[derive(Default)]
    struct RecordingClient {
        published: Mutex<Vec<OutboundMessage>>,
        subscribed: Mutex<Vec<String>>,
        disconnects: AtomicUsize,
    }

    impl RecordingClient {
        fn payloads(&self) -> Vec<String> {
            self.published
                .lock()
                .iter()
                .map(|m| m.payload.clone())
                .collect()
        }
    }

    impl BrokerClient for RecordingClient {
        fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
            self.published.lock().push(message);
            Ok(())
        }

        fn subscribe(&self, filter: &str, _qos: QoS) -> Result<(), BridgeError> {
            self.subscribed.lock().push(filter.to_string());
            Ok(())
        }

        fn disconnect(&self) -> Result<(), BridgeError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        client: Arc<RecordingClient>,
        events: Mutex<Option<mpsc::Receiver<BrokerEvent>>>,
        client_ids: Mutex<Vec<String>>,
    }

    impl BrokerConnector for FakeConnector {
        fn connect(&self, client_id: &str) -> Result<BrokerConnection, BridgeError> {
            self.client_ids.lock().push(client_id.to_string());
            let events = self
                .events
                .lock()
                .take()
                .ok_or_else(|| BridgeError::Client("already connected".to_string()))?;
            Ok(BrokerConnection {
                client: self.client.clone(),
                events,
            })
        }
    }

    struct Harness {
        bridge: Bridge,
        bus: Arc<LocalBus>,
        client: Arc<RecordingClient>,
        connector: FakeConnector,
        events: mpsc::Sender<BrokerEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let client = Arc::new(RecordingClient::default());
            let (events, events_rx) = mpsc::channel(16);
            Self {
                bridge: Bridge::new(),
                bus: Arc::new(LocalBus::new()),
                client: client.clone(),
                connector: FakeConnector {
                    client,
                    events: Mutex::new(Some(events_rx)),
                    client_ids: Mutex::new(Vec::new()),
                },
                events,
            }
        }

        async fn start(&mut self, config: &BridgeConfig) -> Result<(), BridgeError> {
            self.bridge
                .start(config, self.bus.clone(), &self.connector)
                .await
        }

        async fn send(&self, event: BrokerEvent) {
            self.events.send(event).await.unwrap();
            settle().await;
        }

        async fn voltage(&self, value: f64) {
            self.bus.publish(PathValue::new(VOLTAGE, value));
            settle().await;
        }

        fn session(&self) -> &SessionHandle {
            self.bridge.session().expect("session running")
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn plate_config() -> BridgeConfig {
        BridgeConfig {
            broker: BrokerConfig {
                keepalive_ttl: 2,
                ..BrokerConfig::default()
            },
            vessel: VesselConfig {
                self_id: None,
                system_id: Some("ABC123".to_string()),
            },
            nodes: vec![NodeConfig {
                nodename: "plate".to_string(),
                pages: "p1\np2".to_string(),
                paths: vec![PathConfig {
                    path: VOLTAGE.to_string(),
                    keyword: "p5b51.val".to_string(),
                    interval: 2.0,
                }],
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_pages_and_debounced_values() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();
        assert_eq!(
            harness.connector.client_ids.lock().as_slice(),
            &["signalk/ABC123".to_string()]
        );

        harness.send(BrokerEvent::Connected).await;
        harness.voltage(12.6).await;
        tokio::time::advance(Duration::from_millis(100)).await;
        harness.voltage(12.7).await;
        tokio::time::advance(Duration::from_millis(2000)).await;
        harness.voltage(12.8).await;

        let published = harness.client.published.lock().clone();
        assert_eq!(
            published,
            vec![
                OutboundMessage::retained(PLATE_TOPIC.to_string(), "jsonl p1\np2".to_string()),
                OutboundMessage::retained(PLATE_TOPIC.to_string(), "p5b51.val=12.6".to_string()),
                OutboundMessage::retained(PLATE_TOPIC.to_string(), "p5b51.val=12.8".to_string()),
            ]
        );
        assert!(published.iter().all(|m| m.qos == QoS::AtLeastOnce && m.retain));

        harness.bridge.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_to_own_inbound_topics_on_connect() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();
        assert_eq!(harness.session().connection_state(), ConnectionState::Connecting);

        harness.send(BrokerEvent::Connected).await;

        assert_eq!(harness.session().connection_state(), ConnectionState::Connected);
        assert_eq!(harness.session().status().message, "MQTT Connected");
        assert_eq!(
            harness.client.subscribed.lock().as_slice(),
            &["+/signalk/ABC123/#".to_string()]
        );
        harness.bridge.stop().await;
    }

    #[tokio::test]
    async fn missing_system_id_creates_no_session() {
        let mut harness = Harness::new();
        let mut config = plate_config();
        config.vessel = VesselConfig::default();

        let err = harness.start(&config).await.unwrap_err();

        assert!(matches!(err, BridgeError::MissingSystemId));
        assert!(harness.bridge.session().is_none());
        assert!(harness.connector.client_ids.lock().is_empty());

        harness.bridge.stop().await;
        assert_eq!(harness.client.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resends_pages_without_duplicate_publishers() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();

        harness.send(BrokerEvent::Connected).await;
        harness.send(BrokerEvent::Closed).await;
        harness.send(BrokerEvent::Connected).await;
        harness.voltage(13.1).await;

        assert_eq!(
            harness.client.payloads(),
            vec!["jsonl p1\np2", "jsonl p1\np2", "p5b51.val=13.1"]
        );
        harness.bridge.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drops_publishes_while_disconnected() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();

        harness.send(BrokerEvent::Connected).await;
        harness.send(BrokerEvent::Closed).await;
        assert_eq!(
            harness.session().connection_state(),
            ConnectionState::Disconnected
        );
        let status = harness.session().status();
        assert_eq!(status.level, StatusLevel::Error);
        assert_eq!(status.message, "MQTT connection closed");

        harness.voltage(12.1).await;
        assert_eq!(harness.client.payloads(), vec!["jsonl p1\np2"]);

        // the dropped value still opened a debounce window
        harness.send(BrokerEvent::Connected).await;
        harness.voltage(12.2).await;
        tokio::time::advance(Duration::from_millis(2100)).await;
        harness.voltage(12.3).await;

        assert_eq!(
            harness.client.payloads(),
            vec!["jsonl p1\np2", "jsonl p1\np2", "p5b51.val=12.3"]
        );
        harness.bridge.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_only_update_status() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();
        harness.send(BrokerEvent::Connected).await;

        harness
            .send(BrokerEvent::Error("connection refused".to_string()))
            .await;

        let status = harness.session().status();
        assert_eq!(status.level, StatusLevel::Error);
        assert_eq!(
            status.message,
            "Error connecting to MQTT broker: connection refused"
        );
        assert_eq!(harness.session().connection_state(), ConnectionState::Connected);

        harness.voltage(12.4).await;
        assert_eq!(
            harness.client.payloads(),
            vec!["jsonl p1\np2", "p5b51.val=12.4"]
        );
        harness.bridge.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn filters_inbound_messages_by_system_id() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();
        harness.send(BrokerEvent::Connected).await;

        for topic in ["R/signalk/XYZ999/foo", "R/signalk/ABC123/foo", "R/nmea/ABC123/foo", "R"] {
            harness
                .send(BrokerEvent::Message(InboundMessage::from_topic(
                    topic.to_string(),
                    b"1",
                )))
                .await;
        }

        let status = harness.session().status();
        assert_eq!(status.messages_received, 1);
        assert_eq!(status.messages_ignored, 3);
        harness.bridge.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_publishers_and_disconnects() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();
        harness.send(BrokerEvent::Connected).await;
        harness.voltage(12.6).await;

        harness.bridge.stop().await;
        assert!(harness.bridge.session().is_none());
        assert_eq!(harness.client.disconnects.load(Ordering::SeqCst), 1);

        for i in 0..5 {
            tokio::time::advance(Duration::from_secs(3)).await;
            harness.voltage(13.0 + f64::from(i)).await;
        }

        assert_eq!(
            harness.client.payloads(),
            vec!["jsonl p1\np2", "p5b51.val=12.6"]
        );

        harness.bridge.stop().await;
        assert_eq!(harness.client.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_renewed_subscriptions() {
        let mut harness = Harness::new();
        harness.start(&plate_config()).await.unwrap();

        let session = harness.session();
        session.renew_subscription("vessels.self").await.unwrap();
        settle().await;
        assert_eq!(
            session.active_subscriptions().await.unwrap(),
            vec!["vessels.self".to_string()]
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        session.renew_subscription("vessels.self").await.unwrap();
        settle().await;

        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        assert_eq!(
            session.active_subscriptions().await.unwrap(),
            vec!["vessels.self".to_string()]
        );

        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        assert!(session.active_subscriptions().await.unwrap().is_empty());

        harness.bridge.stop().await;
    }

    #[test]
    fn teardown_runs_in_registration_order_and_clears() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut actions = TeardownActions::default();
        for name in ["sweep", "disconnect", "publisher"] {
            let order = order.clone();
            actions.push(name, move || order.lock().push(name));
        }

        assert_eq!(actions.len(), 3);
        assert_eq!(actions.run_all(), 3);
        assert!(actions.is_empty());
        assert_eq!(actions.run_all(), 0);
        assert_eq!(order.lock().as_slice(), &["sweep", "disconnect", "publisher"]);
    }

    #[test]
    fn settings_require_system_id() {
        let mut config = plate_config();
        let settings = SessionSettings::from_config(&config).unwrap();
        assert_eq!(settings.system_id, "ABC123");
        assert_eq!(settings.keepalive_ttl, Duration::from_secs(2));
        assert_eq!(settings.nodes[0].bindings[0].interval, Duration::from_secs(2));

        config.vessel.system_id = None;
        assert!(matches!(
            SessionSettings::from_config(&config),
            Err(BridgeError::MissingSystemId)
        ));
    }
}
