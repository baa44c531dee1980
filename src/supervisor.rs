//! Connection supervisor.
//!
//! Drives discovery, connection, stabilization and subscription for one
//! peripheral, then routes every notification to the decoders, the
//! variability estimator, the pending request registry and the observers.

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::connection::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, DisconnectReason,
};
use crate::ble::link::{
    DeviceChooser, DiscoveredPeripheral, GattLink, LinkEvent, LinkEventStream, NotificationEvent,
    PeripheralHandle,
};
use crate::ble::uuids::*;
use crate::config::SupervisorConfig;
use crate::data::{Reading, ReadingKind, VariabilityEstimator};
use crate::error::{Error, Result};
use crate::protocol::{decode_battery_level, decode_notification};
use crate::registry::{ReadingRequest, RequestRegistry};

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Push-style consumers of supervisor output.
///
/// Callbacks run on the dispatch task and must not block.
#[derive(Default)]
pub struct SupervisorObservers {
    on_heart_rate: Option<Callback<u16>>,
    on_variability: Option<Callback<f64>>,
    on_glucose: Option<Callback<u16>>,
    on_disconnect: Option<Callback<String>>,
}

impl SupervisorObservers {
    /// Create an empty set of observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every heart rate reading (bpm).
    pub fn on_heart_rate<F>(mut self, callback: F) -> Self
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.on_heart_rate = Some(Box::new(callback));
        self
    }

    /// Called with every new RMSSD value (ms).
    pub fn on_variability<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on_variability = Some(Box::new(callback));
        self
    }

    /// Called with every glucose reading (mg/dL).
    pub fn on_glucose<F>(mut self, callback: F) -> Self
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.on_glucose = Some(Box::new(callback));
        self
    }

    /// Called when the peripheral drops the connection.
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(callback));
        self
    }

    fn heart_rate(&self, bpm: u16) {
        if let Some(f) = &self.on_heart_rate {
            f(bpm);
        }
    }

    fn variability(&self, rmssd: f64) {
        if let Some(f) = &self.on_variability {
            f(rmssd);
        }
    }

    fn glucose(&self, mg_per_dl: u16) {
        if let Some(f) = &self.on_glucose {
            f(mg_per_dl);
        }
    }

    fn disconnected(&self, reason: String) {
        if let Some(f) = &self.on_disconnect {
            f(reason);
        }
    }
}

/// Outcome of the best-effort subscription step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscriptionReport {
    /// Battery level was read.
    pub battery_read: bool,
    /// Heart rate notifications are enabled.
    pub heart_rate: bool,
    /// Glucose notifications are enabled; `None` if not offered.
    pub glucose: Option<bool>,
}

impl SubscriptionReport {
    /// Characteristics with notifications enabled.
    fn subscribed(&self) -> Vec<Uuid> {
        let mut uuids = Vec::new();
        if self.heart_rate {
            uuids.push(HEART_RATE_MEASUREMENT_UUID);
        }
        if self.glucose == Some(true) {
            uuids.push(GLUCOSE_MEASUREMENT_UUID);
        }
        uuids
    }
}

/// A live connection.
struct Session {
    handle: PeripheralHandle,
    link: Arc<dyn GattLink>,
    report: SubscriptionReport,
    dispatch: Option<JoinHandle<()>>,
}

impl Session {
    /// Stop dispatch, drop subscriptions and close the link.
    async fn close(self) -> Result<()> {
        if let Some(dispatch) = self.dispatch {
            dispatch.abort();
            // A notification may still be mid-dispatch on another worker.
            let _ = dispatch.await;
        }

        for uuid in self.report.subscribed() {
            if let Err(e) = self.link.unsubscribe(&uuid).await {
                debug!("Failed to unsubscribe from {}: {}", uuid, e);
            }
        }

        self.link.disconnect().await
    }
}

/// Rolls back an in-flight connect sequence whose future was dropped.
///
/// The transition lock stays held until the half-open link is closed.
struct ConnectAttempt {
    shared: Arc<Shared>,
    link: Option<Arc<dyn GattLink>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        let state = self.shared.state.state();
        if !state.is_transitioning() {
            return;
        }

        warn!("Connect sequence cancelled while {}", state);

        let rollback = match state {
            ConnectionState::Discovering => ConnectionState::Idle,
            _ => ConnectionState::Disconnected(DisconnectReason::ConnectFailed),
        };
        if let Err(e) = self.shared.state.transition(rollback) {
            warn!("{}", e);
        }
        *self.shared.battery_level.write() = None;

        let (Some(link), Some(guard)) = (self.link.take(), self.guard.take()) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _guard = guard;
                    if link.is_connected().await {
                        if let Err(e) = link.disconnect().await {
                            warn!("Failed to close cancelled session: {}", e);
                        }
                    }
                });
            }
            Err(_) => warn!("No runtime to close the cancelled session on"),
        }
    }
}

/// State shared between the supervisor and its dispatch task.
struct Shared {
    config: SupervisorConfig,
    observers: SupervisorObservers,
    state: ConnectionStateMachine,
    registry: RequestRegistry,
    estimator: Mutex<VariabilityEstimator>,
    battery_level: RwLock<Option<u8>>,
    session: RwLock<Option<Session>>,
    /// Serializes connect, disconnect and peer-disconnect handling.
    transition: Arc<tokio::sync::Mutex<()>>,
    reading_tx: broadcast::Sender<Reading>,
}

impl Shared {
    /// Decode one notification and fan the readings out.
    fn dispatch(&self, event: &NotificationEvent) {
        if event.characteristic_uuid == BATTERY_LEVEL_UUID {
            if let Some(level) = decode_battery_level(&event.data) {
                debug!("Battery level: {}%", level);
                *self.battery_level.write() = Some(level);
            }
            return;
        }

        let readings = decode_notification(
            &event.characteristic_uuid,
            &event.data,
            self.config.glucose_layout,
        );

        for reading in readings {
            match reading {
                Reading::HeartRate { bpm } => self.observers.heart_rate(bpm),
                Reading::InterBeatInterval { milliseconds } => {
                    let rmssd = self.estimator.lock().push(milliseconds);
                    if let Some(rmssd) = rmssd {
                        self.observers.variability(rmssd);
                    }
                }
                Reading::GlucoseConcentration { mg_per_dl } => self.observers.glucose(mg_per_dl),
            }

            self.registry.fulfill(reading);
            let _ = self.reading_tx.send(reading);
        }
    }

    /// Drop per-connection data.
    fn reset_connection_data(&self) {
        self.registry.close();
        self.estimator.lock().reset();
        *self.battery_level.write() = None;
    }

    async fn handle_peer_disconnect(&self) {
        let _guard = self.transition.lock().await;

        // A user teardown that won the lock has already handled everything.
        if !self.state.state().is_connected() {
            return;
        }

        let session = self.session.write().take();
        let reason = DisconnectReason::PeerInitiated;

        if let Err(e) = self.state.transition(ConnectionState::Disconnected(reason)) {
            warn!("{}", e);
        }
        self.reset_connection_data();

        let name = session
            .as_ref()
            .map(|s| s.handle.display_name(&self.config.fallback_name))
            .unwrap_or_else(|| self.config.fallback_name.clone());

        info!("{}: {}", name, reason);
        self.observers.disconnected(format!("{}: {}", name, reason));

        // Some stacks keep a stale handle around after the peer left.
        if let Some(session) = session {
            if session.link.is_connected().await {
                if let Err(e) = session.link.disconnect().await {
                    debug!("Cleanup disconnect failed: {}", e);
                }
            }
        }
    }
}

/// Consume link events until the link goes away.
async fn run_dispatch(shared: Arc<Shared>, mut events: LinkEventStream) {
    debug!("Dispatch task started");

    while let Some(event) = events.next().await {
        match event {
            LinkEvent::Notification(notification) => shared.dispatch(&notification),
            LinkEvent::Disconnected => break,
        }
    }

    debug!("Link event stream ended");
    shared.handle_peer_disconnect().await;
}

/// Supervises the connection to one biometric peripheral.
///
/// Dropping a connected supervisor closes the link on a background task when
/// a Tokio runtime is available. Outside a runtime the link is left to the
/// platform; call [`Supervisor::disconnect`] first to close it deterministically.
pub struct Supervisor {
    chooser: Arc<dyn DeviceChooser>,
    shared: Arc<Shared>,
}

impl Supervisor {
    /// Create a supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the configuration is unusable.
    pub fn new(
        chooser: Arc<dyn DeviceChooser>,
        observers: SupervisorObservers,
        config: SupervisorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (reading_tx, _) = broadcast::channel(64);
        let estimator = VariabilityEstimator::new(config.variability_window);

        Ok(Self {
            chooser,
            shared: Arc::new(Shared {
                config,
                observers,
                state: ConnectionStateMachine::new(),
                registry: RequestRegistry::new(),
                estimator: Mutex::new(estimator),
                battery_level: RwLock::new(None),
                session: RwLock::new(None),
                transition: Arc::new(tokio::sync::Mutex::new(())),
                reading_tx,
            }),
        })
    }

    // === Connection ===

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.state.subscribe()
    }

    /// The connected peripheral.
    pub fn peripheral(&self) -> Option<PeripheralHandle> {
        self.shared
            .session
            .read()
            .as_ref()
            .map(|s| s.handle.clone())
    }

    /// What the subscription step managed to set up.
    pub fn subscription_report(&self) -> Option<SubscriptionReport> {
        self.shared.session.read().as_ref().map(|s| s.report)
    }

    /// Last known battery level in percent.
    pub fn battery_level(&self) -> Option<u8> {
        *self.shared.battery_level.read()
    }

    /// Discover a peripheral, connect, and subscribe to its measurements.
    ///
    /// Resolves with the peripheral's display name.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionInProgress`] if another sequence is running
    /// - [`Error::AlreadyConnected`] if already connected
    /// - [`Error::PlatformUnsupported`] if the platform has no BLE
    /// - [`Error::NoDeviceSelected`] if the chooser picked nothing
    /// - [`Error::GattConnectFailed`] if the session could not be set up
    ///
    /// Dropping the returned future before it resolves abandons the attempt:
    /// the state falls back to `Idle` or `Disconnected(ConnectFailed)` and a
    /// link that was already opened is closed in the background.
    pub async fn connect(&self) -> Result<String> {
        let guard = self
            .shared
            .transition
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::ConnectionInProgress)?;

        let current = self.state();
        if current.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        if !current.can_start_connect() {
            return Err(Error::ConnectionInProgress);
        }

        if !self.chooser.is_available().await {
            warn!("Bluetooth LE is not available on this platform");
            return Err(Error::PlatformUnsupported);
        }

        let mut attempt = ConnectAttempt {
            shared: self.shared.clone(),
            link: None,
            guard: Some(guard),
        };

        self.shared.state.transition(ConnectionState::Discovering)?;

        let DiscoveredPeripheral { handle, link } = match self.chooser.choose().await {
            Ok(Some(found)) => found,
            Ok(None) => {
                info!("No device selected");
                self.shared.state.transition(ConnectionState::Idle)?;
                return Err(Error::NoDeviceSelected);
            }
            Err(e) => {
                warn!("Device selection failed: {}", e);
                self.shared.state.transition(ConnectionState::Idle)?;
                return Err(e);
            }
        };

        let name = handle.display_name(&self.shared.config.fallback_name);
        info!("Connecting to {} ({})", name, handle.id);
        attempt.link = Some(link.clone());

        self.shared.state.transition(ConnectionState::Connecting)?;

        if let Err(e) = link.connect().await {
            let err = Error::GattConnectFailed {
                reason: e.to_string(),
            };
            return Err(self.abort_connect(link.as_ref(), err).await);
        }

        let (events, report) = match self.establish(link.as_ref()).await {
            Ok(established) => established,
            Err(e) => return Err(self.abort_connect(link.as_ref(), e).await),
        };

        *self.shared.session.write() = Some(Session {
            handle,
            link,
            report,
            dispatch: None,
        });
        self.shared.registry.open();
        self.shared.state.transition(ConnectionState::Ready)?;

        let dispatch = tokio::spawn(run_dispatch(self.shared.clone(), events));
        if let Some(session) = self.shared.session.write().as_mut() {
            session.dispatch = Some(dispatch);
        }

        info!("Connected to {} ({:?})", name, report);

        Ok(name)
    }

    /// Stabilize, discover services and subscribe. Runs in `Connecting`.
    async fn establish(
        &self,
        link: &dyn GattLink,
    ) -> Result<(LinkEventStream, SubscriptionReport)> {
        self.shared.state.transition(ConnectionState::Stabilizing)?;

        debug!(
            "Waiting {:?} before service discovery",
            self.shared.config.stabilization_delay
        );
        tokio::time::sleep(self.shared.config.stabilization_delay).await;

        if !link.is_connected().await {
            return Err(Error::GattConnectFailed {
                reason: "peripheral dropped the connection while stabilizing".to_string(),
            });
        }

        link.discover_services()
            .await
            .map_err(|e| Error::GattConnectFailed {
                reason: format!("service discovery failed: {}", e),
            })?;

        // Take the stream before enabling notifications so none are missed.
        let events = link.events().await.map_err(|e| Error::GattConnectFailed {
            reason: format!("notification stream unavailable: {}", e),
        })?;

        self.shared
            .state
            .transition(ConnectionState::SubscribingServices)?;

        let report = self.subscribe_services(link).await;

        Ok((events, report))
    }

    /// Best-effort reads and subscriptions. Failures are logged only.
    async fn subscribe_services(&self, link: &dyn GattLink) -> SubscriptionReport {
        let mut report = SubscriptionReport::default();

        match link.read(&BATTERY_LEVEL_UUID).await {
            Ok(data) => {
                let level = decode_battery_level(&data);
                debug!("Battery level: {:?}", level);
                *self.shared.battery_level.write() = level;
                report.battery_read = level.is_some();
            }
            Err(e) => log_subscription_failure(&BATTERY_LEVEL_UUID, e),
        }

        match link.subscribe(&HEART_RATE_MEASUREMENT_UUID).await {
            Ok(()) => report.heart_rate = true,
            Err(e) => log_subscription_failure(&HEART_RATE_MEASUREMENT_UUID, e),
        }

        if link.has_characteristic(&GLUCOSE_MEASUREMENT_UUID) {
            match link.subscribe(&GLUCOSE_MEASUREMENT_UUID).await {
                Ok(()) => report.glucose = Some(true),
                Err(e) => {
                    report.glucose = Some(false);
                    log_subscription_failure(&GLUCOSE_MEASUREMENT_UUID, e);
                }
            }
        }

        report
    }

    /// Close a half-open session and surface `err`.
    async fn abort_connect(&self, link: &dyn GattLink, err: Error) -> Error {
        warn!("Connect sequence failed: {}", err);

        if link.is_connected().await {
            if let Err(e) = link.disconnect().await {
                warn!("Failed to close half-open session: {}", e);
            }
        }

        if let Err(e) = self
            .shared
            .state
            .transition(ConnectionState::Disconnected(DisconnectReason::ConnectFailed))
        {
            warn!("{}", e);
        }

        err
    }

    /// Disconnect from the peripheral.
    ///
    /// Pending requests fail with [`Error::ConnectionLost`]. The disconnect
    /// observer is not called for a user-requested teardown.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.shared.transition.lock().await;

        if !self.state().is_connected() {
            debug!("Not connected, nothing to disconnect");
            return Ok(());
        }

        self.shared.state.transition(ConnectionState::Disconnecting)?;

        let session = self.shared.session.write().take();
        let mut result = Ok(());

        if let Some(session) = session {
            info!(
                "Disconnecting from {}",
                session.handle.display_name(&self.shared.config.fallback_name)
            );

            // Dispatch stops first so the teardown is not seen as a peer
            // disconnect.
            if let Err(e) = session.close().await {
                warn!("Failed to disconnect: {}", e);
                result = Err(e);
            }
        }

        self.shared.reset_connection_data();
        self.shared
            .state
            .transition(ConnectionState::Disconnected(DisconnectReason::UserInitiated))?;

        result
    }

    // === Readings ===

    /// Register a request for the next reading of `kind`.
    ///
    /// The returned handle resolves with the reading, or with
    /// [`Error::RequestTimeout`] after the configured request timeout, or
    /// with [`Error::ConnectionLost`] if the connection goes away first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] immediately when not connected.
    pub fn request(&self, kind: ReadingKind) -> Result<ReadingRequest> {
        self.shared
            .registry
            .register(kind, self.shared.config.request_timeout)
    }

    /// Wait for the next reading of `kind`.
    pub async fn request_reading(&self, kind: ReadingKind) -> Result<Reading> {
        self.request(kind)?.await
    }

    /// Wait for the next heart rate reading.
    pub async fn request_heart_rate(&self) -> Result<u16> {
        let reading = self.request_reading(ReadingKind::HeartRate).await?;
        reading.bpm().ok_or_else(|| {
            Error::Internal(format!("heart rate request resolved with {}", reading))
        })
    }

    /// Number of on-demand requests still waiting.
    pub fn pending_requests(&self) -> usize {
        self.shared.registry.len()
    }

    /// Subscribe to every decoded reading.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.shared.reading_tx.subscribe()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shared.registry.close();

        let Some(session) = self.shared.session.write().take() else {
            return;
        };
        if let Some(dispatch) = &session.dispatch {
            dispatch.abort();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Supervisor dropped while connected; closing link");
                runtime.spawn(async move {
                    if let Err(e) = session.close().await {
                        debug!("Failed to close link of dropped supervisor: {}", e);
                    }
                });
            }
            Err(_) => warn!("Supervisor dropped outside a runtime; link left to the platform"),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("peripheral", &self.peripheral())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

fn log_subscription_failure(uuid: &Uuid, err: Error) {
    let err = Error::SubscriptionFailed {
        uuid: uuid.to_string(),
        reason: err.to_string(),
    };
    warn!("{}", err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::link::MockDeviceChooser;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted GATT link. Link events are pushed through `events_tx`.
    struct FakeLink {
        characteristics: HashSet<Uuid>,
        battery: Vec<u8>,
        fail_connect: bool,
        fail_discovery: bool,
        fail_subscribe: HashSet<Uuid>,
        connected: AtomicBool,
        disconnect_calls: AtomicUsize,
        subscribed: Mutex<Vec<Uuid>>,
        unsubscribed: Mutex<Vec<Uuid>>,
        /// Sender for the most recently handed out event stream.
        events_tx: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    }

    impl FakeLink {
        fn new() -> Self {
            Self {
                characteristics: [
                    HEART_RATE_MEASUREMENT_UUID,
                    GLUCOSE_MEASUREMENT_UUID,
                    BATTERY_LEVEL_UUID,
                ]
                .into_iter()
                .collect(),
                battery: vec![87],
                fail_connect: false,
                fail_discovery: false,
                fail_subscribe: HashSet::new(),
                connected: AtomicBool::new(false),
                disconnect_calls: AtomicUsize::new(0),
                subscribed: Mutex::new(Vec::new()),
                unsubscribed: Mutex::new(Vec::new()),
                events_tx: Mutex::new(None),
            }
        }

        fn send(&self, event: LinkEvent) {
            self.events_tx
                .lock()
                .as_ref()
                .expect("event stream not taken yet")
                .unbounded_send(event)
                .unwrap();
        }

        fn notify(&self, uuid: Uuid, data: &[u8]) {
            self.send(LinkEvent::Notification(NotificationEvent {
                characteristic_uuid: uuid,
                data: data.to_vec(),
            }));
        }

        fn drop_connection(&self) {
            self.connected.store(false, Ordering::SeqCst);
            self.send(LinkEvent::Disconnected);
        }
    }

    #[async_trait]
    impl GattLink for FakeLink {
        async fn connect(&self) -> Result<()> {
            if self.fail_connect {
                return Err(Error::Internal("radio busy".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn discover_services(&self) -> Result<()> {
            if self.fail_discovery {
                return Err(Error::Internal("discovery failed".to_string()));
            }
            Ok(())
        }

        fn has_characteristic(&self, uuid: &Uuid) -> bool {
            self.characteristics.contains(uuid)
        }

        async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
            if *uuid == BATTERY_LEVEL_UUID && self.has_characteristic(uuid) {
                Ok(self.battery.clone())
            } else {
                Err(Error::CharacteristicNotFound {
                    uuid: uuid.to_string(),
                })
            }
        }

        async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
            if self.fail_subscribe.contains(uuid) || !self.has_characteristic(uuid) {
                return Err(Error::Internal("not permitted".to_string()));
            }
            self.subscribed.lock().push(*uuid);
            Ok(())
        }

        async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
            self.unsubscribed.lock().push(*uuid);
            Ok(())
        }

        async fn events(&self) -> Result<LinkEventStream> {
            let (tx, rx) = mpsc::unbounded();
            *self.events_tx.lock() = Some(tx);
            Ok(Box::pin(rx))
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn chooser_for(link: Arc<FakeLink>, name: Option<&str>) -> MockDeviceChooser {
        let name = name.map(str::to_string);
        let mut chooser = MockDeviceChooser::new();
        chooser.expect_is_available().returning(|| true);
        chooser.expect_choose().returning(move || {
            Ok(Some(DiscoveredPeripheral {
                handle: PeripheralHandle::new("fake-peripheral", name.clone()),
                link: link.clone(),
            }))
        });
        chooser
    }

    fn supervisor_with(chooser: MockDeviceChooser, observers: SupervisorObservers) -> Supervisor {
        Supervisor::new(Arc::new(chooser), observers, SupervisorConfig::default()).unwrap()
    }

    fn supervisor_with_config(
        chooser: MockDeviceChooser,
        observers: SupervisorObservers,
        config: SupervisorConfig,
    ) -> Supervisor {
        Supervisor::new(Arc::new(chooser), observers, config).unwrap()
    }

    async fn connected(link: &Arc<FakeLink>, observers: SupervisorObservers) -> Supervisor {
        let supervisor = supervisor_with(chooser_for(link.clone(), Some("Polar H10")), observers);
        supervisor.connect().await.unwrap();
        supervisor
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_happy_path() {
        let link = Arc::new(FakeLink::new());
        let supervisor = supervisor_with(
            chooser_for(link.clone(), Some("Polar H10")),
            SupervisorObservers::new(),
        );
        let mut states = supervisor.subscribe_state();

        let started = tokio::time::Instant::now();
        let name = supervisor.connect().await.unwrap();

        assert_eq!(name, "Polar H10");
        assert!(supervisor.is_connected());
        assert!(started.elapsed() >= SupervisorConfig::DEFAULT_STABILIZATION_DELAY);
        assert_eq!(supervisor.battery_level(), Some(87));
        assert_eq!(
            supervisor.subscription_report(),
            Some(SubscriptionReport {
                battery_read: true,
                heart_rate: true,
                glucose: Some(true),
            })
        );
        assert_eq!(
            *link.subscribed.lock(),
            vec![HEART_RATE_MEASUREMENT_UUID, GLUCOSE_MEASUREMENT_UUID]
        );

        let mut seen = Vec::new();
        while let Ok(event) = states.try_recv() {
            seen.push(event.state);
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Discovering,
                ConnectionState::Connecting,
                ConnectionState::Stabilizing,
                ConnectionState::SubscribingServices,
                ConnectionState::Ready,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unnamed_peripheral_uses_fallback() {
        let link = Arc::new(FakeLink::new());
        let supervisor = supervisor_with(chooser_for(link, None), SupervisorObservers::new());
        assert_eq!(supervisor.connect().await.unwrap(), "Unknown device");
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_unsupported() {
        let mut chooser = MockDeviceChooser::new();
        chooser.expect_is_available().returning(|| false);
        chooser.expect_choose().never();
        let supervisor = supervisor_with(chooser, SupervisorObservers::new());

        assert!(matches!(
            supervisor.connect().await,
            Err(Error::PlatformUnsupported)
        ));
        assert_eq!(supervisor.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_device_selected_returns_to_idle() {
        let mut chooser = MockDeviceChooser::new();
        chooser.expect_is_available().returning(|| true);
        chooser.expect_choose().returning(|| Ok(None));
        let supervisor = supervisor_with(chooser, SupervisorObservers::new());

        assert!(matches!(
            supervisor.connect().await,
            Err(Error::NoDeviceSelected)
        ));
        assert_eq!(supervisor.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gatt_connect_failure() {
        let mut fake = FakeLink::new();
        fake.fail_connect = true;
        let link = Arc::new(fake);
        let supervisor = supervisor_with(chooser_for(link, None), SupervisorObservers::new());

        assert!(matches!(
            supervisor.connect().await,
            Err(Error::GattConnectFailed { .. })
        ));
        assert_eq!(
            supervisor.state(),
            ConnectionState::Disconnected(DisconnectReason::ConnectFailed)
        );
        assert!(matches!(
            supervisor.request(ReadingKind::HeartRate),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_session_opened_disconnects() {
        let mut fake = FakeLink::new();
        fake.fail_discovery = true;
        let link = Arc::new(fake);
        let supervisor =
            supervisor_with(chooser_for(link.clone(), None), SupervisorObservers::new());

        assert!(matches!(
            supervisor.connect().await,
            Err(Error::GattConnectFailed { .. })
        ));
        assert_eq!(link.disconnect_calls.load(Ordering::SeqCst), 1);
        assert!(!link.connected.load(Ordering::SeqCst));
        assert_eq!(
            supervisor.state(),
            ConnectionState::Disconnected(DisconnectReason::ConnectFailed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_failures_are_not_fatal() {
        let mut fake = FakeLink::new();
        fake.fail_subscribe.insert(HEART_RATE_MEASUREMENT_UUID);
        fake.fail_subscribe.insert(GLUCOSE_MEASUREMENT_UUID);
        fake.characteristics.remove(&BATTERY_LEVEL_UUID);
        let link = Arc::new(fake);
        let supervisor =
            supervisor_with(chooser_for(link.clone(), Some("Strap")), SupervisorObservers::new());

        assert_eq!(supervisor.connect().await.unwrap(), "Strap");
        assert!(supervisor.is_connected());
        assert_eq!(
            supervisor.subscription_report(),
            Some(SubscriptionReport {
                battery_read: false,
                heart_rate: false,
                glucose: Some(false),
            })
        );
        assert_eq!(supervisor.battery_level(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_glucose_skipped_when_not_offered() {
        let mut fake = FakeLink::new();
        fake.characteristics.remove(&GLUCOSE_MEASUREMENT_UUID);
        let link = Arc::new(fake);
        let supervisor = connected(&link, SupervisorObservers::new()).await;

        assert_eq!(supervisor.subscription_report().unwrap().glucose, None);
        assert_eq!(*link.subscribed.lock(), vec![HEART_RATE_MEASUREMENT_UUID]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_ready_is_refused() {
        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, SupervisorObservers::new()).await;

        assert!(matches!(
            supervisor.connect().await,
            Err(Error::AlreadyConnected)
        ));
        assert_eq!(supervisor.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_is_refused() {
        let link = Arc::new(FakeLink::new());
        let supervisor =
            supervisor_with(chooser_for(link, Some("Polar H10")), SupervisorObservers::new());

        let (first, second) = tokio::join!(supervisor.connect(), async {
            tokio::task::yield_now().await;
            supervisor.connect().await
        });

        assert_eq!(first.unwrap(), "Polar H10");
        assert!(matches!(second, Err(Error::ConnectionInProgress)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_reach_observers() {
        let heart_rates = Arc::new(Mutex::new(Vec::new()));
        let variability = Arc::new(Mutex::new(Vec::new()));
        let glucose = Arc::new(Mutex::new(Vec::new()));

        let observers = {
            let heart_rates = heart_rates.clone();
            let variability = variability.clone();
            let glucose = glucose.clone();
            SupervisorObservers::new()
                .on_heart_rate(move |bpm| heart_rates.lock().push(bpm))
                .on_variability(move |rmssd| variability.lock().push(rmssd))
                .on_glucose(move |mg| glucose.lock().push(mg))
        };

        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, observers).await;
        let mut readings = supervisor.subscribe_readings();

        // 75 bpm with RR intervals of 800, 820 and 780 ms (819, 840, 799 ticks)
        let mut payload = vec![0x10, 75];
        for ticks in [819u16, 840, 799] {
            payload.extend_from_slice(&ticks.to_le_bytes());
        }
        link.notify(HEART_RATE_MEASUREMENT_UUID, &payload);

        let mut glucose_record = vec![0x02, 0x01, 0x00, 0xE8, 0x07, 3, 15, 8, 30, 0];
        glucose_record.extend_from_slice(&0xB05Fu16.to_le_bytes());
        glucose_record.push(0x11);
        link.notify(GLUCOSE_MEASUREMENT_UUID, &glucose_record);

        // 4 readings from the heart rate payload plus 1 glucose reading.
        for _ in 0..5 {
            readings.recv().await.unwrap();
        }

        assert_eq!(*heart_rates.lock(), vec![75]);
        assert_eq!(variability.lock().len(), 1);
        assert_eq!(*glucose.lock(), vec![95]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_notification_updates_level() {
        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, SupervisorObservers::new()).await;
        let mut readings = supervisor.subscribe_readings();

        link.notify(BATTERY_LEVEL_UUID, &[42]);
        link.notify(HEART_RATE_MEASUREMENT_UUID, &[0x00, 60]);
        readings.recv().await.unwrap();

        assert_eq!(supervisor.battery_level(), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_heart_rate_resolves_with_next_reading() {
        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, SupervisorObservers::new()).await;

        let (bpm, ()) = tokio::join!(supervisor.request_heart_rate(), async {
            tokio::task::yield_now().await;
            link.notify(HEART_RATE_MEASUREMENT_UUID, &[0x00, 0x4B]);
        });

        assert_eq!(bpm.unwrap(), 75);
        assert_eq!(supervisor.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_without_affecting_connection() {
        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, SupervisorObservers::new()).await;

        let started = tokio::time::Instant::now();
        let result = supervisor.request_heart_rate().await;

        assert!(matches!(result, Err(Error::RequestTimeout)));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(supervisor.is_connected());
        assert_eq!(supervisor.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_while_disconnected_fails_immediately() {
        let link = Arc::new(FakeLink::new());
        let supervisor = supervisor_with(chooser_for(link, None), SupervisorObservers::new());

        assert!(matches!(
            supervisor.request_heart_rate().await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_disconnect_fails_pending_requests() {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let observers = {
            let disconnects = disconnects.clone();
            SupervisorObservers::new().on_disconnect(move |_| {
                disconnects.fetch_add(1, Ordering::SeqCst);
            })
        };

        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, observers).await;

        let requests: Vec<_> = (0..3)
            .map(|_| supervisor.request(ReadingKind::HeartRate).unwrap())
            .collect();
        assert_eq!(supervisor.pending_requests(), 3);

        supervisor.disconnect().await.unwrap();

        assert_eq!(supervisor.pending_requests(), 0);
        for request in requests {
            assert!(matches!(request.await, Err(Error::ConnectionLost)));
        }
        assert_eq!(
            supervisor.state(),
            ConnectionState::Disconnected(DisconnectReason::UserInitiated)
        );
        assert_eq!(link.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *link.unsubscribed.lock(),
            vec![HEART_RATE_MEASUREMENT_UUID, GLUCOSE_MEASUREMENT_UUID]
        );
        assert!(supervisor.peripheral().is_none());
        assert_eq!(supervisor.battery_level(), None);

        // Give an aborted dispatch task every chance to misbehave.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_disconnect_notifies_and_fails_pending() {
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let observers = {
            let reasons = reasons.clone();
            SupervisorObservers::new().on_disconnect(move |reason| reasons.lock().push(reason))
        };

        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, observers).await;
        let mut states = supervisor.subscribe_state();

        let request = supervisor.request(ReadingKind::HeartRate).unwrap();
        link.drop_connection();

        assert!(matches!(request.await, Err(Error::ConnectionLost)));

        let event = states.recv().await.unwrap();
        assert_eq!(
            event.state,
            ConnectionState::Disconnected(DisconnectReason::PeerInitiated)
        );
        tokio::task::yield_now().await;

        assert_eq!(*reasons.lock(), vec!["Polar H10: device disconnected".to_string()]);
        assert_eq!(supervisor.pending_requests(), 0);
        assert!(matches!(
            supervisor.request(ReadingKind::HeartRate),
            Err(Error::NotConnected)
        ));

        // A later user disconnect is a no-op.
        supervisor.disconnect().await.unwrap();
        assert_eq!(reasons.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect() {
        let heart_rates = Arc::new(Mutex::new(Vec::new()));
        let observers = {
            let heart_rates = heart_rates.clone();
            SupervisorObservers::new().on_heart_rate(move |bpm| heart_rates.lock().push(bpm))
        };

        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, observers).await;
        supervisor.disconnect().await.unwrap();

        assert_eq!(supervisor.connect().await.unwrap(), "Polar H10");
        assert!(supervisor.is_connected());

        let mut readings = supervisor.subscribe_readings();
        link.notify(HEART_RATE_MEASUREMENT_UUID, &[0x00, 66]);
        readings.recv().await.unwrap();

        assert_eq!(*heart_rates.lock(), vec![66]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_variability_window_resets_on_disconnect() {
        let variability = Arc::new(Mutex::new(Vec::new()));
        let observers = {
            let variability = variability.clone();
            SupervisorObservers::new().on_variability(move |v| variability.lock().push(v))
        };

        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, observers).await;
        let mut readings = supervisor.subscribe_readings();

        // Two intervals: not enough for a statistic.
        link.notify(HEART_RATE_MEASUREMENT_UUID, &[0x10, 60, 0x00, 0x04, 0x00, 0x04]);
        for _ in 0..3 {
            readings.recv().await.unwrap();
        }
        assert!(variability.lock().is_empty());
        assert_eq!(supervisor.shared.estimator.lock().len(), 2);

        supervisor.disconnect().await.unwrap();
        assert!(supervisor.shared.estimator.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_closes_link_and_recovers() {
        let link = Arc::new(FakeLink::new());
        let supervisor = supervisor_with(
            chooser_for(link.clone(), Some("Polar H10")),
            SupervisorObservers::new(),
        );

        // Give up halfway through the stabilization delay.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(500), supervisor.connect()).await;
        assert!(cancelled.is_err());
        assert_eq!(
            supervisor.state(),
            ConnectionState::Disconnected(DisconnectReason::ConnectFailed)
        );

        // Waits for the background close to release the transition lock.
        supervisor.disconnect().await.unwrap();
        assert!(!link.connected.load(Ordering::SeqCst));
        assert_eq!(link.disconnect_calls.load(Ordering::SeqCst), 1);

        assert_eq!(supervisor.connect().await.unwrap(), "Polar H10");
        assert!(supervisor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_connected_supervisor_closes_link() {
        let link = Arc::new(FakeLink::new());
        let supervisor = connected(&link, SupervisorObservers::new()).await;

        drop(supervisor);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(link.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *link.unsubscribed.lock(),
            vec![HEART_RATE_MEASUREMENT_UUID, GLUCOSE_MEASUREMENT_UUID]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_waits_for_in_flight_dispatch() {
        let entered = Arc::new(AtomicBool::new(false));
        let observers = {
            let entered = entered.clone();
            SupervisorObservers::new().on_heart_rate(move |_| {
                entered.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
            })
        };

        let link = Arc::new(FakeLink::new());
        let supervisor = supervisor_with_config(
            chooser_for(link.clone(), Some("Polar H10")),
            observers,
            SupervisorConfig::default().with_stabilization_delay(Duration::from_millis(10)),
        );
        supervisor.connect().await.unwrap();

        // One heart rate followed by three RR intervals.
        link.notify(
            HEART_RATE_MEASUREMENT_UUID,
            &[0x10, 72, 0x00, 0x04, 0x00, 0x04, 0x00, 0x04],
        );
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        supervisor.disconnect().await.unwrap();
        assert!(supervisor.shared.estimator.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(supervisor.shared.estimator.lock().is_empty());
        assert_eq!(
            supervisor.state(),
            ConnectionState::Disconnected(DisconnectReason::UserInitiated)
        );
    }
}
