//! Connection state machine.
//!
//! Tracks the lifecycle of a supervised connection and publishes every
//! state change to subscribers.

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Why a connection ended up disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    UserInitiated,
    /// The peripheral went away on its own.
    PeerInitiated,
    /// The connect sequence failed after the session was attempted.
    ConnectFailed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "disconnected by user"),
            Self::PeerInitiated => write!(f, "device disconnected"),
            Self::ConnectFailed => write!(f, "connection failed"),
        }
    }
}

/// Connection state of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Nothing has happened yet.
    #[default]
    Idle,
    /// Waiting for the platform chooser to pick a peripheral.
    Discovering,
    /// Opening the GATT session.
    Connecting,
    /// Waiting for the peripheral stack to settle before service discovery.
    Stabilizing,
    /// Reading and subscribing to characteristics.
    SubscribingServices,
    /// Connected and dispatching notifications.
    Ready,
    /// Tearing down a user-requested disconnect.
    Disconnecting,
    /// Not connected.
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Discovering
                | Self::Connecting
                | Self::Stabilizing
                | Self::SubscribingServices
                | Self::Disconnecting
        )
    }

    /// Check if a new connect sequence may start from this state.
    pub fn can_start_connect(&self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected(_))
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Idle | Disconnected(_), Discovering)
                | (Discovering, Connecting | Idle)
                | (Connecting, Stabilizing | Disconnected(_))
                | (Stabilizing, SubscribingServices | Disconnected(_))
                | (SubscribingServices, Ready | Disconnected(_))
                | (Ready, Disconnecting | Disconnected(DisconnectReason::PeerInitiated))
                | (Disconnecting, Disconnected(_))
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Stabilizing => write!(f, "Stabilizing"),
            Self::SubscribingServices => write!(f, "SubscribingServices"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected(reason) => write!(f, "Disconnected ({})", reason),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The state before the change.
    pub previous: ConnectionState,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Holds the single connection state of a supervisor and enforces the
/// transition table.
pub struct ConnectionStateMachine {
    /// Current connection state.
    state: RwLock<ConnectionState>,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionStateMachine {
    /// Create a state machine in [`ConnectionState::Idle`].
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            state: RwLock::new(ConnectionState::Idle),
            event_tx,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Move to `next`, refusing transitions the table does not allow.
    pub fn transition(&self, next: ConnectionState) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if !previous.can_transition_to(&next) {
                warn!("Refusing connection state change: {} -> {}", previous, next);
                return Err(Error::Internal(format!(
                    "illegal state transition {} -> {}",
                    previous, next
                )));
            }
            *state = next;
            previous
        };

        debug!("Connection state changed: {} -> {}", previous, next);

        let _ = self.event_tx.send(ConnectionEvent {
            previous,
            state: next,
        });

        Ok(())
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
