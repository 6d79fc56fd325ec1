/// Connectivity tracking with edge-triggered online notification
///
/// The monitor does not own the OS connectivity signal; callers feed
/// observed state into `set_state`. A transition from offline to online
/// (the edge, not the level) emits exactly one notification; repeated
/// "still online" updates are ignored.

use parking_lot::RwLock;
use tokio::sync::mpsc;

use relayq_core::NetworkState;

pub struct NetworkMonitor {
    state: RwLock<NetworkState>,
    transitions: mpsc::UnboundedSender<()>,
}

impl NetworkMonitor {
    /// Create a monitor with an initial state. The returned receiver yields
    /// one unit per offline-to-online transition.
    pub fn new(initial: NetworkState) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: RwLock::new(initial),
                transitions: tx,
            },
            rx,
        )
    }

    /// Current observed state
    pub fn state(&self) -> NetworkState {
        *self.state.read()
    }

    /// True when the monitor currently considers the network usable
    pub fn is_online(&self) -> bool {
        self.state.read().is_online
    }

    /// Record an observed state change. Returns true when this call crossed
    /// the offline-to-online edge (and therefore emitted a notification).
    pub fn set_state(&self, new_state: NetworkState) -> bool {
        let mut state = self.state.write();
        let was_online = state.is_online;
        *state = new_state;
        drop(state);

        let came_online = !was_online && new_state.is_online;
        if came_online {
            tracing::info!("network transitioned online");
            // Receiver dropped means the engine is shutting down.
            let _ = self.transitions.send(());
        }
        came_online
    }
}
