//! Connection-state broadcast to subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;
use worksync_core::ConnectionState;

type Listener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Broadcasts connection-state transitions to registered listeners.
///
/// Listeners are invoked in registration order. A panicking listener is
/// logged and skipped so it cannot break its siblings.
#[derive(Default)]
pub(crate) struct StateBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

impl StateBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener and immediately deliver the current state.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        current: ConnectionState,
        listener: Listener,
    ) -> StateSubscription {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Arc::clone(&listener)));
            id
        };
        invoke(&listener, current);
        StateSubscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Deliver a transition to every listener.
    pub(crate) fn emit(&self, state: ConnectionState) {
        let listeners: Vec<Listener> = {
            let inner = self.inner.lock().unwrap();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            invoke(&listener, state);
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

fn invoke(listener: &Listener, state: ConnectionState) {
    if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
        warn!(%state, "state listener panicked");
    }
}

/// Registration token returned by
/// [`FileSystemClient::on_state_change`](crate::FileSystemClient::on_state_change).
pub struct StateSubscription {
    bus: Weak<StateBus>,
    id: u64,
}

impl StateSubscription {
    /// Remove the listener. Idempotent; a no-op once the client is gone.
    pub fn cancel(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<ConnectionState>>>, Listener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = Arc::clone(&seen);
            Arc::new(move |state| seen.lock().unwrap().push(state)) as Listener
        };
        (seen, listener)
    }

    #[test]
    fn subscribe_delivers_the_current_state_immediately() {
        let bus = Arc::new(StateBus::new());
        let (seen, listener) = recorder();

        bus.subscribe(ConnectionState::ReconnectWait, listener);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::ReconnectWait]);
    }

    #[test]
    fn transitions_reach_listeners_in_order() {
        let bus = Arc::new(StateBus::new());
        let (seen, listener) = recorder();
        bus.subscribe(ConnectionState::Disconnected, listener);

        bus.emit(ConnectionState::Connecting);
        bus.emit(ConnectionState::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[test]
    fn cancel_stops_delivery_and_is_idempotent() {
        let bus = Arc::new(StateBus::new());
        let (seen, listener) = recorder();
        let subscription = bus.subscribe(ConnectionState::Disconnected, listener);

        subscription.cancel();
        subscription.cancel();
        bus.emit(ConnectionState::Connected);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::Disconnected]);
    }

    #[test]
    fn a_panicking_listener_does_not_break_its_siblings() {
        let bus = Arc::new(StateBus::new());
        bus.subscribe(
            ConnectionState::Disconnected,
            Arc::new(|state| {
                if state == ConnectionState::Connected {
                    panic!("listener bug");
                }
            }),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            bus.subscribe(
                ConnectionState::Disconnected,
                Arc::new(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        bus.emit(ConnectionState::Connected);

        // Immediate delivery plus the transition.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_after_the_bus_is_dropped_is_harmless() {
        let bus = Arc::new(StateBus::new());
        let (_, listener) = recorder();
        let subscription = bus.subscribe(ConnectionState::Disconnected, listener);
        drop(bus);
        subscription.cancel();
    }
}
