use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::events::{ConnectionId, ServerEvent};
use super::formatter::FormattedMessage;
use super::user_session::UserSession;

/// Fan-out to every live connection.
///
/// Each connection has its own ordered queue, so two messages broadcast in
/// sequence reach every client in that sequence. A dead or backed-up client
/// only loses its own copy.
#[derive(Debug, Default)]
pub struct BroadcastBus {
    connections: DashMap<ConnectionId, Arc<UserSession>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<UserSession>) {
        self.connections.insert(session.id, session);
    }

    /// Stop delivering to a connection. Returns false if it was not present.
    pub fn remove(&self, connection_id: ConnectionId) -> bool {
        self.connections.remove(&connection_id).is_some()
    }

    /// Unicast, used for the history replay on connect.
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(session) = self.connections.get(&connection_id) else {
            debug!(%connection_id, "dropping unicast to unknown connection");
            return false;
        };
        match session.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(%connection_id, error = %e, "failed to send event to connection");
                false
            }
        }
    }

    /// Deliver `message` to every connection, sender included. Returns how
    /// many connections accepted it.
    pub fn broadcast_all(&self, message: &FormattedMessage) -> usize {
        let event = ServerEvent::ChatMessage(message.clone());
        let mut delivered = 0;
        for session in self.connections.iter() {
            match session.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %session.id, error = %e, "failed to broadcast to connection");
                }
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    fn attach(bus: &BroadcastBus, capacity: usize) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        bus.add(Arc::new(UserSession::new(id, tx)));
        (id, rx)
    }

    fn chat(text: &str) -> ServerEvent {
        ServerEvent::ChatMessage(text.into())
    }

    #[test]
    fn test_broadcast_reaches_everyone_in_order() {
        let bus = BroadcastBus::new();
        let (_, mut rx1) = attach(&bus, 8);
        let (_, mut rx2) = attach(&bus, 8);

        assert_eq!(bus.broadcast_all(&"A".into()), 2);
        assert_eq!(bus.broadcast_all(&"B".into()), 2);

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.try_recv().unwrap(), chat("A"));
            assert_eq!(rx.try_recv().unwrap(), chat("B"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dead_connection_does_not_block_others() {
        let bus = BroadcastBus::new();
        let (_, mut rx1) = attach(&bus, 8);
        let (_, dead) = attach(&bus, 8);
        let (_, mut rx3) = attach(&bus, 8);
        drop(dead);

        assert_eq!(bus.broadcast_all(&"hello".into()), 2);
        assert_eq!(rx1.try_recv().unwrap(), chat("hello"));
        assert_eq!(rx3.try_recv().unwrap(), chat("hello"));
        assert_eq!(bus.connection_count(), 3);
    }

    #[test]
    fn test_slow_connection_drops_only_its_copy() {
        let bus = BroadcastBus::new();
        let (_, mut slow) = attach(&bus, 1);
        let (_, mut fast) = attach(&bus, 8);

        bus.broadcast_all(&"1".into());
        assert_eq!(bus.broadcast_all(&"2".into()), 1);

        assert_eq!(slow.try_recv().unwrap(), chat("1"));
        assert!(slow.try_recv().is_err());
        assert_eq!(fast.try_recv().unwrap(), chat("1"));
        assert_eq!(fast.try_recv().unwrap(), chat("2"));
    }

    #[test]
    fn test_send_to_is_unicast() {
        let bus = BroadcastBus::new();
        let (id1, mut rx1) = attach(&bus, 8);
        let (_, mut rx2) = attach(&bus, 8);

        assert!(bus.send_to(id1, chat("only you")));
        assert_eq!(rx1.try_recv().unwrap(), chat("only you"));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_send_to_unknown_or_removed() {
        let bus = BroadcastBus::new();
        let (id, _rx) = attach(&bus, 8);

        assert!(!bus.send_to(Uuid::new_v4(), chat("x")));
        assert!(bus.remove(id));
        assert!(!bus.remove(id));
        assert!(!bus.contains(id));
        assert!(!bus.send_to(id, chat("x")));
        assert_eq!(bus.broadcast_all(&"x".into()), 0);
    }
}
