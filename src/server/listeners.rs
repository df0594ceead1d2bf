// ABOUTME: Listener counter
// ABOUTME: Counts connected listeners and broadcasts every change

use crate::protocol::messages::{ListenersUpdate, Message};
use crate::server::client_manager::ClientManager;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Count of currently connected listeners
///
/// Starts at zero on every process start and is never persisted. A change
/// and its broadcast happen under one lock, so listeners always end on the
/// latest count.
#[derive(Debug)]
pub struct ListenerCounter {
    count: Mutex<u64>,
    /// Disconnects seen while the count was already zero
    underflows: AtomicU64,
    clients: Arc<ClientManager>,
}

impl ListenerCounter {
    /// Create a counter that broadcasts through `clients`
    pub fn new(clients: Arc<ClientManager>) -> Self {
        Self {
            count: Mutex::new(0),
            underflows: AtomicU64::new(0),
            clients,
        }
    }

    /// Current listener count
    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    /// Number of disconnects that would have taken the count below zero
    pub fn underflow_count(&self) -> u64 {
        self.underflows.load(Ordering::SeqCst)
    }

    /// Record a connect and broadcast the new count
    pub fn on_connect(&self) -> u64 {
        self.on_connect_with(|_| {})
    }

    /// Record a connect, run `greet` with the new count, then broadcast it
    ///
    /// `greet` runs before any listener sees the new count, so a joining
    /// socket can be sent its state first. It must not call back into the
    /// counter.
    pub fn on_connect_with<F: FnOnce(u64)>(&self, greet: F) -> u64 {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
        greet(*count);
        self.publish(*count);
        *count
    }

    /// Record a disconnect and broadcast the new count
    ///
    /// Clamps at zero; an unmatched disconnect is counted and logged.
    pub fn on_disconnect(&self) -> u64 {
        let mut count = self.count.lock();
        match count.checked_sub(1) {
            Some(next) => *count = next,
            None => {
                self.underflows.fetch_add(1, Ordering::SeqCst);
                log::error!("Listener disconnect with count already at zero; clamped");
            }
        }
        self.publish(*count);
        *count
    }

    fn publish(&self, count: u64) {
        self.clients
            .broadcast(&Message::ListenersUpdate(ListenersUpdate { count }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::client_manager::{ConnectedClient, ServerMessage};
    use tokio::sync::mpsc;

    #[test]
    fn test_connects_minus_disconnects() {
        let counter = ListenerCounter::new(Arc::new(ClientManager::new()));
        for _ in 0..5 {
            counter.on_connect();
        }
        for _ in 0..3 {
            counter.on_disconnect();
        }
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.underflow_count(), 0);
    }

    #[test]
    fn test_never_negative() {
        let counter = ListenerCounter::new(Arc::new(ClientManager::new()));
        counter.on_connect();
        assert_eq!(counter.on_disconnect(), 0);
        assert_eq!(counter.on_disconnect(), 0);
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.underflow_count(), 1);
    }

    #[test]
    fn test_interleaved_from_threads() {
        let counter = Arc::new(ListenerCounter::new(Arc::new(ClientManager::new())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.on_connect();
                        counter.on_disconnect();
                    }
                    counter.on_connect();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.count(), 8);
    }

    #[test]
    fn test_last_update_matches_count_under_concurrent_connects() {
        for _ in 0..200 {
            let clients = Arc::new(ClientManager::new());
            let (tx, mut rx) = mpsc::unbounded_channel();
            clients.add_client(ConnectedClient::new("observer".into(), tx));
            let counter = Arc::new(ListenerCounter::new(Arc::clone(&clients)));
            let barrier = Arc::new(std::sync::Barrier::new(8));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        counter.on_connect();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let mut seen = Vec::new();
            while let Ok(ServerMessage::Text(text)) = rx.try_recv() {
                match Message::from_json(&text).unwrap() {
                    Message::ListenersUpdate(update) => seen.push(update.count),
                    other => panic!("unexpected {:?}", other),
                }
            }
            assert_eq!(seen, (1..=8).collect::<Vec<u64>>());
            assert_eq!(seen.last().copied(), Some(counter.count()));
        }
    }

    #[test]
    fn test_greeting_precedes_broadcast() {
        let clients = Arc::new(ClientManager::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        clients.add_client(ConnectedClient::new("joiner".into(), tx));

        let counter = ListenerCounter::new(Arc::clone(&clients));
        let mut greeted = None;
        counter.on_connect_with(|count| {
            greeted = Some(count);
            clients.send_to_client("joiner", &Message::GetCurrentState);
        });
        assert_eq!(greeted, Some(1));

        let names: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|ServerMessage::Text(text)| Message::from_json(&text).unwrap().name())
            .collect();
        assert_eq!(names, vec!["get-current-state", "listeners-update"]);
    }

    #[test]
    fn test_change_is_broadcast() {
        let clients = Arc::new(ClientManager::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        clients.add_client(ConnectedClient::new("c1".into(), tx));

        let counter = ListenerCounter::new(Arc::clone(&clients));
        counter.on_connect();

        let ServerMessage::Text(text) = rx.try_recv().unwrap();
        match Message::from_json(&text).unwrap() {
            Message::ListenersUpdate(update) => assert_eq!(update.count, 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
