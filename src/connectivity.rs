//! Online/offline signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Observable connectivity flag. Clones share the same channel.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag. Subscribers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let signal = ConnectivitySignal::new(true);
        let mut rx = signal.subscribe();

        signal.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());

        // Same value again does not wake anyone.
        signal.set_online(false);
        assert!(!rx.has_changed().unwrap());
    }
}
