use tokio::sync::watch;

/// Publishing gate driven by `channel.flow`. Open means publishing is allowed.
pub(crate) struct FlowGate {
    tx: watch::Sender<bool>,
}

impl FlowGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    pub fn set(&self, active: bool) {
        self.tx.send_replace(active);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the gate is open. Shutdown opens the gate, so callers
    /// must check the channel state afterwards.
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time;

    use super::FlowGate;

    #[tokio::test]
    async fn test_gate_blocks_until_open() {
        let gate = Arc::new(FlowGate::new());
        time::timeout(Duration::from_millis(100), gate.wait_open())
            .await
            .unwrap();

        gate.set(false);
        assert!(!gate.is_open());
        assert!(time::timeout(Duration::from_millis(50), gate.wait_open())
            .await
            .is_err());

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_open().await }
        });
        gate.set(true);
        time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
