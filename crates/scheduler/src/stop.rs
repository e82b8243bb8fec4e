//! Cooperative cancellation for the bookkeeper loop.

use tokio::sync::watch;

/// Requests a stop. Dropping the handle stops the loop as well.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

/// Observed by the loop between ticks.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle and signal.
#[must_use]
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopHandle {
    /// Ask every signal holder to stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Another signal connected to this handle.
    #[must_use]
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopSignal {
    /// Whether a stop was requested or the handle is gone.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until a stop is requested or the handle is dropped.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
