//! Run-level cancellation.

use tokio::sync::watch;

/// Cancels an in-flight policy run. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    tx: watch::Sender<bool>,
}

/// Checked by the executor between pairs.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl RunCancellation {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        RunCancellation::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}
