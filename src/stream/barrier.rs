//! Two-condition readiness gate
//!
//! An acquisition is ready only when the content hash is known and the
//! playback buffer is downloaded. Both conditions arrive independently and in
//! any order; the gate opens when the second one lands.

use tokio::sync::watch;

/// The conditions the gate waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    ContentHash,
    Playback,
}

impl Readiness {
    fn bit(self) -> u8 {
        match self {
            Readiness::ContentHash => 0b01,
            Readiness::Playback => 0b10,
        }
    }
}

const OPEN: u8 = 0b11;

/// Opens once both [`Readiness`] conditions are satisfied
#[derive(Debug)]
pub struct ReadinessGate {
    state: watch::Sender<u8>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(0);
        Self { state }
    }

    /// Mark a condition satisfied; returns true the first time only
    pub fn satisfy(&self, condition: Readiness) -> bool {
        let mut first = false;
        self.state.send_modify(|bits| {
            first = *bits & condition.bit() == 0;
            *bits |= condition.bit();
        });
        first
    }

    pub fn is_satisfied(&self, condition: Readiness) -> bool {
        *self.state.borrow() & condition.bit() != 0
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == OPEN
    }

    /// Resolves once both conditions are satisfied
    pub async fn opened(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|bits| *bits == OPEN).await;
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
