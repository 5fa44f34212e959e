//! First-error-wins fault latch.

use std::sync::OnceLock;

use simcast_common::error::SimcastError;

/// Single-assignment fault slot shared by the producer, the encoder
/// worker, and the orchestrator.
///
/// The first latched error wins; later attempts are dropped. Every loop
/// in the pipeline checks the latch at its yield points, so a fault is
/// observed within one scheduling quantum.
#[derive(Debug, Default)]
pub struct FaultLatch {
    slot: OnceLock<SimcastError>,
}

impl FaultLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `err` unless a fault is already recorded. Returns whether
    /// this call captured the slot.
    pub fn latch(&self, err: SimcastError) -> bool {
        let captured = self.slot.set(err).is_ok();
        if !captured {
            tracing::debug!("fault latch already set; dropping later error");
        }
        captured
    }

    pub fn is_latched(&self) -> bool {
        self.slot.get().is_some()
    }

    /// The captured error, if any.
    pub fn get(&self) -> Option<&SimcastError> {
        self.slot.get()
    }

    /// Owned copy of the captured error, re-wrapped as a pipeline fault.
    pub fn to_error(&self) -> Option<SimcastError> {
        self.get().map(|err| SimcastError::pipeline(err.to_string()))
    }
}
