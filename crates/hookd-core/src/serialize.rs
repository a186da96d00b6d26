//! Execution serialization: at most one run per procedure id at a time.
//!
//! Acquisition returns an RAII guard; release happens on drop, so every
//! exit path — success, step failure, timeout, panic unwind — releases
//! the slot. Requests for different ids never block each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{HookdError, Result};
use crate::procedure::BusyPolicy;

/// Per-procedure exclusion slots shared across request tasks.
#[derive(Clone, Default)]
pub struct ExecutionSlots {
    slots: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Held for the duration of one procedure run; dropping it releases the slot.
#[derive(Debug)]
pub struct SlotGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ExecutionSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the slot for `id`.
    ///
    /// With `BusyPolicy::Reject`, a held slot yields `AlreadyRunning`
    /// immediately; with `BusyPolicy::Queue`, the caller waits for the
    /// in-flight run to finish. The outer map lock is only held long
    /// enough to fetch or create the per-id slot, so acquisition on one
    /// id cannot stall another.
    pub async fn acquire(&self, id: &str, policy: BusyPolicy) -> Result<SlotGuard> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = match policy {
            BusyPolicy::Reject => slot
                .try_lock_owned()
                .map_err(|_| HookdError::AlreadyRunning(id.to_string()))?,
            BusyPolicy::Queue => slot.lock_owned().await,
        };

        Ok(SlotGuard { _guard: guard })
    }
}
