//! Source slot — mutual exclusion token for push-mode base stations
//!
//! At most one `SOURCE` connection may be active at a time (spec §3/§8
//! "Single source" invariant). The Listener performs the test-and-set at
//! dispatch time so a burst of concurrent `SOURCE` attempts can never both
//! be admitted; the winning Source Acceptor holds a [`SlotGuard`] for the
//! life of its connection and the slot is released automatically when the
//! guard drops, regardless of which exit path the handler takes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared exclusive token; `Empty` when no source is attached
#[derive(Clone)]
pub struct SourceSlot {
    occupied: Arc<AtomicBool>,
}

impl SourceSlot {
    pub fn new() -> Self {
        SourceSlot {
            occupied: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempt to transition `Empty -> Occupied`. Returns a guard on
    /// success; `None` if already occupied (caller replies 409).
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                occupied: self.occupied.clone(),
            })
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }
}

impl Default for SourceSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle held by the Source Acceptor for as long as it owns the slot
pub struct SlotGuard {
    occupied: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.occupied.store(false, Ordering::Release);
    }
}
