//! Broadcast Hub — single-producer / many-consumer RTCM fan-out
//!
//! One producer (the active Upstream Client or Source Acceptor) publishes
//! opaque byte chunks; many Rover Handlers subscribe and pump them out to
//! their sockets. `publish` never blocks on a slow consumer: the ring
//! simply evicts its oldest chunk, and any subscriber whose cursor still
//! pointed at that chunk is reported `dropped` on its next `next()` call.
//!
//! Built directly on the ring-buffer-with-eviction contract spec §4.1
//! describes, using a plain `Mutex`-guarded ring plus a `tokio::sync::Notify`
//! to wake waiters — the same "register interest, check condition, wait"
//! idiom `tokio::sync::Notify` is designed for.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// Default ring capacity (spec §3: "default capacity 100")
pub const DEFAULT_CAPACITY: usize = 100;

/// Outcome of a [`Hub::next`] call
#[derive(Debug, Clone)]
pub enum NextResult {
    /// A chunk was available and has been consumed
    Chunk(Arc<[u8]>),
    /// No chunk arrived before the deadline
    Timeout,
    /// The subscriber's cursor fell behind the ring and was evicted; the
    /// caller must disconnect
    Dropped,
}

/// A subscriber's position in the stream
#[derive(Debug)]
pub struct Cursor {
    id: u64,
}

struct State {
    capacity: usize,
    ring: VecDeque<Arc<[u8]>>,
    /// Sequence number of `ring.front()`; chunks before this have been evicted
    base_seq: u64,
    /// Sequence number that will be assigned to the next published chunk
    write_seq: u64,
    /// subscriber id -> next sequence number it expects
    cursors: HashMap<u64, u64>,
    next_id: u64,
}

impl State {
    fn new(capacity: usize) -> Self {
        State {
            capacity,
            ring: VecDeque::with_capacity(capacity),
            base_seq: 0,
            write_seq: 0,
            cursors: HashMap::new(),
            next_id: 0,
        }
    }
}

/// Shared handle to a station's Broadcast Hub
///
/// Cheap to clone; all clones share the same ring and cursor set.
#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Hub {
            state: Arc::new(Mutex::new(State::new(capacity.max(1)))),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Publish a chunk. Never blocks on subscribers; evicts the oldest
    /// chunk if the ring is full.
    pub fn publish(&self, chunk: impl Into<Arc<[u8]>>) {
        {
            let mut state = self.state.lock().expect("hub mutex poisoned");
            if state.ring.len() == state.capacity {
                state.ring.pop_front();
                state.base_seq += 1;
            }
            state.ring.push_back(chunk.into());
            state.write_seq += 1;
        }
        self.notify.notify_waiters();
    }

    /// Subscribe; the returned cursor starts at the current write position,
    /// so only chunks published after this call are ever delivered — the
    /// subscriber never sees history, including any pre-reset stale data
    /// still sitting in the ring.
    pub fn subscribe(&self) -> Cursor {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        let id = state.next_id;
        state.next_id += 1;
        state.cursors.insert(id, state.write_seq);
        Cursor { id }
    }

    pub fn unsubscribe(&self, cursor: &Cursor) {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        state.cursors.remove(&cursor.id);
    }

    /// Wait up to `deadline` for the next chunk on `cursor`
    pub async fn next(&self, cursor: &Cursor, deadline: Duration) -> NextResult {
        match timeout(deadline, self.wait_for_next(cursor)).await {
            Ok(result) => result,
            Err(_) => NextResult::Timeout,
        }
    }

    async fn wait_for_next(&self, cursor: &Cursor) -> NextResult {
        loop {
            // Register interest before inspecting state, so a publish that
            // races with the check below is never missed.
            let notified = self.notify.notified();

            {
                let mut state = self.state.lock().expect("hub mutex poisoned");
                let Some(&expected) = state.cursors.get(&cursor.id) else {
                    return NextResult::Dropped;
                };

                if expected < state.base_seq {
                    state.cursors.remove(&cursor.id);
                    return NextResult::Dropped;
                }

                if expected < state.write_seq {
                    let idx = (expected - state.base_seq) as usize;
                    let chunk = state.ring[idx].clone();
                    state.cursors.insert(cursor.id, expected + 1);
                    return NextResult::Chunk(chunk);
                }
            }

            notified.await;
        }
    }

    /// Reset the write-sequence baseline so that a freshly attached source
    /// discards anything left over from a previous source. Used by the
    /// Source Acceptor on a successful push-mode handshake (spec §4.3/§9);
    /// deliberately *not* called on pull-mode upstream reconnects (spec §9
    /// Open Question — already-buffered corrections should survive brief
    /// upstream blips).
    ///
    /// Concretely this just evicts the whole ring: chunks queued by the
    /// previous source are gone, so the next `subscribe()` starts clean and
    /// any cursor still lagging behind the old backlog is reported
    /// `dropped` rather than fed stale data.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("hub mutex poisoned");
        state.ring.clear();
        state.base_seq = state.write_seq;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new(DEFAULT_CAPACITY)
    }
}
