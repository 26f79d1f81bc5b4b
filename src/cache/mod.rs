//! The cached gatherer: a concurrency-safe store of the last published
//! metric snapshot.
//!
//! Collecting metrics for many entities is expensive, while scrapes can
//! arrive far more often than the underlying state changes. This module
//! decouples the two: a producer repopulates a spare buffer inside an
//! exclusive [`UpdateSession`] and commits it atomically, while any number of
//! readers keep serving the previously published snapshot without blocking.
//!
//! # Buffer lifecycle
//!
//! The gatherer owns exactly two buffers for its whole lifetime. Each moves
//! through `idle → writable → published → draining → idle`:
//!
//! - [`CachedGatherer::begin_update`] takes an idle buffer, resets it and
//!   hands it to the session as the writable buffer.
//! - [`UpdateSession::commit`] publishes the written buffer; the previously
//!   published one becomes idle, or stays draining while [`Snapshot`]s still
//!   reference it.
//! - Dropping the last `Snapshot` of a draining buffer returns it to idle
//!   and wakes a producer waiting for it.
//!
//! Buffer storage is only resized by inserts, never freed between sessions,
//! so steady-state collection over a stable set of series allocates nothing.
//!
//! # Key components
//!
//! - [`CachedGatherer`] — owns the buffers, coordinates sessions and readers.
//! - [`UpdateSession`] — exclusive-writer transaction; commit publishes,
//!   drop-without-commit abandons.
//! - [`Snapshot`] — read handle over the published families; released on
//!   drop.

mod buffer;
mod error;

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use buffer::Buffer;

use crate::metrics::{self, MetricFamily, Sample};

pub use error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    /// The currently published buffer, if any session has committed yet.
    published: Option<Arc<Buffer>>,
    /// Buffers owned by the gatherer but not published. An entry whose
    /// strong count is above one is draining: demoted from published while
    /// readers still hold it.
    idle: Vec<Arc<Buffer>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    /// Signalled whenever a snapshot is released, so a producer waiting for
    /// a draining buffer can re-check.
    drained: Condvar,
    /// Held for the lifetime of an update session; serializes producers.
    writer: Mutex<()>,
    sessions: AtomicU64,
}

/// A concurrency-safe cache of the last committed metric snapshot.
///
/// Create one per process (or per test) and share it behind an [`Arc`];
/// there is no hidden global instance.
#[derive(Debug)]
pub struct CachedGatherer {
    shared: Arc<Shared>,
}

impl CachedGatherer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    published: None,
                    idle: vec![Arc::default(), Arc::default()],
                }),
                drained: Condvar::new(),
                writer: Mutex::new(()),
                sessions: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a handle to the currently published snapshot.
    ///
    /// Never blocks on an in-progress update session: readers always get the
    /// last fully committed snapshot immediately. The snapshot stays valid
    /// until the returned handle is dropped; the gatherer may reuse its
    /// backing storage afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] until the first session commits. Once a
    /// snapshot has been published, gathering cannot fail.
    pub fn gather(&self) -> Result<Snapshot> {
        let state = self.lock_state();
        let families = state.published.as_ref().ok_or(Error::NotReady)?;
        Ok(Snapshot {
            families: Some(Arc::clone(families)),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Opens an exclusive update session, blocking while another session is
    /// open or while both buffers are still held by readers.
    pub fn begin_update(&self) -> UpdateSession<'_> {
        let writer = self.shared.writer.lock().expect("writer lock poisoned");
        let mut state = self.lock_state();
        let buffer = loop {
            match take_idle(&mut state) {
                Some(buffer) => break buffer,
                None => {
                    state = self
                        .shared
                        .drained
                        .wait(state)
                        .expect("cache state lock poisoned");
                }
            }
        };
        UpdateSession {
            shared: &self.shared,
            _writer: writer,
            buffer: Some(buffer),
        }
    }

    /// Fail-fast variant of [`CachedGatherer::begin_update`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionBusy`] instead of blocking when another
    /// session is open or no buffer is free of readers yet.
    pub fn try_begin_update(&self) -> Result<UpdateSession<'_>> {
        let writer = self
            .shared
            .writer
            .try_lock()
            .map_err(|_| Error::SessionBusy)?;
        let mut state = self.lock_state();
        let buffer = take_idle(&mut state).ok_or(Error::SessionBusy)?;
        drop(state);
        Ok(UpdateSession {
            shared: &self.shared,
            _writer: writer,
            buffer: Some(buffer),
        })
    }

    /// Number of committed update sessions over the gatherer's lifetime.
    pub fn sessions_committed(&self) -> u64 {
        self.shared.sessions.load(Ordering::Relaxed)
    }

    /// Number of snapshots currently held by readers.
    ///
    /// A caller that never drops its snapshot shows up here as a count that
    /// never drains back to zero.
    pub fn in_flight_readers(&self) -> usize {
        let state = self.lock_state();
        let published = state
            .published
            .as_ref()
            .map_or(0, |buffer| Arc::strong_count(buffer) - 1);
        let draining: usize = state
            .idle
            .iter()
            .map(|buffer| Arc::strong_count(buffer) - 1)
            .sum();
        published + draining
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().expect("cache state lock poisoned")
    }
}

impl Default for CachedGatherer {
    fn default() -> Self {
        Self::new()
    }
}

/// Takes an idle buffer with no outstanding readers, reset and ready to
/// write. Returns `None` while every spare buffer is still draining.
fn take_idle(state: &mut MutexGuard<'_, State>) -> Option<Arc<Buffer>> {
    let pos = state
        .idle
        .iter()
        .position(|buffer| Arc::strong_count(buffer) == 1)?;
    let mut buffer = state.idle.swap_remove(pos);
    Arc::get_mut(&mut buffer)
        .expect("idle buffer has no other references")
        .reset();
    Some(buffer)
}

/// Exclusive write access to the spare buffer for one collection pass.
///
/// Obtained from [`CachedGatherer::begin_update`]; at most one session is
/// open at a time. [`UpdateSession::commit`] publishes the written buffer;
/// dropping the session without committing abandons it, leaving the
/// previously published snapshot authoritative.
#[derive(Debug)]
pub struct UpdateSession<'g> {
    shared: &'g Shared,
    _writer: MutexGuard<'g, ()>,
    buffer: Option<Arc<Buffer>>,
}

impl UpdateSession<'_> {
    /// Copies one sample into the session's buffer, reusing the storage of
    /// the family/point slot it lands in.
    ///
    /// # Errors
    ///
    /// Returns a [`metrics::Error`] for a malformed sample; only that sample
    /// is rejected, the session remains usable.
    pub fn insert(&mut self, sample: Sample<'_>) -> metrics::Result<()> {
        let buffer = self
            .buffer
            .as_mut()
            .expect("buffer held until commit or abandon");
        Arc::get_mut(buffer)
            .expect("open session holds the sole buffer reference")
            .insert_in_place(sample)
    }

    /// Publishes the written buffer as the new current snapshot.
    ///
    /// The previously published buffer becomes idle, or keeps draining while
    /// readers still hold it. Publication cannot fail.
    pub fn commit(mut self) {
        let buffer = self
            .buffer
            .take()
            .expect("buffer held until commit or abandon");
        let mut state = self.shared.state.lock().expect("cache state lock poisoned");
        if let Some(previous) = state.published.replace(buffer) {
            state.idle.push(previous);
        }
        self.shared.sessions.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for UpdateSession<'_> {
    fn drop(&mut self) {
        // Abandoned without commit: the half-written buffer goes back
        // unpublished and the previous snapshot stays authoritative.
        if let Some(buffer) = self.buffer.take() {
            self.shared
                .state
                .lock()
                .expect("cache state lock poisoned")
                .idle
                .push(buffer);
        }
    }
}

/// A read handle over the published metric families.
///
/// Derefs to `&[MetricFamily]`. The data is only guaranteed valid until the
/// handle drops; serialize it first. Dropping releases the reference and, if
/// this was the last reader of a draining buffer, wakes a waiting producer.
#[derive(Debug)]
pub struct Snapshot {
    families: Option<Arc<Buffer>>,
    shared: Arc<Shared>,
}

impl Snapshot {
    pub fn families(&self) -> &[MetricFamily] {
        self.families
            .as_ref()
            .expect("buffer held until drop")
            .families()
    }
}

impl Deref for Snapshot {
    type Target = [MetricFamily];

    fn deref(&self) -> &Self::Target {
        self.families()
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        drop(self.families.take());
        // Taking the state lock orders this release against a producer's
        // idle-buffer check, so the wakeup below cannot be missed.
        if let Ok(guard) = self.shared.state.lock() {
            drop(guard);
        }
        self.shared.drained.notify_all();
    }
}
