use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use log::warn;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::event::EventMask;
use crate::socket::Socket;

/// The set of watched sockets: an insertion-ordered map from descriptor to
/// a non-owning handle reference, guarded by one re-entrant mutex.
///
/// The mutex must be re-entrant because event callbacks run while the
/// reactor holds it, and callbacks are allowed to call back into
/// register/deregister. Mutation goes through a `RefCell`; every borrow is
/// dropped before control can reach user code again.
pub(crate) struct Registry {
    sockets: ReentrantMutex<RefCell<IndexMap<RawFd, Weak<Socket>>>>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry {
            sockets: ReentrantMutex::new(RefCell::new(IndexMap::new())),
        }
    }

    /// Acquires the registry lock for a multi-step critical section.
    pub(crate) fn lock(
        &self,
    ) -> ReentrantMutexGuard<'_, RefCell<IndexMap<RawFd, Weak<Socket>>>> {
        self.sockets.lock()
    }

    pub(crate) fn contains(&self, sd: RawFd) -> bool {
        let guard = self.sockets.lock();
        let contains = guard.borrow().contains_key(&sd);
        contains
    }

    /// Appends an entry. The caller must have established that `sd` is not
    /// present; one entry per descriptor is an invariant.
    pub(crate) fn add(&self, sd: RawFd, socket: &Arc<Socket>) {
        let guard = self.sockets.lock();
        let prev = guard.borrow_mut().insert(sd, Arc::downgrade(socket));
        debug_assert!(prev.is_none(), "descriptor {} registered twice", sd);
    }

    /// Looks up the handle for `sd`, if still present and alive.
    pub(crate) fn find(&self, sd: RawFd) -> Option<Arc<Socket>> {
        let guard = self.sockets.lock();
        let socket = guard.borrow().get(&sd).and_then(Weak::upgrade);
        socket
    }

    /// Unlinks the entry for `sd`. The handle itself is untouched.
    pub(crate) fn remove(&self, sd: RawFd) -> bool {
        let guard = self.sockets.lock();
        let removed = guard.borrow_mut().shift_remove(&sd).is_some();
        removed
    }

    pub(crate) fn len(&self) -> usize {
        let guard = self.sockets.lock();
        let len = guard.borrow().len();
        len
    }

    /// Removes and returns every entry, in insertion order.
    pub(crate) fn drain(&self) -> Vec<(RawFd, Weak<Socket>)> {
        let guard = self.sockets.lock();
        let drained = guard.borrow_mut().drain(..).collect();
        drained
    }

    /// Snapshots the live `(descriptor, mask)` pairs for a reactor pass.
    ///
    /// Entries whose handle has been dropped without deregistration are
    /// culled here; their descriptors are already closed and polling them
    /// would only report `POLLNVAL` forever.
    pub(crate) fn poll_set(&self) -> Vec<(RawFd, EventMask)> {
        let guard = self.sockets.lock();
        let mut dead = Vec::new();
        let live: Vec<_> = guard
            .borrow()
            .iter()
            .filter_map(|(&sd, weak)| match weak.upgrade() {
                Some(socket) => Some((sd, socket.event_mask())),
                None => {
                    dead.push(sd);
                    None
                }
            })
            .collect();

        for sd in dead {
            warn!("socket {} dropped while registered; discarding entry", sd);
            guard.borrow_mut().shift_remove(&sd);
        }

        live
    }
}
