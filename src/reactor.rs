//! The async engine: process-wide lifecycle, registration, and the reactor
//! thread that turns `poll(2)` readiness into user callbacks.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{check_io, fail, ErrorKind, Result};
use crate::event::{AsyncCallback, EventMask};
use crate::registry::Registry;
use crate::socket::Socket;
use crate::sys;

/// Published once initialization completes; zero otherwise.
const MAGIC: u32 = 0x5357_4154;

/// Upper bound on how long the reactor blocks in `poll(2)`, so the `die`
/// flag is observed promptly during cleanup.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the reactor naps when nothing is registered.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

struct Engine {
    /// Zero before init, [`MAGIC`] after; cleared again by cleanup.
    magic: AtomicU32,
    /// Serializes init/cleanup transitions.
    init_lock: Mutex<()>,
    registry: Registry,
    /// Tells the reactor thread to exit.
    die: AtomicBool,
    reactor: Mutex<Option<thread::JoinHandle<()>>>,
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

fn engine() -> &'static Engine {
    ENGINE.get_or_init(|| Engine {
        magic: AtomicU32::new(0),
        init_lock: Mutex::new(()),
        registry: Registry::new(),
        die: AtomicBool::new(false),
        reactor: Mutex::new(None),
    })
}

fn running(engine: &Engine) -> bool {
    engine.magic.load(Ordering::Acquire) == MAGIC
        && !engine.die.load(Ordering::Acquire)
}

/// Initializes the library and starts the reactor thread.
///
/// Must be called exactly once before any socket is registered; a second
/// call without an intervening [`cleanup`] fails with
/// [`ErrorKind::AlreadyInitialized`].
pub fn init() -> Result<()> {
    let engine = engine();
    let _transition = engine.init_lock.lock();

    if engine.magic.load(Ordering::Acquire) == MAGIC {
        return fail(ErrorKind::AlreadyInitialized);
    }

    engine.die.store(false, Ordering::Release);
    let handle = check_io(
        thread::Builder::new()
            .name("sockwatch-reactor".into())
            .spawn(|| run(self::engine())),
    )?;
    *engine.reactor.lock() = Some(handle);

    engine.magic.store(MAGIC, Ordering::Release);
    debug!("async I/O initialization succeeded");
    Ok(())
}

/// Stops the reactor thread and tears the library back down.
///
/// Joins the reactor, logs a diagnostic for every socket still registered,
/// and empties the registry. Registered handles are not closed or freed;
/// they remain owned by the caller. No callbacks fire after `cleanup`
/// returns.
pub fn cleanup() -> Result<()> {
    let engine = engine();
    let _transition = engine.init_lock.lock();

    if engine.magic.load(Ordering::Acquire) != MAGIC {
        return fail(ErrorKind::NotInitialized);
    }

    engine.die.store(true, Ordering::Release);
    if let Some(handle) = engine.reactor.lock().take() {
        if handle.join().is_err() {
            error!("reactor thread panicked");
        }
    }

    for (sd, _) in engine.registry.drain() {
        warn!("dangling socket {} still registered at cleanup", sd);
    }

    engine.magic.store(0, Ordering::Release);
    debug!("async I/O clean up succeeded");
    Ok(())
}

/// Registers, re-registers, or deregisters a socket for event delivery.
///
/// With a non-empty `mask`, `callback` must be present; the socket is
/// switched to non-blocking mode on first registration, and an existing
/// registration has its mask and callback replaced atomically. With an
/// empty `mask` the socket is deregistered (see [`deregister`]) and
/// `callback` is ignored; deregistering a socket that is not registered
/// fails with [`ErrorKind::NotRegistered`].
pub fn register(
    socket: &Arc<Socket>,
    callback: Option<AsyncCallback>,
    mask: EventMask,
) -> Result<()> {
    let engine = engine();
    if !running(engine) {
        return fail(ErrorKind::AsyncNotInitialized);
    }
    if socket.is_closed() {
        return fail(ErrorKind::BadSocket);
    }
    if !mask.is_empty() && callback.is_none() {
        return fail(ErrorKind::InvalidArgument);
    }

    let sd = socket.descriptor();
    let _registry = engine.registry.lock();

    if mask.is_empty() {
        if engine.registry.remove(sd) {
            debug!("removed socket {} from registry", sd);
            Ok(())
        } else {
            fail(ErrorKind::NotRegistered)
        }
    } else if engine.registry.contains(sd) {
        socket.set_event_mask(mask);
        socket.set_callback(callback);
        debug!("updated socket {} (mask = {:?})", sd, mask);
        Ok(())
    } else {
        socket.set_nonblocking(true)?;
        socket.set_event_mask(mask);
        socket.set_callback(callback);
        engine.registry.add(sd, socket);
        debug!("registered socket {} (mask = {:?})", sd, mask);
        Ok(())
    }
}

/// Removes a socket from event delivery. The handle is untouched.
pub fn deregister(socket: &Arc<Socket>) -> Result<()> {
    register(socket, None, EventMask::empty())
}

/// Drops any registry entry for `sd`. Used by close/drop paths; absence is
/// not an error.
pub(crate) fn forget(sd: RawFd) {
    if let Some(engine) = ENGINE.get() {
        if engine.registry.remove(sd) {
            debug!("removed socket {} from registry", sd);
        }
    }
}

/// The reactor loop.
///
/// Each pass snapshots the registry into a flat pollfd array, blocks in
/// `poll(2)` *without* the registry lock so user threads can mutate the
/// registry meanwhile, then re-acquires the lock, translates readiness and
/// dispatches callbacks under it.
fn run(engine: &'static Engine) {
    debug!("reactor thread running");

    while !engine.die.load(Ordering::Acquire) {
        let registry = engine.registry.lock();
        let watches = engine.registry.poll_set();
        if watches.is_empty() {
            drop(registry);
            thread::sleep(IDLE_SLEEP);
            thread::yield_now();
            continue;
        }

        let mut fds: Vec<libc::pollfd> = watches
            .iter()
            .map(|&(fd, mask)| libc::pollfd {
                fd,
                events: sys::mask_to_poll(mask),
                revents: 0,
            })
            .collect();
        drop(registry);

        let res = sys::poll(&mut fds, POLL_TIMEOUT);

        let registry = engine.registry.lock();
        match res {
            Ok(0) => {}
            Ok(_) => {
                for pollfd in &fds {
                    if pollfd.revents == 0 {
                        continue;
                    }
                    // The entry may have been removed while the lock was
                    // released; that is not an error.
                    let socket = match engine.registry.find(pollfd.fd) {
                        Some(socket) => socket,
                        None => continue,
                    };
                    let events = sys::poll_to_mask(pollfd.revents);
                    if !events.is_empty() {
                        dispatch(engine, pollfd.fd, &socket, events);
                    }
                }
            }
            Err(err) => error!("poll failed: {}", err),
        }
        drop(registry);

        thread::yield_now();
    }

    debug!("reactor thread exiting");
}

/// Turns translated readiness into user-facing events for one socket and
/// invokes its callback, then removes the entry if the pass was terminal.
///
/// Runs with the registry lock held.
fn dispatch(engine: &Engine, sd: RawFd, socket: &Arc<Socket>, mut events: EventMask) {
    let mut delivered = EventMask::empty();
    let wants = |event| socket.event_mask().contains(event);

    if events.contains(EventMask::READ) && wants(EventMask::READ) {
        if socket.is_listening() {
            delivered |= EventMask::ACCEPT;
        } else if socket.is_connecting() {
            delivered |= connect_edge(socket, &mut events);
        } else if !sys::HAS_POLLRDHUP && sys::is_closed_conn(sd) {
            // Kernels without POLLRDHUP report a peer shutdown as an
            // ordinary read event; reclassify it.
            delivered |= EventMask::CLOSE;
        } else {
            delivered |= EventMask::READ;
        }
    }

    if events.contains(EventMask::OOBREAD) && wants(EventMask::OOBREAD) {
        delivered |= EventMask::OOBREAD;
    }

    if events.contains(EventMask::WRITE) && wants(EventMask::WRITE) {
        if socket.is_connecting() {
            delivered |= connect_edge(socket, &mut events);
        } else {
            delivered |= EventMask::WRITE;
        }
    }

    if events.contains(EventMask::OOBWRITE) && wants(EventMask::OOBWRITE) {
        delivered |= EventMask::OOBWRITE;
    }

    if events.contains(EventMask::CLOSE) && wants(EventMask::CLOSE) {
        delivered |= EventMask::CLOSE;
    }

    if events.contains(EventMask::PRIORITY) && wants(EventMask::PRIORITY) {
        delivered |= EventMask::PRIORITY;
    }

    if events.contains(EventMask::ERROR) && wants(EventMask::ERROR) {
        delivered |= EventMask::ERROR;
    }

    if events.contains(EventMask::INVALID) && wants(EventMask::INVALID) {
        delivered |= EventMask::INVALID;
    }

    let terminal = EventMask::CLOSE | EventMask::INVALID;
    let terminal = !((events | delivered) & terminal).is_empty();

    if !delivered.is_empty() {
        if let Some(callback) = socket.callback() {
            debug!("events {:?} for socket {}", delivered, sd);
            callback(socket, delivered);
        }
    }

    if terminal {
        // The callback is expected to have closed (and possibly dropped)
        // the socket; either way the entry goes. The handle itself belongs
        // to the user.
        if engine.registry.remove(sd) {
            debug!("removed socket {} from registry (closed/invalid)", sd);
        }
    }
}

/// Resolves a pending connect: CONNECT on a clean write/read edge, CONNFAIL
/// if the kernel flagged an error or hangup. Either way the connecting bit
/// is cleared and WRITE leaves the mask; connect completion is a one-shot
/// edge and re-enabling WRITE is the user's call.
fn connect_edge(socket: &Arc<Socket>, events: &mut EventMask) -> EventMask {
    let fired = if events.contains(EventMask::CLOSE) || events.contains(EventMask::ERROR)
    {
        // Suppress the generic ERROR delivery; CONNFAIL is the event.
        *events = events.remove(EventMask::ERROR);
        if let Ok(code) = socket.pending_error() {
            if code != 0 {
                debug!(
                    "socket {}: connect failed with os error {}",
                    socket.descriptor(),
                    code
                );
            }
        }
        EventMask::CONNFAIL
    } else {
        EventMask::CONNECT
    };

    socket.clear_event_bits(EventMask::WRITE);
    socket.clear_connecting();
    fired
}
