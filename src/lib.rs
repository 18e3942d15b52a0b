//! Berkeley sockets with callback-based asynchronous readiness
//! notification.
//!
//! `sockwatch` wraps the platform socket API in a uniform synchronous
//! surface ([`Socket`]) and layers an asynchronous engine on top of it: a
//! background reactor thread multiplexes every registered socket through
//! `poll(2)` and invokes a per-socket callback with the semantic events the
//! user asked for. The engine translates raw readiness into events the
//! platform does not report directly: `CONNECT`/`CONNFAIL` edges for
//! pending non-blocking connects, `ACCEPT` for listeners, and `CLOSE` for
//! peers that went away on platforms with or without `POLLRDHUP`.
//!
//! # Usage
//!
//! Call [`init`] once to start the engine, create sockets, [`register`]
//! them with an event mask and callback, and drive connections from the
//! callback. [`cleanup`] stops the reactor and drops all registrations.
//!
//! ```no_run
//! use sockwatch::{EventMask, Socket};
//! use std::sync::Arc;
//!
//! # fn main() -> sockwatch::Result<()> {
//! sockwatch::init()?;
//!
//! let socket = Socket::new(libc::AF_INET, libc::SOCK_STREAM, 0)?;
//! sockwatch::register(
//!     &socket,
//!     Some(Arc::new(|socket, events| {
//!         if events.contains(EventMask::CONNECT) {
//!             let _ = socket.send(b"hello");
//!         }
//!         if events.contains(EventMask::CLOSE) {
//!             let _ = socket.close();
//!         }
//!     })),
//!     EventMask::CONNECT | EventMask::CLOSE | EventMask::ERROR,
//! )?;
//! socket.connect("127.0.0.1", "6502")?;
//! // ... the callback now runs on the reactor thread ...
//! sockwatch::cleanup()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! Callbacks run on the reactor thread while the registry lock is held.
//! Calling back into [`register`]/[`deregister`] from a callback is
//! supported (the lock is re-entrant); blocking in a callback stalls event
//! delivery for every socket. Events for one socket are serialized; events
//! across sockets are unordered.
//!
//! A socket whose callback received `CLOSE` or `INVALID` is removed from
//! the registry right after the callback returns. The callback should
//! close the socket; the library never frees user handles.
//!
//! # Errors
//!
//! Operations return [`Result`]; every failure is also recorded in a
//! thread-local slot queryable through [`last_error`], including the raw
//! platform code for OS-level failures.

#![warn(missing_docs, missing_debug_implementations)]

#[macro_use]
mod macros;

mod error;
mod event;
pub mod net;
mod reactor;
mod registry;
mod socket;
mod sys;

pub use error::{last_error, Error, ErrorKind, Result};
pub use event::{AsyncCallback, EventMask};
pub use reactor::{cleanup, deregister, init, register};
pub use socket::Socket;
