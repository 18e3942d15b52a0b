use std::sync::Arc;
use std::{fmt, ops};

use crate::socket::Socket;

/// Callback invoked by the reactor when one or more requested events fire.
///
/// The first argument is the socket the events belong to, the second the
/// set of events being delivered. The callback runs on the reactor thread
/// while the registry lock is held: registry operations (including
/// [`register`] and [`deregister`]) are safe to call from inside it, but
/// blocking is not.
///
/// [`register`]: crate::register
/// [`deregister`]: crate::deregister
pub type AsyncCallback = Arc<dyn Fn(&Arc<Socket>, EventMask) + Send + Sync + 'static>;

// These must be unique.
const READ: u16 = 0x0001;
const WRITE: u16 = 0x0002;
const CONNECT: u16 = 0x0004;
const ACCEPT: u16 = 0x0008;
const CLOSE: u16 = 0x0010;
const CONNFAIL: u16 = 0x0020;
const PRIORITY: u16 = 0x0040;
const ERROR: u16 = 0x0080;
const INVALID: u16 = 0x0100;
const OOBREAD: u16 = 0x0200;
const OOBWRITE: u16 = 0x0400;

const ALL: u16 = 0x07ff;

/// A set of semantic socket events.
///
/// Used both as the *interest* mask passed to [`register`] and as the set of
/// events delivered to an [`AsyncCallback`]. The mask names what the user
/// wants to hear about; [`EventMask::ERROR`] and [`EventMask::INVALID`] are
/// implicitly monitored regardless of the mask, and [`EventMask::CONNECT`],
/// [`EventMask::ACCEPT`] and [`EventMask::CONNFAIL`] are synthesized by the
/// reactor from read/write readiness on connecting and listening sockets.
///
/// [`register`]: crate::register
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EventMask(u16);

impl EventMask {
    /// The peer sent data; `recv` will not block.
    pub const READ: EventMask = EventMask(READ);

    /// The socket may be written to without blocking.
    pub const WRITE: EventMask = EventMask(WRITE);

    /// An outbound connection attempt completed successfully.
    pub const CONNECT: EventMask = EventMask(CONNECT);

    /// A listening socket has an inbound connection to accept.
    pub const ACCEPT: EventMask = EventMask(ACCEPT);

    /// The peer closed its end of the connection.
    pub const CLOSE: EventMask = EventMask(CLOSE);

    /// An outbound connection attempt failed.
    pub const CONNFAIL: EventMask = EventMask(CONNFAIL);

    /// Priority data is readable.
    pub const PRIORITY: EventMask = EventMask(PRIORITY);

    /// An error condition exists on the socket.
    pub const ERROR: EventMask = EventMask(ERROR);

    /// The descriptor is not a valid open socket.
    pub const INVALID: EventMask = EventMask(INVALID);

    /// Out-of-band data is readable.
    pub const OOBREAD: EventMask = EventMask(OOBREAD);

    /// Out-of-band data may be written without blocking.
    pub const OOBWRITE: EventMask = EventMask(OOBWRITE);

    /// Every available event.
    pub const ALL: EventMask = EventMask(ALL);

    /// Everything except `WRITE`, `OOBWRITE` and `PRIORITY`.
    ///
    /// The set a long-lived passive socket wants: write readiness holds
    /// nearly always on an idle connection and would busy-spin the callback.
    pub const NORMAL: EventMask =
        EventMask(ALL & !(WRITE | OOBWRITE | PRIORITY));

    /// Returns the empty set.
    pub const fn empty() -> EventMask {
        EventMask(0)
    }

    /// Returns true if no events are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if `self` contains every event in `other`.
    pub const fn contains(self, other: EventMask) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns the union of the two sets. `const` counterpart of `BitOr`.
    pub const fn add(self, other: EventMask) -> EventMask {
        EventMask(self.0 | other.0)
    }

    /// Returns `self` without the events in `other`.
    pub const fn remove(self, other: EventMask) -> EventMask {
        EventMask(self.0 & !other.0)
    }

    pub(crate) const fn bits(self) -> u16 {
        self.0
    }

    pub(crate) const fn from_bits(bits: u16) -> EventMask {
        EventMask(bits & ALL)
    }
}

impl ops::BitOr for EventMask {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        EventMask(self.0 | other.0)
    }
}

impl ops::BitOrAssign for EventMask {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for EventMask {
    type Output = Self;

    #[inline]
    fn bitand(self, other: Self) -> Self {
        EventMask(self.0 & other.0)
    }
}

impl ops::Sub for EventMask {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        EventMask(self.0 & !other.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(u16, &str)] = &[
            (READ, "READ"),
            (WRITE, "WRITE"),
            (CONNECT, "CONNECT"),
            (ACCEPT, "ACCEPT"),
            (CLOSE, "CLOSE"),
            (CONNFAIL, "CONNFAIL"),
            (PRIORITY, "PRIORITY"),
            (ERROR, "ERROR"),
            (INVALID, "INVALID"),
            (OOBREAD, "OOBREAD"),
            (OOBWRITE, "OOBWRITE"),
        ];

        if self.is_empty() {
            return write!(fmt, "(empty)");
        }

        let mut one = false;
        for &(bit, name) in NAMES {
            if self.0 & bit != 0 {
                if one {
                    write!(fmt, " | ")?;
                }
                write!(fmt, "{}", name)?;
                one = true;
            }
        }
        Ok(())
    }
}
