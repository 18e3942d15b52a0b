use std::mem::{size_of, MaybeUninit};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::fmt;

use log::debug;
use parking_lot::Mutex;

use crate::error::{check_io, fail, ErrorKind, Result};
use crate::event::{AsyncCallback, EventMask};
use crate::net::AddrList;
use crate::{net, reactor, sys};

// Status bits.
const CONNECTING: u8 = 0x01;
const LISTENING: u8 = 0x02;
const CLOSED: u8 = 0x04;

/// Async state embedded in every socket: the event mask the user asked for,
/// the status bitset, and the callback slot. The mask and bits are atomics
/// so the reactor can read them without taking a second lock; the callback
/// mutex is never held across a callback invocation.
struct AsyncState {
    mask: AtomicU16,
    bits: AtomicU8,
    callback: Mutex<Option<AsyncCallback>>,
}

/// A socket handle.
///
/// Owns an operating-system descriptor together with the address family,
/// socket type and protocol it was created with. Handles are created by
/// [`Socket::new`], [`Socket::auto`] or [`Socket::accept`] and shared as
/// `Arc<Socket>`; while a handle is registered for asynchronous events the
/// registry keeps a non-owning (`Weak`) back-reference to it.
///
/// Dropping the last `Arc` deregisters the handle and closes the descriptor
/// if [`close`](Socket::close) was not called first.
pub struct Socket {
    sd: RawFd,
    family: libc::c_int,
    socket_type: libc::c_int,
    protocol: libc::c_int,
    state: AsyncState,
}

impl Socket {
    /// Creates a socket with the given address family, socket type and
    /// protocol, e.g. `(libc::AF_INET, libc::SOCK_STREAM, 0)`.
    pub fn new(
        family: libc::c_int,
        socket_type: libc::c_int,
        protocol: libc::c_int,
    ) -> Result<Arc<Socket>> {
        let sd = check_io(sys::new_socket(family, socket_type, protocol))?;
        Ok(Arc::new(Socket::from_parts(sd, family, socket_type, protocol)))
    }

    /// Creates a socket suitable for reaching `host:service`, resolving the
    /// host and deriving family and type from the first usable address.
    ///
    /// `protocol` is `libc::IPPROTO_TCP`, `libc::IPPROTO_UDP` or `0` (treated
    /// as TCP). Pass `0` as `family` to accept any address family.
    pub fn auto(
        family: libc::c_int,
        protocol: libc::c_int,
        host: &str,
        service: &str,
    ) -> Result<Arc<Socket>> {
        let socket_type = match protocol {
            libc::IPPROTO_UDP => libc::SOCK_DGRAM,
            _ => libc::SOCK_STREAM,
        };

        let addrs = net::resolve(host, service)?;
        let mut last = None;
        for addr in addrs.iter() {
            let addr_family = match addr {
                SocketAddr::V4(..) => libc::AF_INET,
                SocketAddr::V6(..) => libc::AF_INET6,
            };
            if family != 0 && family != addr_family {
                continue;
            }
            match Socket::new(addr_family, socket_type, protocol) {
                Ok(socket) => return Ok(socket),
                Err(err) => last = Some(err),
            }
        }

        match last {
            Some(err) => Err(err),
            None => fail(ErrorKind::InvalidArgument),
        }
    }

    fn from_parts(
        sd: RawFd,
        family: libc::c_int,
        socket_type: libc::c_int,
        protocol: libc::c_int,
    ) -> Socket {
        Socket {
            sd,
            family,
            socket_type,
            protocol,
            state: AsyncState {
                mask: AtomicU16::new(0),
                bits: AtomicU8::new(0),
                callback: Mutex::new(None),
            },
        }
    }

    /// Returns the raw descriptor.
    pub fn descriptor(&self) -> RawFd {
        self.sd
    }

    /// Returns the address family the socket was created with.
    pub fn family(&self) -> libc::c_int {
        self.family
    }

    /// Returns the socket type the socket was created with.
    pub fn socket_type(&self) -> libc::c_int {
        self.socket_type
    }

    /// Returns the protocol the socket was created with.
    pub fn protocol(&self) -> libc::c_int {
        self.protocol
    }

    /// Returns the set of events currently requested for this socket.
    pub fn event_mask(&self) -> EventMask {
        EventMask::from_bits(self.state.mask.load(Ordering::Acquire))
    }

    pub(crate) fn set_event_mask(&self, mask: EventMask) {
        self.state.mask.store(mask.bits(), Ordering::Release);
    }

    fn or_event_mask(&self, mask: EventMask) {
        self.state.mask.fetch_or(mask.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_event_bits(&self, mask: EventMask) {
        self.state.mask.fetch_and(!mask.bits(), Ordering::AcqRel);
    }

    /// Returns true if a non-blocking connect is pending on this socket.
    pub fn is_connecting(&self) -> bool {
        self.state.bits.load(Ordering::Acquire) & CONNECTING != 0
    }

    /// Returns true if the socket is a listener.
    ///
    /// Prefers asking the OS (the descriptor could have been adopted from
    /// elsewhere); platforms without `SO_ACCEPTCONN` fall back to the state
    /// recorded by [`listen`](Socket::listen).
    pub fn is_listening(&self) -> bool {
        #[cfg(not(any(target_os = "ios", target_os = "macos")))]
        if let Ok(flag) =
            self.get_option::<libc::c_int>(libc::SOL_SOCKET, libc::SO_ACCEPTCONN)
        {
            return flag != 0;
        }
        self.state.bits.load(Ordering::Acquire) & LISTENING != 0
    }

    /// Returns true if [`close`](Socket::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.bits.load(Ordering::Acquire) & CLOSED != 0
    }

    pub(crate) fn clear_connecting(&self) {
        self.state.bits.fetch_and(!CONNECTING, Ordering::AcqRel);
    }

    pub(crate) fn callback(&self) -> Option<AsyncCallback> {
        self.state.callback.lock().clone()
    }

    pub(crate) fn set_callback(&self, callback: Option<AsyncCallback>) {
        *self.state.callback.lock() = callback;
    }

    fn check_open(&self) -> Result<RawFd> {
        if self.is_closed() {
            return fail(ErrorKind::BadSocket);
        }
        Ok(self.sd)
    }

    fn family_matches(&self, addr: &SocketAddr) -> bool {
        match addr {
            SocketAddr::V4(..) => self.family == libc::AF_INET,
            SocketAddr::V6(..) => self.family == libc::AF_INET6,
        }
    }

    /// Resolves `host:service` and begins connecting to the first usable
    /// address.
    ///
    /// The connect is initiated exactly as [`connect_addr`] describes; see
    /// there for the pending-connect semantics.
    ///
    /// [`connect_addr`]: Socket::connect_addr
    pub fn connect(&self, host: &str, service: &str) -> Result<()> {
        let addrs = net::resolve(host, service)?;
        self.connect_list(&addrs)
    }

    /// Attempts to connect to each address in turn until one succeeds or is
    /// pending.
    pub fn connect_list(&self, addrs: &AddrList) -> Result<()> {
        self.check_open()?;
        let mut last = None;
        for addr in addrs.iter() {
            if !self.family_matches(&addr) {
                continue;
            }
            match self.connect_addr(addr) {
                Ok(()) => return Ok(()),
                Err(err) => last = Some(err),
            }
        }
        match last {
            Some(err) => Err(err),
            None => fail(ErrorKind::InvalidArgument),
        }
    }

    /// Begins connecting to `addr`.
    ///
    /// On a non-blocking socket the attempt usually returns pending; the
    /// socket is then marked connecting and `WRITE` is added to its event
    /// mask so a registered callback receives `CONNECT` or `CONNFAIL` when
    /// the attempt resolves. On a blocking socket the call completes
    /// in-line and the callback still observes the (immediately ready)
    /// connect edge.
    pub fn connect_addr(&self, addr: SocketAddr) -> Result<()> {
        let sd = self.check_open()?;
        let (raw, len) = sys::socket_addr(&addr);
        match syscall!(connect(sd, raw.as_ptr(), len)) {
            Ok(..) => {}
            Err(err)
                if matches!(
                    err.raw_os_error(),
                    Some(libc::EINPROGRESS) | Some(libc::EAGAIN)
                ) => {}
            Err(err) => return check_io(Err(err)),
        }

        self.or_event_mask(EventMask::WRITE);
        self.state.bits.fetch_or(CONNECTING, Ordering::AcqRel);
        Ok(())
    }

    /// Binds the socket to `addr:service`. The address must be numeric.
    pub fn bind(&self, addr: &str, service: &str) -> Result<()> {
        let sd = self.check_open()?;
        let addrs = net::resolve(addr, service)?;
        let mut last = None;
        for addr in addrs.iter() {
            if !self.family_matches(&addr) {
                continue;
            }
            let (raw, len) = sys::socket_addr(&addr);
            match check_io(syscall!(bind(sd, raw.as_ptr(), len))) {
                Ok(..) => return Ok(()),
                Err(err) => last = Some(err),
            }
        }
        match last {
            Some(err) => Err(err),
            None => fail(ErrorKind::InvalidArgument),
        }
    }

    /// Binds the socket to the wildcard address on the given service port.
    pub fn bind_all(&self, service: &str) -> Result<()> {
        let sd = self.check_open()?;
        let port = net::parse_service(service)?;
        let ip: IpAddr = if self.family == libc::AF_INET6 {
            Ipv6Addr::UNSPECIFIED.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        };
        let (raw, len) = sys::socket_addr(&SocketAddr::new(ip, port));
        check_io(syscall!(bind(sd, raw.as_ptr(), len)).map(drop))
    }

    /// Starts listening for inbound connections.
    ///
    /// Marks the socket listening and adds `READ` to its event mask so a
    /// registered callback receives `ACCEPT` events.
    pub fn listen(&self, backlog: libc::c_int) -> Result<()> {
        let sd = self.check_open()?;
        check_io(syscall!(listen(sd, backlog)))?;
        self.or_event_mask(EventMask::READ);
        self.state.bits.fetch_or(LISTENING, Ordering::AcqRel);
        Ok(())
    }

    /// Accepts a pending inbound connection.
    ///
    /// The returned handle shares this socket's family, type and protocol,
    /// has zeroed async state, and is safe to pass to
    /// [`register`](crate::register).
    pub fn accept(&self) -> Result<(Arc<Socket>, SocketAddr)> {
        let sd = self.check_open()?;
        let (peer, addr) = check_io(sys::accept(sd))?;
        let socket =
            Socket::from_parts(peer, self.family, self.socket_type, self.protocol);
        Ok((Arc::new(socket), addr))
    }

    /// Sends `data`, returning the number of bytes written.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        self.send_with_flags(data, 0)
    }

    /// `send` with explicit `MSG_*` flags (e.g. `libc::MSG_OOB`).
    pub fn send_with_flags(&self, data: &[u8], flags: libc::c_int) -> Result<usize> {
        let sd = self.check_open()?;
        if data.is_empty() {
            return fail(ErrorKind::BadBufferLength);
        }
        let n = check_io(syscall!(send(
            sd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            flags,
        )))?;
        Ok(n as usize)
    }

    /// Receives into `buf`, returning the number of bytes read. Zero means
    /// the peer performed an orderly shutdown.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv_with_flags(buf, 0)
    }

    /// `recv` with explicit `MSG_*` flags (e.g. `libc::MSG_PEEK`).
    pub fn recv_with_flags(&self, buf: &mut [u8], flags: libc::c_int) -> Result<usize> {
        let sd = self.check_open()?;
        if buf.is_empty() {
            return fail(ErrorKind::BadBufferLength);
        }
        let n = check_io(syscall!(recv(
            sd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            flags,
        )))?;
        Ok(n as usize)
    }

    /// Resolves `host:service` and sends the datagram to the first address
    /// matching this socket's family.
    pub fn send_to(&self, host: &str, service: &str, data: &[u8]) -> Result<usize> {
        let addrs = net::resolve(host, service)?;
        let addr = addrs
            .iter()
            .find(|addr| self.family_matches(addr));
        match addr {
            Some(addr) => self.send_to_addr(addr, data),
            None => fail(ErrorKind::InvalidArgument),
        }
    }

    /// Sends the datagram to `addr`.
    pub fn send_to_addr(&self, addr: SocketAddr, data: &[u8]) -> Result<usize> {
        let sd = self.check_open()?;
        if data.is_empty() {
            return fail(ErrorKind::BadBufferLength);
        }
        let (raw, len) = sys::socket_addr(&addr);
        let n = check_io(syscall!(sendto(
            sd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
            raw.as_ptr(),
            len,
        )))?;
        Ok(n as usize)
    }

    /// Receives a datagram, returning the byte count and the sender.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let sd = self.check_open()?;
        if buf.is_empty() {
            return fail(ErrorKind::BadBufferLength);
        }
        let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
        let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let n = check_io(syscall!(recvfrom(
            sd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
        )))?;
        let addr = check_io(unsafe { sys::to_socket_addr(storage.as_ptr()) })?;
        Ok((n as usize, addr))
    }

    /// Shuts down the read half, write half, or both.
    ///
    /// The corresponding events are removed from the socket's mask so a
    /// registered callback stops hearing about directions that can no
    /// longer make progress.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let sd = self.check_open()?;
        let how_raw = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        check_io(syscall!(shutdown(sd, how_raw)))?;

        match how {
            Shutdown::Read => {
                self.clear_event_bits(EventMask::READ);
                self.state.bits.fetch_and(!LISTENING, Ordering::AcqRel);
            }
            Shutdown::Write => {
                self.clear_event_bits(EventMask::WRITE);
                self.state.bits.fetch_and(!CONNECTING, Ordering::AcqRel);
            }
            Shutdown::Both => {
                self.clear_event_bits(EventMask::READ | EventMask::WRITE);
                self.state
                    .bits
                    .fetch_and(!(CONNECTING | LISTENING), Ordering::AcqRel);
            }
        }
        Ok(())
    }

    /// Closes the descriptor.
    ///
    /// The handle is removed from the async registry (if registered) before
    /// the descriptor is closed, so no events are delivered afterwards.
    /// The handle itself stays allocated until the last `Arc` is dropped;
    /// further I/O on it fails with [`ErrorKind::BadSocket`].
    pub fn close(&self) -> Result<()> {
        let sd = self.check_open()?;

        // Remove from the registry first so a reused descriptor value can
        // never alias this entry.
        reactor::forget(sd);

        check_io(syscall!(close(sd)))?;
        debug!("closed socket {} (mask = {:?})", sd, self.event_mask());
        self.state.bits.fetch_or(CLOSED, Ordering::AcqRel);
        self.state
            .bits
            .fetch_and(!(CONNECTING | LISTENING), Ordering::AcqRel);
        Ok(())
    }

    /// Switches the descriptor between blocking and non-blocking mode.
    ///
    /// Registration with the async engine does this implicitly.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let sd = self.check_open()?;
        check_io(sys::set_nonblocking(sd, nonblocking))
    }

    /// Returns true if a `recv` would not block.
    pub fn is_readable(&self) -> bool {
        sys::readiness_probe(self.sd, libc::POLLRDNORM).unwrap_or(false)
    }

    /// Returns true if a `send` would not block.
    pub fn is_writable(&self) -> bool {
        sys::readiness_probe(self.sd, libc::POLLWRNORM).unwrap_or(false)
    }

    /// Returns the number of bytes queued for reading.
    pub fn recv_queue_size(&self) -> Result<usize> {
        let sd = self.check_open()?;
        let mut queued: libc::c_int = 0;
        check_io(syscall!(ioctl(
            sd,
            libc::FIONREAD as _,
            &mut queued as *mut libc::c_int,
        )))?;
        Ok(queued as usize)
    }

    /// Returns the local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let sd = self.check_open()?;
        check_io(sys::local_addr(sd))
    }

    /// Returns the address of the connected peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let sd = self.check_open()?;
        check_io(sys::peer_addr(sd))
    }

    fn set_option<T>(&self, level: libc::c_int, name: libc::c_int, value: T) -> Result<()> {
        let sd = self.check_open()?;
        check_io(
            syscall!(setsockopt(
                sd,
                level,
                name,
                &value as *const T as *const libc::c_void,
                size_of::<T>() as libc::socklen_t,
            ))
            .map(drop),
        )
    }

    fn get_option<T: Copy>(&self, level: libc::c_int, name: libc::c_int) -> Result<T> {
        let sd = self.check_open()?;
        let mut value: MaybeUninit<T> = MaybeUninit::zeroed();
        let mut len = size_of::<T>() as libc::socklen_t;
        check_io(syscall!(getsockopt(
            sd,
            level,
            name,
            value.as_mut_ptr() as *mut libc::c_void,
            &mut len,
        )))?;
        Ok(unsafe { value.assume_init() })
    }

    fn set_flag_option(&self, name: libc::c_int, on: bool) -> Result<()> {
        self.set_option::<libc::c_int>(libc::SOL_SOCKET, name, on as libc::c_int)
    }

    fn get_flag_option(&self, name: libc::c_int) -> Result<bool> {
        self.get_option::<libc::c_int>(libc::SOL_SOCKET, name)
            .map(|flag| flag != 0)
    }

    /// Sets `SO_BROADCAST`.
    pub fn set_broadcast(&self, on: bool) -> Result<()> {
        self.set_flag_option(libc::SO_BROADCAST, on)
    }

    /// Gets `SO_BROADCAST`.
    pub fn broadcast(&self) -> Result<bool> {
        self.get_flag_option(libc::SO_BROADCAST)
    }

    /// Sets `SO_KEEPALIVE`.
    pub fn set_keepalive(&self, on: bool) -> Result<()> {
        self.set_flag_option(libc::SO_KEEPALIVE, on)
    }

    /// Gets `SO_KEEPALIVE`.
    pub fn keepalive(&self) -> Result<bool> {
        self.get_flag_option(libc::SO_KEEPALIVE)
    }

    /// Sets `SO_REUSEADDR`.
    pub fn set_reuseaddr(&self, on: bool) -> Result<()> {
        self.set_flag_option(libc::SO_REUSEADDR, on)
    }

    /// Gets `SO_REUSEADDR`.
    pub fn reuseaddr(&self) -> Result<bool> {
        self.get_flag_option(libc::SO_REUSEADDR)
    }

    /// Sets `SO_OOBINLINE`.
    pub fn set_oobinline(&self, on: bool) -> Result<()> {
        self.set_flag_option(libc::SO_OOBINLINE, on)
    }

    /// Gets `SO_OOBINLINE`.
    pub fn oobinline(&self) -> Result<bool> {
        self.get_flag_option(libc::SO_OOBINLINE)
    }

    /// Sets `SO_LINGER`. `None` disables lingering.
    pub fn set_linger(&self, linger: Option<Duration>) -> Result<()> {
        let linger = libc::linger {
            l_onoff: linger.is_some() as libc::c_int,
            l_linger: linger.map_or(0, |d| d.as_secs() as libc::c_int),
        };
        self.set_option(libc::SOL_SOCKET, libc::SO_LINGER, linger)
    }

    /// Gets `SO_LINGER`.
    pub fn linger(&self) -> Result<Option<Duration>> {
        let linger: libc::linger =
            self.get_option(libc::SOL_SOCKET, libc::SO_LINGER)?;
        if linger.l_onoff == 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(linger.l_linger as u64)))
        }
    }

    /// Sets `SO_SNDBUF`.
    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        self.set_option::<libc::c_int>(
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            size as libc::c_int,
        )
    }

    /// Gets `SO_SNDBUF`.
    pub fn send_buffer_size(&self) -> Result<usize> {
        self.get_option::<libc::c_int>(libc::SOL_SOCKET, libc::SO_SNDBUF)
            .map(|size| size as usize)
    }

    /// Sets `SO_RCVBUF`.
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<()> {
        self.set_option::<libc::c_int>(
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            size as libc::c_int,
        )
    }

    /// Gets `SO_RCVBUF`.
    pub fn recv_buffer_size(&self) -> Result<usize> {
        self.get_option::<libc::c_int>(libc::SOL_SOCKET, libc::SO_RCVBUF)
            .map(|size| size as usize)
    }

    /// Sets `SO_SNDTIMEO`. `None` means block indefinitely.
    pub fn set_send_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_option(libc::SOL_SOCKET, libc::SO_SNDTIMEO, to_timeval(timeout))
    }

    /// Gets `SO_SNDTIMEO`.
    pub fn send_timeout(&self) -> Result<Option<Duration>> {
        self.get_option(libc::SOL_SOCKET, libc::SO_SNDTIMEO)
            .map(from_timeval)
    }

    /// Sets `SO_RCVTIMEO`. `None` means block indefinitely.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_option(libc::SOL_SOCKET, libc::SO_RCVTIMEO, to_timeval(timeout))
    }

    /// Gets `SO_RCVTIMEO`.
    pub fn recv_timeout(&self) -> Result<Option<Duration>> {
        self.get_option(libc::SOL_SOCKET, libc::SO_RCVTIMEO)
            .map(from_timeval)
    }

    /// Returns and clears the pending `SO_ERROR` code; zero means none.
    pub fn pending_error(&self) -> Result<i32> {
        self.get_option::<libc::c_int>(libc::SOL_SOCKET, libc::SO_ERROR)
    }
}

fn to_timeval(timeout: Option<Duration>) -> libc::timeval {
    match timeout {
        Some(d) => libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        },
        None => libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    }
}

fn from_timeval(tv: libc::timeval) -> Option<Duration> {
    if tv.tv_sec == 0 && tv.tv_usec == 0 {
        None
    } else {
        Some(Duration::new(tv.tv_sec as u64, tv.tv_usec as u32 * 1_000))
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!("freeing possibly open socket {}", self.sd);
            reactor::forget(self.sd);
            let _ = syscall!(close(self.sd));
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Socket")
            .field("sd", &self.sd)
            .field("family", &self.family)
            .field("socket_type", &self.socket_type)
            .field("protocol", &self.protocol)
            .field("mask", &self.event_mask())
            .field("connecting", &self.is_connecting())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn tcp_v4() -> Arc<Socket> {
        Socket::new(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap()
    }

    #[test]
    fn create_has_default_state() {
        let s = tcp_v4();
        assert!(s.descriptor() >= 0);
        assert!(s.event_mask().is_empty());
        assert!(!s.is_connecting());
        assert!(!s.is_listening());
        assert!(!s.is_closed());
    }

    #[test]
    fn listen_sets_read_and_listening() {
        let s = tcp_v4();
        s.set_reuseaddr(true).unwrap();
        s.bind("127.0.0.1", "0").unwrap();
        s.listen(8).unwrap();
        assert!(s.is_listening());
        assert!(s.event_mask().contains(EventMask::READ));
    }

    #[test]
    fn connect_marks_pending() {
        let listener = tcp_v4();
        listener.bind("127.0.0.1", "0").unwrap();
        listener.listen(1).unwrap();
        let port = listener.local_addr().unwrap().port();

        let s = tcp_v4();
        s.set_nonblocking(true).unwrap();
        s.connect("127.0.0.1", &port.to_string()).unwrap();
        assert!(s.is_connecting());
        assert!(s.event_mask().contains(EventMask::WRITE));
    }

    #[test]
    fn close_is_terminal() {
        let s = tcp_v4();
        s.close().unwrap();
        assert!(s.is_closed());
        assert_eq!(s.close().unwrap_err().kind(), ErrorKind::BadSocket);
        assert_eq!(s.send(b"x").unwrap_err().kind(), ErrorKind::BadSocket);
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let s = tcp_v4();
        assert_eq!(
            s.send(&[]).unwrap_err().kind(),
            ErrorKind::BadBufferLength
        );
        let mut buf: [u8; 0] = [];
        assert_eq!(
            s.recv(&mut buf).unwrap_err().kind(),
            ErrorKind::BadBufferLength
        );
    }

    #[test]
    fn option_round_trip() {
        let s = tcp_v4();
        s.set_keepalive(true).unwrap();
        assert!(s.keepalive().unwrap());
        s.set_reuseaddr(true).unwrap();
        assert!(s.reuseaddr().unwrap());
        s.set_linger(Some(Duration::from_secs(3))).unwrap();
        assert_eq!(s.linger().unwrap(), Some(Duration::from_secs(3)));
        s.set_linger(None).unwrap();
        assert_eq!(s.linger().unwrap(), None);
        s.set_send_buffer_size(65536).unwrap();
        assert!(s.send_buffer_size().unwrap() >= 65536);
    }

    #[test]
    fn udp_datagram_round_trip() {
        let a = Socket::new(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        let b = Socket::new(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        a.bind("127.0.0.1", "0").unwrap();
        b.bind("127.0.0.1", "0").unwrap();
        let addr = b.local_addr().unwrap();

        a.send_to_addr(addr, b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
