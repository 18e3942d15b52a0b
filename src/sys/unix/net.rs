use std::io;
use std::mem::{size_of, MaybeUninit};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;

/// A `sockaddr` large enough for either address family, passable to libc by
/// pointer.
#[repr(C)]
pub(crate) union SocketAddrCRepr {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
}

impl SocketAddrCRepr {
    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        self as *const _ as *const libc::sockaddr
    }
}

/// Converts a `SocketAddr` into its C representation plus length.
pub(crate) fn socket_addr(addr: &SocketAddr) -> (SocketAddrCRepr, libc::socklen_t) {
    match addr {
        SocketAddr::V4(ref addr) => {
            let sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.ip().octets()),
            };

            let sockaddr_in = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: addr.port().to_be(),
                sin_addr,
                sin_zero: [0; 8],
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd"
                ))]
                sin_len: 0,
            };

            let sockaddr = SocketAddrCRepr { v4: sockaddr_in };
            (sockaddr, size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(ref addr) => {
            let sockaddr_in6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: addr.port().to_be(),
                sin6_addr: libc::in6_addr {
                    s6_addr: addr.ip().octets(),
                },
                sin6_flowinfo: addr.flowinfo(),
                sin6_scope_id: addr.scope_id(),
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd"
                ))]
                sin6_len: 0,
                #[cfg(any(target_os = "illumos", target_os = "solaris"))]
                __sin6_src_id: 0,
            };

            let sockaddr = SocketAddrCRepr { v6: sockaddr_in6 };
            (sockaddr, size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

/// Converts a filled `sockaddr_storage` back into a `SocketAddr`.
///
/// # Safety
///
/// `storage` must point to a `sockaddr_storage` initialised by the kernel
/// for an `AF_INET` or `AF_INET6` socket.
pub(crate) unsafe fn to_socket_addr(
    storage: *const libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
    match (*storage).ss_family as libc::c_int {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in = &*(storage as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 = &*(storage as *const libc::sockaddr_in6);
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::ErrorKind::InvalidInput.into()),
    }
}

/// Creates a new socket, close-on-exec where the platform allows.
///
/// The descriptor is left in blocking mode; registration with the async
/// engine switches it to non-blocking.
pub(crate) fn new_socket(
    family: libc::c_int,
    kind: libc::c_int,
    protocol: libc::c_int,
) -> io::Result<RawFd> {
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    let kind = kind | libc::SOCK_CLOEXEC;

    let socket = syscall!(socket(family, kind, protocol))?;

    // Darwin and Solaris do not have SOCK_CLOEXEC; set the flag after the
    // fact and close the descriptor if that fails so it does not leak.
    #[cfg(any(target_os = "ios", target_os = "macos", target_os = "solaris"))]
    syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC)).map_err(|e| {
        let _ = syscall!(close(socket));
        e
    })?;

    Ok(socket)
}

/// Accepts a pending connection, returning the new descriptor and the peer
/// address.
pub(crate) fn accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "openbsd"
    ))]
    let socket = syscall!(accept4(
        fd,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
        libc::SOCK_CLOEXEC,
    ))?;

    // Not all platforms have `accept4(2)`; fall back to `accept` plus an
    // explicit `FD_CLOEXEC`.
    #[cfg(any(
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "solaris",
    ))]
    let socket = {
        let socket = syscall!(accept(
            fd,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
        ))?;
        syscall!(fcntl(socket, libc::F_SETFD, libc::FD_CLOEXEC)).map_err(|e| {
            let _ = syscall!(close(socket));
            e
        })?;
        socket
    };

    let addr = unsafe { to_socket_addr(storage.as_ptr())? };
    Ok((socket, addr))
}

/// Toggles `O_NONBLOCK` on the descriptor, leaving the other status flags
/// alone.
pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    let new = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if new != flags {
        syscall!(fcntl(fd, libc::F_SETFL, new))?;
    }
    Ok(())
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getsockname(
        fd,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
    ))?;
    unsafe { to_socket_addr(storage.as_ptr()) }
}

pub(crate) fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getpeername(
        fd,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
    ))?;
    unsafe { to_socket_addr(storage.as_ptr()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_addr_v4_round_trip() {
        let addr: SocketAddr = "127.0.0.1:6502".parse().unwrap();
        let (repr, len) = socket_addr(&addr);
        assert_eq!(len as usize, size_of::<libc::sockaddr_in>());

        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(
                repr.as_ptr() as *const u8,
                &mut storage as *mut _ as *mut u8,
                len as usize,
            );
            assert_eq!(to_socket_addr(&storage).unwrap(), addr);
        }
    }

    #[test]
    fn socket_addr_v6_round_trip() {
        let addr: SocketAddr = "[::1]:6502".parse().unwrap();
        let (repr, len) = socket_addr(&addr);
        assert_eq!(len as usize, size_of::<libc::sockaddr_in6>());

        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        unsafe {
            std::ptr::copy_nonoverlapping(
                repr.as_ptr() as *const u8,
                &mut storage as *mut _ as *mut u8,
                len as usize,
            );
            assert_eq!(to_socket_addr(&storage).unwrap(), addr);
        }
    }
}
