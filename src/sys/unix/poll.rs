use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::event::EventMask;

/// Whether the target's `poll(2)` reports `POLLRDHUP`.
///
/// Where it does, a peer shutdown surfaces as a distinct flag and the
/// translator maps it straight to [`EventMask::CLOSE`]. Everywhere else the
/// reactor falls back to a one-byte `MSG_PEEK` to tell a half-closed
/// connection apart from ordinary readable data (see [`is_closed_conn`]).
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const HAS_POLLRDHUP: bool = true;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) const HAS_POLLRDHUP: bool = false;

/// Translates a semantic event mask into `poll(2)` input flags.
///
/// `ERROR` and `INVALID` have no input flags; `POLLERR`, `POLLHUP` and
/// `POLLNVAL` are always reported by the kernel regardless of `events`.
pub(crate) fn mask_to_poll(mask: EventMask) -> libc::c_short {
    let mut flags = 0;

    if mask.contains(EventMask::READ) {
        flags |= libc::POLLRDNORM;
    }

    if mask.contains(EventMask::WRITE) {
        flags |= libc::POLLWRNORM;
    }

    if mask.contains(EventMask::OOBREAD) {
        flags |= libc::POLLRDBAND;
    }

    if mask.contains(EventMask::OOBWRITE) {
        flags |= libc::POLLWRBAND;
    }

    if mask.contains(EventMask::PRIORITY) {
        flags |= libc::POLLPRI;
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if mask.contains(EventMask::CLOSE) {
        flags |= libc::POLLRDHUP;
    }

    flags
}

/// Translates `poll(2)` output flags into semantic events.
pub(crate) fn poll_to_mask(flags: libc::c_short) -> EventMask {
    let mut mask = EventMask::empty();

    if flags & libc::POLLRDNORM != 0 {
        mask |= EventMask::READ;
    }

    if flags & libc::POLLWRNORM != 0 {
        mask |= EventMask::WRITE;
    }

    if flags & libc::POLLRDBAND != 0 {
        mask |= EventMask::OOBREAD;
    }

    if flags & libc::POLLWRBAND != 0 {
        mask |= EventMask::OOBWRITE;
    }

    if flags & libc::POLLPRI != 0 {
        mask |= EventMask::PRIORITY;
    }

    if flags & libc::POLLHUP != 0 {
        mask |= EventMask::CLOSE;
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if flags & libc::POLLRDHUP != 0 {
        mask |= EventMask::CLOSE;
    }

    if flags & libc::POLLERR != 0 {
        mask |= EventMask::ERROR;
    }

    if flags & libc::POLLNVAL != 0 {
        mask |= EventMask::INVALID;
    }

    mask
}

/// Blocks in `poll(2)` for at most `timeout`, retrying on `EINTR`.
pub(crate) fn poll(
    fds: &mut [libc::pollfd],
    timeout: Duration,
) -> io::Result<usize> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    loop {
        let res = syscall!(poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms,
        ));

        match res {
            Ok(num_events) => break Ok(num_events as usize),
            Err(ref e)
                if e.raw_os_error() == Some(libc::EINTR)
                    || e.raw_os_error() == Some(libc::EAGAIN) =>
            {
                continue
            }
            Err(e) => break Err(e),
        }
    }
}

/// Zero-timeout readiness probe for a single descriptor.
pub(crate) fn readiness_probe(
    fd: RawFd,
    events: libc::c_short,
) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd,
        events,
        revents: 0,
    }];
    let n = poll(&mut fds, Duration::ZERO)?;
    Ok(n > 0 && fds[0].revents & events != 0)
}

/// Returns true if the peer has shut down the connection.
///
/// Some kernels insist upon spamming read events once the peer closes its
/// end, prodding you to do a read, get zero back, and close the socket. A
/// one-byte non-blocking peek tells that state apart from readable data
/// without consuming anything.
pub(crate) fn is_closed_conn(fd: RawFd) -> bool {
    let mut buf = [0u8; 1];
    let res = unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };

    match res {
        0 => true,
        -1 => matches!(
            io::Error::last_os_error().raw_os_error(),
            Some(libc::ENETDOWN)
                | Some(libc::ENOTCONN)
                | Some(libc::ECONNREFUSED)
                | Some(libc::ESHUTDOWN)
                | Some(libc::ECONNABORTED)
                | Some(libc::ECONNRESET)
                | Some(libc::ENETUNREACH)
                | Some(libc::ENETRESET)
                | Some(libc::EHOSTDOWN)
                | Some(libc::EHOSTUNREACH)
        ),
        _ => false,
    }
}
