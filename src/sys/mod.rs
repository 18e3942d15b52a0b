//! Platform-specific plumbing. Everything that touches raw descriptors,
//! `poll(2)` flags, or `sockaddr` layouts lives below this module.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use self::unix::*;

#[cfg(not(unix))]
compile_error!("sockwatch only supports unix targets for now");
