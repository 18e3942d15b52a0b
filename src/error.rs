use std::cell::Cell;
use std::panic::Location;
use std::{error, fmt, io};

/// Specialized `Result` type for socket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The category of a failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A required argument was absent.
    NullArgument,
    /// A required string argument was empty.
    BadString,
    /// A handle argument was closed or holds an invalid descriptor.
    BadSocket,
    /// A length argument was zero where positive was required.
    BadBufferLength,
    /// Any other precondition violation.
    InvalidArgument,
    /// A core operation was invoked before [`init`](crate::init).
    NotInitialized,
    /// [`init`](crate::init) was invoked while already initialized.
    AlreadyInitialized,
    /// A registry operation was invoked while the async engine is not
    /// running.
    AsyncNotInitialized,
    /// Deregistration was requested for a descriptor that is not in the
    /// registry.
    NotRegistered,
    /// Reserved for invalid event-mask bit combinations.
    BadEventMask,
    /// An invariant was violated inside the library.
    Internal,
    /// The feature is disabled or unavailable on this target.
    Unavailable,
    /// An OS call failed; the raw platform code is attached.
    Os,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::NullArgument => "required argument was absent",
            ErrorKind::BadString => "invalid string argument",
            ErrorKind::BadSocket => "invalid socket argument",
            ErrorKind::BadBufferLength => "invalid buffer length argument",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotInitialized => "library is not initialized",
            ErrorKind::AlreadyInitialized => "library is already initialized",
            ErrorKind::AsyncNotInitialized => {
                "asynchronous I/O is not initialized"
            }
            ErrorKind::NotRegistered => {
                "socket is not registered for asynchronous I/O events"
            }
            ErrorKind::BadEventMask => "invalid event mask",
            ErrorKind::Internal => "an internal error has occurred",
            ErrorKind::Unavailable => "feature is disabled or unavailable",
            ErrorKind::Os => "platform error",
        }
    }
}

/// An error produced by a socket operation.
///
/// Carries the [`ErrorKind`], the source location of the failing call, and,
/// for [`ErrorKind::Os`], the raw platform error code. Every failing
/// operation also records its error in a thread-local slot readable through
/// [`last_error`]; the value is overwritten by the next failure on the same
/// thread and is never visible to other threads.
#[derive(Copy, Clone)]
pub struct Error {
    kind: ErrorKind,
    location: &'static Location<'static>,
    os: Option<i32>,
}

impl Error {
    #[track_caller]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Error {
            kind,
            location: Location::caller(),
            os: None,
        }
    }

    #[track_caller]
    pub(crate) fn from_io(err: io::Error) -> Error {
        Error {
            kind: ErrorKind::Os,
            location: Location::caller(),
            os: err.raw_os_error(),
        }
    }

    /// Returns the error category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the raw platform code for [`ErrorKind::Os`] errors.
    pub fn os_code(&self) -> Option<i32> {
        self.os
    }

    /// Returns the error message without source information.
    pub fn message(&self) -> String {
        match (self.kind, self.os) {
            (ErrorKind::Os, Some(code)) => format!(
                "platform error code {}: {}",
                code,
                io::Error::from_raw_os_error(code)
            ),
            _ => self.kind.description().to_owned(),
        }
    }

    /// Returns the error message prefixed with the source location of the
    /// failing call.
    pub fn message_ext(&self) -> String {
        format!(
            "Error at {}:{}: {}",
            self.location.file(),
            self.location.line(),
            self.message()
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.message())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = fmt.debug_struct("Error");
        dbg.field("kind", &self.kind)
            .field("location", &format_args!("{}", self.location));
        if let Some(code) = self.os {
            dbg.field("os", &code);
        }
        dbg.finish()
    }
}

impl error::Error for Error {}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err.os {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(io::ErrorKind::Other, err.message()),
        }
    }
}

thread_local! {
    static LAST_ERROR: Cell<Option<Error>> = const { Cell::new(None) };
}

/// Returns the last error recorded on the calling thread, if any.
pub fn last_error() -> Option<Error> {
    LAST_ERROR.with(|slot| slot.get())
}

pub(crate) fn record(err: Error) -> Error {
    LAST_ERROR.with(|slot| slot.set(Some(err)));
    err
}

/// Records `kind` on the calling thread and returns it as `Err`.
#[track_caller]
pub(crate) fn fail<T>(kind: ErrorKind) -> Result<T> {
    Err(record(Error::new(kind)))
}

/// Converts an `io::Result`, recording the failure on the calling thread.
#[track_caller]
pub(crate) fn check_io<T>(res: io::Result<T>) -> Result<T> {
    match res {
        Ok(value) => Ok(value),
        Err(err) => Err(record(Error::from_io(err))),
    }
}
