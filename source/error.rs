//! Error kinds shared across the core modules (§7 of the spec).
//!
//! Mirrors the teacher's `notmuch::bindings::Error`: a small hand-rolled enum
//! implementing `std::error::Error` rather than a catch-all `anyhow::Error`,
//! so the FUSE adapter can match on it to pick an errno instead of
//! string-matching.

use std::{error, fmt, io};

#[derive(Debug)]
pub enum Error {
  /// The path didn't classify into a region the caller can act on.
  NotFound,
  /// Rename validation cascade rejected the request (§4.6).
  NotSupported,
  /// Readdir offset contiguity violated (§4.4).
  Domain,
  /// Any other I/O-surfaced failure (backing stat/open/read, index query
  /// create/run failure, atomic section failure).
  Io(io::Error),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::NotFound => write!(f, "no such entry"),
      Error::NotSupported => write!(f, "operation not supported"),
      Error::Domain => write!(f, "discontiguous directory offset"),
      Error::Io(error) => write!(f, "{error}"),
    }
  }
}

impl error::Error for Error {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match self {
      Error::Io(error) => Some(error),
      _ => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(error: io::Error) -> Self {
    Error::Io(error)
  }
}

impl Error {
  /// The errno the FUSE adapter should reply with for this error.
  pub fn errno(&self) -> i32 {
    match self {
      Error::NotFound => libc::ENOENT,
      Error::NotSupported => libc::ENOTSUP,
      Error::Domain => libc::EINVAL,
      Error::Io(error) => error.raw_os_error().unwrap_or(libc::EIO),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
