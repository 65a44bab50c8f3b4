// notmuch-rs doesn't really provide a safe interface
// (https://github.com/vhdirk/notmuch-rs/issues/24) and this wraps the bits notmuchfs needs.

#![allow(clippy::let_unit_value)] // On purpose to catch API changes.

use std::{collections, convert, error, ffi, fmt, marker, ops, os::unix::ffi::OsStrExt as _, path, ptr, str};

#[allow(dead_code)]
#[allow(deref_nullptr)] // https://github.com/rust-lang/rust-bindgen/issues/1651
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(non_upper_case_globals)]
mod private {
  include!(concat!(env!("OUT_DIR"), "/notmuch.rs"));
}

#[derive(Debug)]
pub enum Error {
  Status(private::notmuch_status_t),
  UTF8(str::Utf8Error),
}

impl Error {
  pub fn is_contention(&self) -> bool {
    matches!(
      self,
      Error::Status(private::notmuch_status_t_NOTMUCH_STATUS_XAPIAN_EXCEPTION)
    )
  }

  pub fn is_duplicate_message_id(&self) -> bool {
    matches!(
      self,
      Error::Status(private::notmuch_status_t_NOTMUCH_STATUS_DUPLICATE_MESSAGE_ID)
    )
  }
}

impl convert::From<str::Utf8Error> for Error {
  fn from(error: str::Utf8Error) -> Self {
    Error::UTF8(error)
  }
}

impl fmt::Display for Error {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
    match self {
      Error::Status(status) => {
        let cstr = unsafe { ffi::CStr::from_ptr(private::notmuch_status_to_string(*status)) };
        write!(formatter, "{:?}", cstr)
      }
      Error::UTF8(error) => write!(formatter, "{}", error),
    }
  }
}

impl error::Error for Error {}

// https://doc.rust-lang.org/std/ffi/struct.CStr.html#method.as_ptr
// It is your responsibility to make sure that the underlying memory is not freed too early.
fn str_to_cstring(str: &str) -> Result<ffi::CString, Error> {
  match ffi::CString::new(str) {
    Ok(cstring) => Ok(cstring),
    Err(_) => Err(Error::Status(
      private::notmuch_status_t_NOTMUCH_STATUS_ILLEGAL_ARGUMENT,
    )),
  }
}

fn path_to_cstring(path: &path::Path) -> Result<ffi::CString, Error> {
  if let Some(str) = path.to_str() {
    return str_to_cstring(str);
  }
  Err(Error::Status(
    private::notmuch_status_t_NOTMUCH_STATUS_ILLEGAL_ARGUMENT,
  ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  ReadOnly,
  ReadWrite,
}

impl Mode {
  fn raw(self) -> private::notmuch_database_mode_t {
    match self {
      Mode::ReadOnly => private::notmuch_database_mode_t_NOTMUCH_DATABASE_MODE_READ_ONLY,
      Mode::ReadWrite => private::notmuch_database_mode_t_NOTMUCH_DATABASE_MODE_READ_WRITE,
    }
  }
}

#[derive(Debug)]
pub struct Database(*mut private::notmuch_database_t);

impl ops::Drop for Database {
  fn drop(&mut self) {
    // https://github.com/notmuch/notmuch/blob/master/lib/notmuch.h
    // notmuch_database_close can be called multiple times. Later calls have no effect.
    if let Err(error) = self.close() {
      log::warn!("couldn't close database {error}")
    }
    unsafe { private::notmuch_database_destroy(self.0) }
  }
}

impl Database {
  /// A single open attempt: success, or the raw status for the caller to
  /// act on (retry on contention, exit on anything else — see `session`).
  pub fn try_open(path: &path::Path, mode: Mode) -> Result<Self, Error> {
    let path = path_to_cstring(path)?;
    let mut database = ptr::null_mut();
    match unsafe { private::notmuch_database_open(path.as_ptr(), mode.raw(), &mut database) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(Self(database)),
      status => Err(Error::Status(status)),
    }
  }

  /// Only used by tests, which need a fresh database to index into; the
  /// mount path always opens an existing one (§4.8: `mail_dir` is the
  /// parent of an already-initialized notmuch database directory).
  #[cfg(test)]
  pub fn create(path: &path::Path) -> Result<Self, Error> {
    let path = path_to_cstring(path)?;
    let mut database = ptr::null_mut();
    match unsafe { private::notmuch_database_create(path.as_ptr(), &mut database) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(Self(database)),
      status => Err(Error::Status(status)),
    }
  }

  pub fn needs_upgrade(&self) -> bool {
    unsafe { private::notmuch_database_needs_upgrade(self.0) != 0 }
  }

  pub fn close(&mut self) -> Result<(), Error> {
    match unsafe { private::notmuch_database_close(self.0) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(()),
      status => Err(Error::Status(status)),
    }
  }

  pub fn begin_atomic(&mut self) -> Result<(), Error> {
    match unsafe { private::notmuch_database_begin_atomic(self.0) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(()),
      status => Err(Error::Status(status)),
    }
  }

  pub fn end_atomic(&mut self) -> Result<(), Error> {
    match unsafe { private::notmuch_database_end_atomic(self.0) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(()),
      status => Err(Error::Status(status)),
    }
  }

  /// Build a query over `query`, excluding every tag in `excluded_tags` and
  /// omitting all excluded messages from the result (§4.4).
  pub fn query(&'_ self, query: &str, excluded_tags: &[String]) -> Result<Messages<'_>, Error> {
    let query_cstring = str_to_cstring(query)?;
    let query = unsafe { private::notmuch_query_create(self.0, query_cstring.as_ptr()) };
    if query.is_null() {
      return Err(Error::Status(
        private::notmuch_status_t_NOTMUCH_STATUS_OUT_OF_MEMORY,
      ));
    }
    for tag in excluded_tags {
      let tag = str_to_cstring(tag)?;
      match unsafe { private::notmuch_query_add_tag_exclude(query, tag.as_ptr()) } {
        private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS
        | private::notmuch_status_t_NOTMUCH_STATUS_IGNORED => (),
        status => {
          unsafe { private::notmuch_query_destroy(query) };
          return Err(Error::Status(status));
        }
      }
    }
    let () = unsafe {
      private::notmuch_query_set_omit_excluded(
        query,
        private::notmuch_exclude_t_NOTMUCH_EXCLUDE_ALL,
      )
    };
    let mut messages = ptr::null_mut();
    match unsafe { private::notmuch_query_search_messages(query, &mut messages) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => (),
      status => {
        unsafe { private::notmuch_query_destroy(query) };
        return Err(Error::Status(status));
      }
    }
    // NULL is handled by notmuch_messages_valid.
    Ok(Messages(query, messages, marker::PhantomData))
  }

  // This doesn't look like it needs to be mut: it won't invalidate existing messages.
  pub fn index_message(&'_ self, path: &path::Path) -> Result<Message<'_>, Error> {
    let path = path_to_cstring(path)?;
    let mut message = ptr::null_mut();
    match unsafe {
      private::notmuch_database_index_file(self.0, path.as_ptr(), ptr::null_mut(), &mut message)
    } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS
      | private::notmuch_status_t_NOTMUCH_STATUS_DUPLICATE_MESSAGE_ID => (),
      status => return Err(Error::Status(status)),
    };
    assert!(!message.is_null());
    Ok(Message(message, marker::PhantomData))
  }

  // This doesn't look like it needs to be mut: it won't invalidate existing messages.
  pub fn remove_message(&'_ self, path: &path::Path) -> Result<(), Error> {
    let path = path_to_cstring(path)?;
    match unsafe { private::notmuch_database_remove_message(self.0, path.as_ptr()) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS
      | private::notmuch_status_t_NOTMUCH_STATUS_DUPLICATE_MESSAGE_ID => Ok(()),
      status => Err(Error::Status(status)),
    }
  }

  pub fn find_message_by_filename(
    &'_ self,
    path: &path::Path,
  ) -> Result<Option<Message<'_>>, Error> {
    let path = path_to_cstring(path)?;
    let mut message = ptr::null_mut();
    match unsafe {
      private::notmuch_database_find_message_by_filename(self.0, path.as_ptr(), &mut message)
    } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => (),
      status => return Err(Error::Status(status)),
    };
    Ok(match message.is_null() {
      true => None,
      false => Some(Message(message, marker::PhantomData)),
    })
  }
}

#[derive(Debug)]
pub struct Messages<'a>(
  *mut private::notmuch_query_t,
  *mut private::notmuch_messages_t,
  marker::PhantomData<&'a ()>,
);

impl<'a> ops::Drop for Messages<'a> {
  fn drop(&mut self) {
    let () = unsafe { private::notmuch_query_destroy(self.0) };
  }
}

impl<'a> Messages<'a> {
  pub fn next(&'_ mut self) -> Option<Message<'_>> {
    // https://github.com/notmuch/notmuch/blob/master/lib/notmuch.h
    // When this function returns TRUE, notmuch_messages_get will return a valid object. Whereas
    // when this function returns FALSE, notmuch_messages_get will return NULL.
    match unsafe { private::notmuch_messages_valid(self.1) } {
      0 => None,
      _ => {
        let message = unsafe { private::notmuch_messages_get(self.1) };
        assert!(!message.is_null());
        // Safe: doesn't invalidate anything yet.
        let () = unsafe { private::notmuch_messages_move_to_next(self.1) };
        Some(Message(message, marker::PhantomData))
      }
    }
  }
}

#[derive(Debug)]
pub struct Message<'a>(*mut private::notmuch_message_t, marker::PhantomData<&'a ()>);

impl<'a> ops::Drop for Message<'a> {
  fn drop(&mut self) {
    // https://github.com/notmuch/notmuch/blob/master/lib/notmuch.h
    // If you are finished with a message before its containing query, you can call
    // notmuch_message_destroy to clean up some memory sooner [...]. Otherwise the memory will
    // still be reclaimed when the query is destroyed.
    let () = unsafe { private::notmuch_message_destroy(self.0) };
  }
}

impl<'a> Message<'a> {
  pub fn tags(&'_ self) -> Result<collections::HashSet<&'_ str>, Error> {
    let mut tags = collections::HashSet::new();
    let tags_ = unsafe { private::notmuch_message_get_tags(self.0) };
    // NULL is handled by notmuch_tags_valid.
    while unsafe { private::notmuch_tags_valid(tags_) } != 0 {
      let tag = unsafe {
        let tag = private::notmuch_tags_get(tags_);
        ffi::CStr::from_ptr(tag)
      };
      tags.insert(tag.to_str()?);
      let () = unsafe { private::notmuch_tags_move_to_next(tags_) };
    }
    Ok(tags)
  }

  pub fn add_tag(&mut self, tag: &str) -> Result<(), Error> {
    let tag = str_to_cstring(tag)?;
    match unsafe { private::notmuch_message_add_tag(self.0, tag.as_ptr()) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(()),
      status => Err(Error::Status(status)),
    }
  }

  /// Normalize this message's tags from its current maildir filename
  /// suffix (`:2,FRSP...`). The reverse of `tags_to_maildir_flags`, which
  /// the upstream library also exposes but this program never calls.
  pub fn maildir_flags_to_tags(&mut self) -> Result<(), Error> {
    match unsafe { private::notmuch_message_maildir_flags_to_tags(self.0) } {
      private::notmuch_status_t_NOTMUCH_STATUS_SUCCESS => Ok(()),
      status => Err(Error::Status(status)),
    }
  }

  pub fn id(&'_ self) -> Result<&'_ str, Error> {
    // https://github.com/notmuch/notmuch/blob/master/lib/notmuch.h
    // The returned string belongs to 'message' and will only be valid for as long as the
    // message is valid, (which is until the query from which it derived is destroyed).
    let id = unsafe { private::notmuch_message_get_message_id(self.0) };
    if id.is_null() {
      return Err(Error::Status(
        private::notmuch_status_t_NOTMUCH_STATUS_XAPIAN_EXCEPTION,
      ));
    }
    Ok(unsafe { ffi::CStr::from_ptr(id) }.to_str()?)
  }

  pub fn paths(&self) -> Result<Vec<path::PathBuf>, Error> {
    // It looks like we need to return a copy, metadata invalidation will purge filenames from the
    // message.
    let mut paths = Vec::new();
    let paths_ = unsafe { private::notmuch_message_get_filenames(self.0) };
    while unsafe { private::notmuch_filenames_valid(paths_) } != 0 {
      let path = unsafe {
        let path = private::notmuch_filenames_get(paths_);
        assert!(!path.is_null());
        ffi::OsStr::from_bytes(ffi::CStr::from_ptr(path).to_bytes())
      };
      paths.push(path::Path::new(path).to_path_buf());
      let () = unsafe { private::notmuch_filenames_move_to_next(paths_) };
    }
    Ok(paths)
  }
}
