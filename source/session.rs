//! Index session (C3): a single long-lived, serialized handle to the
//! notmuch database, plus the excluded-tags list captured at mount time.
//!
//! Most operations acquire the session, open a fresh handle in the mode
//! they need, do their work, and let the handle close on drop before
//! releasing the session. The underlying library only tolerates one writer
//! at a time across the whole database, so this program never tries to
//! hold more than one handle open concurrently. A `QUERY cur/` opendir is
//! the one exception: it holds the session for the entire opendir→releasedir
//! span via [`Session::acquire`]/[`Handle`], since its message iterator is
//! only valid while that handle stays open.

use crate::notmuch;
use std::{path, sync, thread, time};

pub use notmuch::Mode as OpenMode;

/// How long to sleep between retries when the index reports contention
/// (another process holding the Xapian write lock). Matches the original's
/// `sleep(1)` loop.
const CONTENTION_RETRY_DELAY: time::Duration = time::Duration::from_secs(1);

pub struct Session {
  backing: path::PathBuf,
  excluded_tags: Vec<String>,
  locked: sync::Mutex<bool>,
  available: sync::Condvar,
}

impl Session {
  pub fn new(backing: path::PathBuf, excluded_tags: Vec<String>) -> sync::Arc<Self> {
    sync::Arc::new(Self {
      backing,
      excluded_tags,
      locked: sync::Mutex::new(false),
      available: sync::Condvar::new(),
    })
  }

  pub fn excluded_tags(&self) -> &[String] {
    &self.excluded_tags
  }

  /// Acquire the session and run `body` against a freshly opened handle in
  /// `mode`, releasing before returning. Blocks on contention forever; a
  /// needs-upgrade database is a fatal condition for the whole process
  /// (§9: corrupting state is worse than exiting).
  pub fn with<B, R>(&self, mode: OpenMode, body: B) -> anyhow::Result<R>
  where
    B: FnOnce(&mut notmuch::Database) -> anyhow::Result<R>,
  {
    self.lock();
    let result = self.open(mode).and_then(|mut database| body(&mut database));
    self.unlock();
    result
  }

  /// Acquire the session and keep it held until the returned [`Handle`] is
  /// dropped, for the span of a single `QUERY cur/` opendir→releasedir
  /// pair (§4.4, §5).
  pub fn acquire(self: &sync::Arc<Self>, mode: OpenMode) -> anyhow::Result<Handle> {
    self.lock();
    match self.open(mode) {
      Ok(database) => Ok(Handle {
        session: sync::Arc::clone(self),
        database: Some(database),
      }),
      Err(error) => {
        self.unlock();
        Err(error)
      }
    }
  }

  fn lock(&self) {
    let mut locked = self.locked.lock().unwrap();
    while *locked {
      locked = self.available.wait(locked).unwrap();
    }
    *locked = true;
  }

  fn unlock(&self) {
    *self.locked.lock().unwrap() = false;
    self.available.notify_one();
  }

  fn open(&self, mode: OpenMode) -> anyhow::Result<notmuch::Database> {
    loop {
      match notmuch::Database::try_open(&self.backing, mode) {
        Ok(database) => {
          if database.needs_upgrade() {
            log::error!(
              "notmuch database at {} needs an upgrade; refusing to run against a stale format",
              self.backing.display()
            );
            std::process::exit(1);
          }
          return Ok(database);
        }
        Err(error) if error.is_contention() => {
          log::warn!("index is locked by another process, retrying in {CONTENTION_RETRY_DELAY:?}");
          thread::sleep(CONTENTION_RETRY_DELAY);
        }
        Err(error) if mode == OpenMode::ReadOnly => {
          // The library doesn't expose a distinct status for "this
          // operation needed a writable database"; the original always
          // opens read-write for exactly this reason. Fall back once
          // rather than widen every read-only caller to read-write.
          log::debug!("read-only open failed ({error}), retrying read-write");
          return notmuch::Database::try_open(&self.backing, OpenMode::ReadWrite)
            .map_err(|error| anyhow::anyhow!("couldn't open notmuch database read-write: {error}"));
        }
        Err(error) => {
          return Err(anyhow::anyhow!("couldn't open notmuch database: {error}"));
        }
      }
    }
  }
}

/// A held-open session handle, released back to [`Session`] on drop.
pub struct Handle {
  session: sync::Arc<Session>,
  database: Option<notmuch::Database>,
}

impl Handle {
  pub fn database(&self) -> &notmuch::Database {
    self.database.as_ref().expect("database dropped before handle")
  }

  pub fn database_mut(&mut self) -> &mut notmuch::Database {
    self.database.as_mut().expect("database dropped before handle")
  }
}

impl Drop for Handle {
  fn drop(&mut self) {
    self.database.take();
    self.session.unlock();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_log::test;

  #[test]
  fn excluded_tags_are_exposed() {
    let session = Session::new(path::PathBuf::from("/nonexistent"), vec!["trash".to_string()]);
    assert_eq!(session.excluded_tags(), &["trash".to_string()]);
  }
}
