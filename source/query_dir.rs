//! Query directory (C4): materializes a `cur/` listing from a notmuch
//! query, one entry per message, paginated via a monotonically increasing
//! offset. Holds the index session open across a whole opendir→releasedir
//! span, since the underlying iterator is only valid while the query that
//! produced it is alive.

use crate::{attrs, error, notmuch, path as vpath, session};
use std::{fs, path, sync};

/// Bound on symlink-chain resolution for a `QUERY` name, standing in for
/// the "path-max" ceiling the spec asks for.
const MAX_SYMLINK_HOPS: usize = 40;

/// Follow `query` through the backing store's symlinks (a saved search can
/// be aliased via a symlink whose target is the actual query string). Fails
/// open: a stat error or a non-symlink just stops the chain and hands back
/// whatever `current` is, since the usual case is a symlink whose target
/// (e.g. `tag:inbox`) isn't itself a path that exists on disk.
pub fn resolve_query(root: &path::Path, query: &str) -> String {
  let mut current = query.to_string();
  for _ in 0..MAX_SYMLINK_HOPS {
    let metadata = match fs::symlink_metadata(root.join(&current)) {
      Ok(metadata) => metadata,
      Err(_) => break,
    };
    if !metadata.file_type().is_symlink() {
      break;
    }
    current = match fs::read_link(root.join(&current)) {
      Ok(target) => target.to_string_lossy().into_owned(),
      Err(_) => break,
    };
  }
  current
}

#[ouroboros::self_referencing]
struct Inner {
  handle: session::Handle,
  #[borrows(handle)]
  #[covariant]
  messages: notmuch::Messages<'this>,
  /// A message already pulled from the iterator but not yet emitted,
  /// because the last readdir call's reply buffer filled up before room
  /// was left for it. Re-offered on the next call instead of being lost.
  pending: Option<path::PathBuf>,
}

pub struct QueryDir {
  inner: Inner,
  next_offset: u64,
}

impl QueryDir {
  pub fn open(
    session: &sync::Arc<session::Session>,
    root: &path::Path,
    query_raw: &str,
  ) -> error::Result<Self> {
    let query = resolve_query(root, query_raw);
    let excluded_tags = session.excluded_tags().to_vec();
    let handle = session
      .acquire(session::OpenMode::ReadOnly)
      .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;
    let inner = InnerTryBuilder {
      handle,
      messages_builder: |handle: &session::Handle| handle.database().query(&query, &excluded_tags),
      pending: None,
    }
    .try_build()
    .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;
    Ok(Self {
      inner,
      next_offset: 1,
    })
  }

  /// Emit `.`/`..` (at offsets 1 and 2) followed by as many query results
  /// as `emit` accepts, starting from `offset_in`. `emit` returns `false`
  /// once its reply buffer is full; readdir then stops without losing the
  /// entry it couldn't fit.
  pub fn readdir(
    &mut self,
    offset_in: u64,
    mut emit: impl FnMut(u64, &str, u64) -> bool,
  ) -> error::Result<()> {
    if offset_in == 0 {
      if !emit(1, ".", 0) {
        return Ok(());
      }
      if !emit(2, "..", 0) {
        self.next_offset = 2;
        return Ok(());
      }
      self.next_offset = 3;
    } else if offset_in + 1 != self.next_offset {
      return Err(error::Error::Domain);
    }

    loop {
      let candidate = match self.inner.with_pending_mut(Option::take) {
        Some(candidate) => Some(candidate),
        None => {
          let fetched = self.inner.with_messages_mut(|messages| match messages.next() {
            None => Ok(None),
            // The first indexed filename is the canonical one (what
            // `notmuch_message_get_filename` would return), not the last.
            Some(message) => message.paths().map(|paths| paths.into_iter().next()),
          });
          fetched.map_err(|error| error::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, error)))?
        }
      };
      let backing = match candidate {
        Some(backing) => backing,
        None => return Ok(()),
      };
      let backing_str = backing.to_string_lossy().into_owned();
      // `backing` is the absolute path notmuch indexed the message under,
      // not a path relative to `backing_dir` — stat it directly.
      let metadata = match fs::metadata(&backing) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
          log::warn!("skipping {} in query listing: file no longer exists", backing.display());
          continue;
        }
        Err(error) => return Err(error.into()),
      };
      let size = metadata.len() + attrs::HEADER_LEN;
      let name = vpath::encode(&backing_str);
      if !emit(self.next_offset, &name, size) {
        self.inner.with_pending_mut(|pending| *pending = Some(backing));
        return Ok(());
      }
      self.next_offset += 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use test_log::test;

  #[test]
  fn resolve_query_follows_symlink_to_a_nonexistent_query_string() {
    let directory = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink("tag:inbox", directory.path().join("inbox")).unwrap();
    assert_eq!(resolve_query(directory.path(), "inbox"), "tag:inbox");
  }

  #[test]
  fn resolve_query_passes_through_a_plain_query_string() {
    let directory = tempfile::tempdir().unwrap();
    assert_eq!(resolve_query(directory.path(), "tag:inbox"), "tag:inbox");
  }
}
