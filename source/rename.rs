//! Rename & flag-sync (C7): translates a rename inside a virtual maildir
//! into a backing-file rename plus an atomic index update, including the
//! `cur`↔`new` compatibility workaround for mail clients that rename a
//! message into `new/` to mark it unread (RFC 2476 doesn't cover this, but
//! at least one popular client does it anyway).

use crate::{error, notmuch, path as vpath, session};
use std::{fs, path, sync};

/// Which compat-mode case a rescued rename belongs to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompatCase {
  /// `cur` → `new`: the client is marking the message unread.
  CurToNew,
  /// `new` → `cur`: the client is marking the message read/seen.
  NewToCur,
}

/// Split a decoded backing path into its directory and final component,
/// e.g. `/m/a/cur/1:2,S` -> (`/m/a/cur`, `1:2,S`).
fn split_backing(backing: &str) -> (&str, &str) {
  backing.rsplit_once('/').unwrap_or(("", backing))
}

/// Validate the rename and, if accepted, return the backing source and
/// destination paths plus which compat case (if any) rescued it.
///
/// Only the directory portion of the decoded backing path has to match
/// between source and destination; the final component (the maildir flag
/// suffix) is exactly what's expected to differ on an ordinary flag-change
/// rename. This mirrors the original's byte-prefix-up-to-the-last-`#`
/// comparison, which covers the literal `<q>/cur/` prefix and the encoded
/// backing directory but stops short of the trailing filename segment.
fn validate<'a>(
  source: &'a vpath::Region,
  dest: &'a vpath::Region,
) -> error::Result<(&'a str, &'a str, Option<CompatCase>)> {
  use vpath::{MaildirSub, Region};
  match (source, dest) {
    (
      Region::VirtualFile {
        query: source_query,
        backing: source_backing,
        sub: source_sub,
        ..
      },
      Region::VirtualFile {
        query: dest_query,
        backing: dest_backing,
        sub: dest_sub,
        ..
      },
    ) => {
      if source_query != dest_query {
        return Err(error::Error::NotSupported);
      }
      let (source_dir, _) = split_backing(source_backing);
      let (dest_dir, _) = split_backing(dest_backing);
      if source_dir != dest_dir {
        return Err(error::Error::NotSupported);
      }
      if source_sub == dest_sub {
        return Ok((source_backing, dest_backing, None));
      }
      let case = match (source_sub, dest_sub) {
        (MaildirSub::Cur, MaildirSub::New) => CompatCase::CurToNew,
        (MaildirSub::New, MaildirSub::Cur) => CompatCase::NewToCur,
        _ => return Err(error::Error::NotSupported),
      };
      Ok((source_backing, dest_backing, Some(case)))
    }
    // Exactly one side encoded, or neither: not this protocol's problem.
    // A pure passthrough rename (neither side encoded) is handled by C8
    // before this function is ever called.
    _ => Err(error::Error::NotSupported),
  }
}

/// Run the full rename protocol. `source`/`dest` must already be
/// classified as the regions for the two paths involved.
pub fn rename(
  session: &sync::Arc<session::Session>,
  source: &vpath::Region,
  dest: &vpath::Region,
) -> error::Result<()> {
  let (source_backing, dest_backing, compat_case) = validate(source, dest)?;

  // Both are the absolute paths notmuch indexes messages under; rename them
  // directly rather than re-rooting under `backing_dir`.
  if source_backing != dest_backing {
    fs::rename(source_backing, dest_backing)?;
  }

  let dest_backing = dest_backing.to_string();
  let source_backing = source_backing.to_string();
  let add_unread = compat_case == Some(CompatCase::CurToNew);
  session
    .with(session::OpenMode::ReadWrite, move |database| {
      database.transaction(|database| {
        sync_index(database, &source_backing, &dest_backing, add_unread)
      })
    })
    .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;
  Ok(())
}

fn sync_index(
  database: &mut notmuch::Database,
  source_backing: &str,
  dest_backing: &str,
  add_unread: bool,
) -> anyhow::Result<()> {
  if source_backing == dest_backing {
    return Ok(());
  }
  let dest_path = path::Path::new(dest_backing);
  match database.index_message(dest_path) {
    Ok(mut message) => {
      // A fresh index entry for T: the message wasn't known under this
      // filename yet. `index_message` tolerates "duplicate message id" as
      // success (see below), so landing here means it was genuinely new —
      // keep F around rather than remove it, and say so.
      log::warn!("rename target {dest_backing} was indexed as a new message; not removing {source_backing}");
      let _ = &mut message;
    }
    Err(error) if error.is_duplicate_message_id() => {
      // The expected path: T is the same message previously known as F
      // under a different maildir flag suffix. Drop the old filename.
      if let Err(error) = database.remove_message(path::Path::new(source_backing)) {
        log::warn!("couldn't remove stale filename {source_backing} from the index: {error}");
      }
    }
    Err(error) => {
      log::warn!("couldn't index rename target {dest_backing}: {error}");
    }
  }

  match database.find_message_by_filename(dest_path) {
    Ok(Some(mut message)) => {
      if let Err(error) = message.maildir_flags_to_tags() {
        log::warn!("couldn't normalize tags from maildir flags for {dest_backing}: {error}");
      }
      if add_unread {
        if let Err(error) = message.add_tag("unread") {
          log::warn!("couldn't add 'unread' tag for {dest_backing}: {error}");
        }
      }
    }
    Ok(None) => {
      log::warn!("rename target {dest_backing} not found in index after sync; leaving tags as-is");
    }
    Err(error) => {
      log::warn!("couldn't re-look-up {dest_backing} in the index: {error}");
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use test_log::test;

  fn virtual_file(backing: &str, sub: vpath::MaildirSub) -> vpath::Region {
    vpath::Region::VirtualFile {
      query: "inbox".to_string(),
      sub,
      encoded: vpath::encode(backing),
      backing: backing.to_string(),
      compat_active: matches!(sub, vpath::MaildirSub::New),
    }
  }

  #[test]
  fn same_sub_different_backing_is_rejected() {
    let source = virtual_file("/m/a/cur/1:2,", vpath::MaildirSub::Cur);
    let dest = virtual_file("/m/b/cur/2:2,", vpath::MaildirSub::Cur);
    assert!(matches!(
      validate(&source, &dest),
      Err(error::Error::NotSupported)
    ));
  }

  #[test]
  fn same_sub_same_backing_is_a_flag_change() {
    let source = virtual_file("/m/a/cur/1:2,", vpath::MaildirSub::Cur);
    let dest = virtual_file("/m/a/cur/1:2,S", vpath::MaildirSub::Cur);
    // These are distinct backing paths (the flag suffix differs), so this
    // is a genuine rename, not the same-token compat-idempotence case.
    assert!(validate(&source, &dest).is_ok());
  }

  #[test]
  fn compat_cur_to_new_is_rescued_when_backing_matches() {
    let source = virtual_file("/m/a/cur/1:2,", vpath::MaildirSub::Cur);
    let dest = virtual_file("/m/a/cur/1:2,", vpath::MaildirSub::New);
    let (_, _, case) = validate(&source, &dest).unwrap();
    assert_eq!(case, Some(CompatCase::CurToNew));
  }

  #[test]
  fn compat_rescue_requires_identical_backing() {
    let source = virtual_file("/m/a/cur/1:2,", vpath::MaildirSub::Cur);
    let dest = virtual_file("/m/b/cur/1:2,", vpath::MaildirSub::New);
    assert!(matches!(
      validate(&source, &dest),
      Err(error::Error::NotSupported)
    ));
  }
}
