//! Passthrough ops (C8): `mkdir`, `rmdir`, `symlink`, `readlink`, `unlink`
//! for paths that don't carry an encoded backing filename, forwarded
//! directly to the backing directory. An `unlink` of an encoded name still
//! only touches the backing store — the index is deliberately left alone,
//! a subsequent `notmuch new` is expected to reconcile it.

use crate::{error, path as vpath};
use std::{
  os::unix::{self, fs::PermissionsExt as _},
  path,
};

pub fn mkdir(root: &path::Path, p: &str, mode: u32) -> error::Result<()> {
  let target = root.join(vpath::backing_relative(p));
  std::fs::create_dir(&target)?;
  let permissions = std::fs::Permissions::from_mode(mode);
  std::fs::set_permissions(&target, permissions)?;
  Ok(())
}

pub fn rmdir(root: &path::Path, p: &str) -> error::Result<()> {
  std::fs::remove_dir(root.join(vpath::backing_relative(p)))?;
  Ok(())
}

pub fn symlink(root: &path::Path, target: &str, link: &str) -> error::Result<()> {
  unix::fs::symlink(target, root.join(vpath::backing_relative(link)))?;
  Ok(())
}

pub fn readlink(root: &path::Path, p: &str) -> error::Result<path::PathBuf> {
  Ok(std::fs::read_link(root.join(vpath::backing_relative(p)))?)
}

/// Unlink `p`. If `p` is a `VirtualFile`, its decoded `backing` field is
/// already the absolute path notmuch indexed the message under; either way
/// the index is not touched.
pub fn unlink(root: &path::Path, p: &str, region: &vpath::Region) -> error::Result<()> {
  match region {
    vpath::Region::VirtualFile { backing, .. } => std::fs::remove_file(backing)?,
    _ => std::fs::remove_file(root.join(vpath::backing_relative(p)))?,
  };
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_log::test;

  #[test]
  fn mkdir_rmdir_roundtrip() {
    let directory = tempfile::tempdir().unwrap();
    mkdir(directory.path(), "/sub", 0o755).unwrap();
    assert!(directory.path().join("sub").is_dir());
    rmdir(directory.path(), "/sub").unwrap();
    assert!(!directory.path().join("sub").exists());
  }

  #[test]
  fn symlink_and_readlink_roundtrip() {
    let directory = tempfile::tempdir().unwrap();
    symlink(directory.path(), "tag:inbox", "/inbox").unwrap();
    assert_eq!(readlink(directory.path(), "/inbox").unwrap(), path::PathBuf::from("tag:inbox"));
  }

  #[test]
  fn unlink_virtual_file_targets_decoded_backing_path() {
    let directory = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(directory.path().join("m/a/cur")).unwrap();
    let message_path = directory.path().join("m/a/cur/1:2,");
    std::fs::write(&message_path, b"x").unwrap();
    let backing = message_path.to_string_lossy().into_owned();
    let region = vpath::Region::VirtualFile {
      query: "inbox".to_string(),
      sub: vpath::MaildirSub::Cur,
      encoded: vpath::encode(&backing),
      backing,
      compat_active: false,
    };
    unlink(directory.path(), "/inbox/cur/#m#a#cur#1:2,", &region).unwrap();
    assert!(!message_path.exists());
  }
}
