//! Attribute synthesizer (C5): `stat`-like results for every path region,
//! with inflated sizes for virtual files so a mail client sees a size that
//! matches what it will actually read (header included).

use crate::{error, path as vpath};
use std::{fs, os::unix::fs::MetadataExt as _, path};

/// The fixed synthesized-header length (§3, §4.5). Every `VIRTUAL_FILE`'s
/// reported size is inflated by this many bytes.
pub const HEADER_LEN: u64 = 1024;

pub struct Attrs {
  pub size: u64,
  pub is_dir: bool,
  pub is_symlink: bool,
  pub mode: u32,
  pub mtime: std::time::SystemTime,
}

impl Attrs {
  fn from_metadata(metadata: &fs::Metadata) -> Self {
    Self {
      size: metadata.size(),
      is_dir: metadata.is_dir(),
      is_symlink: metadata.file_type().is_symlink(),
      mode: metadata.mode(),
      mtime: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
    }
  }
}

/// Resolve attributes for a classified virtual path. `root` is the backing
/// directory the process `chdir`'d into at mount time; `p` is the raw
/// virtual path that produced `region` (needed for the `BACKING` case,
/// which carries no path of its own).
pub fn getattr(root: &path::Path, p: &str, region: &vpath::Region) -> error::Result<Attrs> {
  match region {
    vpath::Region::Root => Ok(Attrs::from_metadata(&fs::metadata(root)?)),
    vpath::Region::Query { query } => {
      let metadata = fs::symlink_metadata(root.join(query))?;
      Ok(Attrs::from_metadata(&metadata))
    }
    vpath::Region::MaildirSub { query, .. } => {
      // No distinct backing entry exists for a MAILDIR_SUB; it's a facet of
      // the query directory itself, so stat the query directory again.
      let metadata = fs::metadata(root.join(query))?;
      Ok(Attrs::from_metadata(&metadata))
    }
    vpath::Region::VirtualFile { backing, .. } => {
      // `backing` is the absolute path notmuch indexed the message under,
      // not a path relative to `backing_dir` — stat it directly.
      let metadata = fs::metadata(backing)?;
      let mut attrs = Attrs::from_metadata(&metadata);
      attrs.size += HEADER_LEN;
      Ok(attrs)
    }
    vpath::Region::Backing => {
      let metadata = fs::symlink_metadata(root.join(vpath::backing_relative(p)))?;
      Ok(Attrs::from_metadata(&metadata))
    }
    vpath::Region::Unknown => Err(error::Error::NotFound),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use test_log::test;

  #[test]
  fn root_is_stat_of_backing_root() {
    let directory = tempfile::tempdir().unwrap();
    let attrs = getattr(directory.path(), "/", &vpath::Region::Root).unwrap();
    assert!(attrs.is_dir);
  }

  #[test]
  fn virtual_file_size_is_inflated_by_header_len() {
    let directory = tempfile::tempdir().unwrap();
    let message_path = directory.path().join("msg");
    std::fs::write(&message_path, b"hello").unwrap();
    let backing = message_path.to_string_lossy().into_owned();
    let region = vpath::Region::VirtualFile {
      query: "inbox".to_string(),
      sub: vpath::MaildirSub::Cur,
      encoded: vpath::encode(&backing),
      backing,
      compat_active: false,
    };
    let attrs = getattr(directory.path(), "/inbox/cur/#msg", &region).unwrap();
    assert_eq!(attrs.size, 5 + HEADER_LEN);
  }

  #[test]
  fn backing_region_is_a_direct_lstat() {
    let directory = tempfile::tempdir().unwrap();
    std::fs::create_dir(directory.path().join("nested")).unwrap();
    let attrs = getattr(
      directory.path(),
      "/nested",
      &vpath::Region::Backing,
    )
    .unwrap();
    assert!(attrs.is_dir);
  }

  #[test]
  fn unknown_region_is_not_found() {
    let directory = tempfile::tempdir().unwrap();
    let error = getattr(directory.path(), "/inbox/new/#x", &vpath::Region::Unknown).unwrap_err();
    assert!(matches!(error, error::Error::NotFound));
  }
}
