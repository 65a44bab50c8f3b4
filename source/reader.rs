//! Header-injected reader (C6): open/read path that virtually prepends a
//! fixed-size `X-Label:` header, computed once at open time from the
//! message's current notmuch tags, to every virtual file's content.

use crate::{error, path as vpath, session};
use std::{
  fs,
  io::{Read as _, Seek as _, SeekFrom},
  path, sync,
};

/// The fixed synthesized-header length (§3, §4.5).
pub const HEADER_LEN: usize = 1024;

const LABEL_PREFIX: &[u8] = b"X-Label: ";
const OVERFLOW_SENTINEL: &[u8] = b"ERROR";

/// An open virtual file: a backing descriptor plus the header computed at
/// open time, never mutated afterward.
pub struct Reader {
  file: fs::File,
  header: [u8; HEADER_LEN],
}

fn compose_header(tags: impl Iterator<Item = String>) -> [u8; HEADER_LEN] {
  let mut header = [b' '; HEADER_LEN];
  header[..LABEL_PREFIX.len()].copy_from_slice(LABEL_PREFIX);
  let budget = HEADER_LEN - 1 - LABEL_PREFIX.len();
  let joined = tags.collect::<Vec<_>>().join(",");
  let body: &[u8] = if joined.len() <= budget {
    joined.as_bytes()
  } else {
    OVERFLOW_SENTINEL
  };
  header[LABEL_PREFIX.len()..LABEL_PREFIX.len() + body.len()].copy_from_slice(body);
  header[HEADER_LEN - 1] = b'\n';
  header
}

impl Reader {
  /// Open the path that classified as `region`. `p` is the raw virtual
  /// path (needed when `region` carries no path of its own, i.e. every
  /// variant except `VirtualFile`).
  pub fn open(
    root: &path::Path,
    session: &sync::Arc<session::Session>,
    p: &str,
    region: &vpath::Region,
  ) -> error::Result<Self> {
    match region {
      vpath::Region::VirtualFile { backing, .. } => {
        let tags = session
          .with(session::OpenMode::ReadWrite, |database| {
            match database.find_message_by_filename(path::Path::new(backing))? {
              Some(message) => Ok(message.tags()?.into_iter().map(str::to_string).collect::<Vec<_>>()),
              None => {
                log::warn!("message not found in index for {}; opening with an empty tag region", backing);
                Ok(Vec::new())
              }
            }
          })
          .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;
        let header = compose_header(tags.into_iter());
        // `backing` is the absolute path notmuch indexed the message under,
        // and must match the path just looked up in the index above.
        let file = fs::File::open(backing)?;
        Ok(Self { file, header })
      }
      // §4.5: a direct, non-encoded open carries no header at all. In
      // practice mail clients never open a bare QUERY/MAILDIR_SUB path,
      // but the backing file is still opened directly if asked.
      _ => {
        let file = fs::File::open(root.join(vpath::backing_relative(p)))?;
        Ok(Self {
          file,
          header: [0u8; HEADER_LEN],
        })
      }
    }
  }

  pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> error::Result<usize> {
    let header_len = HEADER_LEN as u64;
    let mut written = 0;
    if offset < header_len {
      let start = offset as usize;
      let take = (HEADER_LEN - start).min(buf.len());
      buf[..take].copy_from_slice(&self.header[start..start + take]);
      written += take;
    }
    if written < buf.len() {
      // Every header byte already copied has advanced the virtual cursor
      // by one, so the first unconsumed backing byte is always at
      // (offset + written) - H.
      let backing_offset = (offset + written as u64) - header_len;
      self.file.seek(SeekFrom::Start(backing_offset))?;
      written += self.file.read(&mut buf[written..])?;
    }
    Ok(written)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use test_log::test;

  #[test]
  fn header_is_exactly_header_len_and_ends_with_lf() {
    let header = compose_header(vec!["inbox".to_string(), "unread".to_string()].into_iter());
    assert_eq!(header.len(), HEADER_LEN);
    assert_eq!(header[HEADER_LEN - 1], b'\n');
    assert!(header.starts_with(LABEL_PREFIX));
    assert!(header.starts_with(b"X-Label: inbox,unread"));
  }

  #[test]
  fn header_overflow_uses_sentinel() {
    let huge_tag = "x".repeat(HEADER_LEN);
    let header = compose_header(std::iter::once(huge_tag));
    let body_start = LABEL_PREFIX.len();
    assert_eq!(&header[body_start..body_start + OVERFLOW_SENTINEL.len()], OVERFLOW_SENTINEL);
    assert_eq!(header[HEADER_LEN - 1], b'\n');
  }

  #[test]
  fn read_spans_header_and_backing_boundary() {
    let directory = tempfile::tempdir().unwrap();
    fs::write(directory.path().join("msg"), b"hello").unwrap();
    let mut reader = Reader {
      file: fs::File::open(directory.path().join("msg")).unwrap(),
      header: compose_header(std::iter::empty()),
    };
    let mut buf = [0u8; 8];
    let n = reader.read(HEADER_LEN as u64 - 2, &mut buf).unwrap();
    // Last 2 header bytes (space, LF) followed by the first bytes of "hello".
    assert_eq!(&buf[..n], b" \nhello");
  }
}
