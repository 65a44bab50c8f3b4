//! Name codec (C1) and path classifier (C2).
//!
//! Both are pure over byte strings; neither touches the filesystem. Symlink
//! resolution for `QUERY` paths is the caller's job (see `session::resolve_query`).

use std::path;

/// Encode a backing absolute path into a single maildir filename token.
pub fn encode(path: &str) -> String {
  path.replace('/', "#")
}

/// Decode a filename token back into a backing path. Inverse of [`encode`]
/// for tokens that don't themselves contain a literal `/` (they never do,
/// since `/` is the separator being replaced).
pub fn decode(token: &str) -> String {
  token.replace('#', "/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaildirSub {
  New,
  Tmp,
  Cur,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
  Root,
  /// `<query>` is the raw last segment, not yet resolved through a symlink.
  Query { query: String },
  MaildirSub { query: String, sub: MaildirSub },
  VirtualFile {
    query: String,
    sub: MaildirSub,
    encoded: String,
    backing: String,
    compat_active: bool,
  },
  /// A path that looks encoded but is not reachable under the current
  /// compat setting (e.g. `#`-bearing name under `new/` without the
  /// workaround enabled).
  Unknown,
  Backing,
}

/// Classify a virtual path. `p` must start with `/`.
pub fn classify(p: &str, allow_compat: bool) -> Region {
  debug_assert!(p.starts_with('/'));
  if p == "/" {
    return Region::Root;
  }
  let rest = &p[1..];
  if !rest.contains('/') {
    return Region::Query {
      query: rest.to_string(),
    };
  }
  let mut segments: Vec<&str> = rest.split('/').collect();
  let last = *segments.last().unwrap();
  if let Some(sub) = maildir_sub(last) {
    let query = segments[..segments.len() - 1].join("/");
    return Region::MaildirSub { query, sub };
  }
  if last.contains('#') {
    let parent = segments[segments.len() - 2];
    let sub = match parent {
      "cur" => Some((MaildirSub::Cur, false)),
      "new" if allow_compat => Some((MaildirSub::New, true)),
      _ => None,
    };
    return match sub {
      Some((sub, compat_active)) => {
        segments.truncate(segments.len() - 2);
        let query = segments.join("/");
        Region::VirtualFile {
          query,
          sub,
          encoded: last.to_string(),
          backing: decode(last),
          compat_active,
        }
      }
      None => Region::Unknown,
    };
  }
  Region::Backing
}

fn maildir_sub(segment: &str) -> Option<MaildirSub> {
  match segment {
    "new" => Some(MaildirSub::New),
    "tmp" => Some(MaildirSub::Tmp),
    "cur" => Some(MaildirSub::Cur),
    _ => None,
  }
}

/// Strip the leading `/` so a virtual path can be joined onto the backing
/// directory (the process `chdir`s into it at mount time).
pub fn backing_relative(p: &str) -> &path::Path {
  path::Path::new(p.strip_prefix('/').unwrap_or(p))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use test_log::test;

  #[test]
  fn codec_roundtrip() {
    let backing = "/a/b/c";
    let token = encode(backing);
    assert_eq!(token, "#a#b#c");
    assert_eq!(decode(&token), backing);
  }

  #[test]
  fn codec_is_not_reversible_with_hash_in_path() {
    // Invariant 4 of the spec only promises round-tripping for inputs that
    // don't themselves contain the other character; paths with a literal
    // '#' are explicitly out of scope.
    let backing = "/a#b/c";
    assert_ne!(decode(&encode(backing)), backing);
  }

  #[test]
  fn root() {
    assert_eq!(classify("/", false), Region::Root);
  }

  #[test]
  fn query() {
    assert_eq!(
      classify("/inbox", false),
      Region::Query {
        query: "inbox".to_string()
      }
    );
  }

  #[test]
  fn maildir_sub_dirs() {
    assert_eq!(
      classify("/inbox/cur", false),
      Region::MaildirSub {
        query: "inbox".to_string(),
        sub: MaildirSub::Cur
      }
    );
    assert_eq!(
      classify("/inbox/new", false),
      Region::MaildirSub {
        query: "inbox".to_string(),
        sub: MaildirSub::New
      }
    );
    assert_eq!(
      classify("/inbox/tmp", false),
      Region::MaildirSub {
        query: "inbox".to_string(),
        sub: MaildirSub::Tmp
      }
    );
  }

  #[test]
  fn virtual_file_under_cur() {
    match classify("/inbox/cur/#m#a#cur#1:2,", false) {
      Region::VirtualFile {
        query,
        sub,
        backing,
        compat_active,
        ..
      } => {
        assert_eq!(query, "inbox");
        assert_eq!(sub, MaildirSub::Cur);
        assert_eq!(backing, "/m/a/cur/1:2,");
        assert!(!compat_active);
      }
      other => panic!("expected VirtualFile, got {other:?}"),
    }
  }

  #[test]
  fn virtual_file_under_new_requires_compat() {
    assert_eq!(classify("/inbox/new/#m#a#cur#1:2,", false), Region::Unknown);
    match classify("/inbox/new/#m#a#cur#1:2,", true) {
      Region::VirtualFile {
        sub, compat_active, ..
      } => {
        assert_eq!(sub, MaildirSub::New);
        assert!(compat_active);
      }
      other => panic!("expected VirtualFile, got {other:?}"),
    }
  }

  #[test]
  fn backing_passthrough() {
    assert_eq!(classify("/some/nested/dir", false), Region::Backing);
  }

  #[test]
  fn backing_relative_strips_leading_slash() {
    assert_eq!(backing_relative("/a/b"), path::Path::new("a/b"));
  }
}
