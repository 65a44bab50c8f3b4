//! FUSE adapter (C9): translates between `fuser`'s inode-addressed
//! `Filesystem` trait and the path-addressed core (C1-C8). Grounded on the
//! `fuse-mt` crate's `InodeTranslator`: an inode table that only grows for
//! the life of the mount, and a `get_path!`-style lookup before every
//! dispatch. No other module in this crate knows inodes exist.

use crate::{attrs, config, error, passthrough, path as vpath, query_dir, reader, rename, session};
use fuser::{
  Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags, INodeNo, LockOwner, OpenFlags,
  ReadFlags, RenameFlags, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
  Request,
};
use std::{
  collections::HashMap,
  ffi::OsStr,
  fs, path,
  sync::{atomic, Mutex},
  time::Duration,
};

/// `fuser` asks for a TTL on every `entry`/`attr` reply; everything here is
/// recomputed from the backing store and index on every call, so there is
/// nothing worth caching client-side.
const ATTR_TTL: Duration = Duration::from_secs(0);

struct InodeTable {
  next: u64,
  by_path: HashMap<path::PathBuf, u64>,
  by_ino: HashMap<u64, path::PathBuf>,
}

impl InodeTable {
  fn new() -> Self {
    let mut by_path = HashMap::new();
    let mut by_ino = HashMap::new();
    by_path.insert(path::PathBuf::from("/"), 1);
    by_ino.insert(1, path::PathBuf::from("/"));
    Self { next: 2, by_path, by_ino }
  }

  fn path(&self, ino: u64) -> Option<path::PathBuf> {
    self.by_ino.get(&ino).cloned()
  }

  fn ino_for(&mut self, path: path::PathBuf) -> u64 {
    if let Some(&ino) = self.by_path.get(&path) {
      return ino;
    }
    let ino = self.next;
    self.next += 1;
    self.by_path.insert(path.clone(), ino);
    self.by_ino.insert(ino, path);
    ino
  }
}

enum DirHandle {
  Query(query_dir::QueryDir),
  /// `MAILDIR_SUB` variants other than `cur`, and `BACKING`/`ROOT`
  /// directories: entries materialized once at `opendir` time.
  Plain(Vec<(String, FileType)>),
}

pub struct Adapter {
  root: path::PathBuf,
  session: std::sync::Arc<session::Session>,
  allow_compat: bool,
  inodes: Mutex<InodeTable>,
  open_dirs: Mutex<HashMap<u64, DirHandle>>,
  open_files: Mutex<HashMap<u64, reader::Reader>>,
  next_fh: atomic::AtomicU64,
}

impl Adapter {
  pub fn new(config: &config::Config, session: std::sync::Arc<session::Session>) -> Self {
    Self {
      root: config.backing_dir.clone(),
      session,
      allow_compat: config.mutt_2476_workaround,
      inodes: Mutex::new(InodeTable::new()),
      open_dirs: Mutex::new(HashMap::new()),
      open_files: Mutex::new(HashMap::new()),
      next_fh: atomic::AtomicU64::new(1),
    }
  }

  fn path_for(&self, ino: u64) -> Option<path::PathBuf> {
    self.inodes.lock().unwrap().path(ino)
  }

  fn ino_for(&self, path: path::PathBuf) -> u64 {
    self.inodes.lock().unwrap().ino_for(path)
  }

  fn classify(&self, p: &str) -> vpath::Region {
    vpath::classify(p, self.allow_compat)
  }

  fn file_attr(&self, ino: u64, attrs: attrs::Attrs) -> FileAttr {
    let kind = match (attrs.is_dir, attrs.is_symlink) {
      (true, _) => FileType::Directory,
      (_, true) => FileType::Symlink,
      _ => FileType::RegularFile,
    };
    FileAttr {
      ino: INodeNo(ino),
      size: attrs.size,
      blocks: attrs.size.div_ceil(512),
      atime: attrs.mtime,
      mtime: attrs.mtime,
      ctime: attrs.mtime,
      crtime: attrs.mtime,
      kind,
      perm: (attrs.mode & 0o7777) as u16,
      nlink: 1,
      uid: unsafe { libc::getuid() },
      gid: unsafe { libc::getgid() },
      rdev: 0,
      blksize: 4096,
      flags: 0,
    }
  }

  fn next_fh(&self) -> u64 {
    self.next_fh.fetch_add(1, atomic::Ordering::Relaxed)
  }
}

impl Filesystem for Adapter {
  fn destroy(&mut self) {
    log::info!("unmounting, {} inodes tracked", self.inodes.lock().unwrap().by_ino.len());
  }

  fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
    let Some(parent_path) = self.path_for(parent.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let child = if parent_path == path::Path::new("/") {
      path::PathBuf::from("/").join(name)
    } else {
      parent_path.join(name)
    };
    let region = self.classify(&child.to_string_lossy());
    match attrs::getattr(&self.root, &child.to_string_lossy(), &region) {
      Ok(attrs) => {
        let ino = self.ino_for(child);
        reply.entry(&ATTR_TTL, &self.file_attr(ino, attrs), 0);
      }
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
    let Some(p) = self.path_for(ino.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let region = self.classify(&p.to_string_lossy());
    match attrs::getattr(&self.root, &p.to_string_lossy(), &region) {
      Ok(attrs) => reply.attr(&ATTR_TTL, &self.file_attr(ino.0, attrs)),
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn readlink(&self, _req: &Request, ino: INodeNo, reply: ReplyData) {
    let Some(p) = self.path_for(ino.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    match passthrough::readlink(&self.root, &p.to_string_lossy()) {
      Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn mkdir(
    &self,
    _req: &Request,
    parent: INodeNo,
    name: &OsStr,
    mode: u32,
    _umask: u32,
    reply: ReplyEntry,
  ) {
    let Some(parent_path) = self.path_for(parent.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let child = parent_path.join(name);
    match passthrough::mkdir(&self.root, &child.to_string_lossy(), mode) {
      Ok(()) => {
        let region = self.classify(&child.to_string_lossy());
        match attrs::getattr(&self.root, &child.to_string_lossy(), &region) {
          Ok(attrs) => {
            let ino = self.ino_for(child);
            reply.entry(&ATTR_TTL, &self.file_attr(ino, attrs), 0);
          }
          Err(error) => reply.error(Errno::from(error.errno())),
        }
      }
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
    let Some(parent_path) = self.path_for(parent.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let child = parent_path.join(name);
    match passthrough::rmdir(&self.root, &child.to_string_lossy()) {
      Ok(()) => reply.ok(),
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn symlink(
    &self,
    _req: &Request,
    parent: INodeNo,
    link_name: &OsStr,
    target: &path::Path,
    reply: ReplyEntry,
  ) {
    let Some(parent_path) = self.path_for(parent.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let link = parent_path.join(link_name);
    match passthrough::symlink(&self.root, &target.to_string_lossy(), &link.to_string_lossy()) {
      Ok(()) => {
        let region = self.classify(&link.to_string_lossy());
        match attrs::getattr(&self.root, &link.to_string_lossy(), &region) {
          Ok(attrs) => {
            let ino = self.ino_for(link);
            reply.entry(&ATTR_TTL, &self.file_attr(ino, attrs), 0);
          }
          Err(error) => reply.error(Errno::from(error.errno())),
        }
      }
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
    let Some(parent_path) = self.path_for(parent.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let child = parent_path.join(name);
    let region = self.classify(&child.to_string_lossy());
    match passthrough::unlink(&self.root, &child.to_string_lossy(), &region) {
      Ok(()) => reply.ok(),
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn rename(
    &self,
    _req: &Request,
    parent: INodeNo,
    name: &OsStr,
    newparent: INodeNo,
    newname: &OsStr,
    _flags: RenameFlags,
    reply: ReplyEmpty,
  ) {
    let (Some(parent_path), Some(newparent_path)) =
      (self.path_for(parent.0), self.path_for(newparent.0))
    else {
      reply.error(Errno::EINVAL);
      return;
    };
    let source_path = parent_path.join(name);
    let dest_path = newparent_path.join(newname);
    let source_region = self.classify(&source_path.to_string_lossy());
    let dest_region = self.classify(&dest_path.to_string_lossy());
    let both_encoded = matches!(source_region, vpath::Region::VirtualFile { .. })
      || matches!(dest_region, vpath::Region::VirtualFile { .. });
    let result = if both_encoded {
      rename::rename(&self.session, &source_region, &dest_region)
    } else {
      fs::rename(
        self.root.join(vpath::backing_relative(&source_path.to_string_lossy())),
        self.root.join(vpath::backing_relative(&dest_path.to_string_lossy())),
      )
      .map_err(error::Error::from)
    };
    match result {
      Ok(()) => reply.ok(),
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
    let Some(p) = self.path_for(ino.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    if flags.contains(OpenFlags::O_WRONLY) || flags.contains(OpenFlags::O_RDWR) {
      // §4.5: the header-injected reader only ever opens read-only.
      reply.error(Errno::EACCES);
      return;
    }
    let region = self.classify(&p.to_string_lossy());
    match reader::Reader::open(&self.root, &self.session, &p.to_string_lossy(), &region) {
      Ok(reader) => {
        let fh = self.next_fh();
        self.open_files.lock().unwrap().insert(fh, reader);
        reply.opened(FileHandle(fh), FopenFlags::empty());
      }
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn read(
    &self,
    _req: &Request,
    _ino: INodeNo,
    fh: FileHandle,
    offset: u64,
    size: u32,
    _read_flags: ReadFlags,
    _flags: u32,
    _lock_owner: Option<LockOwner>,
    reply: ReplyData,
  ) {
    let mut open_files = self.open_files.lock().unwrap();
    let Some(reader) = open_files.get_mut(&fh.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let mut buf = vec![0u8; size as usize];
    match reader.read(offset, &mut buf) {
      Ok(n) => reply.data(&buf[..n]),
      Err(error) => reply.error(Errno::from(error.errno())),
    }
  }

  fn release(
    &self,
    _req: &Request,
    _ino: INodeNo,
    fh: FileHandle,
    _flags: OpenFlags,
    _lock_owner: Option<LockOwner>,
    _flush: bool,
    reply: ReplyEmpty,
  ) {
    self.open_files.lock().unwrap().remove(&fh.0);
    reply.ok();
  }

  fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
    let Some(p) = self.path_for(ino.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let region = self.classify(&p.to_string_lossy());
    let handle = match &region {
      vpath::Region::MaildirSub { query, sub: vpath::MaildirSub::Cur } => {
        match query_dir::QueryDir::open(&self.session, &self.root, query) {
          Ok(query_dir) => DirHandle::Query(query_dir),
          Err(error) => {
            reply.error(Errno::from(error.errno()));
            return;
          }
        }
      }
      vpath::Region::MaildirSub { .. } => DirHandle::Plain(Vec::new()),
      vpath::Region::Root | vpath::Region::Query { .. } | vpath::Region::Backing => {
        let relative = vpath::backing_relative(&p.to_string_lossy());
        match fs::read_dir(self.root.join(relative)) {
          Ok(entries) => {
            let mut listing = Vec::new();
            for entry in entries.flatten() {
              let Ok(file_type) = entry.file_type() else { continue };
              let kind = if file_type.is_dir() {
                FileType::Directory
              } else if file_type.is_symlink() {
                FileType::Symlink
              } else {
                FileType::RegularFile
              };
              listing.push((entry.file_name().to_string_lossy().into_owned(), kind));
            }
            DirHandle::Plain(listing)
          }
          Err(error) => {
            reply.error(Errno::from(error::Error::from(error).errno()));
            return;
          }
        }
      }
      _ => {
        reply.error(Errno::ENOENT);
        return;
      }
    };
    let fh = self.next_fh();
    self.open_dirs.lock().unwrap().insert(fh, handle);
    reply.opened(FileHandle(fh), FopenFlags::empty());
  }

  fn readdir(&self, _req: &Request, ino: INodeNo, fh: FileHandle, offset: u64, mut reply: ReplyDirectory) {
    let Some(p) = self.path_for(ino.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    let mut open_dirs = self.open_dirs.lock().unwrap();
    let Some(handle) = open_dirs.get_mut(&fh.0) else {
      reply.error(Errno::EINVAL);
      return;
    };
    match handle {
      DirHandle::Query(query_dir) => {
        let parent_ino = self.ino_for(p.parent().unwrap_or(&p).to_path_buf());
        let result = query_dir.readdir(offset, |entry_offset, name, size| {
          let (child_ino, kind) = match name {
            "." => (ino.0, FileType::Directory),
            ".." => (parent_ino, FileType::Directory),
            _ => (self.ino_for(p.join(name)), FileType::RegularFile),
          };
          let _ = size; // sizes are reported through getattr, not readdir.
          !reply.add(INodeNo(child_ino), entry_offset as i64, kind, name)
        });
        match result {
          Ok(()) => reply.ok(),
          Err(error) => reply.error(Errno::from(error.errno())),
        }
      }
      DirHandle::Plain(entries) => {
        // Same offset protocol as `QueryDir`: 1/2 for `.`/`..`, 3.. for real
        // entries. `offset` is the last entry the kernel says it already
        // has, so resume at `offset + 1`.
        let mut next_offset = if offset == 0 { 1 } else { offset + 1 };
        if next_offset == 1 {
          if reply.add(ino, 1, FileType::Directory, ".") {
            reply.ok();
            return;
          }
          next_offset = 2;
        }
        if next_offset == 2 {
          if reply.add(ino, 2, FileType::Directory, "..") {
            reply.ok();
            return;
          }
          next_offset = 3;
        }
        for (position, (name, kind)) in entries.iter().enumerate() {
          let entry_offset = (position + 3) as u64;
          if entry_offset < next_offset {
            continue;
          }
          let child_ino = self.ino_for(p.join(name));
          if reply.add(INodeNo(child_ino), entry_offset as i64, *kind, name.as_str()) {
            break;
          }
        }
        reply.ok();
      }
    }
  }

  fn releasedir(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
    self.open_dirs.lock().unwrap().remove(&fh.0);
    reply.ok();
  }
}
