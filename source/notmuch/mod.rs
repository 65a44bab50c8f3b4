//! Safe wrapper around the raw notmuch FFI bindings.
//!
//! Trimmed down from the teacher's wrapper of the same name: no namespace or
//! root-message bookkeeping (that was specific to synchronizing against a
//! remote IMAP mailbox), just the primitives the virtual filesystem needs:
//! open/close, query with tag exclusion, per-message filename/tags, and the
//! atomic add/remove/flag-sync triplet used by rename.

mod bindings;

use std::path;

pub use bindings::{Error, Mode};

pub struct Database(bindings::Database);

impl Database {
  pub fn try_open(path: &path::Path, mode: Mode) -> Result<Self, Error> {
    Ok(Self(bindings::Database::try_open(path, mode)?))
  }

  #[cfg(test)]
  pub fn create(path: &path::Path) -> Result<Self, Error> {
    Ok(Self(bindings::Database::create(path)?))
  }

  pub fn needs_upgrade(&self) -> bool {
    self.0.needs_upgrade()
  }

  /// Run `body` inside a notmuch atomic section, closing the section on
  /// both the success and error path (the library has no rollback; closing
  /// after an error just leaves the handle reusable, per §4.6 step 7).
  pub fn transaction<B, R>(&mut self, body: B) -> anyhow::Result<R>
  where
    B: FnOnce(&mut Self) -> anyhow::Result<R>,
  {
    self.0.begin_atomic()?;
    match body(self) {
      Ok(result) => {
        self.0.end_atomic()?;
        Ok(result)
      }
      Err(error) => {
        if let Err(close_error) = self.0.end_atomic() {
          log::warn!("couldn't close atomic section after error: {close_error}");
        }
        Err(error)
      }
    }
  }

  pub fn query(&self, query: &str, excluded_tags: &[String]) -> Result<Messages<'_>, Error> {
    log::debug!("? {query}");
    Ok(Messages(self.0.query(query, excluded_tags)?))
  }

  pub fn index_message(&self, path: &path::Path) -> Result<Message<'_>, Error> {
    Ok(Message(self.0.index_message(path)?))
  }

  pub fn remove_message(&self, path: &path::Path) -> Result<(), Error> {
    self.0.remove_message(path)
  }

  pub fn find_message_by_filename(&self, path: &path::Path) -> Result<Option<Message<'_>>, Error> {
    Ok(self.0.find_message_by_filename(path)?.map(Message))
  }
}

pub struct Messages<'a>(bindings::Messages<'a>);

impl<'a> Iterator for Messages<'a> {
  type Item = Message<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    self.0.next().map(Message)
  }
}

pub struct Message<'a>(bindings::Message<'a>);

impl<'a> Message<'a> {
  pub fn id(&self) -> Result<&str, Error> {
    self.0.id()
  }

  pub fn tags(&self) -> Result<std::collections::HashSet<&str>, Error> {
    self.0.tags()
  }

  pub fn add_tag(&mut self, tag: &str) -> Result<(), Error> {
    self.0.add_tag(tag)
  }

  pub fn maildir_flags_to_tags(&mut self) -> Result<(), Error> {
    self.0.maildir_flags_to_tags()
  }

  /// The (possibly several, due to duplicate-content detection) backing
  /// paths notmuch has indexed for this message.
  pub fn paths(&self) -> Result<Vec<path::PathBuf>, Error> {
    self.0.paths()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use std::fs;
  use test_log::test;

  fn email(id: &str) -> String {
    format!("From: {id}\nTo: {id}\nSubject: {id}\nMessage-ID: {id}\n\n{id}")
  }

  fn test<B>(body: B)
  where
    B: FnOnce(&path::Path, &mut Database),
  {
    let directory = tempfile::tempdir().unwrap();
    let mut database = Database::create(directory.path()).unwrap();
    body(directory.path(), &mut database);
  }

  #[test]
  fn index_and_query_roundtrip() {
    test(|directory, database| {
      let message_path = directory.join("cur").join("1:2,");
      fs::create_dir_all(message_path.parent().unwrap()).unwrap();
      fs::write(&message_path, email("msg1@example.com")).unwrap();
      let mut message = database.index_message(&message_path).unwrap();
      message.add_tag("inbox").unwrap();
      assert!(database.query("tag:inbox", &[]).unwrap().next().is_some());
    });
  }

  #[test]
  fn excluded_tag_is_omitted() {
    test(|directory, database| {
      let message_path = directory.join("cur").join("1:2,");
      fs::create_dir_all(message_path.parent().unwrap()).unwrap();
      fs::write(&message_path, email("msg2@example.com")).unwrap();
      let mut message = database.index_message(&message_path).unwrap();
      message.add_tag("inbox").unwrap();
      message.add_tag("trash").unwrap();
      let excluded = vec!["trash".to_string()];
      assert_eq!(
        database.query("tag:inbox", &excluded).unwrap().count(),
        0
      );
      assert_eq!(database.query("tag:inbox", &[]).unwrap().count(), 1);
    });
  }

  #[test]
  fn transaction_rolls_forward_on_error() {
    test(|_, database| {
      let result: anyhow::Result<()> = database.transaction(|_| anyhow::bail!("boom"));
      assert!(result.is_err());
      // The atomic section was still closed; the handle remains usable.
      assert_eq!(database.query("*", &[]).unwrap().count(), 0);
    });
  }
}
