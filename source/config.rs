//! Process configuration (ambient): the immutable bundle every component
//! reads from, built once out of the mountpoint, `-o key=value` options and
//! flags parsed in `main`.

use std::path;

pub struct Config {
  pub mountpoint: path::PathBuf,
  pub backing_dir: path::PathBuf,
  pub mail_dir: path::PathBuf,
  pub mutt_2476_workaround: bool,
}

#[derive(Debug)]
pub enum OptionsError {
  Missing(&'static str),
  NotADirectory(&'static str, path::PathBuf),
}

impl std::fmt::Display for OptionsError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OptionsError::Missing(name) => write!(f, "missing required option: {name}"),
      OptionsError::NotADirectory(name, path) => {
        write!(f, "{name}={} is not a directory", path.display())
      }
    }
  }
}

impl std::error::Error for OptionsError {}

/// Parse a comma-joined `-o key=value,key,...` string (as `clap` hands it
/// over from a repeated `-o`) into a [`Config`]. Unknown keys are ignored,
/// matching the original `fuse_opt` table's behavior of passing through
/// anything it doesn't recognize to the generic FUSE option parser.
pub fn parse(mountpoint: path::PathBuf, options: &str) -> Result<Config, OptionsError> {
  let mut backing_dir = None;
  let mut mail_dir = None;
  let mut mutt_2476_workaround = false;

  for option in options.split(',').filter(|o| !o.is_empty()) {
    match option.split_once('=') {
      Some(("backing_dir", value)) => backing_dir = Some(path::PathBuf::from(value)),
      Some(("mail_dir", value)) => mail_dir = Some(path::PathBuf::from(value)),
      None if option == "mutt_2476_workaround" => mutt_2476_workaround = true,
      None if option == "nomutt_2476_workaround" => mutt_2476_workaround = false,
      _ => (),
    }
  }

  let backing_dir = backing_dir.ok_or(OptionsError::Missing("backing_dir"))?;
  if !backing_dir.is_dir() {
    return Err(OptionsError::NotADirectory("backing_dir", backing_dir));
  }
  let mail_dir = mail_dir.ok_or(OptionsError::Missing("mail_dir"))?;
  if !mail_dir.is_dir() {
    return Err(OptionsError::NotADirectory("mail_dir", mail_dir));
  }

  Ok(Config {
    mountpoint,
    backing_dir,
    mail_dir,
    mutt_2476_workaround,
  })
}

/// Capture the session's excluded-tags list the way the original does: run
/// `notmuch config get search.exclude_tags`, keep up to 128 bytes of
/// stdout, strip the trailing newline, split on whitespace.
pub fn excluded_tags(mail_dir: &path::Path) -> Vec<String> {
  let output = std::process::Command::new("notmuch")
    .current_dir(mail_dir)
    .args(["config", "get", "search.exclude_tags"])
    .output();
  let mut stdout = match output {
    Ok(output) if output.status.success() => output.stdout,
    Ok(output) => {
      log::warn!(
        "notmuch config get search.exclude_tags exited with {}; assuming no excluded tags",
        output.status
      );
      return Vec::new();
    }
    Err(error) => {
      log::warn!("couldn't run notmuch config get search.exclude_tags: {error}; assuming no excluded tags");
      return Vec::new();
    }
  };
  stdout.truncate(128);
  let text = String::from_utf8_lossy(&stdout);
  text.trim_end().split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use test_log::test;

  #[test]
  fn parses_required_and_flag_options() {
    let backing = tempfile::tempdir().unwrap();
    let mail = tempfile::tempdir().unwrap();
    let options = format!(
      "backing_dir={},mail_dir={},mutt_2476_workaround",
      backing.path().display(),
      mail.path().display()
    );
    let config = parse(path::PathBuf::from("/mnt"), &options).unwrap();
    assert_eq!(config.backing_dir, backing.path());
    assert_eq!(config.mail_dir, mail.path());
    assert!(config.mutt_2476_workaround);
  }

  #[test]
  fn missing_backing_dir_is_an_error() {
    let mail = tempfile::tempdir().unwrap();
    let options = format!("mail_dir={}", mail.path().display());
    assert!(matches!(
      parse(path::PathBuf::from("/mnt"), &options),
      Err(OptionsError::Missing("backing_dir"))
    ));
  }

  #[test]
  fn non_directory_backing_dir_is_an_error() {
    let mail = tempfile::tempdir().unwrap();
    let options = format!("backing_dir=/nonexistent,mail_dir={}", mail.path().display());
    assert!(matches!(
      parse(path::PathBuf::from("/mnt"), &options),
      Err(OptionsError::NotADirectory("backing_dir", _))
    ));
  }
}
