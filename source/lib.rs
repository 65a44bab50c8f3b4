#![allow(clippy::upper_case_acronyms)]

mod attrs;
mod config;
mod error;
mod fuse_adapter;
mod notmuch;
mod passthrough;
mod path;
mod query_dir;
mod reader;
mod rename;
mod session;

pub use config::{excluded_tags, parse as parse_options, Config, OptionsError};

use std::path as stdpath;

#[derive(clap::Args)]
#[group(skip)]
pub struct Arguments {
  #[arg(help = "Mountpoint")]
  pub mountpoint: stdpath::PathBuf,
  #[arg(
    short = 'o',
    long = "options",
    help = "Comma-separated key=value mount options (backing_dir, mail_dir, mutt_2476_workaround)"
  )]
  pub options: String,
}

/// Build the index session and FUSE adapter from a validated [`Config`] and
/// block in the FUSE event loop until unmount (§4.8, §6). Any setup failure
/// is the caller's to report; this only returns once the mount has ended.
pub fn run(config: &Config) -> anyhow::Result<()> {
  std::env::set_current_dir(&config.backing_dir)?;

  let excluded_tags = config::excluded_tags(&config.mail_dir);
  log::debug!("excluded tags: {excluded_tags:?}");
  let session = session::Session::new(config.mail_dir.clone(), excluded_tags);
  let adapter = fuse_adapter::Adapter::new(config, session);

  log::info!(
    "mounting {} (backing_dir={}, mail_dir={}, mutt_2476_workaround={})",
    config.mountpoint.display(),
    config.backing_dir.display(),
    config.mail_dir.display(),
    config.mutt_2476_workaround,
  );
  fuser::mount2(adapter, &config.mountpoint, &[])?;
  Ok(())
}
