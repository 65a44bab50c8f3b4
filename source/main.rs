use clap::Parser as _;
use std::{path, process};

const NAME: &str = "notmuchfs";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(clap::Parser)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Arguments {
  #[clap(flatten)]
  arguments: notmuchfs::Arguments,
  #[arg(
    long = "log-directory",
    help = "Log directory",
    default_value_t = String::from("$ENV{XDG_RUNTIME_DIR}")
  )]
  pub log_directory: String,
  #[clap(flatten)]
  verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
  #[arg(short = 'h', long = "help", help = "Print help")]
  pub help: bool,
  #[arg(short = 'V', long = "version", help = "Print version")]
  pub version: bool,
}

/// §4.10/§6: `-h`/`--help` exits 1, `-V`/`--version` exits 0, diverging from
/// both convention and `clap`'s own defaults. Handled explicitly rather than
/// through `clap`'s generated flags so the exit codes land right.
fn handle_help_and_version(arguments: &Arguments, command: &mut clap::Command) -> ! {
  if arguments.version {
    println!("{NAME} {VERSION}");
    process::exit(0);
  }
  let _ = command.print_long_help();
  process::exit(1);
}

fn init_logging(log_directory: &str, verbosity: log::LevelFilter) -> anyhow::Result<()> {
  let encoder = Box::new(log4rs::encode::pattern::PatternEncoder::new(
    "{d(%F %T)} {l} {t} - {m}{n}",
  ));
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            log::LevelFilter::Trace,
          )))
          .build(
            "file",
            Box::new(
              log4rs::append::file::FileAppender::builder()
                .encoder(encoder.clone())
                .build(path::Path::new(log_directory).join(format!("{NAME}.log")))?,
            ),
          ),
      )
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            verbosity,
          )))
          .build(
            "console",
            Box::new(
              log4rs::append::console::ConsoleAppender::builder()
                .encoder(encoder)
                .build(),
            ),
          ),
      )
      .build(
        log4rs::config::Root::builder()
          .appenders(["console", "file"])
          .build(log::LevelFilter::Trace),
      )?,
  )?;
  Ok(())
}

fn main() -> anyhow::Result<()> {
  let arguments = Arguments::parse();
  if arguments.help || arguments.version {
    handle_help_and_version(&arguments, &mut <Arguments as clap::CommandFactory>::command());
  }

  // Config validation can fail before logging is set up (e.g. an
  // unwritable log directory); mirror the original's direct stderr
  // diagnostics for that class of failure rather than routing it through a
  // logging backend that may not exist yet.
  let config = match notmuchfs::parse_options(
    arguments.arguments.mountpoint.clone(),
    &arguments.arguments.options,
  ) {
    Ok(config) => config,
    Err(error) => {
      eprintln!("{NAME}: {error}");
      process::exit(1);
    }
  };

  init_logging(&arguments.log_directory, arguments.verbose.log_level_filter())?;

  notmuchfs::run(&config)
}
